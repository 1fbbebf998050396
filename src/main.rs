use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;

use slot_setting_forecast::config::EngineConfig;
use slot_setting_forecast::features::{self, ObservationWindow};
use slot_setting_forecast::model::{self, LogisticEstimator, PredictionModel};
use slot_setting_forecast::models::{Prediction, StoreId};
use slot_setting_forecast::orchestrator::Orchestrator;
use slot_setting_forecast::repository::{PredictionStore, RecordSource};
use slot_setting_forecast::{db, ingest, insights, memory, report};

#[derive(Parser)]
#[command(name = "slot-setting-forecast")]
#[command(about = "Estimates which slot machines in a store are running high settings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load sample stores and two weeks of machine records
    Seed,
    /// Import machine records from a scraper CSV export
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Run an analysis for one store and store the prediction
    Analyze {
        #[arg(long)]
        store_id: StoreId,
        /// Only use the last N days of records
        #[arg(long)]
        since_days: Option<i64>,
        /// First day of the window (YYYY-MM-DD), overrides --since-days
        #[arg(long)]
        from: Option<NaiveDate>,
        /// Last day of the window (YYYY-MM-DD), defaults to today
        #[arg(long)]
        to: Option<NaiveDate>,
        /// Wait for an in-flight run instead of failing
        #[arg(long)]
        join: bool,
    },
    /// Show the most recent prediction for a store
    Latest {
        #[arg(long)]
        store_id: StoreId,
    },
    /// List past predictions for a store
    History {
        #[arg(long)]
        store_id: StoreId,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Show the day-by-day history of one machine
    Machine {
        #[arg(long)]
        store_id: StoreId,
        #[arg(long)]
        number: i32,
        #[arg(long, default_value_t = 30)]
        since_days: i64,
    },
    /// Analyze a store and write a markdown report
    Report {
        #[arg(long)]
        store_id: StoreId,
        #[arg(long, default_value_t = 30)]
        since_days: i64,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Train the logistic estimator from a labeled CSV export
    Train {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long, default_value = "estimator.json")]
        out: PathBuf,
        #[arg(long, default_value_t = 1000)]
        epochs: usize,
        #[arg(long, default_value_t = 0.1)]
        learning_rate: f64,
    },
    /// Analyze a store straight from a CSV export without a database
    AnalyzeCsv {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        store: String,
        #[arg(long)]
        since_days: Option<i64>,
    },
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

fn print_prediction(prediction: &Prediction) {
    println!(
        "Store {} on {}: high setting probability {:.1}% (confidence {:.2}, {} model, {} data)",
        prediction.store_id,
        prediction.prediction_date.format("%Y-%m-%d %H:%M"),
        prediction.high_setting_probability * 100.0,
        prediction.confidence_score,
        prediction.model_variant.as_str(),
        prediction.data_status.as_str()
    );
    if prediction.recommended_machines.is_empty() {
        println!("No recommended machines.");
    } else {
        let machines: Vec<String> = prediction
            .recommended_machines
            .iter()
            .map(|m| format!("#{m}"))
            .collect();
        println!("Recommended machines: {}", machines.join(", "));
    }
}

async fn analyze(
    orchestrator: &Orchestrator,
    store_id: StoreId,
    window: ObservationWindow,
    join: bool,
) -> anyhow::Result<Prediction> {
    let outcome = if join {
        orchestrator.run_or_join(store_id, window).await
    } else {
        orchestrator.run(store_id, window).await
    };
    outcome.with_context(|| format!("analysis for store {store_id} failed"))
}

fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok()))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env()?;

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect().await?;
            let inserted = db::seed(&pool).await?;
            println!("Seed data inserted ({inserted} machine records).");
        }
        Commands::Import { csv } => {
            let pool = connect().await?;
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} machine records from {}.", csv.display());
        }
        Commands::Analyze {
            store_id,
            since_days,
            from,
            to,
            join,
        } => {
            let window = ObservationWindow::resolve(since_days, from, to)?;
            let pool = connect().await?;
            let repo = Arc::new(db::PgRepository::new(pool));
            let model = PredictionModel::from_config(&config)?;
            let orchestrator = Orchestrator::new(repo.clone(), repo, model, config);
            let prediction = analyze(&orchestrator, store_id, window, join).await?;
            print_prediction(&prediction);
        }
        Commands::Latest { store_id } => {
            let pool = connect().await?;
            let repo = db::PgRepository::new(pool);
            match repo.latest_prediction(store_id).await? {
                Some(prediction) => print_prediction(&prediction),
                None => println!("No predictions recorded for store {store_id}."),
            }
        }
        Commands::History { store_id, limit } => {
            let pool = connect().await?;
            let repo = db::PgRepository::new(pool);
            let history = repo.prediction_history(store_id, limit).await?;
            if history.is_empty() {
                println!("No predictions recorded for store {store_id}.");
            }
            for prediction in history.iter() {
                print_prediction(prediction);
            }
        }
        Commands::Machine {
            store_id,
            number,
            since_days,
        } => {
            let pool = connect().await?;
            let repo = db::PgRepository::new(pool);
            let window = ObservationWindow::resolve(Some(since_days), None, None)?;
            let records = repo.records_for(store_id, &window).await?;
            match insights::machine_detail(&records, number) {
                Some(detail) => {
                    println!(
                        "Machine #{}: {} days, total {:+}, avg {:+.0}, {:.0}% positive, score {:.1}",
                        detail.machine_number,
                        detail.data_count,
                        detail.total_difference,
                        detail.average_difference,
                        detail.positive_rate,
                        detail.recommendation_score
                    );
                    for day in detail.daily.iter() {
                        println!(
                            "- {} {} {} games BB {} RB {} {:+}",
                            day.observed_on,
                            day.model_name,
                            day.game_count,
                            day.big_bonus,
                            day.regular_bonus,
                            day.net_difference
                        );
                    }
                }
                None => println!("No data for machine #{number} in the last {since_days} days."),
            }
        }
        Commands::Report {
            store_id,
            since_days,
            out,
        } => {
            let pool = connect().await?;
            let store = db::fetch_store(&pool, store_id)
                .await?
                .with_context(|| format!("store {store_id} not found"))?;
            let repo = Arc::new(db::PgRepository::new(pool));
            let top_n = config.top_n;
            let model = PredictionModel::from_config(&config)?;
            let orchestrator = Orchestrator::new(repo.clone(), repo.clone(), model, config);
            let window = ObservationWindow::resolve(Some(since_days), None, None)?;

            let prediction = analyze(&orchestrator, store_id, window, true).await?;
            let records = repo.records_for(store_id, &window).await?;
            let matrix = features::extract(store_id, &records, &window)?;
            let store_insights = insights::build(&records, &matrix, top_n);
            let report = report::build_report(&store.name, &window, &prediction, &store_insights);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Train {
            csv,
            out,
            epochs,
            learning_rate,
        } => {
            let rows = ingest::read_rows(&csv)?;
            let examples = model::examples_from_rows(&rows);
            if examples.is_empty() {
                anyhow::bail!("{} has no rows with a high_setting label", csv.display());
            }
            info!(examples = examples.len(), epochs, "training estimator");
            let estimator = LogisticEstimator::train(&examples, epochs, learning_rate, 0.001);
            estimator.save(&out)?;
            println!(
                "Estimator trained on {} examples and written to {}.",
                estimator.samples_seen,
                out.display()
            );
        }
        Commands::AnalyzeCsv {
            csv,
            store,
            since_days,
        } => {
            let repo = Arc::new(memory::InMemoryRepository::new());
            let rows = ingest::read_rows(&csv)?;
            let loaded = repo.load_rows(&rows)?;
            info!(records = loaded, path = %csv.display(), "loaded records");
            let store = repo
                .find_store(&store)?
                .with_context(|| format!("store {store} not found in {}", csv.display()))?;

            let last_observed = rows.iter().map(|r| r.observed_on).max();
            let window = ObservationWindow::resolve(since_days, None, last_observed)?;
            let model = PredictionModel::from_config(&config)?;
            if !model.has_trained() {
                info!("no trained estimator configured, scoring with the heuristic");
            }
            let orchestrator = Orchestrator::new(repo.clone(), repo.clone(), model, config);
            let prediction = analyze(&orchestrator, store.id, window, false).await?;
            print_prediction(&prediction);
            for performer in prediction.statistical_analysis.high_performers.iter() {
                println!(
                    "- #{} {} {:+} coins over {} games",
                    performer.machine_number,
                    performer.model_name,
                    performer.net_difference,
                    performer.game_count
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    #[test]
    fn rust_log_level_is_honored() {
        let filter = log_filter(Some("debug".to_string()));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn log_filter_defaults_to_info() {
        assert_eq!(log_filter(None).max_level_hint(), Some(LevelFilter::INFO));
    }
}
