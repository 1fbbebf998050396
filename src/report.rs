use std::fmt::Write;

use crate::features::ObservationWindow;
use crate::insights::StoreInsights;
use crate::models::{DataStatus, Prediction};

fn weekday_label(weekday: chrono::Weekday) -> &'static str {
    match weekday {
        chrono::Weekday::Mon => "Monday",
        chrono::Weekday::Tue => "Tuesday",
        chrono::Weekday::Wed => "Wednesday",
        chrono::Weekday::Thu => "Thursday",
        chrono::Weekday::Fri => "Friday",
        chrono::Weekday::Sat => "Saturday",
        chrono::Weekday::Sun => "Sunday",
    }
}

pub fn confidence_label(confidence: f64) -> &'static str {
    if confidence >= 0.8 {
        "high"
    } else if confidence >= 0.6 {
        "medium"
    } else {
        "low"
    }
}

pub fn build_report(
    store_name: &str,
    window: &ObservationWindow,
    prediction: &Prediction,
    insights: &StoreInsights,
) -> String {
    let mut output = String::new();
    let summary = &prediction.statistical_analysis;
    let since = window
        .start
        .map(|start| start.to_string())
        .unwrap_or_else(|| "the first record".to_string());

    let _ = writeln!(output, "# High Setting Forecast: {store_name}");
    let _ = writeln!(
        output,
        "Generated {} from records between {} and {}",
        prediction.prediction_date.format("%Y-%m-%d %H:%M UTC"),
        since,
        window.end
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Forecast");
    let _ = writeln!(
        output,
        "- High setting probability: {:.1}%",
        prediction.high_setting_probability * 100.0
    );
    let _ = writeln!(
        output,
        "- Confidence: {:.2} ({}, {} model)",
        prediction.confidence_score,
        confidence_label(prediction.confidence_score),
        prediction.model_variant.as_str()
    );
    if prediction.data_status == DataStatus::Insufficient {
        let _ = writeln!(output, "- Not enough data in this window; showing the prior.");
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recommended Machines");
    if prediction.recommended_machines.is_empty() {
        let _ = writeln!(output, "No machines cleared the recommendation threshold.");
    } else {
        for (rank, machine) in prediction.recommended_machines.iter().enumerate() {
            let _ = writeln!(output, "{}. Machine #{}", rank + 1, machine);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Machines To Play");
    if insights.recommendations.is_empty() {
        let _ = writeln!(output, "No machines observed on the latest day.");
    } else {
        for pick in insights.recommendations.iter() {
            let _ = writeln!(
                output,
                "- #{} {}: score {:.1} ({}; position {:.1}, model bonus {:.0})",
                pick.machine_number,
                pick.model_name,
                pick.total_score,
                pick.level.as_str(),
                pick.position_score,
                pick.model_bonus
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Store Summary");
    let _ = writeln!(
        output,
        "- {} machines, {} positive",
        summary.total_machines, summary.positive_machines_count
    );
    let _ = writeln!(
        output,
        "- Average games {:.0}, average difference {:+.0}",
        summary.average_game_count, summary.average_difference
    );
    for performer in summary.high_performers.iter() {
        let _ = writeln!(
            output,
            "- #{} {} {:+} coins over {} games",
            performer.machine_number,
            performer.model_name,
            performer.net_difference,
            performer.game_count
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Machine Positions");
    if insights.top_positions.is_empty() {
        let _ = writeln!(output, "No machine history in this window.");
    } else {
        for position in insights.top_positions.iter() {
            let _ = writeln!(
                output,
                "- #{} score {:.1} ({} days, {:.0}% positive, avg {:+.0})",
                position.machine_number,
                position.score,
                position.data_count,
                position.positive_rate,
                position.average_difference
            );
        }
    }
    if !insights.hot_suffixes.is_empty() {
        let suffixes: Vec<String> = insights.hot_suffixes.iter().map(|s| s.to_string()).collect();
        let _ = writeln!(output, "- Hot machine-number endings: {}", suffixes.join(", "));
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Models");
    if insights.models.is_empty() {
        let _ = writeln!(output, "No models recorded for this window.");
    } else {
        for model in insights.models.iter().take(5) {
            let _ = writeln!(
                output,
                "- {}: score {:.1} over {} days (avg {:+.0}, {:.0}% positive){}",
                model.model_name,
                model.score,
                model.days_analyzed,
                model.average_difference,
                model.positive_rate,
                if model.is_favorable { " favorable" } else { "" }
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Weekdays");
    if insights.weekdays.is_empty() {
        let _ = writeln!(output, "No daily results recorded for this window.");
    } else {
        for weekday in insights.weekdays.iter() {
            let _ = writeln!(
                output,
                "- {}: avg {:+.0}, {:.0}% positive across {} days{}",
                weekday_label(weekday.weekday),
                weekday.average_difference,
                weekday.positive_rate,
                weekday.data_count,
                if weekday.is_favorable { " favorable" } else { "" }
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    use crate::insights::{MachineRecommendation, RecommendationLevel};
    use crate::models::{HighPerformer, ModelVariant, StatisticalSummary};

    fn prediction(status: DataStatus, machines: Vec<i32>) -> Prediction {
        Prediction {
            id: Uuid::new_v4(),
            store_id: 1,
            prediction_date: Utc::now(),
            high_setting_probability: 0.42,
            confidence_score: 0.12,
            recommended_machines: machines,
            statistical_analysis: StatisticalSummary {
                average_game_count: 3000.0,
                average_difference: 120.0,
                positive_machines_count: 6,
                high_performers: vec![HighPerformer {
                    machine_number: 14,
                    model_name: "Juggler".to_string(),
                    net_difference: 890,
                    game_count: 3000,
                }],
                total_machines: 10,
                window_end: NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(),
            },
            total_machines: 10,
            model_variant: ModelVariant::Heuristic,
            data_status: status,
        }
    }

    fn empty_insights() -> StoreInsights {
        StoreInsights {
            top_positions: Vec::new(),
            hot_suffixes: Vec::new(),
            models: Vec::new(),
            weekdays: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    #[test]
    fn confidence_labels_follow_thresholds() {
        assert_eq!(confidence_label(0.9), "high");
        assert_eq!(confidence_label(0.6), "medium");
        assert_eq!(confidence_label(0.2), "low");
    }

    #[test]
    fn report_lists_forecast_and_machines() {
        let window = ObservationWindow::last_days(30, NaiveDate::from_ymd_opt(2026, 3, 31).unwrap());
        let report = build_report(
            "Espace Ikebukuro",
            &window,
            &prediction(DataStatus::Sufficient, vec![14, 13]),
            &empty_insights(),
        );
        assert!(report.starts_with("# High Setting Forecast: Espace Ikebukuro"));
        assert!(report.contains("High setting probability: 42.0%"));
        assert!(report.contains("1. Machine #14"));
        assert!(report.contains("2. Machine #13"));
        assert!(report.contains("#14 Juggler +890 coins"));
        assert!(!report.contains("Not enough data"));
    }

    #[test]
    fn report_lists_machines_to_play() {
        let window = ObservationWindow::last_days(30, NaiveDate::from_ymd_opt(2026, 3, 31).unwrap());
        let mut insights = empty_insights();
        insights.recommendations.push(MachineRecommendation {
            machine_number: 117,
            model_name: "Juggler".to_string(),
            total_score: 85.0,
            position_score: 70.0,
            model_bonus: 15.0,
            level: RecommendationLevel::High,
        });
        let report = build_report(
            "Espace Ikebukuro",
            &window,
            &prediction(DataStatus::Sufficient, vec![117]),
            &insights,
        );
        assert!(report.contains("## Machines To Play"));
        assert!(report.contains("- #117 Juggler: score 85.0 (high; position 70.0, model bonus 15)"));
    }

    #[test]
    fn report_flags_insufficient_data() {
        let window = ObservationWindow::all_until(NaiveDate::from_ymd_opt(2026, 3, 31).unwrap());
        let report = build_report(
            "Rakuen Kamata",
            &window,
            &prediction(DataStatus::Insufficient, Vec::new()),
            &empty_insights(),
        );
        assert!(report.contains("Not enough data"));
        assert!(report.contains("No machines cleared the recommendation threshold."));
        assert!(report.contains("No machines observed on the latest day."));
        assert!(report.contains("the first record"));
    }
}
