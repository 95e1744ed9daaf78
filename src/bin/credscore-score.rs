//! Developer utility to score one applicant against a persisted model.
//!
//! Reads a JSON object of feature values and prints the decision as JSON.

use std::io::Read;
use std::path::PathBuf;

use credscore::app_dirs;
use credscore::insights::MAX_CREDIT_POINTS;
use credscore::scoring::{ScoredDecision, Scorer, parse_request};
use serde_json::{Value, json};

fn main() {
    credscore::logging::init_or_stderr();
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    let model_path = match &options.model {
        Some(path) => path.clone(),
        None => app_dirs::models_dir()
            .map_err(|err| err.to_string())?
            .join("model.json"),
    };
    let scorer = Scorer::load(&model_path).map_err(|err| err.to_string())?;

    let text = match &options.input {
        Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(path)
            .map_err(|err| format!("Failed to read {}: {err}", path.display()))?,
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|err| format!("Failed to read stdin: {err}"))?;
            buf
        }
    };
    let request: Value =
        serde_json::from_str(&text).map_err(|err| format!("Invalid JSON request: {err}"))?;
    let features = parse_request(&request).map_err(|err| err.to_string())?;

    let decision = scorer.score(&features);
    if options.summary {
        eprintln!("{}", render_summary(&decision));
    }
    let mut response = serde_json::to_value(&decision).map_err(|err| err.to_string())?;
    if options.anchor {
        let record = scorer.decision_record(&features, &decision.prediction);
        let payload = record.anchor_payload().map_err(|err| err.to_string())?;
        response["anchor"] = json!({ "record": record, "payload": payload });
    }
    let out = serde_json::to_string_pretty(&response).map_err(|err| err.to_string())?;
    println!("{out}");
    Ok(())
}

#[derive(Debug, Clone, Default)]
struct CliOptions {
    model: Option<PathBuf>,
    input: Option<PathBuf>,
    anchor: bool,
    summary: bool,
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut options = CliOptions::default();
    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Err(help_text()),
            "--model" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--model requires a value".to_string())?;
                options.model = Some(PathBuf::from(value));
            }
            "--input" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--input requires a value".to_string())?;
                options.input = Some(PathBuf::from(value));
            }
            "--anchor" => options.anchor = true,
            "--summary" => options.summary = true,
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }
    Ok(options)
}

fn help_text() -> String {
    [
        "credscore-score",
        "",
        "Score one applicant. The request is a JSON object with every schema feature,",
        "e.g. {\"monthly_income\": 80000, \"phone_bill_paid_on_time\": 1, ...}.",
        "",
        "Usage:",
        "  credscore-score [--model model.json] [--input request.json | -] [--anchor] [--summary]",
        "",
        "--anchor adds the decision record and its {hash, score, timestamp} payload.",
        "--summary prints a readable summary with the strongest drivers to stderr.",
    ]
    .join("\n")
}

const TOP_DRIVERS: usize = 3;

fn render_summary(decision: &ScoredDecision) -> String {
    let prediction = &decision.prediction;
    let insights = &decision.insights;
    let mut lines = vec![
        format!(
            "decision: {} (score {:.3})",
            if prediction.label == 1 { "approved" } else { "declined" },
            prediction.score
        ),
        format!(
            "trust tier: {}, credit points {}/{}",
            insights.tier.label(),
            insights.credit_points,
            MAX_CREDIT_POINTS
        ),
    ];
    match &decision.attribution {
        Some(attribution) => {
            lines.push("top drivers:".to_string());
            for contribution in attribution.ranked().iter().take(TOP_DRIVERS) {
                lines.push(format!(
                    "  {:<24} {:+.4}",
                    contribution.feature.name(),
                    contribution.value
                ));
            }
        }
        None => lines.extend(decision.warnings.iter().map(|w| format!("warning: {w}"))),
    }
    lines.extend(insights.tips.iter().map(|tip| format!("tip: {tip}")));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use credscore::explain::{Attribution, FeatureContribution};
    use credscore::insights::{Insights, TrustTier};
    use credscore::schema::Feature;
    use credscore::scoring::Prediction;

    #[test]
    fn summary_lists_strongest_drivers_first() {
        let decision = ScoredDecision {
            prediction: Prediction {
                label: 0,
                score: 0.2,
                margin: -1.386,
            },
            attribution: Some(Attribution {
                baseline: 0.0,
                margin: -1.386,
                contributions: vec![
                    FeatureContribution {
                        feature: Feature::MonthlyIncome,
                        value: -1.0,
                    },
                    FeatureContribution {
                        feature: Feature::PhoneBillPaidOnTime,
                        value: 0.1,
                    },
                    FeatureContribution {
                        feature: Feature::UpiTxnCount,
                        value: -0.486,
                    },
                    FeatureContribution {
                        feature: Feature::SmsNotifs,
                        value: 0.0,
                    },
                ],
            }),
            warnings: Vec::new(),
            insights: Insights {
                tier: TrustTier::Bronze,
                credit_points: 20,
                tips: vec!["Pay phone bills on time.".to_string()],
            },
        };
        let summary = render_summary(&decision);
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines[0], "decision: declined (score 0.200)");
        assert_eq!(lines[1], "trust tier: Bronze, credit points 20/80");
        assert!(lines[3].contains("monthly_income"));
        assert!(lines[4].contains("upi_txn_count"));
        assert!(lines[5].contains("phone_bill_paid_on_time"));
        assert!(!summary.contains("sms_notifs"));
        assert_eq!(lines[6], "tip: Pay phone bills on time.");
    }

    #[test]
    fn parse_args_reads_flags() {
        let options = parse_args(
            ["--model", "m.json", "--anchor", "--summary"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
        .unwrap();
        assert_eq!(options.model, Some(PathBuf::from("m.json")));
        assert!(options.anchor);
        assert!(options.summary);
        assert!(options.input.is_none());
    }
}
