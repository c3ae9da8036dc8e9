//! Coverage report: per-metric top-N rankings plus the list of states each
//! metric is missing for, written as a dated markdown file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use tracing::info;

use crate::artifact::{StateArtifact, StateIndex, TRACKED_METRICS};

/// Loads every artifact listed in `index.json`, in index order. Entries whose
/// JSON file is missing are skipped here; the QA auditor flags them.
pub fn load_artifacts(states_dir: &Path) -> Result<Vec<StateArtifact>> {
    let index_path = states_dir.join("index.json");
    if !index_path.exists() {
        bail!("index.json not found in {}; run build first", states_dir.display());
    }
    let index: StateIndex = serde_json::from_str(&std::fs::read_to_string(&index_path)?)
        .context("parsing index.json")?;

    let mut artifacts = Vec::new();
    for entry in &index.states {
        let path = states_dir.join(format!("{}.json", entry.code));
        if !path.exists() {
            continue;
        }
        let artifact: StateArtifact = serde_json::from_str(&std::fs::read_to_string(&path)?)
            .with_context(|| format!("parsing {}", path.display()))?;
        artifacts.push(artifact);
    }
    Ok(artifacts)
}

/// Top-N states by value. Descending by value, ties broken by ascending
/// state code so reruns produce identical rankings.
fn rank_top(mut values: Vec<(String, f64)>, top_n: usize) -> Vec<(String, f64)> {
    values.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    values.truncate(top_n);
    values
}

pub fn generate_report(artifacts: &[StateArtifact], top_n: usize, run_date: NaiveDate) -> String {
    let mut top_sections = Vec::new();
    let mut missing_sections = Vec::new();

    for (name, _, _) in TRACKED_METRICS {
        let label = StateArtifact::metric_label(name);
        let mut values = Vec::new();
        let mut missing = Vec::new();
        for artifact in artifacts {
            match artifact.metric(name) {
                Some(value) => values.push((artifact.state.code.clone(), value)),
                None => missing.push(artifact.state.code.clone()),
            }
        }

        let top = rank_top(values, top_n);
        let top_lines = if top.is_empty() {
            "- No data".to_string()
        } else {
            top.iter()
                .map(|(code, value)| format!("- {code}: {value:.2}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        top_sections.push(format!("### {label}\n{top_lines}"));

        if !missing.is_empty() {
            missing.sort();
            let missing_lines = missing
                .iter()
                .map(|code| format!("- {code}"))
                .collect::<Vec<_>>()
                .join("\n");
            missing_sections.push(format!("### Missing {label}\n{missing_lines}"));
        }
    }

    let missing_block = if missing_sections.is_empty() {
        "All metrics populated.".to_string()
    } else {
        missing_sections.join("\n")
    };

    [
        "## Coverage Report".to_string(),
        format!("Generated: {run_date}"),
        top_sections.join("\n"),
        "## Missing Data Coverage".to_string(),
        missing_block,
    ]
    .join("\n\n")
}

pub fn run(
    states_dir: &Path,
    out_dir: &Path,
    top_n: usize,
    run_date: NaiveDate,
) -> Result<PathBuf> {
    let artifacts = load_artifacts(states_dir)?;
    let report = generate_report(&artifacts, top_n, run_date);

    std::fs::create_dir_all(out_dir)?;
    let out_path = out_dir.join(format!("coverage_{run_date}.md"));
    std::fs::write(&out_path, report + "\n")?;
    info!(states = artifacts.len(), path = %out_path.display(), "coverage report written");
    Ok(out_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::build_state_artifact;
    use crate::config::PipelineConfig;
    use crate::normalize::types::OncStateRow;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 7).unwrap()
    }

    fn artifact_with_readiness(code: &str, score: Option<f64>) -> StateArtifact {
        let config = PipelineConfig::default();
        let onc = score.map(|s| OncStateRow {
            state: code.to_string(),
            readiness_score: Some(s),
            ..OncStateRow::default()
        });
        build_state_artifact(code, onc.as_ref(), None, None, None, None, &config, date())
    }

    #[test]
    fn test_rank_ties_break_by_state_code() {
        let ranked = rank_top(
            vec![
                ("FL".to_string(), 72.3),
                ("CA".to_string(), 72.3),
                ("IA".to_string(), 60.0),
            ],
            5,
        );
        assert_eq!(ranked[0].0, "CA");
        assert_eq!(ranked[1].0, "FL");
        assert_eq!(ranked[2].0, "IA");
    }

    #[test]
    fn test_rank_truncates_to_top_n() {
        let values: Vec<(String, f64)> = (0..10)
            .map(|i| (format!("S{i}"), i as f64))
            .collect();
        assert_eq!(rank_top(values, 3).len(), 3);
    }

    #[test]
    fn test_report_lists_missing_states_sorted() {
        let artifacts = vec![
            artifact_with_readiness("IA", None),
            artifact_with_readiness("CA", Some(72.3)),
            artifact_with_readiness("FL", None),
        ];
        let report = generate_report(&artifacts, 5, date());
        assert!(report.contains("### ECDS readiness (score)\n- CA: 72.30"));
        assert!(report.contains("### Missing ECDS readiness (score)\n- FL\n- IA"));
        assert!(report.contains("Generated: 2026-02-07"));
    }

    #[test]
    fn test_report_with_no_values_says_no_data() {
        let artifacts = vec![artifact_with_readiness("WY", None)];
        let report = generate_report(&artifacts, 5, date());
        assert!(report.contains("### ECDS readiness (score)\n- No data"));
    }
}
