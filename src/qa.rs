//! QA auditor: structural and plausibility checks over the finished
//! artifacts and the processed tables, written as a dated PASS/WARN/FAIL
//! markdown report.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::{Result, bail};
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::artifact::{StateArtifact, StateIndex, TRACKED_METRICS};
use crate::config::PipelineConfig;
use crate::normalize::read_rows;
use crate::normalize::types::SourceStatus;

/// Worst finding wins: any structural error is FAIL, any missing metric or
/// out-of-range value is WARN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QaStatus {
    Pass,
    Warn,
    Fail,
}

impl fmt::Display for QaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QaStatus::Pass => "PASS",
            QaStatus::Warn => "WARN",
            QaStatus::Fail => "FAIL",
        };
        f.write_str(s)
    }
}

const PROCESSED_TABLES: &[&str] = &[
    "onc_state.csv",
    "ruca_state.csv",
    "cms_enrollment_state.csv",
    "cms_plan_mix_state.csv",
    "cms_stars_state.csv",
];

/// Data rows in a processed CSV, `None` when the file is missing.
fn count_data_rows(path: &Path) -> Option<usize> {
    if !path.exists() {
        return None;
    }
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .ok()?;
    Some(reader.records().filter(|r| r.is_ok()).count())
}

struct Findings {
    errors: Vec<String>,
    missing_by_metric: BTreeMap<&'static str, Vec<String>>,
    range_warnings: Vec<String>,
    share_warnings: Vec<String>,
    source_warnings: Vec<String>,
    indexed_states: usize,
    loaded_states: usize,
}

fn load_states(states_dir: &Path) -> (Vec<StateArtifact>, usize, Vec<String>) {
    let index_path = states_dir.join("index.json");
    let index: StateIndex = match std::fs::read_to_string(&index_path)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
    {
        Some(index) => index,
        None => {
            return (
                Vec::new(),
                0,
                vec!["Missing or unreadable index.json in states directory.".to_string()],
            );
        }
    };
    if index.states.is_empty() {
        return (Vec::new(), 0, vec!["index.json has no states.".to_string()]);
    }

    let mut artifacts = Vec::new();
    let mut missing = Vec::new();
    for entry in &index.states {
        let path = states_dir.join(format!("{}.json", entry.code));
        match std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str::<StateArtifact>(&text).ok())
        {
            Some(artifact) => artifacts.push(artifact),
            None => missing.push(entry.code.clone()),
        }
    }

    let mut errors = Vec::new();
    if !missing.is_empty() {
        missing.sort();
        errors.push(format!("Missing state JSON files: {}", missing.join(", ")));
    }
    (artifacts, index.states.len(), errors)
}

fn check_metrics(artifacts: &[StateArtifact], findings: &mut Findings) {
    for (name, expected_min, expected_max) in TRACKED_METRICS {
        let label = StateArtifact::metric_label(name);
        let mut missing = Vec::new();
        for artifact in artifacts {
            let code = &artifact.state.code;
            let Some(value) = artifact.metric(name) else {
                missing.push(code.clone());
                continue;
            };
            if let Some(min) = expected_min {
                if value < *min {
                    findings.range_warnings.push(format!("{code}: {label} below {min}."));
                }
            }
            if let Some(max) = expected_max {
                if value > *max {
                    findings.range_warnings.push(format!("{code}: {label} above {max}."));
                }
            }
        }
        if !missing.is_empty() {
            missing.sort();
            findings.missing_by_metric.insert(name, missing);
        }
    }
}

/// Plan-mix shares for each state should sum to ~100 within the configured
/// tolerance. The three-way sum applies on the CPSC path, the two-way sum
/// on the fallback path where `ma_only_share_pct` is absent.
fn check_share_sums(artifacts: &[StateArtifact], tolerance: f64, findings: &mut Findings) {
    for artifact in artifacts {
        let mix = &artifact.mapd_pdp;
        let (Some(mapd), Some(pdp)) = (mix.mapd_share_pct, mix.pdp_share_pct) else {
            continue;
        };
        let total = mapd + mix.ma_only_share_pct.unwrap_or(0.0) + pdp;
        if (total - 100.0).abs() > tolerance {
            findings.share_warnings.push(format!(
                "{}: plan mix shares sum to {total:.2} (expected ~100).",
                artifact.state.code
            ));
        }
    }
}

fn check_source_status(processed_dir: &Path, findings: &mut Findings) -> Vec<SourceStatus> {
    let statuses = read_rows::<SourceStatus>(&processed_dir.join("source_status.csv"))
        .unwrap_or_default();
    for status in &statuses {
        if !status.loaded {
            findings
                .source_warnings
                .push(format!("{}: {}", status.source, status.detail));
        }
    }
    statuses
}

fn render(
    findings: &Findings,
    processed_rows: &[(&str, Option<usize>)],
    statuses: &[SourceStatus],
    status: QaStatus,
    run_date: NaiveDate,
) -> String {
    let mut lines = vec![
        "# QA Report".to_string(),
        String::new(),
        format!("Date: {run_date}"),
        format!("Status: {status}"),
        String::new(),
        "## Processed Tables".to_string(),
    ];
    for (name, rows) in processed_rows {
        match rows {
            Some(count) => lines.push(format!("- {name}: {count} data rows")),
            None => lines.push(format!("- {name}: MISSING")),
        }
    }

    lines.push(String::new());
    lines.push("## State Artifacts".to_string());
    if findings.indexed_states == 0 {
        lines.push("- No states found in index.json".to_string());
    } else {
        lines.push(format!("- States in index.json: {}", findings.indexed_states));
        lines.push(format!("- State JSON files loaded: {}", findings.loaded_states));
    }

    if !statuses.is_empty() {
        lines.push(String::new());
        lines.push("## Source Status".to_string());
        for status in statuses {
            let outcome = if status.loaded { "ok" } else { "FAILED" };
            lines.push(format!("- {}: {outcome} ({})", status.source, status.detail));
        }
    }

    if !findings.errors.is_empty() {
        lines.push(String::new());
        lines.push("## Errors".to_string());
        for error in &findings.errors {
            lines.push(format!("- {error}"));
        }
    }

    if !findings.missing_by_metric.is_empty() {
        lines.push(String::new());
        lines.push("## Missing Data".to_string());
        for (name, states) in &findings.missing_by_metric {
            lines.push(format!(
                "- {}: {} missing ({})",
                StateArtifact::metric_label(name),
                states.len(),
                states.join(", ")
            ));
        }
    }

    let warnings: Vec<&String> = findings
        .range_warnings
        .iter()
        .chain(&findings.share_warnings)
        .chain(&findings.source_warnings)
        .collect();
    if !warnings.is_empty() {
        lines.push(String::new());
        lines.push("## Warnings".to_string());
        for warning in warnings {
            lines.push(format!("- {warning}"));
        }
    }

    lines.join("\n") + "\n"
}

/// Runs every check, writes `qa_<date>.md`, and returns the overall status.
/// A FAIL is always an error; `strict` escalates WARN to an error too.
pub fn run(
    states_dir: &Path,
    processed_dir: &Path,
    out_dir: &Path,
    config: &PipelineConfig,
    run_date: NaiveDate,
    strict: bool,
) -> Result<QaStatus> {
    let processed_rows: Vec<(&str, Option<usize>)> = PROCESSED_TABLES
        .iter()
        .map(|name| (*name, count_data_rows(&processed_dir.join(name))))
        .collect();

    let (artifacts, indexed_states, errors) = load_states(states_dir);
    let mut findings = Findings {
        errors,
        missing_by_metric: BTreeMap::new(),
        range_warnings: Vec::new(),
        share_warnings: Vec::new(),
        source_warnings: Vec::new(),
        indexed_states,
        loaded_states: artifacts.len(),
    };

    check_metrics(&artifacts, &mut findings);
    check_share_sums(&artifacts, config.share_tolerance_pct, &mut findings);
    let statuses = check_source_status(processed_dir, &mut findings);

    let status = if !findings.errors.is_empty() {
        QaStatus::Fail
    } else if !findings.missing_by_metric.is_empty()
        || !findings.range_warnings.is_empty()
        || !findings.share_warnings.is_empty()
        || !findings.source_warnings.is_empty()
    {
        QaStatus::Warn
    } else {
        QaStatus::Pass
    };

    std::fs::create_dir_all(out_dir)?;
    let report_path = out_dir.join(format!("qa_{run_date}.md"));
    std::fs::write(
        &report_path,
        render(&findings, &processed_rows, &statuses, status, run_date),
    )?;

    match status {
        QaStatus::Fail => {
            warn!(path = %report_path.display(), "QA failed");
            bail!("QA status FAIL, see {}", report_path.display());
        }
        QaStatus::Warn if strict => {
            warn!(path = %report_path.display(), "QA warnings escalated by strict mode");
            bail!("QA status WARN under --strict, see {}", report_path.display());
        }
        _ => {
            info!(%status, path = %report_path.display(), "QA report written");
            Ok(status)
        }
    }
}
