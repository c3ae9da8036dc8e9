//! Per-source normalization down to state-keyed tables.
//!
//! Each normalizer maps one raw dataset's granularity (contract, county, ZIP,
//! or state) to two-letter state codes and emits rows with explicit presence:
//! an absent metric is `None`, never zero. Normalizers are independent; the
//! orchestrator isolates failures so one broken source degrades to absent
//! without touching the others.

pub mod enrollment;
pub mod onc;
pub mod plan_mix;
pub mod ruca;
pub mod stars;
pub mod types;

use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::normalize::types::SourceStatus;

/// Writes normalized rows as a CSV table with headers.
pub fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads a normalized CSV table back; a missing file is an empty table.
pub fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for result in reader.deserialize() {
        let row: T = result?;
        rows.push(row);
    }
    Ok(rows)
}

/// Runs every normalizer over `raw_dir`, writing the state-keyed tables into
/// `processed_dir` plus a `source_status.csv` recording per-source outcomes.
///
/// A single source's failure is recorded and skipped; it never aborts the
/// other sources or the run.
pub fn run_all(raw_dir: &Path, processed_dir: &Path, config: &PipelineConfig) -> Result<()> {
    std::fs::create_dir_all(processed_dir)?;

    let mut statuses = Vec::new();

    match onc::normalize(raw_dir, config) {
        Ok(rows) => {
            write_rows(&processed_dir.join("onc_state.csv"), &rows)?;
            statuses.push(SourceStatus::ok("onc", rows.len()));
        }
        Err(e) => {
            warn!(error = %e, "ONC normalization failed, metrics degrade to absent");
            statuses.push(SourceStatus::failed("onc", &e));
        }
    }

    match ruca::normalize(raw_dir, config) {
        Ok(rows) => {
            write_rows(&processed_dir.join("ruca_state.csv"), &rows)?;
            statuses.push(SourceStatus::ok("ruca", rows.len()));
        }
        Err(e) => {
            warn!(error = %e, "RUCA normalization failed, metrics degrade to absent");
            statuses.push(SourceStatus::failed("ruca", &e));
        }
    }

    // Enrollment feeds both the plan-mix fallback and the Stars weighting,
    // so its outputs are kept in memory for the downstream normalizers.
    let mut enrollment_rows = Vec::new();
    let mut contract_rows = Vec::new();
    match enrollment::normalize(raw_dir) {
        Ok(output) => {
            write_rows(&processed_dir.join("cms_enrollment_state.csv"), &output.states)?;
            write_rows(
                &processed_dir.join("cms_contract_state_enrollment.csv"),
                &output.contracts,
            )?;
            statuses.push(SourceStatus::ok("cms_enrollment", output.states.len()));
            enrollment_rows = output.states;
            contract_rows = output.contracts;
        }
        Err(e) => {
            warn!(error = %e, "enrollment normalization failed, metrics degrade to absent");
            statuses.push(SourceStatus::failed("cms_enrollment", &e));
        }
    }

    match plan_mix::normalize(raw_dir, &enrollment_rows) {
        Ok(rows) => {
            write_rows(&processed_dir.join("cms_plan_mix_state.csv"), &rows)?;
            statuses.push(SourceStatus::ok("cms_plan_mix", rows.len()));
        }
        Err(e) => {
            warn!(error = %e, "plan-mix normalization failed, metrics degrade to absent");
            statuses.push(SourceStatus::failed("cms_plan_mix", &e));
        }
    }

    match stars::normalize(raw_dir, &contract_rows) {
        Ok(rows) => {
            write_rows(&processed_dir.join("cms_stars_state.csv"), &rows)?;
            statuses.push(SourceStatus::ok("cms_stars", rows.len()));
        }
        Err(e) => {
            warn!(error = %e, "stars normalization failed, metrics degrade to absent");
            statuses.push(SourceStatus::failed("cms_stars", &e));
        }
    }

    write_rows(&processed_dir.join("source_status.csv"), &statuses)?;

    let loaded = statuses.iter().filter(|s| s.loaded).count();
    info!(
        loaded,
        total = statuses.len(),
        processed_dir = %processed_dir.display(),
        "normalization complete"
    );
    Ok(())
}
