//! State-keyed row types produced by the normalizers.
//!
//! These are the contract between the `process` and `build` stages, persisted
//! as CSV in the processed directory. `Option` fields are the presence flags:
//! an empty cell round-trips to `None`, so a legitimately absent metric stays
//! distinguishable from zero.

use serde::{Deserialize, Serialize};

/// ONC digital-readiness metrics for one state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OncStateRow {
    pub state: String,
    pub reporting_year: String,
    pub ehr_adoption_pct: Option<f64>,
    pub hie_exchange_pct: Option<f64>,
    pub patient_access_pct: Option<f64>,
    pub tefca_ready_pct: Option<f64>,
    pub api_use_pct: Option<f64>,
    pub readiness_score: Option<f64>,
}

/// Rural/urban population split for one state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RucaStateRow {
    pub state: String,
    pub rural_population: i64,
    pub total_population: i64,
    pub rural_pct: Option<f64>,
    pub urban_pct: Option<f64>,
}

/// MA / Part D enrollment totals for one state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrollmentStateRow {
    pub state: String,
    pub reporting_year: String,
    pub ma_enrollment: Option<i64>,
    pub partd_enrollment: Option<i64>,
    pub mapd_enrollment: Option<i64>,
    pub pdp_enrollment: Option<i64>,
    pub mapd_share_pct: Option<f64>,
    pub pdp_share_pct: Option<f64>,
    /// Period-over-period MA change; present only when both periods cover
    /// the state.
    pub ma_churn_pct: Option<f64>,
}

/// Contract-level MA/PDP enrollment within one state, the join table that
/// lets contract-keyed star ratings be weighted up to states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractEnrollmentRow {
    pub state: String,
    pub contract_id: String,
    pub plan_type: String,
    pub enrollment: i64,
    pub reporting_year: String,
}

/// How the plan-mix split for a state was produced.
pub const SPLIT_MAPD_MA_ONLY: &str = "mapd_ma_only";
pub const SPLIT_MA_VS_PDP: &str = "ma_vs_pdp";

/// MAPD / MA-only / PDP plan mix for one state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanMixStateRow {
    pub state: String,
    pub reporting_year: String,
    pub mapd_enrollment: Option<i64>,
    pub ma_only_enrollment: Option<i64>,
    pub ma_total_enrollment: Option<i64>,
    pub pdp_enrollment: Option<i64>,
    pub mapd_share_pct: Option<f64>,
    pub ma_only_share_pct: Option<f64>,
    pub pdp_share_pct: Option<f64>,
    /// [`SPLIT_MAPD_MA_ONLY`] on the CPSC path, [`SPLIT_MA_VS_PDP`] when the
    /// coarser enrollment fallback produced the numbers.
    pub split_method: String,
}

/// Enrollment-weighted star ratings for one state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StarsStateRow {
    pub state: String,
    pub reporting_year: String,
    pub avg_star: Option<f64>,
    pub volatility_index: Option<f64>,
    pub churn_pct: Option<f64>,
}

/// Per-source load/normalize outcome, consumed by the QA auditor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceStatus {
    pub source: String,
    pub loaded: bool,
    pub detail: String,
}

impl SourceStatus {
    pub fn ok(source: &str, rows: usize) -> Self {
        SourceStatus {
            source: source.to_string(),
            loaded: true,
            detail: format!("{rows} state rows"),
        }
    }

    pub fn failed(source: &str, error: &crate::error::SourceError) -> Self {
        SourceStatus {
            source: source.to_string(),
            loaded: false,
            detail: error.to_string(),
        }
    }
}
