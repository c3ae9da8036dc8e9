//! The per-state briefing artifact.
//!
//! A closed set of section types with every key always serialized: an absent
//! metric is `null` in the JSON, never a missing key, so the front end can
//! render "Not available" deterministically. Artifacts are rebuilt whole on
//! every run, never patched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RoleImpact;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateInfo {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub headline: String,
    pub subheadline: String,
    pub key_points: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigitalReadiness {
    pub reporting_year: Option<String>,
    pub readiness_score: Option<f64>,
    pub readiness_label: String,
    pub ehr_adoption_pct: Option<f64>,
    pub hie_exchange_pct: Option<f64>,
    pub patient_access_pct: Option<f64>,
    pub tefca_ready_pct: Option<f64>,
    pub api_use_pct: Option<f64>,
    pub insight: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuralUrban {
    pub rural_pct: Option<f64>,
    pub urban_pct: Option<f64>,
    pub label: String,
    pub constraints: Vec<String>,
    pub implications: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapdPdp {
    pub mapd_share_pct: Option<f64>,
    pub ma_only_share_pct: Option<f64>,
    pub pdp_share_pct: Option<f64>,
    pub label: String,
    pub split_method: String,
    /// Present iff the coarser MA-vs-PDP fallback produced the shares.
    pub method_note: Option<String>,
    pub implications: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolesImpact {
    pub summary: String,
    pub roles: Vec<RoleImpact>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreseasonShift {
    pub before: Vec<String>,
    pub after: Vec<String>,
    pub operational_risks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StarsContext {
    pub reporting_year: Option<String>,
    pub ma_enrollment: Option<i64>,
    pub partd_enrollment: Option<i64>,
    pub avg_star: Option<f64>,
    pub volatility_index: Option<f64>,
    pub volatility_label: String,
    pub churn_pct: Option<f64>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceAttribution {
    pub onc: String,
    pub cms: String,
    pub ruca: String,
    pub census: String,
}

/// Reserved extension namespace for qualitative data the pipeline does not
/// populate yet. Always present, possibly empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FutureSections {
    pub organizations: Vec<Value>,
    pub interviews: Vec<Value>,
    pub role_risk_scores: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateArtifact {
    pub state: StateInfo,
    pub updated_at: String,
    pub summary: Summary,
    pub digital_readiness: DigitalReadiness,
    pub rural_urban: RuralUrban,
    pub mapd_pdp: MapdPdp,
    pub roles_impact: RolesImpact,
    pub preseason_shift: PreseasonShift,
    pub stars_context: StarsContext,
    pub sources: SourceAttribution,
    pub future: FutureSections,
}

/// One entry in `index.json`, used by the front end's state selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub code: String,
    pub name: String,
    pub headline: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateIndex {
    pub states: Vec<IndexEntry>,
    pub updated_at: String,
}

/// The metrics tracked by the coverage and QA auditors, with plausible
/// value ranges for the range checks.
pub const TRACKED_METRICS: &[(&str, Option<f64>, Option<f64>)] = &[
    ("readiness_score", Some(0.0), Some(100.0)),
    ("rural_pct", Some(0.0), Some(100.0)),
    ("mapd_share_pct", Some(0.0), Some(100.0)),
    ("ma_only_share_pct", Some(0.0), Some(100.0)),
    ("pdp_share_pct", Some(0.0), Some(100.0)),
    ("avg_star", Some(0.0), Some(5.0)),
    ("volatility_index", Some(0.0), Some(1.0)),
    ("ma_enrollment", Some(0.0), None),
    ("partd_enrollment", Some(0.0), None),
];

impl StateArtifact {
    /// Looks up a tracked metric by name; `None` for absent values.
    pub fn metric(&self, name: &str) -> Option<f64> {
        match name {
            "readiness_score" => self.digital_readiness.readiness_score,
            "rural_pct" => self.rural_urban.rural_pct,
            "mapd_share_pct" => self.mapd_pdp.mapd_share_pct,
            "ma_only_share_pct" => self.mapd_pdp.ma_only_share_pct,
            "pdp_share_pct" => self.mapd_pdp.pdp_share_pct,
            "avg_star" => self.stars_context.avg_star,
            "volatility_index" => self.stars_context.volatility_index,
            "ma_enrollment" => self.stars_context.ma_enrollment.map(|v| v as f64),
            "partd_enrollment" => self.stars_context.partd_enrollment.map(|v| v as f64),
            _ => None,
        }
    }

    /// Human label for a tracked metric, as printed in the reports.
    pub fn metric_label(name: &str) -> &'static str {
        match name {
            "readiness_score" => "ECDS readiness (score)",
            "rural_pct" => "Rural population share (%)",
            "mapd_share_pct" => "MAPD share (%)",
            "ma_only_share_pct" => "MA-only share (%)",
            "pdp_share_pct" => "PDP share (%)",
            "avg_star" => "Average Star rating",
            "volatility_index" => "Star volatility",
            "ma_enrollment" => "MA enrollment",
            "partd_enrollment" => "Part D enrollment",
            _ => "Unknown metric",
        }
    }
}
