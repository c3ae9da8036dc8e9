//! Pipeline configuration.
//!
//! Everything tunable — label cutoffs, the share-sum tolerance, which states
//! have direct ONC API pulls, role-impact defaults — lives in one immutable
//! [`PipelineConfig`] loaded once and passed explicitly into each stage.
//! Nothing in the pipeline reads ambient global state.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One role row in the `roles_impact` artifact section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleImpact {
    pub role: String,
    pub impact: String,
    pub why: String,
}

/// Role-impact defaults plus per-state overrides.
///
/// Overrides merge with the defaults by role name: a state override replaces
/// only the named role, the remaining defaults stay in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RolesConfig {
    #[serde(default)]
    pub defaults: Vec<RoleImpact>,
    #[serde(default)]
    pub state_overrides: BTreeMap<String, Vec<RoleImpact>>,
}

impl RolesConfig {
    pub fn for_state(&self, state: &str) -> Vec<RoleImpact> {
        let mut roles = self.defaults.clone();
        if let Some(overrides) = self.state_overrides.get(state) {
            for override_role in overrides {
                match roles.iter_mut().find(|r| r.role == override_role.role) {
                    Some(existing) => *existing = override_role.clone(),
                    None => roles.push(override_role.clone()),
                }
            }
        }
        roles
    }
}

/// Cutoffs for the narrative label classifications. Units are the same as
/// the underlying metric (score points or percentage points).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelThresholds {
    pub readiness_higher: f64,
    pub readiness_mixed: f64,
    pub rural_heavy_pct: f64,
    pub rural_mixed_pct: f64,
    pub plan_mix_dominant_pct: f64,
    pub plan_mix_leaning_pct: f64,
    pub volatility_higher: f64,
    pub volatility_moderate: f64,
}

impl Default for LabelThresholds {
    fn default() -> Self {
        LabelThresholds {
            readiness_higher: 70.0,
            readiness_mixed: 55.0,
            rural_heavy_pct: 40.0,
            rural_mixed_pct: 20.0,
            plan_mix_dominant_pct: 70.0,
            plan_mix_leaning_pct: 40.0,
            volatility_higher: 0.4,
            volatility_moderate: 0.3,
        }
    }
}

/// The full run configuration. `#[serde(default)]` keeps older config files
/// loading when new knobs are added.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// States with a direct ONC API pull configured; API-sourced rows for
    /// other states are ignored unless the static fallback table covers them.
    pub api_states: Vec<String>,
    /// RUCA primary code at or above which a ZIP/county counts as rural.
    pub ruca_rural_cutoff: f64,
    /// Allowed drift when plan-mix shares are summed against 100%.
    pub share_tolerance_pct: f64,
    /// How many states each coverage ranking lists.
    pub top_n: usize,
    pub thresholds: LabelThresholds,
    pub roles: RolesConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            api_states: Vec::new(),
            ruca_rural_cutoff: 4.0,
            share_tolerance_pct: 1.0,
            top_n: 5,
            thresholds: LabelThresholds::default(),
            roles: RolesConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Loads the config from a JSON file. A missing file yields the defaults
    /// so sample runs work without any setup.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(PipelineConfig::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: PipelineConfig = serde_json::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn has_api_pull(&self, state: &str) -> bool {
        self.api_states.iter().any(|s| s == state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;

    fn role(name: &str, impact: &str) -> RoleImpact {
        RoleImpact {
            role: name.to_string(),
            impact: impact.to_string(),
            why: String::new(),
        }
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let path = env::temp_dir().join("state_briefing_no_config.json");
        let _ = fs::remove_file(&path);
        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.share_tolerance_pct, 1.0);
        assert_eq!(config.ruca_rural_cutoff, 4.0);
    }

    #[test]
    fn test_load_partial_config_keeps_defaults() {
        let path = env::temp_dir().join("state_briefing_partial_config.json");
        fs::write(&path, r#"{"api_states": ["CA", "FL"], "top_n": 3}"#).unwrap();
        let config = PipelineConfig::load(&path).unwrap();
        assert!(config.has_api_pull("CA"));
        assert!(!config.has_api_pull("IA"));
        assert_eq!(config.top_n, 3);
        assert_eq!(config.thresholds.rural_heavy_pct, 40.0);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_role_overrides_merge_with_defaults() {
        let mut roles = RolesConfig {
            defaults: vec![
                role("Data Engineering", "High"),
                role("Quality Assurance", "Medium"),
                role("Provider Engagement", "Low"),
            ],
            state_overrides: BTreeMap::new(),
        };
        roles
            .state_overrides
            .insert("IA".to_string(), vec![role("Provider Engagement", "High")]);

        let ia = roles.for_state("IA");
        assert_eq!(ia.len(), 3);
        let pe = ia.iter().find(|r| r.role == "Provider Engagement").unwrap();
        assert_eq!(pe.impact, "High");

        let ca = roles.for_state("CA");
        assert_eq!(ca.len(), 3);
        assert_eq!(
            ca.iter().find(|r| r.role == "Provider Engagement").unwrap().impact,
            "Low"
        );
    }
}
