//! State aggregation: merges the normalized per-source tables into one
//! briefing artifact per state, resolving fallbacks and deriving the
//! narrative labels from configured thresholds.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use chrono::NaiveDate;
use tracing::info;

use crate::artifact::{
    DigitalReadiness, FutureSections, IndexEntry, MapdPdp, PreseasonShift, RolesImpact,
    RuralUrban, SourceAttribution, StarsContext, StateArtifact, StateIndex, StateInfo, Summary,
};
use crate::config::PipelineConfig;
use crate::geo::state_name;
use crate::normalize::read_rows;
use crate::normalize::types::{
    EnrollmentStateRow, OncStateRow, PlanMixStateRow, RucaStateRow, SPLIT_MA_VS_PDP,
    StarsStateRow,
};

fn readiness_label(score: Option<f64>, config: &PipelineConfig) -> String {
    match score {
        None => "Unknown readiness".to_string(),
        Some(s) if s >= config.thresholds.readiness_higher => "Higher readiness".to_string(),
        Some(s) if s >= config.thresholds.readiness_mixed => "Mixed readiness".to_string(),
        Some(_) => "Lower readiness".to_string(),
    }
}

fn rural_label(rural_pct: Option<f64>, config: &PipelineConfig) -> String {
    match rural_pct {
        None => "Unknown rural mix".to_string(),
        Some(p) if p >= config.thresholds.rural_heavy_pct => "Rural-heavy".to_string(),
        Some(p) if p >= config.thresholds.rural_mixed_pct => "Mixed rural/urban".to_string(),
        Some(_) => "Urban-heavy".to_string(),
    }
}

fn plan_mix_label(mapd_share: Option<f64>, split_method: &str, config: &PipelineConfig) -> String {
    let Some(share) = mapd_share else {
        return "Unknown plan mix".to_string();
    };
    let (dominant, balanced) = if split_method == SPLIT_MA_VS_PDP {
        ("MA-dominant", "Balanced MA/PDP")
    } else {
        ("MAPD-dominant", "Balanced MAPD/PDP")
    };
    if share >= config.thresholds.plan_mix_dominant_pct {
        dominant.to_string()
    } else if share <= config.thresholds.plan_mix_leaning_pct {
        "PDP-leaning".to_string()
    } else {
        balanced.to_string()
    }
}

fn volatility_label(volatility: Option<f64>, config: &PipelineConfig) -> String {
    match volatility {
        None => "Unknown volatility".to_string(),
        Some(v) if v >= config.thresholds.volatility_higher => "Higher volatility".to_string(),
        Some(v) if v >= config.thresholds.volatility_moderate => "Moderate volatility".to_string(),
        Some(_) => "Lower volatility".to_string(),
    }
}

/// Indefinite article for a label dropped mid-sentence ("an urban-heavy",
/// "a rural-heavy").
fn article(word: &str) -> &'static str {
    match word.chars().next().map(|c| c.to_ascii_lowercase()) {
        Some('a') | Some('e') | Some('i') | Some('o') | Some('u') => "an",
        _ => "a",
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn key_points(
    readiness_score: Option<f64>,
    rural_pct: Option<f64>,
    mapd_share: Option<f64>,
    split_method: &str,
    config: &PipelineConfig,
) -> Vec<String> {
    let t = &config.thresholds;
    let mut points = Vec::new();

    points.push(match readiness_score {
        Some(s) if s < t.readiness_mixed => {
            "Interoperability gaps will slow early ECDS validation and measure sign-off.".to_string()
        }
        Some(s) if s < t.readiness_higher => {
            "Readiness is uneven; target high-variance workflows first.".to_string()
        }
        Some(_) => "Strong digital readiness allows earlier ECDS pilots and QA cycles.".to_string(),
        None => {
            "ECDS readiness signals are not yet available; prioritize local assessment.".to_string()
        }
    });

    points.push(match rural_pct {
        Some(p) if p >= t.rural_heavy_pct => {
            "Rural capacity constraints will show up as data lag and staffing stretch.".to_string()
        }
        Some(p) if p >= t.rural_mixed_pct => {
            "Mixed rural/urban footprint requires dual-track enablement plans.".to_string()
        }
        Some(_) => {
            "Urban-heavy footprint supports faster data iteration but higher volume risk."
                .to_string()
        }
        None => "Rural/urban mix unknown; validate connectivity and staffing constraints."
            .to_string(),
    });

    let ma_term = if split_method == SPLIT_MA_VS_PDP { "MA" } else { "MAPD" };
    points.push(match mapd_share {
        Some(s) if s >= t.plan_mix_dominant_pct => {
            format!("{ma_term} performance will drive most Stars exposure in this state.")
        }
        Some(s) if s <= t.plan_mix_leaning_pct => {
            "PDP exposure remains meaningful; Part D workflows need equal attention.".to_string()
        }
        Some(_) => format!("Balanced {ma_term}/PDP mix requires parallel operational focus."),
        None => "Plan mix unknown; confirm MAPD vs PDP exposure early.".to_string(),
    });

    points
}

/// Assembles the full artifact for one state from whatever partial records
/// are available. Every section is emitted with its complete key set.
pub fn build_state_artifact(
    code: &str,
    onc: Option<&OncStateRow>,
    ruca: Option<&RucaStateRow>,
    enrollment: Option<&EnrollmentStateRow>,
    plan_mix: Option<&PlanMixStateRow>,
    stars: Option<&StarsStateRow>,
    config: &PipelineConfig,
    run_date: NaiveDate,
) -> StateArtifact {
    let name = state_name(code).to_string();

    let readiness_score = onc.and_then(|r| r.readiness_score);
    let readiness = readiness_label(readiness_score, config);

    let rural_pct = ruca.and_then(|r| r.rural_pct);
    let rural_mix = rural_label(rural_pct, config);

    // Fallback order for the plan-mix section: the CPSC-derived table first,
    // then the coarser enrollment shares.
    let mapd_share = plan_mix
        .and_then(|r| r.mapd_share_pct)
        .or_else(|| enrollment.and_then(|r| r.mapd_share_pct));
    let pdp_share = plan_mix
        .and_then(|r| r.pdp_share_pct)
        .or_else(|| enrollment.and_then(|r| r.pdp_share_pct));
    let ma_only_share = plan_mix.and_then(|r| r.ma_only_share_pct);
    let split_method = plan_mix
        .map(|r| r.split_method.clone())
        .unwrap_or_else(|| {
            if mapd_share.is_some() {
                SPLIT_MA_VS_PDP.to_string()
            } else {
                "unknown".to_string()
            }
        });

    let volatility = stars.and_then(|r| r.volatility_index);

    let rural_lower = rural_mix.to_lowercase();
    let headline = format!(
        "{readiness} for ECDS in {name} with {} {rural_lower} operating context.",
        article(&rural_lower)
    );

    let mut operational_risks = vec![
        "Data quality issues surface earlier and require rapid remediation.".to_string(),
        "Capacity pinch for data engineering and QA during pre-season.".to_string(),
        "Higher coordination load across measure owners, analytics, and ops.".to_string(),
    ];
    if rural_pct.is_some_and(|p| p >= config.thresholds.rural_heavy_pct) {
        operational_risks
            .push("Rural site connectivity and staffing gaps extend the validation window.".to_string());
    }

    // The provenance note is mandatory whenever the fallback split produced
    // the numbers, absent otherwise.
    let method_note = (split_method == SPLIT_MA_VS_PDP).then(|| {
        "MAPD vs MA-only split not available; MAPD share reflects total MA enrollment.".to_string()
    });

    let mapd_implications = if split_method == SPLIT_MA_VS_PDP {
        vec![
            "MA incentives will dominate the performance story when MA share is high.".to_string(),
            "PDP workflows remain critical when PDP share is material.".to_string(),
        ]
    } else {
        vec![
            "MAPD incentives will dominate the performance story when MAPD share is high."
                .to_string(),
            "PDP workflows remain critical when PDP share is material.".to_string(),
        ]
    };

    StateArtifact {
        state: StateInfo {
            code: code.to_string(),
            name: name.clone(),
        },
        updated_at: run_date.to_string(),
        summary: Summary {
            headline,
            subheadline:
                "Pre-season work shifts earlier with heavier data validation and cross-team coordination."
                    .to_string(),
            key_points: key_points(readiness_score, rural_pct, mapd_share, &split_method, config),
        },
        digital_readiness: DigitalReadiness {
            reporting_year: onc.and_then(|r| non_empty(&r.reporting_year)),
            readiness_score,
            readiness_label: readiness,
            ehr_adoption_pct: onc.and_then(|r| r.ehr_adoption_pct),
            hie_exchange_pct: onc.and_then(|r| r.hie_exchange_pct),
            patient_access_pct: onc.and_then(|r| r.patient_access_pct),
            tefca_ready_pct: onc.and_then(|r| r.tefca_ready_pct),
            api_use_pct: onc.and_then(|r| r.api_use_pct),
            insight: "ECDS readiness is driven by interoperability and patient access signals."
                .to_string(),
        },
        rural_urban: RuralUrban {
            rural_pct,
            urban_pct: ruca.and_then(|r| r.urban_pct),
            label: rural_mix,
            constraints: vec![
                "Staffing variability and connectivity gaps extend validation cycles.".to_string(),
                "Smaller clinics create higher variance in data completeness.".to_string(),
            ],
            implications: vec![
                "Phase pilots by network maturity, not just geography.".to_string(),
                "Plan extra enablement time for rural sites.".to_string(),
            ],
        },
        mapd_pdp: MapdPdp {
            mapd_share_pct: mapd_share,
            ma_only_share_pct: ma_only_share,
            pdp_share_pct: pdp_share,
            label: plan_mix_label(mapd_share, &split_method, config),
            split_method,
            method_note,
            implications: mapd_implications,
        },
        roles_impact: RolesImpact {
            summary: "Data engineering, QA, and measure owners carry the earliest burden."
                .to_string(),
            roles: config.roles.for_state(code),
        },
        preseason_shift: PreseasonShift {
            before: vec![
                "Late-fall data pulls with limited back-and-forth.".to_string(),
                "Measure owners validate after upstream extraction is mostly complete.".to_string(),
                "QA cycles run close to submission windows.".to_string(),
            ],
            after: vec![
                "Early-fall data readiness checks and ECDS validation rounds.".to_string(),
                "Measure logic alignment begins earlier with more dependencies.".to_string(),
                "QA cycles expand to cover new data interfaces and edge cases.".to_string(),
            ],
            operational_risks,
        },
        stars_context: StarsContext {
            reporting_year: stars
                .and_then(|r| non_empty(&r.reporting_year))
                .or_else(|| enrollment.and_then(|r| non_empty(&r.reporting_year))),
            ma_enrollment: enrollment.and_then(|r| r.ma_enrollment),
            partd_enrollment: enrollment.and_then(|r| r.partd_enrollment),
            avg_star: stars.and_then(|r| r.avg_star),
            volatility_index: volatility,
            volatility_label: volatility_label(volatility, config),
            churn_pct: stars
                .and_then(|r| r.churn_pct)
                .or_else(|| enrollment.and_then(|r| r.ma_churn_pct)),
            notes: vec![
                "Enrollment size and churn drive operational exposure.".to_string(),
                "Higher volatility signals more unstable contract performance.".to_string(),
            ],
        },
        sources: SourceAttribution {
            onc: "ONC Health IT Dashboard".to_string(),
            cms: "CMS MA/Part D".to_string(),
            ruca: "USDA ERS RUCA".to_string(),
            census: "Optional Census population context".to_string(),
        },
        future: FutureSections::default(),
    }
}

fn write_json<T: serde::Serialize>(path: &Path, payload: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut text = serde_json::to_string_pretty(payload)?;
    text.push('\n');
    std::fs::write(path, text)?;
    Ok(())
}

fn index_by_state<T, F: Fn(&T) -> &str>(rows: Vec<T>, key: F) -> BTreeMap<String, T> {
    rows.into_iter()
        .map(|row| (key(&row).to_string(), row))
        .collect()
}

/// Builds one artifact per state in the union of the normalized tables'
/// states, writes them with `index.json`, and mirrors everything into the
/// web data directory.
pub fn run(
    processed_dir: &Path,
    out_dir: &Path,
    web_dir: &Path,
    config: &PipelineConfig,
    run_date: NaiveDate,
) -> Result<()> {
    let onc = index_by_state(
        read_rows::<OncStateRow>(&processed_dir.join("onc_state.csv"))?,
        |r| &r.state,
    );
    let ruca = index_by_state(
        read_rows::<RucaStateRow>(&processed_dir.join("ruca_state.csv"))?,
        |r| &r.state,
    );
    let enrollment = index_by_state(
        read_rows::<EnrollmentStateRow>(&processed_dir.join("cms_enrollment_state.csv"))?,
        |r| &r.state,
    );
    let plan_mix = index_by_state(
        read_rows::<PlanMixStateRow>(&processed_dir.join("cms_plan_mix_state.csv"))?,
        |r| &r.state,
    );
    let stars = index_by_state(
        read_rows::<StarsStateRow>(&processed_dir.join("cms_stars_state.csv"))?,
        |r| &r.state,
    );

    let mut all_states: Vec<String> = onc
        .keys()
        .chain(ruca.keys())
        .chain(enrollment.keys())
        .chain(plan_mix.keys())
        .chain(stars.keys())
        .cloned()
        .collect();
    all_states.sort();
    all_states.dedup();

    std::fs::create_dir_all(out_dir)?;

    let mut index_entries = Vec::new();
    for code in &all_states {
        let artifact = build_state_artifact(
            code,
            onc.get(code),
            ruca.get(code),
            enrollment.get(code),
            plan_mix.get(code),
            stars.get(code),
            config,
            run_date,
        );
        write_json(&out_dir.join(format!("{code}.json")), &artifact)?;
        index_entries.push(IndexEntry {
            code: code.clone(),
            name: artifact.state.name.clone(),
            headline: artifact.summary.headline.clone(),
        });
    }

    // The selector displays names, so the index sorts by name.
    index_entries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.code.cmp(&b.code)));
    let index = StateIndex {
        states: index_entries,
        updated_at: run_date.to_string(),
    };
    write_json(&out_dir.join("index.json"), &index)?;

    mirror_to_web(out_dir, web_dir, &all_states)?;

    info!(states = all_states.len(), out_dir = %out_dir.display(), "build complete");
    Ok(())
}

/// Copies the finished artifacts to where the static front end reads them.
/// `index.json` lives at the web data root, not inside `states/`.
fn mirror_to_web(out_dir: &Path, web_dir: &Path, states: &[String]) -> Result<()> {
    let web_states = web_dir.join("states");
    std::fs::create_dir_all(&web_states)?;
    for code in states {
        let file = format!("{code}.json");
        std::fs::copy(out_dir.join(&file), web_states.join(&file))?;
    }
    std::fs::copy(out_dir.join("index.json"), web_dir.join("index.json"))?;
    Ok(())
}
