//! Plan-mix normalizer over the CPSC monthly enrollment file.
//!
//! The CPSC release carries plan-type detail, which is the only way to split
//! MAPD from MA-only enrollment. When a state is absent from the CPSC data
//! (or the whole file is missing), the normalizer falls back to the coarser
//! MA-vs-PDP split from the enrollment table and tags the row so the
//! aggregator can emit the mandatory provenance note.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::SourceError;
use crate::geo::normalize_state;
use crate::normalize::enrollment::infer_year;
use crate::normalize::types::{
    EnrollmentStateRow, PlanMixStateRow, SPLIT_MA_VS_PDP, SPLIT_MAPD_MA_ONLY,
};
use crate::table::{Table, load_csv_from_zip, parse_int, round1, select_zip_member};

/// Plan classification derived from CPSC organization-type text and the
/// Part D flag.
#[derive(Debug, Clone, Copy, PartialEq)]
enum PlanClass {
    Mapd,
    MaOnly,
    Pdp,
    MaUnknown,
}

fn classify_plan(org_value: &str, partd_value: Option<&str>) -> Option<PlanClass> {
    let text = org_value.trim().to_ascii_uppercase();
    if !text.is_empty() {
        if text.contains("PDP") || text.contains("PRESCRIPTION DRUG") {
            return Some(PlanClass::Pdp);
        }
        if text.contains("MA-PD") || text.contains("MAPD") || text.contains("MA PD") {
            return Some(PlanClass::Mapd);
        }
        if text.contains("MA-ONLY") || text.contains("MA ONLY") || text.contains("MAONLY") {
            return Some(PlanClass::MaOnly);
        }
        if text.contains("MEDICARE ADVANTAGE") && text.contains("PART D") {
            return Some(PlanClass::Mapd);
        }
        if text.contains("MEDICARE ADVANTAGE") {
            return Some(PlanClass::MaUnknown);
        }
    }

    if let Some(flag) = partd_value {
        match flag.trim().to_ascii_uppercase().as_str() {
            "Y" | "YES" | "1" | "TRUE" => return Some(PlanClass::Mapd),
            "N" | "NO" | "0" | "FALSE" => return Some(PlanClass::MaOnly),
            _ => {}
        }
    }

    if text.contains("MA") {
        return Some(PlanClass::MaUnknown);
    }
    None
}

fn find_cpsc_zip(raw_dir: &Path) -> Option<PathBuf> {
    for prefix in ["cms_enrollment_cpsc_", "monthly-enrollment-cpsc-"] {
        let mut matches: Vec<PathBuf> = std::fs::read_dir(raw_dir)
            .into_iter()
            .flatten()
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(prefix) && n.ends_with(".zip"))
                    .unwrap_or(false)
            })
            .collect();
        matches.sort();
        if let Some(latest) = matches.pop() {
            return Some(latest);
        }
    }
    None
}

#[derive(Default)]
struct PlanCounts {
    mapd: i64,
    ma_only: i64,
    pdp: i64,
    ma_unknown: i64,
}

fn cpsc_rows(
    zip_path: &Path,
) -> Result<(BTreeMap<String, PlanCounts>, Option<i64>), SourceError> {
    let Some(member) = select_zip_member(zip_path, &["cpsc", "enrollment", "monthly"], &[".csv", ".txt"])
    else {
        return Err(SourceError::schema(
            "cms_plan_mix",
            format!("no CSV member in {}", zip_path.display()),
        ));
    };
    let table = load_csv_from_zip(zip_path, &member)?;
    if table.is_empty() {
        return Ok((BTreeMap::new(), None));
    }

    let Some(state_col) = table.column(&["state", "state_code", "state_abbr"]) else {
        return Err(SourceError::schema("cms_plan_mix", "no state column"));
    };
    let Some(enrollment_col) = table.column(&["enrollment", "enrollees", "enrolled", "enroll"])
    else {
        return Err(SourceError::schema("cms_plan_mix", "no enrollment column"));
    };
    let org_col = table.column(&[
        "organization type",
        "organization_type",
        "org type",
        "org_type",
        "plan_type",
        "plan type",
        "contract type",
        "contract_type",
    ]);
    let partd_col = table.column(&["part d", "partd", "part_d", "drug", "rx", "pd"]);
    let year_col = table.column(&["year", "contract_year", "reporting_year", "year_month"]);

    let mut totals: BTreeMap<String, PlanCounts> = BTreeMap::new();
    let mut year = None;
    for row in &table.rows {
        let Some(state) = normalize_state(Table::cell(row, &state_col)) else {
            continue;
        };
        let enrollment = parse_int(Table::cell(row, &enrollment_col)).unwrap_or(0);
        let org = org_col.as_ref().map(|c| Table::cell(row, c)).unwrap_or("");
        let partd = partd_col.as_ref().map(|c| Table::cell(row, c));

        let counts = totals.entry(state.to_string()).or_default();
        match classify_plan(org, partd) {
            Some(PlanClass::Mapd) => counts.mapd += enrollment,
            Some(PlanClass::MaOnly) => counts.ma_only += enrollment,
            Some(PlanClass::Pdp) => counts.pdp += enrollment,
            Some(PlanClass::MaUnknown) => counts.ma_unknown += enrollment,
            None => {}
        }
        if year.is_none() {
            if let Some(ref col) = year_col {
                year = parse_int(Table::cell(row, col));
            }
        }
    }

    if year.is_none() {
        year = zip_path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(infer_year);
    }
    Ok((totals, year))
}

fn primary_row(state: &str, counts: &PlanCounts, year: &str) -> PlanMixStateRow {
    let ma_total = counts.mapd + counts.ma_only + counts.ma_unknown;
    let total = counts.mapd + counts.ma_only + counts.pdp;
    let share = |part: i64| {
        if total > 0 {
            Some(round1(part as f64 / total as f64 * 100.0))
        } else {
            None
        }
    };
    PlanMixStateRow {
        state: state.to_string(),
        reporting_year: year.to_string(),
        mapd_enrollment: Some(counts.mapd),
        ma_only_enrollment: Some(counts.ma_only),
        ma_total_enrollment: Some(ma_total),
        pdp_enrollment: Some(counts.pdp),
        mapd_share_pct: share(counts.mapd),
        ma_only_share_pct: share(counts.ma_only),
        pdp_share_pct: share(counts.pdp),
        split_method: SPLIT_MAPD_MA_ONLY.to_string(),
    }
}

/// The MAPD/MA-only detail was absent, so the MA total stands in for MAPD
/// and the split degrades to MA vs PDP.
fn coarse_row(
    state: &str,
    ma_total: Option<i64>,
    pdp: Option<i64>,
    year: &str,
) -> PlanMixStateRow {
    let total = ma_total.unwrap_or(0) + pdp.unwrap_or(0);
    let share = |part: i64| {
        if total > 0 {
            Some(round1(part as f64 / total as f64 * 100.0))
        } else {
            None
        }
    };
    PlanMixStateRow {
        state: state.to_string(),
        reporting_year: year.to_string(),
        mapd_enrollment: ma_total,
        ma_only_enrollment: None,
        ma_total_enrollment: ma_total,
        pdp_enrollment: pdp,
        mapd_share_pct: share(ma_total.unwrap_or(0)),
        ma_only_share_pct: None,
        pdp_share_pct: share(pdp.unwrap_or(0)),
        split_method: SPLIT_MA_VS_PDP.to_string(),
    }
}

pub fn normalize(
    raw_dir: &Path,
    enrollment: &[EnrollmentStateRow],
) -> Result<Vec<PlanMixStateRow>, SourceError> {
    let mut by_state: BTreeMap<String, PlanMixStateRow> = BTreeMap::new();

    if let Some(zip_path) = find_cpsc_zip(raw_dir) {
        let (totals, year) = cpsc_rows(&zip_path)?;
        let year_text = year.map(|y| y.to_string()).unwrap_or_default();
        for (state, counts) in &totals {
            let row = if counts.mapd > 0 || counts.ma_only > 0 {
                primary_row(state, counts, &year_text)
            } else {
                // CPSC covered the state but without a usable MAPD/MA-only
                // signal; same degradation as a missing state.
                let ma_total = counts.mapd + counts.ma_only + counts.ma_unknown;
                coarse_row(
                    state,
                    (ma_total > 0).then_some(ma_total),
                    (counts.pdp > 0).then_some(counts.pdp),
                    &year_text,
                )
            };
            by_state.insert(state.clone(), row);
        }
    } else {
        debug!("no CPSC file found, plan mix falls back to enrollment shares");
    }

    // States the CPSC data does not cover fall back to the enrollment split.
    for row in enrollment {
        if by_state.contains_key(&row.state) {
            continue;
        }
        if row.mapd_enrollment.is_none() && row.pdp_enrollment.is_none() {
            continue;
        }
        by_state.insert(
            row.state.clone(),
            coarse_row(
                &row.state,
                row.mapd_enrollment,
                row.pdp_enrollment,
                &row.reporting_year,
            ),
        );
    }

    Ok(by_state.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;
    use std::io::Write;
    use std::path::PathBuf;

    fn temp_raw(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("state_briefing_plan_mix_{name}"));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_zip(path: &Path, member: &str, content: &str) {
        let file = fs::File::create(path).unwrap();
        let mut archive = zip::ZipWriter::new(file);
        archive
            .start_file(member, zip::write::SimpleFileOptions::default())
            .unwrap();
        archive.write_all(content.as_bytes()).unwrap();
        archive.finish().unwrap();
    }

    fn enrollment_row(state: &str, mapd: i64, pdp: i64) -> EnrollmentStateRow {
        EnrollmentStateRow {
            state: state.to_string(),
            reporting_year: "2025".to_string(),
            ma_enrollment: Some(mapd),
            partd_enrollment: Some(mapd + pdp),
            mapd_enrollment: Some(mapd),
            pdp_enrollment: Some(pdp),
            mapd_share_pct: None,
            pdp_share_pct: None,
            ma_churn_pct: None,
        }
    }

    #[test]
    fn test_classify_plan() {
        assert_eq!(classify_plan("Prescription Drug Plan", None), Some(PlanClass::Pdp));
        assert_eq!(classify_plan("MA-PD", None), Some(PlanClass::Mapd));
        assert_eq!(classify_plan("MA Only", None), Some(PlanClass::MaOnly));
        assert_eq!(
            classify_plan("Medicare Advantage with Part D", None),
            Some(PlanClass::Mapd)
        );
        assert_eq!(
            classify_plan("Medicare Advantage", None),
            Some(PlanClass::MaUnknown)
        );
        assert_eq!(classify_plan("", Some("Y")), Some(PlanClass::Mapd));
        assert_eq!(classify_plan("", Some("No")), Some(PlanClass::MaOnly));
        assert_eq!(classify_plan("", None), None);
    }

    #[test]
    fn test_cpsc_three_way_split() {
        let raw = temp_raw("primary");
        write_zip(
            &raw.join("cms_enrollment_cpsc_2025_12.zip"),
            "cpsc_enrollment_monthly.csv",
            "state,organization type,enrollment,year\n\
             CA,MA-PD,600,2025\nCA,MA Only,200,2025\nCA,Prescription Drug Plan,200,2025\n",
        );

        let rows = normalize(&raw, &[]).unwrap();
        let ca = &rows[0];
        assert_eq!(ca.split_method, SPLIT_MAPD_MA_ONLY);
        assert_eq!(ca.mapd_share_pct, Some(60.0));
        assert_eq!(ca.ma_only_share_pct, Some(20.0));
        assert_eq!(ca.pdp_share_pct, Some(20.0));
        fs::remove_dir_all(&raw).unwrap();
    }

    #[test]
    fn test_state_missing_from_cpsc_falls_back_per_state() {
        let raw = temp_raw("per_state");
        write_zip(
            &raw.join("cms_enrollment_cpsc_2025_12.zip"),
            "cpsc_enrollment_monthly.csv",
            "state,organization type,enrollment\nCA,MA-PD,600\nCA,PDP,400\n",
        );
        let enrollment = vec![enrollment_row("FL", 700, 300)];

        let rows = normalize(&raw, &enrollment).unwrap();
        let ca = rows.iter().find(|r| r.state == "CA").unwrap();
        let fl = rows.iter().find(|r| r.state == "FL").unwrap();
        assert_eq!(ca.split_method, SPLIT_MAPD_MA_ONLY);
        assert_eq!(fl.split_method, SPLIT_MA_VS_PDP);
        assert_eq!(fl.mapd_share_pct, Some(70.0));
        assert_eq!(fl.pdp_share_pct, Some(30.0));
        assert_eq!(fl.ma_only_share_pct, None);
        fs::remove_dir_all(&raw).unwrap();
    }

    #[test]
    fn test_missing_cpsc_file_falls_back_entirely() {
        let raw = temp_raw("no_file");
        let enrollment = vec![enrollment_row("IA", 400, 600)];

        let rows = normalize(&raw, &enrollment).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].split_method, SPLIT_MA_VS_PDP);
        assert_eq!(rows[0].mapd_share_pct, Some(40.0));
        fs::remove_dir_all(&raw).unwrap();
    }

    #[test]
    fn test_unknown_only_ma_degrades_to_coarse_split() {
        let raw = temp_raw("unknown");
        write_zip(
            &raw.join("cms_enrollment_cpsc_2025_12.zip"),
            "cpsc_enrollment_monthly.csv",
            "state,organization type,enrollment\n\
             TX,Medicare Advantage,800\nTX,Prescription Drug Plan,200\n",
        );

        let rows = normalize(&raw, &[]).unwrap();
        let tx = &rows[0];
        assert_eq!(tx.split_method, SPLIT_MA_VS_PDP);
        assert_eq!(tx.mapd_share_pct, Some(80.0));
        assert_eq!(tx.ma_only_share_pct, None);
        fs::remove_dir_all(&raw).unwrap();
    }
}
