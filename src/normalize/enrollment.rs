//! CMS MA / Part D enrollment normalizer.
//!
//! Aggregates the contract/county-level SCC release ZIPs up to state totals
//! and emits the contract-by-state weight table the Stars normalizer joins
//! against. Churn is computed only when the two most recent releases both
//! cover a state; a single-period run reports churn absent.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::SourceError;
use crate::geo::normalize_state;
use crate::normalize::types::{ContractEnrollmentRow, EnrollmentStateRow};
use crate::table::{Table, load_csv, load_csv_from_zip, parse_int, round1, select_zip_member};

pub struct EnrollmentOutput {
    pub states: Vec<EnrollmentStateRow>,
    pub contracts: Vec<ContractEnrollmentRow>,
}

/// Pulls a contract year out of a filename like
/// `cms_ma_enrollment_scc_2025_12.zip`.
pub fn infer_year(text: &str) -> Option<i64> {
    let bytes = text.as_bytes();
    for window in bytes.windows(4) {
        if window[0] == b'2' && window[1] == b'0' && window[2..].iter().all(u8::is_ascii_digit) {
            if let Ok(year) = std::str::from_utf8(window).unwrap_or("").parse::<i64>() {
                return Some(year);
            }
        }
    }
    None
}

/// All raw files starting with `prefix`, name-sorted ascending, so the last
/// entry is the most recent release.
fn matching_zips(raw_dir: &Path, prefix: &str) -> Vec<PathBuf> {
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
    matches
}

#[derive(Default)]
struct ZipAggregation {
    totals: BTreeMap<String, i64>,
    contract_totals: BTreeMap<(String, String), i64>,
    year: Option<i64>,
}

fn aggregate_zip(zip_path: &Path, label: &str) -> Result<ZipAggregation, SourceError> {
    if !zip_path.exists() {
        return Ok(ZipAggregation::default());
    }

    let keywords = ["full", "enrollment", label];
    let Some(member) = select_zip_member(zip_path, &keywords, &[".csv", ".txt"]) else {
        return Err(SourceError::schema(
            "cms_enrollment",
            format!("no CSV member in {}", zip_path.display()),
        ));
    };
    let table = load_csv_from_zip(zip_path, &member)?;
    if table.is_empty() {
        return Ok(ZipAggregation::default());
    }

    let Some(state_col) = table.column(&["state", "state_code", "state_abbr"]) else {
        return Err(SourceError::schema("cms_enrollment", "no state column"));
    };
    let Some(enrollment_col) = table.column(&["enrollment", "enrollees", "enrolled", "enroll"])
    else {
        return Err(SourceError::schema("cms_enrollment", "no enrollment column"));
    };
    let contract_col = table.column(&["contract", "contract_number", "contract_id", "contract number"]);
    let year_col = table.column(&["year", "contract_year", "reporting_year", "year_month"]);

    let mut agg = ZipAggregation::default();
    for row in &table.rows {
        let Some(state) = normalize_state(Table::cell(row, &state_col)) else {
            continue;
        };
        let enrollment = parse_int(Table::cell(row, &enrollment_col)).unwrap_or(0);
        *agg.totals.entry(state.to_string()).or_insert(0) += enrollment;

        if let Some(ref col) = contract_col {
            let contract = Table::cell(row, col).to_string();
            if !contract.is_empty() {
                *agg.contract_totals
                    .entry((state.to_string(), contract))
                    .or_insert(0) += enrollment;
            }
        }
        if agg.year.is_none() {
            if let Some(ref col) = year_col {
                agg.year = parse_int(Table::cell(row, col));
            }
        }
    }

    if agg.year.is_none() {
        agg.year = zip_path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(infer_year);
    }
    Ok(agg)
}

fn normalize_legacy(table: &Table) -> Vec<EnrollmentStateRow> {
    let mut output = Vec::new();
    for row in &table.rows {
        let Some(state) = normalize_state(Table::cell(row, "state")) else {
            continue;
        };
        let ma = parse_int(Table::cell(row, "ma_enrollment"));
        let partd = parse_int(Table::cell(row, "partd_enrollment"));
        let mapd = parse_int(Table::cell(row, "mapd_enrollment"));
        let pdp = parse_int(Table::cell(row, "pdp_enrollment"));
        let (mapd_share, pdp_share) = shares(mapd, pdp);
        output.push(EnrollmentStateRow {
            state: state.to_string(),
            reporting_year: Table::cell(row, "reporting_year").to_string(),
            ma_enrollment: ma,
            partd_enrollment: partd,
            mapd_enrollment: mapd,
            pdp_enrollment: pdp,
            mapd_share_pct: mapd_share,
            pdp_share_pct: pdp_share,
            ma_churn_pct: None,
        });
    }
    output
}

fn shares(mapd: Option<i64>, pdp: Option<i64>) -> (Option<f64>, Option<f64>) {
    match (mapd, pdp) {
        (Some(m), Some(p)) if m + p > 0 => {
            let total = (m + p) as f64;
            (
                Some(round1(m as f64 / total * 100.0)),
                Some(round1(p as f64 / total * 100.0)),
            )
        }
        _ => (None, None),
    }
}

pub fn normalize(raw_dir: &Path) -> Result<EnrollmentOutput, SourceError> {
    let legacy = load_csv(&raw_dir.join("cms_enrollment.csv"), "cms_enrollment", &[], false)?;
    if !legacy.is_empty() {
        return Ok(EnrollmentOutput {
            states: normalize_legacy(&legacy),
            contracts: Vec::new(),
        });
    }

    let ma_zips = matching_zips(raw_dir, "cms_ma_enrollment_scc_");
    let pdp_zips = matching_zips(raw_dir, "cms_pdp_enrollment_scc_");

    let ma = match ma_zips.last() {
        Some(path) => aggregate_zip(path, "ma")?,
        None => ZipAggregation::default(),
    };
    let pdp = match pdp_zips.last() {
        Some(path) => aggregate_zip(path, "pdp")?,
        None => ZipAggregation::default(),
    };

    if ma.totals.is_empty() && pdp.totals.is_empty() {
        debug!("no CMS enrollment data found, enrollment metrics absent");
        return Ok(EnrollmentOutput {
            states: Vec::new(),
            contracts: Vec::new(),
        });
    }

    // Prior-period MA totals, if a second release is on disk, drive churn.
    let prior_ma = match ma_zips.len() {
        n if n >= 2 => aggregate_zip(&ma_zips[n - 2], "ma")?,
        _ => ZipAggregation::default(),
    };

    let mut all_states: Vec<&String> = ma.totals.keys().chain(pdp.totals.keys()).collect();
    all_states.sort();
    all_states.dedup();

    let reporting_year = ma
        .year
        .or(pdp.year)
        .map(|y| y.to_string())
        .unwrap_or_default();

    let mut states = Vec::new();
    for state in all_states {
        let ma_enrollment = ma.totals.get(state).copied();
        let pdp_enrollment = pdp.totals.get(state).copied();
        // The MA SCC release reports MAPD contracts, so the MA total doubles
        // as the MAPD total at this granularity.
        let mapd_enrollment = ma_enrollment;
        let partd_enrollment = match (ma_enrollment, pdp_enrollment) {
            (None, None) => None,
            (m, p) => Some(m.unwrap_or(0) + p.unwrap_or(0)),
        };
        let (mapd_share, pdp_share) = shares(mapd_enrollment, pdp_enrollment);

        let churn = match (ma_enrollment, prior_ma.totals.get(state)) {
            (Some(current), Some(&prior)) if prior > 0 => {
                Some(round1((current - prior) as f64 / prior as f64 * 100.0))
            }
            _ => None,
        };

        states.push(EnrollmentStateRow {
            state: state.clone(),
            reporting_year: reporting_year.clone(),
            ma_enrollment,
            partd_enrollment,
            mapd_enrollment,
            pdp_enrollment,
            mapd_share_pct: mapd_share,
            pdp_share_pct: pdp_share,
            ma_churn_pct: churn,
        });
    }

    let mut contracts = Vec::new();
    for ((state, contract_id), enrollment) in &ma.contract_totals {
        contracts.push(ContractEnrollmentRow {
            state: state.clone(),
            contract_id: contract_id.clone(),
            plan_type: "MA".to_string(),
            enrollment: *enrollment,
            reporting_year: reporting_year.clone(),
        });
    }
    for ((state, contract_id), enrollment) in &pdp.contract_totals {
        contracts.push(ContractEnrollmentRow {
            state: state.clone(),
            contract_id: contract_id.clone(),
            plan_type: "PDP".to_string(),
            enrollment: *enrollment,
            reporting_year: reporting_year.clone(),
        });
    }

    Ok(EnrollmentOutput { states, contracts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;
    use std::io::Write;
    use std::path::PathBuf;

    fn temp_raw(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("state_briefing_enrollment_{name}"));
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

    #[test]
    fn test_infer_year() {
        assert_eq!(infer_year("cms_ma_enrollment_scc_2025_12.zip"), Some(2025));
        assert_eq!(infer_year("no_year_here.zip"), None);
    }

    #[test]
    fn test_legacy_csv_path() {
        let raw = temp_raw("legacy");
        fs::write(
            raw.join("cms_enrollment.csv"),
            "state,reporting_year,ma_enrollment,partd_enrollment,mapd_enrollment,pdp_enrollment\n\
             CA,2025,3200000,4400000,3000000,1400000\n",
        )
        .unwrap();

        let output = normalize(&raw).unwrap();
        assert_eq!(output.states.len(), 1);
        let ca = &output.states[0];
        assert_eq!(ca.mapd_share_pct, Some(68.2));
        assert_eq!(ca.pdp_share_pct, Some(31.8));
        assert_eq!(ca.ma_churn_pct, None);
        fs::remove_dir_all(&raw).unwrap();
    }

    #[test]
    fn test_zip_aggregation_and_contract_table() {
        let raw = temp_raw("zips");
        write_zip(
            &raw.join("cms_ma_enrollment_scc_2025_12.zip"),
            "ma_full_enrollment.csv",
            "state,county,contract_number,enrollment,year\n\
             IA,Polk,H1234,1000,2025\nIA,Linn,H1234,500,2025\nIA,Polk,H9876,300,2025\n",
        );
        write_zip(
            &raw.join("cms_pdp_enrollment_scc_2025_12.zip"),
            "pdp_full_enrollment.csv",
            "state,county,contract_number,enrollment,year\nIA,Polk,S5555,700,2025\n",
        );

        let output = normalize(&raw).unwrap();
        let ia = &output.states[0];
        assert_eq!(ia.ma_enrollment, Some(1800));
        assert_eq!(ia.pdp_enrollment, Some(700));
        assert_eq!(ia.partd_enrollment, Some(2500));
        assert_eq!(ia.reporting_year, "2025");

        let h1234 = output
            .contracts
            .iter()
            .find(|c| c.contract_id == "H1234")
            .unwrap();
        assert_eq!(h1234.enrollment, 1500);
        assert_eq!(h1234.state, "IA");
        fs::remove_dir_all(&raw).unwrap();
    }

    #[test]
    fn test_churn_needs_both_periods() {
        let raw = temp_raw("churn");
        write_zip(
            &raw.join("cms_ma_enrollment_scc_2025_11.zip"),
            "ma_full_enrollment.csv",
            "state,contract_number,enrollment\nIA,H1234,1000\n",
        );
        write_zip(
            &raw.join("cms_ma_enrollment_scc_2025_12.zip"),
            "ma_full_enrollment.csv",
            "state,contract_number,enrollment\nIA,H1234,1100\nFL,H2222,9000\n",
        );

        let output = normalize(&raw).unwrap();
        let ia = output.states.iter().find(|r| r.state == "IA").unwrap();
        let fl = output.states.iter().find(|r| r.state == "FL").unwrap();
        assert_eq!(ia.ma_churn_pct, Some(10.0));
        // FL only appears in the current period, so churn is absent.
        assert_eq!(fl.ma_churn_pct, None);
        fs::remove_dir_all(&raw).unwrap();
    }

    #[test]
    fn test_missing_zips_yield_empty_output() {
        let raw = temp_raw("missing");
        let output = normalize(&raw).unwrap();
        assert!(output.states.is_empty());
        assert!(output.contracts.is_empty());
        fs::remove_dir_all(&raw).unwrap();
    }
}
