//! CMS Star Ratings normalizer.
//!
//! The yearly release is a ZIP of workbooks and CSVs whose layout shifts
//! between years, so the contract-level overall-rating table is located by
//! an explicit column-signature match rather than by position. Contract
//! ratings are then weighted up to states by MA enrollment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::SourceError;
use crate::geo::normalize_state;
use crate::normalize::enrollment::infer_year;
use crate::normalize::types::{ContractEnrollmentRow, StarsStateRow};
use crate::table::{
    Table, load_csv, load_csv_from_zip, load_excel_from_zip, parse_float, pstdev, round2,
};

/// One known shape of the contract-level rating table. The list is ordered
/// newest-first; extend it when a release changes its headers.
struct RatingTableSignature {
    version: &'static str,
    contract_cols: &'static [&'static str],
    rating_cols: &'static [&'static str],
}

static SIGNATURES: &[RatingTableSignature] = &[
    RatingTableSignature {
        version: "overall-star table (2023+)",
        contract_cols: &["contract", "contract_id", "contract number"],
        rating_cols: &["overall_star_rating", "overall star", "overall rating", "overall"],
    },
    RatingTableSignature {
        version: "summary-rating table (pre-2023)",
        contract_cols: &["contract", "contract_id", "contract number"],
        rating_cols: &["summary rating", "star rating", "rating"],
    },
];

/// Matches a candidate table against the known signatures, returning the
/// resolved columns and which signature matched.
fn match_rating_table(table: &Table) -> Option<(String, String, &'static str)> {
    for signature in SIGNATURES {
        let Some(contract_col) = table.column(signature.contract_cols) else {
            continue;
        };
        if let Some(rating_col) = table.column(signature.rating_cols) {
            return Some((contract_col, rating_col, signature.version));
        }
    }
    None
}

fn find_star_zip(raw_dir: &Path) -> Option<PathBuf> {
    let mut matches: Vec<PathBuf> = std::fs::read_dir(raw_dir)
        .into_iter()
        .flatten()
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("cms_star_ratings_data_tables_") && n.ends_with(".zip"))
                .unwrap_or(false)
        })
        .collect();
    matches.sort();
    matches.pop()
}

/// Members of the release ZIP worth trying, best candidate first.
fn candidate_members(zip_path: &Path) -> Vec<String> {
    let keywords = ["star", "rating", "overall", "summary", "contract"];
    let Ok(file) = std::fs::File::open(zip_path) else {
        return Vec::new();
    };
    let Ok(mut archive) = zip::ZipArchive::new(file) else {
        return Vec::new();
    };

    let mut scored: Vec<(usize, u64, String)> = Vec::new();
    for idx in 0..archive.len() {
        let Ok(entry) = archive.by_index(idx) else {
            continue;
        };
        let name = entry.name().to_string();
        let lower = name.to_ascii_lowercase();
        if !(lower.ends_with(".csv") || lower.ends_with(".xlsx") || lower.ends_with(".xls")) {
            continue;
        }
        let score = keywords.iter().filter(|k| lower.contains(*k)).count();
        scored.push((score, entry.size(), name));
    }
    scored.sort_by(|a, b| b.cmp(a));
    scored.into_iter().map(|(_, _, name)| name).collect()
}

/// Scans the release ZIP for a table matching a known rating signature and
/// returns contract-level ratings plus the rating year.
fn parse_star_ratings(
    zip_path: &Path,
) -> Result<(BTreeMap<String, f64>, Option<i64>), SourceError> {
    let star_year = zip_path
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(infer_year);

    for member in candidate_members(zip_path) {
        let table = if member.to_ascii_lowercase().ends_with(".csv") {
            load_csv_from_zip(zip_path, &member)?
        } else {
            load_excel_from_zip(zip_path, &member, Some(1000))?
        };
        if table.is_empty() {
            continue;
        }

        let Some((contract_col, rating_col, version)) = match_rating_table(&table) else {
            continue;
        };

        let mut ratings = BTreeMap::new();
        for row in &table.rows {
            let contract = Table::cell(row, &contract_col).to_string();
            if contract.is_empty() {
                continue;
            }
            if let Some(rating) = parse_float(Table::cell(row, &rating_col)) {
                ratings.insert(contract, rating);
            }
        }

        if !ratings.is_empty() {
            info!(member, version, contracts = ratings.len(), "rating table located");
            return Ok((ratings, infer_year(&member).or(star_year)));
        }
    }

    Err(SourceError::schema(
        "cms_stars",
        "no member matched a known rating-table signature",
    ))
}

fn normalize_legacy(table: &Table) -> Vec<StarsStateRow> {
    let mut output = Vec::new();
    for row in &table.rows {
        let Some(state) = normalize_state(Table::cell(row, "state")) else {
            continue;
        };
        output.push(StarsStateRow {
            state: state.to_string(),
            reporting_year: Table::cell(row, "reporting_year").to_string(),
            avg_star: parse_float(Table::cell(row, "avg_star")),
            volatility_index: parse_float(Table::cell(row, "volatility_index")),
            churn_pct: parse_float(Table::cell(row, "churn_pct")),
        });
    }
    output
}

pub fn normalize(
    raw_dir: &Path,
    contracts: &[ContractEnrollmentRow],
) -> Result<Vec<StarsStateRow>, SourceError> {
    let legacy = load_csv(&raw_dir.join("cms_stars.csv"), "cms_stars", &[], false)?;
    if !legacy.is_empty() {
        return Ok(normalize_legacy(&legacy));
    }

    let Some(star_zip) = find_star_zip(raw_dir) else {
        debug!("no star ratings release found, stars metrics absent");
        return Ok(Vec::new());
    };
    let (ratings, star_year) = parse_star_ratings(&star_zip)?;

    // Weight = the contract's MA enrollment in that state. PDP rows are a
    // different rating universe and are not mixed in.
    let mut state_entries: BTreeMap<String, Vec<(f64, i64)>> = BTreeMap::new();
    for row in contracts {
        if row.plan_type != "MA" || row.enrollment == 0 {
            continue;
        }
        let Some(&rating) = ratings.get(&row.contract_id) else {
            continue;
        };
        state_entries
            .entry(row.state.clone())
            .or_default()
            .push((rating, row.enrollment));
    }

    let reporting_year = star_year.map(|y| y.to_string()).unwrap_or_default();
    let mut output = Vec::new();
    for (state, entries) in state_entries {
        let total_weight: i64 = entries.iter().map(|(_, w)| w).sum();
        // A state with zero usable weight reports avg_star absent, never
        // zero or NaN.
        let avg_star = if total_weight > 0 {
            let weighted: f64 = entries.iter().map(|(r, w)| r * *w as f64).sum();
            Some(round2(weighted / total_weight as f64))
        } else {
            None
        };
        let ratings_only: Vec<f64> = entries.iter().map(|(r, _)| *r).collect();
        let volatility = pstdev(&ratings_only).map(|v| (v * 1000.0).round() / 1000.0);

        output.push(StarsStateRow {
            state,
            reporting_year: reporting_year.clone(),
            avg_star,
            volatility_index: volatility,
            churn_pct: None,
        });
    }

    Ok(output)
}
