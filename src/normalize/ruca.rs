//! Rural/urban normalizer over USDA RUCA classifications.
//!
//! Two shapes exist in the wild: a county-level table with explicit rural
//! flags, and the published ZIP-level RUCA file. County-level data takes
//! precedence when both are present. The ZIP file may lack a state column,
//! in which case a ZIP-to-state crosswalk is applied; a ZIP the crosswalk
//! does not cover is excluded from both the rural numerator and the total
//! denominator, so missing crosswalk rows never skew the split.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::SourceError;
use crate::geo::normalize_state;
use crate::normalize::types::RucaStateRow;
use crate::table::{Table, load_csv, parse_float, parse_int, round1};

#[derive(Default)]
struct PopulationTotals {
    total: f64,
    rural: f64,
}

fn totals_to_rows(totals: BTreeMap<String, PopulationTotals>) -> Vec<RucaStateRow> {
    totals
        .into_iter()
        .map(|(state, agg)| {
            let rural_pct = if agg.total > 0.0 {
                Some(round1(agg.rural / agg.total * 100.0))
            } else {
                None
            };
            RucaStateRow {
                state,
                rural_population: agg.rural.round() as i64,
                total_population: agg.total.round() as i64,
                rural_pct,
                urban_pct: rural_pct.map(|p| round1(100.0 - p)),
            }
        })
        .collect()
}

fn normalize_county(table: &Table) -> Vec<RucaStateRow> {
    let Some(state_col) = table.column(&["state", "state_abbr", "state_code", "state_name"]) else {
        return Vec::new();
    };
    let pop_col = table.column(&["population", "pop"]);
    let flag_col = table.column(&["rural_flag", "rural"]);

    let mut totals: BTreeMap<String, PopulationTotals> = BTreeMap::new();
    for row in &table.rows {
        let Some(state) = normalize_state(Table::cell(row, &state_col)) else {
            continue;
        };
        let population = pop_col
            .as_ref()
            .and_then(|c| parse_int(Table::cell(row, c)))
            .unwrap_or(0) as f64;
        let rural = flag_col
            .as_ref()
            .and_then(|c| parse_int(Table::cell(row, c)))
            .unwrap_or(0)
            == 1;
        let entry = totals.entry(state.to_string()).or_default();
        entry.total += population;
        if rural {
            entry.rural += population;
        }
    }
    totals_to_rows(totals)
}

/// Loads `zip_state_crosswalk.csv` into a ZIP -> state map.
fn load_crosswalk(raw_dir: &Path) -> Result<BTreeMap<String, String>, SourceError> {
    let table = load_csv(&raw_dir.join("zip_state_crosswalk.csv"), "ruca", &[], false)?;
    let mut crosswalk = BTreeMap::new();
    if table.is_empty() {
        return Ok(crosswalk);
    }
    let Some(zip_col) = table.column(&["zip", "zip_code", "zcta"]) else {
        return Ok(crosswalk);
    };
    let Some(state_col) = table.column(&["state", "state_abbr", "state_code"]) else {
        return Ok(crosswalk);
    };
    for row in &table.rows {
        let zip = Table::cell(row, &zip_col).to_string();
        if zip.is_empty() {
            continue;
        }
        if let Some(state) = normalize_state(Table::cell(row, &state_col)) {
            crosswalk.insert(zip, state.to_string());
        }
    }
    Ok(crosswalk)
}

fn normalize_zip(
    table: &Table,
    raw_dir: &Path,
    config: &PipelineConfig,
) -> Result<Vec<RucaStateRow>, SourceError> {
    let Some(ruca_col) = table.column(&["ruca1", "ruca", "primary", "ruca_code"]) else {
        return Err(SourceError::schema("ruca", "no RUCA code column"));
    };
    let pop_col = table.column(&["pop", "population"]);
    let state_col = table.column(&["state", "state_abbr", "state_code", "state_name"]);
    let zip_col = table.column(&["zip", "zip_code", "zcta"]);

    // Without a direct state column the crosswalk is the only join path.
    let crosswalk = if state_col.is_none() {
        let crosswalk = load_crosswalk(raw_dir)?;
        if crosswalk.is_empty() {
            return Err(SourceError::schema(
                "ruca",
                "ZIP-level file has no state column and no crosswalk is available",
            ));
        }
        crosswalk
    } else {
        BTreeMap::new()
    };

    let mut totals: BTreeMap<String, PopulationTotals> = BTreeMap::new();
    let mut dropped = 0usize;
    for row in &table.rows {
        let state = match &state_col {
            Some(col) => normalize_state(Table::cell(row, col)).map(str::to_string),
            None => {
                let zip = zip_col
                    .as_ref()
                    .map(|c| Table::cell(row, c).to_string())
                    .unwrap_or_default();
                crosswalk.get(&zip).cloned()
            }
        };
        let Some(state) = state else {
            dropped += 1;
            continue;
        };
        let Some(ruca_value) = parse_float(Table::cell(row, &ruca_col)) else {
            continue;
        };
        let weight = pop_col
            .as_ref()
            .and_then(|c| parse_float(Table::cell(row, c)))
            .unwrap_or(1.0);
        let entry = totals.entry(state).or_default();
        entry.total += weight;
        if ruca_value >= config.ruca_rural_cutoff {
            entry.rural += weight;
        }
    }

    if dropped > 0 {
        debug!(dropped, "ZIP rows excluded for missing join key");
    }
    Ok(totals_to_rows(totals))
}

pub fn normalize(raw_dir: &Path, config: &PipelineConfig) -> Result<Vec<RucaStateRow>, SourceError> {
    let county = load_csv(&raw_dir.join("ruca_by_county.csv"), "ruca", &[], false)?;
    if !county.is_empty() {
        return Ok(normalize_county(&county));
    }

    let zip = load_csv(&raw_dir.join("ruca_zip_2020.csv"), "ruca", &[], false)?;
    if zip.is_empty() {
        debug!("no RUCA data found, rural/urban metrics absent");
        return Ok(Vec::new());
    }
    normalize_zip(&zip, raw_dir, config)
}
