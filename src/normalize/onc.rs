//! ONC digital-readiness normalizer.
//!
//! Readiness metrics arrive three ways: a legacy state-level CSV with direct
//! metric columns, per-state API pull CSVs (only for the states a pull is
//! configured for), and a static fallback table. States covered by none of
//! them report every metric absent.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::SourceError;
use crate::normalize::types::OncStateRow;
use crate::table::{Table, load_csv, mean, parse_float, round1};
use crate::geo::normalize_state;

/// A state-keyed metric with the reporting period it was observed in.
type MetricLookup = BTreeMap<String, (f64, String)>;

const STATE_CANDIDATES: &[&str] = &["state", "region", "region_name", "state_name", "state abbreviation"];
const YEAR_CANDIDATES: &[&str] = &["reporting_year", "year", "period"];

/// Falls back to whichever non-key column parses as numeric most often, for
/// API pulls whose value column is named unpredictably.
fn pick_numeric_column(table: &Table, exclude: &[&str]) -> Option<String> {
    let exclude_lower: Vec<String> = exclude.iter().map(|s| s.to_ascii_lowercase()).collect();
    let mut best: Option<(usize, String)> = None;
    for header in &table.headers {
        if exclude_lower.contains(&header.to_ascii_lowercase()) {
            continue;
        }
        let count = table
            .rows
            .iter()
            .take(200)
            .filter(|row| parse_float(Table::cell(row, header)).is_some())
            .count();
        if count > best.as_ref().map(|(c, _)| *c).unwrap_or(0) {
            best = Some((count, header.clone()));
        }
    }
    best.map(|(_, header)| header)
}

/// Pulls a single `state -> value` metric out of a table, tolerating column
/// naming drift.
fn extract_state_metric(
    table: &Table,
    value_candidates: &[&str],
) -> MetricLookup {
    let mut output = MetricLookup::new();
    if table.is_empty() {
        return output;
    }
    let Some(state_col) = table.column(STATE_CANDIDATES) else {
        return output;
    };
    let year_col = table.column(YEAR_CANDIDATES);
    let value_col = match table.column(value_candidates) {
        Some(col) => col,
        None => {
            let mut exclude = vec![state_col.as_str()];
            if let Some(ref y) = year_col {
                exclude.push(y.as_str());
            }
            match pick_numeric_column(table, &exclude) {
                Some(col) => col,
                None => return output,
            }
        }
    };

    for row in &table.rows {
        let Some(state) = normalize_state(Table::cell(row, &state_col)) else {
            continue;
        };
        let Some(value) = parse_float(Table::cell(row, &value_col)) else {
            continue;
        };
        let year = year_col
            .as_ref()
            .map(|c| Table::cell(row, c).to_string())
            .unwrap_or_default();
        output.insert(state.to_string(), (value, year));
    }
    output
}

/// E-prescribing extraction: a direct percentage column when present, else
/// derived from the e-Rx numerator and total-Rx denominator.
fn extract_erx_metric(table: &Table) -> MetricLookup {
    let mut output = MetricLookup::new();
    if table.is_empty() {
        return output;
    }
    let Some(state_col) = table.column(STATE_CANDIDATES) else {
        return output;
    };
    let year_col = table.column(YEAR_CANDIDATES);
    let pct_col = table.column(&["pct_e_rx", "percent_e_rx", "percentage", "pct", "percent"]);
    let erx_col = table.column(&["tot_e_rx", "tot_erx", "e_rx", "erx"]);
    let total_col = table.column(&["tot_rx", "total_rx", "total", "rx_total"]);

    for row in &table.rows {
        let Some(state) = normalize_state(Table::cell(row, &state_col)) else {
            continue;
        };
        let mut pct = pct_col
            .as_ref()
            .and_then(|c| parse_float(Table::cell(row, c)));
        if pct.is_none() {
            if let (Some(erx), Some(total)) = (&erx_col, &total_col) {
                let numerator = parse_float(Table::cell(row, erx));
                let denominator = parse_float(Table::cell(row, total));
                if let (Some(n), Some(d)) = (numerator, denominator) {
                    if d > 0.0 {
                        pct = Some(round1(n / d * 100.0));
                    }
                }
            }
        }
        let Some(value) = pct else { continue };
        let year = year_col
            .as_ref()
            .map(|c| Table::cell(row, c).to_string())
            .unwrap_or_default();
        output.insert(state.to_string(), (value, year));
    }
    output
}

/// Keeps only the states a direct API pull is configured for.
fn restrict_to_api_states(lookup: MetricLookup, config: &PipelineConfig) -> MetricLookup {
    lookup
        .into_iter()
        .filter(|(state, _)| config.has_api_pull(state))
        .collect()
}

/// Fills states the primary lookup misses from a static fallback table.
fn fill_from_fallback(primary: &mut MetricLookup, fallback: MetricLookup) {
    for (state, entry) in fallback {
        primary.entry(state).or_insert(entry);
    }
}

pub fn normalize(raw_dir: &Path, config: &PipelineConfig) -> Result<Vec<OncStateRow>, SourceError> {
    let legacy_ehr = load_csv(&raw_dir.join("onc_ehr_adoption.csv"), "onc", &[], false)?;
    let legacy_interop = load_csv(&raw_dir.join("onc_interoperability.csv"), "onc", &[], false)?;

    let mut hie_lookup = MetricLookup::new();
    let mut patient_access_lookup = MetricLookup::new();

    let ehr_lookup = if !legacy_ehr.is_empty() {
        hie_lookup = extract_state_metric(&legacy_ehr, &["hie_exchange_pct"]);
        patient_access_lookup = extract_state_metric(&legacy_ehr, &["patient_access_pct"]);
        extract_state_metric(&legacy_ehr, &["ehr_adoption_pct"])
    } else {
        let api_ehr = load_csv(&raw_dir.join("onc_basic_ehr_by_state_api.csv"), "onc", &[], false)?;
        let mut lookup = restrict_to_api_states(
            extract_state_metric(&api_ehr, &["basic_ehr", "basic", "ehr", "adoption", "percent", "pct"]),
            config,
        );
        let static_ehr = load_csv(&raw_dir.join("onc_basic_ehr_by_state.csv"), "onc", &[], false)?;
        fill_from_fallback(
            &mut lookup,
            extract_state_metric(&static_ehr, &["basic_ehr", "basic", "ehr", "adoption", "percent", "pct"]),
        );
        lookup
    };

    let interop_lookup = if !legacy_interop.is_empty() {
        extract_state_metric(
            &legacy_interop,
            &["api_use_pct", "tefca_ready_pct", "hie_exchange_pct"],
        )
    } else {
        let api_erx = load_csv(&raw_dir.join("onc_surescripts_erx_state_api.csv"), "onc", &[], false)?;
        let mut lookup = restrict_to_api_states(extract_erx_metric(&api_erx), config);
        let static_erx = load_csv(&raw_dir.join("onc_surescripts_erx_state.csv"), "onc", &[], false)?;
        fill_from_fallback(&mut lookup, extract_erx_metric(&static_erx));
        lookup
    };

    let mut all_states: Vec<String> = ehr_lookup
        .keys()
        .chain(interop_lookup.keys())
        .chain(hie_lookup.keys())
        .chain(patient_access_lookup.keys())
        .cloned()
        .collect();
    all_states.sort();
    all_states.dedup();

    let mut output = Vec::new();
    for state in all_states {
        let ehr = ehr_lookup.get(&state);
        let interop = interop_lookup.get(&state);
        let hie = hie_lookup.get(&state).map(|(v, _)| *v);
        let patient_access = patient_access_lookup.get(&state).map(|(v, _)| *v);

        let components = [
            ehr.map(|(v, _)| *v),
            hie,
            interop.map(|(v, _)| *v),
            patient_access,
        ];
        let readiness = mean(&components).map(round1);

        output.push(OncStateRow {
            state,
            reporting_year: ehr
                .map(|(_, y)| y.clone())
                .filter(|y| !y.is_empty())
                .or_else(|| interop.map(|(_, y)| y.clone()))
                .unwrap_or_default(),
            ehr_adoption_pct: ehr.map(|(v, _)| *v),
            hie_exchange_pct: hie,
            patient_access_pct: patient_access,
            tefca_ready_pct: None,
            api_use_pct: interop.map(|(v, _)| *v),
            readiness_score: readiness,
        });
    }

    debug!(states = output.len(), "ONC normalization complete");
    Ok(output)
}
