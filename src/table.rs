//! Source table loading.
//!
//! Every raw dataset, whatever its key granularity, is loaded into the same
//! in-memory shape: a header list plus string-keyed rows. Column lookup is
//! normalization-based so that year-to-year header drift ("Contract Number"
//! vs "contract_id") does not break a source.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;

use anyhow::Result;
use calamine::{Reader, Xlsx};
use tracing::{debug, warn};

use crate::error::SourceError;

/// A loaded delimited table. Read-only after loading.
#[derive(Debug, Default)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<HashMap<String, String>>,
}

impl Table {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Resolves a column by candidate names; see [`pick_column`].
    pub fn column(&self, candidates: &[&str]) -> Option<String> {
        pick_column(&self.headers, candidates)
    }

    /// Cell accessor; returns the trimmed value or an empty string.
    pub fn cell<'a>(row: &'a HashMap<String, String>, column: &str) -> &'a str {
        row.get(column).map(String::as_str).unwrap_or("").trim()
    }
}

/// Lowercases and strips non-alphanumerics so "Contract Number" and
/// "contract_number" compare equal.
fn normalize_header(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Finds the first header matching a candidate, preferring exact normalized
/// matches over substring matches.
pub fn pick_column(headers: &[String], candidates: &[&str]) -> Option<String> {
    let normalized: Vec<(String, &String)> = headers
        .iter()
        .map(|h| (normalize_header(h), h))
        .collect();

    for candidate in candidates {
        let key = normalize_header(candidate);
        if let Some((_, header)) = normalized.iter().find(|(n, _)| *n == key) {
            return Some((*header).clone());
        }
    }
    for (norm, header) in &normalized {
        for candidate in candidates {
            if norm.contains(&normalize_header(candidate)) {
                return Some((*header).clone());
            }
        }
    }
    None
}

fn parse_csv_text(text: &str) -> Table {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = match reader.headers() {
        Ok(h) => h.iter().map(|s| s.trim().to_string()).collect(),
        Err(_) => return Table::default(),
    };

    let mut rows = Vec::new();
    for record in reader.records().flatten() {
        let mut row = HashMap::new();
        for (idx, header) in headers.iter().enumerate() {
            let value = record.get(idx).unwrap_or("").to_string();
            row.insert(header.clone(), value);
        }
        rows.push(row);
    }

    Table { headers, rows }
}

/// Loads a CSV into a [`Table`].
///
/// A missing file yields an empty table unless `mandatory` is set; required
/// column groups that cannot be resolved yield a [`SourceError::SchemaMismatch`]
/// scoped to this source only. Bytes are decoded lossily to tolerate
/// encoding variance in the published files.
pub fn load_csv(
    path: &Path,
    source: &str,
    required: &[&[&str]],
    mandatory: bool,
) -> Result<Table, SourceError> {
    if !path.exists() {
        if mandatory {
            return Err(SourceError::SourceUnavailable(path.display().to_string()));
        }
        debug!(source, path = %path.display(), "raw file missing, loading empty table");
        return Ok(Table::default());
    }

    let bytes = std::fs::read(path)
        .map_err(|e| SourceError::SourceUnavailable(format!("{}: {e}", path.display())))?;
    let text = String::from_utf8_lossy(&bytes);
    let table = parse_csv_text(&text);

    check_required(&table, source, required)?;
    debug!(source, rows = table.rows.len(), "loaded table");
    Ok(table)
}

fn check_required(table: &Table, source: &str, required: &[&[&str]]) -> Result<(), SourceError> {
    if table.is_empty() {
        return Ok(());
    }
    for group in required {
        if pick_column(&table.headers, group).is_none() {
            return Err(SourceError::schema(
                source,
                format!("no column matching any of {group:?}"),
            ));
        }
    }
    Ok(())
}

/// Picks the best member of a ZIP archive by keyword hits in the member name,
/// breaking ties by file size. Returns `None` when the archive is missing or
/// has no member with an allowed extension.
pub fn select_zip_member(
    zip_path: &Path,
    keywords: &[&str],
    allowed_ext: &[&str],
) -> Option<String> {
    let file = std::fs::File::open(zip_path).ok()?;
    let mut archive = zip::ZipArchive::new(file).ok()?;

    let mut scored: Vec<(usize, u64, String)> = Vec::new();
    for idx in 0..archive.len() {
        let entry = archive.by_index(idx).ok()?;
        let name = entry.name().to_string();
        let lower = name.to_ascii_lowercase();
        if !allowed_ext.iter().any(|ext| lower.ends_with(ext)) {
            continue;
        }
        let score = keywords.iter().filter(|k| lower.contains(*k)).count();
        scored.push((score, entry.size(), name));
    }
    scored.sort_by(|a, b| b.cmp(a));
    scored.into_iter().next().map(|(_, _, name)| name)
}

fn read_zip_member_bytes(zip_path: &Path, member: &str) -> Result<Vec<u8>, SourceError> {
    let file = std::fs::File::open(zip_path)
        .map_err(|e| SourceError::SourceUnavailable(format!("{}: {e}", zip_path.display())))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| SourceError::SourceUnavailable(format!("{}: {e}", zip_path.display())))?;
    let mut entry = archive
        .by_name(member)
        .map_err(|e| SourceError::SourceUnavailable(format!("{member}: {e}")))?;
    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .map_err(|e| SourceError::SourceUnavailable(format!("{member}: {e}")))?;
    Ok(bytes)
}

/// Reads a CSV member out of a ZIP archive.
pub fn load_csv_from_zip(zip_path: &Path, member: &str) -> Result<Table, SourceError> {
    let bytes = read_zip_member_bytes(zip_path, member)?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(parse_csv_text(&text))
}

/// Reads the first worksheet of an Excel member out of a ZIP archive.
///
/// `max_rows` caps how many data rows are materialized; the Star Ratings
/// workbooks carry far more sheets and rows than the rating table needs.
pub fn load_excel_from_zip(
    zip_path: &Path,
    member: &str,
    max_rows: Option<usize>,
) -> Result<Table, SourceError> {
    let bytes = read_zip_member_bytes(zip_path, member)?;
    let mut workbook = Xlsx::new(Cursor::new(bytes))
        .map_err(|e| SourceError::schema(member, format!("not a readable workbook: {e}")))?;

    let range = match workbook.worksheet_range_at(0) {
        Some(Ok(range)) => range,
        Some(Err(e)) => {
            return Err(SourceError::schema(member, format!("unreadable sheet: {e}")));
        }
        None => {
            warn!(member, "workbook has no sheets");
            return Ok(Table::default());
        }
    };

    let mut rows_iter = range.rows();
    let headers: Vec<String> = match rows_iter.next() {
        Some(header_row) => header_row.iter().map(|c| c.to_string().trim().to_string()).collect(),
        None => return Ok(Table::default()),
    };

    let mut rows = Vec::new();
    for data_row in rows_iter {
        let mut row = HashMap::new();
        for (idx, header) in headers.iter().enumerate() {
            let value = data_row
                .get(idx)
                .map(|c| c.to_string())
                .unwrap_or_default();
            row.insert(header.clone(), value);
        }
        rows.push(row);
        if let Some(cap) = max_rows {
            if rows.len() >= cap {
                break;
            }
        }
    }

    Ok(Table { headers, rows })
}

/// Parses a numeric cell; empty, "NA", and "null" are absent, not zero.
pub fn parse_float(value: &str) -> Option<f64> {
    let cleaned = value.trim().replace(',', "");
    if cleaned.is_empty() {
        return None;
    }
    let lower = cleaned.to_ascii_lowercase();
    if lower == "na" || lower == "null" || lower == "n/a" || lower == "*" {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

/// Integer variant of [`parse_float`]; accepts "1234.0"-style cells.
pub fn parse_int(value: &str) -> Option<i64> {
    parse_float(value).map(|v| v as i64)
}

/// Arithmetic mean of the present values; `None` when nothing is present.
pub fn mean(values: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        return None;
    }
    Some(present.iter().sum::<f64>() / present.len() as f64)
}

/// Population standard deviation; `None` below two samples.
pub fn pstdev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// Rounds to one decimal, the precision the published shares carry.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        env::temp_dir().join(name)
    }

    #[test]
    fn test_pick_column_exact_over_substring() {
        let headers: Vec<String> = vec![
            "State Abbreviation".into(),
            "state".into(),
            "Contract Number".into(),
        ];
        assert_eq!(pick_column(&headers, &["state"]), Some("state".into()));
        assert_eq!(
            pick_column(&headers, &["contract_number"]),
            Some("Contract Number".into())
        );
        assert_eq!(pick_column(&headers, &["enrollment"]), None);
    }

    #[test]
    fn test_load_csv_missing_file_yields_empty_table() {
        let path = temp_path("state_briefing_missing.csv");
        let _ = fs::remove_file(&path);
        let table = load_csv(&path, "test", &[], false).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_load_csv_missing_mandatory_file_fails() {
        let path = temp_path("state_briefing_missing_mandatory.csv");
        let _ = fs::remove_file(&path);
        let err = load_csv(&path, "test", &[], true).unwrap_err();
        assert!(matches!(err, SourceError::SourceUnavailable(_)));
    }

    #[test]
    fn test_load_csv_schema_mismatch_on_missing_required_column() {
        let path = temp_path("state_briefing_schema.csv");
        fs::write(&path, "foo,bar\n1,2\n").unwrap();
        let err = load_csv(&path, "test", &[&["state"]], false).unwrap_err();
        assert!(matches!(err, SourceError::SchemaMismatch { .. }));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_csv_ignores_unknown_columns() {
        let path = temp_path("state_briefing_extra_cols.csv");
        fs::write(&path, "state,mystery,enrollment\nCA,x,10\n").unwrap();
        let table = load_csv(&path, "test", &[&["state"], &["enrollment"]], false).unwrap();
        assert_eq!(table.rows.len(), 1);
        assert_eq!(Table::cell(&table.rows[0], "enrollment"), "10");
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_parse_float_absent_markers() {
        assert_eq!(parse_float(""), None);
        assert_eq!(parse_float("NA"), None);
        assert_eq!(parse_float("null"), None);
        assert_eq!(parse_float("1,234.5"), Some(1234.5));
    }

    #[test]
    fn test_parse_int_accepts_decimal_text() {
        assert_eq!(parse_int("1234.0"), Some(1234));
        assert_eq!(parse_int(""), None);
    }

    #[test]
    fn test_mean_skips_absent() {
        assert_eq!(mean(&[Some(2.0), None, Some(4.0)]), Some(3.0));
        assert_eq!(mean(&[None, None]), None);
    }

    #[test]
    fn test_pstdev_needs_two_samples() {
        assert_eq!(pstdev(&[3.0]), None);
        let sd = pstdev(&[2.0, 4.0]).unwrap();
        assert!((sd - 1.0).abs() < 1e-9);
    }
}
