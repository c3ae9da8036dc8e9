//! State code normalization.
//!
//! Every table joins on the two-letter postal code. Sources spell states
//! inconsistently (full names, lowercase codes, territories we don't cover),
//! so all state handling funnels through [`normalize_state`].

/// The fixed universe of valid codes: 50 states plus DC, with display names.
/// Territories (PR, GU, VI, ...) are deliberately outside the run set.
pub static STATES: &[(&str, &str)] = &[
    ("AL", "Alabama"),
    ("AK", "Alaska"),
    ("AZ", "Arizona"),
    ("AR", "Arkansas"),
    ("CA", "California"),
    ("CO", "Colorado"),
    ("CT", "Connecticut"),
    ("DE", "Delaware"),
    ("DC", "District of Columbia"),
    ("FL", "Florida"),
    ("GA", "Georgia"),
    ("HI", "Hawaii"),
    ("ID", "Idaho"),
    ("IL", "Illinois"),
    ("IN", "Indiana"),
    ("IA", "Iowa"),
    ("KS", "Kansas"),
    ("KY", "Kentucky"),
    ("LA", "Louisiana"),
    ("ME", "Maine"),
    ("MD", "Maryland"),
    ("MA", "Massachusetts"),
    ("MI", "Michigan"),
    ("MN", "Minnesota"),
    ("MS", "Mississippi"),
    ("MO", "Missouri"),
    ("MT", "Montana"),
    ("NE", "Nebraska"),
    ("NV", "Nevada"),
    ("NH", "New Hampshire"),
    ("NJ", "New Jersey"),
    ("NM", "New Mexico"),
    ("NY", "New York"),
    ("NC", "North Carolina"),
    ("ND", "North Dakota"),
    ("OH", "Ohio"),
    ("OK", "Oklahoma"),
    ("OR", "Oregon"),
    ("PA", "Pennsylvania"),
    ("RI", "Rhode Island"),
    ("SC", "South Carolina"),
    ("SD", "South Dakota"),
    ("TN", "Tennessee"),
    ("TX", "Texas"),
    ("UT", "Utah"),
    ("VT", "Vermont"),
    ("VA", "Virginia"),
    ("WA", "Washington"),
    ("WV", "West Virginia"),
    ("WI", "Wisconsin"),
    ("WY", "Wyoming"),
];

/// Maps a raw state cell to its canonical code, or `None` if the value is
/// empty, unrecognized, or outside the valid code set.
pub fn normalize_state(value: &str) -> Option<&'static str> {
    let cleaned = value.trim();
    if cleaned.is_empty() {
        return None;
    }
    if cleaned.len() == 2 {
        let upper = cleaned.to_ascii_uppercase();
        return STATES
            .iter()
            .find(|(code, _)| *code == upper)
            .map(|(code, _)| *code);
    }
    let upper = cleaned.to_ascii_uppercase();
    STATES
        .iter()
        .find(|(_, name)| name.to_ascii_uppercase() == upper)
        .map(|(code, _)| *code)
}

/// Display name for a canonical code; falls back to the code itself.
pub fn state_name(code: &str) -> &str {
    STATES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
        .unwrap_or(code)
}
