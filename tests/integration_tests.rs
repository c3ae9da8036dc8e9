use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use state_briefing::config::PipelineConfig;
use state_briefing::normalize::types::SPLIT_MA_VS_PDP;
use state_briefing::{build, coverage, normalize, qa};

fn run_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 2, 7).unwrap()
}

fn sample_config() -> PipelineConfig {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("data/config/pipeline.json");
    PipelineConfig::load(&path).expect("sample config should load")
}

/// Copies the bundled sample drop into a scratch directory and runs
/// process + build, returning the scratch root.
fn run_pipeline(name: &str) -> PathBuf {
    let root = env::temp_dir().join(format!("state_briefing_it_{name}"));
    let _ = fs::remove_dir_all(&root);
    let raw = root.join("raw");
    fs::create_dir_all(&raw).unwrap();

    let samples = Path::new(env!("CARGO_MANIFEST_DIR")).join("data/samples/raw");
    for entry in fs::read_dir(&samples).unwrap() {
        let entry = entry.unwrap();
        fs::copy(entry.path(), raw.join(entry.file_name())).unwrap();
    }

    let config = sample_config();
    normalize::run_all(&raw, &root.join("processed"), &config).expect("process failed");
    build::run(
        &root.join("processed"),
        &root.join("states"),
        &root.join("web"),
        &config,
        run_date(),
    )
    .expect("build failed");
    root
}

fn load_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_full_pipeline_with_samples() {
    let root = run_pipeline("full");

    for name in [
        "onc_state.csv",
        "ruca_state.csv",
        "cms_enrollment_state.csv",
        "cms_plan_mix_state.csv",
        "cms_stars_state.csv",
        "source_status.csv",
    ] {
        assert!(root.join("processed").join(name).exists(), "missing {name}");
    }

    let index = load_json(&root.join("states/index.json"));
    let codes: Vec<&str> = index["states"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["code"].as_str().unwrap())
        .collect();
    assert_eq!(codes, vec!["CA", "FL", "IA", "NY", "OH", "TX"]);

    let ca = load_json(&root.join("states/CA.json"));
    for key in [
        "state",
        "updated_at",
        "summary",
        "digital_readiness",
        "rural_urban",
        "mapd_pdp",
        "roles_impact",
        "preseason_shift",
        "stars_context",
        "sources",
        "future",
    ] {
        assert!(ca.get(key).is_some(), "CA.json missing section {key}");
    }
    assert_eq!(ca["updated_at"], "2026-02-07");
    // mean of ehr 91, hie 72, api 58, patient access 68
    assert_eq!(ca["digital_readiness"]["readiness_score"], 72.3);
    assert_eq!(ca["stars_context"]["avg_star"], 4.12);

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn test_headline_uses_correct_article() {
    let root = run_pipeline("article");

    let ca = load_json(&root.join("states/CA.json"));
    let headline = ca["summary"]["headline"].as_str().unwrap().to_lowercase();
    assert!(headline.contains("an urban"), "headline was: {headline}");
    assert!(!headline.contains("a urban"), "headline was: {headline}");

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn test_plan_mix_fallback_carries_method_note() {
    let root = run_pipeline("method_note");

    // The sample drop has no CPSC release, so every state degrades to the
    // MA-vs-PDP split and must carry the provenance note.
    let fl = load_json(&root.join("states/FL.json"));
    assert_eq!(fl["mapd_pdp"]["split_method"], SPLIT_MA_VS_PDP);
    assert!(fl["mapd_pdp"]["method_note"].is_string());
    assert!(fl["mapd_pdp"]["ma_only_share_pct"].is_null());
    // mapd 2,400,000 vs pdp 900,000
    assert_eq!(fl["mapd_pdp"]["mapd_share_pct"], 72.7);
    assert_eq!(fl["mapd_pdp"]["pdp_share_pct"], 27.3);

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn test_role_overrides_merge_with_defaults() {
    let root = run_pipeline("roles");

    let ia = load_json(&root.join("states/IA.json"));
    let ia_roles = ia["roles_impact"]["roles"].as_array().unwrap();
    assert_eq!(ia_roles.len(), 6);
    let pe = ia_roles
        .iter()
        .find(|r| r["role"] == "Provider Engagement")
        .unwrap();
    assert_eq!(pe["impact"], "High");

    let fl = load_json(&root.join("states/FL.json"));
    let fl_roles = fl["roles_impact"]["roles"].as_array().unwrap();
    assert_eq!(fl_roles.len(), 6);
    let qa_role = fl_roles
        .iter()
        .find(|r| r["role"] == "Quality Assurance")
        .unwrap();
    assert_eq!(qa_role["impact"], "High");
    assert!(qa_role["why"].as_str().unwrap().to_lowercase().contains("churn"));

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn test_rural_heavy_state_gets_extra_risk() {
    let root = run_pipeline("rural");

    let ia = load_json(&root.join("states/IA.json"));
    // rural 360,000 of 850,000
    assert_eq!(ia["rural_urban"]["rural_pct"], 42.4);
    assert_eq!(ia["rural_urban"]["label"], "Rural-heavy");
    let risks = ia["preseason_shift"]["operational_risks"].as_array().unwrap();
    assert_eq!(risks.len(), 4);

    let ca = load_json(&root.join("states/CA.json"));
    let ca_risks = ca["preseason_shift"]["operational_risks"].as_array().unwrap();
    assert_eq!(ca_risks.len(), 3);

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn test_web_mirror_has_no_index_in_states() {
    let root = run_pipeline("mirror");

    assert!(root.join("web/index.json").exists());
    assert!(!root.join("web/states/index.json").exists());
    for code in ["CA", "FL", "IA", "NY", "OH", "TX"] {
        assert!(root.join(format!("web/states/{code}.json")).exists());
    }

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn test_rebuild_is_byte_identical() {
    let root = run_pipeline("idempotent");

    let first = fs::read(root.join("states/CA.json")).unwrap();
    let first_index = fs::read(root.join("states/index.json")).unwrap();

    build::run(
        &root.join("processed"),
        &root.join("states"),
        &root.join("web"),
        &sample_config(),
        run_date(),
    )
    .unwrap();

    assert_eq!(first, fs::read(root.join("states/CA.json")).unwrap());
    assert_eq!(first_index, fs::read(root.join("states/index.json")).unwrap());

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn test_index_lists_only_states_present_in_sources() {
    let root = env::temp_dir().join("state_briefing_it_three_states");
    let _ = fs::remove_dir_all(&root);
    let raw = root.join("raw");
    fs::create_dir_all(&raw).unwrap();

    fs::write(
        raw.join("cms_enrollment.csv"),
        "state,reporting_year,ma_enrollment,partd_enrollment,mapd_enrollment,pdp_enrollment\n\
         CA,2025,3200000,4400000,3000000,1400000\n\
         FL,2025,2600000,3300000,2400000,900000\n\
         IA,2025,300000,620000,280000,340000\n",
    )
    .unwrap();

    let config = PipelineConfig::default();
    normalize::run_all(&raw, &root.join("processed"), &config).unwrap();
    build::run(
        &root.join("processed"),
        &root.join("states"),
        &root.join("web"),
        &config,
        run_date(),
    )
    .unwrap();

    let index = load_json(&root.join("states/index.json"));
    let codes: Vec<&str> = index["states"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["code"].as_str().unwrap())
        .collect();
    // Other states are absent from the index, not present with nulls.
    assert_eq!(codes, vec!["CA", "FL", "IA"]);
    assert!(!root.join("states/WY.json").exists());

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn test_cpsc_coverage_decides_method_note_per_state() {
    use std::io::Write as _;

    let root = env::temp_dir().join("state_briefing_it_cpsc");
    let _ = fs::remove_dir_all(&root);
    let raw = root.join("raw");
    fs::create_dir_all(&raw).unwrap();

    fs::write(
        raw.join("cms_enrollment.csv"),
        "state,reporting_year,ma_enrollment,partd_enrollment,mapd_enrollment,pdp_enrollment\n\
         CA,2025,3200000,4400000,3000000,1400000\n\
         FL,2025,2600000,3300000,2400000,900000\n",
    )
    .unwrap();

    // CPSC release covers CA only.
    let file = fs::File::create(raw.join("cms_enrollment_cpsc_2025_12.zip")).unwrap();
    let mut archive = zip::ZipWriter::new(file);
    archive
        .start_file(
            "cpsc_enrollment_monthly.csv",
            zip::write::SimpleFileOptions::default(),
        )
        .unwrap();
    archive
        .write_all(
            b"state,organization type,enrollment\n\
              CA,MA-PD,600000\nCA,MA Only,150000\nCA,Prescription Drug Plan,250000\n",
        )
        .unwrap();
    archive.finish().unwrap();

    let config = PipelineConfig::default();
    normalize::run_all(&raw, &root.join("processed"), &config).unwrap();
    build::run(
        &root.join("processed"),
        &root.join("states"),
        &root.join("web"),
        &config,
        run_date(),
    )
    .unwrap();

    let ca = load_json(&root.join("states/CA.json"));
    assert!(ca["mapd_pdp"]["method_note"].is_null());
    assert_eq!(ca["mapd_pdp"]["mapd_share_pct"], 60.0);
    assert_eq!(ca["mapd_pdp"]["ma_only_share_pct"], 15.0);

    let fl = load_json(&root.join("states/FL.json"));
    assert_eq!(fl["mapd_pdp"]["split_method"], SPLIT_MA_VS_PDP);
    assert!(fl["mapd_pdp"]["method_note"].is_string());

    fs::remove_dir_all(&root).unwrap();
}

#[test]
fn test_coverage_and_qa_reports() {
    let root = run_pipeline("reports");
    let config = sample_config();

    let coverage_path = coverage::run(
        &root.join("states"),
        &root.join("reports/coverage"),
        config.top_n,
        run_date(),
    )
    .unwrap();
    let coverage_text = fs::read_to_string(&coverage_path).unwrap();
    assert!(coverage_text.contains("## Coverage Report"));
    assert!(coverage_text.contains("### Average Star rating\n- NY: 4.21"));

    // The fallback split leaves ma_only_share_pct absent everywhere, so QA
    // lands on WARN rather than PASS.
    let status = qa::run(
        &root.join("states"),
        &root.join("processed"),
        &root.join("reports/qa"),
        &config,
        run_date(),
        false,
    )
    .unwrap();
    assert_eq!(status, qa::QaStatus::Warn);
    let qa_text = fs::read_to_string(root.join("reports/qa/qa_2026-02-07.md")).unwrap();
    assert!(qa_text.contains("Status: WARN"));
    assert!(qa_text.contains("- onc_state.csv: 6 data rows"));
    assert!(qa_text.contains("MA-only share (%)"));

    fs::remove_dir_all(&root).unwrap();
}
