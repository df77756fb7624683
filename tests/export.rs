use pretty_assertions::assert_eq;
use tempfile::TempDir;

use partd_glp1_access::{
    catalog::ProductCatalog,
    constants::{COVERAGE_CSV_FILE, COVERAGE_JSON_FILE, SUMMARY_JSON_FILE},
    demo,
    export::{
        RecordKey, read_csv_file, read_json_records_file, write_csv_file,
        write_json_records_file, write_summary_json_file,
    },
    pipeline::{AnalysisConfig, AnalysisRun, run_files},
};

fn demo_run(dir: &TempDir) -> AnalysisRun {
    let files = demo::write_to_dir(&dir.path().join("inputs")).unwrap();
    run_files(&files, &ProductCatalog::builtin(), &AnalysisConfig::default()).unwrap()
}

fn expected_keys(run: &AnalysisRun) -> Vec<RecordKey> {
    run.records
        .iter()
        .map(|s| {
            let r = &s.record;
            (
                r.plan.key.to_string(),
                r.product.name.clone(),
                r.tier.level(),
                r.prior_auth,
                r.step_therapy,
                r.quantity_limit,
                s.access_score,
            )
        })
        .collect()
}

#[test]
fn csv_reload_reproduces_record_tuples_in_order() {
    let dir = TempDir::new().unwrap();
    let run = demo_run(&dir);
    let path = dir.path().join("out").join(COVERAGE_CSV_FILE);

    write_csv_file(&path, &run.records).unwrap();
    let rows = read_csv_file(&path).unwrap();

    let keys: Vec<RecordKey> = rows.iter().map(|row| row.key()).collect();
    assert_eq!(keys, expected_keys(&run));
    assert_eq!(rows[3].quantity_limit_amount, Some(4.0));
    assert_eq!(rows[3].quantity_limit_days, Some(28));
    assert_eq!(rows[0].quantity_limit_amount, None);
}

#[test]
fn json_reload_reproduces_record_tuples_in_order() {
    let dir = TempDir::new().unwrap();
    let run = demo_run(&dir);
    let path = dir.path().join(COVERAGE_JSON_FILE);

    write_json_records_file(&path, &run.records).unwrap();
    let rows = read_json_records_file(&path).unwrap();

    let keys: Vec<RecordKey> = rows.iter().map(|row| row.key()).collect();
    assert_eq!(keys, expected_keys(&run));
    assert_eq!(rows[0].retail_preferred_cost, 47.0);
    assert_eq!(rows[5].retail_preferred_cost, 25.0);
}

#[test]
fn summary_file_lists_every_product() {
    let dir = TempDir::new().unwrap();
    let run = demo_run(&dir);
    let path = dir.path().join(SUMMARY_JSON_FILE);

    write_summary_json_file(&path, &run.summary, &run.diagnostics).unwrap();
    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

    let products: Vec<&str> = value["by_product"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["product"].as_str().unwrap())
        .collect();
    assert_eq!(products, vec!["Wegovy", "Ozempic", "Zepbound", "Mounjaro"]);
    assert_eq!(value["total_records"], 6);
    assert_eq!(value["diagnostics"]["skipped_rows"], 0);
    assert!(value["by_product"][2]["mean_score"].is_null());
}
