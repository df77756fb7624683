//! End-to-end runs over files on disk.

use std::fs;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use partd_glp1_access::{
    catalog::ProductCatalog,
    columns::Column,
    config::ConfigFile,
    demo,
    error::{LoadError, PipelineError, TableKind},
    export::{write_csv, write_summary_json},
    loader::{CostType, InputFiles, Pharmacy},
    pipeline::{AnalysisConfig, AnalysisRun, run_files},
};

fn write_inputs(dir: &TempDir, plans: &str, formulary: &str, cost: &str) -> InputFiles {
    let files = InputFiles::from_dir(dir.path());
    fs::write(&files.plan_info, plans).unwrap();
    fs::write(&files.formulary, formulary).unwrap();
    fs::write(&files.cost, cost).unwrap();
    files
}

#[test]
fn demo_set_ranks_ozempic_above_wegovy() {
    let dir = TempDir::new().unwrap();
    let files = demo::write_to_dir(dir.path()).unwrap();
    let catalog = ProductCatalog::builtin();
    let run = run_files(&files, &catalog, &AnalysisConfig::default()).unwrap();

    let product = |name: &str| {
        run.summary
            .by_product
            .iter()
            .find(|p| p.product == name)
            .unwrap()
            .clone()
    };
    let ozempic = product("Ozempic");
    let wegovy = product("Wegovy");

    assert_eq!(ozempic.records, 3);
    assert_eq!(wegovy.records, 3);
    assert!(ozempic.mean_score.unwrap() > wegovy.mean_score.unwrap());
    assert!(ozempic.friction.pa_rate < wegovy.friction.pa_rate);
    assert_eq!(ozempic.friction.pa_rate, 0.0);
    assert_eq!(wegovy.friction.pa_rate, 1.0);

    assert_eq!(run.summary.unique_plans, 6);
    let tiers: Vec<(u8, usize)> = run
        .summary
        .tier_distribution
        .iter()
        .map(|(tier, count)| (*tier, *count))
        .collect();
    assert_eq!(tiers, vec![(2, 3), (4, 3)]);
    assert_eq!(product("Mounjaro").mean_score, None);
}

#[test]
fn plan_table_without_plan_id_column_is_fatal() {
    let dir = TempDir::new().unwrap();
    let files = write_inputs(
        &dir,
        "CONTRACT_ID|PLAN_NAME\nH0001|Alpha Rx\n",
        "CONTRACT_ID|PLAN_ID|NDC|TIER\nH0001|001|00169406001|2\n",
        "CONTRACT_ID|PLAN_ID|TIER\nH0001|001|2\n",
    );
    let err = run_files(&files, &ProductCatalog::builtin(), &AnalysisConfig::default())
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Load(LoadError::MissingColumn {
            table: TableKind::PlanInfo,
            column: Column::PlanId,
            ..
        })
    ));
}

#[test]
fn missing_input_file_reports_its_path() {
    let dir = TempDir::new().unwrap();
    let files = InputFiles::from_dir(dir.path());
    let err = run_files(&files, &ProductCatalog::builtin(), &AnalysisConfig::default())
        .unwrap_err();
    match err {
        PipelineError::Load(LoadError::Open { table, path, .. }) => {
            assert_eq!(table, TableKind::PlanInfo);
            assert_eq!(path, files.plan_info);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn product_with_several_ndcs_yields_one_record_at_best_tier() {
    let dir = TempDir::new().unwrap();
    let files = write_inputs(
        &dir,
        "Contract_ID,Plan_ID,Plan_Name,Organization_Name\n\
         H0001,001,Alpha Rx,Alpha Health\n",
        "Contract_ID,Plan_ID,NDC,Tier,Prior_Authorization,Step_Therapy,Quantity_Limit\n\
         H0001,001,00169-4517-01,4,Y,N,Y\n\
         H0001,001,00169-4530-01,2,N,N,N\n",
        "Contract_ID,Plan_ID,Tier,Cost_Type,Retail_Preferred_Cost\n\
         H0001,001,2,copay,$30\n\
         H0001,001,4,coinsurance,25%\n",
    );
    let run = run_files(&files, &ProductCatalog::builtin(), &AnalysisConfig::default()).unwrap();

    assert_eq!(run.records.len(), 1);
    let scored = &run.records[0];
    assert_eq!(scored.record.product.name, "Wegovy");
    assert_eq!(scored.record.tier.level(), 2);
    assert!(!scored.record.prior_auth);
    assert_eq!(scored.access_score, 90.0);
}

#[test]
fn malformed_rows_are_counted_not_fatal() {
    let dir = TempDir::new().unwrap();
    let files = write_inputs(
        &dir,
        "CONTRACT_ID|PLAN_ID|ORGANIZATION_NAME\n\
         H0001|001|Alpha Health\n\
         |002|No contract\n",
        "CONTRACT_ID|PLAN_ID|NDC|TIER|PRIOR_AUTHORIZATION\n\
         H0001|001|00169406001|2|N\n\
         H0001|001|00002230001|high|N\n\
         H0009|001|00002466601|3|Y\n",
        "CONTRACT_ID|PLAN_ID|TIER|COST_TYPE|RETAIL_PREFERRED_COST\n\
         H0001|001|2|copay|$45\n",
    );
    let run = run_files(&files, &ProductCatalog::builtin(), &AnalysisConfig::default()).unwrap();

    assert_eq!(run.records.len(), 1);
    assert_eq!(run.diagnostics.skipped_in(TableKind::PlanInfo), 1);
    // unparseable tier, plus the H0009 placement whose plan is unknown
    assert_eq!(run.diagnostics.skipped_in(TableKind::Formulary), 2);
}

#[test]
fn missing_cost_rows_get_partial_credit() {
    let dir = TempDir::new().unwrap();
    let files = write_inputs(
        &dir,
        "CONTRACT_ID|PLAN_ID\nH0001|001\n",
        "CONTRACT_ID|PLAN_ID|NDC|TIER\nH0001|001|00002230001|1\n",
        "CONTRACT_ID|PLAN_ID|TIER|COST_TYPE|RETAIL_PREFERRED_COST\nH0001|001|3|copay|$45\n",
    );
    let run = run_files(&files, &ProductCatalog::builtin(), &AnalysisConfig::default()).unwrap();

    assert_eq!(run.records[0].access_score, 95.0);
    assert_eq!(run.diagnostics.missing_cost.len(), 1);
    assert_eq!(run.diagnostics.missing_cost[0].product, "Mounjaro");
    assert_eq!(run.summary.missing_cost_records, 1);
}

#[test]
fn config_file_drives_aliases_and_pharmacy() {
    let dir = TempDir::new().unwrap();
    let files = write_inputs(
        &dir,
        "CNTRCT|PLAN_ID\nH0001|001\n",
        "CNTRCT|PLAN_ID|NDC|TIER\nH0001|001|00169406001|1\n",
        "CNTRCT|PLAN_ID|TIER|COST_TYPE|RETAIL_PREFERRED_COST|MAIL_ORDER_COST\n\
         H0001|001|1|copay|$0|$120\n",
    );
    let config_path = dir.path().join("run.toml");
    fs::write(
        &config_path,
        "delimiter = \"pipe\"\npharmacy = \"mail_order\"\n\n[columns]\ncontract_id = [\"CNTRCT\"]\n",
    )
    .unwrap();

    let config = ConfigFile::load_from_file(&config_path).unwrap();
    assert_eq!(config.pharmacy, Pharmacy::MailOrder);
    let run = run_files(&files, &ProductCatalog::builtin(), &config.analysis_config()).unwrap();
    // $120 at mail order falls outside every copay band
    assert_eq!(run.records[0].access_score, 90.0);
}

#[test]
fn custom_catalog_replaces_builtin_products() {
    let dir = TempDir::new().unwrap();
    let catalog_path = dir.path().join("ndcs.csv");
    fs::write(
        &catalog_path,
        "ndc,product,molecule,indication,manufacturer\n\
         00169-2911-15,Victoza,liraglutide,diabetes,Novo Nordisk\n",
    )
    .unwrap();
    let config = AnalysisConfig::default();
    let mut diagnostics = Default::default();
    let catalog = ProductCatalog::from_path(
        &catalog_path,
        config.loader.delimiter,
        &config.loader.columns,
        &mut diagnostics,
    )
    .unwrap();

    let files = write_inputs(
        &dir,
        "CONTRACT_ID|PLAN_ID\nH0001|001\n",
        "CONTRACT_ID|PLAN_ID|NDC|TIER\n\
         H0001|001|00169291115|3\n\
         H0001|001|00169406001|1\n",
        "CONTRACT_ID|PLAN_ID|TIER\nH0001|001|3\n",
    );
    let run = run_files(&files, &catalog, &config).unwrap();

    let names: Vec<&str> = run.records.iter().map(|r| r.record.product.name.as_str()).collect();
    assert_eq!(names, vec!["Victoza"]);
    assert_eq!(run.summary.by_product.len(), 1);
}

#[test]
fn explicit_one_percent_coinsurance_earns_full_cost_credit() {
    let dir = TempDir::new().unwrap();
    let files = write_inputs(
        &dir,
        "CONTRACT_ID|PLAN_ID\nH0001|001\n",
        "CONTRACT_ID|PLAN_ID|NDC|TIER\nH0001|001|00169406001|2\n",
        "CONTRACT_ID|PLAN_ID|TIER|COST_TYPE|RETAIL_PREFERRED_COST\nH0001|001|2|coinsurance|1%\n",
    );
    let run = run_files(&files, &ProductCatalog::builtin(), &AnalysisConfig::default()).unwrap();

    let cost = &run.records[0].record.cost;
    assert_eq!(cost.cost_type, CostType::Coinsurance);
    assert_eq!(cost.retail_preferred, 1.0);
    assert_eq!(run.records[0].access_score, 90.0);
}

fn artifacts(run: &AnalysisRun) -> (Vec<u8>, Vec<u8>) {
    let mut records = Vec::new();
    write_csv(&mut records, &run.records).unwrap();
    let mut summary = Vec::new();
    write_summary_json(&mut summary, &run.summary, &run.diagnostics).unwrap();
    (records, summary)
}

#[test]
fn repeated_runs_produce_identical_output() {
    let dir = TempDir::new().unwrap();
    let files = demo::write_to_dir(dir.path()).unwrap();
    let catalog = ProductCatalog::builtin();
    let config = AnalysisConfig::default();

    let first = run_files(&files, &catalog, &config).unwrap();
    let second = run_files(&files, &catalog, &config).unwrap();

    assert_eq!(first.records, second.records);
    assert_eq!(first.summary, second.summary);
    assert_eq!(artifacts(&first), artifacts(&second));
}
