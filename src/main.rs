mod cli;

use anyhow::{Context, Result, bail};
use clap::Parser;

use partd_glp1_access::{
    catalog::ProductCatalog,
    config::ConfigFile,
    constants::{COVERAGE_CSV_FILE, COVERAGE_JSON_FILE, SUMMARY_JSON_FILE},
    demo,
    error::Diagnostics,
    export::{write_csv_file, write_json_records_file, write_summary_json_file},
    loader::CostType,
    lookup::{LookupFilter, lookup},
    pipeline::{AnalysisConfig, AnalysisRun, run_files},
    summary::RunSummary,
};

use cli::{AnalyzeArgs, Command, DemoArgs, InputArgs, LookupArgs};

fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = cli::Args::parse();

    match args.cmd {
        Command::Analyze(cmd) => analyze(cmd).context("analyze failed"),
        Command::Lookup(cmd) => run_lookup(cmd).context("lookup failed"),
        Command::Demo(cmd) => write_demo(cmd).context("demo failed"),
    }
}

fn load_setup(input: &InputArgs) -> Result<(ProductCatalog, AnalysisConfig)> {
    let config_file = match &input.config {
        Some(path) => ConfigFile::load_from_file(path)?,
        None => ConfigFile::default(),
    };
    let config = config_file.analysis_config();

    let catalog = match input.catalog.as_ref().or(config_file.catalog.as_ref()) {
        Some(path) => {
            let mut diagnostics = Diagnostics::default();
            let catalog = ProductCatalog::from_path(
                path,
                config.loader.delimiter,
                &config.loader.columns,
                &mut diagnostics,
            )
            .with_context(|| format!("Failed loading NDC reference list {}", path.display()))?;
            if diagnostics.skipped_count() > 0 {
                tracing::warn!(
                    "Skipped {} rows of NDC reference list {}",
                    diagnostics.skipped_count(),
                    path.display()
                );
            }
            catalog
        }
        None => ProductCatalog::builtin(),
    };
    if catalog.is_empty() {
        bail!("Product catalog is empty; nothing to score");
    }
    Ok((catalog, config))
}

fn load_and_run(input: &InputArgs) -> Result<(ProductCatalog, AnalysisConfig, AnalysisRun)> {
    let (catalog, config) = load_setup(input)?;
    let files = input.input_files();
    let run = run_files(&files, &catalog, &config).with_context(|| {
        format!(
            "Failed analyzing {}, {} and {}",
            files.plan_info.display(),
            files.formulary.display(),
            files.cost.display()
        )
    })?;
    Ok((catalog, config, run))
}

fn fmt_score(score: Option<f64>) -> String {
    score.map(|s| format!("{s:.1}")).unwrap_or_else(|| "-".to_string())
}

fn pct(rate: f64) -> String {
    format!("{:.0}%", rate * 100.0)
}

fn print_summary(summary: &RunSummary, diagnostics: &Diagnostics) {
    println!(
        "Coverage records: {}  Plans: {}  Mean access score: {}",
        summary.total_records,
        summary.unique_plans,
        fmt_score(summary.average_score)
    );
    println!(
        "Friction: PA {}  ST {}  QL {}",
        pct(summary.friction.pa_rate),
        pct(summary.friction.st_rate),
        pct(summary.friction.ql_rate)
    );

    println!();
    println!(
        "{:<10} {:<12} {:<9} {:>7} {:>6} {:>6} {:>5} {:>5} {:>5}",
        "product", "molecule", "use", "records", "plans", "score", "PA", "ST", "QL"
    );
    for p in &summary.by_product {
        println!(
            "{:<10} {:<12} {:<9} {:>7} {:>6} {:>6} {:>5} {:>5} {:>5}",
            p.product,
            p.molecule,
            p.indication.as_str(),
            p.records,
            p.plans_covering,
            fmt_score(p.mean_score),
            pct(p.friction.pa_rate),
            pct(p.friction.st_rate),
            pct(p.friction.ql_rate)
        );
    }

    println!();
    for group in summary.by_indication.iter().chain(&summary.by_molecule) {
        println!(
            "{:<12} records={:<6} score={:<6} PA={}",
            group.group,
            group.records,
            fmt_score(group.mean_score),
            pct(group.friction.pa_rate)
        );
    }

    println!();
    let tiers: Vec<String> = summary
        .tier_distribution
        .iter()
        .map(|(tier, count)| format!("T{tier}={count}"))
        .collect();
    println!("Tier distribution: {}", tiers.join("  "));

    if !summary.top_organizations.is_empty() {
        println!();
        println!("Top organizations by coverage records:");
        for org in &summary.top_organizations {
            println!(
                "  {:<40} records={:<5} plans={:<4} score={}",
                org.organization_name,
                org.records,
                org.plans,
                fmt_score(org.mean_score)
            );
        }
    }

    if diagnostics.skipped_count() > 0 || !diagnostics.missing_cost.is_empty() {
        println!();
        println!(
            "Skipped rows: {}  Records without cost data: {}",
            diagnostics.skipped_count(),
            diagnostics.missing_cost.len()
        );
    }
}

fn analyze(cmd: AnalyzeArgs) -> Result<()> {
    let (_, _, run) = load_and_run(&cmd.input)?;
    print_summary(&run.summary, &run.diagnostics);

    if cmd.no_export {
        return Ok(());
    }
    let out_dir = cmd.out_dir.unwrap_or_else(|| cmd.input.data_dir.clone());

    let csv_path = out_dir.join(COVERAGE_CSV_FILE);
    write_csv_file(&csv_path, &run.records)
        .with_context(|| format!("Failed writing {}", csv_path.display()))?;
    let json_path = out_dir.join(COVERAGE_JSON_FILE);
    write_json_records_file(&json_path, &run.records)
        .with_context(|| format!("Failed writing {}", json_path.display()))?;
    let summary_path = out_dir.join(SUMMARY_JSON_FILE);
    write_summary_json_file(&summary_path, &run.summary, &run.diagnostics)
        .with_context(|| format!("Failed writing {}", summary_path.display()))?;

    println!();
    println!("Wrote {}", csv_path.display());
    println!("Wrote {}", json_path.display());
    println!("Wrote {}", summary_path.display());
    Ok(())
}

fn run_lookup(cmd: LookupArgs) -> Result<()> {
    let (catalog, config, run) = load_and_run(&cmd.input)?;
    if let Some(product) = &cmd.product {
        if !catalog.products().any(|p| p.name.eq_ignore_ascii_case(product)) {
            bail!("Unknown product {product:?}");
        }
    }

    let filter = LookupFilter {
        organization: cmd.organization,
        product: cmd.product,
        min_score: cmd.min_score,
        limit: Some(cmd.limit),
    };
    let hits = lookup(&run.records, &filter);
    if hits.is_empty() {
        println!("No coverage records match.");
        return Ok(());
    }

    println!(
        "{:>6}  {:<10} {:<36} {:<30} {:<10} {:>4}  {:<8} {:>10}",
        "score", "plan", "plan name", "organization", "product", "tier", "UM", "cost"
    );
    for scored in hits {
        let r = &scored.record;
        let um: Vec<&str> = [
            (r.prior_auth, "PA"),
            (r.step_therapy, "ST"),
            (r.quantity_limit, "QL"),
        ]
        .into_iter()
        .filter_map(|(on, label)| on.then_some(label))
        .collect();
        let cost = if r.cost.is_missing() {
            "n/a".to_string()
        } else {
            let amount = r.cost.amount(config.scoring.pharmacy);
            match r.cost.cost_type {
                CostType::Coinsurance => format!("{amount:.0}%"),
                _ => format!("${amount:.2}"),
            }
        };
        println!(
            "{:>6.1}  {:<10} {:<36} {:<30} {:<10} {:>4}  {:<8} {:>10}",
            scored.access_score,
            r.plan.key.to_string(),
            r.plan.plan_name,
            r.plan.organization_name,
            r.product.name,
            r.tier.level(),
            if um.is_empty() { "-".to_string() } else { um.join("+") },
            cost
        );
    }
    Ok(())
}

fn write_demo(cmd: DemoArgs) -> Result<()> {
    let files = demo::write_to_dir(&cmd.out_dir)
        .with_context(|| format!("Failed writing demo inputs to {}", cmd.out_dir.display()))?;
    println!("Wrote {}", files.plan_info.display());
    println!("Wrote {}", files.formulary.display());
    println!("Wrote {}", files.cost.display());
    println!("Run: partd_glp1_access analyze --data-dir {}", cmd.out_dir.display());
    Ok(())
}
