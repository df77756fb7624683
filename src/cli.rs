use std::path::PathBuf;

use clap::{Parser, Subcommand};

use partd_glp1_access::loader::InputFiles;

#[derive(Parser, Debug)]
#[command(name = "partd_glp1_access")]
#[command(about = "Score GLP-1 access across Medicare Part D plan formularies", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load the CMS files, score every plan/product pair and write the analysis outputs.
    Analyze(AnalyzeArgs),
    /// List scored plans matching an organization, product or minimum score.
    Lookup(LookupArgs),
    /// Write a small six-plan input set in the CMS layout.
    Demo(DemoArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct InputArgs {
    /// Directory holding plan_information.txt, basic_drugs_formulary.txt and beneficiary_cost.txt.
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Plan information file (overrides <data-dir>/plan_information.txt).
    #[arg(long)]
    pub plan_info: Option<PathBuf>,

    /// Formulary file (overrides <data-dir>/basic_drugs_formulary.txt).
    #[arg(long)]
    pub formulary: Option<PathBuf>,

    /// Beneficiary cost file (overrides <data-dir>/beneficiary_cost.txt).
    #[arg(long)]
    pub cost: Option<PathBuf>,

    /// NDC reference list (ndc, product, molecule, indication) replacing the built-in catalog.
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// TOML config with delimiter, pharmacy, weights and column aliases.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl InputArgs {
    pub fn input_files(&self) -> InputFiles {
        let defaults = InputFiles::from_dir(&self.data_dir);
        InputFiles {
            plan_info: self.plan_info.clone().unwrap_or(defaults.plan_info),
            formulary: self.formulary.clone().unwrap_or(defaults.formulary),
            cost: self.cost.clone().unwrap_or(defaults.cost),
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Output directory for the CSV/JSON analysis files (defaults to --data-dir).
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Print the summary only; do not write output files.
    #[arg(long, default_value_t = false)]
    pub no_export: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct LookupArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Organization name (case-insensitive exact match).
    #[arg(long)]
    pub organization: Option<String>,

    /// Product name, e.g. Wegovy.
    #[arg(long)]
    pub product: Option<String>,

    /// Only show records scoring at least this much.
    #[arg(long)]
    pub min_score: Option<f64>,

    #[arg(long, default_value_t = 25)]
    pub limit: usize,
}

#[derive(clap::Args, Debug, Clone)]
pub struct DemoArgs {
    /// Directory to write the demo files into.
    #[arg(long, default_value = "sample_data")]
    pub out_dir: PathBuf,
}
