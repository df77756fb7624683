pub const PLAN_INFO_FILE: &str = "plan_information.txt";
pub const FORMULARY_FILE: &str = "basic_drugs_formulary.txt";
pub const BENEFICIARY_COST_FILE: &str = "beneficiary_cost.txt";

pub const COVERAGE_CSV_FILE: &str = "glp1_coverage_analysis.csv";
pub const COVERAGE_JSON_FILE: &str = "glp1_coverage_analysis.json";
pub const SUMMARY_JSON_FILE: &str = "glp1_summary_stats.json";

/// Number of organizations listed in the run summary.
pub const TOP_ORGANIZATIONS: usize = 10;
