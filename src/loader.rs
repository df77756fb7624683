use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use csv::StringRecord;
use serde::{Deserialize, Serialize};

use crate::{
    catalog::{Ndc, ProductCatalog, normalize_ndc},
    columns::{Column, ColumnAliases, HeaderMap, missing_column},
    constants::{BENEFICIARY_COST_FILE, FORMULARY_FILE, PLAN_INFO_FILE},
    error::{Diagnostics, LoadError, SkipReason, TableKind},
    table::{Delimiter, Table},
};

/// Contract/plan pair identifying a Part D plan, e.g. `H1234-001`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanKey {
    pub contract_id: String,
    pub plan_id: String,
}

impl PlanKey {
    /// Contract ids are upper-cased; numeric plan ids are padded to the
    /// three digits CMS uses, so `1` and `001` name the same plan.
    pub fn new(contract_id: &str, plan_id: &str) -> Self {
        let plan_id = plan_id.trim();
        let numeric = !plan_id.is_empty() && plan_id.bytes().all(|b| b.is_ascii_digit());
        let plan_id = if numeric && plan_id.len() < 3 {
            format!("{plan_id:0>3}")
        } else {
            plan_id.to_string()
        };
        Self {
            contract_id: contract_id.trim().to_ascii_uppercase(),
            plan_id,
        }
    }
}

impl fmt::Display for PlanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.contract_id, self.plan_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub key: PlanKey,
    pub plan_name: String,
    pub plan_type: String,
    pub organization_name: String,
    pub formulary_id: Option<String>,
}

/// Formulary cost-sharing tier; 1 is the cheapest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tier(u8);

impl Tier {
    pub const MAX_LEVEL: u8 = 9;
    /// Part D places specialty drugs on tier 5.
    pub const SPECIALTY: Tier = Tier(5);

    pub fn new(level: u8) -> Option<Self> {
        (1..=Self::MAX_LEVEL).contains(&level).then_some(Tier(level))
    }

    pub fn level(self) -> u8 {
        self.0
    }

    /// Accepts `2`, `02`, `2.0`, `T2`, `Tier 2` and the specialty labels.
    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        if matches!(lowered.as_str(), "specialty" | "spec" | "sp") {
            return Some(Self::SPECIALTY);
        }
        let digits = lowered
            .trim_start_matches("tier")
            .trim_start_matches('t')
            .trim();
        let digits = digits.strip_suffix(".0").unwrap_or(digits);
        digits.parse::<u8>().ok().and_then(Self::new)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormularyEntry {
    pub plan: PlanKey,
    pub ndc: Ndc,
    pub tier: Tier,
    pub prior_auth: bool,
    pub step_therapy: bool,
    pub quantity_limit: bool,
    pub quantity_limit_amount: Option<f64>,
    pub quantity_limit_days: Option<u32>,
}

impl FormularyEntry {
    pub fn restriction_count(&self) -> u8 {
        u8::from(self.prior_auth) + u8::from(self.step_therapy) + u8::from(self.quantity_limit)
    }
}

/// Benefit phase a cost-sharing row applies to (CMS `COVERAGE_LEVEL` 0-3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoveragePhase {
    Deductible,
    #[default]
    Initial,
    Gap,
    Catastrophic,
}

impl CoveragePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deductible => "deductible",
            Self::Initial => "initial",
            Self::Gap => "gap",
            Self::Catastrophic => "catastrophic",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "0" | "deductible" | "pre-deductible" | "pre_deductible" => Some(Self::Deductible),
            "" | "1" | "initial" | "initial coverage" | "initial_coverage" | "icl" => {
                Some(Self::Initial)
            }
            "2" | "gap" | "coverage gap" | "coverage_gap" => Some(Self::Gap),
            "3" | "catastrophic" => Some(Self::Catastrophic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostType {
    Copay,
    Coinsurance,
    /// No cost-sharing row was found for the record's tier.
    Unknown,
}

impl CostType {
    pub fn as_str(self) -> &'static str {
        match self {
            CostType::Copay => "copay",
            CostType::Coinsurance => "coinsurance",
            CostType::Unknown => "unknown",
        }
    }

    /// CMS codes cost type as 0 (none), 1 (copay), 2 (coinsurance). "None" is
    /// read as a zero copay.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "0" | "none" | "n/a" | "na" | "1" | "copay" | "copayment" => Some(Self::Copay),
            "2" | "coinsurance" | "coins" => Some(Self::Coinsurance),
            _ => None,
        }
    }
}

impl fmt::Display for CostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pharmacy channel whose cost sharing drives the estimated out-of-pocket cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pharmacy {
    #[default]
    RetailPreferred,
    RetailStandard,
    MailOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostEntry {
    pub plan: PlanKey,
    pub tier: Tier,
    pub phase: CoveragePhase,
    pub cost_type: CostType,
    /// Dollars for copays, percent (0-100) for coinsurance.
    pub retail_preferred: f64,
    pub retail_standard: f64,
    pub mail_order: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceTables {
    pub plans: BTreeMap<PlanKey, Plan>,
    pub formulary: BTreeMap<(PlanKey, Ndc), FormularyEntry>,
    pub costs: HashMap<(PlanKey, Tier), CostEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct LoaderConfig {
    pub delimiter: Delimiter,
    pub columns: ColumnAliases,
    pub coverage_phase: CoveragePhase,
}

#[derive(Debug, Clone)]
pub struct InputFiles {
    pub plan_info: PathBuf,
    pub formulary: PathBuf,
    pub cost: PathBuf,
}

impl InputFiles {
    pub fn from_dir(dir: &Path) -> Self {
        Self {
            plan_info: dir.join(PLAN_INFO_FILE),
            formulary: dir.join(FORMULARY_FILE),
            cost: dir.join(BENEFICIARY_COST_FILE),
        }
    }
}

fn invalid(column: Column, value: &str) -> SkipReason {
    SkipReason::InvalidValue {
        column,
        value: value.to_string(),
    }
}

/// CMS formulary ids are eight digits; spreadsheet round trips drop the
/// leading zeros, so numeric ids are padded back.
pub fn normalize_formulary_id(raw: &str) -> String {
    let raw = raw.trim();
    if !raw.is_empty() && raw.len() < 8 && raw.bytes().all(|b| b.is_ascii_digit()) {
        format!("{raw:0>8}")
    } else {
        raw.to_string()
    }
}

/// Y/N style flags. Blank means "not applied".
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "n" | "no" | "false" | "0" => Some(false),
        "y" | "yes" | "true" | "1" | "x" => Some(true),
        _ => None,
    }
}

/// Money or percent amounts such as `$45.00`, `1,250`, `25%`. Blank is zero.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | '%') && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return Some(0.0);
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

fn flag(headers: &HeaderMap, row: &StringRecord, column: Column) -> Result<bool, SkipReason> {
    let raw = headers.raw(row, column).unwrap_or("");
    parse_flag(raw).ok_or_else(|| invalid(column, raw))
}

fn tier(headers: &HeaderMap, row: &StringRecord) -> Result<Tier, SkipReason> {
    let raw = headers.required(row, Column::Tier)?;
    Tier::parse(raw).ok_or_else(|| invalid(Column::Tier, raw))
}

fn plan_key(headers: &HeaderMap, row: &StringRecord) -> Result<PlanKey, SkipReason> {
    let contract_id = headers.required(row, Column::ContractId)?;
    let plan_id = headers.required(row, Column::PlanId)?;
    Ok(PlanKey::new(contract_id, plan_id))
}

pub fn load_plans<R: Read>(
    source: R,
    config: &LoaderConfig,
    diagnostics: &mut Diagnostics,
) -> Result<BTreeMap<PlanKey, Plan>, LoadError> {
    let table = Table::open(source, TableKind::PlanInfo, config.delimiter, &config.columns)?;
    table.headers().require(Column::ContractId, &config.columns)?;
    table.headers().require(Column::PlanId, &config.columns)?;

    let mut plans = BTreeMap::new();
    table.for_each_row(diagnostics, |headers, row| {
        let key = plan_key(headers, row)?;
        if plans.contains_key(&key) {
            return Err(SkipReason::Duplicate);
        }
        let text = |column| headers.text(row, column).unwrap_or_default().to_string();
        let plan = Plan {
            key: key.clone(),
            plan_name: text(Column::PlanName),
            plan_type: text(Column::PlanType),
            organization_name: text(Column::OrganizationName),
            formulary_id: headers.text(row, Column::FormularyId).map(normalize_formulary_id),
        };
        plans.insert(key, plan);
        Ok(())
    })?;

    tracing::info!("Loaded {} plans", plans.len());
    Ok(plans)
}

enum FormularyKeying {
    Plan,
    FormularyId(HashMap<String, Vec<PlanKey>>),
}

/// Loads formulary placements for catalog NDCs only; every other drug in the
/// file is passed over without validation.
///
/// Files keyed by contract/plan map directly. CMS releases keyed by
/// `FORMULARY_ID` are expanded to every plan that uses the formulary.
pub fn load_formulary<R: Read>(
    source: R,
    plans: &BTreeMap<PlanKey, Plan>,
    catalog: &ProductCatalog,
    config: &LoaderConfig,
    diagnostics: &mut Diagnostics,
) -> Result<BTreeMap<(PlanKey, Ndc), FormularyEntry>, LoadError> {
    let aliases = &config.columns;
    let table = Table::open(source, TableKind::Formulary, config.delimiter, aliases)?;
    let headers = table.headers();
    headers.require(Column::Ndc, aliases)?;
    headers.require(Column::Tier, aliases)?;

    let keying = if headers.has(Column::ContractId) && headers.has(Column::PlanId) {
        FormularyKeying::Plan
    } else if headers.has(Column::FormularyId) {
        let mut by_formulary: HashMap<String, Vec<PlanKey>> = HashMap::new();
        for plan in plans.values() {
            if let Some(id) = &plan.formulary_id {
                by_formulary.entry(id.clone()).or_default().push(plan.key.clone());
            }
        }
        FormularyKeying::FormularyId(by_formulary)
    } else {
        let absent = if headers.has(Column::ContractId) {
            Column::PlanId
        } else {
            Column::ContractId
        };
        return Err(missing_column(TableKind::Formulary, absent, aliases));
    };

    let mut entries: BTreeMap<(PlanKey, Ndc), FormularyEntry> = BTreeMap::new();
    let mut seen_formulary_rows: HashSet<(String, Ndc)> = HashSet::new();
    table.for_each_row(diagnostics, |headers, row| {
        let raw_ndc = headers.required(row, Column::Ndc)?;
        let ndc = normalize_ndc(raw_ndc).ok_or_else(|| invalid(Column::Ndc, raw_ndc))?;
        if !catalog.contains(&ndc) {
            return Ok(());
        }

        let tier = tier(headers, row)?;
        let prior_auth = flag(headers, row, Column::PriorAuth)?;
        let step_therapy = flag(headers, row, Column::StepTherapy)?;
        let quantity_limit = flag(headers, row, Column::QuantityLimit)?;
        let quantity_limit_amount = match headers.text(row, Column::QuantityLimitAmount) {
            Some(raw) => Some(
                parse_amount(raw).ok_or_else(|| invalid(Column::QuantityLimitAmount, raw))?,
            ),
            None => None,
        };
        let quantity_limit_days = match headers.text(row, Column::QuantityLimitDays) {
            Some(raw) => Some(
                raw.parse::<u32>()
                    .map_err(|_| invalid(Column::QuantityLimitDays, raw))?,
            ),
            None => None,
        };

        let targets = match &keying {
            FormularyKeying::Plan => {
                let key = plan_key(headers, row)?;
                if entries.contains_key(&(key.clone(), ndc.clone())) {
                    return Err(SkipReason::Duplicate);
                }
                vec![key]
            }
            FormularyKeying::FormularyId(by_formulary) => {
                let formulary_id =
                    normalize_formulary_id(headers.required(row, Column::FormularyId)?);
                let Some(keys) = by_formulary.get(&formulary_id) else {
                    return Err(SkipReason::UnknownFormulary { formulary_id });
                };
                if !seen_formulary_rows.insert((formulary_id, ndc.clone())) {
                    return Err(SkipReason::Duplicate);
                }
                keys.clone()
            }
        };

        for plan in targets {
            let entry = FormularyEntry {
                plan: plan.clone(),
                ndc: ndc.clone(),
                tier,
                prior_auth,
                step_therapy,
                quantity_limit,
                quantity_limit_amount,
                quantity_limit_days,
            };
            entries.entry((plan, ndc.clone())).or_insert(entry);
        }
        Ok(())
    })?;

    tracing::info!("Loaded {} GLP-1 formulary entries", entries.len());
    Ok(entries)
}

// DAYS_SUPPLY codes that denote a one-month fill.
const ONE_MONTH_SUPPLY: &[&str] = &["1", "30"];

/// Loads tier cost sharing. Rows for other coverage phases, or for fills
/// other than a one-month supply, are ignored when the file carries those
/// columns.
pub fn load_costs<R: Read>(
    source: R,
    config: &LoaderConfig,
    diagnostics: &mut Diagnostics,
) -> Result<HashMap<(PlanKey, Tier), CostEntry>, LoadError> {
    let aliases = &config.columns;
    let table = Table::open(source, TableKind::Cost, config.delimiter, aliases)?;
    for column in [Column::ContractId, Column::PlanId, Column::Tier] {
        table.headers().require(column, aliases)?;
    }

    if phase_filter_unavailable(table.headers(), config.coverage_phase) {
        tracing::warn!(
            "Cost file has no coverage-phase column; its rows count as initial coverage, \
             so the configured {} phase matches none of them",
            config.coverage_phase.as_str()
        );
    }

    let mut costs: HashMap<(PlanKey, Tier), CostEntry> = HashMap::new();
    table.for_each_row(diagnostics, |headers, row| {
        let key = plan_key(headers, row)?;
        let tier = tier(headers, row)?;

        let phase = match headers.raw(row, Column::CoveragePhase) {
            Some(raw) => {
                CoveragePhase::parse(raw).ok_or_else(|| invalid(Column::CoveragePhase, raw))?
            }
            None => CoveragePhase::Initial,
        };
        if phase != config.coverage_phase {
            return Ok(());
        }
        if let Some(days) = headers.text(row, Column::DaysSupply) {
            if !ONE_MONTH_SUPPLY.contains(&days) {
                return Ok(());
            }
        }

        let amount = |column| -> Result<(f64, bool), SkipReason> {
            let raw = headers.raw(row, column).unwrap_or("");
            let value = parse_amount(raw).ok_or_else(|| invalid(column, raw))?;
            Ok((value, raw.ends_with('%')))
        };
        let (retail_preferred, pct_a) = amount(Column::RetailPreferredCost)?;
        let (retail_standard, pct_b) = amount(Column::RetailStandardCost)?;
        let (mail_order, pct_c) = amount(Column::MailOrderCost)?;

        let cost_type = match headers.text(row, Column::CostType) {
            Some(raw) => CostType::parse(raw).ok_or_else(|| invalid(Column::CostType, raw))?,
            None if pct_a || pct_b || pct_c => CostType::Coinsurance,
            None => CostType::Copay,
        };

        let entry_key = (key.clone(), tier);
        if costs.contains_key(&entry_key) {
            return Err(SkipReason::Duplicate);
        }
        costs.insert(
            entry_key,
            CostEntry {
                plan: key,
                tier,
                phase,
                cost_type,
                retail_preferred: as_percent(cost_type, retail_preferred, pct_a),
                retail_standard: as_percent(cost_type, retail_standard, pct_b),
                mail_order: as_percent(cost_type, mail_order, pct_c),
            },
        );
        Ok(())
    })?;

    tracing::info!("Loaded {} cost-sharing rows", costs.len());
    Ok(costs)
}

// Rows without a phase column are read as initial coverage.
fn phase_filter_unavailable(headers: &HeaderMap, wanted: CoveragePhase) -> bool {
    !headers.has(Column::CoveragePhase) && wanted != CoveragePhase::Initial
}

// Coinsurance shows up both as a fraction (0.25) and as a percent (25).
// A value written with a `%` sign is already a percent.
fn as_percent(cost_type: CostType, value: f64, explicit_percent: bool) -> f64 {
    if cost_type == CostType::Coinsurance && !explicit_percent && value > 0.0 && value <= 1.0 {
        value * 100.0
    } else {
        value
    }
}

pub fn load_reference_tables<P: Read, F: Read, C: Read>(
    plan_info: P,
    formulary: F,
    cost: C,
    catalog: &ProductCatalog,
    config: &LoaderConfig,
    diagnostics: &mut Diagnostics,
) -> Result<ReferenceTables, LoadError> {
    let plans = load_plans(plan_info, config, diagnostics)?;
    let formulary = load_formulary(formulary, &plans, catalog, config, diagnostics)?;
    let costs = load_costs(cost, config, diagnostics)?;

    let skipped = diagnostics.skipped_count();
    if skipped > 0 {
        tracing::warn!(
            "Skipped {} malformed rows (plan_info={}, formulary={}, cost={})",
            skipped,
            diagnostics.skipped_in(TableKind::PlanInfo),
            diagnostics.skipped_in(TableKind::Formulary),
            diagnostics.skipped_in(TableKind::Cost),
        );
    }

    Ok(ReferenceTables {
        plans,
        formulary,
        costs,
    })
}

fn open(path: &Path, table: TableKind) -> Result<File, LoadError> {
    File::open(path).map_err(|source| LoadError::Open {
        table,
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_from_files(
    files: &InputFiles,
    catalog: &ProductCatalog,
    config: &LoaderConfig,
    diagnostics: &mut Diagnostics,
) -> Result<ReferenceTables, LoadError> {
    tracing::info!("Reading plan information from {}", files.plan_info.display());
    tracing::info!("Reading formulary from {}", files.formulary.display());
    tracing::info!("Reading beneficiary cost from {}", files.cost.display());
    load_reference_tables(
        open(&files.plan_info, TableKind::PlanInfo)?,
        open(&files.formulary, TableKind::Formulary)?,
        open(&files.cost, TableKind::Cost)?,
        catalog,
        config,
        diagnostics,
    )
}
