use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

use csv::StringRecord;
use serde::{Deserialize, Serialize};

use crate::error::{LoadError, SkipReason, TableKind};

/// Canonical columns the loaders understand, independent of how a given file
/// vintage spells its headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    ContractId,
    PlanId,
    PlanName,
    PlanType,
    OrganizationName,
    FormularyId,
    Ndc,
    Tier,
    PriorAuth,
    StepTherapy,
    QuantityLimit,
    QuantityLimitAmount,
    QuantityLimitDays,
    CoveragePhase,
    DaysSupply,
    CostType,
    RetailPreferredCost,
    RetailStandardCost,
    MailOrderCost,
    Product,
    Molecule,
    Indication,
    Manufacturer,
}

impl Column {
    pub const ALL: [Column; 23] = [
        Column::ContractId,
        Column::PlanId,
        Column::PlanName,
        Column::PlanType,
        Column::OrganizationName,
        Column::FormularyId,
        Column::Ndc,
        Column::Tier,
        Column::PriorAuth,
        Column::StepTherapy,
        Column::QuantityLimit,
        Column::QuantityLimitAmount,
        Column::QuantityLimitDays,
        Column::CoveragePhase,
        Column::DaysSupply,
        Column::CostType,
        Column::RetailPreferredCost,
        Column::RetailStandardCost,
        Column::MailOrderCost,
        Column::Product,
        Column::Molecule,
        Column::Indication,
        Column::Manufacturer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Column::ContractId => "contract_id",
            Column::PlanId => "plan_id",
            Column::PlanName => "plan_name",
            Column::PlanType => "plan_type",
            Column::OrganizationName => "organization_name",
            Column::FormularyId => "formulary_id",
            Column::Ndc => "ndc",
            Column::Tier => "tier",
            Column::PriorAuth => "prior_auth",
            Column::StepTherapy => "step_therapy",
            Column::QuantityLimit => "quantity_limit",
            Column::QuantityLimitAmount => "quantity_limit_amount",
            Column::QuantityLimitDays => "quantity_limit_days",
            Column::CoveragePhase => "coverage_phase",
            Column::DaysSupply => "days_supply",
            Column::CostType => "cost_type",
            Column::RetailPreferredCost => "retail_preferred_cost",
            Column::RetailStandardCost => "retail_standard_cost",
            Column::MailOrderCost => "mail_order_cost",
            Column::Product => "product",
            Column::Molecule => "molecule",
            Column::Indication => "indication",
            Column::Manufacturer => "manufacturer",
        }
    }

    // Header spellings seen across the CMS public use file releases and the
    // flattened extracts built from them. Matched case-insensitively.
    fn builtin_aliases(self) -> &'static [&'static str] {
        match self {
            Column::ContractId => &["contract_id", "contract id", "contractid", "contract_number"],
            Column::PlanId => &["plan_id", "plan id", "planid", "pbp_id", "pbp"],
            Column::PlanName => &["plan_name", "plan name", "pbp_name"],
            Column::PlanType => &["plan_type", "plan type", "plan_category"],
            Column::OrganizationName => &[
                "organization_name",
                "organization name",
                "org_name",
                "parent_organization",
                "contract_name",
            ],
            Column::FormularyId => &["formulary_id", "formulary id", "formularyid"],
            Column::Ndc => &["ndc", "ndc_code", "ndc11", "ndc_11"],
            Column::Tier => &["tier", "tier_level_value", "tier_level", "tier_id"],
            Column::PriorAuth => &[
                "prior_authorization",
                "prior_authorization_yn",
                "prior_auth",
                "pa",
            ],
            Column::StepTherapy => &["step_therapy", "step_therapy_yn", "st"],
            Column::QuantityLimit => &["quantity_limit", "quantity_limit_yn", "ql"],
            Column::QuantityLimitAmount => &["quantity_limit_amount", "ql_amount"],
            Column::QuantityLimitDays => &["quantity_limit_days", "ql_days"],
            Column::CoveragePhase => &["coverage_phase", "coverage_level"],
            Column::DaysSupply => &["days_supply", "days supply"],
            Column::CostType => &["cost_type", "cost_type_pref"],
            Column::RetailPreferredCost => &["retail_preferred_cost", "cost_amt_pref"],
            Column::RetailStandardCost => &["retail_standard_cost", "cost_amt_nonpref"],
            Column::MailOrderCost => &["mail_order_cost", "cost_amt_mail_pref"],
            Column::Product => &["product", "product_name", "brand_name", "drug_name"],
            Column::Molecule => &["molecule", "ingredient", "generic_name"],
            Column::Indication => &["indication"],
            Column::Manufacturer => &["manufacturer", "labeler"],
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explicit header-name alias table, passed into every loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnAliases {
    map: BTreeMap<Column, Vec<String>>,
}

impl Default for ColumnAliases {
    fn default() -> Self {
        let map = Column::ALL
            .iter()
            .map(|column| {
                let names = column
                    .builtin_aliases()
                    .iter()
                    .map(|name| normalize_header(name))
                    .collect();
                (*column, names)
            })
            .collect();
        Self { map }
    }
}

impl ColumnAliases {
    /// Adds user-supplied spellings ahead of the built-in ones.
    pub fn extend(&mut self, overrides: &BTreeMap<Column, Vec<String>>) {
        for (column, names) in overrides {
            let entry = self.map.entry(*column).or_default();
            let mut merged: Vec<String> = names.iter().map(|n| normalize_header(n)).collect();
            for existing in entry.drain(..) {
                if !merged.contains(&existing) {
                    merged.push(existing);
                }
            }
            *entry = merged;
        }
    }

    pub fn with_overrides(overrides: &BTreeMap<Column, Vec<String>>) -> Self {
        let mut aliases = Self::default();
        aliases.extend(overrides);
        aliases
    }

    pub fn accepted(&self, column: Column) -> &[String] {
        self.map.get(&column).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}').trim().to_ascii_lowercase()
}

/// Column positions resolved from one table's header row.
#[derive(Debug, Clone)]
pub struct HeaderMap {
    table: TableKind,
    indices: HashMap<Column, usize>,
}

impl HeaderMap {
    pub fn resolve(table: TableKind, headers: &StringRecord, aliases: &ColumnAliases) -> Self {
        let normalized: Vec<String> = headers.iter().map(normalize_header).collect();
        let mut indices = HashMap::new();
        for column in Column::ALL {
            // Alias order decides between two headers that both match.
            let found = aliases.accepted(column).iter().find_map(|alias| {
                normalized.iter().position(|header| header == alias)
            });
            if let Some(idx) = found {
                indices.insert(column, idx);
            }
        }
        Self { table, indices }
    }

    pub fn has(&self, column: Column) -> bool {
        self.indices.contains_key(&column)
    }

    pub fn require(&self, column: Column, aliases: &ColumnAliases) -> Result<usize, LoadError> {
        self.indices
            .get(&column)
            .copied()
            .ok_or_else(|| missing_column(self.table, column, aliases))
    }

    /// Trimmed cell value; `None` when the column is absent or the cell is blank.
    pub fn text<'r>(&self, record: &'r StringRecord, column: Column) -> Option<&'r str> {
        let idx = *self.indices.get(&column)?;
        record.get(idx).map(str::trim).filter(|v| !v.is_empty())
    }

    /// Trimmed cell value, blank allowed; `None` only when the column is absent
    /// or the row is too short to reach it.
    pub fn raw<'r>(&self, record: &'r StringRecord, column: Column) -> Option<&'r str> {
        let idx = *self.indices.get(&column)?;
        record.get(idx).map(str::trim)
    }

    pub fn required<'r>(
        &self,
        record: &'r StringRecord,
        column: Column,
    ) -> Result<&'r str, SkipReason> {
        self.text(record, column)
            .ok_or(SkipReason::MissingField { column })
    }
}

pub fn missing_column(table: TableKind, column: Column, aliases: &ColumnAliases) -> LoadError {
    LoadError::MissingColumn {
        table,
        column,
        accepted: aliases.accepted(column).join(", "),
    }
}
