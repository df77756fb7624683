use std::{fmt, path::PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::columns::Column;

/// Which input table a diagnostic or failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    PlanInfo,
    Formulary,
    Cost,
    Catalog,
}

impl TableKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TableKind::PlanInfo => "plan_info",
            TableKind::Formulary => "formulary",
            TableKind::Cost => "cost",
            TableKind::Catalog => "catalog",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural input problems. These abort the run.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{table} table is missing required column `{column}` (accepted headers: {accepted})")]
    MissingColumn {
        table: TableKind,
        column: Column,
        accepted: String,
    },

    #[error("{table} table is empty (no header row)")]
    EmptyTable { table: TableKind },

    #[error("failed opening {table} table {}", path.display())]
    Open {
        table: TableKind,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed reading {table} table")]
    Io {
        table: TableKind,
        #[source]
        source: std::io::Error,
    },

    #[error("failed parsing {table} table")]
    Csv {
        table: TableKind,
        #[source]
        source: csv::Error,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("no coverage records matched any of the {products} catalog products")]
    NoCoverage { products: usize },
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed opening {}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed writing or reading delimited records")]
    Csv(#[from] csv::Error),

    #[error("failed encoding or decoding JSON")]
    Json(#[from] serde_json::Error),

    #[error("failed writing output")]
    Io(#[from] std::io::Error),
}

/// Why a row was dropped. Row problems never abort a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    MissingField { column: Column },
    InvalidValue { column: Column, value: String },
    Duplicate,
    UnknownPlan { plan: String },
    UnknownFormulary { formulary_id: String },
    AmbiguousNdc { ndc: String },
    Unreadable { message: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingField { column } => write!(f, "missing value for `{column}`"),
            SkipReason::InvalidValue { column, value } => {
                write!(f, "unparseable `{column}` value {value:?}")
            }
            SkipReason::Duplicate => f.write_str("duplicate key"),
            SkipReason::UnknownPlan { plan } => write!(f, "plan {plan} not in plan table"),
            SkipReason::UnknownFormulary { formulary_id } => {
                write!(f, "formulary {formulary_id} not used by any plan")
            }
            SkipReason::AmbiguousNdc { ndc } => {
                write!(f, "NDC {ndc} maps to more than one product")
            }
            SkipReason::Unreadable { message } => write!(f, "unreadable row: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowSkipped {
    pub table: TableKind,
    /// 1-based source line, when the row came straight from a file.
    pub line: Option<u64>,
    pub reason: SkipReason,
}

/// A coverage record was produced without a matching cost row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingCostData {
    pub plan: String,
    pub product: String,
    pub tier: u8,
}

/// Non-fatal findings collected over one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    pub skipped: Vec<RowSkipped>,
    pub missing_cost: Vec<MissingCostData>,
}

impl Diagnostics {
    pub fn skip(&mut self, table: TableKind, line: Option<u64>, reason: SkipReason) {
        tracing::debug!(
            "skipping {table} row{}: {reason}",
            line.map(|l| format!(" at line {l}")).unwrap_or_default()
        );
        self.skipped.push(RowSkipped {
            table,
            line,
            reason,
        });
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn skipped_in(&self, table: TableKind) -> usize {
        self.skipped.iter().filter(|s| s.table == table).count()
    }
}
