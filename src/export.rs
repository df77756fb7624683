use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{
    catalog::Indication,
    error::{Diagnostics, ExportError},
    loader::CostType,
    score::ScoredCoverage,
    summary::RunSummary,
};

/// One scored coverage record as written to the analysis files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRow {
    pub contract_id: String,
    pub plan_id: String,
    pub plan_name: String,
    pub plan_type: String,
    pub organization_name: String,
    pub product_name: String,
    pub molecule: String,
    pub indication: Indication,
    pub ndc: String,
    pub tier: u8,
    pub prior_auth: bool,
    pub step_therapy: bool,
    pub quantity_limit: bool,
    pub quantity_limit_amount: Option<f64>,
    pub quantity_limit_days: Option<u32>,
    pub cost_type: CostType,
    pub retail_preferred_cost: f64,
    pub retail_standard_cost: f64,
    pub mail_order_cost: f64,
    pub access_score: f64,
}

/// `(plan, product, tier, PA, ST, QL, score)` identity of an exported row.
pub type RecordKey = (String, String, u8, bool, bool, bool, f64);

impl ExportRow {
    pub fn key(&self) -> RecordKey {
        (
            format!("{}-{}", self.contract_id, self.plan_id),
            self.product_name.clone(),
            self.tier,
            self.prior_auth,
            self.step_therapy,
            self.quantity_limit,
            self.access_score,
        )
    }
}

impl From<&ScoredCoverage> for ExportRow {
    fn from(scored: &ScoredCoverage) -> Self {
        let r = &scored.record;
        Self {
            contract_id: r.plan.key.contract_id.clone(),
            plan_id: r.plan.key.plan_id.clone(),
            plan_name: r.plan.plan_name.clone(),
            plan_type: r.plan.plan_type.clone(),
            organization_name: r.plan.organization_name.clone(),
            product_name: r.product.name.clone(),
            molecule: r.product.molecule.clone(),
            indication: r.product.indication,
            ndc: r.ndc.to_string(),
            tier: r.tier.level(),
            prior_auth: r.prior_auth,
            step_therapy: r.step_therapy,
            quantity_limit: r.quantity_limit,
            quantity_limit_amount: r.quantity_limit_amount,
            quantity_limit_days: r.quantity_limit_days,
            cost_type: r.cost.cost_type,
            retail_preferred_cost: r.cost.retail_preferred,
            retail_standard_cost: r.cost.retail_standard,
            mail_order_cost: r.cost.mail_order,
            access_score: scored.access_score,
        }
    }
}

pub fn export_rows(records: &[ScoredCoverage]) -> Vec<ExportRow> {
    records.iter().map(ExportRow::from).collect()
}

fn create(path: &Path) -> Result<BufWriter<File>, ExportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| ExportError::Open {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    File::create(path)
        .map(BufWriter::new)
        .map_err(|source| ExportError::Open {
            path: path.to_path_buf(),
            source,
        })
}

fn open(path: &Path) -> Result<BufReader<File>, ExportError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| ExportError::Open {
            path: path.to_path_buf(),
            source,
        })
}

pub fn write_csv<W: Write>(sink: W, records: &[ScoredCoverage]) -> Result<(), ExportError> {
    let mut writer = csv::Writer::from_writer(sink);
    for scored in records {
        writer.serialize(ExportRow::from(scored))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_csv<R: Read>(source: R) -> Result<Vec<ExportRow>, ExportError> {
    let mut reader = csv::Reader::from_reader(source);
    let mut rows = Vec::new();
    for row in reader.deserialize::<ExportRow>() {
        rows.push(row?);
    }
    Ok(rows)
}

pub fn write_json_records<W: Write>(
    mut sink: W,
    records: &[ScoredCoverage],
) -> Result<(), ExportError> {
    serde_json::to_writer_pretty(&mut sink, &export_rows(records))?;
    sink.flush()?;
    Ok(())
}

pub fn read_json_records<R: Read>(source: R) -> Result<Vec<ExportRow>, ExportError> {
    Ok(serde_json::from_reader(source)?)
}

#[derive(Debug, Serialize)]
struct DiagnosticCounts {
    skipped_rows: usize,
    skipped_by_table: BTreeMap<String, usize>,
    missing_cost_records: usize,
}

#[derive(Debug, Serialize)]
struct SummaryDocument<'a> {
    #[serde(flatten)]
    summary: &'a RunSummary,
    diagnostics: DiagnosticCounts,
}

pub fn write_summary_json<W: Write>(
    mut sink: W,
    summary: &RunSummary,
    diagnostics: &Diagnostics,
) -> Result<(), ExportError> {
    let mut skipped_by_table: BTreeMap<String, usize> = BTreeMap::new();
    for skipped in &diagnostics.skipped {
        *skipped_by_table.entry(skipped.table.to_string()).or_default() += 1;
    }
    let document = SummaryDocument {
        summary,
        diagnostics: DiagnosticCounts {
            skipped_rows: diagnostics.skipped_count(),
            skipped_by_table,
            missing_cost_records: diagnostics.missing_cost.len(),
        },
    };
    serde_json::to_writer_pretty(&mut sink, &document)?;
    sink.flush()?;
    Ok(())
}

pub fn write_csv_file(path: &Path, records: &[ScoredCoverage]) -> Result<(), ExportError> {
    write_csv(create(path)?, records)
}

pub fn read_csv_file(path: &Path) -> Result<Vec<ExportRow>, ExportError> {
    read_csv(open(path)?)
}

pub fn write_json_records_file(path: &Path, records: &[ScoredCoverage]) -> Result<(), ExportError> {
    write_json_records(create(path)?, records)
}

pub fn read_json_records_file(path: &Path) -> Result<Vec<ExportRow>, ExportError> {
    read_json_records(open(path)?)
}

pub fn write_summary_json_file(
    path: &Path,
    summary: &RunSummary,
    diagnostics: &Diagnostics,
) -> Result<(), ExportError> {
    write_summary_json(create(path)?, summary, diagnostics)
}
