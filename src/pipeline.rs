use std::io::Read;

use crate::{
    catalog::ProductCatalog,
    error::{Diagnostics, PipelineError},
    extract::extract_coverage,
    loader::{InputFiles, LoaderConfig, ReferenceTables, load_from_files, load_reference_tables},
    score::{ScoredCoverage, ScoringConfig, score_all},
    summary::{RunSummary, summarize},
};

#[derive(Debug, Clone, Default)]
pub struct AnalysisConfig {
    pub loader: LoaderConfig,
    pub scoring: ScoringConfig,
}

/// Output of one analysis run: scored records in extractor order, their
/// summary and every non-fatal finding along the way.
#[derive(Debug, Clone)]
pub struct AnalysisRun {
    pub records: Vec<ScoredCoverage>,
    pub summary: RunSummary,
    pub diagnostics: Diagnostics,
}

/// Extracts, scores and summarizes already loaded tables.
///
/// A run that yields no coverage at all fails with `NoCoverage`; that almost
/// always means the inputs are not the expected formulary files.
pub fn analyze(
    tables: &ReferenceTables,
    catalog: &ProductCatalog,
    scoring: &ScoringConfig,
    mut diagnostics: Diagnostics,
) -> Result<AnalysisRun, PipelineError> {
    let records = extract_coverage(tables, catalog, &mut diagnostics);
    if records.is_empty() {
        return Err(PipelineError::NoCoverage {
            products: catalog.len(),
        });
    }

    let records = score_all(records, scoring);
    let summary = summarize(&records, catalog);
    if let Some(avg) = summary.average_score {
        tracing::info!(
            "Scored {} records across {} plans (mean access score {avg:.1})",
            summary.total_records,
            summary.unique_plans
        );
    }
    Ok(AnalysisRun {
        records,
        summary,
        diagnostics,
    })
}

pub fn run_readers<P: Read, F: Read, C: Read>(
    plan_info: P,
    formulary: F,
    cost: C,
    catalog: &ProductCatalog,
    config: &AnalysisConfig,
) -> Result<AnalysisRun, PipelineError> {
    let mut diagnostics = Diagnostics::default();
    let tables = load_reference_tables(
        plan_info,
        formulary,
        cost,
        catalog,
        &config.loader,
        &mut diagnostics,
    )?;
    analyze(&tables, catalog, &config.scoring, diagnostics)
}

pub fn run_files(
    files: &InputFiles,
    catalog: &ProductCatalog,
    config: &AnalysisConfig,
) -> Result<AnalysisRun, PipelineError> {
    let mut diagnostics = Diagnostics::default();
    let tables = load_from_files(files, catalog, &config.loader, &mut diagnostics)?;
    analyze(&tables, catalog, &config.scoring, diagnostics)
}
