use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    columns::{Column, ColumnAliases},
    loader::{CoveragePhase, LoaderConfig, Pharmacy},
    pipeline::AnalysisConfig,
    score::{ScoringConfig, ScoringWeights},
    table::Delimiter,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed reading config {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Optional TOML run configuration. Every key may be omitted.
///
/// ```toml
/// delimiter = "pipe"
/// pharmacy = "mail_order"
/// coverage_phase = "initial"
/// catalog = "glp1_ndcs.csv"
///
/// [weights]
/// prior_auth_penalty = 25.0
///
/// [columns]
/// contract_id = ["CNTRCT"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub delimiter: Delimiter,
    pub pharmacy: Pharmacy,
    pub coverage_phase: CoveragePhase,
    /// NDC reference list replacing the built-in product catalog. Relative
    /// paths resolve against the config file's directory.
    pub catalog: Option<PathBuf>,
    pub weights: ScoringWeights,
    pub columns: BTreeMap<Column, Vec<String>>,
}

impl ConfigFile {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if let (Some(catalog), Some(base)) = (config.catalog.as_mut(), path.parent()) {
            if catalog.is_relative() {
                *catalog = base.join(&*catalog);
            }
        }
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn analysis_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            loader: LoaderConfig {
                delimiter: self.delimiter,
                columns: ColumnAliases::with_overrides(&self.columns),
                coverage_phase: self.coverage_phase,
            },
            scoring: ScoringConfig {
                weights: self.weights.clone(),
                pharmacy: self.pharmacy,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score::PA_PENALTY;

    #[test]
    fn empty_config_uses_defaults() {
        let config = ConfigFile::from_toml_str("").unwrap();
        assert_eq!(config, ConfigFile::default());
        assert_eq!(config.analysis_config().scoring, ScoringConfig::default());
    }

    #[test]
    fn parses_overrides() {
        let config = ConfigFile::from_toml_str(
            r#"
            delimiter = "comma"
            pharmacy = "mail_order"
            coverage_phase = "gap"

            [weights]
            prior_auth_penalty = 25.0
            copay_bands = [40.0, 80.0]

            [columns]
            contract_id = ["CNTRCT"]
            "#,
        )
        .unwrap();

        assert_eq!(config.delimiter, Delimiter::Comma);
        assert_eq!(config.pharmacy, Pharmacy::MailOrder);
        assert_eq!(config.coverage_phase, CoveragePhase::Gap);
        assert_eq!(config.weights.prior_auth_penalty, 25.0);
        assert_eq!(config.weights.copay_bands, [40.0, 80.0]);
        assert_ne!(config.weights.prior_auth_penalty, PA_PENALTY);
        assert_eq!(
            config.weights.step_therapy_penalty,
            ScoringWeights::default().step_therapy_penalty
        );

        let aliases = config.analysis_config().loader.columns;
        assert_eq!(aliases.accepted(Column::ContractId)[0], "cntrct");
        assert!(aliases.accepted(Column::ContractId).contains(&"contract_id".to_string()));
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(ConfigFile::from_toml_str("pharmacy_channel = \"mail\"").is_err());
        assert!(ConfigFile::from_toml_str("[columns]\nnot_a_column = [\"x\"]").is_err());
    }
}
