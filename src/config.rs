//! Builder configuration, persisted as TOML.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::concept::{CharacteristicType, ConceptId, well_known};
use crate::error::ConfigError;

/// Result type for configuration loading.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Which characteristic types a builder loads and accepts from change-sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuilderMode {
    /// Classifier input: stated facts only.
    Classification,
    /// Change processing: stated, inferred and additional facts.
    #[default]
    ChangeProcessing,
}

impl BuilderMode {
    /// Characteristic types whose relationships and members are kept.
    pub fn allowed_characteristics(self) -> &'static [CharacteristicType] {
        match self {
            BuilderMode::Classification => &[CharacteristicType::Stated],
            BuilderMode::ChangeProcessing => &CharacteristicType::ALL,
        }
    }

    /// Whether facts of `characteristic` are kept in this mode.
    pub fn allows(self, characteristic: CharacteristicType) -> bool {
        self.allowed_characteristics().contains(&characteristic)
    }
}

impl std::fmt::Display for BuilderMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuilderMode::Classification => write!(f, "classification"),
            BuilderMode::ChangeProcessing => write!(f, "change-processing"),
        }
    }
}

/// Configuration shared by the parallel loader and the delta engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyConfig {
    /// Characteristic types to load.
    #[serde(default)]
    pub mode: BuilderMode,
    /// Rows per page when scrolling the read collaborator.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Loader pool size. `0` uses the number of logical CPUs.
    #[serde(default)]
    pub max_workers: usize,
    /// Relationship type routed into the IS-A partitions.
    #[serde(default = "default_is_a_type_id")]
    pub is_a_type_id: u64,
    /// Modifier id marking universal restrictions.
    #[serde(default = "default_universal_modifier_id")]
    pub universal_modifier_id: u64,
    /// Load and track concrete-domain members.
    #[serde(default = "default_true")]
    pub concrete_domains: bool,
    /// Accept additional members attached to statements in every mode.
    #[serde(default = "default_true")]
    pub additional_statement_concrete_domains: bool,
    /// Scan for IS-A cycles after each initial build.
    #[serde(default)]
    pub detect_cycles: bool,
    /// Fetch preferred terms alongside the facts.
    #[serde(default)]
    pub preferred_terms: bool,
}

fn default_page_size() -> usize {
    50_000
}
fn default_is_a_type_id() -> u64 {
    well_known::IS_A
}
fn default_universal_modifier_id() -> u64 {
    well_known::UNIVERSAL_RESTRICTION_MODIFIER
}
fn default_true() -> bool {
    true
}

impl Default for TaxonomyConfig {
    fn default() -> Self {
        Self {
            mode: BuilderMode::default(),
            page_size: default_page_size(),
            max_workers: 0,
            is_a_type_id: default_is_a_type_id(),
            universal_modifier_id: default_universal_modifier_id(),
            concrete_domains: true,
            additional_statement_concrete_domains: true,
            detect_cycles: false,
            preferred_terms: false,
        }
    }
}

impl TaxonomyConfig {
    /// A config for the given mode, other fields default.
    pub fn with_mode(mode: BuilderMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// The IS-A type as a concept id.
    pub fn is_a_type(&self) -> ConceptId {
        ConceptId(self.is_a_type_id)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: TaxonomyConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&content)
    }

    /// Serialize to pretty TOML.
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// Reject values no build can run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.page_size == 0 {
            return Err(ConfigError::Invalid {
                message: "page_size must be at least 1".into(),
            });
        }
        if self.is_a_type_id == 0 {
            return Err(ConfigError::Invalid {
                message: "is_a_type_id must be a concept id".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_well_known_ids() {
        let config = TaxonomyConfig::default();
        assert_eq!(config.page_size, 50_000);
        assert_eq!(config.is_a_type(), ConceptId(well_known::IS_A));
        assert_eq!(config.mode, BuilderMode::ChangeProcessing);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = TaxonomyConfig::from_toml_str(
            r#"
            mode = "classification"
            page_size = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.mode, BuilderMode::Classification);
        assert_eq!(config.page_size, 1000);
        assert!(config.concrete_domains);
        assert_eq!(
            config.mode.allowed_characteristics(),
            &[CharacteristicType::Stated]
        );
    }

    #[test]
    fn zero_page_size_is_invalid() {
        let err = TaxonomyConfig::from_toml_str("page_size = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn unparsable_toml_is_parse_error() {
        let err = TaxonomyConfig::from_toml_str("mode = [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn toml_round_trip() {
        let config = TaxonomyConfig::with_mode(BuilderMode::Classification);
        let text = config.to_toml_string().unwrap();
        assert_eq!(TaxonomyConfig::from_toml_str(&text).unwrap(), config);
    }
}
