//! Engine configuration, loadable from TOML.
//!
//! ```toml
//! max_generation_size = 4096
//! parse_budget = 200000
//! alternative_strategy = "random"
//! repeat_strategy = "min"
//! seed = 42
//! ```

use crate::error::DomainError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default ceiling, in bytes, for open-ended leaf sizes.
pub const MAX_GENERATION_SIZE: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlternativeStrategy {
    /// First child (in declaration order) that specializes.
    #[default]
    First,
    /// Children tried in a random order; first success wins.
    Random,
    /// Every child that specializes yields paths.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatStrategy {
    Min,
    Max,
    #[default]
    Random,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bytes.
    pub max_generation_size: usize,
    pub parse_budget: u64,
    pub specialize_budget: u64,
    /// Ceiling for unbounded repeats when generating.
    pub max_repeat: usize,
    pub max_specialized_paths: usize,
    pub alternative_strategy: AlternativeStrategy,
    pub repeat_strategy: RepeatStrategy,
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_generation_size: MAX_GENERATION_SIZE,
            parse_budget: 1_000_000,
            specialize_budget: 100_000,
            max_repeat: 1000,
            max_specialized_paths: 16,
            alternative_strategy: AlternativeStrategy::default(),
            repeat_strategy: RepeatStrategy::default(),
            seed: None,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, DomainError> {
        toml::from_str(s).map_err(|e| DomainError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, DomainError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Open-ended size ceiling in bits.
    pub fn max_generation_bits(&self) -> usize {
        self.max_generation_size.saturating_mul(8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str("parse_budget = 10\nrepeat_strategy = \"max\"\n").expect("config");
        assert_eq!(config.parse_budget, 10);
        assert_eq!(config.repeat_strategy, RepeatStrategy::Max);
        assert_eq!(config.max_generation_size, MAX_GENERATION_SIZE);
        assert_eq!(config.alternative_strategy, AlternativeStrategy::First);
    }

    #[test]
    fn unknown_strategy_is_config_error() {
        let err = EngineConfig::from_toml_str("alternative_strategy = \"widest\"").unwrap_err();
        assert!(matches!(err, DomainError::Config(_)));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "seed = 7\nmax_repeat = 3").expect("write");
        let config = EngineConfig::load(file.path()).expect("load");
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.max_repeat, 3);
    }
}
