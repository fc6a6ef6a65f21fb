//! Config loading.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::Limits;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub limits: Limits,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 0 = warn, 1 = info, 2 = debug, 3+ = trace.
    pub verbosity: u8,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { verbosity: 1 }
    }
}

impl Config {
    /// Load from a JSON file; a missing file yields the defaults.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_survive_a_partial_config() {
        let config: Config = serde_json::from_str(r#"{"logging":{"verbosity":3}}"#).unwrap();
        assert_eq!(config.logging.verbosity, 3);
        assert_eq!(config.limits, Limits::default());
    }
}
