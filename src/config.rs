use std::fs;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

use crate::flow::FlowOptions;

const DEFAULT_RETURN_SCHEME: &str = "gadgetbridge";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read shim config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid return scheme {0:?}")]
    InvalidScheme(String),
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShimConfig {
    /// Scheme of the deep link external configuration sites return to.
    pub return_scheme: String,
    pub defer_show_configuration: bool,
    pub data_dir: Option<PathBuf>,
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            return_scheme: DEFAULT_RETURN_SCHEME.to_string(),
            defer_show_configuration: false,
            data_dir: None,
        }
    }
}

impl ShimConfig {
    /// Load from a YAML file; a missing path or file yields the defaults.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = match config_path {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path)?;
                serde_yaml::from_str(&contents)?
            }
            _ => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn flow_options(&self) -> FlowOptions {
        FlowOptions {
            defer_show_configuration: self.defer_show_configuration,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let scheme = self.return_scheme.as_str();
        let valid = scheme
            .chars()
            .next()
            .is_some_and(|first| first.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if valid {
            Ok(())
        } else {
            Err(ConfigError::InvalidScheme(self.return_scheme.clone()))
        }
    }
}
