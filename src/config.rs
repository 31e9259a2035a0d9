//! TOML configuration for [`MarkovOptions`].
//!
//! ```toml
//! [model]
//! epsilon = 1e-5
//! vertex_proportion = 0.5
//! aborted_time_policy = "exclude"
//! max_fixed_point_iterations = 1000
//! fixed_point_tolerance = 1e-9
//! vertex_limit = 4096
//! ```
//!
//! Every key is optional; missing keys keep their defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::model::{AbortedTimePolicy, MarkovOptions};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    model: ModelSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModelSection {
    epsilon: Option<f64>,
    vertex_proportion: Option<f64>,
    aborted_time_policy: Option<AbortedTimePolicy>,
    max_fixed_point_iterations: Option<usize>,
    fixed_point_tolerance: Option<f64>,
    vertex_limit: Option<usize>,
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read model config {path}: {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The file is not valid TOML for the expected layout.
    #[error("failed to parse model config: {source}")]
    Parse {
        /// Underlying TOML failure.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Offending key.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Reads options from a TOML file.
pub fn load_options(path: impl AsRef<Path>) -> Result<MarkovOptions, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_options(&contents)
}

/// Parses options from TOML text.
pub fn parse_options(contents: &str) -> Result<MarkovOptions, ConfigError> {
    let raw: RawConfig =
        toml::from_str(contents).map_err(|source| ConfigError::Parse { source })?;
    convert_model(raw.model)
}

fn convert_model(raw: ModelSection) -> Result<MarkovOptions, ConfigError> {
    let mut options = MarkovOptions::default();
    if let Some(epsilon) = raw.epsilon {
        options = options.epsilon(positive("epsilon", epsilon)?);
    }
    if let Some(proportion) = raw.vertex_proportion {
        if !(0.0..=1.0).contains(&proportion) {
            return Err(ConfigError::Invalid {
                field: "vertex_proportion",
                reason: format!("{proportion} is outside [0, 1]"),
            });
        }
        options = options.vertex_proportion(proportion);
    }
    if let Some(policy) = raw.aborted_time_policy {
        options = options.aborted_time_policy(policy);
    }
    if let Some(iterations) = raw.max_fixed_point_iterations {
        if iterations == 0 {
            return Err(ConfigError::Invalid {
                field: "max_fixed_point_iterations",
                reason: "must be at least 1".into(),
            });
        }
        options = options.max_fixed_point_iterations(iterations);
    }
    if let Some(tolerance) = raw.fixed_point_tolerance {
        options = options.fixed_point_tolerance(positive("fixed_point_tolerance", tolerance)?);
    }
    if let Some(limit) = raw.vertex_limit {
        options = options.vertex_limit(limit);
    }
    Ok(options)
}

fn positive(field: &'static str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("{value} is not a positive number"),
        })
    }
}
