use std::collections::HashMap;

use config::{Config, Environment, File, FileFormat};
use error_stack::{Report, ResultExt};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::PipelineError;

pub const ENVIRONMENT_VARIABLE_PREFIX: &str = "BIDPREP";
pub const ENVIRONMENT_VARIABLE_SEPARATOR: &str = "__";

const DEFAULT_SETTINGS_TOML: &str = include_str!("../../../bidprep.toml");

/// Per-auction pipeline behaviour.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PipelineSettings {
    /// Log per-bidder warnings at info level as well as returning them.
    #[serde(default)]
    pub debug: bool,

    /// Upper bound on bidder branches running at once.
    #[serde(default = "default_max_concurrent_bidders")]
    #[validate(range(min = 1, max = 256))]
    pub max_concurrent_bidders: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            debug: false,
            max_concurrent_bidders: default_max_concurrent_bidders(),
        }
    }
}

fn default_max_concurrent_bidders() -> usize {
    16
}

/// One extended-identifier source a request may carry through to bidders.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
pub struct EidPartner {
    #[validate(length(min = 1))]
    pub source: String,
    /// Expected `rtiPartner` of the source's first uid.
    #[validate(length(min = 1))]
    pub rti_partner: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct EidSettings {
    #[serde(default)]
    #[validate(nested)]
    pub partners: Vec<EidPartner>,
}

impl EidSettings {
    /// Partner table keyed by lowercased source.
    #[must_use]
    pub fn partner_table(&self) -> HashMap<String, String> {
        self.partners
            .iter()
            .map(|partner| {
                (
                    partner.source.to_ascii_lowercase(),
                    partner.rti_partner.clone(),
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct Settings {
    #[serde(default)]
    #[validate(nested)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    #[validate(nested)]
    pub eids: EidSettings,
}

impl Settings {
    /// Loads the settings embedded at build time.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Settings`] if the embedded TOML is invalid.
    pub fn new() -> Result<Self, Report<PipelineError>> {
        Self::from_toml(DEFAULT_SETTINGS_TOML)
    }

    /// Parses settings from TOML, layered with `BIDPREP__*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Settings`] if the TOML does not parse or the
    /// result fails validation.
    pub fn from_toml(toml_str: &str) -> Result<Self, Report<PipelineError>> {
        let environment = Environment::default()
            .prefix(ENVIRONMENT_VARIABLE_PREFIX)
            .separator(ENVIRONMENT_VARIABLE_SEPARATOR)
            .try_parsing(true);

        let toml = File::from_str(toml_str, FileFormat::Toml);
        let settings: Self = Config::builder()
            .add_source(toml)
            .add_source(environment)
            .build()
            .and_then(Config::try_deserialize)
            .change_context(PipelineError::Settings {
                message: "Failed to load settings".to_string(),
            })?;

        settings.validate().change_context(PipelineError::Settings {
            message: "Settings validation failed".to_string(),
        })?;

        Ok(settings)
    }

    /// Serializes the settings back to TOML.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Settings`] if serialization fails.
    pub fn to_canonical_toml(&self) -> Result<String, Report<PipelineError>> {
        toml::to_string_pretty(self).change_context(PipelineError::Settings {
            message: "Failed to serialize settings".to_string(),
        })
    }
}
