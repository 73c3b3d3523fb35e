//! Settings commands.
//!
//! Settings are loaded from a TOML file, or from the defaults built into the
//! binary, and merged with environment variables prefixed with `BIDPREP__`.
//! For example, `BIDPREP__PIPELINE__MAX_CONCURRENT_BIDDERS=4` overrides
//! `pipeline.max_concurrent_bidders`.

use std::fs;
use std::path::Path;

use bidprep_common::settings::Settings;

use crate::error::CliError;

/// Load and merge settings with environment variables.
///
/// Without a file the built-in defaults are used.
pub(crate) fn load_and_merge_config(
    file: Option<&Path>,
    verbose: bool,
) -> Result<(Settings, String), CliError> {
    let settings = match file {
        Some(file) => {
            let content = fs::read_to_string(file)?;
            if verbose {
                log::info!("Loading settings from: {}", file.display());
            }
            Settings::from_toml(&content)
        }
        None => {
            if verbose {
                log::info!("Loading built-in settings");
            }
            Settings::new()
        }
    }
    .map_err(|e| CliError::Config(format!("Failed to parse and merge settings: {:?}", e)))?;

    let merged_toml = settings
        .to_canonical_toml()
        .map_err(|e| CliError::Config(format!("Failed to serialize merged settings: {e:?}")))?;

    Ok((settings, merged_toml))
}

/// Validate settings and print a summary.
pub fn validate(file: Option<&Path>, verbose: bool) -> Result<(), CliError> {
    let (settings, merged_toml) = load_and_merge_config(file, verbose)?;

    println!("Settings are valid");
    if let Some(file) = file {
        println!("  File: {}", file.display());
    }
    println!(
        "  Max concurrent bidders: {}",
        settings.pipeline.max_concurrent_bidders
    );
    println!("  Eid partners: {}", settings.eids.partners.len());

    if verbose {
        let value: toml::Value = toml::from_str(&merged_toml)?;
        if let Some(table) = value.as_table() {
            println!("\nSections found:");
            for key in table.keys() {
                println!("  - [{}]", key);
            }
        }

        println!("\nMerged settings:");
        println!("---");
        println!("{}", merged_toml);
    }

    Ok(())
}
