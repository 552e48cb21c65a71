use ado_export_core::config::ExportSettings;
use anyhow::Result;
use std::fs;
use std::path::Path;
use tracing::{error, info};

/// Loads the optional YAML settings file. Absent sections and keys keep their defaults;
/// the result is validated before it is returned.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ExportSettings> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading settings from file");

    let content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Settings file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read settings file");
            return Err(anyhow::anyhow!("Failed to read settings file {:?}: {}", path_ref, e));
        }
    };

    let settings = parse_settings(&content)?;
    info!(config_path = ?path_ref, "Settings loaded successfully");
    Ok(settings)
}

/// Parses and validates settings YAML. An empty document yields the defaults.
pub fn parse_settings(content: &str) -> Result<ExportSettings> {
    let settings: ExportSettings = if content.trim().is_empty() {
        ExportSettings::default()
    } else {
        match serde_yaml::from_str(content) {
            Ok(settings) => settings,
            Err(e) => {
                error!(error = ?e, "Failed to parse settings YAML");
                return Err(anyhow::anyhow!("Failed to parse settings YAML: {e}"));
            }
        }
    };

    if let Err(reason) = settings.validate() {
        error!(%reason, "Invalid settings");
        anyhow::bail!("Invalid settings: {reason}");
    }
    settings.trace_loaded();
    Ok(settings)
}
