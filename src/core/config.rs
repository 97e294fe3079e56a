//! Workspace configuration loaded from `.prospectus/config.toml`.

use crate::core::error::ProspectusError;
use crate::core::store::PROJECT_DIR_NAME;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProspectusConfig {
    /// Actor recorded in the audit log for CLI operations.
    pub actor: String,
    /// Currency code used when formatting monetary inputs.
    pub currency: String,
    /// Reject generation from templates still in `draft` status.
    pub require_approved_templates: bool,
}

impl Default for ProspectusConfig {
    fn default() -> Self {
        Self {
            actor: "prospectus".to_string(),
            currency: "AED".to_string(),
            require_approved_templates: false,
        }
    }
}

/// Load config from `<project>/.prospectus/config.toml`.
/// Accepts either the project root or the `.prospectus` directory itself.
pub fn load_config(dir: &Path) -> Result<ProspectusConfig, ProspectusError> {
    let candidates = [
        dir.join(PROJECT_DIR_NAME).join(CONFIG_FILE_NAME),
        dir.join(CONFIG_FILE_NAME),
    ];
    for config_path in candidates {
        if config_path.exists() {
            let content = fs::read_to_string(&config_path).map_err(ProspectusError::IoError)?;
            let config: ProspectusConfig = toml::from_str(&content)?;
            if config.currency.trim().is_empty() {
                return Err(ProspectusError::ValidationError(
                    "config: currency must not be empty".to_string(),
                ));
            }
            return Ok(config);
        }
    }

    // No config file means defaults.
    Ok(ProspectusConfig::default())
}

/// Write the default config for a freshly initialized project.
pub fn write_default_config(project_root: &Path) -> Result<(), ProspectusError> {
    let dir = project_root.join(PROJECT_DIR_NAME);
    fs::create_dir_all(&dir).map_err(ProspectusError::IoError)?;
    let path = dir.join(CONFIG_FILE_NAME);
    if path.exists() {
        return Ok(());
    }
    let body = toml::to_string_pretty(&ProspectusConfig::default())
        .map_err(|e| ProspectusError::ValidationError(e.to_string()))?;
    fs::write(&path, body).map_err(ProspectusError::IoError)?;
    Ok(())
}
