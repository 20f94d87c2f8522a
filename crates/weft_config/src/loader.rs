//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::ProjectConfig;
use std::collections::BTreeSet;
use std::path::Path;

/// File name of the project configuration.
pub const CONFIG_FILE: &str = "weft.toml";

/// Loads and validates a `weft.toml` configuration from a project directory.
pub fn load_config(project_dir: &Path) -> Result<ProjectConfig, ConfigError> {
    let path = project_dir.join(CONFIG_FILE);
    let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read { path, source })?;
    load_config_from_str(&content)
}

/// Parses and validates a `weft.toml` configuration from a string.
pub fn load_config_from_str(content: &str) -> Result<ProjectConfig, ConfigError> {
    let config: ProjectConfig =
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates required fields and cross-field consistency.
pub fn validate_config(config: &ProjectConfig) -> Result<(), ConfigError> {
    if config.project.name.is_empty() {
        return Err(ConfigError::MissingField("project.name".to_string()));
    }
    if config.project.out_dir.is_empty() {
        return Err(ConfigError::MissingField("project.out_dir".to_string()));
    }
    if config.build.pending_timeout_ms == 0 {
        return Err(ConfigError::Invalid(
            "build.pending_timeout_ms must be positive".to_string(),
        ));
    }

    let lang = &config.language;
    let extensions = [
        ("source_extension", &lang.source_extension),
        ("base_extension", &lang.base_extension),
        ("binary_extension", &lang.binary_extension),
        ("grammar_extension", &lang.grammar_extension),
        ("transformation_extension", &lang.transformation_extension),
        ("editor_extension", &lang.editor_extension),
    ];
    let mut seen = BTreeSet::new();
    for (field, ext) in extensions {
        if ext.is_empty() {
            return Err(ConfigError::MissingField(format!("language.{field}")));
        }
        if ext == "model" || ext == "dep" {
            return Err(ConfigError::Invalid(format!(
                "language.{field} uses the reserved extension '{ext}'"
            )));
        }
        if !seen.insert(ext.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "language.{field} duplicates the extension '{ext}'"
            )));
        }
    }
    Ok(())
}
