use std::path::{Path, PathBuf};

use aegis_common::config::SystemConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {detail}")]
    Parse { path: PathBuf, detail: String },
}

/// Load the system configuration.
///
/// A missing file is fine — built-in defaults apply. A file that exists
/// but does not parse is a fatal startup error; the gateway refuses to
/// start on a half-understood configuration.
pub fn load_system_config(path: &Path) -> Result<SystemConfig, ConfigError> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "No config file, using built-in defaults");
        return Ok(SystemConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: SystemConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;

    tracing::info!(path = %path.display(), "Configuration loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_system_config(Path::new("/nonexistent/gateway.toml")).unwrap();
        assert_eq!(config.cache.ttl_seconds, 3600);
    }

    #[test]
    fn test_malformed_file_is_fatal() {
        let path = std::env::temp_dir().join("aegis-bad-config.toml");
        std::fs::write(&path, "not [valid toml").unwrap();
        let err = load_system_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        std::fs::remove_file(&path).ok();
    }
}
