use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::resolver::BackendKind;

const BACKEND_ENV: &str = "REFPIN_BACKEND";
const USERNAME_ENV: &str = "REFPIN_REGISTRY_USERNAME";
const PASSWORD_ENV: &str = "REFPIN_REGISTRY_PASSWORD";

/// User configuration (`~/.config/refpin/config.toml`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Resolution backend: `daemon` or `registry`
    pub backend: Option<String>,
    #[serde(default)]
    pub registry: RegistrySettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrySettings {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Registry hosts spoken to over plain HTTP
    #[serde(default)]
    pub insecure: Vec<String>,
}

/// Read an environment variable, treating empty strings as if the variable is not set.
pub(crate) fn env_var_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".config").join("refpin").join("config.toml"))
    }

    /// Load the config file (if any) and apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env(env_var_non_empty);
        Ok(config)
    }

    /// Parse a config file; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config file at {}", path.display());
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    fn parse(contents: &str) -> Result<Self> {
        let mut unused_fields = Vec::new();
        let config: Config =
            serde_ignored::deserialize(toml::Deserializer::new(contents), |path| {
                unused_fields.push(path.to_string());
            })?;

        for field in &unused_fields {
            warn!("Unknown configuration field: {}", field);
        }
        Ok(config)
    }

    /// Override file values with non-empty environment variables
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(backend) = lookup(BACKEND_ENV) {
            self.backend = Some(backend);
        }
        if let Some(username) = lookup(USERNAME_ENV) {
            self.registry.username = Some(username);
        }
        if let Some(password) = lookup(PASSWORD_ENV) {
            self.registry.password = Some(password);
        }
    }

    /// Backend to resolve with, `override_backend` (from the command line) taking precedence
    pub fn get_backend(&self, override_backend: Option<&str>) -> Result<BackendKind> {
        match override_backend.or(self.backend.as_deref()) {
            Some(backend) => BackendKind::from_backend_str(backend),
            None => Ok(BackendKind::Registry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert!(config.backend.is_none());
        assert_eq!(config.get_backend(None).unwrap(), BackendKind::Registry);
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "backend = \"daemon\"\ncolour = \"blue\"\n\n[registry]\nusername = \"ci\"\npassword = \"hunter2\"\ninsecure = [\"localhost:5000\"]\n"
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.get_backend(None).unwrap(), BackendKind::Daemon);
        assert_eq!(config.registry.username.as_deref(), Some("ci"));
        assert_eq!(config.registry.insecure, vec!["localhost:5000"]);
    }

    #[test]
    fn test_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "backend = [").unwrap();
        let err = Config::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config::parse("backend = \"daemon\"\n").unwrap();
        let env: HashMap<&str, &str> = [
            (BACKEND_ENV, "registry"),
            (USERNAME_ENV, "robot"),
        ]
        .into_iter()
        .collect();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.backend.as_deref(), Some("registry"));
        assert_eq!(config.registry.username.as_deref(), Some("robot"));
        assert!(config.registry.password.is_none());
    }

    #[test]
    fn test_cli_overrides_config() {
        let config = Config::parse("backend = \"daemon\"\n").unwrap();
        assert_eq!(
            config.get_backend(Some("registry")).unwrap(),
            BackendKind::Registry
        );
        assert!(config.get_backend(Some("ftp")).is_err());
    }

    #[test]
    fn test_env_var_non_empty() {
        std::env::set_var("REFPIN_TEST_EMPTY_VAR", "");
        assert_eq!(env_var_non_empty("REFPIN_TEST_EMPTY_VAR"), None);
        std::env::remove_var("REFPIN_TEST_EMPTY_VAR");

        std::env::set_var("REFPIN_TEST_VALUE_VAR", "value");
        assert_eq!(
            env_var_non_empty("REFPIN_TEST_VALUE_VAR"),
            Some("value".to_string())
        );
        std::env::remove_var("REFPIN_TEST_VALUE_VAR");
    }
}
