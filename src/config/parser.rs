//! Configuration parser for loading `driftguard.yaml`.
//!
//! This module handles loading configuration from YAML files, `.env` files
//! and `DRIFTGUARD_*` environment variables, with file values overridden by
//! the environment.

use crate::error::{ConfigError, DriftError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::{EngineConfig, NotificationConfig};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "DRIFTGUARD_CONFIG";

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["driftguard.yaml", "driftguard.yml"];

/// Configuration parser for loading engine configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving `.env` and relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<EngineConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(DriftError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            DriftError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, origin: Option<&Path>) -> Result<EngineConfig> {
        debug!("Parsing YAML configuration");

        let config: EngineConfig = serde_yaml::from_str(content).map_err(|e| {
            DriftError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: origin.map(|p| p.display().to_string()),
            })
        })?;

        debug!("Parsed configuration for project: {}", config.project.name);
        Ok(config)
    }

    /// Loads configuration with `DRIFTGUARD_*` environment overrides applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<EngineConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_overrides(&mut config, |name| std::env::var(name).ok());
        Ok(config)
    }

    /// Applies overrides from a variable lookup.
    ///
    /// Recognized variables: `DRIFTGUARD_PROJECT_NAME`,
    /// `DRIFTGUARD_ENVIRONMENT`, `DRIFTGUARD_STATE_PATH` and
    /// `DRIFTGUARD_WEBHOOK_URL`.
    pub fn apply_overrides(config: &mut EngineConfig, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(name) = lookup("DRIFTGUARD_PROJECT_NAME") {
            debug!("Overriding project.name from environment");
            config.project.name = name;
        }

        if let Some(environment) = lookup("DRIFTGUARD_ENVIRONMENT") {
            debug!("Overriding project.environment from environment");
            config.project.environment = environment;
        }

        if let Some(path) = lookup("DRIFTGUARD_STATE_PATH") {
            debug!("Overriding state.path from environment");
            config.state.path = path;
        }

        if let Some(url) = lookup("DRIFTGUARD_WEBHOOK_URL") {
            debug!("Overriding notifications.webhook_url from environment");
            match config.notifications.as_mut() {
                Some(notifications) => notifications.webhook_url = url,
                None => config.notifications = Some(NotificationConfig::new(url)),
            }
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                DriftError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Resolves a path from the config relative to the base path.
    #[must_use]
    pub fn resolve(&self, path: &str) -> PathBuf {
        let candidate = PathBuf::from(path);
        match &self.base_path {
            Some(base) if candidate.is_relative() => base.join(candidate),
            _ => candidate,
        }
    }
}

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(DriftError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InspectorBackend, StateSource};
    use crate::planner::ActionKind;
    use crate::declared::TrackedField;
    use std::collections::HashMap;

    const MINIMAL: &str = r"
project:
  name: shop
state:
  source: manifest
  path: declared.yaml
";

    #[test]
    fn test_parse_minimal_config() {
        let config = ConfigParser::new().parse_yaml(MINIMAL, None).unwrap();

        assert_eq!(config.project.name, "shop");
        assert_eq!(config.project.environment, "dev");
        assert_eq!(config.state.source, StateSource::Manifest);
        assert_eq!(config.inspector.backend, InspectorBackend::Docker);
        assert_eq!(config.inspector.concurrency, 8);
        assert_eq!(config.tracking.fields, TrackedField::ALL.to_vec());
        assert_eq!(config.remediation.retry.max_attempts, 3);
        assert!(config.notifications.is_none());
        assert!(config.workspace.max_report_age_days.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
project:
  name: iac-drift-detection
  environment: production
state:
  source: terraform
  path: terraform/
inspector:
  backend: snapshot
  snapshot_path: observed.yaml
  query_timeout_secs: 5
tracking:
  fields: [running, ports, image]
  port_tolerance: 1
remediation:
  provisioner:
    backend: command
    program: ./apply.sh
    args: ["--env", "prod"]
  retry:
    max_attempts: 5
  policy:
    on_extra: ignore
    manual_only:
      ids: [db-main]
      types: [database]
schedule:
  interval_secs: 300
  remediate: true
workspace:
  keep_reports: 50
  max_report_age_days: 30
notifications:
  webhook_url: "https://hooks.example.com/T000"
  always_notify: true
"#;
        let config = ConfigParser::new().parse_yaml(yaml, None).unwrap();

        assert_eq!(config.state.source, StateSource::Terraform);
        assert_eq!(config.tracking.fields.len(), 3);
        assert_eq!(config.tracking.port_tolerance, 1);
        assert_eq!(config.remediation.retry.max_attempts, 5);
        assert_eq!(config.remediation.retry.base_delay_ms, 1000);
        assert_eq!(config.remediation.policy.on_missing, ActionKind::Recreate);
        assert_eq!(config.remediation.policy.manual_only.ids, vec!["db-main"]);
        assert!(config.schedule.remediate);
        assert_eq!(config.workspace.keep_reports, 50);
        assert_eq!(config.workspace.max_report_age_days, Some(30));
        assert!(config.notifications.unwrap().always_notify);
    }

    #[test]
    fn test_invalid_yaml_reports_location() {
        let err = ConfigParser::new()
            .parse_yaml("project: [", Some(Path::new("driftguard.yaml")))
            .unwrap_err();
        match err {
            DriftError::Config(ConfigError::ParseError { location, .. }) => {
                assert_eq!(location.as_deref(), Some("driftguard.yaml"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ConfigParser::new().parse_yaml(MINIMAL, None).unwrap();
        let vars: HashMap<&str, &str> = [
            ("DRIFTGUARD_ENVIRONMENT", "staging"),
            ("DRIFTGUARD_WEBHOOK_URL", "https://hooks.example.com/x"),
        ]
        .into_iter()
        .collect();

        ConfigParser::apply_overrides(&mut config, |k| vars.get(k).map(|v| (*v).to_string()));

        assert_eq!(config.project.environment, "staging");
        assert_eq!(config.project.name, "shop");
        let notifications = config.notifications.unwrap();
        assert_eq!(notifications.webhook_url, "https://hooks.example.com/x");
        assert_eq!(notifications.timeout_secs, 10);
    }

    #[test]
    fn test_find_config_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("driftguard.yaml"), MINIMAL).unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("driftguard.yaml"));
    }

    #[test]
    fn test_resolve_relative_to_base() {
        let parser = ConfigParser::new().with_base_path("/srv/infra");
        assert_eq!(parser.resolve("state.json"), PathBuf::from("/srv/infra/state.json"));
        assert_eq!(parser.resolve("/abs/state.json"), PathBuf::from("/abs/state.json"));
    }

    #[test]
    fn test_init_template_is_valid() {
        let template = include_str!("../../templates/driftguard.yaml");
        let config = ConfigParser::new().parse_yaml(template, None).unwrap();

        assert_eq!(config.state.source, StateSource::Terraform);
        assert!(config.notifications.is_none());
        assert!(crate::config::ConfigValidator::new().check(&config).errors.is_empty());
    }
}
