//! Configuration module for the drift engine.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `driftguard.yaml`
//! - Validation of configuration values
//! - Hashing declared state into generations and idempotency keys

mod spec;
mod parser;
mod validator;
mod hash;

pub use spec::{
    EngineConfig, InspectorBackend, InspectorConfig, NotificationConfig, PolicyConfig,
    ProjectConfig, ProvisionerBackend, ProvisionerConfig, RemediationConfig, ResourceSelector,
    RetryConfig, ScheduleConfig, StateSource, StateSourceConfig, TrackingConfig, WorkspaceConfig,
};
pub use parser::{CONFIG_ENV_VAR, ConfigParser, DEFAULT_CONFIG_FILES, find_config_file};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
pub use hash::ConfigHasher;
