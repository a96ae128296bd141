//! Configuration specification types for the drift engine.
//!
//! This module defines all the structs that map to the `driftguard.yaml` file.
//! Numeric limits are checked with `validator` derive rules; cross-field
//! checks live in [`super::ConfigValidator`].

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::declared::{ResourceType, TrackedField};
use crate::planner::ActionKind;

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct EngineConfig {
    /// Project-level configuration.
    #[validate(nested)]
    pub project: ProjectConfig,
    /// Where the declared state comes from.
    #[validate(nested)]
    pub state: StateSourceConfig,
    /// Live inspection settings.
    #[serde(default)]
    #[validate(nested)]
    pub inspector: InspectorConfig,
    /// Which fields the diff engine compares.
    #[serde(default)]
    pub tracking: TrackingConfig,
    /// Remediation settings.
    #[serde(default)]
    #[validate(nested)]
    pub remediation: RemediationConfig,
    /// Control loop schedule.
    #[serde(default)]
    #[validate(nested)]
    pub schedule: ScheduleConfig,
    /// Workspace (locks, ledger, report archive).
    #[serde(default)]
    #[validate(nested)]
    pub workspace: WorkspaceConfig,
    /// Optional webhook notifications.
    #[serde(default)]
    #[validate(nested)]
    pub notifications: Option<NotificationConfig>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ProjectConfig {
    /// Project name, also the default container name filter.
    #[validate(length(min = 1, max = 63))]
    pub name: String,
    /// Environment (e.g., "dev", "staging", "production").
    #[serde(default = "default_environment")]
    #[validate(length(min = 1))]
    pub environment: String,
}

/// Declared state source configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct StateSourceConfig {
    /// Source kind.
    pub source: StateSource,
    /// Manifest file, Terraform state JSON file, or Terraform working directory.
    #[validate(length(min = 1))]
    pub path: String,
    /// Terraform binary used when `path` is a directory.
    #[serde(default = "default_terraform_bin")]
    pub terraform_bin: String,
    /// Timeout for reading the state, in seconds.
    #[serde(default = "default_state_timeout")]
    #[validate(range(min = 1, max = 3600))]
    pub timeout_secs: u64,
}

/// Declared state source kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateSource {
    /// YAML or JSON resource manifest.
    #[default]
    Manifest,
    /// Terraform `show -json` output.
    Terraform,
}

/// Live inspection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct InspectorConfig {
    /// Inspection backend.
    #[serde(default)]
    pub backend: InspectorBackend,
    /// Docker CLI binary.
    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,
    /// Name filter for listed resources (defaults to the project name).
    #[serde(default)]
    pub name_filter: Option<String>,
    /// Observed-state snapshot file (snapshot backend).
    #[serde(default)]
    pub snapshot_path: Option<String>,
    /// Timeout per inspection query, in seconds.
    #[serde(default = "default_query_timeout")]
    #[validate(range(min = 1, max = 600))]
    pub query_timeout_secs: u64,
    /// Maximum concurrent per-resource queries.
    #[serde(default = "default_concurrency")]
    #[validate(range(min = 1, max = 64))]
    pub concurrency: usize,
    /// Whether networks are inspected.
    #[serde(default = "default_true")]
    pub include_networks: bool,
    /// Whether volumes are inspected.
    #[serde(default = "default_true")]
    pub include_volumes: bool,
}

/// Inspection backends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InspectorBackend {
    /// Docker CLI.
    #[default]
    Docker,
    /// Static observed-state file.
    Snapshot,
}

/// Diff tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackingConfig {
    /// Fields compared by the diff engine.
    #[serde(default = "default_tracked_fields")]
    pub fields: Vec<TrackedField>,
    /// Allowed absolute difference per port.
    #[serde(default)]
    pub port_tolerance: u16,
    /// Allowed absolute difference in replica count.
    #[serde(default)]
    pub replica_tolerance: u32,
}

/// Remediation configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate, Default)]
pub struct RemediationConfig {
    /// Provisioner backend.
    #[serde(default)]
    #[validate(nested)]
    pub provisioner: ProvisionerConfig,
    /// Retry policy for transient provisioner failures.
    #[serde(default)]
    #[validate(nested)]
    pub retry: RetryConfig,
    /// Remediation policy.
    #[serde(default)]
    pub policy: PolicyConfig,
}

/// Provisioner configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ProvisionerConfig {
    /// Backend kind.
    #[serde(default)]
    pub backend: ProvisionerBackend,
    /// Terraform binary.
    #[serde(default = "default_terraform_bin")]
    pub terraform_bin: String,
    /// Terraform working directory (defaults to the state path's directory).
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Program for the command backend.
    #[serde(default)]
    pub program: Option<String>,
    /// Fixed arguments for the command backend (resource ids are appended).
    #[serde(default)]
    pub args: Vec<String>,
    /// Timeout per apply call, in seconds.
    #[serde(default = "default_apply_timeout")]
    #[validate(range(min = 1, max = 7200))]
    pub timeout_secs: u64,
}

/// Provisioner backends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionerBackend {
    /// Terraform CLI.
    #[default]
    Terraform,
    /// Arbitrary command.
    Command,
}

/// Retry configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct RetryConfig {
    /// Maximum attempts per action, including the first.
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    #[validate(range(max = 60_000))]
    pub base_delay_ms: u64,
    /// Upper bound for any retry delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    #[validate(range(max = 600_000))]
    pub max_delay_ms: u64,
}

/// Remediation policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Action for missing resources.
    #[serde(default = "default_on_missing")]
    pub on_missing: ActionKind,
    /// Action for misconfigured resources.
    #[serde(default = "default_on_misconfigured")]
    pub on_misconfigured: ActionKind,
    /// Action for extra (unmanaged) resources.
    #[serde(default = "default_on_extra")]
    pub on_extra: ActionKind,
    /// Resources never auto-remediated.
    #[serde(default)]
    pub manual_only: ResourceSelector,
    /// When non-empty, only these resources are auto-remediated.
    #[serde(default)]
    pub auto_remediate: ResourceSelector,
}

/// Selects resources by id or type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ResourceSelector {
    /// Resource ids.
    #[serde(default)]
    pub ids: Vec<String>,
    /// Resource types.
    #[serde(default)]
    pub types: Vec<ResourceType>,
}

/// Control loop schedule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct ScheduleConfig {
    /// Seconds between cycles in watch mode.
    #[serde(default = "default_interval")]
    #[validate(range(min = 5, max = 86_400))]
    pub interval_secs: u64,
    /// Whether watch mode remediates or only detects.
    #[serde(default)]
    pub remediate: bool,
}

/// Workspace configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct WorkspaceConfig {
    /// Workspace directory (defaults to `.driftguard` next to the config).
    #[serde(default)]
    pub path: Option<String>,
    /// Number of archived reports to keep.
    #[serde(default = "default_keep_reports")]
    #[validate(range(min = 1, max = 10_000))]
    pub keep_reports: usize,
    /// Delete archived reports older than this many days.
    #[serde(default)]
    #[validate(range(min = 1))]
    pub max_report_age_days: Option<u32>,
}

/// Webhook notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct NotificationConfig {
    /// Webhook URL.
    #[validate(length(min = 1))]
    pub webhook_url: String,
    /// Notify even when no drift is found.
    #[serde(default)]
    pub always_notify: bool,
    /// Username shown by the chat integration.
    #[serde(default = "default_username")]
    pub username: String,
    /// Request timeout, in seconds.
    #[serde(default = "default_notify_timeout")]
    #[validate(range(min = 1, max = 120))]
    pub timeout_secs: u64,
}

// Default value functions

const fn default_true() -> bool {
    true
}

const fn default_state_timeout() -> u64 {
    60
}

const fn default_query_timeout() -> u64 {
    10
}

const fn default_concurrency() -> usize {
    8
}

const fn default_apply_timeout() -> u64 {
    300
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    1000
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

const fn default_interval() -> u64 {
    60
}

const fn default_keep_reports() -> usize {
    100
}

const fn default_notify_timeout() -> u64 {
    10
}

const fn default_on_missing() -> ActionKind {
    ActionKind::Recreate
}

const fn default_on_misconfigured() -> ActionKind {
    ActionKind::Reconfigure
}

const fn default_on_extra() -> ActionKind {
    ActionKind::Ignore
}

fn default_environment() -> String {
    String::from("dev")
}

fn default_terraform_bin() -> String {
    String::from("terraform")
}

fn default_docker_bin() -> String {
    String::from("docker")
}

fn default_username() -> String {
    String::from("IaC Drift Detector")
}

fn default_tracked_fields() -> Vec<TrackedField> {
    TrackedField::ALL.to_vec()
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            backend: InspectorBackend::default(),
            docker_bin: default_docker_bin(),
            name_filter: None,
            snapshot_path: None,
            query_timeout_secs: default_query_timeout(),
            concurrency: default_concurrency(),
            include_networks: true,
            include_volumes: true,
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            fields: default_tracked_fields(),
            port_tolerance: 0,
            replica_tolerance: 0,
        }
    }
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            backend: ProvisionerBackend::default(),
            terraform_bin: default_terraform_bin(),
            working_dir: None,
            program: None,
            args: Vec::new(),
            timeout_secs: default_apply_timeout(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            on_missing: default_on_missing(),
            on_misconfigured: default_on_misconfigured(),
            on_extra: default_on_extra(),
            manual_only: ResourceSelector::default(),
            auto_remediate: ResourceSelector::default(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            remediate: false,
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            path: None,
            keep_reports: default_keep_reports(),
            max_report_age_days: None,
        }
    }
}

impl ResourceSelector {
    /// Returns true if nothing is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.types.is_empty()
    }

    /// Returns true if the resource matches by id or type.
    #[must_use]
    pub fn matches(&self, id: &str, resource_type: ResourceType) -> bool {
        self.ids.iter().any(|i| i == id) || self.types.contains(&resource_type)
    }
}

impl NotificationConfig {
    /// Creates a notification config for a webhook with default settings.
    #[must_use]
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            always_notify: false,
            username: default_username(),
            timeout_secs: default_notify_timeout(),
        }
    }
}

impl EngineConfig {
    /// Returns the fully qualified project name including environment.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.project.name, self.project.environment)
    }

    /// Name filter used when listing live resources.
    #[must_use]
    pub fn name_filter(&self) -> &str {
        self.inspector
            .name_filter
            .as_deref()
            .unwrap_or(&self.project.name)
    }
}
