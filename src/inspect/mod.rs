//! Live inspection of running infrastructure.
//!
//! This module provides:
//! - Observed state types
//! - The [`InfraQuery`] interface and its Docker and snapshot backends
//! - The concurrent [`LiveInspector`]

mod types;
mod docker;
mod snapshot;
mod inspector;

pub use types::{Inspection, InspectionFailure, ObservedResource, ResourceRef, ResourceStatus};
pub use docker::DockerQuery;
pub use snapshot::SnapshotQuery;
pub use inspector::LiveInspector;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{EngineConfig, InspectorBackend};
use crate::error::{ConfigError, InspectionError};

/// Infrastructure query interface.
#[async_trait]
pub trait InfraQuery: Send + Sync {
    /// Lists resources currently present.
    ///
    /// # Errors
    ///
    /// Returns `InspectionError::Unreachable` if the runtime cannot be reached.
    async fn list_resources(&self) -> Result<Vec<ResourceRef>, InspectionError>;

    /// Queries a single resource. Returns `Ok(None)` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an `InspectionError` if the query fails.
    async fn query(
        &self,
        resource: &ResourceRef,
    ) -> Result<Option<ObservedResource>, InspectionError>;
}

/// Builds the infrastructure query selected by the configuration.
///
/// `snapshot_path` is the already-resolved snapshot path, if any.
///
/// # Errors
///
/// Returns a `ConfigError` if the snapshot backend has no path.
pub fn query_from_config(
    config: &EngineConfig,
    snapshot_path: Option<PathBuf>,
) -> Result<Arc<dyn InfraQuery>, ConfigError> {
    let inspector = &config.inspector;
    match inspector.backend {
        InspectorBackend::Docker => Ok(Arc::new(
            DockerQuery::new(
                inspector.docker_bin.clone(),
                config.name_filter(),
                Duration::from_secs(inspector.query_timeout_secs),
            )
            .with_scope(inspector.include_networks, inspector.include_volumes),
        )),
        InspectorBackend::Snapshot => {
            let path = snapshot_path.ok_or_else(|| {
                ConfigError::validation(
                    "snapshot backend requires a path",
                    "inspector.snapshot_path",
                )
            })?;
            Ok(Arc::new(SnapshotQuery::new(path)))
        }
    }
}
