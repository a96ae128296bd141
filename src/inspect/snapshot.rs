//! Snapshot-backed infrastructure query.
//!
//! Reads observed resources from a YAML or JSON file. The file is re-read on
//! every call so a re-inspection after remediation sees the latest content.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;

use super::InfraQuery;
use super::types::{ObservedResource, ResourceRef};
use crate::error::InspectionError;

#[derive(Debug, Deserialize)]
struct Snapshot {
    #[serde(default)]
    resources: Vec<ObservedResource>,
}

/// Infrastructure query backed by an observed-state file.
#[derive(Debug, Clone)]
pub struct SnapshotQuery {
    path: PathBuf,
}

impl SnapshotQuery {
    /// Creates a query over the given snapshot file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read(&self) -> Result<Vec<ObservedResource>, InspectionError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| InspectionError::Unreachable {
                message: format!("{}: {e}", self.path.display()),
            })?;

        let snapshot: Snapshot =
            serde_yaml::from_str(&content).map_err(|e| InspectionError::InvalidResponse {
                message: format!("{}: {e}", self.path.display()),
            })?;

        Ok(snapshot.resources)
    }
}

#[async_trait]
impl InfraQuery for SnapshotQuery {
    async fn list_resources(&self) -> Result<Vec<ResourceRef>, InspectionError> {
        Ok(self
            .read()
            .await?
            .into_iter()
            .map(|r| ResourceRef::new(r.id, r.resource_type))
            .collect())
    }

    async fn query(
        &self,
        resource: &ResourceRef,
    ) -> Result<Option<ObservedResource>, InspectionError> {
        Ok(self.read().await?.into_iter().find(|r| r.id == resource.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declared::ResourceType;
    use crate::inspect::ResourceStatus;

    #[tokio::test]
    async fn test_reads_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("observed.yaml");
        let snapshot = "resources:
  - id: web-1
    type: web-server
    status: stopped
    attributes:
      running: false
";
        std::fs::write(&path, snapshot).unwrap();

        let query = SnapshotQuery::new(&path);
        let listed = query.list_resources().await.unwrap();
        assert_eq!(listed, vec![ResourceRef::new("web-1", ResourceType::WebServer)]);

        let web = query.query(&listed[0]).await.unwrap().unwrap();
        assert_eq!(web.status, ResourceStatus::Stopped);
        let missing = ResourceRef::new("nope", ResourceType::Volume);
        assert!(query.query(&missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_unreachable() {
        let query = SnapshotQuery::new("/nonexistent/observed.yaml");
        assert!(matches!(
            query.list_resources().await,
            Err(InspectionError::Unreachable { .. })
        ));
    }
}
