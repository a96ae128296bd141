//! Manifest-backed state reader.
//!
//! A manifest is a YAML (or JSON) document with a `resources` list:
//!
//! ```yaml
//! resources:
//!   - id: web-1
//!     type: web-server
//!     attributes:
//!       running: true
//!       ports: [80]
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::StateReader;
use super::types::{DeclaredState, ResourceDeclaration};
use crate::config::ConfigHasher;
use crate::error::StateError;

/// Manifest document layout.
#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    resources: Vec<ResourceDeclaration>,
}

/// Reads declared state from a manifest file.
#[derive(Debug, Clone)]
pub struct ManifestReader {
    path: PathBuf,
}

impl ManifestReader {
    /// Creates a reader for the given manifest path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the manifest path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parses manifest content.
    ///
    /// # Errors
    ///
    /// Returns `StateError::Unavailable` if the content is not a valid manifest.
    pub fn parse(origin: &str, content: &str) -> Result<DeclaredState, StateError> {
        let manifest: Manifest = serde_yaml::from_str(content)
            .map_err(|e| StateError::unavailable(origin, format!("unparsable manifest: {e}")))?;

        for declaration in &manifest.resources {
            if declaration.id.trim().is_empty() {
                return Err(StateError::unavailable(origin, "resource with empty id"));
            }
        }

        DeclaredState::from_declarations(origin, manifest.resources)
    }
}

#[async_trait]
impl StateReader for ManifestReader {
    async fn load(&self) -> Result<DeclaredState, StateError> {
        let origin = self.origin();
        debug!("Reading manifest: {}", origin);

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| StateError::unavailable(&origin, e.to_string()))?;

        let state = Self::parse(&origin, &content)?;
        info!(
            "Loaded {} declarations from {} (generation {})",
            state.len(),
            origin,
            ConfigHasher::new().short_hash(&state.generation)
        );
        Ok(state)
    }

    fn origin(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declared::ResourceType;

    const MANIFEST: &str = r"
resources:
  - id: web-1
    type: web-server
    attributes:
      running: true
      ports: [80]
  - id: db-main
    type: database
    address: docker_container.db
    attributes:
      running: true
      image: postgres:16
";

    #[test]
    fn test_parse_manifest() {
        let state = ManifestReader::parse("m.yaml", MANIFEST).unwrap();
        assert_eq!(state.len(), 2);

        let db = state.get("db-main").unwrap();
        assert_eq!(db.resource_type, ResourceType::Database);
        assert_eq!(db.provision_target(), "docker_container.db");
        assert_eq!(db.attributes.image.as_deref(), Some("postgres:16"));
    }

    #[test]
    fn test_json_manifest_is_accepted() {
        let json = r#"{"resources": [
            {"id": "net", "type": "network", "attributes": {"driver": "bridge"}}
        ]}"#;
        let state = ManifestReader::parse("m.json", json).unwrap();
        assert_eq!(state.get("net").unwrap().attributes.driver.as_deref(), Some("bridge"));
    }

    #[test]
    fn test_unknown_type_is_unavailable() {
        let bad = "resources:\n  - id: x\n    type: spaceship\n";
        assert!(matches!(
            ManifestReader::parse("m.yaml", bad),
            Err(StateError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let reader = ManifestReader::new(dir.path().join("absent.yaml"));
        assert!(matches!(reader.load().await, Err(StateError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn test_same_manifest_same_generation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("declared.yaml");
        std::fs::write(&path, MANIFEST).unwrap();

        let reader = ManifestReader::new(&path);
        let first = reader.load().await.unwrap();
        let second = reader.load().await.unwrap();
        assert_eq!(first.generation, second.generation);
    }
}
