//! Declared state: what the provisioning tool says should exist.
//!
//! This module provides:
//! - Declaration types and the [`DeclaredState`] set with its generation
//! - The [`StateReader`] trait
//! - Manifest and Terraform readers

mod types;
mod manifest;
mod terraform;

pub use types::{
    Attributes, DeclaredState, Health, ResourceDeclaration, ResourceType, TrackedField,
};
pub use manifest::ManifestReader;
pub use terraform::TerraformStateReader;

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{StateSource, StateSourceConfig};
use crate::error::StateError;

/// Source of the declared state. Read-only.
#[async_trait]
pub trait StateReader: Send + Sync {
    /// Loads the declared state.
    ///
    /// # Errors
    ///
    /// Returns `StateError::Unavailable` if the backing source is missing or
    /// cannot be parsed.
    async fn load(&self) -> Result<DeclaredState, StateError>;

    /// Human-readable location of the source.
    fn origin(&self) -> String;
}

#[async_trait]
impl StateReader for Box<dyn StateReader> {
    async fn load(&self) -> Result<DeclaredState, StateError> {
        (**self).load().await
    }

    fn origin(&self) -> String {
        (**self).origin()
    }
}

/// Builds the state reader selected by the configuration.
///
/// `path` is the already-resolved state path.
#[must_use]
pub fn reader_from_config(config: &StateSourceConfig, path: PathBuf) -> Box<dyn StateReader> {
    match config.source {
        StateSource::Manifest => Box::new(ManifestReader::new(path)),
        StateSource::Terraform => Box::new(TerraformStateReader::new(
            path,
            config.terraform_bin.clone(),
            Duration::from_secs(config.timeout_secs),
        )),
    }
}
