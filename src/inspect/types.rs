//! Observed state types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::declared::{Attributes, ResourceDeclaration, ResourceType};
use crate::error::InspectionError;

/// Live status of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    /// Running (or present, for networks and volumes).
    Running,
    /// Exists but is not running.
    Stopped,
    /// Could not be determined.
    #[default]
    Unknown,
}

/// A resource as seen on the live infrastructure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedResource {
    /// Resource id.
    pub id: String,
    /// Resource kind.
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    /// Live status.
    #[serde(default)]
    pub status: ResourceStatus,
    /// Actual attributes.
    #[serde(default)]
    pub attributes: Attributes,
}

/// Handle to a listed resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    /// Resource id.
    pub id: String,
    /// Resource kind as far as the listing can tell.
    pub resource_type: ResourceType,
}

/// A recorded inspection failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectionFailure {
    /// Resource the failure concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Failure description.
    pub message: String,
}

/// Result of one inspection pass.
#[derive(Debug, Clone, Default)]
pub struct Inspection {
    /// Observed resources keyed by id.
    pub resources: BTreeMap<String, ObservedResource>,
    /// Non-fatal errors collected during the pass.
    pub errors: Vec<InspectionFailure>,
}

impl ObservedResource {
    /// Creates an observed resource.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        resource_type: ResourceType,
        status: ResourceStatus,
        attributes: Attributes,
    ) -> Self {
        Self {
            id: id.into(),
            resource_type,
            status,
            attributes,
        }
    }

    /// A resource whose state could not be determined.
    #[must_use]
    pub fn unknown(id: impl Into<String>, resource_type: ResourceType) -> Self {
        Self::new(id, resource_type, ResourceStatus::Unknown, Attributes::default())
    }

    /// Returns true if the status is unknown.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.status == ResourceStatus::Unknown
    }
}

impl ResourceRef {
    /// Creates a resource handle.
    #[must_use]
    pub fn new(id: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            id: id.into(),
            resource_type,
        }
    }
}

impl From<&ResourceDeclaration> for ResourceRef {
    fn from(declaration: &ResourceDeclaration) -> Self {
        Self::new(declaration.id.clone(), declaration.resource_type)
    }
}

impl From<&InspectionError> for InspectionFailure {
    fn from(error: &InspectionError) -> Self {
        Self {
            resource_id: error.resource().map(ToString::to_string),
            message: error.to_string(),
        }
    }
}

impl Inspection {
    /// Returns true if any resource could not be inspected.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.errors.is_empty() || self.resources.values().any(ObservedResource::is_unknown)
    }

    /// Number of resources with a known status.
    #[must_use]
    pub fn known_count(&self) -> usize {
        self.resources.values().filter(|r| !r.is_unknown()).count()
    }

    /// Gets an observed resource by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ObservedResource> {
        self.resources.get(id)
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}
