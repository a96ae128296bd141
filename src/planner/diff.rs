//! Diff engine for comparing declared vs observed state.
//!
//! Resources are joined by id. Matched pairs are compared field by field on
//! the tracked fields the declaration actually sets; unmatched ids become a
//! single `presence` entry. Resources whose status is unknown produce no
//! entries.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::TrackingConfig;
use crate::declared::{DeclaredState, Health, ResourceDeclaration, ResourceType, TrackedField};
use crate::inspect::{ObservedResource, ResourceStatus};

/// Field name used for missing and extra entries.
pub const PRESENCE_FIELD: &str = "presence";

/// Engine for computing drift between declared and observed states.
#[derive(Debug, Clone)]
pub struct DiffEngine {
    /// Fields that may produce drift.
    fields: BTreeSet<TrackedField>,
    /// Allowed absolute difference per port.
    port_tolerance: u16,
    /// Allowed absolute difference in replica count.
    replica_tolerance: u32,
}

/// Kind of drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftKind {
    /// Declared but not observed.
    Missing,
    /// Observed with attributes differing from the declaration.
    Misconfigured,
    /// Observed but not declared.
    Extra,
}

/// Operational impact of a drift entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    /// Service is down or degraded.
    High,
    /// Behavior differs from the declaration.
    Medium,
    /// Cosmetic or latent difference.
    Low,
}

/// A single detected divergence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftEntry {
    /// Resource id.
    pub resource_id: String,
    /// Resource kind.
    pub resource_type: ResourceType,
    /// Diverging field, or `presence`.
    pub field: String,
    /// Declared value, if any.
    pub declared: Option<String>,
    /// Observed value, if any.
    pub observed: Option<String>,
    /// Drift kind.
    pub kind: DriftKind,
    /// Impact.
    pub impact: Impact,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffEngine {
    /// Creates a diff engine tracking every field with zero tolerance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fields: TrackedField::ALL.into_iter().collect(),
            port_tolerance: 0,
            replica_tolerance: 0,
        }
    }

    /// Creates a diff engine from the tracking configuration.
    #[must_use]
    pub fn from_config(config: &TrackingConfig) -> Self {
        Self {
            fields: config.fields.iter().copied().collect(),
            port_tolerance: config.port_tolerance,
            replica_tolerance: config.replica_tolerance,
        }
    }

    /// Sets the tracked fields.
    #[must_use]
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = TrackedField>) -> Self {
        self.fields = fields.into_iter().collect();
        self
    }

    /// Sets the numeric tolerances.
    #[must_use]
    pub const fn with_tolerances(mut self, port_tolerance: u16, replica_tolerance: u32) -> Self {
        self.port_tolerance = port_tolerance;
        self.replica_tolerance = replica_tolerance;
        self
    }

    /// Computes drift, sorted by resource id then field.
    #[must_use]
    pub fn diff(
        &self,
        declared: &DeclaredState,
        observed: &BTreeMap<String, ObservedResource>,
    ) -> Vec<DriftEntry> {
        let mut entries = Vec::new();

        for declaration in declared.iter() {
            entries.extend(self.diff_resource(declaration, observed.get(&declaration.id)));
        }

        for resource in observed.values() {
            if declared.contains(&resource.id) || resource.status == ResourceStatus::Unknown {
                continue;
            }
            debug!("Unmanaged resource observed: {}", resource.id);
            entries.push(DriftEntry {
                resource_id: resource.id.clone(),
                resource_type: resource.resource_type,
                field: PRESENCE_FIELD.to_string(),
                declared: None,
                observed: Some(resource.status.to_string()),
                kind: DriftKind::Extra,
                impact: if resource.resource_type.is_container() {
                    Impact::Medium
                } else {
                    Impact::Low
                },
            });
        }

        entries.sort_by(|a, b| {
            a.resource_id
                .cmp(&b.resource_id)
                .then_with(|| a.field.cmp(&b.field))
        });

        debug!("Diff produced {} entries", entries.len());
        entries
    }

    /// Computes drift for one declared resource, sorted by field.
    #[must_use]
    pub fn diff_resource(
        &self,
        declaration: &ResourceDeclaration,
        observed: Option<&ObservedResource>,
    ) -> Vec<DriftEntry> {
        let Some(observed) = observed else {
            return vec![DriftEntry {
                resource_id: declaration.id.clone(),
                resource_type: declaration.resource_type,
                field: PRESENCE_FIELD.to_string(),
                declared: Some(String::from("present")),
                observed: None,
                kind: DriftKind::Missing,
                impact: Impact::High,
            }];
        };

        if observed.status == ResourceStatus::Unknown {
            return Vec::new();
        }

        let mut entries = Vec::new();
        for field in &self.fields {
            if let Some((declared_value, observed_value, impact)) =
                self.compare(*field, declaration, observed)
            {
                entries.push(DriftEntry {
                    resource_id: declaration.id.clone(),
                    resource_type: declaration.resource_type,
                    field: field.as_str().to_string(),
                    declared: Some(declared_value),
                    observed: observed_value,
                    kind: DriftKind::Misconfigured,
                    impact,
                });
            }
        }

        entries.sort_by(|a, b| a.field.cmp(&b.field));
        entries
    }

    /// Compares one field. Returns `(declared, observed, impact)` on drift.
    fn compare(
        &self,
        field: TrackedField,
        declaration: &ResourceDeclaration,
        observed: &ObservedResource,
    ) -> Option<(String, Option<String>, Impact)> {
        let want = &declaration.attributes;
        let have = &observed.attributes;

        match field {
            TrackedField::Running => {
                let expected = want.running?;
                let actual = observed.status == ResourceStatus::Running;
                (expected != actual)
                    .then(|| (expected.to_string(), Some(actual.to_string()), Impact::High))
            }
            TrackedField::Ports => {
                let expected = want.ports.as_ref()?;
                let actual = have.ports.clone().unwrap_or_default();
                (!self.ports_match(expected, &actual))
                    .then(|| (format_ports(expected), Some(format_ports(&actual)), Impact::Medium))
            }
            TrackedField::Replicas => {
                let expected = want.replicas?;
                let actual = have.replicas;
                let within = actual.is_some_and(|a| a.abs_diff(expected) <= self.replica_tolerance);
                (!within).then(|| {
                    (expected.to_string(), actual.map(|a| a.to_string()), Impact::Medium)
                })
            }
            TrackedField::Image => {
                compare_strings(want.image.as_ref(), have.image.as_ref(), Impact::Medium)
            }
            TrackedField::RestartPolicy => compare_strings(
                want.restart_policy.as_ref(),
                have.restart_policy.as_ref(),
                Impact::Low,
            ),
            TrackedField::Driver => {
                let impact = if declaration.resource_type == ResourceType::Network {
                    Impact::Medium
                } else {
                    Impact::Low
                };
                compare_strings(want.driver.as_ref(), have.driver.as_ref(), impact)
            }
            TrackedField::Subnet => {
                compare_strings(want.subnet.as_ref(), have.subnet.as_ref(), Impact::Medium)
            }
            TrackedField::Health => {
                // A container still in its start period is not yet healthy.
                let impact = match have.health? {
                    Health::Unhealthy => Impact::High,
                    Health::Starting => Impact::Medium,
                    Health::Healthy | Health::Unchecked => return None,
                };
                let checked =
                    declaration.wants_running() && observed.status == ResourceStatus::Running;
                checked.then(|| {
                    (Health::Healthy.to_string(), have.health.map(|h| h.to_string()), impact)
                })
            }
        }
    }

    /// Sorted ports must have equal length and pairwise differ by at most the tolerance.
    fn ports_match(&self, expected: &[u16], actual: &[u16]) -> bool {
        if expected.len() != actual.len() {
            return false;
        }
        let mut expected = expected.to_vec();
        let mut actual = actual.to_vec();
        expected.sort_unstable();
        actual.sort_unstable();

        expected
            .iter()
            .zip(&actual)
            .all(|(e, a)| e.abs_diff(*a) <= self.port_tolerance)
    }
}

fn compare_strings(
    expected: Option<&String>,
    actual: Option<&String>,
    impact: Impact,
) -> Option<(String, Option<String>, Impact)> {
    let expected = expected?;
    (actual != Some(expected)).then(|| (expected.clone(), actual.cloned(), impact))
}

fn format_ports(ports: &[u16]) -> String {
    let mut sorted = ports.to_vec();
    sorted.sort_unstable();
    let joined: Vec<String> = sorted.iter().map(ToString::to_string).collect();
    format!("[{}]", joined.join(", "))
}

impl std::fmt::Display for DriftKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Missing => "missing",
            Self::Misconfigured => "misconfigured",
            Self::Extra => "extra",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for Impact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        write!(f, "{s}")
    }
}
