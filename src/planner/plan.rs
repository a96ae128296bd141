//! Remediation plan types and construction.
//!
//! This module turns drift entries into remediation actions under the
//! operator policy: a table from drift kind to action kind, plus manual-only
//! deny and allow lists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::config::{ConfigHasher, PolicyConfig};
use crate::declared::{DeclaredState, ResourceType};
use crate::error::PlanError;

use super::diff::{DriftEntry, DriftKind};

/// Kind of corrective action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Destroy and recreate the resource.
    Recreate,
    /// Re-apply the declaration to the existing resource.
    Reconfigure,
    /// Report only.
    Ignore,
}

/// A single planned corrective action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationAction {
    /// Target resource id.
    pub resource_id: String,
    /// Target resource kind.
    pub resource_type: ResourceType,
    /// Provisioner address, when declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Action kind.
    pub kind: ActionKind,
    /// Stable key identifying this action for this declared generation.
    pub idempotency_key: String,
    /// Drift fields the action resolves.
    pub fields: Vec<String>,
    /// Human-readable reason.
    pub reason: String,
}

/// A complete remediation plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Declared generation the plan is based on.
    pub generation: String,
    /// Actions sorted by resource id.
    pub actions: Vec<RemediationAction>,
    /// Drifted resources withheld by the manual-only policy.
    pub manual_only: Vec<String>,
}

/// Planner applying the remediation policy.
#[derive(Debug, Clone, Default)]
pub struct RemediationPlanner {
    policy: PolicyConfig,
}

impl RemediationPlanner {
    /// Creates a planner with the given policy.
    #[must_use]
    pub const fn new(policy: PolicyConfig) -> Self {
        Self { policy }
    }

    /// Returns the action kind the policy assigns to a drift kind.
    #[must_use]
    pub const fn action_for(&self, kind: DriftKind) -> ActionKind {
        match kind {
            DriftKind::Missing => self.policy.on_missing,
            DriftKind::Misconfigured => self.policy.on_misconfigured,
            DriftKind::Extra => self.policy.on_extra,
        }
    }

    /// Returns true if the resource must not be remediated automatically.
    #[must_use]
    pub fn is_manual_only(&self, id: &str, resource_type: ResourceType) -> bool {
        if self.policy.manual_only.matches(id, resource_type) {
            return true;
        }
        let allow = &self.policy.auto_remediate;
        !allow.is_empty() && !allow.matches(id, resource_type)
    }

    /// Builds a plan from drift entries.
    ///
    /// Entries of one resource mapping to the same action kind are merged into
    /// one action. The output is sorted by resource id.
    ///
    /// # Errors
    ///
    /// Returns `PlanError::Conflict` if entries of one resource map to
    /// different action kinds.
    pub fn plan(
        &self,
        declared: &DeclaredState,
        entries: &[DriftEntry],
    ) -> Result<RemediationPlan, PlanError> {
        let hasher = ConfigHasher::new();

        let mut by_resource: BTreeMap<&str, Vec<&DriftEntry>> = BTreeMap::new();
        for entry in entries {
            by_resource.entry(entry.resource_id.as_str()).or_default().push(entry);
        }

        let mut actions = Vec::new();
        let mut manual_only = Vec::new();

        for (resource_id, group) in by_resource {
            let first = group[0];

            let kind = self.resolve_kind(resource_id, &group)?;

            if self.is_manual_only(resource_id, first.resource_type) {
                info!("Drift on {} left for manual remediation", resource_id);
                manual_only.push(resource_id.to_string());
                continue;
            }

            let mut fields: Vec<String> = group.iter().map(|e| e.field.clone()).collect();
            fields.sort();
            fields.dedup();

            let idempotency_key =
                hasher.idempotency_key(&declared.generation, resource_id, kind.as_str(), &fields);

            let address = declared.get(resource_id).and_then(|d| d.address.clone());

            debug!("Planned {} for {} ({})", kind, resource_id, fields.join(", "));

            actions.push(RemediationAction {
                resource_id: resource_id.to_string(),
                resource_type: first.resource_type,
                address,
                kind,
                idempotency_key,
                reason: reason(first.kind, &fields),
                fields,
            });
        }

        info!(
            "Plan ready: {} actions, {} withheld for manual remediation",
            actions.len(),
            manual_only.len()
        );

        Ok(RemediationPlan {
            created_at: Utc::now(),
            generation: declared.generation.clone(),
            actions,
            manual_only,
        })
    }

    fn resolve_kind(
        &self,
        resource_id: &str,
        group: &[&DriftEntry],
    ) -> Result<ActionKind, PlanError> {
        let first = self.action_for(group[0].kind);
        for entry in &group[1..] {
            let other = self.action_for(entry.kind);
            if other != first {
                return Err(PlanError::Conflict {
                    resource: resource_id.to_string(),
                    first: first.to_string(),
                    second: other.to_string(),
                });
            }
        }
        Ok(first)
    }
}

fn reason(kind: DriftKind, fields: &[String]) -> String {
    match kind {
        DriftKind::Missing => String::from("declared resource is not present"),
        DriftKind::Extra => String::from("resource is not declared"),
        DriftKind::Misconfigured => format!("drifted fields: {}", fields.join(", ")),
    }
}

impl ActionKind {
    /// Action name as used in keys and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Recreate => "recreate",
            Self::Reconfigure => "reconfigure",
            Self::Ignore => "ignore",
        }
    }

    /// Returns true if the action calls the provisioner.
    #[must_use]
    pub const fn is_mutating(self) -> bool {
        !matches!(self, Self::Ignore)
    }
}

impl RemediationAction {
    /// Identifier handed to the provisioner.
    #[must_use]
    pub fn provision_target(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.resource_id)
    }
}

impl RemediationPlan {
    /// Returns true if no action calls the provisioner.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        !self.actions.iter().any(|a| a.kind.is_mutating())
    }

    /// Counts actions per kind.
    #[must_use]
    pub fn count_by_kind(&self) -> BTreeMap<ActionKind, usize> {
        let mut counts = BTreeMap::new();
        for action in &self.actions {
            *counts.entry(action.kind).or_insert(0) += 1;
        }
        counts
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceSelector;
    use crate::declared::ResourceDeclaration;
    use crate::planner::Impact;

    fn entry(id: &str, field: &str, kind: DriftKind) -> DriftEntry {
        DriftEntry {
            resource_id: id.to_string(),
            resource_type: ResourceType::WebServer,
            field: field.to_string(),
            declared: None,
            observed: None,
            kind,
            impact: Impact::High,
        }
    }

    fn declared() -> DeclaredState {
        DeclaredState::from_declarations(
            "test",
            vec![
                ResourceDeclaration::new("web-1", ResourceType::WebServer)
                    .with_address("docker_container.web[0]"),
                ResourceDeclaration::new("web-2", ResourceType::WebServer),
                ResourceDeclaration::new("db-main", ResourceType::Database),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_default_policy_table() {
        let entries = vec![
            entry("web-1", "running", DriftKind::Misconfigured),
            entry("web-2", "presence", DriftKind::Missing),
            entry("stray", "presence", DriftKind::Extra),
        ];
        let plan = RemediationPlanner::default().plan(&declared(), &entries).unwrap();

        let kinds: Vec<(&str, ActionKind)> = plan
            .actions
            .iter()
            .map(|a| (a.resource_id.as_str(), a.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("stray", ActionKind::Ignore),
                ("web-1", ActionKind::Reconfigure),
                ("web-2", ActionKind::Recreate),
            ]
        );
        assert_eq!(plan.actions[1].provision_target(), "docker_container.web[0]");
    }

    #[test]
    fn test_entries_of_one_resource_merge() {
        let entries = vec![
            entry("web-1", "running", DriftKind::Misconfigured),
            entry("web-1", "image", DriftKind::Misconfigured),
        ];
        let plan = RemediationPlanner::default().plan(&declared(), &entries).unwrap();

        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].fields, vec!["image", "running"]);
    }

    #[test]
    fn test_conflicting_kinds_fail() {
        let entries = vec![
            entry("web-1", "presence", DriftKind::Missing),
            entry("web-1", "running", DriftKind::Misconfigured),
        ];
        let err = RemediationPlanner::default().plan(&declared(), &entries).unwrap_err();
        assert!(matches!(err, PlanError::Conflict { resource, .. } if resource == "web-1"));
    }

    #[test]
    fn test_same_effect_for_different_kinds_merges() {
        let policy = PolicyConfig {
            on_missing: ActionKind::Reconfigure,
            ..PolicyConfig::default()
        };
        let entries = vec![
            entry("web-1", "presence", DriftKind::Missing),
            entry("web-1", "running", DriftKind::Misconfigured),
        ];
        let plan = RemediationPlanner::new(policy).plan(&declared(), &entries).unwrap();
        assert_eq!(plan.actions.len(), 1);
    }

    #[test]
    fn test_manual_only_produces_no_action() {
        let policy = PolicyConfig {
            manual_only: ResourceSelector {
                ids: vec![],
                types: vec![ResourceType::Database],
            },
            ..PolicyConfig::default()
        };
        let mut db = entry("db-main", "running", DriftKind::Misconfigured);
        db.resource_type = ResourceType::Database;

        let plan = RemediationPlanner::new(policy).plan(&declared(), &[db]).unwrap();
        assert!(plan.actions.is_empty());
        assert_eq!(plan.manual_only, vec!["db-main"]);
        assert!(plan.is_noop());
    }

    #[test]
    fn test_allow_list_restricts_auto_remediation() {
        let policy = PolicyConfig {
            auto_remediate: ResourceSelector {
                ids: vec![String::from("web-1")],
                types: vec![],
            },
            ..PolicyConfig::default()
        };
        let planner = RemediationPlanner::new(policy);
        assert!(!planner.is_manual_only("web-1", ResourceType::WebServer));
        assert!(planner.is_manual_only("web-2", ResourceType::WebServer));
    }

    #[test]
    fn test_plan_is_deterministic() {
        let entries = vec![
            entry("web-2", "presence", DriftKind::Missing),
            entry("web-1", "ports", DriftKind::Misconfigured),
            entry("web-1", "running", DriftKind::Misconfigured),
        ];
        let mut reversed = entries.clone();
        reversed.reverse();

        let planner = RemediationPlanner::default();
        let a = planner.plan(&declared(), &entries).unwrap();
        let b = planner.plan(&declared(), &reversed).unwrap();
        assert_eq!(a.actions, b.actions);
    }
}
