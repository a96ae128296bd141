//! Declared state types.
//!
//! A declaration is the provisioning tool's view of a resource: what it should
//! look like. The same [`Attributes`] shape is used for observed resources so
//! the diff engine can compare field by field.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::ConfigHasher;
use crate::error::StateError;

/// Kind of infrastructure resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceType {
    /// HTTP-serving container.
    WebServer,
    /// Database or cache container.
    Database,
    /// Load balancer or reverse proxy.
    LoadBalancer,
    /// Monitoring stack component.
    Monitoring,
    /// Container without a more specific role.
    Container,
    /// Container network.
    Network,
    /// Named volume.
    Volume,
}

/// Observed health check result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    /// Health check passing.
    Healthy,
    /// Health check failing.
    Unhealthy,
    /// Health check still in its start period.
    Starting,
    /// No health check configured.
    #[serde(rename = "none")]
    Unchecked,
}

/// Attribute set shared by declared and observed resources.
///
/// Every field is optional: a declaration only constrains the fields it sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    /// Whether the resource should be (or is) running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,
    /// Host port bindings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<u16>>,
    /// Replica count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
    /// Container image reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Container restart policy name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<String>,
    /// Network or volume driver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Network subnet in CIDR notation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
    /// Health check status (observed only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<Health>,
}

/// Attribute the diff engine knows how to compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedField {
    /// Running state.
    Running,
    /// Host port bindings.
    Ports,
    /// Replica count.
    Replicas,
    /// Container image.
    Image,
    /// Restart policy.
    RestartPolicy,
    /// Network/volume driver.
    Driver,
    /// Network subnet.
    Subnet,
    /// Health of a running resource.
    Health,
}

/// A single declared resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDeclaration {
    /// Unique resource id (container, network or volume name).
    pub id: String,
    /// Resource kind.
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    /// Provisioner address (e.g. `docker_container.web`), when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Desired attributes.
    #[serde(default)]
    pub attributes: Attributes,
}

/// A loaded declared state with its generation hash.
#[derive(Debug, Clone)]
pub struct DeclaredState {
    /// Content hash of the declarations.
    pub generation: String,
    /// Where the state was loaded from.
    pub origin: String,
    /// Declarations keyed by resource id.
    resources: BTreeMap<String, ResourceDeclaration>,
}

impl ResourceType {
    /// Infers a container's role from its name.
    ///
    /// Name tokens are split on `-`, `_` and `.`; the first matching role wins
    /// in the order monitoring, load balancer, database, web server.
    #[must_use]
    pub fn infer_from_name(name: &str) -> Self {
        const MONITORING: &[&str] =
            &["prometheus", "grafana", "monitor", "monitoring", "alertmanager", "loki"];
        const BALANCER: &[&str] = &["lb", "haproxy", "balancer", "traefik", "proxy", "envoy"];
        const DATABASE: &[&str] = &[
            "db",
            "database",
            "postgres",
            "postgresql",
            "mysql",
            "mariadb",
            "redis",
            "mongo",
            "mongodb",
        ];
        const WEB: &[&str] = &["web", "nginx", "httpd", "apache", "frontend", "api", "app"];

        let lowered = name.to_lowercase();
        let tokens: Vec<&str> = lowered.split(['-', '_', '.']).collect();
        let has = |candidates: &[&str]| tokens.iter().any(|t| candidates.contains(t));

        if has(MONITORING) {
            Self::Monitoring
        } else if has(BALANCER) {
            Self::LoadBalancer
        } else if has(DATABASE) {
            Self::Database
        } else if has(WEB) {
            Self::WebServer
        } else {
            Self::Container
        }
    }

    /// Returns true for container-like resources.
    #[must_use]
    pub const fn is_container(self) -> bool {
        !matches!(self, Self::Network | Self::Volume)
    }

    /// Parses a role label value.
    #[must_use]
    pub fn from_label(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "web-server" | "web" => Some(Self::WebServer),
            "database" | "db" => Some(Self::Database),
            "load-balancer" | "lb" => Some(Self::LoadBalancer),
            "monitoring" => Some(Self::Monitoring),
            "container" => Some(Self::Container),
            _ => None,
        }
    }
}

impl TrackedField {
    /// Every field the diff engine can compare.
    pub const ALL: [Self; 8] = [
        Self::Running,
        Self::Ports,
        Self::Replicas,
        Self::Image,
        Self::RestartPolicy,
        Self::Driver,
        Self::Subnet,
        Self::Health,
    ];

    /// Field name as it appears in drift entries.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Ports => "ports",
            Self::Replicas => "replicas",
            Self::Image => "image",
            Self::RestartPolicy => "restart_policy",
            Self::Driver => "driver",
            Self::Subnet => "subnet",
            Self::Health => "health",
        }
    }
}

impl ResourceDeclaration {
    /// Creates a declaration with empty attributes.
    #[must_use]
    pub fn new(id: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            id: id.into(),
            resource_type,
            address: None,
            attributes: Attributes::default(),
        }
    }

    /// Sets the attributes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Sets the provisioner address.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Identifier handed to the provisioner: the address when known, else the id.
    #[must_use]
    pub fn provision_target(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.id)
    }

    /// Returns true if the declaration wants the resource running.
    #[must_use]
    pub fn wants_running(&self) -> bool {
        self.attributes.running.unwrap_or(false)
    }
}

impl DeclaredState {
    /// Builds a declared state, rejecting duplicate ids.
    ///
    /// # Errors
    ///
    /// Returns `StateError::Unavailable` if two declarations share an id.
    pub fn from_declarations(
        origin: impl Into<String>,
        declarations: Vec<ResourceDeclaration>,
    ) -> Result<Self, StateError> {
        let origin = origin.into();
        let mut resources = BTreeMap::new();

        for declaration in declarations {
            if resources.contains_key(&declaration.id) {
                return Err(StateError::unavailable(
                    origin,
                    format!("duplicate resource id '{}'", declaration.id),
                ));
            }
            resources.insert(declaration.id.clone(), declaration);
        }

        let generation = ConfigHasher::new().hash_declarations(resources.values());

        Ok(Self {
            generation,
            origin,
            resources,
        })
    }

    /// Gets a declaration by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ResourceDeclaration> {
        self.resources.get(id)
    }

    /// Iterates declarations in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceDeclaration> {
        self.resources.values()
    }

    /// Returns true if a resource with this id is declared.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.resources.contains_key(id)
    }

    /// Number of declared resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Counts declarations per resource type.
    #[must_use]
    pub fn count_by_type(&self) -> BTreeMap<ResourceType, usize> {
        let mut counts = BTreeMap::new();
        for declaration in self.resources.values() {
            *counts.entry(declaration.resource_type).or_insert(0) += 1;
        }
        counts
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::WebServer => "web-server",
            Self::Database => "database",
            Self::LoadBalancer => "load-balancer",
            Self::Monitoring => "monitoring",
            Self::Container => "container",
            Self::Network => "network",
            Self::Volume => "volume",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Starting => "starting",
            Self::Unchecked => "none",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for TrackedField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_from_name() {
        let web = ResourceType::infer_from_name("iac-drift-detection-web-1");
        assert_eq!(web, ResourceType::WebServer);
        let lb = ResourceType::infer_from_name("iac-drift-detection-nginx-lb");
        assert_eq!(lb, ResourceType::LoadBalancer);
        assert_eq!(ResourceType::infer_from_name("app_postgres"), ResourceType::Database);
        assert_eq!(ResourceType::infer_from_name("grafana"), ResourceType::Monitoring);
        assert_eq!(ResourceType::infer_from_name("worker"), ResourceType::Container);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let decls = vec![
            ResourceDeclaration::new("web-1", ResourceType::WebServer),
            ResourceDeclaration::new("web-1", ResourceType::Database),
        ];
        let result = DeclaredState::from_declarations("test", decls);
        assert!(matches!(result, Err(StateError::Unavailable { .. })));
    }

    #[test]
    fn test_generation_is_order_independent() {
        let a = ResourceDeclaration::new("a", ResourceType::Volume);
        let b = ResourceDeclaration::new("b", ResourceType::Network);

        let first = DeclaredState::from_declarations("x", vec![a.clone(), b.clone()]).unwrap();
        let second = DeclaredState::from_declarations("y", vec![b, a]).unwrap();

        assert_eq!(first.generation, second.generation);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_attributes_yaml_roundtrip_keeps_unset_fields_absent() {
        let yaml = "running: true\nports: [80]\n";
        let attrs: Attributes = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(attrs.running, Some(true));
        assert_eq!(attrs.ports, Some(vec![80]));
        assert!(attrs.image.is_none());
    }

    #[test]
    fn test_provision_target_prefers_address() {
        let decl = ResourceDeclaration::new("web-1", ResourceType::WebServer)
            .with_address("docker_container.web[0]");
        assert_eq!(decl.provision_target(), "docker_container.web[0]");
        assert_eq!(ResourceDeclaration::new("v", ResourceType::Volume).provision_target(), "v");
    }
}
