//! Docker CLI-backed infrastructure query.
//!
//! Listing uses `docker ps -a`, `docker network ls` and `docker volume ls`
//! filtered by name; each resource is then read with the matching
//! `inspect` subcommand.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::InfraQuery;
use super::types::{ObservedResource, ResourceRef, ResourceStatus};
use crate::command::{self, CommandOutput};
use crate::declared::{Attributes, Health, ResourceType};
use crate::error::{CommandError, InspectionError};

/// Infrastructure query over the Docker CLI.
#[derive(Debug, Clone)]
pub struct DockerQuery {
    docker_bin: String,
    name_filter: String,
    timeout: Duration,
    include_networks: bool,
    include_volumes: bool,
}

impl DockerQuery {
    /// Creates a Docker query listing resources whose name contains `name_filter`.
    #[must_use]
    pub fn new(
        docker_bin: impl Into<String>,
        name_filter: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            docker_bin: docker_bin.into(),
            name_filter: name_filter.into(),
            timeout,
            include_networks: true,
            include_volumes: true,
        }
    }

    /// Sets whether networks and volumes are listed.
    #[must_use]
    pub const fn with_scope(mut self, include_networks: bool, include_volumes: bool) -> Self {
        self.include_networks = include_networks;
        self.include_volumes = include_volumes;
        self
    }

    async fn docker(&self, args: &[&str]) -> Result<CommandOutput, CommandError> {
        command::run(&self.docker_bin, args, None, self.timeout).await
    }

    async fn list(
        &self,
        args: &[&str],
        resource_type: ResourceType,
    ) -> Result<Vec<ResourceRef>, InspectionError> {
        let output = self.docker(args).await.map_err(|e| InspectionError::Unreachable {
            message: e.to_string(),
        })?;

        if !output.success() {
            return Err(InspectionError::Unreachable {
                message: output.message(),
            });
        }

        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(|name| {
                let resource_type = if resource_type.is_container() {
                    ResourceType::infer_from_name(name)
                } else {
                    resource_type
                };
                ResourceRef::new(name, resource_type)
            })
            .collect())
    }

    /// Runs an inspect subcommand and returns the first document, or `None`
    /// if the object does not exist.
    async fn inspect(
        &self,
        resource: &ResourceRef,
        args: &[&str],
    ) -> Result<Option<Value>, InspectionError> {
        let output = self.docker(args).await.map_err(|e| match e {
            CommandError::Timeout { timeout_secs, .. } => InspectionError::Timeout {
                resource: resource.id.clone(),
                timeout_secs,
            },
            CommandError::Spawn { .. } => InspectionError::Unreachable {
                message: e.to_string(),
            },
        })?;

        if !output.success() {
            let message = output.message();
            if message.contains("No such") || message.contains("not found") {
                debug!("{} no longer exists", resource.id);
                return Ok(None);
            }
            return Err(InspectionError::query(&resource.id, message));
        }

        let documents: Vec<Value> = serde_json::from_str(&output.stdout).map_err(|e| {
            InspectionError::InvalidResponse {
                message: format!("docker inspect {}: {e}", resource.id),
            }
        })?;

        Ok(documents.into_iter().next())
    }
}

#[async_trait]
impl InfraQuery for DockerQuery {
    async fn list_resources(&self) -> Result<Vec<ResourceRef>, InspectionError> {
        let filter = format!("name={}", self.name_filter);

        let mut refs = self
            .list(
                &["ps", "-a", "--filter", filter.as_str(), "--format", "{{.Names}}"],
                ResourceType::Container,
            )
            .await?;

        if self.include_networks {
            refs.extend(
                self.list(
                    &["network", "ls", "--filter", filter.as_str(), "--format", "{{.Name}}"],
                    ResourceType::Network,
                )
                .await?,
            );
        }

        if self.include_volumes {
            refs.extend(
                self.list(
                    &["volume", "ls", "--filter", filter.as_str(), "--format", "{{.Name}}"],
                    ResourceType::Volume,
                )
                .await?,
            );
        }

        debug!("Listed {} resources matching '{}'", refs.len(), self.name_filter);
        Ok(refs)
    }

    async fn query(
        &self,
        resource: &ResourceRef,
    ) -> Result<Option<ObservedResource>, InspectionError> {
        let id = resource.id.as_str();
        let observed = match resource.resource_type {
            ResourceType::Network => self
                .inspect(resource, &["network", "inspect", id])
                .await?
                .map(|doc| parse_network(id, &doc)),
            ResourceType::Volume => self
                .inspect(resource, &["volume", "inspect", id])
                .await?
                .map(|doc| parse_volume(id, &doc)),
            container_type => self
                .inspect(resource, &["inspect", "--type", "container", id])
                .await?
                .map(|doc| parse_container(id, container_type, &doc)),
        };
        Ok(observed)
    }
}

/// Maps a `docker inspect` container document to an observed resource.
fn parse_container(id: &str, resource_type: ResourceType, doc: &Value) -> ObservedResource {
    let state = &doc["State"];
    let running = state["Running"].as_bool().unwrap_or(false);

    let health = match state["Health"]["Status"].as_str() {
        Some("healthy") => Health::Healthy,
        Some("unhealthy") => Health::Unhealthy,
        Some("starting") => Health::Starting,
        _ => Health::Unchecked,
    };

    let mut ports: Vec<u16> = doc["HostConfig"]["PortBindings"]
        .as_object()
        .map(|bindings| {
            bindings
                .values()
                .filter_map(Value::as_array)
                .flatten()
                .filter_map(|b| b["HostPort"].as_str())
                .filter_map(|p| p.parse().ok())
                .collect()
        })
        .unwrap_or_default();
    ports.sort_unstable();
    ports.dedup();

    let attributes = Attributes {
        running: Some(running),
        ports: Some(ports),
        image: non_empty(&doc["Config"]["Image"]),
        restart_policy: non_empty(&doc["HostConfig"]["RestartPolicy"]["Name"]),
        health: Some(health),
        ..Attributes::default()
    };

    let status = if running {
        ResourceStatus::Running
    } else {
        ResourceStatus::Stopped
    };

    let resource_type = doc["Config"]["Labels"]["role"]
        .as_str()
        .and_then(ResourceType::from_label)
        .unwrap_or(resource_type);

    ObservedResource::new(id, resource_type, status, attributes)
}

fn parse_network(id: &str, doc: &Value) -> ObservedResource {
    let attributes = Attributes {
        driver: non_empty(&doc["Driver"]),
        subnet: doc["IPAM"]["Config"]
            .as_array()
            .and_then(|c| c.first())
            .and_then(|c| non_empty(&c["Subnet"])),
        ..Attributes::default()
    };
    ObservedResource::new(id, ResourceType::Network, ResourceStatus::Running, attributes)
}

fn parse_volume(id: &str, doc: &Value) -> ObservedResource {
    let attributes = Attributes {
        driver: non_empty(&doc["Driver"]),
        ..Attributes::default()
    };
    ObservedResource::new(id, ResourceType::Volume, ResourceStatus::Running, attributes)
}

fn non_empty(value: &Value) -> Option<String> {
    value.as_str().filter(|s| !s.is_empty()).map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_running_container() {
        let doc = json!({
            "State": {"Running": true, "Health": {"Status": "unhealthy"}},
            "Config": {"Image": "nginx:1.25", "Labels": {}},
            "HostConfig": {
                "RestartPolicy": {"Name": "unless-stopped"},
                "PortBindings": {
                    "443/tcp": [{"HostIp": "", "HostPort": "8443"}],
                    "80/tcp": [{"HostIp": "", "HostPort": "8080"}]
                }
            }
        });

        let observed = parse_container("web-1", ResourceType::WebServer, &doc);
        assert_eq!(observed.status, ResourceStatus::Running);
        assert_eq!(observed.attributes.ports, Some(vec![8080, 8443]));
        assert_eq!(observed.attributes.image.as_deref(), Some("nginx:1.25"));
        assert_eq!(observed.attributes.restart_policy.as_deref(), Some("unless-stopped"));
        assert_eq!(observed.attributes.health, Some(Health::Unhealthy));
    }

    #[test]
    fn test_parse_stopped_container_without_healthcheck() {
        let doc = json!({
            "State": {"Running": false},
            "Config": {"Image": "redis:7", "Labels": {"role": "database"}},
            "HostConfig": {"RestartPolicy": {"Name": ""}, "PortBindings": {}}
        });

        let observed = parse_container("cache", ResourceType::Container, &doc);
        assert_eq!(observed.status, ResourceStatus::Stopped);
        assert_eq!(observed.resource_type, ResourceType::Database);
        assert_eq!(observed.attributes.running, Some(false));
        assert_eq!(observed.attributes.health, Some(Health::Unchecked));
        assert!(observed.attributes.restart_policy.is_none());
    }

    #[test]
    fn test_parse_network_and_volume() {
        let net = parse_network(
            "app-net",
            &json!({"Driver": "bridge", "IPAM": {"Config": [{"Subnet": "172.20.0.0/16"}]}}),
        );
        assert_eq!(net.attributes.subnet.as_deref(), Some("172.20.0.0/16"));

        let volume = parse_volume("pgdata", &json!({"Driver": "local"}));
        assert_eq!(volume.attributes.driver.as_deref(), Some("local"));
    }
}
