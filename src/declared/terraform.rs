//! Terraform-backed state reader.
//!
//! Reads the JSON produced by `terraform show -json`, either from a file or by
//! running Terraform in a working directory, and maps the Docker provider's
//! `docker_container`, `docker_network` and `docker_volume` resources to
//! declarations.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::StateReader;
use super::types::{Attributes, DeclaredState, ResourceDeclaration, ResourceType};
use crate::command;
use crate::error::StateError;

/// Label consulted for a container's role before falling back to its name.
const ROLE_LABEL: &str = "role";

/// Top-level `terraform show -json` document.
#[derive(Debug, Deserialize)]
struct ShowOutput {
    #[serde(default)]
    values: Option<StateValues>,
}

#[derive(Debug, Deserialize)]
struct StateValues {
    root_module: Module,
}

#[derive(Debug, Deserialize)]
struct Module {
    #[serde(default)]
    resources: Vec<TfResource>,
    #[serde(default)]
    child_modules: Vec<Module>,
}

#[derive(Debug, Deserialize)]
struct TfResource {
    address: String,
    #[serde(rename = "type")]
    resource_type: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    values: Value,
}

/// Reads declared state from Terraform.
#[derive(Debug, Clone)]
pub struct TerraformStateReader {
    /// State JSON file or Terraform working directory.
    path: PathBuf,
    /// Terraform binary.
    terraform_bin: String,
    /// Timeout for `terraform show`.
    timeout: Duration,
}

impl TerraformStateReader {
    /// Creates a reader.
    #[must_use]
    pub fn new(
        path: impl Into<PathBuf>,
        terraform_bin: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            path: path.into(),
            terraform_bin: terraform_bin.into(),
            timeout,
        }
    }

    /// Parses `terraform show -json` output into a declared state.
    ///
    /// # Errors
    ///
    /// Returns `StateError::Unavailable` if the JSON is malformed or two
    /// resources map to the same id.
    pub fn parse(origin: &str, content: &str) -> Result<DeclaredState, StateError> {
        let show: ShowOutput = serde_json::from_str(content)
            .map_err(|e| StateError::unavailable(origin, format!("invalid terraform JSON: {e}")))?;

        let mut declarations = Vec::new();
        if let Some(values) = show.values {
            collect(&values.root_module, &mut declarations);
        } else {
            warn!("Terraform state at {} has no values (empty state)", origin);
        }

        DeclaredState::from_declarations(origin, declarations)
    }

    async fn read_content(&self) -> Result<String, StateError> {
        let origin = self.origin();

        if self.path.is_dir() {
            debug!("Running {} show -json in {}", self.terraform_bin, origin);
            let output = command::run(
                &self.terraform_bin,
                &["show", "-json"],
                Some(&self.path),
                self.timeout,
            )
            .await
            .map_err(|e| StateError::unavailable(&origin, e.to_string()))?;

            if !output.success() {
                return Err(StateError::unavailable(&origin, output.message()));
            }
            Ok(output.stdout)
        } else {
            tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|e| StateError::unavailable(&origin, e.to_string()))
        }
    }
}

#[async_trait]
impl StateReader for TerraformStateReader {
    async fn load(&self) -> Result<DeclaredState, StateError> {
        let origin = self.origin();
        let content = self.read_content().await?;
        let state = Self::parse(&origin, &content)?;
        info!("Loaded {} declarations from terraform state {}", state.len(), origin);
        Ok(state)
    }

    fn origin(&self) -> String {
        self.path.display().to_string()
    }
}

fn collect(module: &Module, out: &mut Vec<ResourceDeclaration>) {
    for resource in &module.resources {
        if resource.mode.as_deref().is_some_and(|m| m != "managed") {
            continue;
        }
        if let Some(declaration) = map_resource(resource) {
            out.push(declaration);
        }
    }
    for child in &module.child_modules {
        collect(child, out);
    }
}

fn map_resource(resource: &TfResource) -> Option<ResourceDeclaration> {
    let values = &resource.values;
    let name = values.get("name").and_then(Value::as_str)?.to_string();

    let (resource_type, attributes) = match resource.resource_type.as_str() {
        "docker_container" => {
            let resource_type =
                container_role(values).unwrap_or_else(|| ResourceType::infer_from_name(&name));
            (resource_type, container_attributes(values))
        }
        "docker_network" => (
            ResourceType::Network,
            Attributes {
                driver: string_field(values, "driver"),
                subnet: values
                    .get("ipam_config")
                    .and_then(Value::as_array)
                    .and_then(|configs| configs.first())
                    .and_then(|c| string_field(c, "subnet")),
                ..Attributes::default()
            },
        ),
        "docker_volume" => (
            ResourceType::Volume,
            Attributes {
                driver: string_field(values, "driver"),
                ..Attributes::default()
            },
        ),
        other => {
            debug!("Skipping unsupported resource type {} ({})", other, resource.address);
            return None;
        }
    };

    Some(
        ResourceDeclaration::new(name, resource_type)
            .with_address(resource.address.clone())
            .with_attributes(attributes),
    )
}

fn container_attributes(values: &Value) -> Attributes {
    let mut ports: Vec<u16> = values
        .get("ports")
        .and_then(Value::as_array)
        .map(|ports| {
            ports
                .iter()
                .filter_map(|p| p.get("external").and_then(Value::as_u64))
                .filter_map(|p| u16::try_from(p).ok())
                .collect()
        })
        .unwrap_or_default();
    ports.sort_unstable();

    // `must_run = false` lets the container stop; it does not require it.
    let must_run = values.get("must_run").and_then(Value::as_bool).unwrap_or(true);

    Attributes {
        running: must_run.then_some(true),
        ports: Some(ports),
        image: string_field(values, "image").and_then(|i| normalize_image(&i)),
        restart_policy: string_field(values, "restart"),
        ..Attributes::default()
    }
}

fn container_role(values: &Value) -> Option<ResourceType> {
    values
        .get("labels")
        .and_then(Value::as_array)?
        .iter()
        .find(|l| l.get("label").and_then(Value::as_str) == Some(ROLE_LABEL))
        .and_then(|l| l.get("value").and_then(Value::as_str))
        .and_then(ResourceType::from_label)
}

/// Strips a digest from an image reference. Bare image ids carry no name and
/// cannot be compared, so they map to `None`.
fn normalize_image(image: &str) -> Option<String> {
    if image.is_empty() || image.starts_with("sha256:") {
        return None;
    }
    Some(image.split("@sha256:").next().unwrap_or(image).to_string())
}

fn string_field(values: &Value, key: &str) -> Option<String> {
    values
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}
