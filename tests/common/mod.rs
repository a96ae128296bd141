//! Shared fakes for engine integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use driftguard::config::{ConfigParser, EngineConfig};
use driftguard::declared::{
    Attributes, DeclaredState, ResourceDeclaration, ResourceType, StateReader,
};
use driftguard::engine::{Engine, EngineParts};
use driftguard::error::{InspectionError, ProvisionError, StateError};
use driftguard::inspect::{InfraQuery, ObservedResource, ResourceRef, ResourceStatus};
use driftguard::provision::{ApplyMode, Provisioner};
use driftguard::state::{LocalWorkspace, WORKSPACE_DIR};
use tempfile::TempDir;

pub type World = Arc<Mutex<BTreeMap<String, ObservedResource>>>;

/// Resource ids whose queries fail, shared with the test.
pub type Failing = Arc<Mutex<BTreeSet<String>>>;

/// Callback run with the targets of every provisioner call.
pub type ApplyHook = Box<dyn Fn(&[String]) + Send + Sync>;

pub const CONFIG: &str = r"
project:
  name: shop
  environment: test
state:
  source: manifest
  path: unused.yaml
inspector:
  backend: snapshot
  query_timeout_secs: 1
  concurrency: 4
remediation:
  retry:
    max_attempts: 3
    base_delay_ms: 1
    max_delay_ms: 5
";

pub fn config() -> EngineConfig {
    ConfigParser::new().parse_yaml(CONFIG, None).unwrap()
}

pub fn web(running: bool, port: u16) -> Attributes {
    Attributes {
        running: Some(running),
        ports: Some(vec![port]),
        ..Attributes::default()
    }
}

pub fn declare(resources: &[(&str, Attributes)]) -> DeclaredState {
    DeclaredState::from_declarations(
        "fake",
        resources
            .iter()
            .map(|(id, attrs)| {
                ResourceDeclaration::new(*id, ResourceType::WebServer)
                    .with_attributes(attrs.clone())
            })
            .collect(),
    )
    .unwrap()
}

pub fn world(resources: &[(&str, Attributes)]) -> World {
    let map = resources
        .iter()
        .map(|(id, attrs)| {
            let status = if attrs.running == Some(true) {
                ResourceStatus::Running
            } else {
                ResourceStatus::Stopped
            };
            (
                (*id).to_string(),
                ObservedResource::new(*id, ResourceType::WebServer, status, attrs.clone()),
            )
        })
        .collect();
    Arc::new(Mutex::new(map))
}

/// Reader returning a fixed declared state.
pub struct FakeReader(pub DeclaredState);

#[async_trait]
impl StateReader for FakeReader {
    async fn load(&self) -> Result<DeclaredState, StateError> {
        Ok(self.0.clone())
    }

    fn origin(&self) -> String {
        String::from("fake")
    }
}

/// Query over a shared world, with failing ids and an optional delay.
#[derive(Default)]
pub struct FakeInfra {
    pub world: World,
    pub failing: Failing,
    pub delay: Option<Duration>,
}

pub fn failing(ids: &[&str]) -> Failing {
    Arc::new(Mutex::new(ids.iter().map(ToString::to_string).collect()))
}

#[async_trait]
impl InfraQuery for FakeInfra {
    async fn list_resources(&self) -> Result<Vec<ResourceRef>, InspectionError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let world = self.world.lock().unwrap();
        Ok(world
            .values()
            .map(|r| ResourceRef::new(r.id.clone(), r.resource_type))
            .collect())
    }

    async fn query(
        &self,
        resource: &ResourceRef,
    ) -> Result<Option<ObservedResource>, InspectionError> {
        if self.failing.lock().unwrap().contains(&resource.id) {
            return Err(InspectionError::query(&resource.id, "daemon returned 500"));
        }
        Ok(self.world.lock().unwrap().get(&resource.id).cloned())
    }
}

/// Provisioner that starts targets in the shared world.
///
/// The first `transient_failures` calls fail with lock contention. Other
/// calls run `on_apply`, wait `apply_delay`, then start the targets.
pub struct FakeProvisioner {
    pub world: World,
    pub calls: AtomicU32,
    pub transient_failures: u32,
    pub on_apply: Option<ApplyHook>,
    pub apply_delay: Option<Duration>,
}

impl FakeProvisioner {
    pub fn new(world: World) -> Self {
        Self {
            world,
            calls: AtomicU32::new(0),
            transient_failures: 0,
            on_apply: None,
            apply_delay: None,
        }
    }

    pub fn with_hook(mut self, hook: impl Fn(&[String]) + Send + Sync + 'static) -> Self {
        self.on_apply = Some(Box::new(hook));
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn apply(&self, targets: &[String], _mode: ApplyMode) -> Result<(), ProvisionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.transient_failures {
            return Err(ProvisionError::LockContention {
                message: String::from("state lock held"),
            });
        }

        if let Some(hook) = &self.on_apply {
            hook(targets);
        }
        if let Some(delay) = self.apply_delay {
            tokio::time::sleep(delay).await;
        }

        let mut world = self.world.lock().unwrap();
        for target in targets {
            if let Some(resource) = world.get_mut(target) {
                resource.status = ResourceStatus::Running;
                resource.attributes.running = Some(true);
            }
        }
        Ok(())
    }
}

/// Wires an engine over the fakes with a temporary workspace.
pub fn engine(
    config: EngineConfig,
    declared: DeclaredState,
    infra: FakeInfra,
    provisioner: Arc<FakeProvisioner>,
) -> (Engine, TempDir) {
    let temp = TempDir::new().unwrap();
    let engine = engine_in(temp.path(), config, declared, infra, provisioner);
    (engine, temp)
}

/// Wires an engine over the fakes with its workspace under `dir`.
pub fn engine_in(
    dir: &Path,
    config: EngineConfig,
    declared: DeclaredState,
    infra: FakeInfra,
    provisioner: Arc<FakeProvisioner>,
) -> Engine {
    let parts = EngineParts {
        reader: Box::new(FakeReader(declared)),
        query: Arc::new(infra),
        provisioner,
        workspace: Box::new(LocalWorkspace::new(dir.join(WORKSPACE_DIR))),
    };
    Engine::new(config, parts)
}
