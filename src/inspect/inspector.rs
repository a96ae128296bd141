//! Live inspector.
//!
//! Lists resources through an [`InfraQuery`], then queries each one
//! concurrently with a bounded number of in-flight queries and a timeout per
//! query. A failed query degrades that resource to `Unknown`; the pass as a
//! whole never fails.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::InfraQuery;
use super::types::{Inspection, InspectionFailure, ObservedResource, ResourceRef};
use crate::declared::{DeclaredState, ResourceDeclaration};
use crate::error::InspectionError;

/// Queries live infrastructure for observed state.
#[derive(Clone)]
pub struct LiveInspector {
    query: Arc<dyn InfraQuery>,
    timeout: Duration,
    concurrency: usize,
}

impl std::fmt::Debug for LiveInspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveInspector")
            .field("timeout", &self.timeout)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl LiveInspector {
    /// Creates an inspector.
    #[must_use]
    pub fn new(query: Arc<dyn InfraQuery>, timeout: Duration, concurrency: usize) -> Self {
        Self {
            query,
            timeout,
            concurrency: concurrency.max(1),
        }
    }

    /// Inspects every listed resource.
    ///
    /// Declared types take precedence over listed types so that declared and
    /// observed entries of the same id compare as the same kind.
    pub async fn inspect(&self, declared: &DeclaredState) -> Inspection {
        let listed = match tokio::time::timeout(self.timeout, self.query.list_resources()).await {
            Ok(Ok(refs)) => refs,
            Ok(Err(e)) => return Self::unreachable(declared, &e),
            Err(_) => {
                let e = InspectionError::Unreachable {
                    message: format!("listing timed out after {}s", self.timeout.as_secs()),
                };
                return Self::unreachable(declared, &e);
            }
        };

        let mut seen = BTreeSet::new();
        let refs: Vec<ResourceRef> = listed
            .into_iter()
            .filter(|r| seen.insert(r.id.clone()))
            .map(|mut r| {
                if let Some(declaration) = declared.get(&r.id) {
                    r.resource_type = declaration.resource_type;
                }
                r
            })
            .collect();

        debug!("Inspecting {} resources (concurrency {})", refs.len(), self.concurrency);

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut pending: BTreeSet<String> = refs.iter().map(|r| r.id.clone()).collect();
        let mut tasks = JoinSet::new();

        for resource in &refs {
            let query = Arc::clone(&self.query);
            let semaphore = Arc::clone(&semaphore);
            let resource = resource.clone();
            let timeout = self.timeout;

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = query_with_timeout(query.as_ref(), &resource, timeout).await;
                (resource, result)
            });
        }

        let mut inspection = Inspection::default();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((resource, result)) => {
                    pending.remove(&resource.id);
                    match result {
                        Ok(Some(mut observed)) => {
                            observed.resource_type = resource.resource_type;
                            inspection.resources.insert(observed.id.clone(), observed);
                        }
                        Ok(None) => {
                            debug!("{} disappeared between listing and query", resource.id);
                        }
                        Err(e) => {
                            warn!("Inspection of {} degraded to unknown: {}", resource.id, e);
                            inspection.errors.push(InspectionFailure::from(&e));
                            inspection.resources.insert(
                                resource.id.clone(),
                                ObservedResource::unknown(resource.id, resource.resource_type),
                            );
                        }
                    }
                }
                Err(e) => {
                    warn!("Inspection task failed: {}", e);
                }
            }
        }

        for id in pending {
            let resource_type = refs
                .iter()
                .find(|r| r.id == id)
                .map(|r| r.resource_type)
                .unwrap_or(crate::declared::ResourceType::Container);
            inspection.errors.push(InspectionFailure {
                resource_id: Some(id.clone()),
                message: String::from("inspection task aborted"),
            });
            inspection
                .resources
                .insert(id.clone(), ObservedResource::unknown(id, resource_type));
        }

        inspection.errors.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));

        info!(
            "Inspection complete: {} observed, {} known, {} errors",
            inspection.resources.len(),
            inspection.known_count(),
            inspection.errors.len()
        );

        inspection
    }

    /// Re-queries a single declared resource.
    ///
    /// Returns `Ok(None)` if the resource does not exist.
    ///
    /// # Errors
    ///
    /// Returns an `InspectionError` if the query fails or times out.
    pub async fn inspect_one(
        &self,
        declaration: &ResourceDeclaration,
    ) -> Result<Option<ObservedResource>, InspectionError> {
        let resource = ResourceRef::from(declaration);
        let observed = query_with_timeout(self.query.as_ref(), &resource, self.timeout).await?;
        Ok(observed.map(|mut o| {
            o.resource_type = declaration.resource_type;
            o
        }))
    }

    /// Every declared resource is unknown when the runtime cannot be listed.
    fn unreachable(declared: &DeclaredState, error: &InspectionError) -> Inspection {
        warn!("Infrastructure listing failed: {}", error);

        let mut inspection = Inspection::default();
        for declaration in declared.iter() {
            inspection.errors.push(InspectionFailure {
                resource_id: Some(declaration.id.clone()),
                message: error.to_string(),
            });
            inspection.resources.insert(
                declaration.id.clone(),
                ObservedResource::unknown(declaration.id.clone(), declaration.resource_type),
            );
        }
        inspection
    }
}

async fn query_with_timeout(
    query: &dyn InfraQuery,
    resource: &ResourceRef,
    timeout: Duration,
) -> Result<Option<ObservedResource>, InspectionError> {
    match tokio::time::timeout(timeout, query.query(resource)).await {
        Ok(result) => result,
        Err(_) => Err(InspectionError::Timeout {
            resource: resource.id.clone(),
            timeout_secs: timeout.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declared::{Attributes, ResourceType};
    use crate::inspect::ResourceStatus;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeQuery {
        resources: BTreeMap<String, ObservedResource>,
        failing: HashSet<String>,
        slow: HashSet<String>,
        unreachable: bool,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeQuery {
        fn with(mut self, id: &str, status: ResourceStatus) -> Self {
            self.resources.insert(
                id.to_string(),
                ObservedResource::new(id, ResourceType::Container, status, Attributes::default()),
            );
            self
        }
    }

    #[async_trait]
    impl InfraQuery for FakeQuery {
        async fn list_resources(&self) -> Result<Vec<ResourceRef>, InspectionError> {
            if self.unreachable {
                return Err(InspectionError::Unreachable { message: String::from("daemon down") });
            }
            Ok(self
                .resources
                .values()
                .map(|r| ResourceRef::new(r.id.clone(), r.resource_type))
                .collect())
        }

        async fn query(
            &self,
            resource: &ResourceRef,
        ) -> Result<Option<ObservedResource>, InspectionError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.slow.contains(&resource.id) {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(&resource.id) {
                return Err(InspectionError::query(&resource.id, "inspect failed"));
            }
            Ok(self.resources.get(&resource.id).cloned())
        }
    }

    fn declared(ids: &[&str]) -> DeclaredState {
        DeclaredState::from_declarations(
            "test",
            ids.iter()
                .map(|id| ResourceDeclaration::new(*id, ResourceType::WebServer))
                .collect(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_declared_type_overrides_listing() {
        let query = FakeQuery::default().with("web-1", ResourceStatus::Running);
        let inspector = LiveInspector::new(Arc::new(query), Duration::from_secs(1), 4);

        let inspection = inspector.inspect(&declared(&["web-1"])).await;
        assert_eq!(inspection.get("web-1").unwrap().resource_type, ResourceType::WebServer);
        assert!(!inspection.is_degraded());
    }

    #[tokio::test]
    async fn test_partial_failure_degrades_one_resource() {
        let mut query = FakeQuery::default()
            .with("web-1", ResourceStatus::Running)
            .with("web-2", ResourceStatus::Running);
        query.failing.insert(String::from("web-2"));

        let inspector = LiveInspector::new(Arc::new(query), Duration::from_secs(1), 4);
        let inspection = inspector.inspect(&declared(&["web-1", "web-2"])).await;

        assert_eq!(inspection.get("web-1").unwrap().status, ResourceStatus::Running);
        assert!(inspection.get("web-2").unwrap().is_unknown());
        assert_eq!(inspection.errors.len(), 1);
        assert_eq!(inspection.errors[0].resource_id.as_deref(), Some("web-2"));
        assert!(inspection.is_degraded());
    }

    #[tokio::test]
    async fn test_slow_query_times_out() {
        let mut query = FakeQuery::default().with("web-1", ResourceStatus::Running);
        query.slow.insert(String::from("web-1"));

        let inspector = LiveInspector::new(Arc::new(query), Duration::from_millis(100), 4);
        let inspection = inspector.inspect(&declared(&["web-1"])).await;

        assert!(inspection.get("web-1").unwrap().is_unknown());
        assert!(inspection.errors[0].message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_unreachable_marks_every_declared_resource_unknown() {
        let query = FakeQuery { unreachable: true, ..FakeQuery::default() };
        let inspector = LiveInspector::new(Arc::new(query), Duration::from_secs(1), 4);

        let inspection = inspector.inspect(&declared(&["a", "b"])).await;
        assert_eq!(inspection.resources.len(), 2);
        assert!(inspection.resources.values().all(ObservedResource::is_unknown));
        assert_eq!(inspection.errors.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let mut query = FakeQuery::default();
        for i in 0..10 {
            query = query.with(&format!("c-{i}"), ResourceStatus::Running);
        }
        let query = Arc::new(query);
        let inspector = LiveInspector::new(query.clone(), Duration::from_secs(1), 3);

        let inspection = inspector.inspect(&declared(&[])).await;
        assert_eq!(inspection.resources.len(), 10);
        assert!(query.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_inspect_one_missing_resource() {
        let query = Arc::new(FakeQuery::default());
        let inspector = LiveInspector::new(query, Duration::from_secs(1), 1);
        let declaration = ResourceDeclaration::new("web-9", ResourceType::WebServer);
        assert!(inspector.inspect_one(&declaration).await.unwrap().is_none());
    }
}
