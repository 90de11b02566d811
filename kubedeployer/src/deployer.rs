//! The entry point callers drive. Every pass and every namespace change runs
//! under one lock, so the registry has a single writer.

use serde::Serialize;
use tokio::sync::Mutex;

use crate::{
    backend::ResourceBackend,
    namespace::{NamespaceLifecycle, NamespaceReport},
    reconcile::{Error, ReconciliationReport, Reconciler, RequestsByOwner},
    registry::{OwnershipRegistry, RegistryState},
};

/// Result of [`Deployer::submit_batch`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SubmitOutcome {
    pub namespace: NamespaceReport,
    pub reconciliation: ReconciliationReport,
}

impl SubmitOutcome {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.namespace.failures.is_empty() && self.reconciliation.is_clean()
    }
}

/// A deployer instance: one backend, one registry and the namespace it
/// targets.
///
/// Every operation locks the registry for its whole duration, so concurrent
/// callers are served one at a time.
pub struct Deployer<B, R> {
    backend: B,
    registry: Mutex<R>,
    name: String,
    default_namespace: String,
    concurrency: usize,
}

impl<B, R> Deployer<B, R>
where
    B: ResourceBackend,
    R: OwnershipRegistry,
{
    /// # Arguments
    ///
    /// * `backend` - Cluster the deployer writes to.
    /// * `registry` - Ownership records and namespace target, already opened.
    /// * `name` - Instance name stamped on every object.
    /// * `default_namespace` - Namespace used until a batch or
    ///   [`Deployer::set_namespace`] names another.
    /// * `concurrency` - Upper bound of owners reconciled at once.
    pub fn new(
        backend: B,
        registry: R,
        name: impl Into<String>,
        default_namespace: impl Into<String>,
        concurrency: usize,
    ) -> Self {
        Self {
            backend,
            registry: Mutex::new(registry),
            name: name.into(),
            default_namespace: default_namespace.into(),
            concurrency,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Reconciles `namespace` against `requests`. Without a namespace the
    /// registered target is used, falling back to the configured default.
    ///
    /// A namespace different from the registered target is treated as a
    /// namespace change before the pass runs.
    ///
    /// Never fails as a whole. Rejections, backend failures and a failed
    /// commit are all reported in the returned [`SubmitOutcome`].
    pub async fn submit_batch(
        &self,
        namespace: Option<&str>,
        requests: RequestsByOwner,
    ) -> SubmitOutcome {
        let mut registry = self.registry.lock().await;
        let namespace = namespace
            .map(ToString::to_string)
            .or_else(|| registry.namespace_target().current.clone())
            .unwrap_or_else(|| self.default_namespace.clone());

        let namespace_report = self.retarget(&mut *registry, &namespace).await;
        let reconciliation = Reconciler::new(&self.backend, &self.name, self.concurrency)
            .reconcile(&mut *registry, &namespace, requests)
            .await;
        SubmitOutcome { namespace: namespace_report, reconciliation }
    }

    /// Points the deployer at `namespace` and migrates away from the previous
    /// target.
    pub async fn set_namespace(&self, namespace: &str) -> NamespaceReport {
        let mut registry = self.registry.lock().await;
        let mut report = self.retarget(&mut *registry, namespace).await;
        if let Err(source) = registry.commit() {
            registry.rollback();
            let err = Error::Registry { source };
            tracing::error!("{err}");
            report.failures.push(err.to_string());
        }
        report
    }

    /// Runs the namespace lifecycle for an explicit change without touching
    /// the registered target.
    pub async fn on_namespace_change(
        &self,
        previous: Option<&str>,
        current: &str,
    ) -> NamespaceReport {
        let registry = self.registry.lock().await;
        NamespaceLifecycle::new(&self.backend, &self.name)
            .on_namespace_change(&*registry, previous, current)
            .await
    }

    /// Deletes empty namespaces this deployer created, except the current
    /// target.
    pub async fn prune_namespaces(&self) -> Vec<NamespaceReport> {
        let registry = self.registry.lock().await;
        let current = registry.namespace_target().current.clone();
        NamespaceLifecycle::new(&self.backend, &self.name).prune_unused(current.as_deref()).await
    }

    pub async fn snapshot(&self) -> RegistryState { self.registry.lock().await.snapshot() }

    async fn retarget(&self, registry: &mut R, namespace: &str) -> NamespaceReport {
        let mut target = registry.namespace_target().clone();
        let previous = target.current.clone();
        let lifecycle = NamespaceLifecycle::new(&self.backend, &self.name);
        if target.retarget(namespace) {
            tracing::info!(
                "Namespace target changes from {} to {namespace}",
                previous.as_deref().unwrap_or("<none>")
            );
            let report =
                lifecycle.on_namespace_change(&*registry, previous.as_deref(), namespace).await;
            registry.set_namespace_target(target);
            report
        } else {
            lifecycle.on_namespace_change(&*registry, None, namespace).await
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::Arc};

    use super::*;
    use crate::{
        backend::memory::InMemoryBackend,
        namespace::NamespaceOutcome,
        registry::MemoryRegistry,
        resource::{ObjectKind, OwnerId, ResourceRef, ResourceRequest, ResourceSpec, ServiceSpec},
    };

    fn service(owner: &str, name: &str) -> ResourceRequest {
        ResourceRequest {
            owner: OwnerId::from(owner),
            name: name.to_string(),
            namespace: String::new(),
            sequence_id: None,
            spec: ResourceSpec::Service(ServiceSpec::default()),
        }
    }

    fn service_ref(namespace: &str, name: &str) -> ResourceRef {
        ResourceRef::new(ObjectKind::Service, namespace, format!("{name}-service"))
    }

    fn deployer() -> Deployer<InMemoryBackend, MemoryRegistry> {
        Deployer::new(InMemoryBackend::new(), MemoryRegistry::new(), "deployer-a", "ns1", 2)
    }

    #[tokio::test]
    async fn test_first_batch_creates_target_namespace() {
        let deployer = deployer();
        let requests = BTreeMap::from([(OwnerId::from("app1"), vec![service("app1", "web")])]);
        let outcome = deployer.submit_batch(None, requests).await;

        assert!(outcome.is_clean());
        assert!(outcome.namespace.created);
        assert_eq!(outcome.reconciliation.namespace, "ns1");
        assert_eq!(deployer.snapshot().await.namespace.current.as_deref(), Some("ns1"));
        assert!(deployer.backend.contains(&service_ref("ns1", "web")));
    }

    #[tokio::test]
    async fn test_moving_namespace_migrates_resources() {
        let deployer = deployer();
        let requests = BTreeMap::from([(OwnerId::from("app1"), vec![service("app1", "web")])]);
        let _outcome = deployer.submit_batch(Some("ns1"), requests.clone()).await;

        let outcome = deployer.submit_batch(Some("ns2"), requests).await;
        assert_eq!(outcome.namespace.previous.as_deref(), Some("ns1"));
        assert_eq!(outcome.namespace.outcome, NamespaceOutcome::Deleted);
        assert!(deployer.backend.contains(&service_ref("ns2", "web")));
        assert!(!deployer.backend.contains(&service_ref("ns1", "web")));

        let state = deployer.snapshot().await;
        assert_eq!(state.namespace.current.as_deref(), Some("ns2"));
        assert_eq!(state.namespace.previous.as_deref(), Some("ns1"));
        assert_eq!(state.owners[&OwnerId::from("app1")].resources[0].namespace, "ns2");
    }

    #[tokio::test]
    async fn test_set_namespace_commits_target() {
        let deployer = deployer();
        let report = deployer.set_namespace("ns3").await;
        assert!(report.failures.is_empty());
        assert_eq!(deployer.snapshot().await.namespace.current.as_deref(), Some("ns3"));
    }

    #[tokio::test]
    async fn test_concurrent_batches_are_serialized() {
        let deployer = Arc::new(deployer());
        let first = {
            let deployer = Arc::clone(&deployer);
            async move {
                deployer
                    .submit_batch(
                        None,
                        BTreeMap::from([(OwnerId::from("app1"), vec![service("app1", "web")])]),
                    )
                    .await
            }
        };
        let second = {
            let deployer = Arc::clone(&deployer);
            async move {
                deployer
                    .submit_batch(
                        None,
                        BTreeMap::from([(OwnerId::from("app2"), vec![service("app2", "api")])]),
                    )
                    .await
            }
        };
        let (first, second) = tokio::join!(first, second);

        let admitted = first.reconciliation.admitted.len() + second.reconciliation.admitted.len();
        let rejected = first.reconciliation.rejected.len() + second.reconciliation.rejected.len();
        assert_eq!((admitted, rejected), (2, 0));
        assert_eq!(second.reconciliation.deleted_count(), 1);
        assert_eq!(
            deployer.snapshot().await.owners.keys().cloned().collect::<Vec<_>>(),
            vec![OwnerId::from("app2")]
        );
        assert!(deployer.backend.contains(&service_ref("ns1", "api")));
    }
}
