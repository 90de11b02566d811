//! One reconciliation pass: admit, apply, sweep orphans, commit.

mod conflict;
pub mod error;
mod report;

use std::collections::{BTreeMap, BTreeSet};

use deployer_base::consts::{UNKNOWN_OWNER, k8s::labels};
use futures::StreamExt;

pub use self::{
    conflict::{ConflictDetector, ConflictResult},
    error::Error,
    report::{
        Admitted, Deleted, Failure, OwnerStatus, ReconciliationReport, Rejected, Rejection,
        Workload,
    },
};
use crate::{
    backend::{self, Manifest, ResourceBackend, Selector, deployer_labels, owner_labels},
    registry::{OwnershipRecord, OwnershipRegistry},
    resource::{OwnerId, ResourceKind, ResourceRef, ResourceRequest},
};

pub type RequestsByOwner = BTreeMap<OwnerId, Vec<ResourceRequest>>;

/// What happened to one owner's admitted requests.
struct ApplyOutcome {
    owner: OwnerId,
    failures: Vec<(ResourceRef, backend::Error)>,
}

/// Outcome of deleting one owner's resources.
struct DeleteOutcome {
    owner: OwnerId,
    deleted: usize,
    kept: Vec<ResourceRequest>,
    failures: Vec<(Option<ResourceRef>, backend::Error)>,
}

impl DeleteOutcome {
    const fn new(owner: OwnerId, deleted: usize) -> Self {
        Self { owner, deleted, kept: Vec::new(), failures: Vec::new() }
    }
}

/// Runs reconciliation passes of one deployer instance against a backend.
///
/// A reconciler holds no state between passes. Everything it knows about
/// earlier passes comes from the registry handed to [`Reconciler::reconcile`].
pub struct Reconciler<'a, B> {
    backend: &'a B,
    deployer: &'a str,
    concurrency: usize,
}

impl<'a, B> Reconciler<'a, B>
where
    B: ResourceBackend,
{
    /// # Arguments
    ///
    /// * `backend` - Where resources are applied, read and deleted.
    /// * `deployer` - Name of this deployer instance, stamped on every object
    ///   and used to find the objects it left behind.
    /// * `concurrency` - Upper bound of owners processed at once. Zero is
    ///   treated as one.
    pub fn new(backend: &'a B, deployer: &'a str, concurrency: usize) -> Self {
        Self { backend, deployer, concurrency: concurrency.max(1) }
    }

    /// Brings `namespace` in line with `requests` and records the result in
    /// `registry`.
    ///
    /// Every owner present in `requests` with a non-empty list keeps what it
    /// was admitted. Every other owner known to the registry or to the
    /// backend is orphaned and swept. Failures are scoped to one owner and
    /// never abort the pass.
    ///
    /// An owner whose apply failed, or whose ownership could not be checked,
    /// keeps its previous record so a later pass can still prune it.
    pub async fn reconcile<R>(
        &self,
        registry: &mut R,
        namespace: &str,
        requests: RequestsByOwner,
    ) -> ReconciliationReport
    where
        R: OwnershipRegistry,
    {
        let mut report = ReconciliationReport::new(namespace);
        let requests = normalize(namespace, requests);

        let (admitted, unverified) = self.admit(registry, &requests, &mut report).await;
        for (owner, owner_requests) in &admitted {
            report.admitted.extend(owner_requests.iter().map(|request| Admitted {
                owner: owner.clone(),
                resource: request.reference(),
            }));
        }

        // Owners that keep their previous record. Nothing of theirs is pruned.
        let mut held = unverified;
        for ApplyOutcome { owner, failures } in self.apply(&admitted).await {
            for (reference, source) in failures {
                report.failures.push(Failure {
                    owner: owner.clone(),
                    resource: Some(reference),
                    message: Error::BackendUnavailable { source }.to_string(),
                });
                let _inserted = held.insert(owner.clone());
            }
        }
        for (owner, workload) in self.observe(namespace, &admitted, &held).await {
            match workload {
                Ok(workload) => {
                    let _previous = report.workloads.insert(owner, workload);
                }
                Err(source) => {
                    let err = Error::BackendUnavailable { source };
                    tracing::warn!("Cannot observe the workload of {owner}, error: {err}");
                    report.errors.push(err.to_string());
                }
            }
        }

        // Taken only once every apply of the batch has returned.
        let orphans = self.orphans(registry, namespace, &requests, &mut report).await;
        let swept = self.sweep(namespace, &orphans).await;
        let pruned = self.prune(registry, &requests, &held).await;

        for (owner, owner_requests) in &admitted {
            if held.contains(owner) {
                let resources = match registry.get(owner) {
                    Some(previous) => {
                        tracing::warn!("Keeping the previous record of {owner}, its pass failed");
                        merge(&previous.resources, owner_requests)
                    }
                    None => owner_requests.clone(),
                };
                if !resources.is_empty() {
                    registry.set(owner.clone(), OwnershipRecord::new(resources));
                }
                continue;
            }
            if owner_requests.is_empty() {
                continue;
            }
            let mut resources = owner_requests.clone();
            if let Some(outcome) = pruned.iter().find(|outcome| outcome.owner == *owner) {
                resources.extend(outcome.kept.iter().cloned());
            }
            registry.set(owner.clone(), OwnershipRecord::new(resources));
        }
        for owner in requests.keys() {
            if held.contains(owner)
                || orphans.contains(owner)
                || admitted.get(owner).is_some_and(|admitted| !admitted.is_empty())
            {
                continue;
            }
            let kept = pruned
                .iter()
                .find(|outcome| outcome.owner == *owner)
                .map(|outcome| outcome.kept.clone())
                .unwrap_or_default();
            if kept.is_empty() {
                if registry.remove(owner).is_some() {
                    tracing::info!("Removed {owner} from the registry, nothing was admitted");
                }
            } else {
                registry.set(owner.clone(), OwnershipRecord::new(kept));
            }
        }

        for DeleteOutcome { owner, deleted, failures, .. } in swept.into_iter().chain(pruned) {
            let orphaned = orphans.contains(&owner);
            if orphaned && failures.is_empty() && registry.remove(&owner).is_some() {
                tracing::info!("Removed orphaned owner {owner} from the registry");
            }
            if deleted > 0 {
                report.deleted.push(Deleted { owner: owner.clone(), count: deleted, orphaned });
            }
            for (resource, source) in failures {
                report.failures.push(Failure {
                    owner: owner.clone(),
                    resource,
                    message: Error::BackendUnavailable { source }.to_string(),
                });
            }
        }

        match registry.commit() {
            Ok(()) => report.committed = true,
            Err(source) => {
                registry.rollback();
                let err = Error::Registry { source };
                tracing::error!("{err}");
                report.errors.push(err.to_string());
            }
        }

        tracing::info!(
            "Reconciled namespace {namespace}: {} admitted, {} rejected, {} deleted, {} failed",
            report.admitted.len(),
            report.rejected.len(),
            report.deleted_count(),
            report.failures.len()
        );
        report
    }

    /// Partitions requests into admitted and rejected. Owners already in the
    /// registry are checked first, then the rest in lexicographic order, so a
    /// registered owner keeps its names against a newcomer.
    ///
    /// Also returns the owners with a request whose ownership could not be
    /// checked at all.
    async fn admit<R>(
        &self,
        registry: &R,
        requests: &RequestsByOwner,
        report: &mut ReconciliationReport,
    ) -> (RequestsByOwner, BTreeSet<OwnerId>)
    where
        R: OwnershipRegistry,
    {
        let known = registry.owners();
        let (registered, newcomers): (Vec<_>, Vec<_>) =
            requests.iter().partition(|(owner, _)| known.contains(*owner));

        let mut detector = ConflictDetector::new(self.backend);
        let mut admitted = RequestsByOwner::new();
        let mut unverified = BTreeSet::new();
        for (owner, owner_requests) in registered.into_iter().chain(newcomers) {
            let entry = admitted.entry(owner.clone()).or_default();
            for request in owner_requests {
                if request.kind() == ResourceKind::Namespace {
                    tracing::warn!("Rejected namespace request {} from {owner}", request.name);
                    report.rejected.push(Rejected {
                        owner: owner.clone(),
                        resource: request.reference(),
                        reason: Rejection::ClusterScoped,
                    });
                    continue;
                }
                match detector.admit(request).await {
                    ConflictResult::Ok => entry.push(request.clone()),
                    ConflictResult::Conflict(existing_owner) => {
                        tracing::warn!(
                            "Rejected {} from {owner}, owned by {existing_owner}",
                            request.reference()
                        );
                        report.rejected.push(Rejected {
                            owner: owner.clone(),
                            resource: request.reference(),
                            reason: Rejection::Conflict { existing_owner },
                        });
                    }
                    ConflictResult::Unavailable(message) => {
                        let reference = request.reference();
                        let err =
                            Error::OwnershipUnverified { reference: reference.clone(), message };
                        tracing::warn!("Rejected {reference} from {owner}: {err}");
                        report.rejected.push(Rejected {
                            owner: owner.clone(),
                            resource: reference.clone(),
                            reason: Rejection::Conflict {
                                existing_owner: UNKNOWN_OWNER.to_string(),
                            },
                        });
                        report.failures.push(Failure {
                            owner: owner.clone(),
                            resource: Some(reference),
                            message: err.to_string(),
                        });
                        let _inserted = unverified.insert(owner.clone());
                    }
                }
            }
        }
        (admitted, unverified)
    }

    /// Applies owners concurrently and the requests of one owner in order.
    async fn apply(&self, admitted: &RequestsByOwner) -> Vec<ApplyOutcome> {
        let futs = admitted.iter().filter(|(_, requests)| !requests.is_empty()).map(
            |(owner, requests)| async move {
                let mut failures = Vec::new();
                for request in requests {
                    let manifest = Manifest::for_request(request, self.deployer);
                    match self.backend.apply(&manifest).await {
                        Ok(reference) => tracing::debug!("Applied {reference} for {owner}"),
                        Err(err) => {
                            tracing::warn!(
                                "Failed to apply {} for {owner}, error: {err}",
                                request.reference()
                            );
                            failures.push((request.reference(), err));
                        }
                    }
                }
                ApplyOutcome { owner: owner.clone(), failures }
            },
        );
        futures::stream::iter(futs).buffer_unordered(self.concurrency).collect().await
    }

    /// Reads back the pods and node ports of every owner applied in full.
    async fn observe(
        &self,
        namespace: &str,
        admitted: &RequestsByOwner,
        held: &BTreeSet<OwnerId>,
    ) -> Vec<(OwnerId, Result<Workload, backend::Error>)> {
        let futs = admitted
            .iter()
            .filter(|(owner, requests)| !requests.is_empty() && !held.contains(*owner))
            .map(|(owner, _)| async move {
                let selector = Selector::in_namespace(namespace)
                    .with_labels(owner_labels(owner, self.deployer));
                let workload = async {
                    let pods = self.backend.pods(&selector).await?;
                    let ports = self.backend.node_ports(&selector).await?;
                    Ok::<_, backend::Error>(Workload::new(&pods, ports))
                };
                (owner.clone(), workload.await)
            });
        futures::stream::iter(futs).buffer_unordered(self.concurrency).collect().await
    }

    /// Owners seen live or in the registry that no longer ask for anything.
    async fn orphans<R>(
        &self,
        registry: &R,
        namespace: &str,
        requests: &RequestsByOwner,
        report: &mut ReconciliationReport,
    ) -> BTreeSet<OwnerId>
    where
        R: OwnershipRegistry,
    {
        let live: BTreeSet<OwnerId> = match self
            .backend
            .label_values(namespace, labels::RESOURCE_FOR, &deployer_labels(self.deployer))
            .await
        {
            Ok(values) => values.into_iter().map(OwnerId::from).collect(),
            Err(err) => {
                let err = Error::BackendUnavailable { source: err };
                tracing::warn!(
                    "Cannot list live owners in {namespace}, falling back to the registry: {err}"
                );
                report.errors.push(err.to_string());
                BTreeSet::new()
            }
        };

        live.into_iter()
            .chain(registry.owners())
            .filter(|owner| requests.get(owner).is_none_or(Vec::is_empty))
            .collect()
    }

    /// One label-selector delete per orphaned owner.
    async fn sweep(&self, namespace: &str, orphans: &BTreeSet<OwnerId>) -> Vec<DeleteOutcome> {
        let futs = orphans.iter().map(|owner| async move {
            let selector =
                Selector::in_namespace(namespace).with_labels(owner_labels(owner, self.deployer));
            match self.backend.delete(&selector).await {
                Ok(deleted) => {
                    tracing::info!("Swept {deleted} object(s) of orphaned owner {owner}");
                    DeleteOutcome::new(owner.clone(), deleted)
                }
                Err(err) => {
                    tracing::warn!("Failed to sweep orphaned owner {owner}, error: {err}");
                    let mut outcome = DeleteOutcome::new(owner.clone(), 0);
                    outcome.failures.push((None, err));
                    outcome
                }
            }
        });
        futures::stream::iter(futs).buffer_unordered(self.concurrency).collect().await
    }

    /// Deletes by name what present owners had before but no longer request.
    /// Requests whose objects could not be deleted stay on the record.
    async fn prune<R>(
        &self,
        registry: &R,
        requests: &RequestsByOwner,
        held: &BTreeSet<OwnerId>,
    ) -> Vec<DeleteOutcome>
    where
        R: OwnershipRegistry,
    {
        let mut outcomes = Vec::new();
        for (owner, owner_requests) in requests {
            if owner_requests.is_empty() || held.contains(owner) {
                continue;
            }
            let Some(previous) = registry.get(owner) else { continue };
            let requested =
                owner_requests.iter().map(ResourceRequest::reference).collect::<BTreeSet<_>>();

            let mut outcome = DeleteOutcome::new(owner.clone(), 0);
            let stale_requests = previous
                .resources
                .iter()
                .filter(|request| !requested.contains(&request.reference()));
            for stale in stale_requests {
                let mut failed = false;
                for reference in stale.object_references() {
                    match self.backend.delete_named(&reference).await {
                        Ok(true) => {
                            tracing::info!("Pruned {reference} of {owner}");
                            outcome.deleted += 1;
                        }
                        Ok(false) => {}
                        Err(err) => {
                            tracing::warn!("Failed to prune {reference} of {owner}, error: {err}");
                            outcome.failures.push((Some(reference), err));
                            failed = true;
                        }
                    }
                }
                if failed {
                    outcome.kept.push(stale.clone());
                }
            }
            outcomes.push(outcome);
        }
        outcomes
    }
}

/// `previous` followed by the requests of `current` it does not already name.
fn merge(previous: &[ResourceRequest], current: &[ResourceRequest]) -> Vec<ResourceRequest> {
    let known = previous.iter().map(ResourceRequest::reference).collect::<BTreeSet<_>>();
    previous
        .iter()
        .chain(current.iter().filter(|request| !known.contains(&request.reference())))
        .cloned()
        .collect()
}

/// Pins every request to the owner it was submitted under and to the pass
/// namespace.
fn normalize(namespace: &str, requests: RequestsByOwner) -> RequestsByOwner {
    requests
        .into_iter()
        .map(|(owner, owner_requests)| {
            let owner_requests = owner_requests
                .into_iter()
                .map(|request| ResourceRequest {
                    owner: owner.clone(),
                    namespace: namespace.to_string(),
                    ..request
                })
                .collect();
            (owner, owner_requests)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::{
        backend::{PodState, memory::InMemoryBackend},
        registry::{self, MemoryRegistry, NamespaceTarget, RegistryState},
        resource::{DeploymentSpec, ObjectKind, ResourceSpec, ServiceSpec},
    };

    const DEPLOYER: &str = "deployer-a";

    fn service(owner: &str, name: &str) -> ResourceRequest {
        ResourceRequest {
            owner: OwnerId::from(owner),
            name: name.to_string(),
            namespace: "ns1".to_string(),
            sequence_id: None,
            spec: ResourceSpec::Service(ServiceSpec::default()),
        }
    }

    fn deployment(owner: &str, name: &str) -> ResourceRequest {
        ResourceRequest {
            owner: OwnerId::from(owner),
            name: name.to_string(),
            namespace: "ns1".to_string(),
            sequence_id: None,
            spec: ResourceSpec::Deployment(DeploymentSpec {
                image: format!("registry.example.com/{name}:1"),
                replicas: 1,
                env: BTreeMap::new(),
                image_pull_secret: None,
                rolling_updates: true,
            }),
        }
    }

    fn batch(entries: Vec<(&str, Vec<ResourceRequest>)>) -> RequestsByOwner {
        entries.into_iter().map(|(owner, requests)| (OwnerId::from(owner), requests)).collect()
    }

    async fn pass<R: OwnershipRegistry>(
        backend: &InMemoryBackend,
        registry: &mut R,
        requests: RequestsByOwner,
    ) -> ReconciliationReport {
        Reconciler::new(backend, DEPLOYER, 4).reconcile(registry, "ns1", requests).await
    }

    fn service_ref(name: &str) -> ResourceRef {
        ResourceRef::new(ObjectKind::Service, "ns1", format!("{name}-service"))
    }

    fn deployment_ref(name: &str) -> ResourceRef {
        ResourceRef::new(ObjectKind::Deployment, "ns1", format!("{name}-deployment"))
    }

    fn web_only() -> RequestsByOwner { batch(vec![("app1", vec![service("app1", "web")])]) }

    fn stamped<'a>(owner: &'a str, deployer: &'a str) -> [(&'static str, &'a str); 3] {
        [
            (labels::RESOURCE_FOR, owner),
            (labels::DEPLOYER, deployer),
            (labels::MANAGED_BY, "kubedeployer"),
        ]
    }

    #[tokio::test]
    async fn test_second_identical_pass_changes_nothing() {
        let backend = InMemoryBackend::new();
        let mut registry = MemoryRegistry::new();
        let requests = batch(vec![
            ("app1", vec![service("app1", "web"), deployment("app1", "web")]),
            ("app2", vec![service("app2", "api")]),
        ]);

        let first = pass(&backend, &mut registry, requests.clone()).await;
        let live = backend.references();
        let state = registry.snapshot();

        let second = pass(&backend, &mut registry, requests).await;
        assert!(first.is_clean());
        assert!(second.is_clean());
        assert!(second.deleted.is_empty());
        assert_eq!(backend.references(), live);
        assert_eq!(registry.snapshot(), state);
        assert_eq!(backend.deleted_count(), 0);
    }

    #[tokio::test]
    async fn test_only_one_owner_gets_a_contested_name() {
        let backend = InMemoryBackend::new();
        let mut registry = MemoryRegistry::new();

        let report = pass(
            &backend,
            &mut registry,
            batch(vec![
                ("app1", vec![service("app1", "web")]),
                ("app2", vec![service("app2", "web")]),
            ]),
        )
        .await;

        assert_eq!(
            report.admitted,
            vec![Admitted { owner: OwnerId::from("app1"), resource: service_ref("web") }]
        );
        assert_eq!(
            report.rejected,
            vec![Rejected {
                owner: OwnerId::from("app2"),
                resource: service_ref("web"),
                reason: Rejection::Conflict { existing_owner: "app1".to_string() },
            }]
        );
        let web_labels = backend.labels_of(&service_ref("web")).unwrap();
        assert_eq!(web_labels.get(labels::RESOURCE_FOR).map(String::as_str), Some("app1"));
        assert_eq!(report.owner_statuses()[&OwnerId::from("app2")], OwnerStatus::Degraded);
        assert!(registry.get(&OwnerId::from("app2")).is_none());
    }

    #[tokio::test]
    async fn test_registered_owner_wins_over_newcomer() {
        let backend = InMemoryBackend::new();
        let request = service("zed", "web");
        let mut registry = MemoryRegistry::with_state(RegistryState {
            namespace: NamespaceTarget::default(),
            owners: BTreeMap::from([(
                OwnerId::from("zed"),
                OwnershipRecord::new(vec![request.clone()]),
            )]),
        });

        let report = pass(
            &backend,
            &mut registry,
            batch(vec![("app1", vec![service("app1", "web")]), ("zed", vec![request])]),
        )
        .await;

        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].owner, OwnerId::from("app1"));
        assert_eq!(
            report.rejected[0].reason,
            Rejection::Conflict { existing_owner: "zed".to_string() }
        );
    }

    #[tokio::test]
    async fn test_absent_owner_is_swept_and_forgotten() {
        let backend = InMemoryBackend::new();
        let mut registry = MemoryRegistry::new();
        let _report = pass(
            &backend,
            &mut registry,
            batch(vec![
                ("app1", vec![deployment("app1", "dep-a")]),
                ("app2", vec![deployment("app2", "dep-b"), service("app2", "dep-b")]),
            ]),
        )
        .await;

        let requests = batch(vec![("app1", vec![deployment("app1", "dep-a")])]);
        let report = pass(&backend, &mut registry, requests).await;

        assert_eq!(
            report.deleted,
            vec![Deleted { owner: OwnerId::from("app2"), count: 2, orphaned: true }]
        );
        assert!(!backend.contains(&deployment_ref("dep-b")));
        assert!(!backend.contains(&service_ref("dep-b")));
        assert!(backend.contains(&deployment_ref("dep-a")));

        let state = registry.snapshot();
        assert_eq!(state.owners.keys().cloned().collect::<Vec<_>>(), vec![OwnerId::from("app1")]);
        assert_eq!(
            state.owners[&OwnerId::from("app1")].resources,
            vec![deployment("app1", "dep-a")]
        );
        assert_eq!(report.owner_statuses()[&OwnerId::from("app2")], OwnerStatus::Removed);
    }

    #[tokio::test]
    async fn test_empty_request_list_orphans_owner() {
        let backend = InMemoryBackend::new();
        let mut registry = MemoryRegistry::new();
        let _report = pass(&backend, &mut registry, web_only()).await;

        let report = pass(&backend, &mut registry, batch(vec![("app1", Vec::new())])).await;
        assert_eq!(report.deleted_count(), 1);
        assert!(backend.references().is_empty());
        assert!(registry.snapshot().owners.is_empty());
    }

    #[tokio::test]
    async fn test_failing_owner_does_not_block_others() {
        let backend = InMemoryBackend::new();
        let mut registry = MemoryRegistry::new();
        let _report = pass(&backend, &mut registry, web_only()).await;

        backend.fail_owner("app1");
        let report = pass(
            &backend,
            &mut registry,
            batch(vec![
                ("app1", vec![service("app1", "web"), service("app1", "api")]),
                ("app2", vec![deployment("app2", "worker")]),
            ]),
        )
        .await;

        assert!(report.committed);
        assert!(backend.contains(&deployment_ref("worker")));
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().all(|failure| failure.owner == OwnerId::from("app1")));

        let state = registry.snapshot();
        assert_eq!(
            state.owners[&OwnerId::from("app1")].resources,
            vec![service("app1", "web"), service("app1", "api")]
        );
        assert_eq!(
            state.owners[&OwnerId::from("app2")].resources,
            vec![deployment("app2", "worker")]
        );
        assert_eq!(report.owner_statuses()[&OwnerId::from("app1")], OwnerStatus::Failed);
        assert_eq!(report.owner_statuses()[&OwnerId::from("app2")], OwnerStatus::Ready);
    }

    #[tokio::test]
    async fn test_failed_sweep_keeps_record() {
        let backend = InMemoryBackend::new();
        let mut registry = MemoryRegistry::new();
        let _report = pass(
            &backend,
            &mut registry,
            batch(vec![
                ("app1", vec![service("app1", "web")]),
                ("app2", vec![service("app2", "api")]),
            ]),
        )
        .await;

        backend.fail_owner("app2");
        let report = pass(&backend, &mut registry, web_only()).await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].owner, OwnerId::from("app2"));
        assert!(backend.contains(&service_ref("api")));
        assert!(registry.snapshot().owners.contains_key(&OwnerId::from("app2")));
    }

    #[tokio::test]
    async fn test_resources_no_longer_requested_are_pruned() {
        let backend = InMemoryBackend::new();
        let mut registry = MemoryRegistry::new();
        let _report = pass(
            &backend,
            &mut registry,
            batch(vec![("app1", vec![service("app1", "web"), service("app1", "api")])]),
        )
        .await;

        let report = pass(&backend, &mut registry, web_only()).await;

        assert_eq!(
            report.deleted,
            vec![Deleted { owner: OwnerId::from("app1"), count: 1, orphaned: false }]
        );
        assert!(!backend.contains(&service_ref("api")));
        assert_eq!(
            registry.snapshot().owners[&OwnerId::from("app1")].resources,
            vec![service("app1", "web")]
        );
    }

    #[tokio::test]
    async fn test_failed_prune_keeps_stale_request() {
        let backend = InMemoryBackend::new();
        let mut registry = MemoryRegistry::new();
        let _report = pass(
            &backend,
            &mut registry,
            batch(vec![("app1", vec![service("app1", "web"), service("app1", "api")])]),
        )
        .await;

        backend.fail_delete(service_ref("api"));
        let report = pass(&backend, &mut registry, web_only()).await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            registry.snapshot().owners[&OwnerId::from("app1")].resources,
            vec![service("app1", "web"), service("app1", "api")]
        );
    }

    #[tokio::test]
    async fn test_namespace_request_is_rejected() {
        let backend = InMemoryBackend::new();
        let mut registry = MemoryRegistry::new();
        let mut namespace = service("app1", "team-a");
        namespace.spec = ResourceSpec::Namespace;

        let report = pass(&backend, &mut registry, batch(vec![("app1", vec![namespace])])).await;
        assert_eq!(report.rejected[0].reason, Rejection::ClusterScoped);
        assert!(backend.references().is_empty());
        assert!(registry.snapshot().owners.is_empty());
    }

    #[tokio::test]
    async fn test_live_orphans_of_this_deployer_only_are_swept() {
        let backend = InMemoryBackend::new();
        let mut registry = MemoryRegistry::new();
        let ours = ResourceRef::new(ObjectKind::Secret, "ns1", "app9");
        let theirs = ResourceRef::new(ObjectKind::Secret, "ns1", "app8");
        backend.insert_raw(ours.clone(), &stamped("app9", DEPLOYER));
        backend.insert_raw(theirs.clone(), &stamped("app8", "deployer-b"));

        let report = pass(&backend, &mut registry, RequestsByOwner::new()).await;
        assert_eq!(report.deleted_count(), 1);
        assert!(!backend.contains(&ours));
        assert!(backend.contains(&theirs));
    }

    #[tokio::test]
    async fn test_unavailable_backend_rejects_everything() {
        let backend = InMemoryBackend::new();
        let mut registry = MemoryRegistry::new();
        backend.set_unavailable(true);

        let report = pass(&backend, &mut registry, web_only()).await;
        assert_eq!(
            report.rejected[0].reason,
            Rejection::Conflict { existing_owner: UNKNOWN_OWNER.to_string() }
        );
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.owner_statuses()[&OwnerId::from("app1")], OwnerStatus::Failed);
        assert_eq!(backend.applied_count(), 0);
    }

    #[tokio::test]
    async fn test_outage_keeps_records_for_later_prune() {
        let backend = InMemoryBackend::new();
        let mut registry = MemoryRegistry::new();
        let requests = batch(vec![("app1", vec![service("app1", "web"), service("app1", "api")])]);
        let _report = pass(&backend, &mut registry, requests.clone()).await;

        backend.set_unavailable(true);
        let report = pass(&backend, &mut registry, requests).await;
        assert!(report.committed);
        assert_eq!(report.rejected.len(), 2);
        assert_eq!(
            registry.snapshot().owners[&OwnerId::from("app1")].resources,
            vec![service("app1", "web"), service("app1", "api")]
        );

        backend.set_unavailable(false);
        let report = pass(&backend, &mut registry, web_only()).await;
        assert!(report.is_clean());
        assert_eq!(report.deleted_count(), 1);
        assert!(!backend.contains(&service_ref("api")));
        assert_eq!(
            registry.snapshot().owners[&OwnerId::from("app1")].resources,
            vec![service("app1", "web")]
        );
    }

    #[tokio::test]
    async fn test_fully_rejected_owner_keeps_undeleted_requests() {
        let backend = InMemoryBackend::new();
        let mut registry = MemoryRegistry::new();
        let _report = pass(
            &backend,
            &mut registry,
            batch(vec![("app1", vec![service("app1", "web"), service("app1", "api")])]),
        )
        .await;

        backend.insert_raw(service_ref("x"), &[(labels::RESOURCE_FOR, "app2")]);
        backend.fail_delete(service_ref("api"));
        let report =
            pass(&backend, &mut registry, batch(vec![("app1", vec![service("app1", "x")])])).await;

        assert!(report.admitted.is_empty());
        assert_eq!(report.rejected.len(), 1);
        assert!(!backend.contains(&service_ref("web")));
        assert!(backend.contains(&service_ref("api")));
        assert_eq!(
            registry.snapshot().owners[&OwnerId::from("app1")].resources,
            vec![service("app1", "api")]
        );
    }

    #[tokio::test]
    async fn test_workload_is_observed_after_apply() {
        let backend = InMemoryBackend::new();
        let mut registry = MemoryRegistry::new();
        backend.insert_pod(
            PodState {
                reference: ResourceRef::new(ObjectKind::Pod, "ns1", "web-deployment-5f7c"),
                ready: false,
                host_ip: Some("10.0.0.7".to_string()),
                error: Some("waiting: ImagePullBackOff".to_string()),
            },
            &stamped("app1", DEPLOYER),
        );
        backend.set_node_ports(service_ref("web"), &[(8080, 30080)]);

        let report = pass(
            &backend,
            &mut registry,
            batch(vec![
                ("app1", vec![deployment("app1", "web"), service("app1", "web")]),
                ("app2", vec![service("app2", "api")]),
            ]),
        )
        .await;

        let workload = &report.workloads[&OwnerId::from("app1")];
        assert_eq!((workload.pods, workload.ready_pods), (1, 0));
        assert_eq!(workload.error.as_deref(), Some("waiting: ImagePullBackOff"));
        assert_eq!(workload.host.as_deref(), Some("10.0.0.7"));
        assert_eq!(workload.ports, BTreeMap::from([(8080, 30080)]));
        assert_eq!(report.owner_statuses()[&OwnerId::from("app1")], OwnerStatus::Failed);

        assert_eq!(report.workloads[&OwnerId::from("app2")].pods, 0);
        assert_eq!(report.owner_statuses()[&OwnerId::from("app2")], OwnerStatus::Ready);
        assert!(report.is_clean());
    }

    /// A registry that never manages to persist.
    #[derive(Default)]
    struct BrokenRegistry(MemoryRegistry);

    impl OwnershipRegistry for BrokenRegistry {
        fn get(&self, owner: &OwnerId) -> Option<&OwnershipRecord> { self.0.get(owner) }

        fn owners(&self) -> BTreeSet<OwnerId> { self.0.owners() }

        fn set(&mut self, owner: OwnerId, record: OwnershipRecord) {
            self.0.set(owner, record);
        }

        fn remove(&mut self, owner: &OwnerId) -> Option<OwnershipRecord> {
            self.0.remove(owner)
        }

        fn namespace_target(&self) -> &NamespaceTarget { self.0.namespace_target() }

        fn set_namespace_target(&mut self, target: NamespaceTarget) {
            self.0.set_namespace_target(target);
        }

        fn commit(&mut self) -> Result<(), registry::Error> {
            let lock_path = PathBuf::from("registry.yaml.lock");
            Err(registry::Error::RegistryLocked { lock_path })
        }

        fn rollback(&mut self) { self.0.rollback(); }

        fn snapshot(&self) -> RegistryState { self.0.snapshot() }
    }

    #[tokio::test]
    async fn test_commit_failure_rolls_back() {
        let backend = InMemoryBackend::new();
        let mut registry = BrokenRegistry::default();

        let report = pass(&backend, &mut registry, web_only()).await;
        assert!(!report.committed);
        assert_eq!(report.errors.len(), 1);
        assert!(registry.owners().is_empty());
    }
}
