use std::{collections::BTreeMap, fmt};

use serde::Serialize;

use crate::{
    backend::PodState,
    reconcile::Error,
    resource::{OwnerId, ResourceRef},
};

/// Why a request was not admitted.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum Rejection {
    #[serde(rename_all = "camelCase")]
    Conflict { existing_owner: String },

    ClusterScoped,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Admitted {
    pub owner: OwnerId,
    pub resource: ResourceRef,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Rejected {
    pub owner: OwnerId,
    pub resource: ResourceRef,
    #[serde(flatten)]
    pub reason: Rejection,
}

impl Rejected {
    #[must_use]
    pub fn error(&self) -> Error {
        match &self.reason {
            Rejection::Conflict { existing_owner } => Error::Conflict {
                reference: self.resource.clone(),
                existing_owner: existing_owner.clone(),
            },
            Rejection::ClusterScoped => {
                Error::ClusterScopedRequest { reference: self.resource.clone() }
            }
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deleted {
    pub owner: OwnerId,
    pub count: usize,
    /// Whether the owner was swept entirely rather than pruned.
    pub orphaned: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Failure {
    pub owner: OwnerId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceRef>,
    pub message: String,
}

/// Pods and published ports of one owner's workload, observed after apply.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    pub pods: usize,
    pub ready_pods: usize,

    /// First container error among the pods.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Host IP of a node running the workload, preferring a ready pod.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Service port to node port.
    pub ports: BTreeMap<i32, i32>,
}

impl Workload {
    #[must_use]
    pub fn new(pods: &[PodState], ports: BTreeMap<i32, i32>) -> Self {
        let ready = || pods.iter().filter(|pod| pod.ready);
        Self {
            pods: pods.len(),
            ready_pods: ready().count(),
            error: pods.iter().find_map(|pod| pod.error.clone()),
            host: ready().chain(pods).find_map(|pod| pod.host_ip.clone()),
            ports,
        }
    }

    /// An owner without pods, such as one that only holds secrets, is ready.
    #[must_use]
    pub const fn is_ready(&self) -> bool { self.ready_pods == self.pods }
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize)]
pub enum OwnerStatus {
    /// Every request was admitted and applied, and every pod is ready.
    Ready,
    /// Everything was applied but some pods are not ready yet.
    Pending,
    /// Some requests were rejected. The rest were applied.
    Degraded,
    /// A backend call for the owner failed.
    Failed,
    /// The owner was orphaned and its resources were deleted.
    Removed,
}

impl fmt::Display for OwnerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ready => "ready",
            Self::Pending => "pending",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
            Self::Removed => "removed",
        })
    }
}

/// Outcome of one reconciliation pass.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub namespace: String,
    pub admitted: Vec<Admitted>,
    pub rejected: Vec<Rejected>,
    pub deleted: Vec<Deleted>,
    pub failures: Vec<Failure>,
    /// Workloads of the owners that were applied.
    pub workloads: BTreeMap<OwnerId, Workload>,
    /// Failures not scoped to one owner.
    pub errors: Vec<String>,
    pub committed: bool,
}

impl ReconciliationReport {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), ..Self::default() }
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty() && self.failures.is_empty() && self.errors.is_empty()
    }

    pub fn deleted_count(&self) -> usize { self.deleted.iter().map(|deleted| deleted.count).sum() }

    /// Aggregates the report into one status per owner it mentions.
    #[must_use]
    pub fn owner_statuses(&self) -> BTreeMap<OwnerId, OwnerStatus> {
        let mut statuses = BTreeMap::new();
        for Admitted { owner, .. } in &self.admitted {
            let _status = statuses.entry(owner.clone()).or_insert(OwnerStatus::Ready);
        }
        for Deleted { owner, orphaned, .. } in &self.deleted {
            if *orphaned {
                let _previous = statuses.insert(owner.clone(), OwnerStatus::Removed);
            }
        }
        for (owner, workload) in &self.workloads {
            let observed = match workload {
                Workload { error: Some(_), .. } => OwnerStatus::Failed,
                workload if !workload.is_ready() => OwnerStatus::Pending,
                _ => continue,
            };
            if let Some(status) = statuses.get_mut(owner) {
                *status = (*status).max(observed);
            }
        }
        for Rejected { owner, .. } in &self.rejected {
            let status = statuses.entry(owner.clone()).or_insert(OwnerStatus::Degraded);
            *status = (*status).max(OwnerStatus::Degraded);
        }
        for Failure { owner, .. } in &self.failures {
            let _previous = statuses.insert(owner.clone(), OwnerStatus::Failed);
        }
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ObjectKind;

    fn web(namespace: &str) -> ResourceRef {
        ResourceRef::new(ObjectKind::Service, namespace, "web-service")
    }

    fn pod(name: &str, ready: bool, host_ip: &str, error: Option<&str>) -> PodState {
        PodState {
            reference: ResourceRef::new(ObjectKind::Pod, "ns1", name),
            ready,
            host_ip: Some(host_ip.to_string()),
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_owner_statuses() {
        let report = ReconciliationReport {
            namespace: "ns1".to_string(),
            admitted: vec![
                Admitted { owner: OwnerId::from("app1"), resource: web("ns1") },
                Admitted { owner: OwnerId::from("app3"), resource: web("ns1") },
            ],
            rejected: vec![Rejected {
                owner: OwnerId::from("app2"),
                resource: web("ns1"),
                reason: Rejection::Conflict { existing_owner: "app1".to_string() },
            }],
            deleted: vec![Deleted { owner: OwnerId::from("app4"), count: 3, orphaned: true }],
            failures: vec![Failure {
                owner: OwnerId::from("app3"),
                resource: Some(web("ns1")),
                message: "boom".to_string(),
            }],
            workloads: BTreeMap::new(),
            errors: Vec::new(),
            committed: true,
        };

        let statuses = report.owner_statuses();
        assert_eq!(statuses[&OwnerId::from("app1")], OwnerStatus::Ready);
        assert_eq!(statuses[&OwnerId::from("app2")], OwnerStatus::Degraded);
        assert_eq!(statuses[&OwnerId::from("app3")], OwnerStatus::Failed);
        assert_eq!(statuses[&OwnerId::from("app4")], OwnerStatus::Removed);
        assert_eq!(report.deleted_count(), 3);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_rejection_renders_conflicting_owner() {
        let rejected = Rejected {
            owner: OwnerId::from("app2"),
            resource: web("ns1"),
            reason: Rejection::Conflict { existing_owner: "app1".to_string() },
        };
        assert_eq!(
            rejected.error().to_string(),
            "service/web-service in namespace ns1 is already owned by app1"
        );

        let json = serde_json::to_value(&rejected).unwrap();
        assert_eq!(json["reason"], "conflict");
        assert_eq!(json["existingOwner"], "app1");
    }

    #[test]
    fn test_workload_prefers_ready_pod_host() {
        let workload = Workload::new(
            &[pod("web-1", false, "10.0.0.1", None), pod("web-2", true, "10.0.0.2", None)],
            BTreeMap::from([(80, 30080)]),
        );
        assert_eq!(workload.pods, 2);
        assert_eq!(workload.ready_pods, 1);
        assert_eq!(workload.host.as_deref(), Some("10.0.0.2"));
        assert_eq!(workload.error, None);
        assert!(!workload.is_ready());

        assert!(Workload::new(&[], BTreeMap::new()).is_ready());
    }

    #[test]
    fn test_workload_raises_owner_status() {
        let mut report = ReconciliationReport::new("ns1");
        for owner in ["app1", "app2", "app3"] {
            report.admitted.push(Admitted { owner: OwnerId::from(owner), resource: web("ns1") });
        }
        let workloads = [
            ("app1", pod("a", true, "10.0.0.1", None)),
            ("app2", pod("b", false, "10.0.0.1", None)),
            ("app3", pod("c", false, "10.0.0.1", Some("waiting: CrashLoopBackOff"))),
        ];
        for (owner, state) in workloads {
            let _previous = report
                .workloads
                .insert(OwnerId::from(owner), Workload::new(&[state], BTreeMap::new()));
        }

        let statuses = report.owner_statuses();
        assert_eq!(statuses[&OwnerId::from("app1")], OwnerStatus::Ready);
        assert_eq!(statuses[&OwnerId::from("app2")], OwnerStatus::Pending);
        assert_eq!(statuses[&OwnerId::from("app3")], OwnerStatus::Failed);
        assert!(report.is_clean());
    }
}
