//! Lifecycle of the namespace the deployer targets.
//!
//! When the target moves, the previous namespace goes through
//! `Active -> Sweeping -> EmptyCheck -> {Deleted | Retained}`. A namespace
//! that still runs pods or services is never deleted, whoever owns them.

use std::fmt;

use serde::Serialize;

use crate::{
    backend::{self, Manifest, ResourceBackend, Selector, deployer_labels, owner_labels},
    registry::OwnershipRegistry,
    resource::{ObjectKind, ResourceRef},
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NamespacePhase {
    Active,
    Sweeping,
    EmptyCheck,
    Deleted,
    Retained,
}

impl fmt::Display for NamespacePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Sweeping => "sweeping",
            Self::EmptyCheck => "empty-check",
            Self::Deleted => "deleted",
            Self::Retained => "retained",
        })
    }
}

/// Where the deletion path of a namespace ended.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum NamespaceOutcome {
    /// No change was triggered.
    Unchanged,

    Deleted,

    /// Left intact because workloads remain or emptiness could not be
    /// established. Retried on the next change.
    Retained { remaining: usize },
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceReport {
    pub namespace: String,
    /// Whether the namespace was created by this call.
    pub created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<String>,
    pub swept: usize,
    pub outcome: NamespaceOutcome,
    pub failures: Vec<String>,
}

impl NamespaceReport {
    fn new(namespace: &str, previous: Option<&str>) -> Self {
        Self {
            namespace: namespace.to_string(),
            created: false,
            previous: previous.map(ToString::to_string),
            swept: 0,
            outcome: NamespaceOutcome::Unchanged,
            failures: Vec::new(),
        }
    }
}

/// Creates, sweeps and deletes the namespaces of one deployer instance.
///
/// A namespace that still holds pods or services is never deleted.
pub struct NamespaceLifecycle<'a, B> {
    backend: &'a B,
    deployer: &'a str,
}

impl<'a, B> NamespaceLifecycle<'a, B>
where
    B: ResourceBackend,
{
    pub const fn new(backend: &'a B, deployer: &'a str) -> Self { Self { backend, deployer } }

    /// Creates `namespace` when the backend reports it absent. Returns whether
    /// it was created.
    ///
    /// # Errors
    ///
    /// Fails when the backend cannot be queried or the namespace cannot be
    /// applied.
    pub async fn ensure_exists(&self, namespace: &str) -> Result<bool, backend::Error> {
        if self.backend.exists(ObjectKind::Namespace, namespace, "").await? {
            return Ok(false);
        }
        let reference = self.backend.apply(&Manifest::namespace(namespace, self.deployer)).await?;
        tracing::info!("Created {reference}");
        Ok(true)
    }

    /// Makes sure `current` exists and, when the target moved away from a
    /// non-empty `previous`, sweeps every registered owner out of `previous`
    /// and deletes it once empty.
    pub async fn on_namespace_change<R>(
        &self,
        registry: &R,
        previous: Option<&str>,
        current: &str,
    ) -> NamespaceReport
    where
        R: OwnershipRegistry,
    {
        let previous = previous.filter(|previous| !previous.is_empty());
        let mut report = NamespaceReport::new(current, previous);

        match self.ensure_exists(current).await {
            Ok(created) => report.created = created,
            Err(err) => {
                tracing::warn!("Failed to ensure namespace {current} exists, error: {err}");
                report.failures.push(err.to_string());
            }
        }

        let Some(previous) = previous.filter(|previous| *previous != current) else {
            return report;
        };

        let mut phase = NamespacePhase::Active;
        self.advance(previous, &mut phase, NamespacePhase::Sweeping);
        for owner in registry.owners() {
            let selector = Selector::in_namespace(previous)
                .with_labels(owner_labels(&owner, self.deployer));
            match self.backend.delete(&selector).await {
                Ok(deleted) => report.swept += deleted,
                Err(err) => {
                    tracing::warn!("Failed to sweep {owner} out of {previous}, error: {err}");
                    report.failures.push(err.to_string());
                }
            }
        }

        self.advance(previous, &mut phase, NamespacePhase::EmptyCheck);
        report.outcome = self.delete_if_empty(previous, &mut report.failures).await;
        let done = match report.outcome {
            NamespaceOutcome::Deleted => NamespacePhase::Deleted,
            NamespaceOutcome::Unchanged | NamespaceOutcome::Retained { .. } => {
                NamespacePhase::Retained
            }
        };
        self.advance(previous, &mut phase, done);
        report
    }

    /// Deletes every namespace this deployer created, other than `current`,
    /// that has no pods or services left.
    pub async fn prune_unused(&self, current: Option<&str>) -> Vec<NamespaceReport> {
        let selector =
            Selector::cluster(ObjectKind::Namespace).with_labels(deployer_labels(self.deployer));
        let namespaces = match self.backend.get(&selector).await {
            Ok(states) => states,
            Err(err) => {
                tracing::warn!(
                    "Failed to list namespaces created by {}, error: {err}",
                    self.deployer
                );
                let mut report = NamespaceReport::new("", None);
                report.failures.push(err.to_string());
                return vec![report];
            }
        };

        let mut reports = Vec::new();
        for state in namespaces {
            let name = state.reference.name;
            if Some(name.as_str()) == current {
                continue;
            }
            let mut report = NamespaceReport::new(&name, None);
            report.outcome = self.delete_if_empty(&name, &mut report.failures).await;
            reports.push(report);
        }
        reports
    }

    async fn delete_if_empty(
        &self,
        namespace: &str,
        failures: &mut Vec<String>,
    ) -> NamespaceOutcome {
        let selector = Selector::in_namespace(namespace).with_kinds(ObjectKind::WORKLOADS);
        let remaining = match self.backend.get(&selector).await {
            Ok(states) => states.len(),
            Err(err) => {
                tracing::warn!(
                    "Cannot tell whether {namespace} is empty, keeping it, error: {err}"
                );
                failures.push(err.to_string());
                return NamespaceOutcome::Retained { remaining: 0 };
            }
        };
        if remaining > 0 {
            tracing::info!("Keeping namespace {namespace}, {remaining} workload object(s) remain");
            return NamespaceOutcome::Retained { remaining };
        }

        let reference = ResourceRef::new(ObjectKind::Namespace, "", namespace);
        match self.backend.delete_named(&reference).await {
            Ok(_existed) => {
                tracing::info!("Deleted namespace {namespace}");
                NamespaceOutcome::Deleted
            }
            Err(err) => {
                tracing::warn!("Failed to delete namespace {namespace}, error: {err}");
                failures.push(err.to_string());
                NamespaceOutcome::Retained { remaining: 0 }
            }
        }
    }

    fn advance(&self, namespace: &str, phase: &mut NamespacePhase, next: NamespacePhase) {
        tracing::debug!("Namespace {namespace} ({}): {phase} -> {next}", self.deployer);
        *phase = next;
    }
}
