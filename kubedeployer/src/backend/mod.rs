//! The boundary between the reconciliation core and the cluster.
//!
//! [`ResourceBackend`] is the only way the core touches live objects. The
//! backend is the source of truth for what exists; the ownership registry only
//! records intent.

pub mod error;
pub mod cluster;
#[cfg(test)]
pub mod memory;

use std::collections::{BTreeMap, BTreeSet};

use deployer_base::{PROJECT_NAME, consts::k8s::labels};

pub use self::{cluster::KubeBackend, error::Error};
use crate::resource::{ObjectKind, OwnerId, ResourceRef, ResourceRequest};

pub type Labels = BTreeMap<String, String>;

/// Selects objects by namespace, labels and optionally name.
///
/// An empty namespace selects across all namespaces and is required for
/// cluster-scoped kinds.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Selector {
    pub namespace: String,
    pub labels: Labels,
    pub name: Option<String>,
    pub kinds: Vec<ObjectKind>,
}

impl Selector {
    /// Selects every owned kind in `namespace`.
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            labels: Labels::new(),
            name: None,
            kinds: ObjectKind::OWNED.to_vec(),
        }
    }

    #[must_use]
    pub fn cluster(kind: ObjectKind) -> Self {
        Self { namespace: String::new(), labels: Labels::new(), name: None, kinds: vec![kind] }
    }

    /// Selects exactly the object behind `reference`.
    #[must_use]
    pub fn reference(reference: &ResourceRef) -> Self {
        Self {
            namespace: reference.namespace.clone(),
            labels: Labels::new(),
            name: Some(reference.name.clone()),
            kinds: vec![reference.kind],
        }
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _previous = self.labels.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.labels.extend(labels);
        self
    }

    #[must_use]
    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = ObjectKind>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    /// Renders the labels as a Kubernetes equality-based selector
    /// (`a=b,c=d`).
    #[must_use]
    pub fn label_selector(&self) -> Option<String> {
        (!self.labels.is_empty()).then(|| {
            self.labels
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join(",")
        })
    }

    #[must_use]
    pub fn field_selector(&self) -> Option<String> {
        self.name.as_ref().map(|name| format!("metadata.name={name}"))
    }

    #[must_use]
    pub fn matches(&self, state: &ResourceState) -> bool {
        let reference = &state.reference;
        self.kinds.contains(&reference.kind)
            && (self.namespace.is_empty() || self.namespace == reference.namespace)
            && self.name.as_ref().is_none_or(|name| *name == reference.name)
            && self.labels.iter().all(|(key, value)| state.labels.get(key) == Some(value))
    }
}

/// What the backend reports about one live object.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceState {
    pub reference: ResourceRef,
    pub labels: Labels,
}

impl ResourceState {
    /// Owner recorded on the object itself.
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.labels.get(labels::RESOURCE_FOR).map(String::as_str)
    }
}

/// What the backend reports about one pod.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PodState {
    pub reference: ResourceRef,

    /// Every container of the pod reports ready.
    pub ready: bool,

    /// Address of the node the pod was scheduled on.
    pub host_ip: Option<String>,

    /// State of the first container that is waiting or terminated, such as
    /// `waiting: ImagePullBackOff`. A container that runs but is not ready
    /// yet is not an error.
    pub error: Option<String>,
}

/// Labels identifying objects kept by the deployer instance `deployer`.
#[must_use]
pub fn deployer_labels(deployer: &str) -> Labels {
    Labels::from_iter([
        (labels::DEPLOYER.to_string(), deployer.to_string()),
        (labels::MANAGED_BY.to_string(), PROJECT_NAME.to_string()),
    ])
}

/// Labels identifying objects kept for `owner` by `deployer`.
#[must_use]
pub fn owner_labels(owner: &OwnerId, deployer: &str) -> Labels {
    let mut stamped = deployer_labels(deployer);
    let _previous = stamped.insert(labels::RESOURCE_FOR.to_string(), owner.to_string());
    stamped
}

/// A structured object handed to [`ResourceBackend::apply`].
#[derive(Clone, Debug, PartialEq)]
pub enum Manifest {
    /// A resource requested by an owner, with the labels to stamp on it.
    Request { request: ResourceRequest, labels: Labels },

    /// A namespace created by the deployer itself.
    Namespace { name: String, labels: Labels },
}

impl Manifest {
    #[must_use]
    pub fn for_request(request: &ResourceRequest, deployer: &str) -> Self {
        let mut stamped = owner_labels(&request.owner, deployer);
        let _previous = stamped.insert(labels::NAME.to_string(), request.name.clone());
        Self::Request { request: request.clone(), labels: stamped }
    }

    #[must_use]
    pub fn namespace(name: impl Into<String>, deployer: &str) -> Self {
        Self::Namespace { name: name.into(), labels: deployer_labels(deployer) }
    }

    #[must_use]
    pub fn reference(&self) -> ResourceRef {
        match self {
            Self::Request { request, .. } => request.reference(),
            Self::Namespace { name, .. } => ResourceRef::new(ObjectKind::Namespace, "", name),
        }
    }

    #[must_use]
    pub const fn labels(&self) -> &Labels {
        match self {
            Self::Request { labels, .. } | Self::Namespace { labels, .. } => labels,
        }
    }
}

/// Operations the reconciliation core needs from a cluster.
///
/// Every call blocks on I/O. Implementations must make `apply` idempotent:
/// applying an unchanged manifest leaves the object untouched.
pub trait ResourceBackend {
    /// Creates the object or updates it in place, keyed by its derived name.
    async fn apply(&self, manifest: &Manifest) -> Result<ResourceRef, Error>;

    /// Deletes every object matched by `selector` and returns how many were
    /// deleted. Membership is resolved at delete time.
    async fn delete(&self, selector: &Selector) -> Result<usize, Error>;

    /// Deletes one object by name. Returns `false` when it was already gone.
    async fn delete_named(&self, reference: &ResourceRef) -> Result<bool, Error>;

    async fn get(&self, selector: &Selector) -> Result<Vec<ResourceState>, Error>;

    async fn exists(&self, kind: ObjectKind, name: &str, namespace: &str) -> Result<bool, Error> {
        let reference = ResourceRef::new(kind, namespace, name);
        Ok(!self.get(&Selector::reference(&reference)).await?.is_empty())
    }

    /// Pods matched by `selector`, whatever kinds it names.
    async fn pods(&self, selector: &Selector) -> Result<Vec<PodState>, Error>;

    /// Node port published for each service port, over the services matched
    /// by `selector`.
    async fn node_ports(&self, selector: &Selector) -> Result<BTreeMap<i32, i32>, Error>;

    /// Distinct values of `label` over owned objects in `namespace` that carry
    /// every label in `scope`.
    async fn label_values(
        &self,
        namespace: &str,
        label: &str,
        scope: &Labels,
    ) -> Result<BTreeSet<String>, Error> {
        let selector = Selector::in_namespace(namespace).with_labels(scope.clone());
        Ok(self
            .get(&selector)
            .await?
            .into_iter()
            .filter_map(|state| state.labels.get(label).cloned())
            .collect())
    }
}
