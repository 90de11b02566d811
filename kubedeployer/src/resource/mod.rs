//! The requests owners submit and the names derived from them.

mod kind;
mod spec;

use std::{borrow::Borrow, fmt};

use serde::{Deserialize, Serialize};

pub use self::{
    kind::{ObjectKind, ResourceKind},
    spec::{
        DEFAULT_DOCKER_REGISTRY, DeploymentSpec, HeadlessServiceSpec, NetworkPolicySpec,
        PreparedResource, ResourceSpec, SecretSpec, ServicePortSpec, ServiceSpec,
    },
};

/// Identity of the application a set of resources is kept for.
///
/// Unit names such as `wordpress/0` collapse to their application
/// (`wordpress`), so every unit of one application shares its resources.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(from = "String", into = "String")]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        match id.split_once('/') {
            Some((application, _unit)) => Self(application.to_string()),
            None => Self(id),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<String> for OwnerId {
    fn from(id: String) -> Self { Self::new(id) }
}

impl From<&str> for OwnerId {
    fn from(id: &str) -> Self { Self::new(id) }
}

impl From<OwnerId> for String {
    fn from(owner: OwnerId) -> Self { owner.0 }
}

impl Borrow<str> for OwnerId {
    fn borrow(&self) -> &str { &self.0 }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Address of one object on the cluster. Cluster-scoped objects have an
/// empty namespace.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct ResourceRef {
    pub kind: ObjectKind,
    pub namespace: String,
    pub name: String,
}

impl ResourceRef {
    pub fn new(kind: ObjectKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let namespace = if kind.is_namespaced() { namespace.into() } else { String::new() };
        Self { kind, namespace, name: name.into() }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { kind, namespace, name } = self;
        if namespace.is_empty() {
            write!(f, "{kind}/{name}")
        } else {
            write!(f, "{kind}/{name} in namespace {namespace}")
        }
    }
}

/// One resource requested by one owner.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequest {
    pub owner: OwnerId,

    pub name: String,

    pub namespace: String,

    /// Distinguishes several resources of one owner in one batch. When set,
    /// the on-cluster name is built from the owner and this id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<u32>,

    pub spec: ResourceSpec,
}

impl ResourceRequest {
    #[must_use]
    pub const fn kind(&self) -> ResourceKind { self.spec.kind() }

    /// On-cluster name: `<owner>-<sequence_id>` or the requested name, with
    /// the kind suffix appended (`web` becomes `web-service`).
    #[must_use]
    pub fn derived_name(&self) -> String {
        let base = match self.sequence_id {
            Some(sequence_id) => format!("{}-{sequence_id}", self.owner),
            None => self.name.clone(),
        };
        match self.kind().name_suffix() {
            Some(suffix) => format!("{base}-{suffix}"),
            None => base,
        }
    }

    #[must_use]
    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(self.spec.object_kind(), &self.namespace, self.derived_name())
    }

    /// Every object applying this request creates. A headless service also
    /// owns the endpoint slice of the same name.
    #[must_use]
    pub fn object_references(&self) -> Vec<ResourceRef> {
        let reference = self.reference();
        match self.spec {
            ResourceSpec::HeadlessService(_) => {
                let ResourceRef { namespace, name, .. } = &reference;
                let slice = ResourceRef::new(ObjectKind::EndpointSlice, namespace, name);
                vec![reference, slice]
            }
            _ => vec![reference],
        }
    }
}
