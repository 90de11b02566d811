use std::fmt;

use serde::{Deserialize, Serialize};

/// Kubernetes object kinds the deployer creates, inspects or deletes.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum ObjectKind {
    Deployment,
    Service,
    EndpointSlice,
    Secret,
    NetworkPolicy,
    Namespace,
    Pod,
}

impl ObjectKind {
    /// Kinds swept by an owner-label delete. Pods are left to their
    /// controllers and namespaces are handled by the namespace lifecycle.
    pub const OWNED: [Self; 5] =
        [Self::Deployment, Self::Service, Self::EndpointSlice, Self::Secret, Self::NetworkPolicy];

    /// Kinds that keep a namespace alive.
    pub const WORKLOADS: [Self; 2] = [Self::Pod, Self::Service];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deployment => "deployment",
            Self::Service => "service",
            Self::EndpointSlice => "endpointslice",
            Self::Secret => "secret",
            Self::NetworkPolicy => "networkpolicy",
            Self::Namespace => "namespace",
            Self::Pod => "pod",
        }
    }

    #[must_use]
    pub const fn is_namespaced(self) -> bool { !matches!(self, Self::Namespace) }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// The closed set of resource kinds an owner can request.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ResourceKind {
    Deployment,
    Service,
    HeadlessService,
    Secret,
    Namespace,
    NetworkPolicy,
    PreparedResource,
}

impl ResourceKind {
    /// Suffix appended to the base name to build the on-cluster name.
    #[must_use]
    pub const fn name_suffix(self) -> Option<&'static str> {
        match self {
            Self::Deployment => Some("deployment"),
            Self::Service => Some("service"),
            Self::HeadlessService => Some("headless-service"),
            Self::Secret | Self::Namespace | Self::NetworkPolicy | Self::PreparedResource => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deployment => "deployment",
            Self::Service => "service",
            Self::HeadlessService => "headless-service",
            Self::Secret => "secret",
            Self::Namespace => "namespace",
            Self::NetworkPolicy => "network-policy",
            Self::PreparedResource => "prepared-resource",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}
