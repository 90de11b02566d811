use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::resource::{ObjectKind, ResourceKind};

pub const DEFAULT_DOCKER_REGISTRY: &str = "https://index.docker.io/v1/";

/// What an owner asks for. Each variant carries the data needed to build the
/// object and nothing else.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ResourceSpec {
    Deployment(DeploymentSpec),
    Service(ServiceSpec),
    HeadlessService(HeadlessServiceSpec),
    Secret(SecretSpec),
    Namespace,
    NetworkPolicy(NetworkPolicySpec),
    PreparedResource(PreparedResource),
}

impl ResourceSpec {
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Deployment(_) => ResourceKind::Deployment,
            Self::Service(_) => ResourceKind::Service,
            Self::HeadlessService(_) => ResourceKind::HeadlessService,
            Self::Secret(_) => ResourceKind::Secret,
            Self::Namespace => ResourceKind::Namespace,
            Self::NetworkPolicy(_) => ResourceKind::NetworkPolicy,
            Self::PreparedResource(_) => ResourceKind::PreparedResource,
        }
    }

    /// The object that carries the derived name and the ownership labels.
    #[must_use]
    pub const fn object_kind(&self) -> ObjectKind {
        match self {
            Self::Deployment(_) => ObjectKind::Deployment,
            Self::Service(_) | Self::HeadlessService(_) => ObjectKind::Service,
            Self::Secret(_) => ObjectKind::Secret,
            Self::Namespace => ObjectKind::Namespace,
            Self::NetworkPolicy(_) => ObjectKind::NetworkPolicy,
            Self::PreparedResource(prepared) => prepared.object_kind,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    pub image: String,

    #[serde(default = "DeploymentSpec::default_replicas")]
    pub replicas: i32,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secret: Option<String>,

    #[serde(default = "DeploymentSpec::default_rolling_updates")]
    pub rolling_updates: bool,
}

impl DeploymentSpec {
    #[inline]
    #[must_use]
    pub const fn default_replicas() -> i32 { 1 }

    #[inline]
    #[must_use]
    pub const fn default_rolling_updates() -> bool { true }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ServiceSpec {
    #[serde(default)]
    pub ports: Vec<ServicePortSpec>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePortSpec {
    pub name: String,

    pub port: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<i32>,
}

/// A selector-less service whose endpoints are the given addresses.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct HeadlessServiceSpec {
    pub port: i32,

    #[serde(default)]
    pub ips: Vec<String>,
}

/// Docker registry credentials, stored as a `kubernetes.io/dockerconfigjson`
/// secret.
#[derive(Clone, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretSpec {
    #[serde(default = "SecretSpec::default_registry")]
    pub docker_registry: String,

    pub username: String,

    pub password: String,
}

impl SecretSpec {
    #[inline]
    #[must_use]
    pub fn default_registry() -> String { DEFAULT_DOCKER_REGISTRY.to_string() }
}

impl fmt::Debug for SecretSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretSpec")
            .field("docker_registry", &self.docker_registry)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Admits traffic to every pod of the namespace from namespaces carrying the
/// given labels.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPolicySpec {
    #[serde(default)]
    pub allow_from_namespace_labels: BTreeMap<String, String>,
}

/// An already structured manifest. Name, namespace and ownership labels are
/// stamped over whatever the manifest carries.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedResource {
    pub object_kind: ObjectKind,

    pub manifest: serde_json::Value,
}
