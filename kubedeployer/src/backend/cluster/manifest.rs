//! Typed Kubernetes objects built from requests.

use std::collections::BTreeMap;

use deployer_base::consts::k8s::labels;
use k8s_openapi::{
    api::{
        apps::v1 as apps,
        core::v1::{
            Container, EnvVar, LocalObjectReference, Namespace, PodSpec, PodTemplateSpec, Secret,
            Service, ServicePort,
        },
        discovery::v1::{Endpoint, EndpointPort, EndpointSlice},
        networking::v1::{
            NetworkPolicy, NetworkPolicyIngressRule, NetworkPolicyPeer, NetworkPolicySpec,
        },
    },
    apimachinery::pkg::{apis::meta::v1::LabelSelector, util::intstr::IntOrString},
};
use kube::{Resource, api::ObjectMeta};
use serde::de::DeserializeOwned;
use snafu::ResultExt;

use crate::{
    backend::{Labels, error, error::Error},
    resource::{
        DeploymentSpec, HeadlessServiceSpec, NetworkPolicySpec as PolicyRequest, PreparedResource,
        SecretSpec, ServiceSpec,
    },
};

const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";
const ENDPOINT_SLICE_MANAGED_BY_LABEL: &str = "endpointslice.kubernetes.io/managed-by";
const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";
const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";
const HEADLESS_PORT_NAME: &str = "default";

fn object_meta(name: &str, namespace: &str, stamped: &Labels) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: (!namespace.is_empty()).then(|| namespace.to_string()),
        labels: Some(stamped.clone()),
        ..ObjectMeta::default()
    }
}

/// Pods of one owner. Services route to every pod of their owner.
fn owner_selector(stamped: &Labels) -> BTreeMap<String, String> {
    stamped
        .iter()
        .filter(|(key, _)| key.as_str() == labels::RESOURCE_FOR)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Pods of one deployment.
fn pod_selector(stamped: &Labels) -> BTreeMap<String, String> {
    stamped
        .iter()
        .filter(|(key, _)| key.as_str() == labels::RESOURCE_FOR || key.as_str() == labels::NAME)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

pub fn deployment(
    name: &str,
    namespace: &str,
    stamped: &Labels,
    spec: &DeploymentSpec,
) -> apps::Deployment {
    let DeploymentSpec { image, replicas, env, image_pull_secret, rolling_updates } = spec;

    let env = (!env.is_empty()).then(|| {
        env.iter()
            .map(|(key, value)| EnvVar {
                name: key.clone(),
                value: Some(value.clone()),
                ..EnvVar::default()
            })
            .collect::<Vec<_>>()
    });
    let strategy = if *rolling_updates { "RollingUpdate" } else { "Recreate" };

    apps::Deployment {
        metadata: object_meta(name, namespace, stamped),
        spec: Some(apps::DeploymentSpec {
            replicas: Some(*replicas),
            selector: LabelSelector {
                match_labels: Some(pod_selector(stamped)),
                ..LabelSelector::default()
            },
            strategy: Some(apps::DeploymentStrategy {
                type_: Some(strategy.to_string()),
                ..apps::DeploymentStrategy::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(stamped.clone()),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: name.to_string(),
                        image: Some(image.clone()),
                        env,
                        ..Container::default()
                    }],
                    image_pull_secrets: image_pull_secret
                        .as_ref()
                        .map(|secret| vec![LocalObjectReference { name: secret.clone() }]),
                    ..PodSpec::default()
                }),
            },
            ..apps::DeploymentSpec::default()
        }),
        ..apps::Deployment::default()
    }
}

pub fn service(name: &str, namespace: &str, stamped: &Labels, spec: &ServiceSpec) -> Service {
    let ports = spec
        .ports
        .iter()
        .map(|port| ServicePort {
            name: Some(port.name.clone()),
            port: port.port,
            target_port: port.target_port.map(IntOrString::Int),
            ..ServicePort::default()
        })
        .collect::<Vec<_>>();

    Service {
        metadata: object_meta(name, namespace, stamped),
        spec: Some(k8s_openapi::api::core::v1::ServiceSpec {
            type_: Some("NodePort".to_string()),
            selector: Some(owner_selector(stamped)),
            ports: Some(ports),
            ..k8s_openapi::api::core::v1::ServiceSpec::default()
        }),
        ..Service::default()
    }
}

/// A selector-less headless service plus the endpoint slice that lists its
/// addresses.
pub fn headless_service(
    name: &str,
    namespace: &str,
    stamped: &Labels,
    field_manager: &str,
    spec: &HeadlessServiceSpec,
) -> (Service, EndpointSlice) {
    let HeadlessServiceSpec { port, ips } = spec;

    let service = Service {
        metadata: object_meta(name, namespace, stamped),
        spec: Some(k8s_openapi::api::core::v1::ServiceSpec {
            cluster_ip: Some("None".to_string()),
            ports: Some(vec![ServicePort {
                name: Some(HEADLESS_PORT_NAME.to_string()),
                port: *port,
                ..ServicePort::default()
            }]),
            ..k8s_openapi::api::core::v1::ServiceSpec::default()
        }),
        ..Service::default()
    };

    let mut slice_labels = stamped.clone();
    slice_labels.extend([
        (SERVICE_NAME_LABEL.to_string(), name.to_string()),
        (ENDPOINT_SLICE_MANAGED_BY_LABEL.to_string(), field_manager.to_string()),
    ]);
    let address_type = if ips.iter().any(|ip| ip.contains(':')) { "IPv6" } else { "IPv4" };
    let slice = EndpointSlice {
        metadata: object_meta(name, namespace, &slice_labels),
        address_type: address_type.to_string(),
        endpoints: ips
            .iter()
            .map(|ip| Endpoint { addresses: vec![ip.clone()], ..Endpoint::default() })
            .collect(),
        ports: Some(vec![EndpointPort {
            name: Some(HEADLESS_PORT_NAME.to_string()),
            port: Some(*port),
            ..EndpointPort::default()
        }]),
    };

    (service, slice)
}

pub fn secret(name: &str, namespace: &str, stamped: &Labels, spec: &SecretSpec) -> Secret {
    let SecretSpec { docker_registry, username, password } = spec;
    let docker_config = serde_json::json!({
        "auths": {
            docker_registry.as_str(): { "username": username, "password": password }
        }
    });

    Secret {
        metadata: object_meta(name, namespace, stamped),
        type_: Some(DOCKER_CONFIG_JSON_TYPE.to_string()),
        string_data: Some(BTreeMap::from([(
            DOCKER_CONFIG_JSON_KEY.to_string(),
            docker_config.to_string(),
        )])),
        ..Secret::default()
    }
}

pub fn network_policy(
    name: &str,
    namespace: &str,
    stamped: &Labels,
    spec: &PolicyRequest,
) -> NetworkPolicy {
    // No allowed namespaces means an empty rule list, which denies all ingress.
    let ingress = if spec.allow_from_namespace_labels.is_empty() {
        Vec::new()
    } else {
        vec![NetworkPolicyIngressRule {
            from: Some(vec![NetworkPolicyPeer {
                namespace_selector: Some(LabelSelector {
                    match_labels: Some(spec.allow_from_namespace_labels.clone()),
                    ..LabelSelector::default()
                }),
                ..NetworkPolicyPeer::default()
            }]),
            ..NetworkPolicyIngressRule::default()
        }]
    };

    NetworkPolicy {
        metadata: object_meta(name, namespace, stamped),
        spec: Some(NetworkPolicySpec {
            policy_types: Some(vec!["Ingress".to_string()]),
            ingress: Some(ingress),
            ..NetworkPolicySpec::default()
        }),
    }
}

pub fn namespace(name: &str, stamped: &Labels) -> Namespace {
    Namespace { metadata: object_meta(name, "", stamped), ..Namespace::default() }
}

/// Parses a prepared manifest as `K` and stamps name, namespace and labels
/// over it.
pub fn prepared<K>(
    name: &str,
    namespace: &str,
    stamped: &Labels,
    prepared: &PreparedResource,
) -> Result<K, Error>
where
    K: k8s_openapi::Resource + Resource<DynamicType = ()> + DeserializeOwned,
{
    let mut manifest = prepared.manifest.clone();
    if let Some(fields) = manifest.as_object_mut() {
        let _api_version = fields.insert(
            "apiVersion".to_string(),
            <K as k8s_openapi::Resource>::API_VERSION.into(),
        );
        let _kind = fields.insert("kind".to_string(), <K as k8s_openapi::Resource>::KIND.into());
    }

    let mut object: K = serde_json::from_value(manifest)
        .context(error::PreparedManifestSnafu { kind: prepared.object_kind, name })?;

    let meta = object.meta_mut();
    meta.name = Some(name.to_string());
    meta.namespace = Some(namespace.to_string());
    meta.labels.get_or_insert_with(BTreeMap::new).extend(stamped.clone());
    Ok(object)
}
