//! [`ResourceBackend`] over the Kubernetes API server.

mod manifest;

use std::{collections::BTreeMap, fmt::Debug};

use futures::{StreamExt, TryStreamExt};
use k8s_openapi::{
    NamespaceResourceScope,
    api::{
        apps::v1::Deployment,
        core::v1::{ContainerState, Namespace, Pod, Secret, Service},
        discovery::v1::EndpointSlice,
        networking::v1::NetworkPolicy,
    },
};
use kube::{
    Api, Resource, ResourceExt,
    api::{DeleteParams, ListParams, Patch, PatchParams},
};
use serde::{Serialize, de::DeserializeOwned};
use snafu::ResultExt;

use crate::{
    backend::{
        Labels, Manifest, PodState, ResourceBackend, ResourceState, Selector, error, error::Error,
    },
    resource::{ObjectKind, ResourceRef, ResourceSpec},
};

/// A typed object the backend knows how to address.
trait KubeObject:
    Resource<DynamicType = ()>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
    const OBJECT_KIND: ObjectKind;

    fn api(client: kube::Client, namespace: &str) -> Api<Self>;
}

fn namespaced_api<K>(client: kube::Client, namespace: &str) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
{
    if namespace.is_empty() { Api::all(client) } else { Api::namespaced(client, namespace) }
}

impl KubeObject for Deployment {
    const OBJECT_KIND: ObjectKind = ObjectKind::Deployment;

    fn api(client: kube::Client, namespace: &str) -> Api<Self> { namespaced_api(client, namespace) }
}

impl KubeObject for Service {
    const OBJECT_KIND: ObjectKind = ObjectKind::Service;

    fn api(client: kube::Client, namespace: &str) -> Api<Self> { namespaced_api(client, namespace) }
}

impl KubeObject for EndpointSlice {
    const OBJECT_KIND: ObjectKind = ObjectKind::EndpointSlice;

    fn api(client: kube::Client, namespace: &str) -> Api<Self> { namespaced_api(client, namespace) }
}

impl KubeObject for Secret {
    const OBJECT_KIND: ObjectKind = ObjectKind::Secret;

    fn api(client: kube::Client, namespace: &str) -> Api<Self> { namespaced_api(client, namespace) }
}

impl KubeObject for NetworkPolicy {
    const OBJECT_KIND: ObjectKind = ObjectKind::NetworkPolicy;

    fn api(client: kube::Client, namespace: &str) -> Api<Self> { namespaced_api(client, namespace) }
}

impl KubeObject for Pod {
    const OBJECT_KIND: ObjectKind = ObjectKind::Pod;

    fn api(client: kube::Client, namespace: &str) -> Api<Self> { namespaced_api(client, namespace) }
}

impl KubeObject for Namespace {
    const OBJECT_KIND: ObjectKind = ObjectKind::Namespace;

    fn api(client: kube::Client, _namespace: &str) -> Api<Self> { Api::all(client) }
}

fn state_of<K: KubeObject>(object: &K) -> ResourceState {
    ResourceState {
        reference: ResourceRef::new(
            K::OBJECT_KIND,
            object.namespace().unwrap_or_default(),
            object.name_any(),
        ),
        labels: object.labels().clone(),
    }
}

fn pod_state(pod: &Pod) -> PodState {
    let status = pod.status.as_ref();
    let containers =
        status.and_then(|status| status.container_statuses.as_deref()).unwrap_or_default();
    PodState {
        reference: ResourceRef::new(
            ObjectKind::Pod,
            pod.namespace().unwrap_or_default(),
            pod.name_any(),
        ),
        ready: !containers.is_empty() && containers.iter().all(|container| container.ready),
        host_ip: status.and_then(|status| status.host_ip.clone()),
        error: containers
            .iter()
            .filter(|container| !container.ready)
            .find_map(|container| container.state.as_ref().and_then(container_error)),
    }
}

fn container_error(state: &ContainerState) -> Option<String> {
    let describe = |phase: &str, reason: Option<&String>, message: Option<&String>| {
        let reason = reason.map_or("Unknown", String::as_str);
        match message {
            Some(message) => format!("{phase}: {reason} ({message})"),
            None => format!("{phase}: {reason}"),
        }
    };
    if let Some(waiting) = &state.waiting {
        return Some(describe("waiting", waiting.reason.as_ref(), waiting.message.as_ref()));
    }
    state.terminated.as_ref().map(|terminated| {
        describe("terminated", terminated.reason.as_ref(), terminated.message.as_ref())
    })
}

/// [`ResourceBackend`] that talks to the API server with server-side apply.
///
/// Every object is applied with `field_manager` and forced, so the deployer
/// owns the fields it writes even when another manager touched them.
/// Deletions by selector run at most `concurrency` requests at a time.
#[derive(Clone)]
pub struct KubeBackend {
    client: kube::Client,
    field_manager: String,
    concurrency: usize,
}

impl KubeBackend {
    /// Creates a backend on `client`.
    ///
    /// # Arguments
    ///
    /// * `field_manager` - Name recorded as the manager of every applied field.
    /// * `concurrency` - Upper bound of parallel delete requests. Zero is
    ///   treated as one.
    pub fn new(client: kube::Client, field_manager: impl Into<String>, concurrency: usize) -> Self {
        Self { client, field_manager: field_manager.into(), concurrency: concurrency.max(1) }
    }

    async fn patch<K: KubeObject>(&self, object: &K) -> Result<ResourceRef, Error> {
        let name = object.name_any();
        let namespace = object.namespace().unwrap_or_default();
        let params = PatchParams::apply(&self.field_manager).force();

        let _object = K::api(self.client.clone(), &namespace)
            .patch(&name, &params, &Patch::Apply(object))
            .await
            .with_context(|_| error::ApplySnafu {
                kind: K::OBJECT_KIND,
                namespace: namespace.clone(),
                name: name.clone(),
            })?;

        tracing::debug!("Applied {}/{name} in namespace {namespace}", K::OBJECT_KIND);
        Ok(ResourceRef::new(K::OBJECT_KIND, namespace, name))
    }

    async fn apply_request(
        &self,
        name: &str,
        namespace: &str,
        stamped: &Labels,
        spec: &ResourceSpec,
    ) -> Result<ResourceRef, Error> {
        match spec {
            ResourceSpec::Deployment(spec) => {
                self.patch(&manifest::deployment(name, namespace, stamped, spec)).await
            }
            ResourceSpec::Service(spec) => {
                self.patch(&manifest::service(name, namespace, stamped, spec)).await
            }
            ResourceSpec::HeadlessService(spec) => {
                let (service, slice) = manifest::headless_service(
                    name,
                    namespace,
                    stamped,
                    &self.field_manager,
                    spec,
                );
                let reference = self.patch(&service).await?;
                let _slice = self.patch(&slice).await?;
                Ok(reference)
            }
            ResourceSpec::Secret(spec) => {
                self.patch(&manifest::secret(name, namespace, stamped, spec)).await
            }
            ResourceSpec::NetworkPolicy(spec) => {
                self.patch(&manifest::network_policy(name, namespace, stamped, spec)).await
            }
            ResourceSpec::Namespace => {
                error::UnsupportedRequestKindSnafu { kind: ObjectKind::Namespace }.fail()
            }
            ResourceSpec::PreparedResource(prepared) => match prepared.object_kind {
                ObjectKind::Deployment => {
                    let object: Deployment =
                        manifest::prepared(name, namespace, stamped, prepared)?;
                    self.patch(&object).await
                }
                ObjectKind::Service => {
                    let object: Service = manifest::prepared(name, namespace, stamped, prepared)?;
                    self.patch(&object).await
                }
                ObjectKind::Secret => {
                    let object: Secret = manifest::prepared(name, namespace, stamped, prepared)?;
                    self.patch(&object).await
                }
                ObjectKind::NetworkPolicy => {
                    let object: NetworkPolicy =
                        manifest::prepared(name, namespace, stamped, prepared)?;
                    self.patch(&object).await
                }
                kind @ (ObjectKind::EndpointSlice | ObjectKind::Namespace | ObjectKind::Pod) => {
                    error::UnsupportedPreparedKindSnafu { kind }.fail()
                }
            },
        }
    }

    async fn list<K: KubeObject>(&self, selector: &Selector) -> Result<Vec<K>, Error> {
        let list_params = ListParams {
            label_selector: selector.label_selector(),
            field_selector: selector.field_selector(),
            ..ListParams::default()
        };
        let objects = K::api(self.client.clone(), &selector.namespace)
            .list(&list_params)
            .await
            .with_context(|_| error::ListSnafu {
                kind: K::OBJECT_KIND,
                namespace: selector.namespace.clone(),
            })?;
        Ok(objects.items)
    }

    async fn get_kind<K: KubeObject>(
        &self,
        selector: &Selector,
    ) -> Result<Vec<ResourceState>, Error> {
        Ok(self.list::<K>(selector).await?.iter().map(state_of).collect())
    }

    async fn delete_one<K: KubeObject>(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let api = K::api(self.client.clone(), namespace);
        let exists = api
            .get_opt(name)
            .await
            .with_context(|_| error::GetSnafu {
                kind: K::OBJECT_KIND,
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?
            .is_some();
        if !exists {
            return Ok(false);
        }

        let _status = api.delete(name, &DeleteParams::background()).await.with_context(|_| {
            error::DeleteSnafu {
                kind: K::OBJECT_KIND,
                namespace: namespace.to_string(),
                name: name.to_string(),
            }
        })?;
        tracing::info!("Deleted {}/{name} in namespace {namespace}", K::OBJECT_KIND);
        Ok(true)
    }

    async fn delete_kind<K: KubeObject>(&self, selector: &Selector) -> Result<usize, Error> {
        let targets = self
            .list::<K>(selector)
            .await?
            .iter()
            .map(|object| (object.namespace().unwrap_or_default(), object.name_any()))
            .collect::<Vec<_>>();

        let futs = targets.iter().map(|(namespace, name)| self.delete_one::<K>(namespace, name));
        let deleted = futures::stream::iter(futs)
            .buffer_unordered(self.concurrency)
            .try_collect::<Vec<_>>()
            .await?;
        Ok(deleted.into_iter().filter(|deleted| *deleted).count())
    }
}

impl ResourceBackend for KubeBackend {
    async fn apply(&self, manifest: &Manifest) -> Result<ResourceRef, Error> {
        match manifest {
            Manifest::Namespace { name, labels } => {
                self.patch(&manifest::namespace(name, labels)).await
            }
            Manifest::Request { request, labels } => {
                let name = request.derived_name();
                self.apply_request(&name, &request.namespace, labels, &request.spec).await
            }
        }
    }

    async fn delete(&self, selector: &Selector) -> Result<usize, Error> {
        let mut deleted = 0;
        for kind in &selector.kinds {
            deleted += match kind {
                ObjectKind::Deployment => self.delete_kind::<Deployment>(selector).await?,
                ObjectKind::Service => self.delete_kind::<Service>(selector).await?,
                ObjectKind::EndpointSlice => self.delete_kind::<EndpointSlice>(selector).await?,
                ObjectKind::Secret => self.delete_kind::<Secret>(selector).await?,
                ObjectKind::NetworkPolicy => self.delete_kind::<NetworkPolicy>(selector).await?,
                ObjectKind::Namespace => self.delete_kind::<Namespace>(selector).await?,
                ObjectKind::Pod => self.delete_kind::<Pod>(selector).await?,
            };
        }
        Ok(deleted)
    }

    async fn delete_named(&self, reference: &ResourceRef) -> Result<bool, Error> {
        let ResourceRef { kind, namespace, name } = reference;
        match kind {
            ObjectKind::Deployment => self.delete_one::<Deployment>(namespace, name).await,
            ObjectKind::Service => self.delete_one::<Service>(namespace, name).await,
            ObjectKind::EndpointSlice => self.delete_one::<EndpointSlice>(namespace, name).await,
            ObjectKind::Secret => self.delete_one::<Secret>(namespace, name).await,
            ObjectKind::NetworkPolicy => self.delete_one::<NetworkPolicy>(namespace, name).await,
            ObjectKind::Namespace => self.delete_one::<Namespace>(namespace, name).await,
            ObjectKind::Pod => self.delete_one::<Pod>(namespace, name).await,
        }
    }

    async fn get(&self, selector: &Selector) -> Result<Vec<ResourceState>, Error> {
        let mut states = Vec::new();
        for kind in &selector.kinds {
            states.extend(match kind {
                ObjectKind::Deployment => self.get_kind::<Deployment>(selector).await?,
                ObjectKind::Service => self.get_kind::<Service>(selector).await?,
                ObjectKind::EndpointSlice => self.get_kind::<EndpointSlice>(selector).await?,
                ObjectKind::Secret => self.get_kind::<Secret>(selector).await?,
                ObjectKind::NetworkPolicy => self.get_kind::<NetworkPolicy>(selector).await?,
                ObjectKind::Namespace => self.get_kind::<Namespace>(selector).await?,
                ObjectKind::Pod => self.get_kind::<Pod>(selector).await?,
            });
        }
        Ok(states)
    }

    async fn pods(&self, selector: &Selector) -> Result<Vec<PodState>, Error> {
        Ok(self.list::<Pod>(selector).await?.iter().map(pod_state).collect())
    }

    async fn node_ports(&self, selector: &Selector) -> Result<BTreeMap<i32, i32>, Error> {
        Ok(self
            .list::<Service>(selector)
            .await?
            .iter()
            .filter_map(|service| service.spec.as_ref()?.ports.as_ref())
            .flatten()
            .filter_map(|port| Some((port.port, port.node_port?)))
            .collect())
    }
}
