//! A [`ResourceBackend`] that keeps objects in a map.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use deployer_base::consts::k8s::labels;

use crate::{
    backend::{Labels, Manifest, PodState, ResourceBackend, ResourceState, Selector, error::Error},
    resource::{ObjectKind, ResourceRef, ResourceSpec},
};

#[derive(Debug, Default)]
pub struct InMemoryBackend {
    objects: Mutex<BTreeMap<ResourceRef, Labels>>,
    failing_owners: Mutex<BTreeSet<String>>,
    failing_deletes: Mutex<BTreeSet<ResourceRef>>,
    pod_states: Mutex<BTreeMap<ResourceRef, PodState>>,
    node_port_maps: Mutex<BTreeMap<ResourceRef, BTreeMap<i32, i32>>>,
    unavailable: AtomicBool,
    applied: AtomicUsize,
    deleted: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new() -> Self { Self::default() }

    /// Places an object on the cluster without going through `apply`, as a
    /// foreign writer would.
    pub fn insert_raw(&self, reference: ResourceRef, object_labels: &[(&str, &str)]) {
        let object_labels =
            object_labels.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        let _previous = self.objects.lock().unwrap().insert(reference, object_labels);
    }

    /// Places a pod labelled with `object_labels`, as its controller would.
    pub fn insert_pod(&self, state: PodState, object_labels: &[(&str, &str)]) {
        self.insert_raw(state.reference.clone(), object_labels);
        let _previous = self.pod_states.lock().unwrap().insert(state.reference.clone(), state);
    }

    /// Publishes node ports on the service behind `reference`.
    pub fn set_node_ports(&self, reference: ResourceRef, ports: &[(i32, i32)]) {
        let _previous =
            self.node_port_maps.lock().unwrap().insert(reference, ports.iter().copied().collect());
    }

    /// Makes every apply and delete for `owner` fail.
    pub fn fail_owner(&self, owner: &str) {
        let _inserted = self.failing_owners.lock().unwrap().insert(owner.to_string());
    }

    pub fn fail_delete(&self, reference: ResourceRef) {
        let _inserted = self.failing_deletes.lock().unwrap().insert(reference);
    }

    /// Makes every call fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn contains(&self, reference: &ResourceRef) -> bool {
        self.objects.lock().unwrap().contains_key(reference)
    }

    pub fn labels_of(&self, reference: &ResourceRef) -> Option<Labels> {
        self.objects.lock().unwrap().get(reference).cloned()
    }

    pub fn references(&self) -> Vec<ResourceRef> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn applied_count(&self) -> usize { self.applied.load(Ordering::SeqCst) }

    pub fn deleted_count(&self) -> usize { self.deleted.load(Ordering::SeqCst) }

    fn matching(&self, selector: &Selector, kind: ObjectKind) -> Vec<ResourceRef> {
        let selector = selector.clone().with_kinds([kind]);
        self.objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(reference, object_labels)| {
                selector.matches(&ResourceState {
                    reference: (*reference).clone(),
                    labels: (*object_labels).clone(),
                })
            })
            .map(|(reference, _)| reference.clone())
            .collect()
    }

    fn check_available(&self) -> Result<(), Error> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Unavailable { message: "backend switched off".to_string() });
        }
        Ok(())
    }

    fn check_owner(&self, object_labels: &Labels) -> Result<(), Error> {
        let failing = self.failing_owners.lock().unwrap();
        match object_labels.get(labels::RESOURCE_FOR) {
            Some(owner) if failing.contains(owner) => {
                Err(Error::Unavailable { message: format!("owner {owner} is failing") })
            }
            _ => Ok(()),
        }
    }

    fn remove(&self, reference: &ResourceRef) -> Result<bool, Error> {
        if self.failing_deletes.lock().unwrap().contains(reference) {
            return Err(Error::Unavailable { message: format!("cannot delete {reference}") });
        }
        let mut objects = self.objects.lock().unwrap();
        if let Some(object_labels) = objects.get(reference) {
            self.check_owner(object_labels)?;
        }
        let removed = objects.remove(reference).is_some();
        if removed {
            let _count = self.deleted.fetch_add(1, Ordering::SeqCst);
        }
        Ok(removed)
    }
}

impl ResourceBackend for InMemoryBackend {
    async fn apply(&self, manifest: &Manifest) -> Result<ResourceRef, Error> {
        self.check_available()?;
        self.check_owner(manifest.labels())?;

        let reference = manifest.reference();
        let mut objects = self.objects.lock().unwrap();
        if let Manifest::Request { request, labels: stamped } = manifest
            && matches!(request.spec, ResourceSpec::HeadlessService(_))
        {
            let slice =
                ResourceRef::new(ObjectKind::EndpointSlice, &reference.namespace, &reference.name);
            let _previous = objects.insert(slice, stamped.clone());
        }
        let _previous = objects.insert(reference.clone(), manifest.labels().clone());
        let _count = self.applied.fetch_add(1, Ordering::SeqCst);
        Ok(reference)
    }

    async fn delete(&self, selector: &Selector) -> Result<usize, Error> {
        self.check_available()?;
        let matched = self.get(selector).await?;
        let mut deleted = 0;
        for state in matched {
            if self.remove(&state.reference)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn delete_named(&self, reference: &ResourceRef) -> Result<bool, Error> {
        self.check_available()?;
        self.remove(reference)
    }

    async fn get(&self, selector: &Selector) -> Result<Vec<ResourceState>, Error> {
        self.check_available()?;
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .map(|(reference, object_labels)| ResourceState {
                reference: reference.clone(),
                labels: object_labels.clone(),
            })
            .filter(|state| selector.matches(state))
            .collect())
    }

    async fn pods(&self, selector: &Selector) -> Result<Vec<PodState>, Error> {
        self.check_available()?;
        let states = self.pod_states.lock().unwrap();
        Ok(self
            .matching(selector, ObjectKind::Pod)
            .into_iter()
            .map(|reference| {
                states.get(&reference).cloned().unwrap_or(PodState {
                    reference,
                    ready: true,
                    host_ip: None,
                    error: None,
                })
            })
            .collect())
    }

    async fn node_ports(&self, selector: &Selector) -> Result<BTreeMap<i32, i32>, Error> {
        self.check_available()?;
        let maps = self.node_port_maps.lock().unwrap();
        Ok(self
            .matching(selector, ObjectKind::Service)
            .iter()
            .filter_map(|reference| maps.get(reference))
            .flat_map(|ports| ports.iter().map(|(port, node_port)| (*port, *node_port)))
            .collect())
    }
}
