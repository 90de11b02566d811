use crate::registry::RegistryState;

pub trait RegistryStateExt {
    /// One row per recorded resource.
    fn render_table(&self) -> String;
}

impl RegistryStateExt for RegistryState {
    fn render_table(&self) -> String {
        let rows = self.owners.iter().flat_map(|(owner, record)| {
            record.resources.iter().map(move |request| {
                let reference = request.reference();
                [
                    owner.to_string(),
                    request.kind().to_string(),
                    reference.name,
                    reference.namespace,
                ]
            })
        });
        super::new_table(["OWNER", "KIND", "NAME", "NAMESPACE"]).add_rows(rows).to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::{
        registry::OwnershipRecord,
        resource::{OwnerId, ResourceRequest, ResourceSpec, ServiceSpec},
    };

    #[test]
    fn test_render_recorded_resources() {
        let request = ResourceRequest {
            owner: OwnerId::from("app1"),
            name: "web".to_string(),
            namespace: "ns1".to_string(),
            sequence_id: None,
            spec: ResourceSpec::Service(ServiceSpec::default()),
        };
        let state = RegistryState {
            owners: BTreeMap::from([(OwnerId::from("app1"), OwnershipRecord::new(vec![request]))]),
            ..RegistryState::default()
        };
        let table = state.render_table();
        assert!(table.lines().nth(1).unwrap().contains("web-service"));
    }
}
