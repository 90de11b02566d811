//! Batch files: the requests of every owner for one pass.
//!
//! ```yaml
//! namespace: ns1
//! requests:
//!   app1:
//!     - name: web
//!       kind: service
//!       ports: [{ name: http, port: 80 }]
//!   app2: []
//! ```

pub mod error;

use std::{
    collections::BTreeMap,
    io::Read,
    path::{Path, PathBuf},
};

use resolve_path::PathResolveExt;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

pub use self::error::Error;
use crate::{
    reconcile::RequestsByOwner,
    resource::{OwnerId, ResourceRequest, ResourceSpec},
};

/// Path that reads the batch from standard input.
pub const STDIN_PATH: &str = "-";

/// The whole desired state of one deployer instance, keyed by owner.
///
/// ```yaml
/// namespace: team-a
/// requests:
///   app1:
///     - name: web
///       kind: service
///       ports:
///         - name: http
///           port: 80
/// ```
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    /// Namespace to reconcile, unless the command line names one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default)]
    pub requests: BTreeMap<OwnerId, Vec<RequestEntry>>,
}

/// One request as written in a batch file. Owner and namespace come from
/// the surrounding batch.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEntry {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<u32>,

    #[serde(flatten)]
    pub spec: ResourceSpec,
}

impl Batch {
    /// Reads a batch in YAML or JSON from `path`, or from standard input when
    /// `path` is `-`.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        if path == Path::new(STDIN_PATH) {
            let mut data = Vec::new();
            let _size = std::io::stdin().read_to_end(&mut data).context(error::ReadStdinSnafu)?;
            return Self::parse(&data, path);
        }

        let path = path
            .try_resolve()
            .map(|path| path.to_path_buf())
            .with_context(|_| error::ResolveFilePathSnafu { file_path: path.to_path_buf() })?;
        let data = std::fs::read(&path).context(error::ReadBatchSnafu { filename: path.clone() })?;
        Self::parse(&data, &path)
    }

    fn parse(data: &[u8], path: &Path) -> Result<Self, Error> {
        serde_yaml::from_slice(data)
            .with_context(|_| error::ParseBatchSnafu { filename: PathBuf::from(path) })
    }

    /// Expands the batch into requests scoped to `namespace`.
    #[must_use]
    pub fn into_requests(self, namespace: &str) -> RequestsByOwner {
        self.requests
            .into_iter()
            .map(|(owner, entries)| {
                let requests = entries
                    .into_iter()
                    .map(|RequestEntry { name, sequence_id, spec }| ResourceRequest {
                        owner: owner.clone(),
                        name,
                        namespace: namespace.to_string(),
                        sequence_id,
                        spec,
                    })
                    .collect();
                (owner, requests)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ResourceKind, SecretSpec};

    const BATCH: &str = r"
namespace: ns1
requests:
  app1/0:
    - name: web
      kind: service
      ports:
        - name: http
          port: 80
          targetPort: 8080
    - name: web
      kind: deployment
      image: nginx:1.27
      replicas: 2
  app2:
    - name: registry
      sequenceId: 1
      kind: secret
      username: bot
      password: hunter2
  app3: []
";

    #[test]
    fn test_parse_yaml_batch() {
        let batch: Batch = serde_yaml::from_str(BATCH).unwrap();
        assert_eq!(batch.namespace.as_deref(), Some("ns1"));
        assert_eq!(batch.requests.len(), 3);

        let requests = batch.into_requests("ns1");
        let app1 = &requests[&OwnerId::from("app1")];
        assert_eq!(app1.iter().map(ResourceRequest::kind).collect::<Vec<_>>(), vec![
            ResourceKind::Service,
            ResourceKind::Deployment
        ]);
        assert_eq!(app1[0].owner, OwnerId::from("app1"));

        let app2 = &requests[&OwnerId::from("app2")];
        assert_eq!(app2[0].derived_name(), "app2-1");
        let ResourceSpec::Secret(SecretSpec { docker_registry, .. }) = &app2[0].spec else {
            panic!("expected a secret")
        };
        assert_eq!(docker_registry, crate::resource::DEFAULT_DOCKER_REGISTRY);

        assert!(requests[&OwnerId::from("app3")].is_empty());
    }

    #[test]
    fn test_parse_json_batch() {
        let json = r#"{"requests": {"app1": [{"name": "isolate", "kind": "network-policy"}]}}"#;
        let batch = Batch::parse(json.as_bytes(), Path::new("batch.json")).unwrap();
        assert_eq!(batch.namespace, None);
        assert_eq!(batch.into_requests("ns2")[&OwnerId::from("app1")][0].namespace, "ns2");
    }

    #[test]
    fn test_unknown_kind_is_an_error() {
        let yaml = "requests:\n  app1:\n    - name: x\n      kind: stateful-set\n";
        assert!(matches!(
            Batch::parse(yaml.as_bytes(), Path::new("batch.yaml")),
            Err(Error::ParseBatch { .. })
        ));
    }
}
