use snafu::Snafu;

use crate::resource::ObjectKind;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Failed to apply {kind}/{name} in namespace {namespace}, error: {source}"))]
    Apply {
        kind: ObjectKind,
        namespace: String,
        name: String,
        #[snafu(source(from(kube::Error, Box::new)))]
        source: Box<kube::Error>,
    },

    #[snafu(display("Failed to delete {kind}/{name} in namespace {namespace}, error: {source}"))]
    Delete {
        kind: ObjectKind,
        namespace: String,
        name: String,
        #[snafu(source(from(kube::Error, Box::new)))]
        source: Box<kube::Error>,
    },

    #[snafu(display("Failed to get {kind}/{name} in namespace {namespace}, error: {source}"))]
    Get {
        kind: ObjectKind,
        namespace: String,
        name: String,
        #[snafu(source(from(kube::Error, Box::new)))]
        source: Box<kube::Error>,
    },

    #[snafu(display("Failed to list {kind} in namespace {namespace}, error: {source}"))]
    List {
        kind: ObjectKind,
        namespace: String,
        #[snafu(source(from(kube::Error, Box::new)))]
        source: Box<kube::Error>,
    },

    #[snafu(display("Prepared manifest for {kind}/{name} is not a valid {kind}, error: {source}"))]
    PreparedManifest { kind: ObjectKind, name: String, source: serde_json::Error },

    #[snafu(display("Prepared resources of kind {kind} are not supported"))]
    UnsupportedPreparedKind { kind: ObjectKind },

    #[snafu(display("Objects of kind {kind} cannot be applied from a request"))]
    UnsupportedRequestKind { kind: ObjectKind },

    #[snafu(display("Backend is unavailable: {message}"))]
    Unavailable { message: String },
}
