use snafu::Snafu;

use crate::{backend, registry, resource::ResourceRef};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("{reference} is already owned by {existing_owner}"))]
    Conflict { reference: ResourceRef, existing_owner: String },

    #[snafu(display("{reference} is cluster-scoped and cannot be requested by an owner"))]
    ClusterScopedRequest { reference: ResourceRef },

    #[snafu(display("Cannot verify the owner of {reference}, error: {message}"))]
    OwnershipUnverified { reference: ResourceRef, message: String },

    #[snafu(display("Backend is unavailable, error: {source}"))]
    BackendUnavailable { source: backend::Error },

    #[snafu(display("Failed to commit ownership registry, error: {source}"))]
    Registry { source: registry::Error },
}
