//! Reconciles the Kubernetes resources other applications request.
//!
//! Each application (an *owner*) submits the full list of resources it wants.
//! A pass admits requests that do not collide with another owner's objects,
//! applies them, and garbage-collects everything the registry or the cluster
//! attributes to owners that no longer ask for it.

pub mod backend;
pub mod batch;
pub mod cli;
pub mod config;
pub mod deployer;
pub mod namespace;
pub mod reconcile;
pub mod registry;
pub mod resource;
pub mod ui;

pub mod shadow {
    #![allow(clippy::needless_raw_string_hashes)]
    use shadow_rs::shadow;
    shadow!(build);

    pub use self::build::*;
}

pub use self::{
    cli::Cli,
    deployer::{Deployer, SubmitOutcome},
};
