//! Command-line plumbing shared by the `kubedeployer` binaries.

pub mod config;
