pub mod k8s {
    pub mod labels {
        pub const NAME: &str = "app.kubernetes.io/name";
        pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";

        /// Holds the id of the application a resource was created for.
        pub const RESOURCE_FOR: &str = "kubedeployer.io/resource-for";

        /// Holds the name of the deployer instance that created a resource.
        /// Several deployers may share one cluster.
        pub const DEPLOYER: &str = "kubedeployer.io/deployer";
    }
}

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_DEPLOYER_NAME: &str = "kubedeployer";
pub const DEFAULT_FIELD_MANAGER: &str = "kubedeployer";
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Owner reported when the owner of a conflicting object cannot be
/// determined.
pub const UNKNOWN_OWNER: &str = "unknown";
