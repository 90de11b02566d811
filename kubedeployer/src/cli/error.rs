use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("{source}"))]
    Configuration { source: crate::config::Error },

    #[snafu(display("{source}"))]
    Batch { source: crate::batch::Error },

    #[snafu(display("{source}"))]
    Registry { source: crate::registry::Error },

    #[snafu(display("Failed to write to stdout, error: {source}"))]
    WriteStdout { source: std::io::Error },

    #[snafu(display("Failed to serialize report, error: {source}"))]
    SerializeReport { source: serde_json::Error },

    #[snafu(display("Failed to initialize Kubernetes client configuration, error: {source}"))]
    KubeConfig {
        #[snafu(source(from(kube::Error, Box::new)))]
        source: Box<kube::Error>,
    },

    #[snafu(display("Failed to create tokio runtime, error: {source}"))]
    InitializeTokioRuntime { source: std::io::Error },
}

impl From<crate::config::Error> for Error {
    fn from(source: crate::config::Error) -> Self { Self::Configuration { source } }
}

impl From<crate::batch::Error> for Error {
    fn from(source: crate::batch::Error) -> Self { Self::Batch { source } }
}

impl From<crate::registry::Error> for Error {
    fn from(source: crate::registry::Error) -> Self { Self::Registry { source } }
}
