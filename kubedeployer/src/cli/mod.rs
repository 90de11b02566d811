//! The `kubedeployer` command line.
//!
//! # Examples
//!
//! ```bash
//! # Reconcile the namespace against a batch file
//! kubedeployer submit batch.yaml
//!
//! # Read the batch from standard input and print the report as JSON
//! cat batch.yaml | kubedeployer submit - --output json
//!
//! # Move every owned resource to another namespace
//! kubedeployer namespace set staging
//!
//! # Show what the registry records
//! kubedeployer status
//! ```

pub mod error;
mod namespace;
mod status;
mod submit;

use std::{io::Write, path::PathBuf};

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use snafu::ResultExt;
use tokio::{io::AsyncWriteExt, runtime::Runtime};

pub use self::error::Error;
use self::{namespace::NamespaceCommands, status::StatusCommand, submit::SubmitCommand};
use crate::{
    backend::KubeBackend, config::Config, deployer::Deployer, registry::FileRegistry, shadow,
};

pub type ClusterDeployer = Deployer<KubeBackend, FileRegistry>;

#[derive(Parser)]
#[command(
    name = deployer_base::CLI_PROGRAM_NAME,
    author,
    version,
    long_version = shadow::CLAP_LONG_VERSION,
    about = "Reconciles Kubernetes resources requested by applications.",
    long_about = "Kubedeployer applies the resources each application requests, refuses \
                  requests that collide with another application's objects, and \
                  garbage-collects whatever an application no longer requests.",
    color = clap::ColorChoice::Always
)]
pub struct Cli {
    #[clap(subcommand)]
    commands: Option<Commands>,

    #[clap(
        long = "config",
        short = 'c',
        env = "KUBEDEPLOYER_CONFIG_FILE_PATH",
        help = "Specify a configuration file. Defaults to ~/.config/kubedeployer/config.yaml or \
                KUBEDEPLOYER_CONFIG_FILE_PATH env var."
    )]
    config_file: Option<PathBuf>,

    #[clap(
        long = "log-level",
        env = "KUBEDEPLOYER_LOG_LEVEL",
        help = "Set the logging level (e.g., info, debug, trace)."
    )]
    log_level: Option<tracing::Level>,

    #[clap(
        long = "deployer-name",
        env = "KUBEDEPLOYER_NAME",
        help = "Override the deployer identity stamped on created objects."
    )]
    deployer_name: Option<String>,
}

#[derive(Clone, Subcommand)]
pub enum Commands {
    #[command(about = "Display client and server version information")]
    Version {
        #[clap(long = "client", help = "If true, shows client version only (no server required).")]
        client: bool,
    },

    #[command(about = "Generate shell completion script for the specified shell (bash, zsh, fish)")]
    Completions { shell: clap_complete::Shell },

    #[command(about = "Output the default configuration in YAML format")]
    DefaultConfig,

    #[command(alias = "s", about = "Reconcile the target namespace against a batch of requests")]
    Submit(SubmitCommand),

    #[command(alias = "ns", about = "Show, move or prune the namespaces the deployer targets")]
    Namespace {
        #[command(subcommand)]
        commands: NamespaceCommands,
    },

    #[command(about = "List the resources the ownership registry records")]
    Status(StatusCommand),
}

/// How reports are printed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl Default for Cli {
    fn default() -> Self { Self::parse() }
}

impl Cli {
    /// An explicit path must load. Without one the default locations are
    /// searched and the built-in defaults apply when none exists.
    fn load_config(&self) -> Result<Config, Error> {
        let mut config = match self.config_file.clone().or_else(Config::search_config_file_path) {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(log_level) = self.log_level {
            config.log.level = log_level;
        }
        if let Some(deployer_name) = &self.deployer_name {
            config.deployer_name.clone_from(deployer_name);
        }
        config.validate()?;

        Ok(config)
    }

    /// # Errors
    ///
    /// Fails when the configuration cannot be loaded, the Kubernetes client or
    /// the runtime cannot be created, or a subcommand fails.
    ///
    /// # Panics
    ///
    /// Panics when writing the version or the default configuration to
    /// stdout fails.
    pub fn run(self) -> Result<i32, Error> {
        let client_version = Self::command().get_version().unwrap_or_default().to_string();
        match self.commands {
            Some(Commands::Version { client }) if client => {
                std::io::stdout()
                    .write_all(Self::command().render_long_version().as_bytes())
                    .expect("Failed to write to stdout");
                std::io::stdout()
                    .write_all(format!("Client Version: {client_version}\n").as_bytes())
                    .expect("Failed to write to stdout");

                return Ok(0);
            }
            Some(Commands::Completions { shell }) => {
                let mut app = Self::command();
                let bin_name = app.get_name().to_string();
                clap_complete::generate(shell, &mut app, bin_name, &mut std::io::stdout());
                return Ok(0);
            }
            Some(Commands::DefaultConfig) => {
                std::io::stdout()
                    .write_all(Config::template_basic().as_slice())
                    .expect("Failed to write to stdout");
                return Ok(0);
            }
            None => {
                let help = Self::command().render_long_help().ansi().to_string();
                std::io::stderr().write_all(help.as_bytes()).expect("Failed to write to stderr");
                return Ok(-1);
            }
            _ => {}
        }

        let config = self.load_config()?;
        config.log.registry();

        let fut = async move {
            let kube_client = kube::Client::try_default().await.context(error::KubeConfigSnafu)?;
            match self.commands {
                Some(Commands::Version { .. }) => {
                    let server_version = kube_client.apiserver_version().await.map_or_else(
                        |_| "unknown".to_string(),
                        |info| format!("{}.{}", info.major, info.minor),
                    );
                    let info = format!(
                        "Client Version: {client_version}\nServer Version: {server_version}\n",
                    );
                    let mut stdout = tokio::io::stdout();
                    stdout
                        .write_all(Self::command().render_long_version().as_bytes())
                        .await
                        .context(error::WriteStdoutSnafu)?;
                    stdout.write_all(info.as_bytes()).await.context(error::WriteStdoutSnafu)?;
                    Ok(0)
                }
                Some(Commands::Submit(cmd)) => cmd.run(connect(kube_client, &config)?).await,
                Some(Commands::Namespace { commands }) => {
                    commands.run(connect(kube_client, &config)?).await
                }
                Some(Commands::Status(cmd)) => cmd.run(connect(kube_client, &config)?).await,
                Some(Commands::Completions { .. } | Commands::DefaultConfig) | None => Ok(0),
            }
        };

        Runtime::new().context(error::InitializeTokioRuntimeSnafu)?.block_on(fut)
    }
}

/// Opens the registry and wires it to a backend on `kube_client`.
fn connect(kube_client: kube::Client, config: &Config) -> Result<ClusterDeployer, Error> {
    let registry = FileRegistry::open(&config.state_file_path)?;
    tracing::debug!("Ownership registry opened at {}", registry.path().display());
    let backend =
        KubeBackend::new(kube_client, config.field_manager.clone(), config.concurrency);
    Ok(Deployer::new(
        backend,
        registry,
        config.deployer_name.clone(),
        config.namespace.clone(),
        config.concurrency,
    ))
}

async fn write_stdout(content: &str) -> Result<(), Error> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(content.as_bytes()).await.context(error::WriteStdoutSnafu)?;
    if !content.ends_with('\n') {
        stdout.write_u8(b'\n').await.context(error::WriteStdoutSnafu)?;
    }
    stdout.flush().await.context(error::WriteStdoutSnafu)
}
