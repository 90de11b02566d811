use clap::Subcommand;
use snafu::ResultExt;

use crate::{
    cli::{ClusterDeployer, OutputFormat, error, error::Error, write_stdout},
    namespace::NamespaceReport,
    ui::table::NamespaceReportExt,
};

/// Subcommands of `namespace`.
#[derive(Clone, Subcommand)]
pub enum NamespaceCommands {
    #[command(about = "Print the current and previous target namespace")]
    Show,

    #[command(
        about = "Move the deployer to another namespace, sweeping and deleting the previous one \
                 when it is left empty"
    )]
    Set {
        #[arg(help = "Namespace to target from now on.")]
        namespace: String,

        #[arg(short, long, value_enum, default_value_t, help = "Format of the printed report.")]
        output: OutputFormat,
    },

    #[command(about = "Delete empty namespaces this deployer created, except the current one")]
    Prune {
        #[arg(short, long, value_enum, default_value_t, help = "Format of the printed report.")]
        output: OutputFormat,
    },
}

impl NamespaceCommands {
    /// Runs the subcommand and returns the process exit code: `1` when a
    /// namespace could not be swept, checked or deleted, `0` otherwise.
    ///
    /// # Arguments
    ///
    /// * `self` - The parsed subcommand.
    /// * `deployer` - The deployer connected to the cluster.
    ///
    /// # Errors
    ///
    /// Fails when the report cannot be serialized or written to standard
    /// output. Failures of the lifecycle itself end up in the report.
    pub async fn run(self, deployer: ClusterDeployer) -> Result<i32, Error> {
        match self {
            Self::Show => {
                let target = deployer.snapshot().await.namespace;
                let content = format!(
                    "current: {}\nprevious: {}",
                    target.current.as_deref().unwrap_or("<none>"),
                    target.previous.as_deref().unwrap_or("<none>")
                );
                write_stdout(&content).await?;
                Ok(0)
            }
            Self::Set { namespace, output } => {
                let report = deployer.set_namespace(&namespace).await;
                let exit_code = i32::from(!report.failures.is_empty());
                print_reports(&[report], output).await?;
                Ok(exit_code)
            }
            Self::Prune { output } => {
                let reports = deployer.prune_namespaces().await;
                let exit_code = i32::from(reports.iter().any(|report| !report.failures.is_empty()));
                print_reports(&reports, output).await?;
                Ok(exit_code)
            }
        }
    }
}

async fn print_reports(reports: &[NamespaceReport], output: OutputFormat) -> Result<(), Error> {
    let content = match output {
        OutputFormat::Json => {
            serde_json::to_string_pretty(reports).context(error::SerializeReportSnafu)?
        }
        OutputFormat::Table => reports.render_table(),
    };
    write_stdout(&content).await
}
