//! Submits one batch of resource requests and prints the resulting report.
//!
//! The batch file names owners and the resources each owner wants. Every
//! owner listed with an empty list, and every known owner not listed at all,
//! loses its resources.

use std::path::PathBuf;

use clap::Args;
use snafu::ResultExt;

use crate::{
    batch::{Batch, STDIN_PATH},
    cli::{ClusterDeployer, OutputFormat, error, error::Error, write_stdout},
    ui::table::{NamespaceReportExt, ReconciliationReportExt},
};

/// Exit code of a pass that ran but rejected or failed something.
const EXIT_CODE_NOT_CLEAN: i32 = 2;

/// Arguments of the `submit` subcommand.
#[derive(Args, Clone)]
pub struct SubmitCommand {
    /// Path of the batch file, or `-` for standard input.
    #[arg(
        default_value = STDIN_PATH,
        help = "Batch file in YAML or JSON. Use '-' to read from standard input."
    )]
    pub file: PathBuf,

    /// Namespace to reconcile.
    ///
    /// Falls back to the namespace of the batch file, then to the registered
    /// target, then to the configured default.
    #[arg(
        short,
        long,
        help = "Namespace to reconcile. Overrides the namespace named in the batch file."
    )]
    pub namespace: Option<String>,

    #[arg(short, long, value_enum, default_value_t, help = "Format of the printed report.")]
    pub output: OutputFormat,
}

impl SubmitCommand {
    /// Loads the batch, runs one reconciliation pass and prints its report.
    ///
    /// Returns `0` when every request was admitted and applied, or
    /// [`EXIT_CODE_NOT_CLEAN`] when the pass rejected or failed anything. A
    /// pass that ran is never an `Err`.
    ///
    /// # Arguments
    ///
    /// * `self` - The parsed command-line arguments.
    /// * `deployer` - The deployer connected to the cluster and holding the
    ///   registry lock.
    ///
    /// # Errors
    ///
    /// This function can return an `Error` in the following situations:
    ///
    /// * If the batch file cannot be read or parsed.
    /// * If the report cannot be serialized or written to standard output.
    pub async fn run(self, deployer: ClusterDeployer) -> Result<i32, Error> {
        let Self { file, namespace, output } = self;

        let mut batch = Batch::load(&file)?;
        let namespace = namespace.or_else(|| batch.namespace.take());
        // Requests are rescoped to the resolved namespace by the reconciler.
        let requests = batch.into_requests(namespace.as_deref().unwrap_or_default());
        tracing::info!(
            "Submitting {} request(s) of {} owner(s)",
            requests.values().map(Vec::len).sum::<usize>(),
            requests.len()
        );

        let outcome = deployer.submit_batch(namespace.as_deref(), requests).await;

        match output {
            OutputFormat::Json => {
                let json =
                    serde_json::to_string_pretty(&outcome).context(error::SerializeReportSnafu)?;
                write_stdout(&json).await?;
            }
            OutputFormat::Table => {
                if outcome.namespace.previous.is_some() || !outcome.namespace.failures.is_empty() {
                    write_stdout(&[outcome.namespace.clone()].render_table()).await?;
                }
                write_stdout(&outcome.reconciliation.render_table()).await?;
                let problems = outcome.reconciliation.render_problems();
                if !problems.is_empty() {
                    write_stdout(&problems).await?;
                }
            }
        }

        Ok(if outcome.is_clean() { 0 } else { EXIT_CODE_NOT_CLEAN })
    }
}
