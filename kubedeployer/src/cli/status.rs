use clap::Args;
use snafu::ResultExt;

use crate::{
    cli::{ClusterDeployer, OutputFormat, error, error::Error, write_stdout},
    ui::table::RegistryStateExt,
};

/// Prints the registry: every owner and the resources recorded for it.
#[derive(Args, Clone)]
pub struct StatusCommand {
    #[arg(short, long, value_enum, default_value_t, help = "Format of the printed state.")]
    pub output: OutputFormat,
}

impl StatusCommand {
    /// # Errors
    ///
    /// Fails when the state cannot be serialized or written to standard
    /// output.
    pub async fn run(self, deployer: ClusterDeployer) -> Result<i32, Error> {
        let state = deployer.snapshot().await;
        let content = match self.output {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&state).context(error::SerializeReportSnafu)?
            }
            OutputFormat::Table => state.render_table(),
        };
        write_stdout(&content).await?;
        Ok(0)
    }
}
