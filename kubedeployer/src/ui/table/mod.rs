//! Table renderings of reports and registry state for the command line.

mod namespace_report_ext;
mod reconciliation_report_ext;
mod registry_state_ext;

pub use self::{
    namespace_report_ext::NamespaceReportExt, reconciliation_report_ext::ReconciliationReportExt,
    registry_state_ext::RegistryStateExt,
};

fn new_table<const N: usize>(header: [&str; N]) -> comfy_table::Table {
    let mut table = comfy_table::Table::new();
    let _table = table
        .load_preset(comfy_table::presets::NOTHING)
        .set_content_arrangement(comfy_table::ContentArrangement::Dynamic)
        .set_header(header.to_vec());
    table
}
