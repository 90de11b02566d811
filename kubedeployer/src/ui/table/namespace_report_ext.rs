use crate::namespace::{NamespaceOutcome, NamespaceReport};

pub trait NamespaceReportExt {
    fn render_table(&self) -> String;
}

impl NamespaceReportExt for [NamespaceReport] {
    fn render_table(&self) -> String {
        let rows = self.iter().map(namespace_row);
        super::new_table(["NAMESPACE", "PREVIOUS", "CREATED", "SWEPT", "OUTCOME", "FAILURES"])
            .add_rows(rows)
            .to_string()
    }
}

fn namespace_row(report: &NamespaceReport) -> [String; 6] {
    let outcome = match report.outcome {
        NamespaceOutcome::Unchanged => "unchanged".to_string(),
        NamespaceOutcome::Deleted => "deleted".to_string(),
        NamespaceOutcome::Retained { remaining } => format!("retained ({remaining} remaining)"),
    };
    [
        report.namespace.clone(),
        report.previous.clone().unwrap_or_default(),
        report.created.to_string(),
        report.swept.to_string(),
        outcome,
        report.failures.join("; "),
    ]
}
