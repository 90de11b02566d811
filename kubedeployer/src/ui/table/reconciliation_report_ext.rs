//! Renders a [`ReconciliationReport`] as an owner summary followed by the
//! details of every rejection and failure.

use std::collections::BTreeMap;

use crate::{
    reconcile::{Failure, ReconciliationReport, Rejected, Workload},
    resource::OwnerId,
};

pub trait ReconciliationReportExt {
    /// One row per owner with its status, counters and observed workload.
    fn render_table(&self) -> String;

    /// One row per rejected request or failed call. Empty when the pass was
    /// clean.
    fn render_problems(&self) -> String;
}

/// `10.0.0.7 80:30080,443:30443`, or empty when nothing is published.
fn endpoint(workload: &Workload) -> String {
    let ports = workload
        .ports
        .iter()
        .map(|(port, node_port)| format!("{port}:{node_port}"))
        .collect::<Vec<_>>()
        .join(",");
    match &workload.host {
        Some(host) if !ports.is_empty() => format!("{host} {ports}"),
        _ => ports,
    }
}

#[derive(Default)]
struct Counters {
    admitted: usize,
    rejected: usize,
    deleted: usize,
    failures: usize,
}

impl ReconciliationReportExt for ReconciliationReport {
    fn render_table(&self) -> String {
        let mut counters = BTreeMap::<&OwnerId, Counters>::new();
        for admitted in &self.admitted {
            counters.entry(&admitted.owner).or_default().admitted += 1;
        }
        for rejected in &self.rejected {
            counters.entry(&rejected.owner).or_default().rejected += 1;
        }
        for deleted in &self.deleted {
            counters.entry(&deleted.owner).or_default().deleted += deleted.count;
        }
        for failure in &self.failures {
            counters.entry(&failure.owner).or_default().failures += 1;
        }

        let statuses = self.owner_statuses();
        let rows = counters.into_iter().map(|(owner, counters)| {
            let workload = self.workloads.get(owner);
            [
                owner.to_string(),
                statuses.get(owner).map(ToString::to_string).unwrap_or_default(),
                workload
                    .map(|workload| format!("{}/{}", workload.ready_pods, workload.pods))
                    .unwrap_or_default(),
                workload.map(endpoint).unwrap_or_default(),
                counters.admitted.to_string(),
                counters.rejected.to_string(),
                counters.deleted.to_string(),
                counters.failures.to_string(),
            ]
        });
        super::new_table([
            "OWNER", "STATUS", "PODS", "ENDPOINT", "ADMITTED", "REJECTED", "DELETED", "FAILURES",
        ])
        .add_rows(rows)
        .to_string()
    }

    fn render_problems(&self) -> String {
        let pod_errors = self
            .workloads
            .iter()
            .filter_map(|(owner, workload)| Some((owner, workload.error.as_ref()?)))
            .map(|(owner, error)| [owner.to_string(), "pod".to_string(), error.clone()])
            .collect::<Vec<_>>();
        if self.is_clean() && pod_errors.is_empty() {
            return String::new();
        }

        let rejected = self.rejected.iter().map(|rejected: &Rejected| {
            [
                rejected.owner.to_string(),
                rejected.resource.to_string(),
                rejected.error().to_string(),
            ]
        });
        let failed = self.failures.iter().map(|Failure { owner, resource, message }| {
            [
                owner.to_string(),
                resource.as_ref().map(ToString::to_string).unwrap_or_default(),
                message.clone(),
            ]
        });
        let errors =
            self.errors.iter().map(|message| [String::new(), String::new(), message.clone()]);
        super::new_table(["OWNER", "RESOURCE", "PROBLEM"])
            .add_rows(rejected.chain(failed).chain(pod_errors).chain(errors))
            .to_string()
    }
}
