//! Runs every collector and turns what they list into report rows.

use std::sync::Arc;

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::collector_core::{Collector, ResourceKind};
use crate::engine::{EngineSettings, ReportRow, RowBuilder, RowStatus};
use crate::error::AuditError;

#[derive(Debug, Clone, Serialize)]
pub struct ServiceSummary {
    pub service: &'static str,
    pub kind: ResourceKind,
    pub rows: usize,
    pub partial: usize,
    pub errors: usize,
    /// Set when the service's inventory could not be listed at all.
    pub listing_error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub rows: Vec<ReportRow>,
    pub services: Vec<ServiceSummary>,
}

impl AuditReport {
    pub fn partial_count(&self) -> usize {
        self.services.iter().map(|s| s.partial).sum()
    }

    pub fn error_count(&self) -> usize {
        self.services.iter().map(|s| s.errors).sum()
    }

    pub fn failed_listings(&self) -> Vec<&'static str> {
        self.services
            .iter()
            .filter(|s| s.listing_error.is_some())
            .map(|s| s.service)
            .collect()
    }
}

pub struct Auditor {
    collectors: Vec<Arc<dyn Collector>>,
    settings: Arc<EngineSettings>,
    concurrency: usize,
}

impl Auditor {
    pub fn new(collectors: Vec<Arc<dyn Collector>>, settings: EngineSettings, concurrency: usize) -> Self {
        Self {
            collectors,
            settings: Arc::new(settings),
            concurrency: concurrency.max(1),
        }
    }

    /// Fails only when every collector failed to list; anything narrower ends up in the report.
    pub async fn run(&self) -> Result<AuditReport, AuditError> {
        let results = join_all(self.collectors.iter().map(|c| self.audit_service(c.as_ref()))).await;

        let mut report = AuditReport::default();
        for (summary, mut rows) in results {
            report.rows.append(&mut rows);
            report.services.push(summary);
        }

        let failed = report.failed_listings();
        if !self.collectors.is_empty() && failed.len() == self.collectors.len() {
            return Err(AuditError::InventoryUnavailable(failed.join(", ")));
        }

        tracing::info!(
            rows = report.rows.len(),
            partial = report.partial_count(),
            errors = report.error_count(),
            failed_listings = failed.len(),
            "Audit finished"
        );
        Ok(report)
    }

    async fn audit_service(&self, collector: &dyn Collector) -> (ServiceSummary, Vec<ReportRow>) {
        let mut summary = ServiceSummary {
            service: collector.name(),
            kind: collector.kind(),
            rows: 0,
            partial: 0,
            errors: 0,
            listing_error: None,
        };

        let items = match collector.discover().await {
            Ok(items) => items,
            Err(e) => {
                let msg = format!("{e:#}");
                tracing::error!(service = collector.name(), error = %msg, "Listing failed");
                summary.listing_error = Some(msg);
                return (summary, Vec::new());
            }
        };
        tracing::info!(service = collector.name(), resources = items.len(), "Listed");

        let builder = RowBuilder::new(collector.capabilities(), collector.metrics(), self.settings.clone());
        let rows: Vec<ReportRow> = stream::iter(items.iter())
            .map(|item| builder.build_row(item))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        summary.rows = rows.len();
        summary.partial = rows.iter().filter(|r| r.status() == RowStatus::Partial).count();
        summary.errors = rows.iter().filter(|r| r.status() == RowStatus::Error).count();
        (summary, rows)
    }
}
