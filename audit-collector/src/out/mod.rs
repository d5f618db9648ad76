use anyhow::Result;

use crate::audit::AuditReport;
use crate::engine::ReportRow;
use crate::error::AuditError;

pub mod csv;
pub mod http;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutMode {
    Stdout,
    Csv,
    Http,
}

impl OutMode {
    pub fn parse(s: &str) -> Result<Self, AuditError> {
        match s.trim().to_lowercase().as_str() {
            "" | "stdout" => Ok(OutMode::Stdout),
            "csv" => Ok(OutMode::Csv),
            "http" => Ok(OutMode::Http),
            other => Err(AuditError::InvalidConfig(format!("unknown output mode '{other}'"))),
        }
    }
}

pub fn emit_stdout(rows: &[ReportRow]) -> Result<()> {
    println!("audited resources = {}", rows.len());
    println!("{}", serde_json::to_string_pretty(rows)?);
    Ok(())
}

/// Per-service counts; printed after the report itself.
pub fn print_summary(report: &AuditReport) {
    println!("--- audit summary ---");
    for s in &report.services {
        match &s.listing_error {
            Some(err) => println!("{:<14} listing failed: {err}", s.service),
            None => println!(
                "{:<14} rows={} partial={} errors={}",
                s.service, s.rows, s.partial, s.errors
            ),
        }
    }
    println!(
        "total rows={} partial={} errors={} failed listings={}",
        report.rows.len(),
        report.partial_count(),
        report.error_count(),
        report.failed_listings().len()
    );
}
