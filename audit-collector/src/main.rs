use std::sync::Arc;

use anyhow::Result;
use audit_collector::audit::Auditor;
use audit_collector::aws::AwsContext;
use audit_collector::collector_core::Collector;
use audit_collector::collectors::build_collectors;
use audit_collector::config::{AuditConfig, Cli, OutputTarget};
use audit_collector::engine::EngineSettings;
use audit_collector::mock::demo_collectors;
use audit_collector::out::{self, http::post_batches};
use audit_collector::utils::env_or;
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_logging() {
    // AUDIT_LOG 우선, 없으면 RUST_LOG
    let directives = env_or("AUDIT_LOG", &env_or("RUST_LOG", "info"));
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let config = AuditConfig::try_from(Cli::parse())?;

    let collectors: Vec<Arc<dyn Collector>> = if config.mock {
        tracing::info!("Mock mode: auditing built-in fixtures");
        demo_collectors()
    } else {
        let ctx = AwsContext::load(config.region.clone()).await;
        tracing::info!(region = ctx.region(), services = ?config.services, "Auditing account");
        build_collectors(&ctx, &config.services)
    };

    let settings = EngineSettings {
        now: Utc::now(),
        window_days: config.window_days,
        stack_tag_keys: config.stack_tag_keys.clone(),
    };
    let report = Auditor::new(collectors, settings, config.concurrency).run().await?;

    match &config.output {
        OutputTarget::Stdout => out::emit_stdout(&report.rows)?,
        OutputTarget::Csv { dir } => {
            let files = out::csv::write_reports(dir, &report.rows)?;
            println!("csv files written = {}", files.len());
        }
        OutputTarget::Http {
            endpoint,
            batch_size,
            batch_flush_ms,
        } => {
            post_batches(endpoint, &report.rows, *batch_size, *batch_flush_ms).await?;
            tracing::info!(endpoint = %endpoint, rows = report.rows.len(), "Rows posted");
        }
    }

    out::print_summary(&report);
    Ok(())
}
