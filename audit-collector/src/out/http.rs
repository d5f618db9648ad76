use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::Client;

use crate::engine::ReportRow;
use crate::utils::chunked;

/// POSTs rows as JSON arrays of at most `batch_size`, stopping at the first rejected batch.
pub async fn post_batches(
    endpoint: &str,
    rows: &[ReportRow],
    batch_size: usize,
    batch_flush_ms: u64,
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }

    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let batches = chunked(rows, batch_size);
    let total = batches.len();
    let mut i = 0;
    for (n, batch) in batches.into_iter().enumerate() {
        let j = i + batch.len();
        let resp = client
            .post(endpoint)
            .json(&batch)
            .send()
            .await
            .map_err(|e| anyhow!("POST send error: {e}"))?;

        if !resp.status().is_success() {
            let code = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("POST [{i}-{j}) failed: {code} - {body}"));
        }
        tracing::debug!(batch = n + 1, total, rows = batch.len(), "Batch posted");

        // flush 간격
        if n + 1 < total {
            tokio::time::sleep(Duration::from_millis(batch_flush_ms)).await;
        }
        i = j;
    }

    Ok(())
}
