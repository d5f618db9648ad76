use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use csv::Writer;
use serde_json::Value;

use crate::collector_core::ResourceKind;
use crate::engine::ReportRow;

/// Header of the trailing row-status column.
const STATUS_HEADER: &str = "Audit Status";

/// (row field, CSV header) in output order, per resource kind.
fn columns(kind: ResourceKind) -> &'static [(&'static str, &'static str)] {
    match kind {
        ResourceKind::GatewayApi => &[
            ("Name", "Name"),
            ("Type", "Type"),
            ("Environment", "Environment"),
            ("Stages", "Stages"),
            ("StackName", "Stack Name"),
            ("Attribution", "Attribution"),
            ("TotalRequests", "Total Requests"),
            ("ResourceCount", "Resource Count"),
            ("IntegrationCount", "Integration Count"),
            ("EndpointConfiguration", "Endpoint Configuration"),
            ("ProtocolType", "Protocol Type"),
            ("Description", "Description"),
            ("CreatedDate", "Created Date"),
            ("ApiEndpoint", "API Endpoint"),
            ("Id", "ARN"),
            ("Tags", "Tags"),
        ],
        ResourceKind::Table => &[
            ("Name", "Table Name"),
            ("Environment", "Environment"),
            ("StackName", "Stack Name"),
            ("Attribution", "Attribution"),
            ("Status", "Status"),
            ("ItemCount", "Item Count"),
            ("TableSizeBytes", "Table Size (Bytes)"),
            ("AvgDailyReadUnits", "Avg Daily Read (Units)"),
            ("AvgDailyWriteUnits", "Avg Daily Write (Units)"),
            ("BillingMode", "Billing Mode"),
            ("ProvisionedReadCapacity", "Provisioned Read Capacity"),
            ("ProvisionedWriteCapacity", "Provisioned Write Capacity"),
            ("EncryptionType", "Encryption"),
            ("StreamEnabled", "Stream Enabled"),
            ("CreatedDate", "Creation Date"),
            ("Id", "ARN"),
            ("Tags", "Tags"),
        ],
        ResourceKind::Function => &[
            ("Name", "Function Name"),
            ("Environment", "Environment"),
            ("StackName", "CloudFormation Stack"),
            ("Attribution", "Attribution"),
            ("Runtime", "Runtime"),
            ("InvocationsLast30d", "Invocations (Last 30d)"),
            ("InvocationsLast90d", "Invocations (Last 90d)"),
            ("InvocationsLast365d", "Invocations (Last 365d)"),
            ("MemorySize", "Memory (MB)"),
            ("Timeout", "Timeout (s)"),
            ("LastModified", "Last Modified"),
            ("UpdateDates", "Update History (Last 10)"),
            ("CreatedDate", "Created Date"),
            ("Id", "ARN"),
            ("Tags", "Tags"),
        ],
        ResourceKind::Bucket => &[
            ("Name", "Bucket Name"),
            ("Region", "Region"),
            ("Environment", "Environment"),
            ("StackName", "Stack Name"),
            ("Attribution", "Attribution"),
            ("AllRequests", "Total Requests"),
            ("GetRequests", "GET Requests"),
            ("PutRequests", "PUT Requests"),
            ("DeleteRequests", "DELETE Requests"),
            ("HeadRequests", "HEAD Requests"),
            ("PostRequests", "POST Requests"),
            ("ListRequests", "LIST Requests"),
            ("4xxErrors", "4xx Errors"),
            ("5xxErrors", "5xx Errors"),
            ("BytesDownloaded", "Bytes Downloaded"),
            ("BytesUploaded", "Bytes Uploaded"),
            ("BucketSizeBytes", "Size (Bytes)"),
            ("NumberOfObjects", "Object Count"),
            ("Versioning", "Versioning"),
            ("Encryption", "Encryption"),
            ("Logging", "Logging"),
            ("PublicAccessBlocked", "Public Access Blocked"),
            ("CreatedDate", "Creation Date"),
            ("Id", "Id"),
            ("Tags", "Tags"),
        ],
        ResourceKind::Topic => &[
            ("Name", "Topic Name"),
            ("DisplayName", "Display Name"),
            ("Environment", "Environment"),
            ("StackName", "Stack Name"),
            ("Attribution", "Attribution"),
            ("AvgDailyMessages", "Avg Daily Messages"),
            ("TotalMessages", "Total Messages"),
            ("SubscriptionsCount", "Subscription Count"),
            ("Subscriptions", "Subscriptions"),
            ("KmsMasterKeyId", "KMS Key"),
            ("FifoTopic", "FIFO Topic"),
            ("ContentBasedDeduplication", "Content-Based Deduplication"),
            ("Owner", "Owner"),
            ("CreatedDate", "Created Date"),
            ("Id", "Topic ARN"),
            ("Tags", "Tags"),
        ],
        ResourceKind::Queue => &[
            ("Name", "Queue Name"),
            ("Region", "Region"),
            ("Environment", "Environment"),
            ("StackName", "Stack Name"),
            ("Attribution", "Attribution"),
            ("MessagesReceived", "Messages Received"),
            ("MessagesAvailable", "Messages Available"),
            ("MessagesInFlight", "Messages In Flight"),
            ("MessagesDelayed", "Messages Delayed"),
            ("CreatedDate", "Created"),
            ("LastModified", "Last Modified"),
            ("Arn", "ARN"),
            ("MessageRetention", "Message Retention"),
            ("VisibilityTimeout", "Visibility Timeout"),
            ("DeliveryDelay", "Delivery Delay"),
            ("FifoQueue", "FIFO Queue"),
            ("ContentBasedDeduplication", "Content-Based Deduplication"),
            ("KmsMasterKeyId", "KMS Master Key ID"),
            ("SqsManagedSseEnabled", "SQS-Managed SSE Enabled"),
            ("Id", "Queue URL"),
            ("MaxMessageSize", "Max Message Size (bytes)"),
            ("Tags", "Tags"),
        ],
        ResourceKind::Workflow => &[
            ("Name", "Name"),
            ("Type", "Type"),
            ("Status", "Status"),
            ("Environment", "Environment"),
            ("StackName", "Stack Name"),
            ("Attribution", "Attribution"),
            ("ExecutionsStarted", "Executions Started"),
            ("ExecutionsFailed", "Executions Failed"),
            ("AvgExecutionTimeMs", "Avg Execution Time (ms)"),
            ("LoggingLevel", "Logging Level"),
            ("RoleArn", "Role ARN"),
            ("CreatedDate", "Creation Date"),
            ("Id", "ARN"),
            ("Tags", "Tags"),
        ],
    }
}

pub fn file_name(kind: ResourceKind) -> String {
    format!("{}_audit.csv", kind.as_str().replace('-', "_"))
}

/// Mapped columns first, then any other field found in the rows, sorted.
fn header_fields(kind: ResourceKind, rows: &[&ReportRow]) -> Vec<(String, String)> {
    let mapped = columns(kind);
    let mut out: Vec<(String, String)> = mapped
        .iter()
        .map(|(field, header)| (field.to_string(), header.to_string()))
        .collect();

    let extra: BTreeSet<&str> = rows
        .iter()
        .flat_map(|r| r.fields().keys().map(String::as_str))
        .filter(|k| !mapped.iter().any(|(field, _)| field == k))
        .collect();
    out.extend(extra.into_iter().map(|k| (k.to_string(), k.to_string())));
    out
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| cell(Some(v)))
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => other.to_string(),
    }
}

/// One kind's rows as CSV text.
pub fn render(kind: ResourceKind, rows: &[&ReportRow]) -> Result<String> {
    let headers = header_fields(kind, rows);
    let mut wtr = Writer::from_writer(vec![]);

    let mut header_row: Vec<&str> = headers.iter().map(|(_, h)| h.as_str()).collect();
    header_row.push(STATUS_HEADER);
    wtr.write_record(&header_row)?;

    for row in rows {
        let mut record: Vec<String> = headers.iter().map(|(field, _)| cell(row.get(field))).collect();
        record.push(row.status().as_str().to_string());
        wtr.write_record(&record)?;
    }

    let data = wtr
        .into_inner()
        .map_err(|e| anyhow::anyhow!("CSV writer error: {e}"))?;
    String::from_utf8(data).context("CSV output is not UTF-8")
}

/// Writes `<kind>_audit.csv` into `dir` for every kind present in `rows`.
pub fn write_reports(dir: &Path, rows: &[ReportRow]) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;

    let mut by_kind: BTreeMap<ResourceKind, Vec<&ReportRow>> = BTreeMap::new();
    for row in rows {
        by_kind.entry(row.kind()).or_default().push(row);
    }

    let mut written = Vec::new();
    for (kind, kind_rows) in by_kind {
        let path = dir.join(file_name(kind));
        let text = render(kind, &kind_rows)?;
        std::fs::write(&path, text).with_context(|| format!("write {}", path.display()))?;
        tracing::info!(kind = %kind, rows = kind_rows.len(), path = %path.display(), "CSV written");
        written.push(path);
    }
    Ok(written)
}
