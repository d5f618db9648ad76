use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use aws_sdk_dynamodb as ddb;
use serde_json::json;

use super::SharedAdapters;
use crate::aws::{access_error, to_utc, AwsContext};
use crate::collector_core::{
    Capabilities, Collector, Discovered, ResourceDescriptor, ResourceKind, StaticFields,
    TagFetcher, TagSet,
};
use crate::engine::metrics::{BucketPeriod, Dimension, MetricScope, MetricSpec, Statistic};
use crate::error::AccessError;
use crate::utils::opt_text;

fn table_name(d: &ResourceDescriptor) -> Vec<Dimension> {
    vec![Dimension::new("TableName", d.name.clone())]
}

pub const METRICS: &[MetricSpec] = &[
    MetricSpec {
        column: "AvgDailyReadUnits",
        namespace: "AWS/DynamoDB",
        metric_name: "ConsumedReadCapacityUnits",
        unit: Some("Count"),
        statistic: Statistic::Sum,
        period: BucketPeriod::Daily,
        window_days: None,
        per_day: true,
        scope: MetricScope::Resource(table_name),
    },
    MetricSpec {
        column: "AvgDailyWriteUnits",
        namespace: "AWS/DynamoDB",
        metric_name: "ConsumedWriteCapacityUnits",
        unit: Some("Count"),
        statistic: Statistic::Sum,
        period: BucketPeriod::Daily,
        window_days: None,
        per_day: true,
        scope: MetricScope::Resource(table_name),
    },
];

struct DynamoDbTags {
    client: ddb::Client,
}

#[async_trait]
impl TagFetcher for DynamoDbTags {
    async fn fetch_tags(&self, resource_id: &str) -> Result<TagSet, AccessError> {
        let mut tags = TagSet::new();
        let mut next_token: Option<String> = None;
        loop {
            let out = self
                .client
                .list_tags_of_resource()
                .resource_arn(resource_id)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(access_error)?;
            for t in out.tags() {
                tags.insert(opt_text(t.key()), opt_text(t.value()));
            }
            next_token = out.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }
        Ok(tags)
    }
}

pub struct DynamoDbCollector {
    client: ddb::Client,
    tags: Arc<DynamoDbTags>,
    shared: SharedAdapters,
}

impl DynamoDbCollector {
    pub fn new(ctx: &AwsContext, shared: &SharedAdapters) -> Self {
        let client = ddb::Client::new(ctx.config());
        Self {
            tags: Arc::new(DynamoDbTags { client: client.clone() }),
            client,
            shared: shared.clone(),
        }
    }

    async fn describe(&self, name: &str) -> Result<Discovered, AccessError> {
        let out = self
            .client
            .describe_table()
            .table_name(name)
            .send()
            .await
            .map_err(access_error)?;
        let table = out
            .table()
            .ok_or_else(|| AccessError::NotFound(format!("table {name} has no description")))?;

        let arn = table.table_arn().unwrap_or(name);
        let descriptor = ResourceDescriptor::new(ResourceKind::Table, arn, name)
            .with_alternate(name)
            .with_created_at(to_utc(table.creation_date_time()));

        let throughput = table.provisioned_throughput();
        let mut fields = StaticFields::new();
        fields.insert(
            "Status".into(),
            json!(table.table_status().map(|s| s.as_str()).unwrap_or_default()),
        );
        fields.insert("ItemCount".into(), json!(table.item_count().unwrap_or(0)));
        fields.insert("TableSizeBytes".into(), json!(table.table_size_bytes().unwrap_or(0)));
        fields.insert(
            "BillingMode".into(),
            json!(table
                .billing_mode_summary()
                .and_then(|b| b.billing_mode())
                .map(|m| m.as_str())
                .unwrap_or("PROVISIONED")),
        );
        fields.insert(
            "ProvisionedReadCapacity".into(),
            throughput
                .and_then(|t| t.read_capacity_units())
                .map(|v| json!(v))
                .unwrap_or_else(|| json!("N/A")),
        );
        fields.insert(
            "ProvisionedWriteCapacity".into(),
            throughput
                .and_then(|t| t.write_capacity_units())
                .map(|v| json!(v))
                .unwrap_or_else(|| json!("N/A")),
        );
        fields.insert(
            "EncryptionType".into(),
            json!(table
                .sse_description()
                .and_then(|s| s.sse_type())
                .map(|t| t.as_str())
                .unwrap_or("DEFAULT")),
        );
        fields.insert("StreamEnabled".into(), json!(table.stream_specification().is_some()));
        Ok(Discovered::new(descriptor, fields))
    }
}

#[async_trait]
impl Collector for DynamoDbCollector {
    fn name(&self) -> &'static str {
        "dynamodb"
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Table
    }

    fn metrics(&self) -> &'static [MetricSpec] {
        METRICS
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            tags: self.tags.clone(),
            registry: self.shared.registry.clone(),
            metrics: self.shared.metrics.clone(),
            subresources: None,
        }
    }

    async fn discover(&self) -> Result<Vec<Discovered>> {
        let mut out = Vec::new();
        let mut paginator = self.client.list_tables().into_paginator().send();
        while let Some(page) = paginator.next().await.transpose()? {
            for name in page.table_names() {
                let item = match self.describe(name).await {
                    Ok(item) => item,
                    Err(e) => {
                        tracing::error!(table = %name, error = %e, "DescribeTable failed");
                        Discovered::failed(
                            ResourceDescriptor::new(ResourceKind::Table, name.as_str(), name.as_str()),
                            e.to_string(),
                        )
                    }
                };
                out.push(item);
            }
        }
        Ok(out)
    }
}
