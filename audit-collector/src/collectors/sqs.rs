use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use aws_sdk_sqs as sqs;
use chrono::DateTime;
use serde_json::json;

use super::SharedAdapters;
use crate::aws::{access_error, AwsContext};
use crate::collector_core::{
    Capabilities, Collector, Discovered, ResourceDescriptor, ResourceKind, StaticFields,
    TagFetcher, TagSet,
};
use crate::engine::metrics::{BucketPeriod, Dimension, MetricScope, MetricSpec, Statistic};
use crate::error::AccessError;
use crate::utils::{format_timestamp, seconds_to_readable};

fn queue_name(d: &ResourceDescriptor) -> Vec<Dimension> {
    vec![Dimension::new("QueueName", d.name.clone())]
}

pub const METRICS: &[MetricSpec] = &[MetricSpec {
    column: "MessagesReceived",
    namespace: "AWS/SQS",
    metric_name: "NumberOfMessagesReceived",
    unit: Some("Count"),
    statistic: Statistic::Sum,
    period: BucketPeriod::Hourly,
    window_days: None,
    per_day: false,
    scope: MetricScope::Resource(queue_name),
}];

// 이름 추출 (URL 마지막 세그먼트)
fn name_from_url(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// `https://sqs.{region}.amazonaws.com/...`
fn region_from_url(url: &str) -> Option<&str> {
    let host = url.split("://").nth(1)?.split('/').next()?;
    let mut parts = host.split('.');
    match (parts.next(), parts.next()) {
        (Some("sqs"), Some(region)) if !region.is_empty() => Some(region),
        _ => None,
    }
}

struct SqsTags {
    client: sqs::Client,
}

#[async_trait]
impl TagFetcher for SqsTags {
    async fn fetch_tags(&self, resource_id: &str) -> Result<TagSet, AccessError> {
        let out = self
            .client
            .list_queue_tags()
            .queue_url(resource_id)
            .send()
            .await
            .map_err(access_error)?;
        Ok(out
            .tags()
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}

pub struct SqsCollector {
    client: sqs::Client,
    tags: Arc<SqsTags>,
    region: String,
    shared: SharedAdapters,
}

impl SqsCollector {
    pub fn new(ctx: &AwsContext, shared: &SharedAdapters) -> Self {
        let client = sqs::Client::new(ctx.config());
        Self {
            tags: Arc::new(SqsTags { client: client.clone() }),
            client,
            region: ctx.region().to_string(),
            shared: shared.clone(),
        }
    }

    async fn attributes(&self, url: &str) -> Result<HashMap<String, String>, AccessError> {
        use aws_sdk_sqs::types::QueueAttributeName as Attr;
        let attrs_res = self
            .client
            .get_queue_attributes()
            .queue_url(url)
            .attribute_names(Attr::All)
            .send()
            .await
            .map_err(access_error)?;

        // k: QueueAttributeName → 문자열로 변환
        Ok(attrs_res
            .attributes()
            .map(|a| a.iter().map(|(k, v)| (k.as_str().to_string(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn describe(&self, url: &str, name: &str, attrs: &HashMap<String, String>) -> Discovered {
        let arn = attrs.get("QueueArn").cloned().unwrap_or_default();
        let created = attrs
            .get("CreatedTimestamp")
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0));

        let descriptor = ResourceDescriptor::new(ResourceKind::Queue, url, name)
            .with_alternate(name)
            .with_alternate(arn.clone())
            .with_created_at(created);

        let count = |key: &str| json!(attrs.get(key).and_then(|s| s.parse::<i64>().ok()).unwrap_or(0));
        let duration = |key: &str| {
            attrs
                .get(key)
                .and_then(|s| s.parse::<i64>().ok())
                .map(|secs| json!(seconds_to_readable(secs)))
                .unwrap_or_else(|| json!("N/A"))
        };
        let flag = |key: &str| json!(attrs.get(key).map(|v| v == "true").unwrap_or(false));

        let mut fields = StaticFields::new();
        fields.insert(
            "Region".into(),
            json!(region_from_url(url).unwrap_or(&self.region)),
        );
        fields.insert("Arn".into(), json!(arn));
        fields.insert("MessagesAvailable".into(), count("ApproximateNumberOfMessages"));
        fields.insert("MessagesInFlight".into(), count("ApproximateNumberOfMessagesNotVisible"));
        fields.insert("MessagesDelayed".into(), count("ApproximateNumberOfMessagesDelayed"));
        fields.insert("FifoQueue".into(), flag("FifoQueue"));
        fields.insert("ContentBasedDeduplication".into(), flag("ContentBasedDeduplication"));
        fields.insert("MessageRetention".into(), duration("MessageRetentionPeriod"));
        fields.insert("VisibilityTimeout".into(), duration("VisibilityTimeout"));
        fields.insert("DeliveryDelay".into(), duration("DelaySeconds"));
        fields.insert("MaxMessageSize".into(), count("MaximumMessageSize"));
        fields.insert(
            "KmsMasterKeyId".into(),
            json!(attrs.get("KmsMasterKeyId").map(String::as_str).unwrap_or("None")),
        );
        fields.insert("SqsManagedSseEnabled".into(), flag("SqsManagedSseEnabled"));
        fields.insert(
            "LastModified".into(),
            json!(attrs
                .get("LastModifiedTimestamp")
                .and_then(|s| s.parse::<i64>().ok())
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .map(format_timestamp)
                .unwrap_or_default()),
        );
        Discovered::new(descriptor, fields)
    }
}

#[async_trait]
impl Collector for SqsCollector {
    fn name(&self) -> &'static str {
        "sqs"
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Queue
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

        // 1) 큐 목록: &[String]
        let mut paginator = self.client.list_queues().into_paginator().send();
        while let Some(page) = paginator.next().await.transpose()? {
            for url in page.queue_urls() {
                let name = name_from_url(url);
                // 2) 속성 조회
                let item = match self.attributes(url).await {
                    Ok(attrs) => self.describe(url, name, &attrs),
                    Err(e) => {
                        tracing::error!(queue = %url, error = %e, "GetQueueAttributes failed");
                        Discovered::failed(
                            ResourceDescriptor::new(ResourceKind::Queue, url.as_str(), name).with_alternate(name),
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

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://sqs.eu-central-1.amazonaws.com/123456789012/orders-prod.fifo";

    #[test]
    fn test_url_parsing() {
        assert_eq!(name_from_url(URL), "orders-prod.fifo");
        assert_eq!(region_from_url(URL), Some("eu-central-1"));
        assert_eq!(region_from_url("http://localhost:9324/queue/x"), None);
    }

    #[test]
    fn test_metric_uses_queue_name() {
        let d = ResourceDescriptor::new(ResourceKind::Queue, URL, "orders-prod.fifo");
        let q = METRICS[0].query(queue_name(&d));
        assert_eq!(q.key(), "NumberOfMessagesReceived|QueueName=orders-prod.fifo");
    }
}
