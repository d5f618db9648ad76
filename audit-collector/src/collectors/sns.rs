use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use aws_sdk_sns as sns;
use serde_json::json;

use super::SharedAdapters;
use crate::aws::{access_error, AwsContext};
use crate::collector_core::{
    Capabilities, Collector, Discovered, ResourceDescriptor, ResourceKind, StaticFields,
    TagFetcher, TagSet,
};
use crate::engine::metrics::{BucketPeriod, Dimension, MetricScope, MetricSpec, Statistic};
use crate::error::AccessError;
use crate::utils::opt_text;

fn topic_name(d: &ResourceDescriptor) -> Vec<Dimension> {
    vec![Dimension::new("TopicName", d.name.clone())]
}

const fn published(column: &'static str, per_day: bool) -> MetricSpec {
    MetricSpec {
        column,
        namespace: "AWS/SNS",
        metric_name: "NumberOfMessagesPublished",
        unit: Some("Count"),
        statistic: Statistic::Sum,
        period: BucketPeriod::Daily,
        window_days: None,
        per_day,
        scope: MetricScope::Resource(topic_name),
    }
}

pub const METRICS: &[MetricSpec] = &[
    published("TotalMessages", false),
    published("AvgDailyMessages", true),
];

/// Last `:` segment of a topic ARN.
fn name_from_arn(arn: &str) -> &str {
    arn.rsplit(':').next().unwrap_or(arn)
}

fn attr_flag(attrs: &HashMap<String, String>, key: &str) -> bool {
    attrs
        .get(key)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

struct SnsTags {
    client: sns::Client,
}

#[async_trait]
impl TagFetcher for SnsTags {
    async fn fetch_tags(&self, resource_id: &str) -> Result<TagSet, AccessError> {
        let out = self
            .client
            .list_tags_for_resource()
            .resource_arn(resource_id)
            .send()
            .await
            .map_err(access_error)?;
        Ok(out
            .tags()
            .iter()
            .map(|t| (opt_text(t.key()), opt_text(t.value())))
            .collect())
    }
}

pub struct SnsCollector {
    client: sns::Client,
    tags: Arc<SnsTags>,
    shared: SharedAdapters,
}

impl SnsCollector {
    pub fn new(ctx: &AwsContext, shared: &SharedAdapters) -> Self {
        let client = sns::Client::new(ctx.config());
        Self {
            tags: Arc::new(SnsTags { client: client.clone() }),
            client,
            shared: shared.clone(),
        }
    }

    async fn subscriptions(&self, arn: &str) -> Result<Vec<String>, AccessError> {
        let mut subs = Vec::new();
        let mut paginator = self
            .client
            .list_subscriptions_by_topic()
            .topic_arn(arn)
            .into_paginator()
            .send();
        while let Some(page) = paginator.next().await.transpose().map_err(access_error)? {
            for s in page.subscriptions() {
                subs.push(format!(
                    "{}:{}",
                    s.protocol().unwrap_or_default(),
                    s.endpoint().unwrap_or_default()
                ));
            }
        }
        Ok(subs)
    }

    async fn describe(&self, arn: &str) -> Result<StaticFields, AccessError> {
        let attrs_res = self
            .client
            .get_topic_attributes()
            .topic_arn(arn)
            .send()
            .await
            .map_err(access_error)?;
        let attrs = attrs_res.attributes().cloned().unwrap_or_default();
        let subs = self.subscriptions(arn).await?;

        let attr = |key: &str, default: &str| json!(attrs.get(key).map(String::as_str).unwrap_or(default));

        let mut fields = StaticFields::new();
        fields.insert("DisplayName".into(), attr("DisplayName", ""));
        fields.insert("Owner".into(), attr("Owner", ""));
        fields.insert("SubscriptionsCount".into(), json!(subs.len()));
        fields.insert("Subscriptions".into(), json!(subs.join(", ")));
        fields.insert("KmsMasterKeyId".into(), attr("KmsMasterKeyId", "None"));
        fields.insert("FifoTopic".into(), json!(attr_flag(&attrs, "FifoTopic")));
        fields.insert(
            "ContentBasedDeduplication".into(),
            json!(attr_flag(&attrs, "ContentBasedDeduplication")),
        );
        Ok(fields)
    }
}

#[async_trait]
impl Collector for SnsCollector {
    fn name(&self) -> &'static str {
        "sns"
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Topic
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
        let mut out: Vec<Discovered> = Vec::new();

        let mut paginator = self.client.list_topics().into_paginator().send();
        while let Some(page) = paginator.next().await.transpose()? {
            for t in page.topics() {
                let Some(arn) = t.topic_arn() else { continue };
                let name = name_from_arn(arn);
                let descriptor = ResourceDescriptor::new(ResourceKind::Topic, arn, name).with_alternate(name);

                let item = match self.describe(arn).await {
                    Ok(fields) => Discovered::new(descriptor, fields),
                    Err(e) => {
                        tracing::error!(topic = arn, error = %e, "Topic details unavailable");
                        Discovered::failed(descriptor, e.to_string())
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

    #[test]
    fn test_name_from_arn() {
        assert_eq!(name_from_arn("arn:aws:sns:us-east-1:123456789012:orders-events-prod"), "orders-events-prod");
        assert_eq!(name_from_arn("plain"), "plain");
    }

    #[test]
    fn test_attr_flag() {
        let mut attrs = HashMap::new();
        attrs.insert("FifoTopic".to_string(), "True".to_string());
        attrs.insert("ContentBasedDeduplication".to_string(), "false".to_string());
        assert!(attr_flag(&attrs, "FifoTopic"));
        assert!(!attr_flag(&attrs, "ContentBasedDeduplication"));
        assert!(!attr_flag(&attrs, "Missing"));
    }

    #[test]
    fn test_total_and_daily_share_query() {
        let d = ResourceDescriptor::new(ResourceKind::Topic, "arn", "orders");
        assert_eq!(METRICS[0].query(topic_name(&d)), METRICS[1].query(topic_name(&d)));
        assert!(METRICS[1].per_day && !METRICS[0].per_day);
    }
}
