//! In-memory provider and collectors for `--mock` runs and tests
//!
//! [`MockProvider`] answers every capability trait from scripted maps and counts
//! the calls it receives. Anything not scripted behaves like an empty account:
//! no tags, no owning stack, no datapoints, no sub-resources.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;

use crate::collector_core::{
    Capabilities, Collector, Discovered, MetricSource, ResourceDescriptor, ResourceKind,
    StackRegistry, StaticFields, SubresourceDiscovery, TagFetcher, TagSet,
};
use crate::collectors;
use crate::engine::metrics::{MetricQuery, MetricSpec, MetricWindow};
use crate::error::AccessError;

#[derive(Default)]
pub struct MockProvider {
    tags: HashMap<String, Result<TagSet, AccessError>>,
    physical: HashMap<String, Result<Option<String>, AccessError>>,
    stacks: HashSet<String>,
    datapoints: HashMap<String, Result<Vec<f64>, AccessError>>,
    subresources: HashMap<String, Result<Vec<String>, AccessError>>,
    tag_calls: AtomicUsize,
    physical_calls: AtomicUsize,
    stack_calls: AtomicUsize,
    metric_calls: AtomicUsize,
    discovery_calls: AtomicUsize,
}

fn transport(what: &str) -> AccessError {
    AccessError::Transport(format!("mock failure: {what}"))
}

impl MockProvider {
    pub fn with_tags(mut self, resource_id: &str, tags: &[(&str, &str)]) -> Self {
        let set = tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.tags.insert(resource_id.to_string(), Ok(set));
        self
    }

    pub fn with_tag_failure(mut self, resource_id: &str) -> Self {
        self.tags
            .insert(resource_id.to_string(), Err(transport(resource_id)));
        self
    }

    pub fn with_physical(mut self, physical_id: &str, stack: &str) -> Self {
        self.physical
            .insert(physical_id.to_string(), Ok(Some(stack.to_string())));
        self
    }

    pub fn with_physical_error(mut self, physical_id: &str, err: AccessError) -> Self {
        self.physical.insert(physical_id.to_string(), Err(err));
        self
    }

    pub fn with_stack(mut self, stack: &str) -> Self {
        self.stacks.insert(stack.to_string());
        self
    }

    /// `key` is [`MetricQuery::key`] of the query to answer.
    pub fn with_datapoints(mut self, key: &str, buckets: &[f64]) -> Self {
        self.datapoints.insert(key.to_string(), Ok(buckets.to_vec()));
        self
    }

    pub fn with_metric_failure(mut self, key: &str) -> Self {
        self.datapoints.insert(key.to_string(), Err(transport(key)));
        self
    }

    pub fn with_subresources(mut self, parent_id: &str, subs: &[&str]) -> Self {
        self.subresources.insert(
            parent_id.to_string(),
            Ok(subs.iter().map(|s| s.to_string()).collect()),
        );
        self
    }

    pub fn with_discovery_failure(mut self, parent_id: &str) -> Self {
        self.subresources
            .insert(parent_id.to_string(), Err(transport(parent_id)));
        self
    }

    pub fn tag_calls(&self) -> usize {
        self.tag_calls.load(Ordering::SeqCst)
    }

    pub fn physical_calls(&self) -> usize {
        self.physical_calls.load(Ordering::SeqCst)
    }

    pub fn stack_calls(&self) -> usize {
        self.stack_calls.load(Ordering::SeqCst)
    }

    pub fn metric_calls(&self) -> usize {
        self.metric_calls.load(Ordering::SeqCst)
    }

    pub fn discovery_calls(&self) -> usize {
        self.discovery_calls.load(Ordering::SeqCst)
    }

    pub fn capabilities(self: &Arc<Self>) -> Capabilities {
        Capabilities {
            tags: self.clone(),
            registry: self.clone(),
            metrics: self.clone(),
            subresources: Some(self.clone()),
        }
    }
}

#[async_trait]
impl TagFetcher for MockProvider {
    async fn fetch_tags(&self, resource_id: &str) -> Result<TagSet, AccessError> {
        self.tag_calls.fetch_add(1, Ordering::SeqCst);
        self.tags
            .get(resource_id)
            .cloned()
            .unwrap_or_else(|| Ok(TagSet::new()))
    }
}

#[async_trait]
impl StackRegistry for MockProvider {
    async fn stack_for_physical_id(
        &self,
        physical_id: &str,
    ) -> Result<Option<String>, AccessError> {
        self.physical_calls.fetch_add(1, Ordering::SeqCst);
        self.physical.get(physical_id).cloned().unwrap_or(Ok(None))
    }

    async fn stack_exists(&self, stack_name: &str) -> Result<bool, AccessError> {
        self.stack_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.stacks.contains(stack_name))
    }
}

#[async_trait]
impl MetricSource for MockProvider {
    async fn datapoints(
        &self,
        query: &MetricQuery,
        _window: &MetricWindow,
    ) -> Result<Vec<f64>, AccessError> {
        self.metric_calls.fetch_add(1, Ordering::SeqCst);
        self.datapoints
            .get(&query.key())
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[async_trait]
impl SubresourceDiscovery for MockProvider {
    async fn discover(&self, parent_id: &str) -> Result<Vec<String>, AccessError> {
        self.discovery_calls.fetch_add(1, Ordering::SeqCst);
        self.subresources
            .get(parent_id)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Collector that lists fixed items against a [`MockProvider`].
pub struct MockCollector {
    name: &'static str,
    kind: ResourceKind,
    metrics: &'static [MetricSpec],
    items: Vec<Discovered>,
    provider: Arc<MockProvider>,
    fail_listing: bool,
}

impl MockCollector {
    pub fn new(
        name: &'static str,
        kind: ResourceKind,
        metrics: &'static [MetricSpec],
        provider: Arc<MockProvider>,
    ) -> Self {
        Self {
            name,
            kind,
            metrics,
            items: Vec::new(),
            provider,
            fail_listing: false,
        }
    }

    pub fn with_item(mut self, item: Discovered) -> Self {
        self.items.push(item);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_listing = true;
        self
    }
}

#[async_trait]
impl Collector for MockCollector {
    fn name(&self) -> &'static str {
        self.name
    }

    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn metrics(&self) -> &'static [MetricSpec] {
        self.metrics
    }

    fn capabilities(&self) -> Capabilities {
        self.provider.capabilities()
    }

    async fn discover(&self) -> Result<Vec<Discovered>> {
        if self.fail_listing {
            return Err(anyhow!("{} listing failed (mock)", self.name));
        }
        Ok(self.items.clone())
    }
}

fn fields(pairs: &[(&str, serde_json::Value)]) -> StaticFields {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Demo account used by `--mock`: a bucket, a queue and a REST API with two stages.
pub fn demo_collectors() -> Vec<Arc<dyn Collector>> {
    let api_arn = "arn:aws:apigateway:ap-northeast-2::/restapis/a1b2c3";
    let queue_url = "https://sqs.ap-northeast-2.amazonaws.com/123456789012/demo-queue-dev";

    let provider = Arc::new(
        MockProvider::default()
            .with_tags(
                "demo-bucket-prod",
                &[("aws:cloudformation:stack-name", "demo-storage"), ("team", "data")],
            )
            .with_tags(queue_url, &[("env", "dev")])
            .with_physical(queue_url, "demo-messaging")
            .with_stack("demo-api")
            .with_subresources(api_arn, &["v1", "v2"])
            .with_datapoints("Count|ApiName=demo-api-staging,Stage=v1", &[120.0, 80.0])
            .with_datapoints("Count|ApiName=demo-api-staging,Stage=v2", &[42.0])
            .with_datapoints(
                "BucketSizeBytes|BucketName=demo-bucket-prod,StorageType=StandardStorage",
                &[1_048_576.0, 2_097_152.0],
            )
            .with_datapoints("NumberOfMessagesReceived|QueueName=demo-queue-dev", &[3.0, 4.0, 5.0]),
    );

    let created = Utc.with_ymd_and_hms(2025, 9, 29, 12, 0, 0).single();

    let bucket = MockCollector::new("s3", ResourceKind::Bucket, collectors::s3::METRICS, provider.clone())
        .with_item(Discovered::new(
            ResourceDescriptor::new(ResourceKind::Bucket, "demo-bucket-prod", "demo-bucket-prod")
                .with_alternate("arn:aws:s3:::demo-bucket-prod")
                .with_created_at(created),
            fields(&[
                ("Region", json!("ap-northeast-2")),
                ("Versioning", json!("Enabled")),
                ("Encryption", json!("aws:kms")),
                ("PublicAccessBlocked", json!(true)),
            ]),
        ));

    let queue = MockCollector::new("sqs", ResourceKind::Queue, collectors::sqs::METRICS, provider.clone())
        .with_item(Discovered::new(
            ResourceDescriptor::new(ResourceKind::Queue, queue_url, "demo-queue-dev")
                .with_alternate("demo-queue-dev")
                .with_alternate("arn:aws:sqs:ap-northeast-2:123456789012:demo-queue-dev"),
            fields(&[
                ("Region", json!("ap-northeast-2")),
                ("FifoQueue", json!(false)),
                ("VisibilityTimeout", json!("30 seconds")),
            ]),
        ));

    let api = MockCollector::new(
        "apigateway",
        ResourceKind::GatewayApi,
        collectors::apigateway::METRICS,
        provider,
    )
    .with_item(Discovered::new(
        ResourceDescriptor::new(ResourceKind::GatewayApi, api_arn, "demo-api-staging")
            .with_alternate("a1b2c3")
            .with_created_at(created),
        fields(&[
            ("Type", json!("REST")),
            ("Stages", json!("v1,v2")),
            ("ResourceCount", json!(7)),
        ]),
    ));

    vec![Arc::new(bucket), Arc::new(queue), Arc::new(api)]
}
