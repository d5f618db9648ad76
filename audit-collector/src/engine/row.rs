//! Row builder
//!
//! One [`ReportRow`] per discovered resource. Building a row never fails; every
//! lookup that goes wrong degrades to a sentinel, an unmanaged attribution or
//! an error row.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};

use crate::collector_core::{Capabilities, Discovered, ResourceDescriptor, ResourceKind, TagFetcher, TagSet};
use crate::engine::attribution::{AttributionResolver, AttributionResult};
use crate::engine::environment::{classify, Environment};
use crate::engine::metrics::{AggregatedMetric, MetricScope, MetricSpec, MetricValue, WindowedAggregator};
use crate::error::AccessError;
use crate::utils::{format_timestamp, tag_string};

pub const ERROR_STACK_NAME: &str = "Error";
pub const ERROR_TAGS: &str = "Error retrieving tags";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    Complete,
    /// At least one metric or the tag lookup failed.
    Partial,
    /// The resource's own configuration could not be read.
    Error,
}

impl RowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowStatus::Complete => "complete",
            RowStatus::Partial => "partial",
            RowStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    kind: ResourceKind,
    status: RowStatus,
    #[serde(flatten)]
    fields: BTreeMap<String, Value>,
}

impl ReportRow {
    pub fn new(kind: ResourceKind, status: RowStatus, fields: BTreeMap<String, Value>) -> Self {
        Self { kind, status, fields }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn status(&self) -> RowStatus {
        self.status
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Cell as plain text; strings unquoted, missing and null as empty.
    pub fn text(&self, column: &str) -> String {
        match self.fields.get(column) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

/// Run-wide inputs shared by every row.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// End of every metric window; fixed once per run.
    pub now: DateTime<Utc>,
    pub window_days: u32,
    pub stack_tag_keys: Vec<String>,
}

/// Serves the tag set fetched for the row so attribution does not fetch it again.
struct PrefetchedTags<'a> {
    resource_id: &'a str,
    tags: &'a Result<TagSet, AccessError>,
}

#[async_trait]
impl TagFetcher for PrefetchedTags<'_> {
    async fn fetch_tags(&self, resource_id: &str) -> Result<TagSet, AccessError> {
        if resource_id != self.resource_id {
            return Ok(TagSet::new());
        }
        self.tags.clone()
    }
}

pub struct RowBuilder {
    capabilities: Capabilities,
    metrics: &'static [MetricSpec],
    settings: Arc<EngineSettings>,
    resolver: AttributionResolver,
    aggregator: WindowedAggregator,
}

impl RowBuilder {
    pub fn new(capabilities: Capabilities, metrics: &'static [MetricSpec], settings: Arc<EngineSettings>) -> Self {
        let resolver = AttributionResolver::new(settings.stack_tag_keys.clone());
        let aggregator = WindowedAggregator::new(capabilities.metrics.clone());
        Self {
            capabilities,
            metrics,
            settings,
            resolver,
            aggregator,
        }
    }

    pub async fn build_row(&self, item: &Discovered) -> ReportRow {
        let d = &item.descriptor;
        if let Some(err) = &item.detail_error {
            tracing::warn!(kind = %d.kind, resource = %d.id, error = %err, "Emitting error row");
            return self.error_row(d, err, &item.static_fields);
        }

        let tags = self.capabilities.tags.fetch_tags(&d.id).await;
        if let Err(e) = &tags {
            tracing::warn!(resource = %d.id, error = %e, "Tag lookup failed");
        }
        let prefetched = PrefetchedTags {
            resource_id: &d.id,
            tags: &tags,
        };

        let attribution = self
            .resolver
            .resolve(d, &prefetched, self.capabilities.registry.as_ref())
            .await;

        let empty = TagSet::new();
        let tag_set = tags.as_ref().unwrap_or(&empty);
        let environment = classify(&d.name, tag_set);

        let metrics = join_all(self.metrics.iter().map(|spec| self.evaluate(spec, d))).await;

        let metric_failed = metrics.iter().any(|m| m.value.is_failed());
        let status = if metric_failed || tags.is_err() {
            RowStatus::Partial
        } else {
            RowStatus::Complete
        };

        let mut fields = item.static_fields.clone();
        insert_identity(&mut fields, d, environment);
        insert_attribution(&mut fields, &attribution);
        fields.insert(
            "Tags".to_string(),
            match &tags {
                Ok(t) => json!(tag_string(t)),
                Err(_) => json!(ERROR_TAGS),
            },
        );
        for m in metrics {
            fields.insert(m.name, m.value.to_json());
        }

        tracing::debug!(
            kind = %d.kind,
            resource = %d.id,
            stack = attribution.stack_name(),
            environment = %environment,
            ?status,
            "Row built"
        );
        ReportRow::new(d.kind, status, fields)
    }

    async fn evaluate(&self, spec: &MetricSpec, d: &ResourceDescriptor) -> AggregatedMetric {
        let window = match spec.window(self.settings.now, self.settings.window_days) {
            Ok(w) => w,
            Err(e) => {
                tracing::warn!(metric = spec.column, error = %e, "Invalid metric window");
                return AggregatedMetric::new(spec.column, MetricValue::Failed);
            }
        };

        let value = match spec.scope {
            MetricScope::Resource(dimensions) => {
                self.aggregator.aggregate(&spec.query(dimensions(d)), &window).await
            }
            MetricScope::Subresources(dimensions) => match &self.capabilities.subresources {
                Some(discovery) => {
                    self.aggregator
                        .aggregate_over_subresources(
                            &d.id,
                            discovery.as_ref(),
                            |sub| spec.query(dimensions(d, sub)),
                            &window,
                        )
                        .await
                }
                None => {
                    tracing::warn!(metric = spec.column, kind = %d.kind, "No sub-resource discovery for kind");
                    MetricValue::Failed
                }
            },
        };

        let value = if spec.per_day {
            value.per_day(window.days())
        } else {
            value
        };
        AggregatedMetric::new(spec.column, value)
    }

    fn error_row(&self, d: &ResourceDescriptor, err: &str, static_fields: &BTreeMap<String, Value>) -> ReportRow {
        let mut fields = static_fields.clone();
        insert_identity(&mut fields, d, classify(&d.name, &TagSet::new()));
        fields.insert("StackName".to_string(), json!(ERROR_STACK_NAME));
        fields.insert("Attribution".to_string(), json!(""));
        fields.insert("Tags".to_string(), json!(ERROR_TAGS));
        fields.insert("Error".to_string(), json!(err));
        for spec in self.metrics {
            fields.insert(spec.column.to_string(), MetricValue::Failed.to_json());
        }
        ReportRow::new(d.kind, RowStatus::Error, fields)
    }
}

fn insert_identity(fields: &mut BTreeMap<String, Value>, d: &ResourceDescriptor, environment: Environment) {
    fields.insert("Name".to_string(), json!(d.name));
    fields.insert("Id".to_string(), json!(d.id));
    fields.insert("Environment".to_string(), json!(environment.as_str()));
    fields.insert(
        "CreatedDate".to_string(),
        json!(d.created_at.map(format_timestamp).unwrap_or_default()),
    );
}

fn insert_attribution(fields: &mut BTreeMap<String, Value>, attribution: &AttributionResult) {
    fields.insert("StackName".to_string(), json!(attribution.stack_name()));
    fields.insert(
        "Attribution".to_string(),
        json!(attribution.strategy().map(|s| s.as_str()).unwrap_or_default()),
    );
}
