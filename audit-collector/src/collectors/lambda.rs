use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use aws_sdk_lambda as lambda;
use serde_json::json;

use super::SharedAdapters;
use crate::aws::{access_error, AwsContext};
use crate::collector_core::{
    Capabilities, Collector, Discovered, ResourceDescriptor, ResourceKind, StaticFields,
    TagFetcher, TagSet,
};
use crate::engine::metrics::{BucketPeriod, Dimension, MetricScope, MetricSpec, Statistic};
use crate::error::AccessError;

const MAX_UPDATE_DATES: usize = 10;

fn function_name(d: &ResourceDescriptor) -> Vec<Dimension> {
    vec![Dimension::new("FunctionName", d.name.clone())]
}

const fn invocations(column: &'static str, days: u32) -> MetricSpec {
    MetricSpec {
        column,
        namespace: "AWS/Lambda",
        metric_name: "Invocations",
        unit: None,
        statistic: Statistic::Sum,
        period: BucketPeriod::WholeWindow,
        window_days: Some(days),
        per_day: false,
        scope: MetricScope::Resource(function_name),
    }
}

pub const METRICS: &[MetricSpec] = &[
    invocations("InvocationsLast30d", 30),
    invocations("InvocationsLast90d", 90),
    invocations("InvocationsLast365d", 365),
];

struct LambdaTags {
    client: lambda::Client,
}

#[async_trait]
impl TagFetcher for LambdaTags {
    async fn fetch_tags(&self, resource_id: &str) -> Result<TagSet, AccessError> {
        let out = self
            .client
            .list_tags()
            .resource(resource_id)
            .send()
            .await
            .map_err(access_error)?;
        Ok(out
            .tags()
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }
}

pub struct LambdaCollector {
    client: lambda::Client,
    tags: Arc<LambdaTags>,
    shared: SharedAdapters,
}

impl LambdaCollector {
    pub fn new(ctx: &AwsContext, shared: &SharedAdapters) -> Self {
        let client = lambda::Client::new(ctx.config());
        Self {
            tags: Arc::new(LambdaTags { client: client.clone() }),
            client,
            shared: shared.clone(),
        }
    }

    /// Newest first, at most [`MAX_UPDATE_DATES`].
    async fn update_dates(&self, name: &str) -> Result<Vec<String>, AccessError> {
        let mut dates = Vec::new();
        let mut paginator = self
            .client
            .list_versions_by_function()
            .function_name(name)
            .into_paginator()
            .send();
        while let Some(page) = paginator.next().await.transpose().map_err(access_error)? {
            dates.extend(
                page.versions()
                    .iter()
                    .filter_map(|v| v.last_modified())
                    .map(str::to_string),
            );
        }
        Ok(latest_dates(dates))
    }
}

// LastModified is ISO-8601 with a fixed offset, so lexical order is time order
fn latest_dates(mut dates: Vec<String>) -> Vec<String> {
    dates.sort_unstable_by(|a, b| b.cmp(a));
    dates.dedup();
    dates.truncate(MAX_UPDATE_DATES);
    dates
}

#[async_trait]
impl Collector for LambdaCollector {
    fn name(&self) -> &'static str {
        "lambda"
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Function
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
        let mut paginator = self.client.list_functions().into_paginator().send();
        while let Some(page) = paginator.next().await.transpose()? {
            for f in page.functions() {
                let (Some(name), Some(arn)) = (f.function_name(), f.function_arn()) else {
                    continue;
                };
                let descriptor = ResourceDescriptor::new(ResourceKind::Function, arn, name).with_alternate(name);

                let update_dates = match self.update_dates(name).await {
                    Ok(d) if !d.is_empty() => d.join("\n"),
                    Ok(_) => "N/A".to_string(),
                    Err(e) => {
                        tracing::warn!(function = name, error = %e, "Version history unavailable");
                        "N/A".to_string()
                    }
                };

                let mut fields = StaticFields::new();
                fields.insert(
                    "Runtime".into(),
                    json!(f.runtime().map(|r| r.as_str()).unwrap_or("N/A")),
                );
                fields.insert("LastModified".into(), json!(f.last_modified().unwrap_or("N/A")));
                fields.insert("MemorySize".into(), json!(f.memory_size()));
                fields.insert("Timeout".into(), json!(f.timeout()));
                fields.insert("UpdateDates".into(), json!(update_dates));
                out.push(Discovered::new(descriptor, fields));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_dates_newest_first_and_capped() {
        let dates: Vec<String> = (1..=12)
            .map(|d| format!("2025-01-{d:02}T00:00:00.000+0000"))
            .chain(std::iter::once("2025-01-12T00:00:00.000+0000".to_string()))
            .collect();
        let latest = latest_dates(dates);
        assert_eq!(latest.len(), MAX_UPDATE_DATES);
        assert_eq!(latest[0], "2025-01-12T00:00:00.000+0000");
        assert_eq!(latest[9], "2025-01-03T00:00:00.000+0000");
    }

    #[test]
    fn test_invocation_windows() {
        let days: Vec<Option<u32>> = METRICS.iter().map(|m| m.window_days).collect();
        assert_eq!(days, vec![Some(30), Some(90), Some(365)]);
        assert!(METRICS.iter().all(|m| m.period == BucketPeriod::WholeWindow));
    }
}
