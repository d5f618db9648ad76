use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use aws_sdk_sfn as sfn;
use sfn::types::StateMachineType;
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

fn state_machine_arn(d: &ResourceDescriptor) -> Vec<Dimension> {
    vec![Dimension::new("StateMachineArn", d.id.clone())]
}

const fn executions(column: &'static str, metric_name: &'static str) -> MetricSpec {
    MetricSpec {
        column,
        namespace: "AWS/States",
        metric_name,
        unit: Some("Count"),
        statistic: Statistic::Sum,
        period: BucketPeriod::Hourly,
        window_days: None,
        per_day: false,
        scope: MetricScope::Resource(state_machine_arn),
    }
}

pub const METRICS: &[MetricSpec] = &[
    executions("ExecutionsStarted", "ExecutionsStarted"),
    executions("ExecutionsFailed", "ExecutionsFailed"),
    MetricSpec {
        column: "AvgExecutionTimeMs",
        namespace: "AWS/States",
        metric_name: "ExecutionTime",
        unit: Some("Milliseconds"),
        statistic: Statistic::Average,
        period: BucketPeriod::Hourly,
        window_days: None,
        per_day: false,
        scope: MetricScope::Resource(state_machine_arn),
    },
];

fn type_label<'a>(t: impl Into<Option<&'a StateMachineType>>) -> String {
    t.into().map(|t| t.as_str()).unwrap_or("STANDARD").to_string()
}

struct SfnTags {
    client: sfn::Client,
}

#[async_trait]
impl TagFetcher for SfnTags {
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

pub struct StepFunctionsCollector {
    client: sfn::Client,
    tags: Arc<SfnTags>,
    shared: SharedAdapters,
}

impl StepFunctionsCollector {
    pub fn new(ctx: &AwsContext, shared: &SharedAdapters) -> Self {
        let client = sfn::Client::new(ctx.config());
        Self {
            tags: Arc::new(SfnTags { client: client.clone() }),
            client,
            shared: shared.clone(),
        }
    }

    async fn describe(&self, arn: &str) -> Result<StaticFields, AccessError> {
        let details = self
            .client
            .describe_state_machine()
            .state_machine_arn(arn)
            .send()
            .await
            .map_err(access_error)?;

        let mut fields = StaticFields::new();
        fields.insert("Type".into(), json!(type_label(details.r#type())));
        fields.insert(
            "Status".into(),
            json!(details.status().map(|s| s.as_str()).unwrap_or("UNKNOWN")),
        );
        fields.insert("RoleArn".into(), json!(opt_text(details.role_arn())));
        fields.insert(
            "LoggingLevel".into(),
            json!(details
                .logging_configuration()
                .and_then(|l| l.level())
                .map(|l| l.as_str())
                .unwrap_or("OFF")),
        );
        Ok(fields)
    }
}

#[async_trait]
impl Collector for StepFunctionsCollector {
    fn name(&self) -> &'static str {
        "stepfunctions"
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Workflow
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
        let mut paginator = self.client.list_state_machines().into_paginator().send();
        while let Some(page) = paginator.next().await.transpose()? {
            for sm in page.state_machines() {
                let arn = opt_text(sm.state_machine_arn());
                let name = opt_text(sm.name());
                if arn.is_empty() {
                    continue;
                }
                let descriptor = ResourceDescriptor::new(ResourceKind::Workflow, arn.as_str(), name.as_str())
                    .with_alternate(name.as_str())
                    .with_created_at(to_utc(sm.creation_date()));

                let item = match self.describe(&arn).await {
                    Ok(fields) => Discovered::new(descriptor, fields),
                    Err(e) => {
                        tracing::error!(state_machine = %arn, error = %e, "DescribeStateMachine failed");
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
    fn test_metrics_keyed_by_arn() {
        let arn = "arn:aws:states:us-east-1:123456789012:stateMachine:orders-prod";
        let d = ResourceDescriptor::new(ResourceKind::Workflow, arn, "orders-prod");
        let q = METRICS[2].query(state_machine_arn(&d));
        assert_eq!(q.key(), format!("ExecutionTime|StateMachineArn={arn}"));
        assert_eq!(q.unit.as_deref(), Some("Milliseconds"));
        assert_eq!(METRICS[2].statistic, Statistic::Average);
    }

    #[test]
    fn test_type_label() {
        assert_eq!(type_label(&StateMachineType::Express), "EXPRESS");
        assert_eq!(type_label(None::<&StateMachineType>), "STANDARD");
    }
}
