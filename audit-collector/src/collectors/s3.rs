use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::types::ServerSideEncryption;
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

fn standard_storage(d: &ResourceDescriptor) -> Vec<Dimension> {
    vec![
        Dimension::new("BucketName", d.name.clone()),
        Dimension::new("StorageType", "StandardStorage"),
    ]
}

fn all_storage_types(d: &ResourceDescriptor) -> Vec<Dimension> {
    vec![
        Dimension::new("BucketName", d.name.clone()),
        Dimension::new("StorageType", "AllStorageTypes"),
    ]
}

// request metrics only exist for buckets with an EntireBucket metrics filter
fn entire_bucket(d: &ResourceDescriptor) -> Vec<Dimension> {
    vec![
        Dimension::new("BucketName", d.name.clone()),
        Dimension::new("FilterId", "EntireBucket"),
    ]
}

const fn request_metric(name: &'static str, unit: &'static str) -> MetricSpec {
    MetricSpec {
        column: name,
        namespace: "AWS/S3",
        metric_name: name,
        unit: Some(unit),
        statistic: Statistic::Sum,
        period: BucketPeriod::Daily,
        window_days: None,
        per_day: false,
        scope: MetricScope::Resource(entire_bucket),
    }
}

pub const METRICS: &[MetricSpec] = &[
    MetricSpec {
        column: "BucketSizeBytes",
        namespace: "AWS/S3",
        metric_name: "BucketSizeBytes",
        unit: Some("Bytes"),
        statistic: Statistic::Max,
        period: BucketPeriod::Daily,
        window_days: None,
        per_day: false,
        scope: MetricScope::Resource(standard_storage),
    },
    MetricSpec {
        column: "NumberOfObjects",
        namespace: "AWS/S3",
        metric_name: "NumberOfObjects",
        unit: Some("Count"),
        statistic: Statistic::Max,
        period: BucketPeriod::Daily,
        window_days: None,
        per_day: false,
        scope: MetricScope::Resource(all_storage_types),
    },
    request_metric("AllRequests", "Count"),
    request_metric("GetRequests", "Count"),
    request_metric("PutRequests", "Count"),
    request_metric("DeleteRequests", "Count"),
    request_metric("HeadRequests", "Count"),
    request_metric("PostRequests", "Count"),
    request_metric("ListRequests", "Count"),
    request_metric("4xxErrors", "Count"),
    request_metric("5xxErrors", "Count"),
    request_metric("BytesDownloaded", "Bytes"),
    request_metric("BytesUploaded", "Bytes"),
];

/// AWS service log buckets; reading them usually needs permissions the auditor lacks.
fn is_service_log_bucket(name: &str) -> bool {
    name.starts_with("aws-") && (name.contains("logs") || name.contains("logging"))
}

struct S3Tags {
    client: s3::Client,
}

#[async_trait]
impl TagFetcher for S3Tags {
    async fn fetch_tags(&self, resource_id: &str) -> Result<TagSet, AccessError> {
        match self.client.get_bucket_tagging().bucket(resource_id).send().await {
            Ok(out) => Ok(out
                .tag_set()
                .iter()
                .map(|t| (opt_text(t.key()), opt_text(t.value())))
                .collect()),
            // NoSuchTagSet: 태그 없는 버킷
            Err(e) => match access_error(e) {
                AccessError::NotFound(_) => Ok(TagSet::new()),
                other => Err(other),
            },
        }
    }
}

pub struct S3Collector {
    client: s3::Client,
    tags: Arc<S3Tags>,
    region: String,
    shared: SharedAdapters,
}

impl S3Collector {
    pub fn new(ctx: &AwsContext, shared: &SharedAdapters) -> Self {
        let client = s3::Client::new(ctx.config());
        Self {
            tags: Arc::new(S3Tags { client: client.clone() }),
            client,
            region: ctx.region().to_string(),
            shared: shared.clone(),
        }
    }

    async fn bucket_region(&self, name: &str) -> Result<String, AccessError> {
        let loc = self
            .client
            .get_bucket_location()
            .bucket(name)
            .send()
            .await
            .map_err(access_error)?;
        // us-east-1 은 빈 LocationConstraint
        Ok(loc
            .location_constraint()
            .map(|v| v.as_str().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "us-east-1".to_string()))
    }

    async fn versioning(&self, name: &str) -> String {
        match self.client.get_bucket_versioning().bucket(name).send().await {
            Ok(v) => v.status().map(|s| s.as_str()).unwrap_or("Disabled").to_string(),
            Err(e) => {
                tracing::debug!(bucket = name, error = %access_error(e), "GetBucketVersioning failed");
                "Error".to_string()
            }
        }
    }

    async fn encryption(&self, name: &str) -> String {
        match self.client.get_bucket_encryption().bucket(name).send().await {
            Ok(enc) => enc
                .server_side_encryption_configuration()
                .and_then(|cfg| cfg.rules().first())
                .and_then(|r| r.apply_server_side_encryption_by_default())
                .map(|app| sse_label(app.sse_algorithm()))
                .unwrap_or_else(|| "None".to_string()),
            Err(e) => match access_error(e) {
                AccessError::NotFound(_) => "None".to_string(),
                other => {
                    tracing::debug!(bucket = name, error = %other, "GetBucketEncryption failed");
                    "Unknown".to_string()
                }
            },
        }
    }

    async fn logging(&self, name: &str) -> &'static str {
        match self.client.get_bucket_logging().bucket(name).send().await {
            Ok(l) if l.logging_enabled().is_some() => "Enabled",
            Ok(_) => "Disabled",
            Err(e) => {
                tracing::debug!(bucket = name, error = %access_error(e), "GetBucketLogging failed");
                "Disabled"
            }
        }
    }

    async fn public_access_blocked(&self, name: &str) -> serde_json::Value {
        match self.client.get_public_access_block().bucket(name).send().await {
            Ok(pab) => match pab.public_access_block_configuration() {
                Some(cfg) => {
                    let acls = cfg.block_public_acls().unwrap_or(false);
                    let pol = cfg.block_public_policy().unwrap_or(false);
                    json!(acls && pol)
                }
                None => json!(false),
            },
            Err(e) => match access_error(e) {
                AccessError::NotFound(_) => json!(false),
                other => {
                    tracing::debug!(bucket = name, error = %other, "GetPublicAccessBlock failed");
                    json!("Unknown")
                }
            },
        }
    }
}

fn sse_label<'a>(v: impl Into<Option<&'a ServerSideEncryption>>) -> String {
    v.into().map(|s| s.as_str()).unwrap_or("None").to_string()
}

#[async_trait]
impl Collector for S3Collector {
    fn name(&self) -> &'static str {
        "s3"
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Bucket
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
        let resp = self.client.list_buckets().send().await.context("ListBuckets")?;

        let mut out: Vec<Discovered> = Vec::new();
        for b in resp.buckets() {
            let Some(name) = b.name() else { continue };
            if is_service_log_bucket(name) {
                tracing::debug!(bucket = name, "Skipping service log bucket");
                continue;
            }

            let descriptor = ResourceDescriptor::new(ResourceKind::Bucket, name, name)
                .with_alternate(format!("arn:aws:s3:::{name}"))
                .with_created_at(to_utc(b.creation_date()));

            let region = match self.bucket_region(name).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(bucket = name, error = %e, "GetBucketLocation failed");
                    out.push(Discovered::failed(descriptor, e.to_string()));
                    continue;
                }
            };
            // 리전 필터: 실행 리전만
            if region != self.region {
                continue;
            }

            let mut fields = StaticFields::new();
            fields.insert("Region".into(), json!(region));
            fields.insert("Versioning".into(), json!(self.versioning(name).await));
            fields.insert("Encryption".into(), json!(self.encryption(name).await));
            fields.insert("Logging".into(), json!(self.logging(name).await));
            fields.insert("PublicAccessBlocked".into(), self.public_access_blocked(name).await);
            out.push(Discovered::new(descriptor, fields));
        }

        Ok(out)
    }
}
