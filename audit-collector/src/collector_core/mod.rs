use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::metrics::{MetricQuery, MetricSpec, MetricWindow};
use crate::error::AccessError;

/// Tag key -> value. Ordered so the rendered tag string is stable.
pub type TagSet = BTreeMap<String, String>;

/// Configuration already read by a collector, merged verbatim into the row.
pub type StaticFields = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    GatewayApi,
    Table,
    Function,
    Bucket,
    Topic,
    Queue,
    Workflow,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::GatewayApi,
        ResourceKind::Table,
        ResourceKind::Function,
        ResourceKind::Bucket,
        ResourceKind::Topic,
        ResourceKind::Queue,
        ResourceKind::Workflow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::GatewayApi => "gateway-api",
            ResourceKind::Table => "table",
            ResourceKind::Function => "function",
            ResourceKind::Bucket => "bucket",
            ResourceKind::Topic => "topic",
            ResourceKind::Queue => "queue",
            ResourceKind::Workflow => "workflow",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one listed resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub id: String,
    pub name: String,
    pub kind: ResourceKind,
    #[serde(default)]
    pub alternate_ids: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl ResourceDescriptor {
    pub fn new(kind: ResourceKind, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            alternate_ids: Vec::new(),
            created_at: None,
        }
    }

    pub fn with_alternate(mut self, id: impl Into<String>) -> Self {
        self.alternate_ids.push(id.into());
        self
    }

    pub fn with_created_at(mut self, created_at: Option<DateTime<Utc>>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Primary id followed by the alternates, empty and repeated ids dropped.
    pub fn candidate_ids(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::with_capacity(1 + self.alternate_ids.len());
        for id in std::iter::once(&self.id).chain(self.alternate_ids.iter()) {
            if !id.is_empty() && !out.contains(&id.as_str()) {
                out.push(id);
            }
        }
        out
    }
}

/// One inventory item as produced by a collector.
#[derive(Debug, Clone)]
pub struct Discovered {
    pub descriptor: ResourceDescriptor,
    pub static_fields: StaticFields,
    /// Set when the collector could list the resource but not read its configuration.
    pub detail_error: Option<String>,
}

impl Discovered {
    pub fn new(descriptor: ResourceDescriptor, static_fields: StaticFields) -> Self {
        Self {
            descriptor,
            static_fields,
            detail_error: None,
        }
    }

    pub fn failed(descriptor: ResourceDescriptor, error: impl Into<String>) -> Self {
        Self {
            descriptor,
            static_fields: StaticFields::new(),
            detail_error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait TagFetcher: Send + Sync {
    async fn fetch_tags(&self, resource_id: &str) -> Result<TagSet, AccessError>;
}

/// Deployment-unit registry (CloudFormation stacks).
#[async_trait]
pub trait StackRegistry: Send + Sync {
    /// Stack whose resources include `physical_id`. `Ok(None)` when no stack does.
    async fn stack_for_physical_id(&self, physical_id: &str)
        -> Result<Option<String>, AccessError>;

    async fn stack_exists(&self, stack_name: &str) -> Result<bool, AccessError>;
}

#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Statistic value of every bucket the provider returned for the window.
    async fn datapoints(
        &self,
        query: &MetricQuery,
        window: &MetricWindow,
    ) -> Result<Vec<f64>, AccessError>;
}

/// Lists sub-resources (e.g. deployment stages) of a parent resource.
#[async_trait]
pub trait SubresourceDiscovery: Send + Sync {
    async fn discover(&self, parent_id: &str) -> Result<Vec<String>, AccessError>;
}

/// Per resource kind capability table handed to the engine.
#[derive(Clone)]
pub struct Capabilities {
    pub tags: Arc<dyn TagFetcher>,
    pub registry: Arc<dyn StackRegistry>,
    pub metrics: Arc<dyn MetricSource>,
    pub subresources: Option<Arc<dyn SubresourceDiscovery>>,
}

// Collector interface
#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &'static str;
    fn kind(&self) -> ResourceKind;
    fn metrics(&self) -> &'static [MetricSpec];
    fn capabilities(&self) -> Capabilities;
    async fn discover(&self) -> Result<Vec<Discovered>>;
}
