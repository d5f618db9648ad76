use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_apigateway as apigw;
use aws_sdk_apigatewayv2 as apigwv2;
use serde_json::json;

use super::SharedAdapters;
use crate::aws::{access_error, to_utc, AwsContext};
use crate::collector_core::{
    Capabilities, Collector, Discovered, ResourceDescriptor, ResourceKind, StaticFields,
    SubresourceDiscovery, TagFetcher, TagSet,
};
use crate::engine::metrics::{BucketPeriod, Dimension, MetricScope, MetricSpec, Statistic};
use crate::error::AccessError;
use crate::utils::opt_text;

pub const METRICS: &[MetricSpec] = &[MetricSpec {
    column: "TotalRequests",
    namespace: "AWS/ApiGateway",
    metric_name: "Count",
    unit: Some("Count"),
    statistic: Statistic::Sum,
    period: BucketPeriod::Daily,
    window_days: None,
    per_day: false,
    scope: MetricScope::Subresources(stage_dimensions),
}];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApiRef<'a> {
    Rest(&'a str),
    Http(&'a str),
}

/// `arn:aws:apigateway:{region}::/restapis/{id}` or `.../apis/{id}`
fn parse_api_arn(arn: &str) -> Option<ApiRef<'_>> {
    let (_, path) = arn.split_once("::/")?;
    if let Some(id) = path.strip_prefix("restapis/") {
        return Some(ApiRef::Rest(id));
    }
    path.strip_prefix("apis/").map(ApiRef::Http)
}

fn rest_arn(region: &str, id: &str) -> String {
    format!("arn:aws:apigateway:{region}::/restapis/{id}")
}

fn http_arn(region: &str, id: &str) -> String {
    format!("arn:aws:apigateway:{region}::/apis/{id}")
}

// REST metrics are published per API name, HTTP metrics per API id
fn stage_dimensions(d: &ResourceDescriptor, stage: &str) -> Vec<Dimension> {
    match parse_api_arn(&d.id) {
        Some(ApiRef::Http(id)) => vec![Dimension::new("ApiId", id), Dimension::new("Stage", stage)],
        _ => vec![
            Dimension::new("ApiName", d.name.clone()),
            Dimension::new("Stage", stage),
        ],
    }
}

/// Tags and stages for both API flavours, dispatched on the ARN.
struct ApiGatewayAccess {
    rest: apigw::Client,
    http: apigwv2::Client,
}

impl ApiGatewayAccess {
    async fn stage_names(&self, api: ApiRef<'_>) -> Result<Vec<String>, AccessError> {
        match api {
            ApiRef::Rest(id) => {
                let out = self
                    .rest
                    .get_stages()
                    .rest_api_id(id)
                    .send()
                    .await
                    .map_err(access_error)?;
                Ok(out
                    .item()
                    .iter()
                    .filter_map(|s| s.stage_name())
                    .map(str::to_string)
                    .collect())
            }
            ApiRef::Http(id) => {
                let out = self
                    .http
                    .get_stages()
                    .api_id(id)
                    .send()
                    .await
                    .map_err(access_error)?;
                Ok(out
                    .items()
                    .iter()
                    .map(|s| opt_text(s.stage_name()))
                    .filter(|s| !s.is_empty())
                    .collect())
            }
        }
    }
}

#[async_trait]
impl TagFetcher for ApiGatewayAccess {
    async fn fetch_tags(&self, resource_id: &str) -> Result<TagSet, AccessError> {
        let tags = match parse_api_arn(resource_id) {
            Some(ApiRef::Rest(_)) => self
                .rest
                .get_tags()
                .resource_arn(resource_id)
                .send()
                .await
                .map_err(access_error)?
                .tags()
                .cloned()
                .unwrap_or_default(),
            Some(ApiRef::Http(_)) => self
                .http
                .get_tags()
                .resource_arn(resource_id)
                .send()
                .await
                .map_err(access_error)?
                .tags()
                .cloned()
                .unwrap_or_default(),
            None => return Err(AccessError::NotFound(format!("not an API Gateway ARN: {resource_id}"))),
        };
        Ok(tags.into_iter().collect())
    }
}

#[async_trait]
impl SubresourceDiscovery for ApiGatewayAccess {
    async fn discover(&self, parent_id: &str) -> Result<Vec<String>, AccessError> {
        let api = parse_api_arn(parent_id)
            .ok_or_else(|| AccessError::NotFound(format!("not an API Gateway ARN: {parent_id}")))?;
        self.stage_names(api).await
    }
}

pub struct ApiGatewayCollector {
    access: Arc<ApiGatewayAccess>,
    region: String,
    shared: SharedAdapters,
}

impl ApiGatewayCollector {
    pub fn new(ctx: &AwsContext, shared: &SharedAdapters) -> Self {
        Self {
            access: Arc::new(ApiGatewayAccess {
                rest: apigw::Client::new(ctx.config()),
                http: apigwv2::Client::new(ctx.config()),
            }),
            region: ctx.region().to_string(),
            shared: shared.clone(),
        }
    }

    async fn rest_apis(&self) -> Result<Vec<Discovered>> {
        let mut out = Vec::new();
        let mut position: Option<String> = None;
        loop {
            let page = self
                .access
                .rest
                .get_rest_apis()
                .set_position(position.take())
                .limit(500)
                .send()
                .await
                .context("GetRestApis")?;

            for api in page.items() {
                let Some(id) = api.id() else { continue };
                let name = api.name().unwrap_or(id);
                let descriptor = ResourceDescriptor::new(ResourceKind::GatewayApi, rest_arn(&self.region, id), name)
                    .with_alternate(id)
                    .with_created_at(to_utc(api.created_date()));

                // 상세 조회 실패해도 목록에는 남긴다
                let item = match self.rest_details(api, id).await {
                    Ok(fields) => Discovered::new(descriptor, fields),
                    Err(e) => {
                        tracing::error!(api = id, error = %e, "REST API details unavailable");
                        Discovered::failed(descriptor, e.to_string())
                    }
                };
                out.push(item);
            }

            position = page.position().map(str::to_string);
            if position.is_none() {
                break;
            }
        }
        Ok(out)
    }

    async fn rest_details(&self, api: &apigw::types::RestApi, id: &str) -> Result<StaticFields, AccessError> {
        let resources = self
            .access
            .rest
            .get_resources()
            .rest_api_id(id)
            .limit(500)
            .send()
            .await
            .map_err(access_error)?;
        let stages = self.access.stage_names(ApiRef::Rest(id)).await?;

        let endpoint_types: Vec<&str> = api
            .endpoint_configuration()
            .map(|c| c.types().iter().map(|t| t.as_str()).collect())
            .unwrap_or_default();
        let api_endpoint = match stages.first() {
            Some(stage) if !endpoint_types.is_empty() => {
                format!("https://{id}.execute-api.{}.amazonaws.com/{stage}", self.region)
            }
            _ => String::new(),
        };

        let mut fields = StaticFields::new();
        fields.insert("Type".into(), json!("REST"));
        fields.insert("Description".into(), json!(api.description().unwrap_or_default()));
        fields.insert("EndpointConfiguration".into(), json!(endpoint_types.join(",")));
        fields.insert(
            "ApiKeySource".into(),
            json!(api.api_key_source().map(|s| s.as_str()).unwrap_or("NONE")),
        );
        fields.insert("ResourceCount".into(), json!(resources.items().len()));
        fields.insert("Stages".into(), json!(stages_text(&stages)));
        fields.insert("ApiEndpoint".into(), json!(api_endpoint));
        Ok(fields)
    }

    async fn http_apis(&self) -> Result<Vec<Discovered>> {
        let mut out = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let page = self
                .access
                .http
                .get_apis()
                .set_next_token(next_token.take())
                .send()
                .await
                .context("GetApis")?;

            for api in page.items() {
                let Some(id) = api.api_id() else { continue };
                let mut name = opt_text(api.name());
                if name.is_empty() {
                    name = id.to_string();
                }
                let descriptor = ResourceDescriptor::new(ResourceKind::GatewayApi, http_arn(&self.region, id), name)
                    .with_alternate(id)
                    .with_created_at(to_utc(api.created_date()));

                let item = match self.http_details(api, id).await {
                    Ok(fields) => Discovered::new(descriptor, fields),
                    Err(e) => {
                        tracing::error!(api = id, error = %e, "HTTP API details unavailable");
                        Discovered::failed(descriptor, e.to_string())
                    }
                };
                out.push(item);
            }

            next_token = page.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }
        Ok(out)
    }

    async fn http_details(&self, api: &apigwv2::types::Api, id: &str) -> Result<StaticFields, AccessError> {
        let integrations = self
            .access
            .http
            .get_integrations()
            .api_id(id)
            .send()
            .await
            .map_err(access_error)?;
        let stages = self.access.stage_names(ApiRef::Http(id)).await?;

        let api_endpoint = match (api.api_endpoint(), stages.first()) {
            (Some(endpoint), _) if !endpoint.is_empty() => endpoint.to_string(),
            (_, Some(stage)) => format!("https://{id}.execute-api.{}.amazonaws.com/{stage}", self.region),
            _ => String::new(),
        };

        let mut fields = StaticFields::new();
        fields.insert("Type".into(), json!("HTTP"));
        fields.insert("Description".into(), json!(api.description().unwrap_or_default()));
        fields.insert("ProtocolType".into(), json!(protocol_label(api.protocol_type())));
        fields.insert("IntegrationCount".into(), json!(integrations.items().len()));
        fields.insert("Stages".into(), json!(stages_text(&stages)));
        fields.insert("ApiEndpoint".into(), json!(api_endpoint));
        Ok(fields)
    }
}

fn stages_text(stages: &[String]) -> String {
    if stages.is_empty() {
        "None".to_string()
    } else {
        stages.join(",")
    }
}

fn protocol_label<'a>(p: impl Into<Option<&'a apigwv2::types::ProtocolType>>) -> String {
    p.into().map(|p| p.as_str()).unwrap_or("HTTP").to_string()
}

#[async_trait]
impl Collector for ApiGatewayCollector {
    fn name(&self) -> &'static str {
        "apigateway"
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::GatewayApi
    }

    fn metrics(&self) -> &'static [MetricSpec] {
        METRICS
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            tags: self.access.clone(),
            registry: self.shared.registry.clone(),
            metrics: self.shared.metrics.clone(),
            subresources: Some(self.access.clone()),
        }
    }

    async fn discover(&self) -> Result<Vec<Discovered>> {
        let mut out = self.rest_apis().await?;
        // HTTP API 실패는 REST 결과를 버리지 않는다
        match self.http_apis().await {
            Ok(mut v) => out.append(&mut v),
            Err(e) if !out.is_empty() => {
                tracing::warn!(error = %e, "HTTP API listing failed, keeping REST APIs");
            }
            Err(e) => return Err(e),
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_api_arn() {
        assert_eq!(
            parse_api_arn("arn:aws:apigateway:us-east-1::/restapis/a1b2"),
            Some(ApiRef::Rest("a1b2"))
        );
        assert_eq!(
            parse_api_arn("arn:aws:apigateway:us-east-1::/apis/x9"),
            Some(ApiRef::Http("x9"))
        );
        assert_eq!(parse_api_arn("arn:aws:sqs:us-east-1:1:q"), None);
    }

    #[test]
    fn test_stage_dimensions_by_flavour() {
        let rest = ResourceDescriptor::new(ResourceKind::GatewayApi, rest_arn("eu-west-1", "a1"), "orders");
        assert_eq!(
            stage_dimensions(&rest, "v1"),
            vec![Dimension::new("ApiName", "orders"), Dimension::new("Stage", "v1")]
        );

        let http = ResourceDescriptor::new(ResourceKind::GatewayApi, http_arn("eu-west-1", "x9"), "orders");
        assert_eq!(
            stage_dimensions(&http, "$default"),
            vec![Dimension::new("ApiId", "x9"), Dimension::new("Stage", "$default")]
        );
    }

    #[test]
    fn test_stages_text() {
        assert_eq!(stages_text(&[]), "None");
        assert_eq!(stages_text(&["v1".into(), "v2".into()]), "v1,v2");
    }
}
