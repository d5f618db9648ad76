pub mod apigateway;
pub mod dynamodb;
pub mod lambda;
pub mod s3;
pub mod sns;
pub mod sqs;
pub mod stepfunctions;

use std::sync::Arc;

use crate::aws::{AwsContext, CloudFormationRegistry, CloudWatchMetrics};
use crate::collector_core::{Collector, MetricSource, StackRegistry};
use crate::error::AuditError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceKind {
    ApiGateway,
    DynamoDb,
    Lambda,
    S3,
    Sns,
    Sqs,
    StepFunctions,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 7] = [
        ServiceKind::ApiGateway,
        ServiceKind::DynamoDb,
        ServiceKind::Lambda,
        ServiceKind::S3,
        ServiceKind::Sns,
        ServiceKind::Sqs,
        ServiceKind::StepFunctions,
    ];

    /// Comma list of service names or `all`. Unknown names are rejected.
    pub fn parse_list(s: &str) -> Result<Vec<ServiceKind>, AuditError> {
        let mut out = Vec::new();
        for x in s.split(',').map(|x| x.trim().to_lowercase()).filter(|x| !x.is_empty()) {
            let kinds: &[ServiceKind] = match x.as_str() {
                "all" => &Self::ALL,
                "apigateway" | "api-gateway" | "apigw" => &[ServiceKind::ApiGateway],
                "dynamodb" | "ddb" => &[ServiceKind::DynamoDb],
                "lambda" => &[ServiceKind::Lambda],
                "s3" => &[ServiceKind::S3],
                "sns" => &[ServiceKind::Sns],
                "sqs" => &[ServiceKind::Sqs],
                "stepfunctions" | "step-functions" | "sfn" => &[ServiceKind::StepFunctions],
                other => {
                    return Err(AuditError::InvalidConfig(format!("unknown service '{other}'")));
                }
            };
            for k in kinds {
                if !out.contains(k) {
                    out.push(*k);
                }
            }
        }
        if out.is_empty() {
            return Err(AuditError::InvalidConfig("no services selected".into()));
        }
        Ok(out)
    }
}

/// Adapters every collector shares: one registry client, one metrics client.
#[derive(Clone)]
pub struct SharedAdapters {
    pub registry: Arc<dyn StackRegistry>,
    pub metrics: Arc<dyn MetricSource>,
}

impl SharedAdapters {
    pub fn new(ctx: &AwsContext) -> Self {
        Self {
            registry: Arc::new(CloudFormationRegistry::new(ctx)),
            metrics: Arc::new(CloudWatchMetrics::new(ctx)),
        }
    }
}

pub fn build_collectors(ctx: &AwsContext, services: &[ServiceKind]) -> Vec<Arc<dyn Collector>> {
    let shared = SharedAdapters::new(ctx);
    let mut v: Vec<Arc<dyn Collector>> = vec![];
    for svc in services {
        match svc {
            ServiceKind::ApiGateway => v.push(Arc::new(apigateway::ApiGatewayCollector::new(ctx, &shared))),
            ServiceKind::DynamoDb => v.push(Arc::new(dynamodb::DynamoDbCollector::new(ctx, &shared))),
            ServiceKind::Lambda => v.push(Arc::new(lambda::LambdaCollector::new(ctx, &shared))),
            ServiceKind::S3 => v.push(Arc::new(s3::S3Collector::new(ctx, &shared))),
            ServiceKind::Sns => v.push(Arc::new(sns::SnsCollector::new(ctx, &shared))),
            ServiceKind::Sqs => v.push(Arc::new(sqs::SqsCollector::new(ctx, &shared))),
            ServiceKind::StepFunctions => v.push(Arc::new(stepfunctions::StepFunctionsCollector::new(ctx, &shared))),
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_all() {
        assert_eq!(ServiceKind::parse_list("all").unwrap(), ServiceKind::ALL.to_vec());
    }

    #[test]
    fn test_parse_list_aliases_and_dedup() {
        let kinds = ServiceKind::parse_list(" S3, sqs ,s3,sfn").unwrap();
        assert_eq!(kinds, vec![ServiceKind::S3, ServiceKind::Sqs, ServiceKind::StepFunctions]);
    }

    #[test]
    fn test_parse_list_rejects_unknown() {
        let err = ServiceKind::parse_list("s3,ec2").unwrap_err();
        assert!(err.to_string().contains("ec2"));
        assert!(ServiceKind::parse_list(" , ").is_err());
    }
}
