//! AWS SDK wiring shared by the collectors

pub mod cloudformation;
pub mod cloudwatch;

use aws_config::BehaviorVersion;
use aws_sdk_cloudformation::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudformation::primitives::DateTime as SdkDateTime;
use aws_types::region::Region;
use aws_types::SdkConfig;
use chrono::{DateTime, Utc};

use crate::error::AccessError;

pub use cloudformation::CloudFormationRegistry;
pub use cloudwatch::CloudWatchMetrics;

const DEFAULT_REGION: &str = "us-east-1";

/// Loaded SDK configuration for the single account/region of a run.
#[derive(Clone, Debug)]
pub struct AwsContext {
    config: SdkConfig,
    region: String,
}

impl AwsContext {
    pub async fn load(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        let config = loader.load().await;
        let region = config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        tracing::debug!(region = %region, "AWS configuration loaded");
        Self { config, region }
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

/// Accepts both `&DateTime` and `Option<&DateTime>` members.
pub fn to_utc<'a>(ts: impl Into<Option<&'a SdkDateTime>>) -> Option<DateTime<Utc>> {
    ts.into()
        .and_then(|ts| DateTime::from_timestamp(ts.secs(), ts.subsec_nanos()))
}

/// Map any SDK call failure onto the per-call taxonomy.
pub fn access_error<E, R>(err: SdkError<E, R>) -> AccessError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    match err.as_service_error() {
        Some(service) => classify_code(
            service.code().unwrap_or("Unknown"),
            service.message().unwrap_or_default(),
        ),
        None => AccessError::Transport(DisplayErrorContext(&err).to_string()),
    }
}

/// Service error code (and message, for CloudFormation's generic ValidationError) to category.
pub fn classify_code(code: &str, message: &str) -> AccessError {
    let not_found = code.contains("NotFound")
        || code.starts_with("NoSuch")
        || (code == "ValidationError" && message.contains("does not exist"));
    if not_found {
        return AccessError::NotFound(message.to_string());
    }

    let denied = code.contains("AccessDenied")
        || code == "AuthorizationError"
        || code == "UnauthorizedOperation"
        || code == "UnrecognizedClientException";
    if denied {
        return AccessError::Denied(format!("{code}: {message}"));
    }

    AccessError::service(code, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloudformation_missing_stack_is_not_found() {
        let err = classify_code("ValidationError", "Stack for orders-prod does not exist");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_other_validation_error_is_service() {
        let err = classify_code("ValidationError", "1 validation error detected");
        assert_eq!(
            err,
            AccessError::service("ValidationError", "1 validation error detected")
        );
    }

    #[test]
    fn test_missing_resources_are_not_found() {
        assert!(classify_code("ResourceNotFoundException", "table gone").is_not_found());
        assert!(classify_code("NoSuchTagSet", "The TagSet does not exist").is_not_found());
        assert!(classify_code("NotFound", "").is_not_found());
    }

    #[test]
    fn test_denied_codes() {
        for code in ["AccessDenied", "AccessDeniedException", "AuthorizationError"] {
            assert!(matches!(classify_code(code, "nope"), AccessError::Denied(_)), "{code}");
        }
    }

    #[test]
    fn test_to_utc() {
        let ts = SdkDateTime::from_secs(1_700_000_000);
        assert_eq!(to_utc(&ts).map(|t| t.timestamp()), Some(1_700_000_000));
    }

    #[test]
    fn test_throttling_is_service_error() {
        assert!(matches!(
            classify_code("Throttling", "Rate exceeded"),
            AccessError::Service { .. }
        ));
    }
}
