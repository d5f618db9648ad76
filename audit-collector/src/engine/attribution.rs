//! Stack attribution
//!
//! Strategies run in [`Strategy::CHAIN`] order and the first hit wins:
//!
//! 1. the resource's own stack tag,
//! 2. a registry lookup of every candidate physical id (primary id first),
//! 3. the display name minus its last `-` segment, if such a stack exists.
//!
//! Resolution never fails. A resource no strategy can place is unmanaged.

use serde::Serialize;

use crate::collector_core::{ResourceDescriptor, StackRegistry, TagFetcher};
use crate::error::AccessError;

pub const DEFAULT_STACK_TAG_KEYS: [&str; 4] = [
    "aws:cloudformation:stack-name",
    "deployment-stack-name",
    "cloudformation:stack-name",
    "stack-name",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    Tag,
    PhysicalId,
    NamingConvention,
}

impl Strategy {
    pub const CHAIN: [Strategy; 3] = [
        Strategy::Tag,
        Strategy::PhysicalId,
        Strategy::NamingConvention,
    ];

    pub fn index(&self) -> u8 {
        match self {
            Strategy::Tag => 1,
            Strategy::PhysicalId => 2,
            Strategy::NamingConvention => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Tag => "tag",
            Strategy::PhysicalId => "physical-id",
            Strategy::NamingConvention => "naming-convention",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributionResult {
    stack_name: String,
    strategy: Option<Strategy>,
}

impl AttributionResult {
    pub fn managed(stack_name: impl Into<String>, strategy: Strategy) -> Self {
        let stack_name = stack_name.into();
        if stack_name.is_empty() {
            return Self::unmanaged();
        }
        Self {
            stack_name,
            strategy: Some(strategy),
        }
    }

    pub fn unmanaged() -> Self {
        Self {
            stack_name: String::new(),
            strategy: None,
        }
    }

    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    pub fn strategy(&self) -> Option<Strategy> {
        self.strategy
    }

    pub fn strategy_index(&self) -> Option<u8> {
        self.strategy.map(|s| s.index())
    }

    pub fn is_managed(&self) -> bool {
        self.strategy.is_some()
    }
}

enum Outcome {
    Hit(String),
    Miss,
    /// Stop the chain; the resource is reported unmanaged.
    Abort(AccessError),
}

#[derive(Debug, Clone)]
pub struct AttributionResolver {
    stack_tag_keys: Vec<String>,
}

impl Default for AttributionResolver {
    fn default() -> Self {
        Self::new(DEFAULT_STACK_TAG_KEYS.iter().map(|k| k.to_string()).collect())
    }
}

impl AttributionResolver {
    pub fn new(stack_tag_keys: Vec<String>) -> Self {
        Self { stack_tag_keys }
    }

    pub async fn resolve(
        &self,
        descriptor: &ResourceDescriptor,
        tags: &dyn TagFetcher,
        registry: &dyn StackRegistry,
    ) -> AttributionResult {
        for strategy in Strategy::CHAIN {
            let outcome = match strategy {
                Strategy::Tag => self.from_tag(descriptor, tags).await,
                Strategy::PhysicalId => self.from_physical_ids(descriptor, registry).await,
                Strategy::NamingConvention => self.from_naming(descriptor, registry).await,
            };
            match outcome {
                Outcome::Hit(stack) => {
                    tracing::debug!(
                        resource = %descriptor.id,
                        stack = %stack,
                        strategy = strategy.as_str(),
                        "Resolved owning stack"
                    );
                    return AttributionResult::managed(stack, strategy);
                }
                Outcome::Miss => continue,
                Outcome::Abort(e) => {
                    tracing::warn!(
                        resource = %descriptor.id,
                        strategy = strategy.as_str(),
                        error = %e,
                        "Stack lookup aborted, reporting resource as unmanaged"
                    );
                    return AttributionResult::unmanaged();
                }
            }
        }
        AttributionResult::unmanaged()
    }

    async fn from_tag(&self, descriptor: &ResourceDescriptor, tags: &dyn TagFetcher) -> Outcome {
        let tags = match tags.fetch_tags(&descriptor.id).await {
            Ok(t) => t,
            Err(e) => {
                tracing::debug!(resource = %descriptor.id, error = %e, "Tag lookup unavailable");
                return Outcome::Miss;
            }
        };
        self.stack_tag_keys
            .iter()
            .filter_map(|key| tags.get(key))
            .map(|value| value.trim())
            .find(|value| !value.is_empty())
            .map(|value| Outcome::Hit(value.to_string()))
            .unwrap_or(Outcome::Miss)
    }

    async fn from_physical_ids(
        &self,
        descriptor: &ResourceDescriptor,
        registry: &dyn StackRegistry,
    ) -> Outcome {
        for candidate in descriptor.candidate_ids() {
            match registry.stack_for_physical_id(candidate).await {
                Ok(Some(stack)) if !stack.is_empty() => return Outcome::Hit(stack),
                Ok(_) => continue,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Outcome::Abort(e),
            }
        }
        Outcome::Miss
    }

    async fn from_naming(&self, descriptor: &ResourceDescriptor, registry: &dyn StackRegistry) -> Outcome {
        let Some(candidate) = naming_candidate(&descriptor.name) else {
            return Outcome::Miss;
        };
        match registry.stack_exists(candidate).await {
            Ok(true) => Outcome::Hit(candidate.to_string()),
            Ok(false) => Outcome::Miss,
            Err(e) => {
                tracing::debug!(candidate, error = %e, "Naming-convention lookup failed");
                Outcome::Miss
            }
        }
    }
}

/// Display name without its trailing environment segment: `orders-api-prod` -> `orders-api`.
fn naming_candidate(name: &str) -> Option<&str> {
    name.rsplit_once('-')
        .map(|(head, _)| head)
        .filter(|head| !head.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector_core::ResourceKind;
    use crate::mock::MockProvider;

    fn queue() -> ResourceDescriptor {
        ResourceDescriptor::new(
            ResourceKind::Queue,
            "https://sqs.us-east-1.amazonaws.com/123456789012/orders-prod",
            "orders-prod",
        )
        .with_alternate("orders-prod")
        .with_alternate("arn:aws:sqs:us-east-1:123456789012:orders-prod")
    }

    async fn resolve(provider: &MockProvider, d: &ResourceDescriptor) -> AttributionResult {
        AttributionResolver::default().resolve(d, provider, provider).await
    }

    #[tokio::test]
    async fn test_tag_hit_short_circuits_registry() {
        let d = queue();
        let provider = MockProvider::default()
            .with_tags(&d.id, &[("aws:cloudformation:stack-name", "orders-stack")])
            .with_physical(&d.id, "other-stack")
            .with_stack("orders");

        let result = resolve(&provider, &d).await;

        assert_eq!(result, AttributionResult::managed("orders-stack", Strategy::Tag));
        assert_eq!(result.strategy_index(), Some(1));
        assert_eq!(provider.tag_calls(), 1);
        assert_eq!(provider.physical_calls(), 0);
        assert_eq!(provider.stack_calls(), 0);
    }

    #[tokio::test]
    async fn test_deployment_stack_tag_resolves_by_default() {
        let d = queue();
        let provider = MockProvider::default()
            .with_tags(&d.id, &[("deployment-stack-name", "orders-stack")]);

        let result = resolve(&provider, &d).await;

        assert_eq!(result, AttributionResult::managed("orders-stack", Strategy::Tag));
        assert_eq!(result.strategy_index(), Some(1));
        assert_eq!(provider.physical_calls(), 0);
    }

    #[tokio::test]
    async fn test_custom_stack_tag_key() {
        let d = queue();
        let provider = MockProvider::default()
            .with_tags(&d.id, &[("owner-stack", "orders-stack")]);
        let resolver = AttributionResolver::new(vec!["owner-stack".to_string()]);

        let result = resolver.resolve(&d, &provider, &provider).await;

        assert_eq!(result.stack_name(), "orders-stack");
        assert_eq!(result.strategy(), Some(Strategy::Tag));
    }

    #[tokio::test]
    async fn test_tag_failure_falls_through_to_physical_id() {
        let d = queue();
        let provider = MockProvider::default()
            .with_tag_failure(&d.id)
            .with_physical("orders-prod", "orders-stack")
            .with_stack("orders");

        let result = resolve(&provider, &d).await;

        assert_eq!(result.stack_name(), "orders-stack");
        assert_eq!(result.strategy_index(), Some(2));
        // url misses, name hits, arn never tried
        assert_eq!(provider.physical_calls(), 2);
        assert_eq!(provider.stack_calls(), 0);
    }

    #[tokio::test]
    async fn test_not_found_candidate_does_not_abort() {
        let d = queue();
        let provider = MockProvider::default()
            .with_physical_error(&d.id, AccessError::NotFound("Stack for url does not exist".into()))
            .with_physical("arn:aws:sqs:us-east-1:123456789012:orders-prod", "orders-stack");

        let result = resolve(&provider, &d).await;

        assert_eq!(result, AttributionResult::managed("orders-stack", Strategy::PhysicalId));
        assert_eq!(provider.physical_calls(), 3);
    }

    #[tokio::test]
    async fn test_transport_error_aborts_chain() {
        let d = queue();
        let provider = MockProvider::default()
            .with_physical_error(&d.id, AccessError::Transport("connection reset".into()))
            .with_physical("orders-prod", "orders-stack")
            .with_stack("orders");

        let result = resolve(&provider, &d).await;

        assert_eq!(result, AttributionResult::unmanaged());
        assert_eq!(result.strategy_index(), None);
        assert_eq!(provider.physical_calls(), 1);
        assert_eq!(provider.stack_calls(), 0);
    }

    #[tokio::test]
    async fn test_naming_convention_fallback() {
        let d = queue();
        let provider = MockProvider::default().with_stack("orders");

        let result = resolve(&provider, &d).await;

        assert_eq!(result, AttributionResult::managed("orders", Strategy::NamingConvention));
        assert_eq!(result.strategy_index(), Some(3));
    }

    #[tokio::test]
    async fn test_all_strategies_miss_is_unmanaged() {
        let d = ResourceDescriptor::new(ResourceKind::Bucket, "logs", "logs");
        let provider = MockProvider::default();

        let result = resolve(&provider, &d).await;

        assert!(!result.is_managed());
        assert_eq!(result.stack_name(), "");
        assert_eq!(provider.physical_calls(), 1);
        // no hyphen, no naming candidate
        assert_eq!(provider.stack_calls(), 0);
    }

    #[test]
    fn test_empty_name_is_unmanaged() {
        let result = AttributionResult::managed("", Strategy::Tag);
        assert_eq!(result, AttributionResult::unmanaged());
    }

    #[test]
    fn test_naming_candidate() {
        assert_eq!(naming_candidate("orders-api-prod"), Some("orders-api"));
        assert_eq!(naming_candidate("orders"), None);
        assert_eq!(naming_candidate("-prod"), None);
    }
}
