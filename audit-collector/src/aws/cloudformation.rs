use async_trait::async_trait;
use aws_sdk_cloudformation as cfn;

use super::{access_error, AwsContext};
use crate::collector_core::StackRegistry;
use crate::error::AccessError;

pub struct CloudFormationRegistry {
    client: cfn::Client,
}

impl CloudFormationRegistry {
    pub fn new(ctx: &AwsContext) -> Self {
        Self {
            client: cfn::Client::new(ctx.config()),
        }
    }
}

#[async_trait]
impl StackRegistry for CloudFormationRegistry {
    async fn stack_for_physical_id(&self, physical_id: &str) -> Result<Option<String>, AccessError> {
        // "Stack for <id> does not exist" comes back as ValidationError -> NotFound
        let out = self
            .client
            .describe_stack_resources()
            .physical_resource_id(physical_id)
            .send()
            .await
            .map_err(access_error)?;

        Ok(out
            .stack_resources()
            .iter()
            .find_map(|r| r.stack_name())
            .filter(|name| !name.is_empty())
            .map(str::to_string))
    }

    async fn stack_exists(&self, stack_name: &str) -> Result<bool, AccessError> {
        match self.client.describe_stacks().stack_name(stack_name).send().await {
            Ok(out) => Ok(!out.stacks().is_empty()),
            Err(e) => match access_error(e) {
                AccessError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }
}
