use async_trait::async_trait;

use super::TargetResolver;
use crate::error::{ChaosError, Result};
use crate::models::{EndpointSpec, FanOutKind, FanOutSpec, FaultSpec};

/// Fans out over the endpoints listed in the request.
///
/// An empty group is passed through so the parent fails on the empty
/// child list rather than at resolution.
#[derive(Debug, Default, Clone, Copy)]
pub struct EndpointGroupResolver;

#[async_trait]
impl TargetResolver for EndpointGroupResolver {
    type Target = EndpointSpec;

    fn flavor(&self) -> &'static str {
        "endpoint group"
    }

    async fn resolve_targets(&self, spec: &FanOutSpec) -> Result<Vec<EndpointSpec>> {
        match &spec.kind {
            FanOutKind::EndpointGroup { endpoints } => Ok(endpoints.clone()),
            other => Err(ChaosError::validation(format!(
                "endpoint group trigger cannot resolve {} targets",
                other.name()
            ))),
        }
    }

    fn target_key(&self, target: &EndpointSpec) -> String {
        target.name.clone()
    }

    fn derive_child_spec(&self, mut template: FaultSpec, target: &EndpointSpec) -> FaultSpec {
        template.endpoint_name = target.name.clone();
        template.endpoint = Some(target.clone());
        template
    }
}
