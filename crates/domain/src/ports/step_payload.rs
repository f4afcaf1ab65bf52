use serde_json::Value;

use crate::task::StepDefinition;
use crate::DomainResult;

/// Capability interface for step-type-specific payload shape checks.
///
/// The engine treats step payloads as opaque blobs; beyond the required/empty
/// rule it never inspects them. Whatever shape a form, link or report payload
/// must have is the concern of the validator plugged in here.
pub trait StepPayloadValidator: Send + Sync {
    fn validate(&self, definition: &StepDefinition, payload: &Value) -> DomainResult<()>;
}

/// Accepts any payload shape; the default when no validator is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAllPayloads;

impl StepPayloadValidator for AcceptAllPayloads {
    fn validate(&self, _definition: &StepDefinition, _payload: &Value) -> DomainResult<()> {
        Ok(())
    }
}
