use crate::ports::BoxFuture;
use crate::DomainResult;

/// Best-effort event emission towards the user-facing realtime channel.
///
/// Services call this after a successful state change and swallow failures;
/// a sink error must never roll back or fail the primary transition. See
/// `notifications` for the event kinds and payload builders.
pub trait NotificationSink: Send + Sync {
    fn notify(
        &self,
        user_id: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> BoxFuture<'_, DomainResult<()>>;
}
