use serde_json::{json, Value};

use crate::ports::notifications::NotificationSink;
use crate::ports::BoxFuture;
use crate::submission::Submission;
use crate::DomainResult;

pub const EVENT_SUBMISSION_CREATED: &str = "submission:created";
pub const EVENT_SUBMISSION_UPDATED: &str = "submission:updated";
pub const EVENT_STEP_COMPLETED: &str = "step:completed";
pub const EVENT_TASK_LIST_UPDATED: &str = "task:list:updated";

pub fn submission_event_payload(submission: &Submission) -> Value {
    json!({
        "submission_id": submission.submission_id,
        "task_id": submission.task_id,
        "status": submission.status.as_str(),
        "active_step": submission.active_step,
    })
}

pub fn step_event_payload(submission: &Submission, step_number: u32) -> Value {
    json!({
        "submission_id": submission.submission_id,
        "task_id": submission.task_id,
        "step_number": step_number,
        "status": submission.status.as_str(),
        "active_step": submission.active_step,
    })
}

/// Sink used when no realtime channel is configured. Dropping events is a
/// valid degraded mode; transitions never depend on delivery.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullNotificationSink;

impl NotificationSink for NullNotificationSink {
    fn notify(
        &self,
        _user_id: &str,
        _event: &str,
        _payload: Value,
    ) -> BoxFuture<'_, DomainResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
