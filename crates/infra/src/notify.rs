use std::time::Duration;

use serde_json::json;

use facebase_domain::error::DomainError;
use facebase_domain::ports::notifications::NotificationSink;
use facebase_domain::ports::BoxFuture;
use facebase_domain::util::{format_ms_rfc3339, now_ms};
use facebase_domain::DomainResult;

/// Delivers state-change events to the realtime gateway with a single POST.
/// At-most-once: no retry, no queue. Callers already treat delivery as
/// best-effort, so any failure is reported back and logged there.
pub struct HttpNotificationSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpNotificationSink {
    pub fn new(endpoint: impl Into<String>, timeout_ms: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

impl NotificationSink for HttpNotificationSink {
    fn notify(
        &self,
        user_id: &str,
        event: &str,
        payload: serde_json::Value,
    ) -> BoxFuture<'_, DomainResult<()>> {
        let body = json!({
            "user_id": user_id,
            "type": event,
            "payload": payload,
            "timestamp": format_ms_rfc3339(now_ms()),
        });
        let request = self.client.post(&self.endpoint).json(&body);
        Box::pin(async move {
            let response = request.send().await.map_err(|err| {
                DomainError::Unavailable(format!("notification endpoint unreachable: {err}"))
            })?;
            response.error_for_status().map_err(|err| {
                DomainError::Unavailable(format!("notification endpoint rejected event: {err}"))
            })?;
            Ok(())
        })
    }
}
