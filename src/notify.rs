//! Webhook notifications.
//!
//! Posts a short chat-style summary of a cycle to an incoming webhook
//! (Slack-compatible payload). Failures are returned to the caller, which
//! logs them; a notification never fails a cycle.

use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::config::NotificationConfig;
use crate::error::NotifyError;
use crate::report::CycleReport;

/// Issues listed in a notification before truncating.
const MAX_LISTED_ISSUES: usize = 5;

/// Webhook payload.
#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    text: String,
    username: &'a str,
    icon_emoji: &'a str,
}

/// Webhook notifier.
#[derive(Debug, Clone)]
pub struct Notifier {
    /// HTTP client.
    client: Client,
    /// Notification settings.
    config: NotificationConfig,
}

impl Notifier {
    /// Creates a notifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: NotificationConfig) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| NotifyError::Request {
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self { client, config })
    }

    /// Returns true if this report warrants a notification.
    #[must_use]
    pub fn should_notify(&self, report: &CycleReport) -> bool {
        self.config.always_notify
            || report.drift_detected
            || report.is_failed()
            || report.has_execution_failures()
    }

    /// Sends a notification for the report if it warrants one.
    ///
    /// Returns whether a message was sent.
    ///
    /// # Errors
    ///
    /// Returns a `NotifyError` if the request fails or the webhook rejects it.
    pub async fn notify(&self, report: &CycleReport) -> Result<bool, NotifyError> {
        if !self.should_notify(report) {
            debug!("Nothing to notify for cycle {}", report.cycle_id);
            return Ok(false);
        }

        let icon = if report.drift_detected || report.is_failed() {
            ":warning:"
        } else {
            ":white_check_mark:"
        };
        let message = WebhookMessage {
            text: format_message(report),
            username: &self.config.username,
            icon_emoji: icon,
        };

        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(&message)
            .send()
            .await
            .map_err(|e| NotifyError::Request {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status {
                status: status.as_u16(),
            });
        }

        debug!("Notification sent for cycle {}", report.cycle_id);
        Ok(true)
    }
}

/// Renders the notification text.
#[must_use]
pub fn format_message(report: &CycleReport) -> String {
    let scope = format!("{}/{}", report.project, report.environment);

    if let Some(reason) = report.failure() {
        return format!("Drift cycle failed for {scope}: {reason}");
    }

    if !report.drift_detected {
        return format!("No infrastructure drift detected for {scope}");
    }

    let mut lines = vec![format!(
        "Infrastructure drift detected for {scope}: {} issue(s) ({} high, {} medium, {} low)",
        report.summary.total, report.summary.high, report.summary.medium, report.summary.low
    )];

    for entry in report.drift.iter().take(MAX_LISTED_ISSUES) {
        lines.push(format!(
            "- {} `{}`: {} (declared {}, observed {})",
            entry.resource_id,
            entry.field,
            entry.kind,
            entry.declared.as_deref().unwrap_or("-"),
            entry.observed.as_deref().unwrap_or("-")
        ));
    }

    let hidden = report.drift.len().saturating_sub(MAX_LISTED_ISSUES);
    if hidden > 0 {
        lines.push(format!("... and {hidden} more"));
    }

    if let Some(execution) = &report.execution {
        lines.push(format!(
            "Remediation: {} applied, {} failed",
            execution.count(crate::planner::OutcomeStatus::Applied),
            execution.failures().count()
        ));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declared::ResourceType;
    use crate::planner::{DriftEntry, DriftKind, Impact};
    use crate::report::CycleMode;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn drifted_report(entries: usize) -> CycleReport {
        let mut report = CycleReport::new("shop", "prod", CycleMode::Detect);
        report.set_drift(
            (0..entries)
                .map(|i| DriftEntry {
                    resource_id: format!("web-{i}"),
                    resource_type: ResourceType::WebServer,
                    field: String::from("running"),
                    declared: Some(String::from("true")),
                    observed: Some(String::from("false")),
                    kind: DriftKind::Misconfigured,
                    impact: Impact::High,
                })
                .collect(),
        );
        report
    }

    fn notifier(url: String, always: bool) -> Notifier {
        let mut config = NotificationConfig::new(url);
        config.always_notify = always;
        Notifier::new(config).unwrap()
    }

    #[test]
    fn test_message_lists_first_five_issues() {
        let text = format_message(&drifted_report(7));
        assert!(text.contains("7 issue(s)"));
        assert!(text.contains("web-4"));
        assert!(!text.contains("web-5"));
        assert!(text.contains("and 2 more"));
    }

    #[tokio::test]
    async fn test_posts_payload_on_drift() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(serde_json::json!({
                "username": "IaC Drift Detector",
                "icon_emoji": ":warning:"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sent = notifier(format!("{}/hook", server.uri()), false)
            .notify(&drifted_report(1))
            .await
            .unwrap();
        assert!(sent);
    }

    #[tokio::test]
    async fn test_clean_cycle_is_silent_unless_always_notify() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let clean = CycleReport::new("shop", "prod", CycleMode::Detect);
        assert!(!notifier(server.uri(), false).notify(&clean).await.unwrap());
        assert!(notifier(server.uri(), true).notify(&clean).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejected_webhook_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = notifier(server.uri(), false)
            .notify(&drifted_report(1))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Status { status: 500 }));
    }
}
