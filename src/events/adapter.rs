//! Event source adapter.
//!
//! Turns raw triggers into [`TriageEvent`]s:
//! - GitHub webhook deliveries (`issues` / `pull_request` with action
//!   `labeled`) produce zero or one event. Malformed payloads are logged and
//!   dropped; they never abort a run.
//! - Scheduled timer fires fan out into one event per open pull request,
//!   since fork-originated PRs cannot deliver label webhooks reliably.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::events::{TargetKind, TargetRef, TriageEvent, TriggerKind};
use crate::github::{GitHubError, RepoApi};

/// GitHub label as it appears in webhook payloads.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookLabel {
    /// Label name.
    pub name: String,
}

/// Issue or PR fields the adapter cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookItem {
    /// Issue or PR number.
    pub number: u64,
    /// Labels on the item, including the one just added.
    #[serde(default)]
    pub labels: Vec<WebhookLabel>,
}

/// GitHub `issues` / `pull_request` event payload (simplified).
#[derive(Debug, Clone, Deserialize)]
pub struct LabelWebhook {
    /// Action type (labeled, unlabeled, opened, etc.)
    pub action: String,
    /// The label involved, present for labeled/unlabeled actions.
    #[serde(default)]
    pub label: Option<WebhookLabel>,
    /// Present on `issues` events.
    #[serde(default)]
    pub issue: Option<WebhookItem>,
    /// Present on `pull_request` events.
    #[serde(default)]
    pub pull_request: Option<WebhookItem>,
}

/// Normalize a webhook delivery into zero or one [`TriageEvent`].
///
/// Returns `None` for event types other than `issues`/`pull_request`, for
/// actions other than `labeled`, and for payloads that fail to parse. The
/// reason is logged in every case.
#[must_use]
pub fn normalize_webhook(event_type: &str, body: &[u8]) -> Option<TriageEvent> {
    if event_type != "issues" && event_type != "pull_request" {
        debug!(event_type = %event_type, "Ignoring unrelated webhook event type");
        return None;
    }

    let payload: LabelWebhook = match serde_json::from_slice(body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(event_type = %event_type, error = %e, "Dropping malformed webhook payload");
            return None;
        }
    };

    if payload.action != "labeled" {
        debug!(
            event_type = %event_type,
            action = %payload.action,
            "Ignoring non-labeled action"
        );
        return None;
    }

    let (item, kind) = match (event_type, payload.issue, payload.pull_request) {
        ("issues", Some(issue), _) => (issue, TargetKind::Issue),
        ("pull_request", _, Some(pr)) => (pr, TargetKind::PullRequest),
        _ => {
            warn!(
                event_type = %event_type,
                "Dropping labeled event without issue/pull_request body"
            );
            return None;
        }
    };

    let labels: Vec<String> = item.labels.into_iter().map(|l| l.name).collect();

    debug!(
        number = item.number,
        kind = kind.as_str(),
        added = payload.label.as_ref().map(|l| l.name.as_str()),
        "Normalized labeled event"
    );

    Some(TriageEvent::new(
        TargetRef {
            number: item.number,
            kind,
        },
        TriggerKind::LabelAdded,
        labels,
    ))
}

/// Fan a scheduled tick out into one event per open pull request.
pub async fn scan_open_pull_requests(api: &dyn RepoApi) -> Result<Vec<TriageEvent>, GitHubError> {
    let pulls = api.list_open_pull_requests().await?;

    debug!(count = pulls.len(), "Scheduled scan over open pull requests");

    Ok(pulls
        .into_iter()
        .map(|pr| {
            TriageEvent::new(
                TargetRef {
                    number: pr.number,
                    kind: TargetKind::PullRequest,
                },
                TriggerKind::ScheduledScan,
                pr.labels,
            )
        })
        .collect())
}
