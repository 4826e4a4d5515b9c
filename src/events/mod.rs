//! Normalized triage events.
//!
//! Raw triggers (GitHub webhook deliveries, timer fires) are normalized into
//! [`TriageEvent`] records by the adapter before any rule evaluation happens.
//! Events are immutable once built.

pub mod adapter;

use chrono::{DateTime, Utc};

/// Kind of item a triage action applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// A repository issue.
    Issue,
    /// A pull request.
    PullRequest,
}

impl TargetKind {
    /// Human-readable name, used in comment bodies and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::Issue => "issue",
            TargetKind::PullRequest => "pull request",
        }
    }
}

/// The issue or pull request a triage action applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetRef {
    /// Issue or PR number.
    pub number: u64,
    /// Whether the target is an issue or a PR.
    pub kind: TargetKind,
}

impl TargetRef {
    /// Concurrency group shared by every run that acts on this target,
    /// webhook-triggered or sweep-triggered alike.
    #[must_use]
    pub fn group(&self) -> String {
        format!("target-{}", self.number)
    }
}

/// What caused a triage run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// A label was added to an issue or PR.
    LabelAdded,
    /// A scheduled reconciliation sweep over open PRs.
    ScheduledScan,
}

/// A normalized repository event, processed by the rule matcher exactly once
/// per run.
#[derive(Debug, Clone, PartialEq)]
pub struct TriageEvent {
    /// The issue or PR this event concerns.
    pub target: TargetRef,
    /// What produced this event.
    pub trigger: TriggerKind,
    /// The target's label set at the time the event was built.
    pub labels: Vec<String>,
    /// When the event was received.
    pub received_at: DateTime<Utc>,
}

impl TriageEvent {
    /// Build an event carrying the target's current label set.
    #[must_use]
    pub fn new(target: TargetRef, trigger: TriggerKind, labels: Vec<String>) -> Self {
        Self {
            target,
            trigger,
            labels,
            received_at: Utc::now(),
        }
    }

    /// Whether the target currently carries `label`.
    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}
