//! # Triage Pipeline
//!
//! One-event orchestration: fetch the changed-file list when path rules
//! need it, match the rule set, execute the matched actions, and report.
//! Runs are stateless; every decision derives from the current event and
//! the target's current state.

use std::sync::Arc;

use chrono::Utc;
use tracing::{instrument, warn};

use crate::dispatch::{Dispatcher, RunToken};
use crate::events::{adapter, TargetKind, TriageEvent};
use crate::executor::{ActionExecutor, RunReport};
use crate::github::RepoApi;
use crate::rules::RuleMatcher;

/// The full evaluate-and-execute path for triage events.
pub struct TriagePipeline {
    api: Arc<dyn RepoApi>,
    matcher: RuleMatcher,
    executor: ActionExecutor,
}

impl TriagePipeline {
    #[must_use]
    pub fn new(api: Arc<dyn RepoApi>, matcher: RuleMatcher, executor: ActionExecutor) -> Self {
        Self {
            api,
            matcher,
            executor,
        }
    }

    /// Process one event: match rules, execute actions, report.
    ///
    /// The changed-file list is fetched once per event, and only when a
    /// path rule could use it. A failed fetch skips path rules for this
    /// event; label rules still run.
    #[instrument(skip(self, event), fields(target = event.target.number, trigger = ?event.trigger))]
    pub async fn run(&self, event: &TriageEvent) -> RunReport {
        let started_at = Utc::now();

        let changed_files = if event.target.kind == TargetKind::PullRequest
            && self.matcher.has_path_rules()
        {
            match self.api.list_changed_files(event.target.number).await {
                Ok(files) => Some(files),
                Err(e) => {
                    warn!(
                        target = event.target.number,
                        error = %e,
                        "Failed to fetch changed files, path rules skipped for this event"
                    );
                    None
                }
            }
        } else {
            None
        };

        let matched = self.matcher.matches(event, changed_files.as_deref());
        let results = self.executor.execute(event, &matched).await;

        let report = RunReport {
            target: event.target,
            trigger: event.trigger,
            results,
            started_at,
            finished_at: Utc::now(),
        };
        report.log_summary();
        report
    }

    /// Scheduled sweep: fan out over open PRs and dispatch one run per
    /// target.
    ///
    /// Sweep runs use the same per-target concurrency groups as webhook
    /// runs, so a sweep and a webhook never act on the same target at the
    /// same time; whichever came second wins. Independent targets still
    /// proceed concurrently.
    #[instrument(skip(self, dispatcher))]
    pub async fn dispatch_scan(self: Arc<Self>, dispatcher: &Dispatcher) -> Vec<RunToken> {
        let events = match adapter::scan_open_pull_requests(self.api.as_ref()).await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Scheduled scan could not list open pull requests");
                return Vec::new();
            }
        };

        let mut tokens = Vec::with_capacity(events.len());
        for event in events {
            let group = event.target.group();
            let pipeline = Arc::clone(&self);
            let token = dispatcher
                .dispatch(&group, async move {
                    pipeline.run(&event).await;
                })
                .await;
            tokens.push(token);
        }
        tokens
    }
}
