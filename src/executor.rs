//! # Action Executor
//!
//! Applies matched rules against the repository API with isolated failure
//! handling: every action call is wrapped in a bounded timeout, and a
//! failure produces a `Failed` result while the run continues to the next
//! rule. No retries are performed; run completion wins over action
//! reliability, and the collected [`RunReport`] makes every failure visible
//! instead of swallowing it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use handlebars::Handlebars;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::events::{TargetRef, TriageEvent, TriggerKind};
use crate::github::{GitHubError, RepoApi};
use crate::rules::{Rule, RuleAction};

#[derive(Debug, Error)]
enum ActionError {
    #[error(transparent)]
    Api(#[from] GitHubError),

    #[error("Template rendering failed: {0}")]
    Template(#[from] handlebars::RenderError),
}

/// Outcome of one rule's action for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The side effect was performed.
    Applied,
    /// The rule matched but the target already had the intended state.
    Skipped,
    /// The API call failed or timed out; the target is unchanged.
    Failed,
}

/// Exactly one of these is produced per matched rule per event.
#[derive(Debug, Clone)]
pub struct ActionResult {
    /// Id of the rule that produced this result.
    pub rule_id: String,
    /// What happened.
    pub outcome: ActionOutcome,
    /// Error detail when the outcome is `Failed`.
    pub error: Option<String>,
}

impl ActionResult {
    fn failed(rule_id: &str, detail: String) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            outcome: ActionOutcome::Failed,
            error: Some(detail),
        }
    }
}

/// Per-run report of everything the executor did for one event.
///
/// Not persisted anywhere; logging it is the observability surface.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// The event's target.
    pub target: TargetRef,
    /// What triggered the run.
    pub trigger: TriggerKind,
    /// One result per matched rule, in match order.
    pub results: Vec<ActionResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    fn count(&self, outcome: ActionOutcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    #[must_use]
    pub fn applied(&self) -> usize {
        self.count(ActionOutcome::Applied)
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.count(ActionOutcome::Skipped)
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(ActionOutcome::Failed)
    }

    /// Log one summary line, plus a warning per failed action.
    pub fn log_summary(&self) {
        info!(
            target = self.target.number,
            kind = self.target.kind.as_str(),
            applied = self.applied(),
            skipped = self.skipped(),
            failed = self.failed(),
            duration_ms = (self.finished_at - self.started_at).num_milliseconds(),
            "Triage run finished"
        );
        for result in self.results.iter().filter(|r| r.outcome == ActionOutcome::Failed) {
            warn!(
                target = self.target.number,
                rule = %result.rule_id,
                error = result.error.as_deref().unwrap_or("unknown"),
                "Triage action failed"
            );
        }
    }
}

/// Executes matched rules against the repository API.
pub struct ActionExecutor {
    api: Arc<dyn RepoApi>,
    registry: Handlebars<'static>,
    action_timeout: Duration,
}

impl ActionExecutor {
    #[must_use]
    pub fn new(api: Arc<dyn RepoApi>, action_timeout: Duration) -> Self {
        Self {
            api,
            registry: Handlebars::new(),
            action_timeout,
        }
    }

    /// Execute every matched rule for `event`, in order.
    ///
    /// Returns exactly one [`ActionResult`] per rule. Actions against one
    /// target run sequentially so label mutations never race each other.
    pub async fn execute(&self, event: &TriageEvent, rules: &[&Rule]) -> Vec<ActionResult> {
        let mut results = Vec::with_capacity(rules.len());
        for rule in rules {
            results.push(self.apply_rule(event, rule).await);
        }
        results
    }

    #[instrument(skip(self, event, rule), fields(target = event.target.number, rule = %rule.id))]
    async fn apply_rule(&self, event: &TriageEvent, rule: &Rule) -> ActionResult {
        match tokio::time::timeout(self.action_timeout, self.perform(event, rule)).await {
            Ok(Ok(outcome)) => ActionResult {
                rule_id: rule.id.clone(),
                outcome,
                error: None,
            },
            Ok(Err(e)) => {
                warn!(error = %e, "Action failed, continuing with remaining rules");
                ActionResult::failed(&rule.id, e.to_string())
            }
            Err(_) => {
                warn!(
                    timeout = ?self.action_timeout,
                    "Action timed out, continuing with remaining rules"
                );
                ActionResult::failed(
                    &rule.id,
                    format!("timed out after {:?}", self.action_timeout),
                )
            }
        }
    }

    async fn perform(&self, event: &TriageEvent, rule: &Rule) -> Result<ActionOutcome, ActionError> {
        match &rule.action {
            RuleAction::PathLabel { label, .. } => {
                if event.has_label(label) {
                    // Re-labeling is cheap to skip and keeps sweeps idempotent.
                    return Ok(ActionOutcome::Skipped);
                }
                self.api
                    .add_labels(event.target.number, std::slice::from_ref(label))
                    .await?;
                Ok(ActionOutcome::Applied)
            }
            RuleAction::Mention { label, users } => {
                let body = format!(
                    "This {} has the `{}` label. cc {}",
                    event.target.kind.as_str(),
                    label,
                    users.join(" ")
                );
                self.api.create_comment(event.target.number, &body).await?;
                Ok(ActionOutcome::Applied)
            }
            RuleAction::Comment { label, template } => {
                let context = serde_json::json!({
                    "number": event.target.number,
                    "kind": event.target.kind.as_str(),
                    "label": label,
                    "labels": event.labels,
                });
                let body = self.registry.render_template(template, &context)?;
                self.api.create_comment(event.target.number, &body).await?;
                Ok(ActionOutcome::Applied)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::config::{CommentRuleDef, MentionRuleDef, PathRuleDef, RuleFile};
    use crate::events::{TargetKind, TriageEvent};
    use crate::github::{MockRepoApi, PullRequestSummary};
    use crate::rules::RuleSet;

    fn rule_set() -> RuleSet {
        let file = RuleFile {
            paths: vec![PathRuleDef {
                id: Some("wasi-paths".to_string()),
                globs: vec!["src/wasi/**".to_string()],
                label: "wasi".to_string(),
            }],
            mentions: vec![MentionRuleDef {
                id: Some("wasi-subscribers".to_string()),
                label: "wasi".to_string(),
                users: vec!["@alice".to_string()],
            }],
            comments: vec![CommentRuleDef {
                id: Some("help-wanted-reply".to_string()),
                label: "help wanted".to_string(),
                template: "Volunteers welcome on this {{kind}} (#{{number}}).".to_string(),
            }],
        };
        RuleSet::compile(&file).unwrap()
    }

    fn rule<'a>(set: &'a RuleSet, id: &str) -> &'a Rule {
        set.rules().iter().find(|r| r.id == id).unwrap()
    }

    fn issue_event(labels: &[&str]) -> TriageEvent {
        TriageEvent::new(
            TargetRef {
                number: 42,
                kind: TargetKind::Issue,
            },
            TriggerKind::LabelAdded,
            labels.iter().map(|s| (*s).to_string()).collect(),
        )
    }

    #[tokio::test]
    async fn no_matched_rules_means_zero_actions() {
        // The mock fails the test on any unexpected call.
        let api = Arc::new(MockRepoApi::new());
        let executor = ActionExecutor::new(api, Duration::from_secs(5));

        let results = executor.execute(&issue_event(&[]), &[]).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn mention_rule_posts_exactly_one_comment() {
        let mut api = MockRepoApi::new();
        api.expect_create_comment()
            .withf(|number, body| *number == 42 && body.contains("@alice"))
            .times(1)
            .returning(|_, _| Ok(()));

        let set = rule_set();
        let executor = ActionExecutor::new(Arc::new(api), Duration::from_secs(5));
        let results = executor
            .execute(&issue_event(&["wasi"]), &[rule(&set, "wasi-subscribers")])
            .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].rule_id, "wasi-subscribers");
        assert_eq!(results[0].outcome, ActionOutcome::Applied);
    }

    #[tokio::test]
    async fn comment_rule_renders_the_template() {
        let mut api = MockRepoApi::new();
        api.expect_create_comment()
            .withf(|number, body| *number == 42 && body == "Volunteers welcome on this issue (#42).")
            .times(1)
            .returning(|_, _| Ok(()));

        let set = rule_set();
        let executor = ActionExecutor::new(Arc::new(api), Duration::from_secs(5));
        let results = executor
            .execute(
                &issue_event(&["help wanted"]),
                &[rule(&set, "help-wanted-reply")],
            )
            .await;

        assert_eq!(results[0].outcome, ActionOutcome::Applied);
    }

    #[tokio::test]
    async fn path_rule_skips_when_label_already_present() {
        let api = Arc::new(MockRepoApi::new());
        let set = rule_set();
        let executor = ActionExecutor::new(api, Duration::from_secs(5));

        let event = TriageEvent::new(
            TargetRef {
                number: 7,
                kind: TargetKind::PullRequest,
            },
            TriggerKind::ScheduledScan,
            vec!["wasi".to_string()],
        );
        let results = executor.execute(&event, &[rule(&set, "wasi-paths")]).await;

        assert_eq!(results[0].outcome, ActionOutcome::Skipped);
        assert!(results[0].error.is_none());
    }

    #[tokio::test]
    async fn one_failure_never_blocks_the_remaining_rules() {
        let mut api = MockRepoApi::new();
        api.expect_add_labels().times(1).returning(|_, _| {
            Err(GitHubError::ApiError {
                status: 500,
                message: "boom".to_string(),
            })
        });
        api.expect_create_comment().times(1).returning(|_, _| Ok(()));

        let set = rule_set();
        let executor = ActionExecutor::new(Arc::new(api), Duration::from_secs(5));

        // No "wasi" label yet, so the path rule really calls the API.
        let event = TriageEvent::new(
            TargetRef {
                number: 7,
                kind: TargetKind::PullRequest,
            },
            TriggerKind::LabelAdded,
            vec![],
        );
        let results = executor
            .execute(
                &event,
                &[rule(&set, "wasi-paths"), rule(&set, "wasi-subscribers")],
            )
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].outcome, ActionOutcome::Failed);
        assert!(results[0].error.as_deref().unwrap().contains("boom"));
        assert_eq!(results[1].outcome, ActionOutcome::Applied);
    }

    /// Stand-in API whose comment calls never return.
    struct StalledApi;

    #[async_trait]
    impl RepoApi for StalledApi {
        async fn list_changed_files(&self, _pr: u64) -> Result<Vec<String>, GitHubError> {
            unimplemented!()
        }

        async fn add_labels(&self, _number: u64, _labels: &[String]) -> Result<(), GitHubError> {
            unimplemented!()
        }

        async fn create_comment(&self, _number: u64, _body: &str) -> Result<(), GitHubError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }

        async fn list_open_pull_requests(&self) -> Result<Vec<PullRequestSummary>, GitHubError> {
            unimplemented!()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_api_call_times_out_and_is_reported_failed() {
        let set = rule_set();
        let executor = ActionExecutor::new(Arc::new(StalledApi), Duration::from_millis(100));

        let results = executor
            .execute(&issue_event(&["wasi"]), &[rule(&set, "wasi-subscribers")])
            .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, ActionOutcome::Failed);
        assert!(results[0].error.as_deref().unwrap().contains("timed out"));
    }

    #[test]
    fn run_report_counts_outcomes() {
        let report = RunReport {
            target: TargetRef {
                number: 1,
                kind: TargetKind::Issue,
            },
            trigger: TriggerKind::LabelAdded,
            results: vec![
                ActionResult {
                    rule_id: "a".to_string(),
                    outcome: ActionOutcome::Applied,
                    error: None,
                },
                ActionResult {
                    rule_id: "b".to_string(),
                    outcome: ActionOutcome::Skipped,
                    error: None,
                },
                ActionResult::failed("c", "x".to_string()),
                ActionResult::failed("d", "y".to_string()),
            ],
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };

        assert_eq!(report.applied(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 2);
    }
}
