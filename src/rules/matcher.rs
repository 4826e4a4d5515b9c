//! Rule matching.
//!
//! Matching is independent per rule: no priority or exclusivity semantics,
//! and multiple rules may fire for one event. The matched list preserves
//! configuration order.

use tracing::debug;

use crate::events::{TargetKind, TriageEvent, TriggerKind};
use crate::rules::{Rule, RuleAction, RuleSet};

/// Evaluates the static rule set against events.
#[derive(Debug, Clone)]
pub struct RuleMatcher {
    rules: RuleSet,
}

impl RuleMatcher {
    #[must_use]
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    /// Whether any path rule is configured (callers fetch the changed-file
    /// list only when one is).
    #[must_use]
    pub fn has_path_rules(&self) -> bool {
        self.rules.has_path_rules()
    }

    /// Return the rules matching `event`, in configuration order.
    ///
    /// Path rules apply only to pull requests and need the changed-file
    /// list; when `changed_files` is `None` they never match. Issues carry
    /// no file list, so path rules never apply to them. Mention and comment
    /// rules respond to label application, not to scheduled sweeps, so they
    /// match only label-added events.
    #[must_use]
    pub fn matches<'a>(
        &'a self,
        event: &TriageEvent,
        changed_files: Option<&[String]>,
    ) -> Vec<&'a Rule> {
        let matched: Vec<&Rule> = self
            .rules
            .rules()
            .iter()
            .filter(|rule| Self::rule_matches(rule, event, changed_files))
            .collect();

        debug!(
            target = event.target.number,
            matched = matched.len(),
            "Evaluated rule set against event"
        );
        matched
    }

    fn rule_matches(rule: &Rule, event: &TriageEvent, changed_files: Option<&[String]>) -> bool {
        match &rule.action {
            RuleAction::PathLabel { globs, .. } => {
                if event.target.kind != TargetKind::PullRequest {
                    return false;
                }
                let Some(files) = changed_files else {
                    return false;
                };
                files
                    .iter()
                    .any(|file| globs.iter().any(|glob| glob.matches(file)))
            }
            RuleAction::Mention { label, .. } | RuleAction::Comment { label, .. } => {
                event.trigger == TriggerKind::LabelAdded && event.has_label(label)
            }
        }
    }
}
