//! Label triage automation for a GitHub repository.
//!
//! This crate provides:
//! - Webhook and timer event normalization into triage events
//! - Declarative rule matching (path globs, label subscriptions, comment templates)
//! - An action executor with per-action timeouts and isolated failure handling
//! - A per-group run dispatcher with latest-wins cancellation
//! - A reqwest-based GitHub API client with rate-limit tracking
//! - An HTTP server for webhook handling (standalone service)

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)] // Many async API methods can fail

pub mod config;
pub mod dispatch;
pub mod events;
pub mod executor;
pub mod github;
pub mod pipeline;
pub mod rules;
pub mod server;

pub use config::{Config, ConfigError, RuleFile};
pub use dispatch::{Dispatcher, RunState, RunToken};
pub use events::{TargetKind, TargetRef, TriageEvent, TriggerKind};
pub use executor::{ActionExecutor, ActionOutcome, ActionResult, RunReport};
pub use github::{GitHubClient, GitHubError, PullRequestSummary, RepoApi};
pub use pipeline::TriagePipeline;
pub use rules::{Rule, RuleAction, RuleMatcher, RuleSet};
pub use server::{build_router, AppState};
