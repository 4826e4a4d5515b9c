//! Service configuration.
//!
//! Two surfaces: environment variables for runtime settings (port, token,
//! scan cadence) and a mounted YAML rule file for the declarative triage
//! rules. Rule configuration is static and shared across runs, so any
//! invalid rule definition fails startup instead of being skipped.

use std::env;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

/// Errors that make the service refuse to start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read rule file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse rule file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid glob pattern '{pattern}': {reason}")]
    InvalidGlob { pattern: String, reason: String },

    #[error("Path rule for label '{label}' has no glob patterns")]
    EmptyGlobs { label: String },

    #[error("Mention rule for label '{label}' has no users")]
    EmptyMentions { label: String },

    #[error("Comment rule '{rule_id}' has an invalid template: {reason}")]
    BadTemplate { rule_id: String, reason: String },

    #[error("TRIAGE_REPOSITORY is not set (expected 'owner/repo')")]
    MissingRepository,

    #[error("Invalid TRIAGE_REPOSITORY value '{0}' (expected 'owner/repo')")]
    InvalidRepository(String),
}

/// Runtime configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,
    /// Repository owner (from `TRIAGE_REPOSITORY`).
    pub repo_owner: String,
    /// Repository name (from `TRIAGE_REPOSITORY`).
    pub repo_name: String,
    /// GitHub token for API calls. Unauthenticated without it.
    pub github_token: Option<String>,
    /// Webhook signing secret; deliveries are rejected without a valid
    /// signature when set.
    pub webhook_secret: Option<String>,
    /// Path to the mounted rule file.
    pub rules_path: String,
    /// Seconds between scheduled scans over open PRs. 0 disables the scan.
    pub scan_interval_secs: u64,
    /// Delay before the first scan. Offset from startup so fleets of
    /// services don't all hit the API on the hour.
    pub scan_offset_secs: u64,
    /// Per-action deadline for external API calls.
    pub action_timeout_secs: u64,
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let repository = env::var("TRIAGE_REPOSITORY").map_err(|_| ConfigError::MissingRepository)?;
        let (repo_owner, repo_name) = parse_repository(&repository)?;

        Ok(Self {
            port: env_parsed("TRIAGE_PORT", 8080),
            repo_owner,
            repo_name,
            github_token: env::var("GITHUB_TOKEN").ok().filter(|s| !s.is_empty()),
            webhook_secret: env::var("TRIAGE_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            rules_path: env::var("TRIAGE_RULES_PATH")
                .unwrap_or_else(|_| "/config/rules.yaml".to_string()),
            scan_interval_secs: env_parsed("TRIAGE_SCAN_INTERVAL_SECS", 3600),
            scan_offset_secs: env_parsed("TRIAGE_SCAN_OFFSET_SECS", 420),
            action_timeout_secs: env_parsed("TRIAGE_ACTION_TIMEOUT_SECS", 10),
        })
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(
                    variable = name,
                    value = %raw,
                    "Ignoring unparseable environment value, using the default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

/// Split an `owner/repo` value.
fn parse_repository(value: &str) -> Result<(String, String), ConfigError> {
    match value.split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(ConfigError::InvalidRepository(value.to_string())),
    }
}

/// Raw path rule definition from the rule file.
#[derive(Debug, Clone, Deserialize)]
pub struct PathRuleDef {
    /// Optional stable id; generated from the rule's position if absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Glob patterns matched against changed file paths.
    pub globs: Vec<String>,
    /// Label to add on a match.
    pub label: String,
}

/// Raw mention rule definition from the rule file.
#[derive(Debug, Clone, Deserialize)]
pub struct MentionRuleDef {
    #[serde(default)]
    pub id: Option<String>,
    /// Label that triggers the mention.
    pub label: String,
    /// Users to mention; a leading `@` is added if missing.
    pub users: Vec<String>,
}

/// Raw comment rule definition from the rule file.
#[derive(Debug, Clone, Deserialize)]
pub struct CommentRuleDef {
    #[serde(default)]
    pub id: Option<String>,
    /// Label that triggers the comment.
    pub label: String,
    /// Handlebars template for the comment body.
    pub template: String,
}

/// The declarative rule file, prior to compilation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleFile {
    /// Path-glob to label mappings.
    #[serde(default)]
    pub paths: Vec<PathRuleDef>,
    /// Label to mention-list mappings.
    #[serde(default)]
    pub mentions: Vec<MentionRuleDef>,
    /// Label to comment-template mappings.
    #[serde(default)]
    pub comments: Vec<CommentRuleDef>,
}

impl RuleFile {
    /// Read and parse the rule file from a mounted path.
    pub fn from_mounted_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let file: RuleFile = serde_yaml::from_str(&content)?;
        info!(
            path = %path.display(),
            paths = file.paths.len(),
            mentions = file.mentions.len(),
            comments = file.comments.len(),
            "Loaded rule file"
        );
        Ok(file)
    }
}
