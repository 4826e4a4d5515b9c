//! # Triage Rule Definitions
//!
//! Rules are loaded once from the declarative rule file at startup and are
//! read-only afterwards. Three kinds exist:
//! - path rules: add a label when any changed file matches a glob
//! - mention rules: post a comment mentioning subscribed users when a label
//!   is applied
//! - comment rules: post a rendered Handlebars template when a label is
//!   applied
//!
//! Glob patterns are compiled into anchored regexes at load time so invalid
//! patterns fail the whole startup rather than individual runs.

pub mod matcher;

pub use matcher::RuleMatcher;

use handlebars::Handlebars;
use regex::Regex;

use crate::config::{ConfigError, RuleFile};

/// A compiled path glob.
#[derive(Debug, Clone)]
pub struct PathGlob {
    /// The pattern as written in the rule file.
    pub pattern: String,
    regex: Regex,
}

impl PathGlob {
    /// Compile a glob pattern (`**`, `*`, `?`) into an anchored regex.
    pub fn compile(pattern: &str) -> Result<Self, ConfigError> {
        let mut re = String::with_capacity(pattern.len() + 8);
        re.push('^');

        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' => {
                    if chars.peek() == Some(&'*') {
                        chars.next();
                        if chars.peek() == Some(&'/') {
                            // "a/**/b" must also match "a/b"
                            chars.next();
                            re.push_str("(?:.*/)?");
                        } else {
                            re.push_str(".*");
                        }
                    } else {
                        re.push_str("[^/]*");
                    }
                }
                '?' => re.push_str("[^/]"),
                c => re.push_str(&regex::escape(&c.to_string())),
            }
        }
        re.push('$');

        let regex = Regex::new(&re).map_err(|e| ConfigError::InvalidGlob {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// Whether `path` matches this glob.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

/// The action half of a rule.
#[derive(Debug, Clone)]
pub enum RuleAction {
    /// Add `label` when any changed file matches any glob.
    PathLabel {
        globs: Vec<PathGlob>,
        label: String,
    },
    /// Mention `users` in a comment when `label` is applied.
    Mention {
        label: String,
        users: Vec<String>,
    },
    /// Post the rendered `template` when `label` is applied.
    Comment {
        label: String,
        template: String,
    },
}

/// A single triage rule with a stable id for action results.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Rule id, explicit from the rule file or generated (`path-0`, ...).
    pub id: String,
    /// What the rule matches and does.
    pub action: RuleAction,
}

/// The full compiled rule set, in configuration order: path rules first,
/// then mention rules, then comment rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Compile a parsed rule file, validating globs, mention lists, and
    /// comment templates. Any invalid rule fails the whole set.
    pub fn compile(file: &RuleFile) -> Result<Self, ConfigError> {
        let mut rules = Vec::new();
        let validator = Handlebars::new();

        for (index, def) in file.paths.iter().enumerate() {
            if def.globs.is_empty() {
                return Err(ConfigError::EmptyGlobs {
                    label: def.label.clone(),
                });
            }
            let globs = def
                .globs
                .iter()
                .map(|p| PathGlob::compile(p))
                .collect::<Result<Vec<_>, _>>()?;
            rules.push(Rule {
                id: def.id.clone().unwrap_or_else(|| format!("path-{index}")),
                action: RuleAction::PathLabel {
                    globs,
                    label: def.label.clone(),
                },
            });
        }

        for (index, def) in file.mentions.iter().enumerate() {
            if def.users.is_empty() {
                return Err(ConfigError::EmptyMentions {
                    label: def.label.clone(),
                });
            }
            let users = def
                .users
                .iter()
                .map(|u| {
                    if u.starts_with('@') {
                        u.clone()
                    } else {
                        format!("@{u}")
                    }
                })
                .collect();
            rules.push(Rule {
                id: def.id.clone().unwrap_or_else(|| format!("mention-{index}")),
                action: RuleAction::Mention {
                    label: def.label.clone(),
                    users,
                },
            });
        }

        for (index, def) in file.comments.iter().enumerate() {
            let id = def.id.clone().unwrap_or_else(|| format!("comment-{index}"));
            validator
                .render_template(&def.template, &serde_json::json!({}))
                .map_err(|e| ConfigError::BadTemplate {
                    rule_id: id.clone(),
                    reason: e.to_string(),
                })?;
            rules.push(Rule {
                id,
                action: RuleAction::Comment {
                    label: def.label.clone(),
                    template: def.template.clone(),
                },
            });
        }

        Ok(Self { rules })
    }

    /// All rules in match order.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Whether any path rule is configured.
    #[must_use]
    pub fn has_path_rules(&self) -> bool {
        self.rules
            .iter()
            .any(|r| matches!(r.action, RuleAction::PathLabel { .. }))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
