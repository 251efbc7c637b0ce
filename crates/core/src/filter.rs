//! Include/exclude filtering
//!
//! Rules are evaluated in declaration order and the last matching rule wins;
//! a path no rule matches is included. Patterns use glob syntax against the
//! `/`-separated path relative to the transfer root:
//!
//! - `*`, `?` and `[seq]` never cross a `/`
//! - `**` matches zero or more whole path segments
//! - a leading `/` anchors the pattern at the root; otherwise the pattern may
//!   start at any segment boundary (`*.log` matches `b.log` and `logs/b.log`)

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterAction {
    Include,
    Exclude,
}

/// One include or exclude rule as written by the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    pub pattern: String,
    pub action: FilterAction,
}

impl FilterRule {
    pub fn include(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            action: FilterAction::Include,
        }
    }

    pub fn exclude(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            action: FilterAction::Exclude,
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    anchored: bool,
    /// The pattern plus its zero-segment `**` expansions
    alternatives: Vec<Pattern>,
    action: FilterAction,
}

impl CompiledRule {
    fn compile(rule: &FilterRule) -> Result<Self> {
        let (anchored, body) = match rule.pattern.strip_prefix('/') {
            Some(rest) => (true, rest),
            None => (false, rule.pattern.as_str()),
        };
        if body.is_empty() {
            return Err(Error::Config(format!(
                "Invalid filter pattern: '{}'",
                rule.pattern
            )));
        }

        let alternatives = expand_globstar(body)
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| {
                    Error::Config(format!("Invalid filter pattern '{}': {e}", rule.pattern))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            anchored,
            alternatives,
            action: rule.action,
        })
    }

    fn matches(&self, path: &str) -> bool {
        let hit = |candidate: &str| {
            self.alternatives
                .iter()
                .any(|p| p.matches_with(candidate, MATCH_OPTIONS))
        };

        if self.anchored {
            return hit(path);
        }

        // Try every suffix that starts at a segment boundary
        std::iter::once(path)
            .chain(path.match_indices('/').map(|(i, _)| &path[i + 1..]))
            .any(hit)
    }
}

/// Expand `**` segments so that each may also match zero segments.
///
/// `a/**/b` additionally yields `a/b`; a leading `**/x` yields `x`.
fn expand_globstar(pattern: &str) -> Vec<String> {
    let mut out = vec![pattern.to_string()];
    let mut i = 0;
    while i < out.len() {
        let current = out[i].clone();
        let mut reduced: Vec<String> = current
            .match_indices("/**/")
            .map(|(pos, _)| format!("{}{}", &current[..pos], &current[pos + 3..]))
            .collect();
        if let Some(rest) = current.strip_prefix("**/") {
            reduced.push(rest.to_string());
        }
        for candidate in reduced {
            if !candidate.is_empty() && !out.contains(&candidate) {
                out.push(candidate);
            }
        }
        i += 1;
    }
    out
}

/// Compiled, ordered rule set
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    rules: Vec<CompiledRule>,
}

impl FilterSet {
    pub fn new(rules: &[FilterRule]) -> Result<Self> {
        Ok(Self {
            rules: rules
                .iter()
                .map(CompiledRule::compile)
                .collect::<Result<Vec<_>>>()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Last matching rule wins; no match means include
    pub fn included(&self, path: &str) -> bool {
        self.rules
            .iter()
            .rev()
            .find(|rule| rule.matches(path))
            .is_none_or(|rule| rule.action == FilterAction::Include)
    }
}

/// Evaluate `rules` against `path` without keeping the compiled set
pub fn included(path: &str, rules: &[FilterRule]) -> Result<bool> {
    Ok(FilterSet::new(rules)?.included(path))
}
