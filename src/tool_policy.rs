//! Allow/deny lists over dotted tool names (`ui.click`, `shell.exec`, ...)
//! with `*` wildcards. Deny always wins; an empty allowlist allows everything.

use crate::config::env_list;

#[derive(Debug, Clone, Default)]
pub struct ToolPolicy {
    allow: Vec<String>,
    deny: Vec<String>,
}

impl ToolPolicy {
    pub fn new(allow: Vec<String>, deny: Vec<String>) -> Self {
        Self {
            allow: allow.iter().map(|p| normalize_pattern(p)).collect(),
            deny: deny.iter().map(|p| normalize_pattern(p)).collect(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(env_list("TOOL_ALLOWLIST"), env_list("TOOL_DENYLIST"))
    }

    pub fn is_allowed(&self, tool: &str) -> bool {
        let tool = tool.trim().to_lowercase();
        if tool.is_empty() {
            return false;
        }
        if self.deny.iter().any(|p| matches_pattern(p, &tool)) {
            return false;
        }
        if self.allow.is_empty() {
            return true;
        }
        self.allow.iter().any(|p| matches_pattern(p, &tool))
    }
}

/// Bare group names ("ui", "shell") are treated as prefix wildcards.
fn normalize_pattern(raw: &str) -> String {
    let trimmed = raw.trim().to_lowercase();
    if trimmed.is_empty() || trimmed == "*" || trimmed.contains('*') || trimmed.contains('.') {
        return trimmed;
    }
    format!("{trimmed}.*")
}

fn matches_pattern(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') {
        return pattern == value;
    }

    let mut remainder = value;
    let parts: Vec<&str> = pattern.split('*').collect();
    for (idx, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if idx == 0 {
            match remainder.strip_prefix(part) {
                Some(rest) => remainder = rest,
                None => return false,
            }
        } else {
            match remainder.find(part) {
                Some(pos) => remainder = &remainder[pos + part.len()..],
                None => return false,
            }
        }
        if idx == parts.len() - 1 && !pattern.ends_with('*') && !remainder.is_empty() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_prefix_matches_group() {
        assert!(matches_pattern("ui.*", "ui.click"));
        assert!(!matches_pattern("ui.*", "shell.exec"));
    }

    #[test]
    fn star_matches_everything() {
        assert!(matches_pattern("*", "anything.at.all"));
    }

    #[test]
    fn exact_pattern_requires_full_match() {
        assert!(matches_pattern("ui.click", "ui.click"));
        assert!(!matches_pattern("ui.click", "ui.click_text"));
    }

    #[test]
    fn deny_overrides_allow() {
        let policy = ToolPolicy::new(vec!["ui.*".to_string()], vec!["ui.click".to_string()]);
        assert!(!policy.is_allowed("ui.click"));
        assert!(policy.is_allowed("ui.snapshot"));
    }

    #[test]
    fn empty_allowlist_allows_all_but_denied() {
        let policy = ToolPolicy::new(vec![], vec!["shell.*".to_string()]);
        assert!(policy.is_allowed("ui.click"));
        assert!(!policy.is_allowed("shell.exec"));
    }

    #[test]
    fn bare_group_name_becomes_prefix() {
        let policy = ToolPolicy::new(vec!["ui".to_string()], vec![]);
        assert!(policy.is_allowed("ui.click"));
        assert!(!policy.is_allowed("shell.exec"));
    }
}
