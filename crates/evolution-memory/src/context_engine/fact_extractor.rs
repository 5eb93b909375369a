//! Pattern-based extraction of critical facts from conversation text

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;

use crate::memory_db::CriticalFacts;

pub const MAX_FILE_PATHS: usize = 20;
pub const MAX_CODE_REFS: usize = 30;
pub const MAX_NOTES_PER_CATEGORY: usize = 5;

lazy_static! {
    static ref FILE_PATH_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"`([/\w\-.]+\.[a-zA-Z]{2,5})`").unwrap(),
        Regex::new(r"file:///([^\s\)]+)").unwrap(),
        Regex::new(r"(?:view_file|read_file|write_to_file)[^\n]*?([/\w\-.]+\.[a-zA-Z]{2,5})").unwrap(),
    ];
    static ref CODE_REF_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?:function|def|class|const|let|var)\s+(\w+)").unwrap(),
        Regex::new(r"`(\w+)\(\)`").unwrap(),
        Regex::new(r"`(\w+\.\w+)`").unwrap(),
    ];
    static ref DECISION_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)(?:decided|choosing|selected|using|will use|approach:)\s*([^\n.]+)").unwrap(),
        Regex::new(r"(?i)(?:solution|fix):\s*([^\n.]+)").unwrap(),
    ];
    static ref BLOCKER_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)(?:error|issue|problem|blocked|failing):\s*([^\n]+)").unwrap(),
        Regex::new(r"(?i)(?:TODO|FIXME|BUG):\s*([^\n]+)").unwrap(),
    ];
    static ref FINDING_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)(?:found|discovered|noticed|identified):\s*([^\n]+)").unwrap(),
        Regex::new(r"(?i)(?:insight|observation):\s*([^\n]+)").unwrap(),
    ];
}

#[derive(Debug, Clone, Default)]
pub struct FactExtractor;

impl FactExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Scan `conversation` for file paths, code references, decisions,
    /// blockers and findings. Task state and next steps are left empty.
    pub fn extract(&self, conversation: &str) -> CriticalFacts {
        CriticalFacts {
            task_state: String::new(),
            decisions: collect_matches(&DECISION_PATTERNS, conversation, MAX_NOTES_PER_CATEGORY),
            blockers: collect_matches(&BLOCKER_PATTERNS, conversation, MAX_NOTES_PER_CATEGORY),
            file_paths: collect_matches(&FILE_PATH_PATTERNS, conversation, MAX_FILE_PATHS),
            code_refs: collect_matches(&CODE_REF_PATTERNS, conversation, MAX_CODE_REFS),
            key_findings: collect_matches(&FINDING_PATTERNS, conversation, MAX_NOTES_PER_CATEGORY),
            next_steps: Vec::new(),
        }
    }
}

/// First capture group of every match of every pattern, trimmed and
/// deduplicated in first-seen order, cut to `cap`.
fn collect_matches(patterns: &[Regex], text: &str, cap: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut found = Vec::new();

    for pattern in patterns {
        for captures in pattern.captures_iter(text) {
            let Some(value) = captures.get(1).map(|m| m.as_str().trim()) else {
                continue;
            };
            if value.is_empty() || !seen.insert(value.to_string()) {
                continue;
            }
            found.push(value.to_string());
            if found.len() == cap {
                return found;
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_yields_empty_facts() {
        assert_eq!(FactExtractor::new().extract(""), CriticalFacts::default());
    }

    #[test]
    fn test_extracts_each_category() {
        let conversation = "\
I opened `src/main.rs` and file:///home/me/project/lib.rs to check things.
We decided to keep the pool size at ten.
Error: connection refused on port 5432
TODO: add retry around the migration
Found: the cache key ignores the tenant
fn handler lives next to class Router and `parse_args()` calls `config.load`.";

        let facts = FactExtractor::new().extract(conversation);
        assert!(facts.file_paths.contains(&"src/main.rs".to_string()));
        assert!(facts.file_paths.contains(&"home/me/project/lib.rs".to_string()));
        assert_eq!(facts.decisions, vec!["to keep the pool size at ten".to_string()]);
        assert!(facts.blockers.contains(&"connection refused on port 5432".to_string()));
        assert!(facts.blockers.contains(&"add retry around the migration".to_string()));
        assert_eq!(facts.key_findings, vec!["the cache key ignores the tenant".to_string()]);
        assert!(facts.code_refs.contains(&"Router".to_string()));
        assert!(facts.code_refs.contains(&"parse_args".to_string()));
        assert!(facts.code_refs.contains(&"config.load".to_string()));
        assert!(facts.task_state.is_empty());
        assert!(facts.next_steps.is_empty());
    }

    #[test]
    fn test_caps_and_dedup() {
        let mut conversation = String::new();
        for i in 0..40 {
            conversation.push_str(&format!("see `dir/file{}.rs`\n", i));
            conversation.push_str(&format!("issue: flaky case {}\n", i));
        }
        conversation.push_str("see `dir/file0.rs` again\n");

        let facts = FactExtractor::new().extract(&conversation);
        assert_eq!(facts.file_paths.len(), MAX_FILE_PATHS);
        assert_eq!(facts.file_paths[0], "dir/file0.rs");
        assert_eq!(facts.blockers.len(), MAX_NOTES_PER_CATEGORY);
        let unique: HashSet<_> = facts.file_paths.iter().collect();
        assert_eq!(unique.len(), facts.file_paths.len());
    }
}
