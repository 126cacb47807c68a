//! The analysis engine seam: what goes in, what comes out.

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::policy::Policy;

/// One file from a pull request's changed-file listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub filename: String,
    /// Unified diff hunks. Absent for binary and rename-only changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
}

impl ChangedFile {
    pub fn new(filename: impl Into<String>, patch: Option<String>) -> Self {
        Self {
            filename: filename.into(),
            patch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineComment {
    pub path: String,
    /// Line number in the post-change version of `path`.
    pub line: u64,
    pub body: String,
}

/// Structured output of one review. Untrusted: inline comment locations are
/// whatever the engine produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub summary: String,
    pub suggestions: Vec<String>,
    pub release_notes: String,
    pub inline_comments: Vec<InlineComment>,
}

#[async_trait]
pub trait ReviewAnalyzer: Send + Sync {
    /// Review `files` under `policy`.
    ///
    /// Implementations must respect `policy.ai.max_diff_lines`: when the
    /// changed-line count exceeds it, return a result explaining the skip
    /// instead of reviewing.
    async fn analyze(&self, files: &[ChangedFile], policy: &Policy) -> Result<AnalysisResult>;
}

/// Count added and removed lines across all patches. File headers
/// (`+++`/`---`) are not counted.
pub fn count_changed_lines(files: &[ChangedFile]) -> usize {
    files
        .iter()
        .filter_map(|f| f.patch.as_deref())
        .flat_map(str::lines)
        .filter(|line| {
            (line.starts_with('+') && !line.starts_with("+++"))
                || (line.starts_with('-') && !line.starts_with("---"))
        })
        .count()
}

/// Post-change line numbers that a review comment can be attached to: every
/// added or context line of every hunk in `patch`.
pub fn commentable_lines(patch: &str) -> BTreeSet<u64> {
    let mut lines = BTreeSet::new();
    let mut next_line: Option<u64> = None;

    for raw in patch.lines() {
        if raw.starts_with("@@") {
            next_line = parse_hunk_new_start(raw);
            continue;
        }

        let Some(current) = next_line else {
            continue;
        };

        match raw.chars().next() {
            Some('+') | Some(' ') => {
                lines.insert(current);
                next_line = Some(current + 1);
            }
            // An empty line inside a hunk is a context line whose leading
            // space was stripped.
            None => {
                lines.insert(current);
                next_line = Some(current + 1);
            }
            // Removed lines and "\ No newline at end of file" do not advance.
            _ => {}
        }
    }

    lines
}

/// Parse the new-file start from a header like `@@ -10,7 +12,9 @@ fn foo()`.
fn parse_hunk_new_start(header: &str) -> Option<u64> {
    let new_range = header
        .split_whitespace()
        .find(|part| part.starts_with('+'))?;
    let start = new_range
        .trim_start_matches('+')
        .split(',')
        .next()?;
    start.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATCH: &str = "@@ -1,3 +1,4 @@\n fn main() {\n-    old();\n+    new();\n+    more();\n }\n@@ -20,2 +21,3 @@ impl Foo\n a\n+b\n c";

    #[test]
    fn test_count_changed_lines() {
        let files = vec![
            ChangedFile::new("a.rs", Some(PATCH.to_string())),
            ChangedFile::new("image.png", None),
            ChangedFile::new(
                "b.rs",
                Some("--- a/b.rs\n+++ b/b.rs\n@@ -1 +1 @@\n-x\n+y".to_string()),
            ),
        ];
        assert_eq!(count_changed_lines(&files), 6);
    }

    #[test]
    fn test_commentable_lines() {
        let lines = commentable_lines(PATCH);
        let expected: BTreeSet<u64> = [1, 2, 3, 4, 21, 22, 23].into_iter().collect();
        assert_eq!(lines, expected);
    }

    #[test]
    fn test_commentable_lines_ignores_no_newline_marker() {
        let patch = "@@ -5,1 +5,2 @@\n-a\n\\ No newline at end of file\n+b\n+c";
        let expected: BTreeSet<u64> = [5, 6].into_iter().collect();
        assert_eq!(commentable_lines(patch), expected);
    }

    #[test]
    fn test_commentable_lines_of_garbage_is_empty() {
        assert!(commentable_lines("not a diff").is_empty());
        assert!(commentable_lines("@@ nonsense @@\n+a").is_empty());
    }

    #[test]
    fn test_analysis_result_uses_camel_case() {
        let json = serde_json::json!({
            "summary": "s",
            "suggestions": ["a"],
            "releaseNotes": "r",
            "inlineComments": [{"path": "a.rs", "line": 3, "body": "b"}],
        });
        let result: AnalysisResult = serde_json::from_value(json).unwrap();
        assert_eq!(result.release_notes, "r");
        assert_eq!(result.inline_comments[0].line, 3);
    }
}
