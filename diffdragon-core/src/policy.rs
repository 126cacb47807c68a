//! Per-repository review policy.
//!
//! A repository opts into custom behaviour by committing a YAML document at one
//! of [`POLICY_PATHS`]. The document is partial: anything it leaves out falls
//! back to [`Policy::default`]. Every failure while reading it degrades to the
//! default policy rather than blocking a review.

use std::collections::BTreeSet;
use std::fmt;

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Repository paths checked for a policy document, in priority order.
pub const POLICY_PATHS: &[&str] = &[".github/diff-dragon.yaml", ".github/diff-dragon.yml"];

/// Areas the analysis engine is asked to concentrate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FocusArea {
    Bugs,
    Security,
    Performance,
    BestPractices,
    Style,
    Documentation,
}

impl fmt::Display for FocusArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bugs => "bugs",
            Self::Security => "security",
            Self::Performance => "performance",
            Self::BestPractices => "best-practices",
            Self::Style => "style",
            Self::Documentation => "documentation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    Lenient,
    Balanced,
    Strict,
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Lenient => "lenient",
            Self::Balanced => "balanced",
            Self::Strict => "strict",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentPolicy {
    /// Post review comments on individual lines.
    pub inline: bool,
    /// Post (or update) a single summary comment on the PR.
    pub summary: bool,
    pub max_inline_comments: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiPolicy {
    pub focus_areas: BTreeSet<FocusArea>,
    pub strictness: Strictness,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
    /// Changed-line budget for one review. `None` means unlimited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_diff_lines: Option<usize>,
}

/// The effective review configuration for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub enabled: bool,
    pub review_on: BTreeSet<String>,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub comments: CommentPolicy,
    pub ai: AiPolicy,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            enabled: true,
            review_on: ["opened", "reopened", "synchronize"]
                .into_iter()
                .map(String::from)
                .collect(),
            include_patterns: vec!["**/*".to_string()],
            exclude_patterns: [
                "**/node_modules/**",
                "**/dist/**",
                "**/build/**",
                "**/*.min.js",
                "**/*.lock",
                "**/package-lock.json",
                "**/yarn.lock",
                "**/pnpm-lock.yaml",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            comments: CommentPolicy {
                inline: true,
                summary: true,
                max_inline_comments: 10,
            },
            ai: AiPolicy {
                focus_areas: [
                    FocusArea::Bugs,
                    FocusArea::Security,
                    FocusArea::Performance,
                    FocusArea::BestPractices,
                ]
                .into_iter()
                .collect(),
                strictness: Strictness::Balanced,
                custom_instructions: None,
                max_diff_lines: None,
            },
        }
    }
}

/// A policy document as written by a user: every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialPolicy {
    pub enabled: Option<bool>,
    pub review_on: Option<BTreeSet<String>>,
    pub include_patterns: Option<Vec<String>>,
    pub exclude_patterns: Option<Vec<String>>,
    pub comments: Option<PartialCommentPolicy>,
    pub ai: Option<PartialAiPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialCommentPolicy {
    pub inline: Option<bool>,
    pub summary: Option<bool>,
    pub max_inline_comments: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialAiPolicy {
    pub focus_areas: Option<BTreeSet<FocusArea>>,
    pub strictness: Option<Strictness>,
    pub custom_instructions: Option<String>,
    pub max_diff_lines: Option<usize>,
}

/// Parse a YAML policy document and merge it over the default policy.
///
/// Never fails: unparseable documents, and documents whose root is not a
/// mapping, yield the default policy.
pub fn parse(raw_document: &str) -> Policy {
    let value: serde_yaml::Value = match serde_yaml::from_str(raw_document) {
        Ok(value) => value,
        Err(e) => {
            warn!("Error parsing policy YAML, falling back to defaults: {}", e);
            return Policy::default();
        }
    };

    if !value.is_mapping() {
        warn!("Policy document is not a mapping, using defaults");
        return Policy::default();
    }

    match serde_yaml::from_value::<PartialPolicy>(value) {
        Ok(user) => {
            info!("Successfully parsed repository policy");
            merge(&Policy::default(), user)
        }
        Err(e) => {
            warn!("Invalid policy document, falling back to defaults: {}", e);
            Policy::default()
        }
    }
}

/// Overlay a user document on `default`.
///
/// Top-level keys replace wholesale; `comments` and `ai` merge field by field.
pub fn merge(default: &Policy, user: PartialPolicy) -> Policy {
    let comments = user.comments.unwrap_or_default();
    let ai = user.ai.unwrap_or_default();

    Policy {
        enabled: user.enabled.unwrap_or(default.enabled),
        review_on: user.review_on.unwrap_or_else(|| default.review_on.clone()),
        include_patterns: user
            .include_patterns
            .unwrap_or_else(|| default.include_patterns.clone()),
        exclude_patterns: user
            .exclude_patterns
            .unwrap_or_else(|| default.exclude_patterns.clone()),
        comments: CommentPolicy {
            inline: comments.inline.unwrap_or(default.comments.inline),
            summary: comments.summary.unwrap_or(default.comments.summary),
            max_inline_comments: comments
                .max_inline_comments
                .unwrap_or(default.comments.max_inline_comments),
        },
        ai: AiPolicy {
            focus_areas: ai
                .focus_areas
                .unwrap_or_else(|| default.ai.focus_areas.clone()),
            strictness: ai.strictness.unwrap_or(default.ai.strictness),
            custom_instructions: ai
                .custom_instructions
                .or_else(|| default.ai.custom_instructions.clone()),
            max_diff_lines: ai.max_diff_lines.or(default.ai.max_diff_lines),
        },
    }
}

/// Whether a pull-request event with `action` should trigger a review at all.
pub fn should_review(policy: &Policy, action: &str) -> bool {
    if !policy.enabled {
        info!("Reviews are disabled by repository policy");
        return false;
    }

    if !policy.review_on.contains(action) {
        info!("Action '{}' not in reviewOn list", action);
        return false;
    }

    true
}

/// Whether `path` is in scope under `policy`.
///
/// Compiles the policy's patterns on every call; use [`FileFilter`] when
/// checking many paths.
pub fn should_review_file(policy: &Policy, path: &str) -> bool {
    FileFilter::new(policy).should_review(path)
}

/// Compiled include/exclude patterns of a policy.
#[derive(Debug, Clone)]
pub struct FileFilter {
    include: Option<GlobSet>,
    exclude: GlobSet,
}

impl FileFilter {
    pub fn new(policy: &Policy) -> Self {
        let include = if policy.include_patterns.is_empty() {
            None
        } else {
            Some(compile_patterns(&policy.include_patterns))
        };

        Self {
            include,
            exclude: compile_patterns(&policy.exclude_patterns),
        }
    }

    /// Exclusions win over inclusions. With no include patterns every
    /// non-excluded path is in scope.
    pub fn should_review(&self, path: &str) -> bool {
        if self.exclude.is_match(path) {
            return false;
        }

        match &self.include {
            Some(include) => include.is_match(path),
            None => true,
        }
    }
}

/// Compile a single glob with path-aware semantics: `*` and `?` never cross
/// `/`, `**` spans any number of whole segments (including none), and the
/// whole path must match.
pub fn compile_glob(pattern: &str) -> Result<Glob, globset::Error> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .backslash_escape(true)
        .build()
}

fn compile_patterns(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match compile_glob(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => {
                // An unusable pattern matches nothing.
                warn!("Ignoring invalid glob pattern '{}': {}", pattern, e);
            }
        }
    }

    builder.build().unwrap_or_else(|e| {
        warn!("Failed to build glob set, no patterns will match: {}", e);
        GlobSet::empty()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy_with(include: &[&str], exclude: &[&str]) -> Policy {
        Policy {
            include_patterns: include.iter().map(|s| s.to_string()).collect(),
            exclude_patterns: exclude.iter().map(|s| s.to_string()).collect(),
            ..Policy::default()
        }
    }

    #[test]
    fn test_parse_empty_document_yields_default() {
        assert_eq!(parse(""), Policy::default());
    }

    #[test]
    fn test_parse_scalar_document_yields_default() {
        assert_eq!(parse("just a string"), Policy::default());
        assert_eq!(parse("42"), Policy::default());
    }

    #[test]
    fn test_parse_invalid_yaml_yields_default() {
        assert_eq!(parse("enabled: [unterminated"), Policy::default());
    }

    #[test]
    fn test_parse_wrong_type_yields_default() {
        assert_eq!(parse("comments:\n  maxInlineComments: lots\n"), Policy::default());
    }

    #[test]
    fn test_parse_unknown_focus_area_yields_default() {
        assert_eq!(parse("ai:\n  focusAreas: [vibes]\n"), Policy::default());
    }

    #[test]
    fn test_parse_full_document() {
        let doc = r#"
enabled: true
reviewOn: [opened]
includePatterns:
  - "src/**/*.rs"
excludePatterns: []
comments:
  inline: false
  maxInlineComments: 3
ai:
  focusAreas: [security, style]
  strictness: strict
  customInstructions: "Be terse."
  maxDiffLines: 500
"#;
        let policy = parse(doc);

        assert!(policy.enabled);
        assert_eq!(policy.review_on, BTreeSet::from(["opened".to_string()]));
        assert_eq!(policy.include_patterns, vec!["src/**/*.rs".to_string()]);
        assert!(policy.exclude_patterns.is_empty());
        assert!(!policy.comments.inline);
        // Not given, so inherited field by field.
        assert!(policy.comments.summary);
        assert_eq!(policy.comments.max_inline_comments, 3);
        assert_eq!(
            policy.ai.focus_areas,
            BTreeSet::from([FocusArea::Security, FocusArea::Style])
        );
        assert_eq!(policy.ai.strictness, Strictness::Strict);
        assert_eq!(policy.ai.custom_instructions.as_deref(), Some("Be terse."));
        assert_eq!(policy.ai.max_diff_lines, Some(500));
    }

    #[test]
    fn test_merge_empty_user_document_is_default() {
        let default = Policy::default();
        assert_eq!(merge(&default, PartialPolicy::default()), default);
    }

    #[test]
    fn test_merge_ai_keeps_unspecified_defaults() {
        let user = PartialPolicy {
            ai: Some(PartialAiPolicy {
                strictness: Some(Strictness::Lenient),
                ..PartialAiPolicy::default()
            }),
            ..PartialPolicy::default()
        };
        let merged = merge(&Policy::default(), user);

        assert_eq!(merged.ai.strictness, Strictness::Lenient);
        assert_eq!(merged.ai.focus_areas, Policy::default().ai.focus_areas);
    }

    #[test]
    fn test_merge_top_level_lists_replace_wholesale() {
        let user = PartialPolicy {
            exclude_patterns: Some(vec!["docs/**".to_string()]),
            ..PartialPolicy::default()
        };
        let merged = merge(&Policy::default(), user);
        assert_eq!(merged.exclude_patterns, vec!["docs/**".to_string()]);
    }

    #[test]
    fn test_should_review_disabled() {
        let policy = Policy {
            enabled: false,
            ..Policy::default()
        };
        assert!(!should_review(&policy, "opened"));
    }

    #[test]
    fn test_should_review_action_gate() {
        let policy = Policy::default();
        assert!(should_review(&policy, "opened"));
        assert!(should_review(&policy, "synchronize"));
        assert!(!should_review(&policy, "closed"));
        assert!(!should_review(&policy, "edited"));
    }

    #[test]
    fn test_default_policy_filters() {
        let policy = Policy::default();
        assert!(should_review_file(&policy, "README.md"));
        assert!(should_review_file(&policy, "src/lib.rs"));
        assert!(!should_review_file(&policy, "node_modules/left-pad/index.js"));
        assert!(!should_review_file(&policy, "web/node_modules/x/y.js"));
        assert!(!should_review_file(&policy, "Cargo.lock"));
        assert!(!should_review_file(&policy, "static/app.min.js"));
        assert!(!should_review_file(&policy, "dist/bundle.js"));
        assert!(!should_review_file(&policy, "packages/a/yarn.lock"));
    }

    #[test]
    fn test_single_star_does_not_cross_separator() {
        let policy = policy_with(&["src/*.rs"], &[]);
        assert!(should_review_file(&policy, "src/main.rs"));
        assert!(!should_review_file(&policy, "src/bin/tool.rs"));
    }

    #[test]
    fn test_double_star_matches_zero_segments() {
        let policy = policy_with(&["src/**/*.rs"], &[]);
        assert!(should_review_file(&policy, "src/main.rs"));
        assert!(should_review_file(&policy, "src/a/b/c.rs"));
        assert!(!should_review_file(&policy, "tests/a.rs"));
    }

    #[test]
    fn test_question_mark_matches_one_character() {
        let policy = policy_with(&["v?.txt"], &[]);
        assert!(should_review_file(&policy, "v1.txt"));
        assert!(!should_review_file(&policy, "v10.txt"));
        assert!(!should_review_file(&policy, "v.txt"));
    }

    #[test]
    fn test_dot_is_literal_and_match_is_anchored() {
        let policy = policy_with(&["*.md"], &[]);
        assert!(should_review_file(&policy, "README.md"));
        assert!(!should_review_file(&policy, "READMEmd"));
        assert!(!should_review_file(&policy, "README.md.bak"));
        assert!(!should_review_file(&policy, "docs/README.md"));
    }

    #[test]
    fn test_empty_include_list_includes_everything_not_excluded() {
        let policy = policy_with(&[], &["**/*.snap"]);
        assert!(should_review_file(&policy, "anything/at/all.txt"));
        assert!(!should_review_file(&policy, "tests/snapshots/a.snap"));
    }

    #[test]
    fn test_invalid_pattern_is_ignored() {
        let policy = policy_with(&["src/[.rs", "src/**"], &[]);
        assert!(should_review_file(&policy, "src/main.rs"));
        assert!(!should_review_file(&policy, "lib/main.rs"));
    }

    fn path_segment() -> impl Strategy<Value = String> {
        "[a-z]{1,6}(\\.[a-z]{1,3})?"
    }

    fn file_path() -> impl Strategy<Value = String> {
        proptest::collection::vec(path_segment(), 1..5).prop_map(|segments| segments.join("/"))
    }

    proptest! {
        /// An exclude pattern matching the path always wins over includes.
        #[test]
        fn exclude_takes_precedence(path in file_path(), include in proptest::collection::vec("[a-z*/]{1,8}", 0..4)) {
            let mut include = include;
            include.push("**".to_string());
            let policy = Policy {
                include_patterns: include,
                exclude_patterns: vec![path.clone()],
                ..Policy::default()
            };
            prop_assert!(!should_review_file(&policy, &path));
        }

        /// With no include patterns, everything not excluded is reviewed.
        #[test]
        fn no_includes_means_everything(path in file_path()) {
            let policy = Policy {
                include_patterns: vec![],
                exclude_patterns: vec!["zzzz/**".to_string()],
                ..Policy::default()
            };
            prop_assert!(should_review_file(&policy, &path));
        }

        /// Merging never drops a default field the user did not set.
        #[test]
        fn merge_preserves_unset_defaults(enabled in proptest::option::of(any::<bool>()), max in proptest::option::of(0usize..100)) {
            let default = Policy::default();
            let user = PartialPolicy {
                enabled,
                comments: Some(PartialCommentPolicy {
                    max_inline_comments: max,
                    ..PartialCommentPolicy::default()
                }),
                ..PartialPolicy::default()
            };
            let merged = merge(&default, user);

            prop_assert_eq!(merged.enabled, enabled.unwrap_or(default.enabled));
            prop_assert_eq!(merged.comments.max_inline_comments, max.unwrap_or(10));
            prop_assert_eq!(merged.comments.inline, default.comments.inline);
            prop_assert_eq!(merged.comments.summary, default.comments.summary);
            prop_assert_eq!(&merged.review_on, &default.review_on);
            prop_assert_eq!(&merged.include_patterns, &default.include_patterns);
            prop_assert_eq!(&merged.exclude_patterns, &default.exclude_patterns);
            prop_assert_eq!(&merged.ai, &default.ai);
        }
    }
}
