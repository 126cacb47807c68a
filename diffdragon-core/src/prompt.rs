use crate::analysis::ChangedFile;
use crate::policy::{Policy, Strictness};

const BASE_SYSTEM_PROMPT: &str = "You are Diff Dragon, an experienced software engineer reviewing a pull request. \
You are given the unified diff of every changed file. Review only what the diff changes. \
Respond with JSON matching the provided schema: a short summary of the change, a list of \
concrete suggestions, release notes suitable for a changelog, and inline comments. \
Each inline comment must name a file from the diff and a line number from the new version \
of that file which appears in the diff as an added or unchanged line.";

/// System prompt tuned to the repository's AI policy.
pub fn system_prompt(policy: &Policy) -> String {
    let mut prompt = String::from(BASE_SYSTEM_PROMPT);

    let focus = policy
        .ai
        .focus_areas
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    if !focus.is_empty() {
        prompt.push_str("\n\nConcentrate on: ");
        prompt.push_str(&focus.join(", "));
        prompt.push('.');
    }

    prompt.push_str("\n\n");
    prompt.push_str(match policy.ai.strictness {
        Strictness::Lenient => {
            "Only comment on clear defects. Do not comment on style or minor improvements."
        }
        Strictness::Balanced => {
            "Comment on defects and on improvements that are clearly worth the author's time."
        }
        Strictness::Strict => {
            "Hold the change to a high bar. Point out defects, risky patterns and maintainability problems."
        }
    });

    if let Some(custom) = policy.ai.custom_instructions.as_deref() {
        let custom = custom.trim();
        if !custom.is_empty() {
            prompt.push_str("\n\nAdditional instructions from the repository owners:\n");
            prompt.push_str(custom);
        }
    }

    prompt
}

/// User prompt carrying every file's patch.
pub fn user_prompt(files: &[ChangedFile]) -> String {
    let mut prompt = String::from("Below are the changed files of the pull request.\n");

    for file in files {
        match &file.patch {
            Some(patch) => {
                prompt.push_str(&format!("\n=== {} ===\n{}\n", file.filename, patch));
            }
            None => {
                prompt.push_str(&format!(
                    "\n=== {} ===\n(binary or renamed without content changes; no diff available)\n",
                    file.filename
                ));
            }
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::FocusArea;

    #[test]
    fn test_system_prompt_reflects_policy() {
        let mut policy = Policy::default();
        policy.ai.focus_areas = [FocusArea::Security, FocusArea::Documentation]
            .into_iter()
            .collect();
        policy.ai.strictness = Strictness::Strict;
        policy.ai.custom_instructions = Some("  Prefer iterators.  ".to_string());

        let prompt = system_prompt(&policy);
        assert!(prompt.contains("Concentrate on: security, documentation."));
        assert!(prompt.contains("high bar"));
        assert!(prompt.ends_with("Prefer iterators."));
    }

    #[test]
    fn test_system_prompt_omits_blank_custom_instructions() {
        let mut policy = Policy::default();
        policy.ai.custom_instructions = Some("   ".to_string());
        assert!(!system_prompt(&policy).contains("Additional instructions"));
    }

    #[test]
    fn test_user_prompt() {
        let files = vec![
            ChangedFile::new("src/lib.rs", Some("@@ -1 +1 @@\n-a\n+b".to_string())),
            ChangedFile::new("logo.png", None),
        ];
        insta::assert_snapshot!(user_prompt(&files).trim_end(), @r###"
        Below are the changed files of the pull request.

        === src/lib.rs ===
        @@ -1 +1 @@
        -a
        +b

        === logo.png ===
        (binary or renamed without content changes; no diff available)
        "###);
    }
}
