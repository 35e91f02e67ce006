//! Keyword-scored scope classification.
//!
//! A learning is `GLOBAL` when it talks mostly about platforms, tooling
//! ecosystems, or cross-cutting hazards, and `PROJECT` when it talks about
//! paths and config files inside one repository. Low-signal text and ties
//! default to `PROJECT`.
//!
//! Each term counts at most once against the lowercased concatenation of
//! content, context, and tags. Global terms match whole words (a trailing
//! `s` is allowed, so `hook` also matches `hooks`); project terms are path
//! fragments and file names and match anywhere.

use crate::models::Scope;

/// Terms that point at knowledge useful across projects.
///
/// No term may be a word-prefix of another, or one mention would score twice.
pub const GLOBAL_TERMS: &[&str] = &[
    // platforms
    "windows",
    "linux",
    "macos",
    "darwin",
    "posix",
    "platform",
    "wsl",
    "mingw",
    "cygwin",
    "powershell",
    "cmd.exe",
    // agent tooling
    "hook",
    "skill",
    "mcp",
    "claude code",
    "subagent",
    "agent",
    "spawn",
    "embedding",
    // languages and runtimes
    "python",
    "typescript",
    "javascript",
    "rust",
    "golang",
    "async",
    "await",
    "promise",
    "generator",
    "decorator",
    // ecosystem tools
    "git",
    "npm",
    "pip",
    "docker",
    "kubernetes",
    "postgres",
    "redis",
    // hazards
    "segfault",
    "stack overflow",
    "memory leak",
    "race condition",
];

/// Terms that point at one source tree.
pub const PROJECT_TERMS: &[&str] = &[
    "src/",
    "lib/",
    "app/",
    "components/",
    "pages/",
    "routes/",
    "test/",
    "tests/",
    "spec/",
    "__tests__/",
    "package.json",
    "tsconfig",
    "pyproject.toml",
    "cargo.toml",
];

/// Minimum number of global hits before `GLOBAL` is considered.
pub const MIN_GLOBAL_HITS: usize = 2;

/// Both scores computed by [`score_scope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeScores {
    pub global: usize,
    pub project: usize,
}

impl ScopeScores {
    pub fn scope(&self) -> Scope {
        if self.global > self.project && self.global >= MIN_GLOBAL_HITS {
            Scope::Global
        } else {
            Scope::Project
        }
    }
}

pub fn score_scope(content: &str, tags: &[String], context: Option<&str>) -> ScopeScores {
    let mut combined = content.to_lowercase();
    if let Some(ctx) = context {
        combined.push(' ');
        combined.push_str(&ctx.to_lowercase());
    }
    if !tags.is_empty() {
        combined.push(' ');
        combined.push_str(&tags.join(" ").to_lowercase());
    }

    ScopeScores {
        global: GLOBAL_TERMS
            .iter()
            .filter(|t| contains_word(&combined, t))
            .count(),
        project: PROJECT_TERMS
            .iter()
            .filter(|t| combined.contains(*t))
            .count(),
    }
}

/// Whether `term` occurs in `text` with no letter or digit on either side,
/// allowing a single plural `s` after it.
fn contains_word(text: &str, term: &str) -> bool {
    let is_word = |c: char| c.is_alphanumeric();
    text.match_indices(term).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        if before.is_some_and(is_word) {
            return false;
        }
        let mut after = text[start + term.len()..].chars();
        match after.next() {
            None => true,
            Some('s') => !after.next().is_some_and(is_word),
            Some(c) => !is_word(c),
        }
    })
}

/// Classify a learning as `PROJECT` or `GLOBAL`.
///
/// `GLOBAL` iff the global score is strictly greater than the project
/// score and at least [`MIN_GLOBAL_HITS`].
pub fn classify_scope(content: &str, tags: &[String], context: Option<&str>) -> Scope {
    score_scope(content, tags, context).scope()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_tooling_is_global() {
        assert_eq!(
            classify_scope("Windows WSL hooks subagent spawn pattern", &[], None),
            Scope::Global
        );
    }

    #[test]
    fn test_source_paths_are_project() {
        assert_eq!(
            classify_scope("update src/components/Button.tsx test spec", &[], None),
            Scope::Project
        );
    }

    #[test]
    fn test_single_global_hit_stays_project() {
        let scores = score_scope("Prefer docker for local runs", &[], None);
        assert_eq!(scores.global, 1);
        assert_eq!(scores.scope(), Scope::Project);
    }

    #[test]
    fn test_tie_defaults_to_project() {
        // two global terms, two project terms
        let scores = score_scope("docker redis in src/ and lib/", &[], None);
        assert_eq!(scores.global, 2);
        assert_eq!(scores.project, 2);
        assert_eq!(scores.scope(), Scope::Project);
    }

    #[test]
    fn test_tags_and_context_contribute() {
        let tags = vec!["Docker".to_string(), "Kubernetes".to_string()];
        assert_eq!(
            classify_scope("container restarts", &tags, None),
            Scope::Global
        );
        assert_eq!(
            classify_scope("container restarts", &[], Some("Docker on Kubernetes")),
            Scope::Global
        );
    }

    #[test]
    fn test_repeated_term_counts_once() {
        let scores = score_scope("docker docker docker", &[], None);
        assert_eq!(scores.global, 1);
    }

    #[test]
    fn test_plural_scores_once_and_ties_with_a_path() {
        let scores = score_scope("Add hooks to src/app.ts", &[], None);
        assert_eq!(scores.global, 1);
        assert_eq!(scores.project, 1);
        assert_eq!(scores.scope(), Scope::Project);
    }

    #[test]
    fn test_compound_word_does_not_match_its_suffix() {
        let scores = score_scope("The subagent", &[], None);
        assert_eq!(scores.global, 1);
        assert_eq!(scores.scope(), Scope::Project);
    }

    #[test]
    fn test_terms_inside_longer_words_do_not_count() {
        let scores = score_scope("Pipeline digits are good, trust the category", &[], None);
        assert_eq!(scores.global, 0);
        assert_eq!(scores.scope(), Scope::Project);
    }

    #[test]
    fn test_no_global_term_prefixes_another() {
        for a in GLOBAL_TERMS {
            for b in GLOBAL_TERMS {
                if a != b {
                    assert!(
                        !contains_word(b, a),
                        "'{}' also matches inside '{}'",
                        a,
                        b
                    );
                }
            }
        }
    }

    #[test]
    fn test_memory_leak_counts_once() {
        assert_eq!(score_scope("memory leak in the worker", &[], None).global, 1);
    }

    #[test]
    fn test_empty_text_is_project() {
        assert_eq!(classify_scope("", &[], None), Scope::Project);
    }
}
