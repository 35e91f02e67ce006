//! Context assembly: the read path.
//!
//! Given a task description, derive a coarse task category and a handful
//! of keywords, issue three retrieval queries, bucket the hits by their
//! stored learning type, and render a markdown report.
//!
//! ```text
//!  task description
//!        │
//!        ├── classify_task ──► category
//!        └── extract_keywords ─► keywords
//!                     │
//!        build_queries (similar / failures / patterns)
//!                     │
//!     ┌───────────────┼────────────────┐
//!   k=5             k=3              k=3
//!     └──── categorize (5 / 3 / 3) ────┘
//!                     │
//!              render_markdown
//! ```
//!
//! Retrieval uses vector search when an embedder is supplied and the
//! store has vectors, and text search otherwise.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::embedding::{normalize_embedding, Embedder};
use crate::models::{LearningType, MemoryHit};
use crate::store::{MemoryStore, Visibility};

pub const SIMILAR_K: usize = 5;
pub const FAILURES_K: usize = 3;
pub const PATTERNS_K: usize = 3;

pub const MAX_SOLUTIONS: usize = 5;
pub const MAX_AVOID: usize = 3;
pub const MAX_PATTERNS: usize = 3;

const MAX_KEYWORDS: usize = 10;
const QUERY_KEYWORDS: usize = 5;

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "could", "should", "may", "might", "must", "shall",
    "to", "of", "in", "for", "on", "with", "at", "by", "from", "as", "into", "through",
    "during", "before", "after", "above", "below", "between", "under", "again", "further",
    "then", "once", "and", "but", "or", "nor", "so", "yet", "both", "either", "neither", "not",
    "only", "own", "same", "than", "too", "very", "just", "also", "now", "here", "there",
    "when", "where", "why", "how", "all", "each", "few", "more", "most", "other", "some",
    "such", "no", "any", "this", "that", "these", "those", "it",
];

/// Coarse kind of work a task describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskCategory {
    Test,
    Fix,
    Refactor,
    Implement,
    Update,
    Delete,
    Debug,
}

impl TaskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskCategory::Test => "test",
            TaskCategory::Fix => "fix",
            TaskCategory::Refactor => "refactor",
            TaskCategory::Implement => "implement",
            TaskCategory::Update => "update",
            TaskCategory::Delete => "delete",
            TaskCategory::Debug => "debug",
        }
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Buckets in priority order; the first bucket with a substring hit wins.
///
/// Because matching is by substring, "debug" contains "bug" and always
/// lands in `Fix`. `Debug` is only reached through "investigate" or
/// "diagnose".
const CATEGORY_BUCKETS: &[(TaskCategory, &[&str])] = &[
    (
        TaskCategory::Test,
        &["test", "spec", "assert", "expect", "mock"],
    ),
    (
        TaskCategory::Fix,
        &["fix", "bug", "error", "issue", "broken"],
    ),
    (
        TaskCategory::Refactor,
        &["refactor", "clean", "reorganize", "restructure"],
    ),
    (
        TaskCategory::Implement,
        &["add", "create", "implement", "build", "new"],
    ),
    (
        TaskCategory::Update,
        &["update", "modify", "change", "enhance"],
    ),
    (TaskCategory::Delete, &["delete", "remove", "drop"]),
    (
        TaskCategory::Debug,
        &["debug", "investigate", "diagnose"],
    ),
];

/// Map a task description onto a [`TaskCategory`]. Defaults to `Implement`.
pub fn classify_task(description: &str) -> TaskCategory {
    let lowered = description.to_lowercase();
    CATEGORY_BUCKETS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lowered.contains(w)))
        .map(|(category, _)| *category)
        .unwrap_or(TaskCategory::Implement)
}

/// Up to ten lowercase, alphanumeric, non-stopword keywords in order.
pub fn extract_keywords(description: &str) -> Vec<String> {
    description
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.chars().count() > 2)
        .map(|w| w.trim_matches(|c: char| ".,;:!?()[]{}\"'".contains(c)))
        .filter(|w| !w.is_empty() && w.chars().all(char::is_alphanumeric))
        .filter(|w| !STOPWORDS.contains(w))
        .take(MAX_KEYWORDS)
        .map(str::to_string)
        .collect()
}

/// The three queries issued for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextQueries {
    pub similar_tasks: String,
    pub failures: String,
    pub patterns: String,
}

pub fn build_queries(category: TaskCategory, keywords: &[String], project_name: &str) -> ContextQueries {
    let top: Vec<&str> = keywords
        .iter()
        .take(QUERY_KEYWORDS)
        .map(String::as_str)
        .collect();
    ContextQueries {
        similar_tasks: format!("{} {}", category, top.join(" ")),
        failures: format!("{} errors failures", category),
        patterns: format!("{} patterns conventions", project_name),
    }
}

/// Hits bucketed for the report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CategorizedLearnings {
    pub solutions: Vec<MemoryHit>,
    pub avoid: Vec<MemoryHit>,
    pub patterns: Vec<MemoryHit>,
}

impl CategorizedLearnings {
    pub fn is_empty(&self) -> bool {
        self.solutions.is_empty() && self.avoid.is_empty() && self.patterns.is_empty()
    }

    pub fn counts(&self) -> LearningCounts {
        LearningCounts {
            working_solutions: self.solutions.len(),
            failed_approaches: self.avoid.len(),
            codebase_patterns: self.patterns.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LearningCounts {
    pub working_solutions: usize,
    pub failed_approaches: usize,
    pub codebase_patterns: usize,
}

fn push_unique(bucket: &mut Vec<MemoryHit>, hit: MemoryHit) {
    if !bucket.iter().any(|h| h.id == hit.id) {
        bucket.push(hit);
    }
}

/// Bucket the three result lists.
///
/// `FAILED_APPROACH` from any query goes to avoid, `CODEBASE_PATTERN` from
/// the patterns query goes to patterns, and everything else from the
/// similar query goes to solutions. Buckets are capped at 5 / 3 / 3.
pub fn categorize(
    similar: Vec<MemoryHit>,
    failures: Vec<MemoryHit>,
    patterns: Vec<MemoryHit>,
) -> CategorizedLearnings {
    let mut out = CategorizedLearnings::default();

    for hit in similar {
        if hit.learning_type() == Some(LearningType::FailedApproach) {
            push_unique(&mut out.avoid, hit);
        } else {
            push_unique(&mut out.solutions, hit);
        }
    }
    for hit in failures {
        if hit.learning_type() == Some(LearningType::FailedApproach) {
            push_unique(&mut out.avoid, hit);
        }
    }
    for hit in patterns {
        match hit.learning_type() {
            Some(LearningType::CodebasePattern) => push_unique(&mut out.patterns, hit),
            Some(LearningType::FailedApproach) => push_unique(&mut out.avoid, hit),
            _ => {}
        }
    }

    out.solutions.truncate(MAX_SOLUTIONS);
    out.avoid.truncate(MAX_AVOID);
    out.patterns.truncate(MAX_PATTERNS);
    out
}

fn push_entry_body(lines: &mut Vec<String>, content: &str) {
    lines.push(String::new());
    lines.push(content.to_string());
    lines.push(String::new());
    lines.push("---".to_string());
    lines.push(String::new());
}

fn push_scored_header(lines: &mut Vec<String>, index: usize, label: &str, hit: &MemoryHit) {
    lines.push(format!("### {}. [{}]", index, label));
    lines.push(format!(
        "**Similarity:** {:.2} | **When:** {}",
        hit.similarity,
        hit.created_at.format("%Y-%m-%d")
    ));
    if let Some(context) = hit.metadata.context.as_deref().filter(|c| !c.is_empty()) {
        lines.push(format!("**Context:** {}", context));
    }
}

/// Render the report. Output depends only on the arguments.
pub fn render_markdown(
    task_description: &str,
    learnings: &CategorizedLearnings,
    recalled_at: DateTime<Utc>,
) -> String {
    let mut lines = vec![
        format!("# Relevant Learnings for: {}", task_description),
        String::new(),
        format!("*Recalled at {}*", recalled_at.format("%Y-%m-%d %H:%M UTC")),
        String::new(),
    ];

    if !learnings.solutions.is_empty() {
        lines.push("## What Worked Before".to_string());
        lines.push(String::new());
        for (i, hit) in learnings.solutions.iter().enumerate() {
            let label = hit
                .learning_type()
                .unwrap_or(LearningType::WorkingSolution);
            push_scored_header(&mut lines, i + 1, label.as_str(), hit);
            push_entry_body(&mut lines, &hit.content);
        }
    }

    if !learnings.avoid.is_empty() {
        lines.push("## What To Avoid".to_string());
        lines.push(String::new());
        for (i, hit) in learnings.avoid.iter().enumerate() {
            push_scored_header(&mut lines, i + 1, LearningType::FailedApproach.as_str(), hit);
            push_entry_body(&mut lines, &hit.content);
        }
    }

    if !learnings.patterns.is_empty() {
        lines.push("## Codebase Patterns".to_string());
        lines.push(String::new());
        for (i, hit) in learnings.patterns.iter().enumerate() {
            lines.push(format!(
                "### {}. [{}]",
                i + 1,
                LearningType::CodebasePattern.as_str()
            ));
            if !hit.metadata.tags.is_empty() {
                lines.push(format!("**Tags:** {}", hit.metadata.tags.join(", ")));
            }
            push_entry_body(&mut lines, &hit.content);
        }
    }

    if learnings.is_empty() {
        lines.push("## No Relevant Learnings Found".to_string());
        lines.push(String::new());
        lines.push(
            "This appears to be a new type of task. Document learnings after completion!"
                .to_string(),
        );
        lines.push(String::new());
    }

    lines.join("\n")
}

/// Inputs for one assembly.
#[derive(Debug, Clone)]
pub struct ContextRequest {
    pub task_description: String,
    pub project_name: String,
    pub visibility: Visibility,
    /// Width vectors are fitted to before a vector query.
    pub dimension: usize,
}

/// Machine-readable side of a report.
#[derive(Debug, Clone, Serialize)]
pub struct ContextSummary {
    pub task_category: TaskCategory,
    pub keywords: Vec<String>,
    pub memory_queries: ContextQueries,
    pub learnings_count: LearningCounts,
    /// `"vector"` or `"text"`.
    pub retrieval: &'static str,
    /// Queries that failed and were treated as empty.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub query_errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ContextReport {
    pub markdown: String,
    pub summary: ContextSummary,
    pub learnings: CategorizedLearnings,
}

enum Retrieval<'a> {
    Vector(&'a dyn Embedder),
    Text,
}

async fn run_query(
    store: &dyn MemoryStore,
    retrieval: &Retrieval<'_>,
    request: &ContextRequest,
    query: &str,
    k: usize,
) -> anyhow::Result<Vec<MemoryHit>> {
    match retrieval {
        Retrieval::Vector(embedder) => match embedder.embed(query).await {
            Ok(native) => {
                let vector = normalize_embedding(&native, request.dimension);
                store.nearest(&vector, k, &request.visibility).await
            }
            Err(_) => store.search_text(query, k, &request.visibility).await,
        },
        Retrieval::Text => store.search_text(query, k, &request.visibility).await,
    }
}

/// Run the three queries against `store` and render the report.
///
/// A failing query contributes no hits and is recorded in
/// [`ContextSummary::query_errors`]; assembly itself does not fail.
pub async fn assemble(
    store: &dyn MemoryStore,
    embedder: Option<&dyn Embedder>,
    request: &ContextRequest,
    recalled_at: DateTime<Utc>,
) -> ContextReport {
    let category = classify_task(&request.task_description);
    let keywords = extract_keywords(&request.task_description);
    let queries = build_queries(category, &keywords, &request.project_name);

    let retrieval = match embedder {
        Some(e) if store.supports_vectors() => Retrieval::Vector(e),
        _ => Retrieval::Text,
    };

    let mut query_errors = Vec::new();
    let mut results = Vec::with_capacity(3);
    for (query, k) in [
        (&queries.similar_tasks, SIMILAR_K),
        (&queries.failures, FAILURES_K),
        (&queries.patterns, PATTERNS_K),
    ] {
        match run_query(store, &retrieval, request, query, k).await {
            Ok(hits) => results.push(hits),
            Err(e) => {
                query_errors.push(format!("{}: {:#}", query, e));
                results.push(Vec::new());
            }
        }
    }

    let patterns = results.pop().unwrap_or_default();
    let failures = results.pop().unwrap_or_default();
    let similar = results.pop().unwrap_or_default();
    let learnings = categorize(similar, failures, patterns);

    let markdown = render_markdown(&request.task_description, &learnings, recalled_at);
    let summary = ContextSummary {
        task_category: category,
        keywords,
        memory_queries: queries,
        learnings_count: learnings.counts(),
        retrieval: match retrieval {
            Retrieval::Vector(_) => "vector",
            Retrieval::Text => "text",
        },
        query_errors,
    };

    ContextReport {
        markdown,
        summary,
        learnings,
    }
}
