//! `lmem extract`: turn an agent's `agent-output.json` into one learning.
//!
//! `success` becomes a `WORKING_SOLUTION`, `failure` a `FAILED_APPROACH`,
//! both at high confidence. `blocked` produces no learning.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use learning_memory_core::models::{Confidence, LearningType, StoreRequest};

use crate::config::Config;
use crate::learn::{LearningService, StoreOutcome};

/// Fields read from the agent's result file. Everything is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentOutput {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub approach_summary: Option<String>,
    #[serde(default)]
    pub key_insight: Option<String>,
    #[serde(default)]
    pub verification: Option<Verification>,
    #[serde(default)]
    pub learnings_applied: Vec<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub failure_stage: Option<String>,
    #[serde(default)]
    pub avoid_next_time: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Verification {
    #[serde(default)]
    pub tests_passed: Option<bool>,
    #[serde(default)]
    pub typecheck_passed: Option<bool>,
    #[serde(default)]
    pub lint_passed: Option<bool>,
}

impl AgentOutput {
    fn task_type(&self) -> &str {
        self.task_type.as_deref().unwrap_or("implement")
    }

    fn status(&self) -> &str {
        self.status.as_deref().unwrap_or("unknown")
    }
}

#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub output_file: PathBuf,
    pub story_id: String,
    pub task_description: String,
    pub project_dir: Option<PathBuf>,
}

/// What [`extract`] decided before anything is stored.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Learn {
        status: String,
        request: StoreRequest,
    },
    Skip(String),
    Invalid(String),
}

fn joined_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "None".to_string()
    } else {
        items.join(", ")
    }
}

fn passed(flag: bool) -> &'static str {
    if flag {
        "passed"
    } else {
        "failed"
    }
}

pub fn format_success(output: &AgentOutput, task_description: &str) -> String {
    let mut lines = vec![
        format!("Task completed: {}", task_description),
        String::new(),
        "What worked:".to_string(),
        format!("- Task type: {}", output.task_type()),
        format!("- Files modified: {}", joined_or_none(&output.files_modified)),
        format!(
            "- Approach: {}",
            output
                .approach_summary
                .as_deref()
                .unwrap_or("Standard implementation")
        ),
    ];

    if let Some(v) = &output.verification {
        if let Some(tests) = v.tests_passed {
            lines.push(format!("- Tests: {}", passed(tests)));
        }
        if let Some(types) = v.typecheck_passed {
            lines.push(format!("- Type check: {}", passed(types)));
        }
        if let Some(lint) = v.lint_passed {
            lines.push(format!("- Lint: {}", passed(lint)));
        }
    }

    if !output.learnings_applied.is_empty() {
        lines.push(String::new());
        lines.push("Applied from past learnings:".to_string());
        lines.extend(output.learnings_applied.iter().map(|a| format!("- {}", a)));
    }

    lines.push(String::new());
    lines.push(format!(
        "Key insight: {}",
        output
            .key_insight
            .as_deref()
            .unwrap_or("Completed successfully")
    ));
    lines.join("\n")
}

pub fn format_failure(output: &AgentOutput, task_description: &str) -> String {
    let error = output.error_message.as_deref().unwrap_or("Unknown error");
    [
        format!("Task failed: {}", task_description),
        String::new(),
        "What went wrong:".to_string(),
        format!("- Task type: {}", output.task_type()),
        format!("- Error: {}", error),
        format!("- Files attempted: {}", joined_or_none(&output.files_modified)),
        format!(
            "- Stage: {}",
            output.failure_stage.as_deref().unwrap_or("unknown")
        ),
        String::new(),
        format!(
            "Avoid: {}",
            output.avoid_next_time.as_deref().unwrap_or(error)
        ),
    ]
    .join("\n")
}

pub fn generate_tags(output: &AgentOutput, task_description: &str) -> Vec<String> {
    let mut tags = vec![
        "ralph".to_string(),
        output.task_type().to_string(),
        format!("task-{}", output.status()),
    ];

    let desc = task_description.to_lowercase();
    let keyword_tags: [(&str, &[&str]); 5] = [
        ("auth", &["auth"]),
        ("api", &["api"]),
        ("database", &["database", "db"]),
        ("testing", &["test"]),
        ("ui", &["ui", "component"]),
    ];
    for (tag, needles) in keyword_tags {
        if needles.iter().any(|n| desc.contains(n)) {
            tags.push(tag.to_string());
        }
    }
    tags
}

/// Read the agent output and decide what, if anything, to store.
pub fn extract(request: &ExtractRequest) -> Extraction {
    let raw = match std::fs::read_to_string(&request.output_file) {
        Ok(raw) => raw,
        Err(_) => {
            return Extraction::Invalid(format!(
                "Output file not found: {}",
                request.output_file.display()
            ))
        }
    };
    let output: AgentOutput = match serde_json::from_str(&raw) {
        Ok(output) => output,
        Err(e) => return Extraction::Invalid(format!("Invalid JSON in output file: {}", e)),
    };

    let (content, learning_type) = match output.status() {
        "success" => (
            format_success(&output, &request.task_description),
            LearningType::WorkingSolution,
        ),
        "failure" => (
            format_failure(&output, &request.task_description),
            LearningType::FailedApproach,
        ),
        "blocked" => return Extraction::Skip("Blocked tasks don't generate learnings".to_string()),
        other => return Extraction::Invalid(format!("Unknown status: {}", other)),
    };

    let mut store = StoreRequest::new(format!("ralph-{}", request.story_id), content)
        .with_learning_type(learning_type)
        .with_context(request.task_description.clone())
        .with_tags(generate_tags(&output, &request.task_description))
        .with_confidence(Confidence::High);
    if let Some(dir) = &request.project_dir {
        store = store.with_project_dir(dir.clone());
    }

    Extraction::Learn {
        status: output.status().to_string(),
        request: store,
    }
}

/// [`StoreOutcome`] plus what the extraction found.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractOutcome {
    #[serde(flatten)]
    pub outcome: StoreOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning_type: Option<LearningType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_preview: Option<String>,
}

fn preview(content: &str) -> String {
    if content.chars().count() > 200 {
        format!("{}...", content.chars().take(200).collect::<String>())
    } else {
        content.to_string()
    }
}

pub async fn extract_and_store(service: &LearningService, request: &ExtractRequest) -> ExtractOutcome {
    match extract(request) {
        Extraction::Learn { status, request } => {
            let outcome = service.store_or_enqueue(&request).await;
            ExtractOutcome {
                outcome,
                status: Some(status),
                learning_type: request.options.learning_type,
                content_preview: Some(preview(&request.content)),
            }
        }
        Extraction::Skip(reason) => ExtractOutcome {
            outcome: StoreOutcome::skipped(reason),
            status: Some("blocked".to_string()),
            learning_type: None,
            content_preview: None,
        },
        Extraction::Invalid(error) => ExtractOutcome {
            outcome: StoreOutcome::failed(error),
            status: None,
            learning_type: None,
            content_preview: None,
        },
    }
}

/// `lmem extract`. Returns whether the outcome was a success.
pub async fn run_extract(config: &Config, request: &ExtractRequest, json: bool) -> Result<bool> {
    let service = LearningService::from_config(config).await?;
    let result = extract_and_store(&service, request).await;

    if json {
        println!("{}", serde_json::to_string(&result)?);
    } else if result.outcome.skipped {
        println!(
            "~ Learning skipped: {}",
            result.outcome.reason.as_deref().unwrap_or("")
        );
    } else if result.outcome.success {
        let learning_type = result.learning_type.map(|t| t.as_str()).unwrap_or("unknown");
        println!("✓ Learning stored ({})", learning_type);
        println!("  Status: {}", result.status.as_deref().unwrap_or("unknown"));
        println!(
            "  Memory ID: {}",
            result.outcome.memory_id.as_deref().unwrap_or("unknown")
        );
        if let Some(scope) = result.outcome.scope {
            println!("  Scope: {}", scope);
        }
    } else {
        println!(
            "✗ Failed: {}",
            result.outcome.error.as_deref().unwrap_or("unknown error")
        );
    }

    Ok(result.outcome.success)
}
