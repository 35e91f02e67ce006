//! `lmem context`: assemble learnings for a task and write the bundle a
//! downstream agent reads.
//!
//! Files written to the output directory:
//!
//! | File | Contents |
//! |------|----------|
//! | `learnings.md` | Rendered report (solutions, avoid, patterns) |
//! | `knowledge-tree.json` | Copied from the project, or a placeholder |
//! | `meta.json` | Task, project identity, queries issued, counts |

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use learning_memory_core::context::{
    assemble, ContextQueries, ContextReport, ContextRequest, LearningCounts, TaskCategory,
};
use learning_memory_core::store::Visibility;

use crate::backend::{open_for_read, ConfiguredBackends};
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::project::ProjectIdentity;

#[derive(Debug, Clone)]
pub struct BundleRequest {
    pub task_description: String,
    pub project_dir: PathBuf,
    pub output_dir: PathBuf,
    pub story_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BundleFiles {
    pub learnings: PathBuf,
    pub knowledge_tree: PathBuf,
    pub meta: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct BundleResult {
    pub success: bool,
    pub output_dir: PathBuf,
    pub files: BundleFiles,
    pub learnings_count: LearningCounts,
    pub retrieval: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub query_errors: Vec<String>,
}

#[derive(Serialize)]
struct BundleMeta<'a> {
    task_description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    story_id: Option<&'a str>,
    project_dir: &'a Path,
    project_id: &'a str,
    project_name: &'a str,
    task_type: TaskCategory,
    created_at: DateTime<Utc>,
    memory_queries: &'a ContextQueries,
    learnings_count: LearningCounts,
}

/// The project's knowledge tree, if one exists and parses.
pub fn load_knowledge_tree(project_dir: &Path) -> Option<Value> {
    [
        project_dir.join(".claude").join("knowledge-tree.json"),
        project_dir.join("knowledge-tree.json"),
    ]
    .iter()
    .filter_map(|path| std::fs::read_to_string(path).ok())
    .find_map(|raw| serde_json::from_str(&raw).ok())
}

/// Write the three bundle files for an assembled report.
pub fn write_bundle(
    report: &ContextReport,
    request: &BundleRequest,
    project: &ProjectIdentity,
    created_at: DateTime<Utc>,
) -> Result<BundleResult> {
    let out = &request.output_dir;
    std::fs::create_dir_all(out)
        .with_context(|| format!("Failed to create output directory: {}", out.display()))?;

    let learnings = out.join("learnings.md");
    std::fs::write(&learnings, &report.markdown)?;

    let knowledge_tree = out.join("knowledge-tree.json");
    let tree = load_knowledge_tree(&project.dir).unwrap_or_else(|| {
        serde_json::json!({
            "project": project.name,
            "note": "No knowledge tree found - agent should explore codebase",
        })
    });
    std::fs::write(&knowledge_tree, serde_json::to_string_pretty(&tree)?)?;

    let meta = out.join("meta.json");
    let summary = &report.summary;
    let body = BundleMeta {
        task_description: &request.task_description,
        story_id: request.story_id.as_deref(),
        project_dir: &project.dir,
        project_id: &project.id,
        project_name: &project.name,
        task_type: summary.task_category,
        created_at,
        memory_queries: &summary.memory_queries,
        learnings_count: summary.learnings_count,
    };
    std::fs::write(&meta, serde_json::to_string_pretty(&body)?)?;

    Ok(BundleResult {
        success: true,
        output_dir: out.clone(),
        files: BundleFiles {
            learnings,
            knowledge_tree,
            meta,
        },
        learnings_count: summary.learnings_count,
        retrieval: summary.retrieval,
        query_errors: summary.query_errors.clone(),
    })
}

pub async fn run_context(config: &Config, request: &BundleRequest, json: bool) -> Result<()> {
    let project = ProjectIdentity::resolve(&request.project_dir);
    let backends = ConfiguredBackends::new(config);
    let store = open_for_read(&backends).await?;
    let embedder = if config.embedding.is_enabled() {
        Some(create_embedder(&config.embedding)?)
    } else {
        None
    };

    let context_request = ContextRequest {
        task_description: request.task_description.clone(),
        project_name: project.name.clone(),
        visibility: Visibility::project(project.id.clone()),
        dimension: config.embedding.dimension,
    };
    let now = Utc::now();
    let report = assemble(store.as_ref(), embedder.as_deref(), &context_request, now).await;
    for error in &report.summary.query_errors {
        tracing::warn!(error = %error, "context query failed");
    }

    let result = write_bundle(&report, request, &project, now)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let counts = result.learnings_count;
        println!("Context prepared at: {}", result.output_dir.display());
        println!(
            "  Learnings: {} solutions, {} failures, {} patterns",
            counts.working_solutions, counts.failed_approaches, counts.codebase_patterns
        );
        println!("  Retrieval: {}", result.retrieval);
        println!("  Files generated: 3");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use learning_memory_core::store::memory::InMemoryStore;

    async fn empty_report(task: &str) -> ContextReport {
        let store = InMemoryStore::secondary();
        let request = ContextRequest {
            task_description: task.to_string(),
            project_name: "webapp".to_string(),
            visibility: Visibility::all(),
            dimension: 8,
        };
        assemble(&store, None, &request, Utc::now()).await
    }

    #[tokio::test]
    async fn test_bundle_with_placeholder_tree() {
        let tmp = tempfile::TempDir::new().unwrap();
        let project_dir = tmp.path().join("webapp");
        std::fs::create_dir(&project_dir).unwrap();
        let project = ProjectIdentity::resolve(&project_dir);
        let request = BundleRequest {
            task_description: "Fix login redirect".to_string(),
            project_dir: project_dir.clone(),
            output_dir: tmp.path().join("out"),
            story_id: Some("STORY-7".to_string()),
        };

        let report = empty_report(&request.task_description).await;
        let result = write_bundle(&report, &request, &project, Utc::now()).unwrap();

        let md = std::fs::read_to_string(&result.files.learnings).unwrap();
        assert!(md.contains("Fix login redirect"));

        let tree: Value =
            serde_json::from_str(&std::fs::read_to_string(&result.files.knowledge_tree).unwrap())
                .unwrap();
        assert_eq!(tree["project"], "webapp");

        let meta: Value =
            serde_json::from_str(&std::fs::read_to_string(&result.files.meta).unwrap()).unwrap();
        assert_eq!(meta["task_type"], "fix");
        assert_eq!(meta["story_id"], "STORY-7");
        assert_eq!(meta["project_id"], project.id.as_str());
        assert_eq!(meta["learnings_count"]["working_solutions"], 0);
        assert!(meta["memory_queries"]["failures"]
            .as_str()
            .unwrap()
            .contains("errors failures"));
    }

    #[tokio::test]
    async fn test_bundle_copies_knowledge_tree() {
        let tmp = tempfile::TempDir::new().unwrap();
        let project_dir = tmp.path().join("svc");
        std::fs::create_dir_all(project_dir.join(".claude")).unwrap();
        std::fs::write(
            project_dir.join(".claude/knowledge-tree.json"),
            r#"{"root": "svc", "modules": ["api"]}"#,
        )
        .unwrap();
        let project = ProjectIdentity::resolve(&project_dir);
        let request = BundleRequest {
            task_description: "Add endpoint".to_string(),
            project_dir,
            output_dir: tmp.path().join("ctx"),
            story_id: None,
        };

        let report = empty_report(&request.task_description).await;
        let result = write_bundle(&report, &request, &project, Utc::now()).unwrap();
        let tree: Value =
            serde_json::from_str(&std::fs::read_to_string(&result.files.knowledge_tree).unwrap())
                .unwrap();
        assert_eq!(tree["modules"][0], "api");
    }

    #[test]
    fn test_unparseable_tree_falls_through() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join(".claude")).unwrap();
        std::fs::write(tmp.path().join(".claude/knowledge-tree.json"), "{not json").unwrap();
        std::fs::write(tmp.path().join("knowledge-tree.json"), r#"{"ok": true}"#).unwrap();
        assert_eq!(load_knowledge_tree(tmp.path()).unwrap()["ok"], true);
    }
}
