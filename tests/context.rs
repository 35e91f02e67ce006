mod common;

use chrono::Utc;

use common::{harness, TrigramEmbedder, DIMS};
use learning_memory::context_bundle::{write_bundle, BundleRequest};
use learning_memory::project::ProjectIdentity;
use learning_memory_core::context::{assemble, ContextRequest};
use learning_memory_core::models::{LearningType, Scope, StoreRequest};
use learning_memory_core::store::Visibility;

fn context_request(task: &str, visibility: Visibility) -> ContextRequest {
    ContextRequest {
        task_description: task.to_string(),
        project_name: "webapp".to_string(),
        visibility,
        dimension: DIMS,
    }
}

/// The two-decimal similarity printed after `**Similarity:** `.
fn printed_similarity(markdown: &str) -> Option<f32> {
    let start = markdown.find("**Similarity:** ")? + "**Similarity:** ".len();
    let value = &markdown[start..start + 4];
    assert_eq!(value.as_bytes()[1], b'.', "expected two decimals: {}", value);
    value.parse().ok()
}

#[tokio::test]
async fn test_stored_solution_is_recalled_for_related_task() {
    let h = harness();
    let stored = h
        .service
        .store(
            &StoreRequest::new("s1", "Use JWT for auth")
                .with_learning_type(LearningType::WorkingSolution)
                .with_context("login service"),
        )
        .await;
    assert!(stored.success);

    let report = assemble(
        h.backends.primary.as_ref(),
        Some(&TrigramEmbedder),
        &context_request("implement authentication", Visibility::all()),
        Utc::now(),
    )
    .await;

    assert_eq!(report.summary.retrieval, "vector");
    assert_eq!(report.summary.learnings_count.working_solutions, 1);
    assert!(report.summary.query_errors.is_empty());

    let md = &report.markdown;
    assert!(md.starts_with("# Relevant Learnings for: implement authentication"));
    assert!(md.contains("## What Worked Before"));
    assert!(md.contains("### 1. [WORKING_SOLUTION]"));
    assert!(md.contains("Use JWT for auth"));
    assert!(md.contains("**Context:** login service"));

    let similarity = printed_similarity(md).unwrap();
    assert!((-1.0..=1.0).contains(&similarity));
    let hit = &report.learnings.solutions[0];
    assert!((hit.similarity - similarity).abs() < 0.006);
}

#[tokio::test]
async fn test_failed_approach_lands_in_avoid() {
    let h = harness();
    h.service
        .store(
            &StoreRequest::new("s1", "Storing the JWT in localStorage broke the login redirect")
                .with_learning_type(LearningType::FailedApproach),
        )
        .await;

    let report = assemble(
        h.backends.primary.as_ref(),
        Some(&TrigramEmbedder),
        &context_request("Fix login redirect", Visibility::all()),
        Utc::now(),
    )
    .await;

    assert_eq!(report.summary.learnings_count.failed_approaches, 1);
    assert_eq!(report.summary.learnings_count.working_solutions, 0);
    assert!(report.markdown.contains("## What To Avoid"));
    assert!(report.markdown.contains("[FAILED_APPROACH]"));
}

#[tokio::test]
async fn test_secondary_recall_uses_text_search() {
    let h = harness();
    h.backends.set_reachable(false);
    h.service
        .store(
            &StoreRequest::new("s1", "Use JWT for auth")
                .with_learning_type(LearningType::WorkingSolution),
        )
        .await;

    let report = assemble(
        h.backends.secondary.as_ref(),
        Some(&TrigramEmbedder),
        &context_request("implement authentication", Visibility::all()),
        Utc::now(),
    )
    .await;

    assert_eq!(report.summary.retrieval, "text");
    assert_eq!(report.summary.learnings_count.working_solutions, 1);
    assert!(report.markdown.contains("Use JWT for auth"));
}

#[tokio::test]
async fn test_other_projects_learnings_are_hidden() {
    let tmp = tempfile::TempDir::new().unwrap();
    let ours = tmp.path().join("ours");
    let theirs = tmp.path().join("theirs");
    std::fs::create_dir_all(&ours).unwrap();
    std::fs::create_dir_all(&theirs).unwrap();

    let h = harness();
    h.backends.set_reachable(false);
    h.service
        .store(
            &StoreRequest::new("s1", "Auth tokens are minted in src/auth/token.rs")
                .with_scope(Scope::Project)
                .with_project_dir(&theirs),
        )
        .await;
    h.service
        .store(
            &StoreRequest::new("s1", "Auth on WSL needs the Windows credential helper")
                .with_scope(Scope::Global),
        )
        .await;

    let visibility = Visibility::project(ProjectIdentity::resolve(&ours).id);
    let report = assemble(
        h.backends.secondary.as_ref(),
        None,
        &context_request("implement auth", visibility),
        Utc::now(),
    )
    .await;

    assert_eq!(report.summary.learnings_count.working_solutions, 1);
    assert!(report.markdown.contains("credential helper"));
    assert!(!report.markdown.contains("token.rs"));
}

#[tokio::test]
async fn test_failing_store_still_produces_bundle() {
    let tmp = tempfile::TempDir::new().unwrap();
    let h = harness();
    h.backends.primary.set_fail_reads(true);

    let report = assemble(
        h.backends.primary.as_ref(),
        Some(&TrigramEmbedder),
        &context_request("implement authentication", Visibility::all()),
        Utc::now(),
    )
    .await;
    assert_eq!(report.summary.query_errors.len(), 3);
    assert!(report.markdown.contains("## No Relevant Learnings Found"));

    let request = BundleRequest {
        task_description: "implement authentication".to_string(),
        project_dir: tmp.path().to_path_buf(),
        output_dir: tmp.path().join("context"),
        story_id: None,
    };
    let project = ProjectIdentity::resolve(tmp.path());
    let result = write_bundle(&report, &request, &project, Utc::now()).unwrap();
    assert!(result.success);
    assert!(result.files.learnings.exists());
    assert!(result.files.knowledge_tree.exists());
    assert!(result.files.meta.exists());
}
