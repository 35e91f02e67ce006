//! Offline rewrite of a table's vector column width.
//!
//! For each table: read the declared width, then skip (already at target,
//! or no vector column) or migrate. A live migration runs four steps in
//! order:
//!
//! 1. drop the HNSW index (pgvector cannot retype a column an index uses)
//! 2. rewrite every non-null vector, truncating or zero-padding
//! 3. declare the column at the new width
//! 4. rebuild the HNSW index with the same `m` / `ef_construction`
//!
//! The steps are **not** transactional. A failure after step 1 leaves the
//! table without its index; the report says so via `index_dropped` and
//! nothing is rolled back. Step 2 leaves the column without a declared
//! width, so a re-run after a failure at step 3 or 4 sees an unconstrained
//! column and finishes the job.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;

use crate::config::{
    is_valid_identifier, validate_dimension, Config, DimensionError,
    SUPPORTED_DIMENSIONS,
};
use crate::db;
use crate::migrate::{create_hnsw_index_sql, hnsw_index_name, HNSW_MAX_DIMENSIONS};

/// Shape of a table's `embedding` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnState {
    /// No table, no `embedding` column, or a column that is not a `vector`.
    Missing,
    /// `vector(n)`.
    Fixed(usize),
    /// Bare `vector`, as left behind by an interrupted migration.
    Unconstrained,
}

/// Schema operations the migration needs.
#[async_trait]
pub trait VectorSchema: Send + Sync {
    async fn column_state(&self, table: &str) -> Result<ColumnState>;
    async fn count_embeddings(&self, table: &str) -> Result<u64>;
    async fn drop_index(&self, table: &str) -> Result<()>;
    /// Fit every non-null vector to `target` components.
    async fn rewrite_vectors(&self, table: &str, target: usize) -> Result<()>;
    async fn set_column_dimension(&self, table: &str, target: usize) -> Result<()>;
    async fn create_index(&self, table: &str) -> Result<()>;
}

/// pgvector implementation of [`VectorSchema`].
pub struct PgVectorSchema {
    pool: PgPool,
}

impl PgVectorSchema {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorSchema for PgVectorSchema {
    async fn column_state(&self, table: &str) -> Result<ColumnState> {
        let column: Option<(String, i32)> = sqlx::query_as(
            r#"
            SELECT t.typname::text, a.atttypmod
            FROM pg_attribute a
            JOIN pg_class c ON c.oid = a.attrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            JOIN pg_type t ON t.oid = a.atttypid
            WHERE c.relname = $1
              AND n.nspname = current_schema()
              AND a.attname = 'embedding'
              AND NOT a.attisdropped
            "#,
        )
        .bind(table)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match column {
            Some((typname, typmod)) if typname == "vector" => {
                if typmod > 0 {
                    ColumnState::Fixed(typmod as usize)
                } else {
                    ColumnState::Unconstrained
                }
            }
            _ => ColumnState::Missing,
        })
    }

    async fn count_embeddings(&self, table: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE embedding IS NOT NULL",
            table
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn drop_index(&self, table: &str) -> Result<()> {
        sqlx::query(&format!("DROP INDEX IF EXISTS {}", hnsw_index_name(table)))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn rewrite_vectors(&self, table: &str, target: usize) -> Result<()> {
        // Relax the column first so rows at the new width are accepted.
        sqlx::query(&format!(
            "ALTER TABLE {} ALTER COLUMN embedding TYPE vector",
            table
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            r#"
            UPDATE {table}
            SET embedding = (CASE
                WHEN vector_dims(embedding) >= {target}
                    THEN (embedding::real[])[1:{target}]
                ELSE embedding::real[]
                    || array_fill(0::real, ARRAY[{target} - vector_dims(embedding)])
            END)::vector
            WHERE embedding IS NOT NULL
            "#
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_column_dimension(&self, table: &str, target: usize) -> Result<()> {
        sqlx::query(&format!(
            "ALTER TABLE {} ALTER COLUMN embedding TYPE vector({})",
            table, target
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_index(&self, table: &str) -> Result<()> {
        sqlx::query(&create_hnsw_index_sql(table))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MigrationError {
    #[error(transparent)]
    Dimension(#[from] DimensionError),
    #[error("Invalid table name: '{0}'")]
    InvalidTable(String),
    #[error(
        "target dimension {0} exceeds the {max}-dimension limit of pgvector HNSW indexes",
        max = HNSW_MAX_DIMENSIONS
    )]
    ExceedsIndexLimit(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationAction {
    Skip,
    Migrate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStep {
    Inspect,
    DropIndex,
    RewriteVectors,
    AlterColumn,
    CreateIndex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum MigrationStatus {
    Completed,
    Failed {
        step: MigrationStep,
        error: String,
        /// The HNSW index is gone and was not rebuilt.
        index_dropped: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub table: String,
    pub current_dim: Option<usize>,
    pub target_dim: usize,
    pub embeddings_count: u64,
    pub action: MigrationAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    /// `None` for skipped tables and dry runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<MigrationStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub target_dim: usize,
    pub dry_run: bool,
    pub tables: Vec<TableReport>,
}

impl MigrationReport {
    pub fn success(&self) -> bool {
        self.tables
            .iter()
            .all(|t| !matches!(t.status, Some(MigrationStatus::Failed { .. })))
    }
}

/// Plan and, unless `dry_run`, execute the migration for each table.
///
/// A dry run only reads. Per-table failures are recorded in the report
/// and do not stop later tables. Targets too wide for an HNSW index are
/// rejected before any table is touched, since step 4 could never succeed.
pub async fn migrate_dimension(
    schema: &dyn VectorSchema,
    target_dim: usize,
    dry_run: bool,
    tables: &[String],
) -> Result<MigrationReport, MigrationError> {
    validate_dimension(target_dim)?;
    if target_dim > HNSW_MAX_DIMENSIONS {
        return Err(MigrationError::ExceedsIndexLimit(target_dim));
    }
    if let Some(bad) = tables.iter().find(|t| !is_valid_identifier(t)) {
        return Err(MigrationError::InvalidTable(bad.clone()));
    }

    let mut report = MigrationReport {
        target_dim,
        dry_run,
        tables: Vec::with_capacity(tables.len()),
    };

    for table in tables {
        report
            .tables
            .push(migrate_table(schema, table, target_dim, dry_run).await);
    }

    Ok(report)
}

async fn migrate_table(
    schema: &dyn VectorSchema,
    table: &str,
    target_dim: usize,
    dry_run: bool,
) -> TableReport {
    let mut report = TableReport {
        table: table.to_string(),
        current_dim: None,
        target_dim,
        embeddings_count: 0,
        action: MigrationAction::Skip,
        reason: None,
        warning: None,
        status: None,
    };

    let state = match schema.column_state(table).await {
        Ok(state) => state,
        Err(e) => {
            report.status = Some(MigrationStatus::Failed {
                step: MigrationStep::Inspect,
                error: format!("{:#}", e),
                index_dropped: false,
            });
            return report;
        }
    };
    let current_dim = match state {
        ColumnState::Missing => {
            report.reason = Some("No embedding column found".to_string());
            return report;
        }
        ColumnState::Fixed(dim) => Some(dim),
        ColumnState::Unconstrained => None,
    };
    report.current_dim = current_dim;

    match schema.count_embeddings(table).await {
        Ok(count) => report.embeddings_count = count,
        Err(e) => {
            report.status = Some(MigrationStatus::Failed {
                step: MigrationStep::Inspect,
                error: format!("{:#}", e),
                index_dropped: false,
            });
            return report;
        }
    }

    if current_dim == Some(target_dim) {
        report.reason = Some("Already at target dimension".to_string());
        return report;
    }

    report.action = MigrationAction::Migrate;
    if current_dim.is_none() {
        report.reason = Some(
            "Embedding column has no declared width (interrupted migration)".to_string(),
        );
    }
    if report.embeddings_count > 0 {
        report.warning = Some(format!(
            "{} existing embeddings will be padded/truncated",
            report.embeddings_count
        ));
    }

    if dry_run {
        return report;
    }

    tracing::info!(table, from = ?current_dim, to = target_dim, "migrating vector column");
    report.status = Some(match execute(schema, table, target_dim).await {
        Ok(()) => MigrationStatus::Completed,
        Err((step, e)) => {
            let index_dropped = step != MigrationStep::DropIndex;
            tracing::error!(table, ?step, index_dropped, error = %e, "dimension migration failed");
            MigrationStatus::Failed {
                step,
                error: e,
                index_dropped,
            }
        }
    });
    report
}

async fn execute(
    schema: &dyn VectorSchema,
    table: &str,
    target_dim: usize,
) -> Result<(), (MigrationStep, String)> {
    let fail = |step| move |e: anyhow::Error| (step, format!("{:#}", e));

    schema
        .drop_index(table)
        .await
        .map_err(fail(MigrationStep::DropIndex))?;
    schema
        .rewrite_vectors(table, target_dim)
        .await
        .map_err(fail(MigrationStep::RewriteVectors))?;
    schema
        .set_column_dimension(table, target_dim)
        .await
        .map_err(fail(MigrationStep::AlterColumn))?;
    schema
        .create_index(table)
        .await
        .map_err(fail(MigrationStep::CreateIndex))?;
    Ok(())
}

/// `lmem migrate-dimension`. Returns whether every table succeeded.
pub async fn run_migrate_dimension(
    config: &Config,
    target_dim: usize,
    dry_run: bool,
    tables: &[String],
    json: bool,
) -> Result<bool> {
    let Some(dsn) = config.primary.dsn.as_deref() else {
        bail!("Dimension migration requires a primary database. Set [primary] dsn or LMEM_DATABASE_URL.");
    };
    let tables = if tables.is_empty() {
        config.primary.vector_tables.clone()
    } else {
        tables.to_vec()
    };
    validate_dimension(target_dim)?;
    if !SUPPORTED_DIMENSIONS.contains(&target_dim) {
        tracing::warn!(target_dim, supported = ?SUPPORTED_DIMENSIONS, "uncommon target dimension");
    }

    let pool = db::connect_postgres(&config.primary, dsn).await?;
    let schema = PgVectorSchema::new(pool.clone());
    let result = migrate_dimension(&schema, target_dim, dry_run, &tables).await;
    pool.close().await;
    let report = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(report.success());
    }

    println!(
        "migrate-dimension → {}{}",
        report.target_dim,
        if report.dry_run { " (dry run)" } else { "" }
    );
    for table in &report.tables {
        let current = table
            .current_dim
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        let outcome = match (&table.status, table.action) {
            (Some(MigrationStatus::Completed), _) => "migrated".to_string(),
            (Some(MigrationStatus::Failed { step, error, index_dropped }), _) => format!(
                "FAILED at {:?}: {}{}",
                step,
                error,
                if *index_dropped { " (HNSW index dropped)" } else { "" }
            ),
            (None, MigrationAction::Migrate) => "would migrate".to_string(),
            (None, MigrationAction::Skip) => {
                format!("skipped: {}", table.reason.as_deref().unwrap_or(""))
            }
        };
        println!(
            "  {:<20} {:>6} → {:<6} {:>8} rows  {}",
            table.table, current, table.target_dim, table.embeddings_count, outcome
        );
        if let Some(warning) = &table.warning {
            println!("    ⚠ {}", warning);
        }
    }
    Ok(report.success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use anyhow::bail;
    use learning_memory_core::embedding::normalize_embedding;

    #[derive(Clone)]
    struct FakeTable {
        /// `None` once the width has been relaxed.
        dim: Option<usize>,
        vectors: Vec<Option<Vec<f32>>>,
        indexed: bool,
    }

    #[derive(Default)]
    struct FakeSchema {
        tables: Mutex<HashMap<String, FakeTable>>,
        writes: Mutex<usize>,
        fail_at: Option<MigrationStep>,
    }

    impl FakeSchema {
        fn with_table(self, name: &str, dim: usize, vectors: Vec<Option<Vec<f32>>>) -> Self {
            self.tables.lock().unwrap().insert(
                name.to_string(),
                FakeTable {
                    dim: Some(dim),
                    vectors,
                    indexed: true,
                },
            );
            self
        }

        fn table(&self, name: &str) -> FakeTable {
            self.tables.lock().unwrap()[name].clone()
        }

        fn write(&self, step: MigrationStep) -> Result<()> {
            if self.fail_at == Some(step) {
                bail!("injected failure");
            }
            *self.writes.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[async_trait]
    impl VectorSchema for FakeSchema {
        async fn column_state(&self, table: &str) -> Result<ColumnState> {
            Ok(match self.tables.lock().unwrap().get(table) {
                None => ColumnState::Missing,
                Some(FakeTable { dim: Some(d), .. }) => ColumnState::Fixed(*d),
                Some(FakeTable { dim: None, .. }) => ColumnState::Unconstrained,
            })
        }
        async fn count_embeddings(&self, table: &str) -> Result<u64> {
            Ok(self.table(table).vectors.iter().flatten().count() as u64)
        }
        async fn drop_index(&self, table: &str) -> Result<()> {
            self.write(MigrationStep::DropIndex)?;
            self.tables.lock().unwrap().get_mut(table).unwrap().indexed = false;
            Ok(())
        }
        async fn rewrite_vectors(&self, table: &str, target: usize) -> Result<()> {
            self.write(MigrationStep::RewriteVectors)?;
            let mut tables = self.tables.lock().unwrap();
            let t = tables.get_mut(table).unwrap();
            t.dim = None;
            for v in t.vectors.iter_mut().flatten() {
                *v = normalize_embedding(v, target);
            }
            Ok(())
        }
        async fn set_column_dimension(&self, table: &str, target: usize) -> Result<()> {
            self.write(MigrationStep::AlterColumn)?;
            self.tables.lock().unwrap().get_mut(table).unwrap().dim = Some(target);
            Ok(())
        }
        async fn create_index(&self, table: &str) -> Result<()> {
            self.write(MigrationStep::CreateIndex)?;
            self.tables.lock().unwrap().get_mut(table).unwrap().indexed = true;
            Ok(())
        }
    }

    fn tables(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let schema = FakeSchema::default()
            .with_table("archival_memory", 768, vec![Some(vec![1.0; 768]), None]);

        let report = migrate_dimension(&schema, 1024, true, &tables(&["archival_memory"]))
            .await
            .unwrap();

        assert_eq!(*schema.writes.lock().unwrap(), 0);
        let t = &report.tables[0];
        assert_eq!(t.action, MigrationAction::Migrate);
        assert_eq!(t.current_dim, Some(768));
        assert_eq!(t.embeddings_count, 1);
        assert_eq!(
            t.warning.as_deref(),
            Some("1 existing embeddings will be padded/truncated")
        );
        assert!(t.status.is_none());
        assert_eq!(schema.table("archival_memory").dim, Some(768));
    }

    #[tokio::test]
    async fn test_live_migration_pads_and_restores_index() {
        let schema = FakeSchema::default()
            .with_table("archival_memory", 2, vec![Some(vec![0.5, 0.25]), None]);

        let report = migrate_dimension(&schema, 4, false, &tables(&["archival_memory"]))
            .await
            .unwrap();

        assert!(report.success());
        assert_eq!(report.tables[0].status, Some(MigrationStatus::Completed));
        let t = schema.table("archival_memory");
        assert_eq!(t.dim, Some(4));
        assert!(t.indexed);
        assert_eq!(t.vectors[0], Some(vec![0.5, 0.25, 0.0, 0.0]));
        assert_eq!(t.vectors[1], None);
    }

    #[tokio::test]
    async fn test_live_migration_truncates() {
        let schema =
            FakeSchema::default().with_table("handoffs", 3, vec![Some(vec![1.0, 2.0, 3.0])]);

        migrate_dimension(&schema, 2, false, &tables(&["handoffs"]))
            .await
            .unwrap();

        assert_eq!(schema.table("handoffs").vectors[0], Some(vec![1.0, 2.0]));
    }

    #[tokio::test]
    async fn test_skip_reasons() {
        let schema = FakeSchema::default().with_table("archival_memory", 1024, vec![]);

        let report = migrate_dimension(
            &schema,
            1024,
            false,
            &tables(&["archival_memory", "missing_table"]),
        )
        .await
        .unwrap();

        assert_eq!(report.tables[0].action, MigrationAction::Skip);
        assert_eq!(
            report.tables[0].reason.as_deref(),
            Some("Already at target dimension")
        );
        assert_eq!(report.tables[1].action, MigrationAction::Skip);
        assert_eq!(
            report.tables[1].reason.as_deref(),
            Some("No embedding column found")
        );
        assert_eq!(*schema.writes.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failure_after_drop_reports_missing_index() {
        let schema = FakeSchema {
            fail_at: Some(MigrationStep::AlterColumn),
            ..Default::default()
        }
        .with_table("archival_memory", 2, vec![Some(vec![1.0, 1.0])]);

        let report = migrate_dimension(&schema, 3, false, &tables(&["archival_memory"]))
            .await
            .unwrap();

        assert!(!report.success());
        match &report.tables[0].status {
            Some(MigrationStatus::Failed {
                step,
                index_dropped,
                ..
            }) => {
                assert_eq!(*step, MigrationStep::AlterColumn);
                assert!(*index_dropped);
            }
            other => panic!("unexpected status: {:?}", other),
        }
        assert!(!schema.table("archival_memory").indexed);
    }

    #[tokio::test]
    async fn test_rerun_after_interrupted_migration_finishes_it() {
        let mut schema = FakeSchema {
            fail_at: Some(MigrationStep::AlterColumn),
            ..Default::default()
        }
        .with_table("archival_memory", 2, vec![Some(vec![1.0, 1.0])]);

        let first = migrate_dimension(&schema, 3, false, &tables(&["archival_memory"]))
            .await
            .unwrap();
        assert!(!first.success());
        assert_eq!(schema.table("archival_memory").dim, None);

        schema.fail_at = None;
        let plan = migrate_dimension(&schema, 3, true, &tables(&["archival_memory"]))
            .await
            .unwrap();
        let t = &plan.tables[0];
        assert_eq!(t.action, MigrationAction::Migrate);
        assert_eq!(t.current_dim, None);
        assert_eq!(
            t.reason.as_deref(),
            Some("Embedding column has no declared width (interrupted migration)")
        );

        let rerun = migrate_dimension(&schema, 3, false, &tables(&["archival_memory"]))
            .await
            .unwrap();
        assert!(rerun.success());
        assert_eq!(rerun.tables[0].status, Some(MigrationStatus::Completed));
        let t = schema.table("archival_memory");
        assert_eq!(t.dim, Some(3));
        assert!(t.indexed);
        assert_eq!(t.vectors[0], Some(vec![1.0, 1.0, 0.0]));
    }

    #[tokio::test]
    async fn test_target_too_wide_for_index_is_rejected_before_any_write() {
        let schema = FakeSchema::default()
            .with_table("archival_memory", 1536, vec![Some(vec![0.1; 1536])]);

        for dry_run in [true, false] {
            assert_eq!(
                migrate_dimension(&schema, 3072, dry_run, &tables(&["archival_memory"])).await,
                Err(MigrationError::ExceedsIndexLimit(3072))
            );
        }
        assert_eq!(*schema.writes.lock().unwrap(), 0);
        let t = schema.table("archival_memory");
        assert_eq!(t.dim, Some(1536));
        assert!(t.indexed);
        assert!(migrate_dimension(&schema, HNSW_MAX_DIMENSIONS, true, &tables(&["archival_memory"]))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let schema = FakeSchema::default();
        assert_eq!(
            migrate_dimension(&schema, 0, true, &tables(&["t"])).await,
            Err(MigrationError::Dimension(DimensionError::NotPositive(0)))
        );
        assert_eq!(
            migrate_dimension(&schema, 10_000, true, &tables(&["t"])).await,
            Err(MigrationError::Dimension(DimensionError::TooLarge(10_000)))
        );
        assert_eq!(
            migrate_dimension(&schema, 512, true, &tables(&["x; DROP TABLE y"])).await,
            Err(MigrationError::InvalidTable("x; DROP TABLE y".to_string()))
        );
    }
}
