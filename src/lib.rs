//! # Learning Memory
//!
//! A durable store for the lessons an AI coding agent learns while working:
//! what worked, what failed, and which conventions a codebase follows.
//!
//! Writes go through one pipeline: pick a backend, embed the content,
//! skip near-duplicates, and persist. The pipeline never loses a learning
//! to a single fault:
//!
//! - the embedding provider can be down (the record is stored and marked
//!   pending, then filled in by `backfill`)
//! - the primary can be down (the record lands in the SQLite secondary)
//! - both can be down (the request waits in a retry queue for `drain`)
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌──────────────────┐
//! │   CLI    │──▶│ LearningService│──▶│ Postgres+pgvector│ primary
//! │  (lmem)  │   │ select/embed/ │   └──────────────────┘
//! └──────────┘   │ dedup/persist │──▶┌──────────────────┐
//!      │         └──────┬────────┘   │      SQLite      │ secondary
//!      │                ▼            └──────────────────┘
//!      │         ┌──────────────┐
//!      │         │ retry queue  │ failed_learnings (SQLite)
//!      │         └──────────────┘
//!      ▼
//! ┌──────────────────────┐
//! │ context assembler    │──▶ learnings.md / meta.json
//! └──────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lmem init
//! lmem store --session-id s1 --content "Use JWT for auth" --type WORKING_SOLUTION
//! lmem context --task-description "implement authentication" --project-dir .
//! lmem drain
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and env overrides |
//! | [`db`] | SQLite and Postgres pool construction |
//! | [`migrate`] | Schema bootstrap for every backend |
//! | [`pg_store`] | Postgres + pgvector primary store |
//! | [`sqlite_store`] | SQLite secondary store |
//! | [`sqlite_queue`] | Retry queue for failed writes |
//! | [`backend`] | Per-call backend selection and store handles |
//! | [`embedding`] | Embedding providers |
//! | [`learn`] | The write pipeline, enqueue and drain |
//! | [`dimension`] | Vector column width migration |
//! | [`backfill`] | Embedding backfill for pending records |
//! | [`context_bundle`] | Context assembly and bundle files |
//! | [`agent_output`] | Learnings from agent result files |
//! | [`project`] | Project identity from a directory |

pub mod agent_output;
pub mod backend;
pub mod backfill;
pub mod config;
pub mod context_bundle;
pub mod db;
pub mod dimension;
pub mod embedding;
pub mod learn;
pub mod migrate;
pub mod pg_store;
pub mod project;
pub mod sqlite_queue;
pub mod sqlite_store;
