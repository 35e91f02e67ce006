//! # Learning Memory Core
//!
//! Backend-independent logic for Learning Memory: the data model, the
//! embedding normalizer, scope classification, the deduplication gate,
//! store and retry-queue traits with in-memory implementations, and the
//! context assembler.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. Concrete Postgres and SQLite backends,
//! embedding providers, and the write pipeline live in the
//! `learning-memory` app crate.

pub mod context;
pub mod dedup;
pub mod embedding;
pub mod models;
pub mod queue;
pub mod scope;
pub mod store;
