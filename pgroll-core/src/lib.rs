//! # pgroll-core
//!
//! Database-agnostic engine for zero-downtime PostgreSQL schema
//! migrations, built around the expand/contract pattern: an old and a new
//! logical view of the schema coexist during a migration, backed by one
//! physical table, kept in sync by generated triggers and a background
//! backfill sweep.
//!
//! This crate contains no database connectivity of its own — it plans
//! DDL and mutates an in-memory [`Schema`](schema::Schema), and drives
//! that plan through the [`DbExecutor`](orchestrator::DbExecutor) trait.
//! `pgroll-postgres` supplies the concrete PostgreSQL implementation.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐     ┌──────────────────┐     ┌────────────────┐
//! │ Migration doc  │────▶│ Operation Catalog │────▶│ Schema Model   │
//! │ (JSON/YAML)    │     │ (operations.rs)   │     │ (schema.rs)    │
//! └────────────────┘     └──────────────────┘     └────────────────┘
//!                                 │
//!                 ┌───────────────┼────────────────┐
//!                 ▼               ▼                ▼
//!         ┌──────────────┐ ┌─────────────┐ ┌───────────────┐
//!         │ Duplicator   │ │ Trigger     │ │ Backfill      │
//!         │ (duplicator) │ │ Synthesizer │ │ Engine        │
//!         └──────────────┘ └─────────────┘ └───────────────┘
//!                                 │
//!                                 ▼
//!                       ┌──────────────────┐
//!                       │ Orchestrator     │────▶ DbExecutor (impl elsewhere)
//!                       │ Start/Complete/  │
//!                       │ Rollback         │
//!                       └──────────────────┘
//!                                 │
//!                                 ▼
//!                       ┌──────────────────┐
//!                       │ History Repo     │
//!                       └──────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use pgroll_core::{Migration, MigrationConfig, MigrationOrchestrator};
//!
//! async fn run(history: impl pgroll_core::MigrationHistoryRepository,
//!              executor: impl pgroll_core::DbExecutor) -> pgroll_core::MigrateResult<()> {
//!     let migration = Migration::from_json(r#"
//!         { "name": "add users email", "operations": [
//!             { "add_column": { "table": "users", "column": { "name": "email", "type": "text" } } }
//!         ]}
//!     "#)?;
//!
//!     let orchestrator = MigrationOrchestrator::new(
//!         MigrationConfig::new("public"), history, executor,
//!     );
//!     orchestrator.start(&migration).await?;
//!     orchestrator.complete().await?;
//!     Ok(())
//! }
//! ```

pub mod backfill;
pub mod duplicator;
pub mod error;
pub mod history;
pub mod identifiers;
pub mod migration;
pub mod operations;
pub mod orchestrator;
pub mod schema;
pub mod transform;
pub mod trigger;

// Re-exports
pub use backfill::{BackfillConfig, BatchPlan};
pub use duplicator::{duplicate_columns, DuplicationStatement};
pub use error::{MigrateResult, MigrationError};
pub use history::{MigrationHistoryRepository, MigrationLock, MigrationRecord, MigrationStatus};
pub use migration::{Migration, Operation, OperationSpec};
pub use operations::OperationPlan;
pub use orchestrator::{DbExecutor, MigrationConfig, MigrationOrchestrator};
pub use schema::{Column, Schema, Table};
pub use transform::{ChainTransformer, IdentityTransformer, SqlTransformer};
pub use trigger::{Direction, TriggerDdl, TriggerPair};
