//! Migration history tracking: the persisted record of which migration is
//! (or was) in progress, used to enforce the single-in-progress-migration
//! invariant and to recover the orchestrator's state across restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MigrateResult;

/// Lifecycle state of a migration, per spec §4.1: `None` (the initial,
/// unrecorded state) is represented by the absence of a
/// [`MigrationRecord`], not a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// `Start` has run; `Complete` or `Rollback` has not.
    InProgress,
    /// `Complete` has run; the migration is permanent.
    Complete,
    /// `Rollback` has run; the migration's effects have been undone.
    RolledBack,
}

/// A persisted record of a migration's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Migration name.
    pub name: String,
    /// The version schema this migration introduces (`public_<name>` by
    /// convention), used to detect two migrations targeting the same
    /// version.
    pub version_schema: String,
    /// Current lifecycle state.
    pub status: MigrationStatus,
    /// The migration document as JSON, persisted so `Complete`/`Rollback`
    /// can re-derive the same operation plan `Start` used, even across a
    /// process restart.
    pub document: String,
    /// When `Start` ran.
    pub started_at: DateTime<Utc>,
    /// When `Complete` or `Rollback` ran, if it has.
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Repository for migration history, backed by a table in the target
/// database so orchestrator state survives process restarts.
#[async_trait::async_trait]
pub trait MigrationHistoryRepository: Send + Sync {
    /// Create the history table if it does not already exist.
    async fn initialize(&self) -> MigrateResult<()>;

    /// The migration currently `in_progress`, if any. At most one may
    /// exist at a time.
    async fn current(&self) -> MigrateResult<Option<MigrationRecord>>;

    /// All migration records, most recent first.
    async fn all(&self) -> MigrateResult<Vec<MigrationRecord>>;

    /// Whether a prior migration has already claimed `version_schema`.
    async fn version_schema_in_use(&self, version_schema: &str) -> MigrateResult<bool>;

    /// Record that `Start` has run for `name`, persisting `document` (the
    /// migration's JSON form) so `Complete`/`Rollback` can replay it.
    async fn record_start(&self, name: &str, version_schema: &str, document: &str) -> MigrateResult<()>;

    /// Record that `Complete` has run for the in-progress migration.
    async fn record_complete(&self, name: &str) -> MigrateResult<()>;

    /// Record that `Rollback` has run for the in-progress migration.
    async fn record_rollback(&self, name: &str) -> MigrateResult<()>;

    /// Acquire the advisory lock that serializes `Start`/`Complete`/
    /// `Rollback` across concurrent callers.
    async fn acquire_lock(&self) -> MigrateResult<MigrationLock>;
}

/// Advisory lock held for the duration of one orchestrator operation.
/// Released automatically on drop.
pub struct MigrationLock {
    lock_id: i64,
    release_fn: Option<Box<dyn FnOnce() + Send>>,
}

impl MigrationLock {
    /// Wrap a lock identified by `lock_id`, releasing it by calling
    /// `release` when the guard is dropped.
    pub fn new(lock_id: i64, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            lock_id,
            release_fn: Some(Box::new(release)),
        }
    }

    /// The advisory lock key in use.
    pub fn id(&self) -> i64 {
        self.lock_id
    }
}

impl std::fmt::Debug for MigrationLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationLock").field("lock_id", &self.lock_id).finish()
    }
}

impl Drop for MigrationLock {
    fn drop(&mut self) {
        if let Some(release) = self.release_fn.take() {
            release();
        }
    }
}

/// Fixed advisory lock key the engine uses for the whole schema; one key
/// per schema means migrations against different schemas never contend.
pub fn advisory_lock_key(schema_name: &str) -> i64 {
    // FNV-1a, folded to i64: stable across runs, cheap, no external hasher
    // dependency needed for a lock key that's never compared across processes.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in schema_name.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash & 0x7fff_ffff_ffff_ffff) as i64
}
