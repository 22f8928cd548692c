//! Durable SQLite storage backend
//!
//! Single-writer database in WAL mode. The hot paths run through cached
//! prepared statements, and a truncating checkpoint runs every
//! `CHECKPOINT_EVERY` saves to keep the log bounded. One row exists per
//! `(dimension, identifier)`; saves upsert and preserve `created_at`.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::{debug, info};

use crate::budget::BudgetState;
use crate::config::Dimension;
use crate::error::LimitsError;
use crate::storage::{LimitState, RateLimitState, StorageBackend};

const CHECKPOINT_EVERY: u64 = 256;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS limit_states (
    dimension        TEXT NOT NULL,
    identifier       TEXT NOT NULL,
    rate_limit_state TEXT,
    budget_state     TEXT,
    created_at       INTEGER NOT NULL,
    last_updated     INTEGER NOT NULL,
    PRIMARY KEY (dimension, identifier)
)
";

struct Inner {
    conn: Connection,
    saves_since_checkpoint: u64,
}

/// Durable single-writer storage backed by SQLite
pub struct SqliteStorage {
    inner: Mutex<Option<Inner>>,
}

impl SqliteStorage {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LimitsError> {
        let conn = Connection::open(path.as_ref()).map_err(LimitsError::storage)?;

        // WAL keeps readers unblocked while the single writer appends
        let mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(LimitsError::storage)?;
        debug!(mode = %mode, "Opened limiter state database");

        conn.execute_batch(SCHEMA).map_err(LimitsError::storage)?;
        info!(path = %path.as_ref().display(), "Limiter state database ready");

        Ok(Self {
            inner: Mutex::new(Some(Inner {
                conn,
                saves_since_checkpoint: 0,
            })),
        })
    }

    fn validate_identifier(identifier: &str) -> Result<(), LimitsError> {
        if identifier.trim().is_empty() {
            return Err(LimitsError::InvalidIdentifier(
                "empty identifier".to_string(),
            ));
        }
        Ok(())
    }

    fn checkpoint_if_due(inner: &mut Inner) -> Result<(), LimitsError> {
        inner.saves_since_checkpoint += 1;
        if inner.saves_since_checkpoint >= CHECKPOINT_EVERY {
            inner
                .conn
                .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
                .map_err(LimitsError::storage)?;
            inner.saves_since_checkpoint = 0;
            debug!("Checkpointed limiter state WAL");
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for SqliteStorage {
    async fn save(&self, state: &LimitState) -> Result<(), LimitsError> {
        state.validate()?;

        let rate_limit = state
            .rate_limit
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(LimitsError::storage)?;
        let budget = state
            .budget
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(LimitsError::storage)?;

        let mut guard = self.inner.lock();
        let inner = guard
            .as_mut()
            .ok_or_else(|| LimitsError::storage("storage closed"))?;

        {
            let mut stmt = inner
                .conn
                .prepare_cached(
                    "INSERT INTO limit_states \
                     (dimension, identifier, rate_limit_state, budget_state, created_at, last_updated) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                     ON CONFLICT (dimension, identifier) DO UPDATE SET \
                     rate_limit_state = excluded.rate_limit_state, \
                     budget_state = excluded.budget_state, \
                     last_updated = excluded.last_updated",
                )
                .map_err(LimitsError::storage)?;
            stmt.execute(params![
                state.dimension.as_str(),
                state.identifier,
                rate_limit,
                budget,
                state.created_at.timestamp(),
                state.last_updated.timestamp(),
            ])
            .map_err(LimitsError::storage)?;
        }

        Self::checkpoint_if_due(inner)
    }

    async fn load(
        &self,
        identifier: &str,
        dimension: Dimension,
    ) -> Result<Option<LimitState>, LimitsError> {
        Self::validate_identifier(identifier)?;

        let mut guard = self.inner.lock();
        let inner = guard
            .as_mut()
            .ok_or_else(|| LimitsError::storage("storage closed"))?;

        let mut stmt = inner
            .conn
            .prepare_cached(
                "SELECT rate_limit_state, budget_state, created_at, last_updated \
                 FROM limit_states WHERE dimension = ?1 AND identifier = ?2",
            )
            .map_err(LimitsError::storage)?;

        let row = stmt
            .query_row(params![dimension.as_str(), identifier], |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })
            .optional()
            .map_err(LimitsError::storage)?;

        let Some((rate_limit, budget, created_at, last_updated)) = row else {
            return Ok(None);
        };

        let rate_limit: Option<RateLimitState> = rate_limit
            .map(|blob| serde_json::from_str(&blob))
            .transpose()
            .map_err(LimitsError::storage)?;
        let budget: Option<BudgetState> = budget
            .map(|blob| serde_json::from_str(&blob))
            .transpose()
            .map_err(LimitsError::storage)?;

        Ok(Some(LimitState {
            identifier: identifier.to_string(),
            dimension,
            rate_limit,
            budget,
            created_at: Utc
                .timestamp_opt(created_at, 0)
                .single()
                .unwrap_or_else(Utc::now),
            last_updated: Utc
                .timestamp_opt(last_updated, 0)
                .single()
                .unwrap_or_else(Utc::now),
        }))
    }

    async fn delete(&self, identifier: &str, dimension: Dimension) -> Result<(), LimitsError> {
        Self::validate_identifier(identifier)?;

        let mut guard = self.inner.lock();
        let inner = guard
            .as_mut()
            .ok_or_else(|| LimitsError::storage("storage closed"))?;

        inner
            .conn
            .prepare_cached("DELETE FROM limit_states WHERE dimension = ?1 AND identifier = ?2")
            .map_err(LimitsError::storage)?
            .execute(params![dimension.as_str(), identifier])
            .map_err(LimitsError::storage)?;
        Ok(())
    }

    async fn list(&self, dimension: Dimension) -> Result<Vec<String>, LimitsError> {
        let mut guard = self.inner.lock();
        let inner = guard
            .as_mut()
            .ok_or_else(|| LimitsError::storage("storage closed"))?;

        let mut stmt = inner
            .conn
            .prepare_cached(
                "SELECT identifier FROM limit_states WHERE dimension = ?1 ORDER BY identifier",
            )
            .map_err(LimitsError::storage)?;

        let identifiers = stmt
            .query_map(params![dimension.as_str()], |row| row.get::<_, String>(0))
            .map_err(LimitsError::storage)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(LimitsError::storage)?;
        Ok(identifiers)
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<usize, LimitsError> {
        let mut guard = self.inner.lock();
        let inner = guard
            .as_mut()
            .ok_or_else(|| LimitsError::storage("storage closed"))?;

        let deleted = inner
            .conn
            .prepare_cached("DELETE FROM limit_states WHERE last_updated < ?1")
            .map_err(LimitsError::storage)?
            .execute(params![older_than.timestamp()])
            .map_err(LimitsError::storage)?;
        Ok(deleted)
    }

    async fn close(&self) -> Result<(), LimitsError> {
        let mut guard = self.inner.lock();
        if let Some(inner) = guard.take() {
            let _ = inner
                .conn
                .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()));
            info!("Closed limiter state database");
        }
        Ok(())
    }
}
