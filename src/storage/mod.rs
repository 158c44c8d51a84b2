//! SQLite storage layer -- the append-only `checks` log.
//!
//! One writer (the scheduler) and any number of readers share a pooled set of
//! connections. The database runs in WAL mode, so readers keep a consistent
//! snapshot while a row is being appended, and each append is a single
//! autocommit `INSERT`.

pub mod schema;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::DateTime;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use thiserror::Error;

use crate::probes::{Outcome, Reachability};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection pool: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt row {id}: {reason}")]
    CorruptRow { id: i64, reason: String },

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Durable outcome log, keyed by site.
pub trait OutcomeStore: Send + Sync {
    fn append(&self, outcome: &Outcome) -> Result<(), StoreError>;

    /// Most recent outcome for `site`, or `None` if it was never probed.
    fn latest(&self, site: &str) -> Result<Option<Outcome>, StoreError>;

    /// Up to `limit` most recent outcomes for `site`, oldest first.
    fn history(&self, site: &str, limit: usize) -> Result<Vec<Outcome>, StoreError>;
}

/// SQLite-backed [`OutcomeStore`].
///
/// Only obtainable through [`Store::open`] / [`Store::open_in_memory`], both of
/// which create the schema first, so every handle points at an initialized
/// database.
#[derive(Clone)]
pub struct Store {
    pool: Pool,
}

impl Store {
    /// Open (or create) the database file and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let manager = SqliteConnectionManager::file(path).with_init(|c| {
            c.execute_batch(
                "PRAGMA busy_timeout = 5000;
                 PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;",
            )
        });

        let pool = R2D2Pool::builder()
            .connection_timeout(Duration::from_secs(5))
            .build(manager)
            .with_context(|| format!("failed to open database {}", path.display()))?;
        Self::from_pool(pool)
    }

    /// Single-connection in-memory database. Everything is lost when the
    /// store is dropped; meant for tests and one-shot runs.
    pub fn open_in_memory() -> Result<Self> {
        let pool = R2D2Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(SqliteConnectionManager::memory())
            .context("failed to open in-memory database")?;
        Self::from_pool(pool)
    }

    fn from_pool(pool: Pool) -> Result<Self> {
        // Run migrations on a single connection
        let conn = pool.get()?;
        schema::migrate(&conn)?;
        drop(conn);

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    fn query_outcomes(
        &self,
        sql: &str,
        site: &str,
        limit: i64,
    ) -> Result<Vec<Outcome>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt
            .query_map(params![site, limit], |row| {
                Ok(RawCheck {
                    id: row.get(0)?,
                    site: row.get(1)?,
                    observed_at: row.get(2)?,
                    reachable: row.get(3)?,
                    status_code: row.get(4)?,
                    latency_seconds: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawCheck::into_outcome).collect()
    }
}

struct RawCheck {
    id: i64,
    site: String,
    observed_at: i64,
    reachable: String,
    status_code: Option<i64>,
    latency_seconds: f64,
}

impl RawCheck {
    fn into_outcome(self) -> Result<Outcome, StoreError> {
        let id = self.id;
        let corrupt = |reason: String| StoreError::CorruptRow { id, reason };

        let observed_at = DateTime::from_timestamp(self.observed_at, 0)
            .ok_or_else(|| corrupt(format!("timestamp {} out of range", self.observed_at)))?;
        let reachable: Reachability = self.reachable.parse().map_err(corrupt)?;
        let status_code = self
            .status_code
            .map(u16::try_from)
            .transpose()
            .map_err(|_| corrupt(format!("status code {:?} out of range", self.status_code)))?;
        // persisted precision is microseconds
        let micros = self.latency_seconds * 1_000_000.0;
        if !micros.is_finite() || micros < 0.0 || micros > u64::MAX as f64 {
            return Err(corrupt(format!("latency {} out of range", self.latency_seconds)));
        }
        let latency = Duration::from_micros(micros.round() as u64);

        Ok(Outcome {
            site: self.site,
            observed_at,
            reachable,
            status_code,
            latency,
        })
    }
}

const LATEST_SQL: &str = "SELECT id, site, observed_at, reachable, status_code, latency_seconds
     FROM checks WHERE site = ?1
     ORDER BY observed_at DESC, id DESC LIMIT ?2";

// Newest `limit` rows first, then flipped into reading order.
const HISTORY_SQL: &str = "SELECT id, site, observed_at, reachable, status_code, latency_seconds FROM (
         SELECT id, site, observed_at, reachable, status_code, latency_seconds
         FROM checks WHERE site = ?1
         ORDER BY observed_at DESC, id DESC LIMIT ?2
     ) ORDER BY observed_at ASC, id ASC";

impl OutcomeStore for Store {
    fn append(&self, o: &Outcome) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO checks (site, observed_at, reachable, status_code, latency_seconds)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                o.site,
                o.observed_at.timestamp(),
                o.reachable.as_str(),
                o.status_code,
                o.latency.as_secs_f64()
            ],
        )?;
        Ok(())
    }

    fn latest(&self, site: &str) -> Result<Option<Outcome>, StoreError> {
        Ok(self.query_outcomes(LATEST_SQL, site, 1)?.pop())
    }

    fn history(&self, site: &str, limit: usize) -> Result<Vec<Outcome>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query_outcomes(HISTORY_SQL, site, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn outcome(site: &str, ts: i64, status: Option<u16>) -> Outcome {
        let reachable = match status {
            Some(code) => crate::probes::classify(code),
            None => Reachability::Error,
        };
        Outcome {
            site: site.to_string(),
            observed_at: DateTime::from_timestamp(ts, 0).unwrap(),
            reachable,
            status_code: status,
            latency: Duration::from_millis(125),
        }
    }

    const A: &str = "https://a.example.com";
    const B: &str = "https://b.example.com";

    #[test]
    fn test_latest_not_found() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.latest(A).unwrap().is_none());
        assert!(store.history(A, 10).unwrap().is_empty());
    }

    #[test]
    fn test_append_then_latest() {
        let store = Store::open_in_memory().unwrap();
        let o = outcome(A, 1_700_000_000, Some(200));
        store.append(&o).unwrap();
        assert_eq!(store.latest(A).unwrap(), Some(o));
    }

    #[test]
    fn test_error_outcome_round_trips_without_status() {
        let store = Store::open_in_memory().unwrap();
        store.append(&outcome(A, 1_700_000_000, None)).unwrap();
        let got = store.latest(A).unwrap().unwrap();
        assert_eq!(got.reachable, Reachability::Error);
        assert_eq!(got.status_code, None);
    }

    #[test]
    fn test_history_returns_suffix_oldest_first() {
        let store = Store::open_in_memory().unwrap();
        let all: Vec<Outcome> = (0..6)
            .map(|i| outcome(A, 1_700_000_000 + i * 60, Some(200 + i as u16)))
            .collect();
        for o in &all {
            store.append(o).unwrap();
        }

        assert_eq!(store.history(A, 6).unwrap(), all);
        assert_eq!(store.history(A, 100).unwrap(), all);
        assert_eq!(store.history(A, 3).unwrap(), all[3..].to_vec());
        assert!(store.history(A, 0).unwrap().is_empty());
    }

    #[test]
    fn test_latest_is_last_of_history() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..5 {
            store
                .append(&outcome(A, 1_700_000_000 + i, Some(500)))
                .unwrap();
        }
        let latest = store.latest(A).unwrap().unwrap();
        for n in 1..=7 {
            assert_eq!(store.history(A, n).unwrap().last(), Some(&latest));
        }
    }

    #[test]
    fn test_latest_tie_broken_by_insertion_order() {
        let store = Store::open_in_memory().unwrap();
        store.append(&outcome(A, 1_700_000_000, Some(200))).unwrap();
        store.append(&outcome(A, 1_700_000_000, Some(503))).unwrap();

        let latest = store.latest(A).unwrap().unwrap();
        assert_eq!(latest.status_code, Some(503));

        let history = store.history(A, 2).unwrap();
        assert_eq!(history[0].status_code, Some(200));
        assert_eq!(history[1].status_code, Some(503));
    }

    #[test]
    fn test_sites_are_isolated() {
        let store = Store::open_in_memory().unwrap();
        store.append(&outcome(B, 1_700_000_000, Some(200))).unwrap();
        let b_latest = store.latest(B).unwrap();
        let b_history = store.history(B, 10).unwrap();

        store.append(&outcome(A, 1_700_000_100, Some(500))).unwrap();

        assert_eq!(store.latest(B).unwrap(), b_latest);
        assert_eq!(store.history(B, 10).unwrap(), b_history);
    }

    #[test]
    fn test_corrupt_row_is_reported() {
        let store = Store::open_in_memory().unwrap();
        store
            .pool()
            .get()
            .unwrap()
            .execute(
                "INSERT INTO checks (site, observed_at, reachable, status_code, latency_seconds)
                 VALUES (?1, 1, 'sideways', 200, 0.1)",
                [A],
            )
            .unwrap();

        assert!(matches!(
            store.latest(A),
            Err(StoreError::CorruptRow { .. })
        ));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("sitepulse.db");

        let o = outcome(A, Utc::now().timestamp(), Some(204));
        {
            let store = Store::open(&path).unwrap();
            store.append(&o).unwrap();
        }

        let reopened = Store::open(&path).unwrap();
        assert_eq!(reopened.latest(A).unwrap(), Some(o));
    }
}
