//! SQLite storage backend for the orchestrator.

use super::{StatusCounts, TestCaseStore};
use crate::error::StorageError;
use async_trait::async_trait;
use fleet_core::{RetryDecision, RetryPolicy};
use fleet_types::{ImageClass, NewTestCase, Outcome, TestCase, TestCaseId, TestStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

/// SQLite-based test case store.
///
/// Uses WAL mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("connections", &self.pool.size())
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        if path.as_os_str().is_empty() {
            return Err(StorageError::InvalidPath {
                path: path.to_path_buf(),
            });
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StorageError::Database)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS test_cases (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                experiment_name TEXT NOT NULL,
                batch_label TEXT,
                image_class TEXT NOT NULL,
                flags TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'TO_START',
                retry_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_test_cases_claim \
             ON test_cases(experiment_name, image_class, status, id)",
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(())
    }

    async fn current_status(&self, id: TestCaseId) -> Result<(TestStatus, u32), StorageError> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT status, retry_count FROM test_cases WHERE id = ?1")
                .bind(id.value())
                .fetch_optional(&self.pool)
                .await
                .map_err(StorageError::Database)?;

        let (status, retry_count) = row.ok_or_else(|| StorageError::Inconsistent {
            id,
            reason: "no such row".to_string(),
        })?;
        Ok((parse_status(&status)?, retry_count as u32))
    }
}

fn parse_status(raw: &str) -> Result<TestStatus, StorageError> {
    raw.parse()
        .map_err(|_| StorageError::InvalidStatus(raw.to_string()))
}

#[async_trait]
impl TestCaseStore for SqliteStore {
    async fn bulk_insert(&self, rows: &[NewTestCase]) -> Result<u64, StorageError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO test_cases (experiment_name, batch_label, image_class, flags)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(&row.experiment_name)
            .bind(row.batch_label.as_deref())
            .bind(row.image_class.as_str())
            .bind(&row.flags)
            .execute(&mut *tx)
            .await
            .map_err(StorageError::Database)?;
        }

        tx.commit().await.map_err(StorageError::Database)?;
        Ok(rows.len() as u64)
    }

    async fn claim_next(
        &self,
        experiment: &str,
        image_class: &ImageClass,
    ) -> Result<Option<TestCase>, StorageError> {
        // Single statement: the inner select and the status guard make the
        // claim a compare-and-swap.
        let row = sqlx::query_as::<_, TestCaseRow>(
            r#"
            UPDATE test_cases SET status = 'RUNNING'
            WHERE id = (
                SELECT id FROM test_cases
                WHERE experiment_name = ?1 AND image_class = ?2 AND status = 'TO_START'
                ORDER BY id ASC
                LIMIT 1
            )
            AND status = 'TO_START'
            RETURNING id, experiment_name, batch_label, image_class, flags, status, retry_count
            "#,
        )
        .bind(experiment)
        .bind(image_class.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        row.map(TestCase::try_from).transpose()
    }

    async fn release(&self, id: TestCaseId) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE test_cases SET status = 'TO_START' WHERE id = ?1 AND status = 'RUNNING'",
        )
        .bind(id.value())
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_status(&self, id: TestCaseId, status: TestStatus) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE test_cases SET status = ?2 \
             WHERE id = ?1 AND status NOT IN ('DETECTED', 'NOT_DETECTED', 'FAILED')",
        )
        .bind(id.value())
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        match result.rows_affected() {
            1 => Ok(()),
            0 => Err(StorageError::Inconsistent {
                id,
                reason: "no such row, or the row is already terminal".to_string(),
            }),
            n => Err(StorageError::Inconsistent {
                id,
                reason: format!("status update touched {} rows", n),
            }),
        }
    }

    async fn record_outcome(&self, id: TestCaseId, outcome: Outcome) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE test_cases SET status = ?2 WHERE id = ?1 AND status = 'RUNNING'",
        )
        .bind(id.value())
        .bind(outcome.as_str())
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        // Distinguish a replayed write from a row that does not exist.
        self.current_status(id).await?;
        Ok(false)
    }

    async fn increment_retry(&self, id: TestCaseId) -> Result<u32, StorageError> {
        let count: Option<i64> = sqlx::query_scalar(
            "UPDATE test_cases SET retry_count = retry_count + 1 WHERE id = ?1 RETURNING retry_count",
        )
        .bind(id.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        count
            .map(|c| c as u32)
            .ok_or_else(|| StorageError::Inconsistent {
                id,
                reason: "no such row".to_string(),
            })
    }

    async fn record_timeout(
        &self,
        id: TestCaseId,
        policy: &RetryPolicy,
    ) -> Result<Option<RetryDecision>, StorageError> {
        loop {
            let (status, retry_count) = self.current_status(id).await?;
            if status != TestStatus::Running {
                return Ok(None);
            }

            let decision = policy.after_timeout(retry_count);
            let result = sqlx::query(
                r#"
                UPDATE test_cases SET status = ?2, retry_count = ?3
                WHERE id = ?1 AND status = 'RUNNING' AND retry_count = ?4
                "#,
            )
            .bind(id.value())
            .bind(decision.status().as_str())
            .bind(decision.retry_count() as i64)
            .bind(retry_count as i64)
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

            if result.rows_affected() == 1 {
                return Ok(Some(decision));
            }
            // Lost the race against another writer: re-read and decide again.
        }
    }

    async fn requeue_orphans(&self, experiment: &str) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "UPDATE test_cases SET status = 'TO_START' \
             WHERE experiment_name = ?1 AND status = 'RUNNING'",
        )
        .bind(experiment)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(result.rows_affected())
    }

    async fn count_eligible(&self, experiment: &str) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM test_cases WHERE experiment_name = ?1 AND status = 'TO_START'",
        )
        .bind(experiment)
        .fetch_one(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(count as u64)
    }

    async fn eligible_by_class(
        &self,
        experiment: &str,
    ) -> Result<BTreeMap<ImageClass, u64>, StorageError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT image_class, COUNT(*)
            FROM test_cases
            WHERE experiment_name = ?1 AND status = 'TO_START'
            GROUP BY image_class
            "#,
        )
        .bind(experiment)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(rows
            .into_iter()
            .map(|(class, count)| (ImageClass::new(class), count as u64))
            .collect())
    }

    async fn get(&self, id: TestCaseId) -> Result<Option<TestCase>, StorageError> {
        let row = sqlx::query_as::<_, TestCaseRow>(
            r#"
            SELECT id, experiment_name, batch_label, image_class, flags, status, retry_count
            FROM test_cases
            WHERE id = ?1
            "#,
        )
        .bind(id.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        match row {
            Some(r) => Ok(Some(r.try_into()?)),
            None => Ok(None),
        }
    }

    async fn list(&self, experiment: &str) -> Result<Vec<TestCase>, StorageError> {
        let rows = sqlx::query_as::<_, TestCaseRow>(
            r#"
            SELECT id, experiment_name, batch_label, image_class, flags, status, retry_count
            FROM test_cases
            WHERE experiment_name = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(experiment)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        rows.into_iter().map(|row| row.try_into()).collect()
    }

    async fn status_counts(&self, experiment: &str) -> Result<StatusCounts, StorageError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM test_cases WHERE experiment_name = ?1 GROUP BY status",
        )
        .bind(experiment)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            counts.add(parse_status(&status)?, count as u64);
        }
        Ok(counts)
    }
}

/// Internal row type for SQLite queries.
#[derive(sqlx::FromRow)]
struct TestCaseRow {
    id: i64,
    experiment_name: String,
    batch_label: Option<String>,
    image_class: String,
    flags: String,
    status: String,
    retry_count: i64,
}

impl TryFrom<TestCaseRow> for TestCase {
    type Error = StorageError;

    fn try_from(row: TestCaseRow) -> Result<Self, Self::Error> {
        Ok(TestCase {
            id: TestCaseId::new(row.id),
            experiment_name: row.experiment_name,
            batch_label: row.batch_label,
            image_class: ImageClass::new(row.image_class),
            flags: row.flags,
            status: parse_status(&row.status)?,
            retry_count: row.retry_count as u32,
        })
    }
}
