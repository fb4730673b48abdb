use std::sync::Arc;

use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Executor, Row, Sqlite, SqlitePool, Transaction};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::QueryError;
use crate::value::Value;

struct TxSlot {
    depth: u32,
    poisoned: bool,
    transaction: Option<Transaction<'static, Sqlite>>,
}

impl Default for TxSlot {
    fn default() -> Self {
        Self {
            depth: 0,
            poisoned: false,
            transaction: None,
        }
    }
}

/// Wraps a `sqlx::SqlitePool` with the nested-transaction counter
/// described in §4.3: only the outermost `BEGIN` reaches the driver, a
/// process-wide mutex serializes outermost transactions (SQLite has no
/// real concurrent writers), and a rollback at any nesting depth rolls
/// back the outermost transaction immediately.
#[derive(Clone)]
pub struct SqliteDriver {
    pool: SqlitePool,
    write_mutex: Arc<Mutex<()>>,
    tx: Arc<Mutex<TxSlot>>,
    write_guard: Arc<Mutex<Option<tokio::sync::OwnedMutexGuard<()>>>>,
}

impl SqliteDriver {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_mutex: Arc::new(Mutex::new(())),
            tx: Arc::new(Mutex::new(TxSlot::default())),
            write_guard: Arc::new(Mutex::new(None)),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin_transaction(&self) -> Result<(), QueryError> {
        let mut slot = self.tx.lock().await;
        if slot.depth == 0 {
            let guard = Arc::clone(&self.write_mutex).lock_owned().await;
            *self.write_guard.lock().await = Some(guard);
            slot.transaction = Some(self.pool.begin().await?);
            slot.poisoned = false;
        }
        slot.depth += 1;
        Ok(())
    }

    pub async fn commit_transaction(&self) -> Result<(), QueryError> {
        let mut slot = self.tx.lock().await;
        if slot.depth == 0 {
            return Err(QueryError::NoActiveTransaction);
        }
        slot.depth -= 1;
        if slot.depth == 0 {
            let poisoned = slot.poisoned;
            let transaction = slot.transaction.take();
            slot.poisoned = false;
            drop(slot);
            *self.write_guard.lock().await = None;
            if let Some(transaction) = transaction {
                if poisoned {
                    transaction.rollback().await?;
                } else {
                    transaction.commit().await?;
                }
            }
            if poisoned {
                return Err(QueryError::RolledBack { depth: 0 });
            }
        }
        Ok(())
    }

    pub async fn rollback_transaction(&self) -> Result<(), QueryError> {
        let mut slot = self.tx.lock().await;
        if slot.depth == 0 {
            return Err(QueryError::NoActiveTransaction);
        }
        let depth = slot.depth;
        if depth == 1 {
            let transaction = slot.transaction.take();
            slot.depth = 0;
            slot.poisoned = false;
            drop(slot);
            *self.write_guard.lock().await = None;
            if let Some(transaction) = transaction {
                transaction.rollback().await?;
            }
        } else {
            slot.depth -= 1;
            slot.poisoned = true;
            warn!(depth, "rollback requested inside a nested transaction, outermost aborted");
        }
        Ok(())
    }

    pub async fn exec(&self, sql: &str, params: &[Value]) -> Result<u64, QueryError> {
        let args = bind_args(params)?;
        let query = sqlx::query_with(sql, args);
        let mut slot = self.tx.lock().await;
        let result = if let Some(transaction) = slot.transaction.as_mut() {
            query.execute(&mut **transaction).await?
        } else {
            drop(slot);
            query.execute(&self.pool).await?
        };
        Ok(result.rows_affected())
    }

    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<SqliteRow>, QueryError> {
        let args = bind_args(params)?;
        let query = sqlx::query_with(sql, args);
        let mut slot = self.tx.lock().await;
        let rows = if let Some(transaction) = slot.transaction.as_mut() {
            query.fetch_all(&mut **transaction).await?
        } else {
            drop(slot);
            query.fetch_all(&self.pool).await?
        };
        Ok(rows)
    }

    /// `CountQueryBuilder`'s contract: any driver error collapses to `-1`
    /// rather than propagating (§4.3).
    pub async fn count(&self, sql: &str, params: &[Value]) -> i64 {
        match self.query(sql, params).await {
            Ok(rows) => rows
                .first()
                .and_then(|row| row.try_get::<i64, _>(0).ok())
                .unwrap_or(-1),
            Err(_) => -1,
        }
    }

    pub async fn scoped_transaction(&self) -> Result<ScopedTransaction<'_>, QueryError> {
        self.begin_transaction().await?;
        Ok(ScopedTransaction {
            driver: self,
            resolved: false,
        })
    }
}

fn bind_args(params: &[Value]) -> Result<SqliteArguments<'static>, QueryError> {
    let mut args = SqliteArguments::default();
    for value in params {
        value.bind_into(&mut args).map_err(QueryError::Driver)?;
    }
    Ok(args)
}

/// RAII transaction scope: `BEGIN`s in the constructor, rolls back on
/// drop unless [`Self::commit`] was called, so every early-return path
/// releases the transaction (§4.3 "scoped acquisition").
///
/// `Drop` cannot run async code; an unconsumed guard spawns a best-effort
/// rollback task rather than silently leaking the nesting counter.
pub struct ScopedTransaction<'a> {
    driver: &'a SqliteDriver,
    resolved: bool,
}

impl<'a> ScopedTransaction<'a> {
    pub async fn commit(mut self) -> Result<(), QueryError> {
        self.resolved = true;
        self.driver.commit_transaction().await
    }

    pub async fn rollback(mut self) -> Result<(), QueryError> {
        self.resolved = true;
        self.driver.rollback_transaction().await
    }
}

impl Drop for ScopedTransaction<'_> {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        let driver = self.driver.clone();
        tokio::spawn(async move {
            if let Err(err) = driver.rollback_transaction().await {
                warn!(error = %err, "best-effort rollback on scope exit failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_driver() -> SqliteDriver {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        SqliteDriver::new(pool)
    }

    #[tokio::test]
    async fn nested_begins_only_count_once() {
        let driver = memory_driver().await;
        driver.begin_transaction().await.unwrap();
        driver.begin_transaction().await.unwrap();
        driver
            .exec("INSERT INTO t (id, name) VALUES (?, ?)", &[Value::Int(1), Value::Text("a".into())])
            .await
            .unwrap();
        driver.commit_transaction().await.unwrap();
        driver.commit_transaction().await.unwrap();

        let rows = driver.query("SELECT id FROM t", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn rollback_at_nested_depth_aborts_outermost() {
        let driver = memory_driver().await;
        driver.begin_transaction().await.unwrap();
        driver.begin_transaction().await.unwrap();
        driver
            .exec("INSERT INTO t (id, name) VALUES (?, ?)", &[Value::Int(2), Value::Text("b".into())])
            .await
            .unwrap();
        driver.rollback_transaction().await.unwrap();
        // the outermost commit is now a no-op that surfaces the rollback
        let result = driver.commit_transaction().await;
        assert!(matches!(result, Err(QueryError::RolledBack { .. })));

        let rows = driver.query("SELECT id FROM t", &[]).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn count_collapses_errors_to_negative_one() {
        let driver = memory_driver().await;
        let count = driver.count("SELECT COUNT(*) FROM nonexistent", &[]).await;
        assert_eq!(count, -1);
    }

    #[tokio::test]
    async fn scoped_transaction_rolls_back_on_drop() {
        let driver = memory_driver().await;
        {
            let _scope = driver.scoped_transaction().await.unwrap();
            driver
                .exec("INSERT INTO t (id, name) VALUES (?, ?)", &[Value::Int(3), Value::Text("c".into())])
                .await
                .unwrap();
            // scope dropped here without commit()
        }
        // give the spawned rollback task a chance to run
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let rows = driver.query("SELECT id FROM t WHERE id = 3", &[]).await.unwrap();
        assert!(rows.is_empty());
    }
}
