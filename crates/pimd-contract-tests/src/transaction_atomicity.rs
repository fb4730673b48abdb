//! Testable Property 3 (spec §8): for any nesting depth `d` and any mix
//! of commits/rollbacks, the outermost commit reaches the driver iff
//! every level called `commit()`; otherwise the outermost rollback is
//! issued exactly once.

use pimd_query::{QueryError, SqliteDriver};
use sqlx::sqlite::SqlitePoolOptions;

use crate::support::{block_on, TckCase, TckSuite};

async fn memory_driver() -> SqliteDriver {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("failed to open in-memory sqlite");
    sqlx::query("CREATE TABLE t (id INTEGER PRIMARY KEY)")
        .execute(&pool)
        .await
        .expect("failed to create scratch table");
    SqliteDriver::new(pool)
}

async fn row_count(driver: &SqliteDriver) -> i64 {
    driver.count("SELECT COUNT(*) FROM t", &[]).await
}

fn every_level_committing_reaches_the_driver() {
    block_on(async {
        let driver = memory_driver().await;
        driver.begin_transaction().await.unwrap();
        driver.begin_transaction().await.unwrap();
        driver.begin_transaction().await.unwrap();
        driver.exec("INSERT INTO t (id) VALUES (1)", &[]).await.unwrap();
        driver.commit_transaction().await.unwrap();
        driver.commit_transaction().await.unwrap();
        driver.commit_transaction().await.unwrap();

        assert_eq!(row_count(&driver).await, 1, "three matching commits should persist the insert");
    });
}

fn a_rollback_at_any_depth_aborts_the_outermost_exactly_once() {
    block_on(async {
        let driver = memory_driver().await;
        driver.begin_transaction().await.unwrap();
        driver.begin_transaction().await.unwrap();
        driver.begin_transaction().await.unwrap();
        driver.exec("INSERT INTO t (id) VALUES (2)", &[]).await.unwrap();

        // A rollback at the innermost depth poisons the whole stack; the
        // two outer "commits" must not actually commit anything, and the
        // outermost one must surface that the transaction was rolled
        // back rather than silently succeeding.
        driver.rollback_transaction().await.unwrap();
        let middle = driver.commit_transaction().await;
        assert!(middle.is_ok(), "a nested commit after the poisoning rollback is a no-op, not an error");
        let outer = driver.commit_transaction().await;
        assert!(
            matches!(outer, Err(QueryError::RolledBack { .. })),
            "the outermost commit must report the rollback, got {outer:?}"
        );

        assert_eq!(row_count(&driver).await, 0, "no partial state should have been committed");
    });
}

fn rolling_back_at_the_outermost_depth_undoes_everything() {
    block_on(async {
        let driver = memory_driver().await;
        driver.begin_transaction().await.unwrap();
        driver.exec("INSERT INTO t (id) VALUES (3)", &[]).await.unwrap();
        driver.rollback_transaction().await.unwrap();
        assert_eq!(row_count(&driver).await, 0);
    });
}

fn scoped_transaction_rolls_back_on_drop_without_commit() {
    block_on(async {
        let driver = memory_driver().await;
        {
            let _scope = driver.scoped_transaction().await.unwrap();
            driver.exec("INSERT INTO t (id) VALUES (4)", &[]).await.unwrap();
            // dropped here without calling `commit()`
        }
        // the drop spawns a best-effort rollback task; give it a turn
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(row_count(&driver).await, 0, "an un-committed scope must not leave rows behind");
    });
}

const CASES: &[TckCase] = &[
    TckCase {
        name: "every_level_committing_reaches_the_driver",
        test: every_level_committing_reaches_the_driver,
    },
    TckCase {
        name: "a_rollback_at_any_depth_aborts_the_outermost_exactly_once",
        test: a_rollback_at_any_depth_aborts_the_outermost_exactly_once,
    },
    TckCase {
        name: "rolling_back_at_the_outermost_depth_undoes_everything",
        test: rolling_back_at_the_outermost_depth_undoes_everything,
    },
    TckCase {
        name: "scoped_transaction_rolls_back_on_drop_without_commit",
        test: scoped_transaction_rolls_back_on_drop_without_commit,
    },
];

static SUITE: TckSuite = TckSuite {
    name: "transaction_atomicity",
    cases: CASES,
};

pub fn suite() -> &'static TckSuite {
    &SUITE
}
