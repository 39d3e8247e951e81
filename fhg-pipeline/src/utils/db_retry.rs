//! Retry of SQLite writes on transient lock contention
//!
//! Backoff starts at 10 ms and doubles up to 1 s per wait until the
//! operation's time budget is spent. Errors other than "database is locked"
//! are returned immediately.

use std::future::Future;
use std::time::{Duration, Instant};
use fhg_common::{Error, Result};

/// Default total time a write may spend waiting for a lock
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

fn is_lock_error(err: &Error) -> bool {
    match err {
        Error::Database(db_err) => {
            let text = db_err.to_string();
            text.contains("database is locked") || text.contains("database table is locked")
        }
        _ => false,
    }
}

/// Run `operation`, retrying while SQLite reports a lock, for at most `max_wait_ms`
pub async fn retry_on_lock<F, Fut, T>(operation_name: &str, max_wait_ms: u64, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let budget = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    let elapsed_ms = started.elapsed().as_millis();
                    if elapsed_ms > 2000 {
                        tracing::warn!(operation = operation_name, attempt, elapsed_ms, "Store write succeeded after long lock wait");
                    } else {
                        tracing::debug!(operation = operation_name, attempt, elapsed_ms, "Store write succeeded after retry");
                    }
                }
                return Ok(value);
            }
            Err(err) if !is_lock_error(&err) => return Err(err),
            Err(_) => {
                let elapsed = started.elapsed();
                if elapsed >= budget {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis(),
                        max_wait_ms,
                        "Store write gave up waiting for database lock"
                    );
                    return Err(Error::Internal(format!(
                        "{}: database locked after {} attempts ({} ms)",
                        operation_name,
                        attempt,
                        elapsed.as_millis()
                    )));
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    "Database locked, retrying after backoff"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
        }
    }
}
