//! Fail-open utilities for run bookkeeping
//!
//! Journal writes, archive log appends and code exports must never abort a
//! generational run. Wrap them here; failures are logged and swallowed.
//!
//! DO NOT use fail-open for:
//! - Archive insertion (lineage correctness)
//! - Fitness evaluation (scores)
//! - Dataset or configuration loading

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Execute a bookkeeping operation, logging and discarding any error
///
/// # Usage
///
/// ```no_run
/// use dgm_core::fail_open::fail_open;
/// use dgm_core::Result;
///
/// async fn append_journal() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let written = fail_open("journal", || append_journal()).await;
///     // written is None if append_journal() failed
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}

/// Like [`fail_open`] but retries with a linear backoff of `100ms * attempt`
pub async fn fail_open_with_retries<F, Fut, T>(
    operation_name: &str,
    mut f: F,
    max_retries: usize,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    for attempt in 1..=max_retries {
        match f().await {
            Ok(val) => return Some(val),
            Err(e) => {
                if attempt == max_retries {
                    warn!(
                        "{} failed after {} retries (fail-open): {}",
                        operation_name, max_retries, e
                    );
                    return None;
                }
                warn!(
                    "{} failed (attempt {}/{}): {}",
                    operation_name, attempt, max_retries, e
                );
                let delay_ms = 100 * attempt as u64;
                tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DgmError;

    #[tokio::test]
    async fn test_fail_open_failure_is_swallowed() {
        let result = fail_open("journal", || async {
            Err::<i32, _>(DgmError::Persistence("disk full".to_string()))
        })
        .await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_fail_open_with_retries_recovers() {
        let mut attempts = 0;
        let result = fail_open_with_retries(
            "archive_log",
            || {
                attempts += 1;
                let current = attempts;
                async move {
                    if current < 2 {
                        Err(DgmError::Persistence("locked".to_string()))
                    } else {
                        Ok(current)
                    }
                }
            },
            3,
        )
        .await;
        assert_eq!(result, Some(2));
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_fail_open_with_retries_gives_up() {
        let mut attempts = 0;
        let result = fail_open_with_retries(
            "archive_log",
            || {
                attempts += 1;
                async { Err::<(), _>(DgmError::Persistence("read-only".to_string())) }
            },
            2,
        )
        .await;
        assert_eq!(result, None);
        assert_eq!(attempts, 2);
    }
}
