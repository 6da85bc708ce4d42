use std::future::Future;
use std::time::Duration;

use backoff::{ExponentialBackoff, future::retry_notify};
use tracing::warn;

use crate::config::RentalSettings;
use crate::ports::StoreError;

/// リモート書き込みの再試行ポリシー（指数バックオフ、試行回数上限あり）
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &RentalSettings) -> Self {
        Self {
            max_attempts: settings.max_write_attempts.max(1),
            initial_backoff: settings.initial_backoff,
            max_backoff: settings.max_backoff,
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_backoff,
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            randomization_factor: 0.0,
            // 打ち切りは試行回数で行う
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// `operation`を最大`max_attempts`回実行する
    ///
    /// バージョン競合は再試行しても解消しないため即座に返す。
    pub async fn run<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let max_attempts = self.max_attempts;
        let mut attempt = 0u32;

        retry_notify(
            self.backoff(),
            || {
                attempt += 1;
                let current = attempt;
                let call = operation();
                async move {
                    call.await.map_err(|err| match err {
                        StoreError::VersionConflict { .. } => backoff::Error::permanent(err),
                        _ if current >= max_attempts => backoff::Error::permanent(err),
                        _ => backoff::Error::transient(err),
                    })
                }
            },
            |err: StoreError, wait: Duration| {
                warn!(
                    operation = operation_name,
                    error = %err,
                    retry_in_ms = wait.as_millis() as u64,
                    "Remote write failed, retrying"
                );
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Version;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    fn transport_error() -> StoreError {
        StoreError::transport("connection reset")
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);

        let result = policy(3)
            .run("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(transport_error())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);

        let result: Result<(), StoreError> = policy(3)
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transport_error()) }
            })
            .await;

        assert!(matches!(result, Err(StoreError::Transport(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_version_conflict_is_not_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<(), StoreError> = policy(3)
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(StoreError::VersionConflict {
                        expected: Version::new(1),
                        actual: Version::new(2),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(StoreError::VersionConflict { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
