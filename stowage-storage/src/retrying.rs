//! Bounded retry decorator for any storage backend.

use std::future::Future;

use async_trait::async_trait;
use stowage_core::{RetryPolicy, StorageError, StorageObject};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::StorageBackend;

/// Wraps a backend and retries transient failures under a [`RetryPolicy`].
///
/// Only `Unavailable` is retried. When the policy runs out of attempts the
/// call fails with `RetriesExhausted` carrying the last error.
#[derive(Debug)]
pub struct RetryingStorage<B> {
    inner: B,
    policy: RetryPolicy,
}

impl<B: StorageBackend> RetryingStorage<B> {
    pub fn new(inner: B, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    async fn execute_with_retry<F, Fut, T>(
        &self,
        operation: &str,
        path: &str,
        mut operation_fn: F,
    ) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let mut attempt = 1;
        loop {
            match operation_fn().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            operation = %operation,
                            path = %path,
                            attempt = attempt,
                            "Storage operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) if !error.is_retryable() => return Err(error),
                Err(error) => {
                    if !self.policy.should_retry(attempt) {
                        if !self.policy.is_enabled() {
                            return Err(error);
                        }
                        warn!(
                            operation = %operation,
                            path = %path,
                            attempts = attempt,
                            error = %error,
                            "Storage operation failed permanently"
                        );
                        return Err(StorageError::RetriesExhausted {
                            operation: operation.to_string(),
                            attempts: attempt,
                            last: Box::new(error),
                        });
                    }

                    debug!(
                        operation = %operation,
                        path = %path,
                        attempt = attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = self.policy.delay.as_millis() as u64,
                        error = %error,
                        "Storage operation failed, will retry"
                    );
                    sleep(self.policy.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl<B: StorageBackend> StorageBackend for RetryingStorage<B> {
    async fn list_objects(&self, prefix: &str) -> Result<Vec<StorageObject>, StorageError> {
        self.execute_with_retry("list", prefix, move || self.inner.list_objects(prefix))
            .await
    }

    async fn get_object(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.execute_with_retry("get", path, move || self.inner.get_object(path))
            .await
    }

    async fn put_object(&self, path: &str, content: &[u8]) -> Result<(), StorageError> {
        self.execute_with_retry("put", path, move || self.inner.put_object(path, content))
            .await
    }

    async fn delete_object(&self, path: &str) -> Result<(), StorageError> {
        self.execute_with_retry("delete", path, move || self.inner.delete_object(path))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;
    use std::time::Duration;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(1), attempts)
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let storage = RetryingStorage::new(MemoryStorage::new(), policy(3));
        storage.inner().put_object("a.tgz", b"a").await.unwrap();
        storage.inner().fail_next(2);

        assert_eq!(storage.get_object("a.tgz").await.unwrap(), b"a");
    }

    #[tokio::test]
    async fn test_exhaustion_is_distinct_error() {
        let storage = RetryingStorage::new(MemoryStorage::new(), policy(3));
        storage.inner().set_unavailable(true);

        let err = storage.list_objects("").await.unwrap_err();
        match err {
            StorageError::RetriesExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 3);
                assert!(last.is_retryable());
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let storage = RetryingStorage::new(MemoryStorage::new(), policy(5));
        let err = storage.get_object("missing.tgz").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_single_attempt_policy_passes_error_through() {
        let storage = RetryingStorage::new(MemoryStorage::new(), RetryPolicy::none());
        storage.inner().set_unavailable(true);
        let err = storage.list_objects("").await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable { .. }));
    }
}
