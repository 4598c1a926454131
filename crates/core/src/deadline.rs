//! Request deadlines applied to every cache and store call.

use crate::error::{PopupError, PopupResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Point in time after which a request's remaining I/O is abandoned.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Drive `fut` until it resolves or the deadline passes. On expiry the
    /// future is dropped, cancelling whatever it had in flight.
    pub async fn run<F, T>(&self, fut: F) -> PopupResult<T>
    where
        F: Future<Output = PopupResult<T>>,
    {
        match tokio::time::timeout_at(self.at, fut).await {
            Ok(result) => result,
            Err(_) => Err(PopupError::DeadlineExceeded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_before_deadline() {
        let deadline = Deadline::after(Duration::from_secs(5));
        let v = deadline.run(async { Ok::<_, PopupError>(42) }).await.unwrap();
        assert_eq!(v, 42);
    }

    #[tokio::test]
    async fn test_expired_deadline_cancels() {
        let deadline = Deadline::after(Duration::from_millis(10));
        let result = deadline
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, PopupError>(())
            })
            .await;
        assert!(matches!(result, Err(PopupError::DeadlineExceeded)));
        assert!(deadline.is_expired());
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let deadline = Deadline::after(Duration::from_secs(5));
        let result = deadline
            .run(async { Err::<(), _>(PopupError::Cache("down".into())) })
            .await;
        assert!(matches!(result, Err(PopupError::Cache(_))));
    }
}
