//! Exclusive control over actuation.
//!
//! At most one command runs at a time. Waiters are served in arrival order and
//! the token is released when its guard drops, whether the command finished,
//! failed, timed out or its task was cancelled.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("Control manager shut down")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct ControlManager {
    permit: Arc<Semaphore>,
    holder: Arc<Mutex<Option<String>>>,
}

impl Default for ControlManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlManager {
    pub fn new() -> Self {
        Self {
            permit: Arc::new(Semaphore::new(1)),
            holder: Arc::new(Mutex::new(None)),
        }
    }

    /// Wait for the token. The semaphore queues waiters fairly.
    pub async fn acquire(&self, owner: &str) -> Result<ControlToken, ControlError> {
        let permit = Arc::clone(&self.permit)
            .acquire_owned()
            .await
            .map_err(|_| ControlError::Closed)?;
        *self.holder.lock() = Some(owner.to_string());
        debug!(owner, "control acquired");
        Ok(ControlToken {
            owner: owner.to_string(),
            holder: Arc::clone(&self.holder),
            _permit: permit,
        })
    }

    /// Run `work` while holding the token.
    pub async fn with_control<F, T>(&self, owner: &str, work: F) -> Result<T, ControlError>
    where
        F: Future<Output = T>,
    {
        let _token = self.acquire(owner).await?;
        Ok(work.await)
    }

    /// Who holds the token right now, if anyone
    pub fn holder(&self) -> Option<String> {
        self.holder.lock().clone()
    }

    pub fn is_held(&self) -> bool {
        self.permit.available_permits() == 0
    }

    /// Refuse all future acquisitions; pending waiters get [`ControlError::Closed`].
    pub fn close(&self) {
        self.permit.close();
    }
}

/// Proof of exclusive control. Dropping it releases control.
#[derive(Debug)]
pub struct ControlToken {
    owner: String,
    holder: Arc<Mutex<Option<String>>>,
    // released after `drop` below has cleared the holder
    _permit: OwnedSemaphorePermit,
}

impl ControlToken {
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

impl Drop for ControlToken {
    fn drop(&mut self) {
        *self.holder.lock() = None;
        debug!(owner = %self.owner, "control released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    #[tokio::test]
    async fn test_token_released_on_drop() {
        let control = ControlManager::new();
        let token = control.acquire("a").await.unwrap();
        assert!(control.is_held());
        assert_eq!(control.holder().as_deref(), Some("a"));
        assert_eq!(token.owner(), "a");

        drop(token);
        assert!(!control.is_held());
        assert_eq!(control.holder(), None);
    }

    #[tokio::test]
    async fn test_second_acquire_waits() {
        let control = ControlManager::new();
        let token = control.acquire("a").await.unwrap();
        assert!(timeout(Duration::from_millis(20), control.acquire("b"))
            .await
            .is_err());
        drop(token);
        let token = timeout(Duration::from_millis(100), control.acquire("b"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token.owner(), "b");
    }

    #[tokio::test]
    async fn test_waiters_served_in_arrival_order() {
        let control = ControlManager::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = control.acquire("first").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..5 {
            let control = control.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _token = control.acquire(&format!("w{i}")).await.unwrap();
                order.lock().push(i);
            }));
            // let each waiter enqueue before the next one
            sleep(Duration::from_millis(5)).await;
        }
        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_cancelled_task_releases_token() {
        let control = ControlManager::new();
        let task = {
            let control = control.clone();
            tokio::spawn(async move {
                control
                    .with_control("stuck", sleep(Duration::from_secs(3600)))
                    .await
            })
        };
        while !control.is_held() {
            sleep(Duration::from_millis(1)).await;
        }
        task.abort();
        let _ = task.await;
        let token = timeout(Duration::from_millis(100), control.acquire("next"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token.owner(), "next");
    }

    #[tokio::test]
    async fn test_closed_manager_refuses_acquire() {
        let control = ControlManager::new();
        control.close();
        assert_eq!(control.acquire("a").await.unwrap_err(), ControlError::Closed);
    }
}
