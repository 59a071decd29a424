//! Cooperative cancellation for storage operations.

use futures::future::BoxFuture;
use std::{fmt, future::Future, sync::Arc};
use tokio::sync::watch;

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// A cancellation flag shared by every operation issued through a connection.
///
/// Scopes form a tree: a child is cancelled when it or any ancestor is cancelled,
/// while cancelling a child leaves its parent untouched. Once cancelled, a scope
/// stays cancelled.
#[derive(Clone)]
pub struct CancellationScope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    sender: watch::Sender<bool>,
    parent: Option<CancellationScope>,
}

impl CancellationScope {
    pub fn new() -> Self {
        Self::with_parent(None)
    }

    fn with_parent(parent: Option<CancellationScope>) -> Self {
        let (sender, _) = watch::channel(false);

        Self { inner: Arc::new(ScopeInner { sender, parent }) }
    }

    /// Creates a scope that is also cancelled when `self` is.
    pub fn child(&self) -> Self {
        Self::with_parent(Some(self.clone()))
    }

    pub fn cancel(&self) {
        self.inner.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.sender.borrow()
            || self
                .inner
                .parent
                .as_ref()
                .is_some_and(CancellationScope::is_cancelled)
    }

    /// Resolves once this scope or one of its ancestors is cancelled.
    pub fn cancelled(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut own = self.inner.sender.subscribe();
            let own_cancelled = async move {
                let _ = own.wait_for(|cancelled| *cancelled).await.map(|_| ());
            };

            match &self.inner.parent {
                Some(parent) => {
                    tokio::select! {
                        _ = own_cancelled => {},
                        _ = parent.cancelled() => {},
                    }
                }
                None => own_cancelled.await,
            }
        })
    }

    /// Fails fast when already cancelled.
    pub fn check(&self) -> DocumentStoreResult<()> {
        if self.is_cancelled() {
            return Err(DocumentStoreError::Cancelled);
        }

        Ok(())
    }

    /// Runs `operation` unless the scope is cancelled first.
    pub async fn run<T, F>(&self, operation: F) -> DocumentStoreResult<T>
    where
        F: Future<Output = DocumentStoreResult<T>>,
    {
        self.check()?;

        tokio::select! {
            biased;
            _ = self.cancelled() => Err(DocumentStoreError::Cancelled),
            result = operation => result,
        }
    }
}

impl Default for CancellationScope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationScope")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn child_follows_parent() {
        let parent = CancellationScope::new();
        let child = parent.child();

        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(matches!(child.check(), Err(DocumentStoreError::Cancelled)));
    }

    #[tokio::test]
    async fn cancelling_child_leaves_parent() {
        let parent = CancellationScope::new();
        let child = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn run_is_interrupted_by_cancel() {
        let scope = CancellationScope::new();
        let canceller = scope.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = scope
            .run(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(DocumentStoreError::Cancelled)));
    }

    #[tokio::test]
    async fn run_returns_operation_result() {
        let scope = CancellationScope::new();

        assert_eq!(scope.run(async { Ok(42) }).await.unwrap(), 42);
    }
}
