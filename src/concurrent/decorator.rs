//! Crash recovery for a single pooled worker.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::pool::{Resource, ResourceFactory};
use crate::error::WorkerError;

/// Wraps one worker and rebuilds it from its factory when its process dies.
///
/// A crashed call is retried exactly once against the rebuilt worker; a second crash propagates.
/// Any other error propagates on first occurrence.
pub struct ResourceDecorator<R: Resource + ?Sized> {
    label: &'static str,
    producer: ResourceFactory<R>,
    inner: RwLock<Arc<R>>,
}

impl<R: Resource + ?Sized> ResourceDecorator<R> {
    /// Build the first worker from `producer`. `label` names the worker kind in log lines.
    pub fn new(label: &'static str, producer: ResourceFactory<R>) -> Self {
        let inner = producer();
        Self {
            label,
            producer,
            inner: RwLock::new(inner),
        }
    }

    /// The worker currently backing this decorator.
    pub async fn current(&self) -> Arc<R> {
        Arc::clone(&*self.inner.read().await)
    }

    /// Replace the current worker with a fresh, initialized one.
    pub async fn recover(&self) -> Result<(), WorkerError> {
        let fresh = (self.producer)();
        let stale = {
            let mut guard = self.inner.write().await;
            std::mem::replace(&mut *guard, Arc::clone(&fresh))
        };
        if let Err(err) = stale.dispose().await {
            log::debug!("{} worker could not be disposed after a crash: {err}", self.label);
        }
        fresh.init().await
    }

    /// Run `call` against the current worker, recovering and retrying once on a crash.
    pub async fn call_with_retry<O, F, Fut>(&self, call: F) -> Result<O, WorkerError>
    where
        F: Fn(Arc<R>) -> Fut,
        Fut: Future<Output = Result<O, WorkerError>>,
    {
        self.call_with_recovery(call, |_| std::future::ready(Ok(())))
            .await
    }

    /// Like [`call_with_retry`](Self::call_with_retry), but runs `restore` on the rebuilt
    /// worker before the retry so it can regain per-worker state.
    pub async fn call_with_recovery<O, F, Fut, P, PFut>(
        &self,
        call: F,
        restore: P,
    ) -> Result<O, WorkerError>
    where
        F: Fn(Arc<R>) -> Fut,
        Fut: Future<Output = Result<O, WorkerError>>,
        P: FnOnce(Arc<R>) -> PFut,
        PFut: Future<Output = Result<(), WorkerError>>,
    {
        match call(self.current().await).await {
            Err(err) if err.is_crash() => {
                self.log_crash(&err);
                self.recover().await?;
                let fresh = self.current().await;
                restore(Arc::clone(&fresh)).await?;
                call(fresh).await
            }
            other => other,
        }
    }

    fn log_crash(&self, err: &WorkerError) {
        match err {
            WorkerError::OutOfMemory { pid, .. } => log::warn!(
                "{} process [{pid}] ran out of memory. Retrying in a new process.",
                self.label
            ),
            WorkerError::Crashed {
                pid,
                exit_code,
                reason,
            } => {
                let code = exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string());
                log::warn!(
                    "{} process [{pid}] crashed with exit code {code}. Retrying in a new process. ({reason})",
                    self.label
                );
            }
            _ => {}
        }
    }
}

#[async_trait]
impl<R: Resource + ?Sized> Resource for ResourceDecorator<R> {
    async fn init(&self) -> Result<(), WorkerError> {
        self.current().await.init().await
    }

    async fn dispose(&self) -> Result<(), WorkerError> {
        self.current().await.dispose().await
    }
}
