//! Bounded pool of exclusive worker resources.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::WorkerError;

/// A worker owned by a [`Pool`].
#[async_trait]
pub trait Resource: Send + Sync {
    /// Prepare the worker before its first call.
    async fn init(&self) -> Result<(), WorkerError> {
        Ok(())
    }

    /// Release the worker's underlying isolation resources.
    async fn dispose(&self) -> Result<(), WorkerError> {
        Ok(())
    }
}

/// Produces fresh workers.
pub type ResourceFactory<R> = Arc<dyn Fn() -> Arc<R> + Send + Sync>;

/// Pool-level errors.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool no longer accepts work.
    #[error("the pool has been disposed")]
    Disposed,
    /// Creating or initializing a worker failed.
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

struct PoolState<R: ?Sized> {
    idle: VecDeque<Arc<R>>,
    all: Vec<Arc<R>>,
}

struct PoolInner<R: ?Sized> {
    factory: ResourceFactory<R>,
    permits: Arc<Semaphore>,
    capacity: AtomicUsize,
    state: Mutex<PoolState<R>>,
}

impl<R: ?Sized> PoolInner<R> {
    fn lock_state(&self) -> MutexGuard<'_, PoolState<R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed-capacity set of exclusive workers.
///
/// Workers are created lazily, one per idle slot, and each worker serves at most one call at a
/// time. This is the only component that creates or destroys workers.
pub struct Pool<R: Resource + ?Sized> {
    inner: Arc<PoolInner<R>>,
}

impl<R: Resource + ?Sized> Clone for Pool<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// A worker checked out of the pool; returns to the idle set on drop.
pub struct PooledWorker<R: Resource + ?Sized> {
    worker: Option<Arc<R>>,
    pool: Arc<PoolInner<R>>,
    _permit: OwnedSemaphorePermit,
}

impl<R: Resource + ?Sized> PooledWorker<R> {
    /// The checked-out worker.
    pub fn resource(&self) -> Arc<R> {
        match &self.worker {
            Some(worker) => Arc::clone(worker),
            None => unreachable!("worker is only taken on drop"),
        }
    }
}

impl<R: Resource + ?Sized> Drop for PooledWorker<R> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.pool.lock_state().idle.push_back(worker);
        }
    }
}

impl<R: Resource + ?Sized> Pool<R> {
    /// Create a pool that holds at most `capacity` workers built by `factory`.
    pub fn new(capacity: usize, factory: ResourceFactory<R>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                factory,
                permits: Arc::new(Semaphore::new(capacity)),
                capacity: AtomicUsize::new(capacity),
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    all: Vec::new(),
                }),
            }),
        }
    }

    /// Maximum number of concurrent calls.
    pub fn capacity(&self) -> usize {
        self.inner.capacity.load(Ordering::SeqCst)
    }

    /// Number of workers created so far.
    pub fn worker_count(&self) -> usize {
        self.inner.lock_state().all.len()
    }

    /// True once [`Pool::dispose`] has run.
    pub fn is_disposed(&self) -> bool {
        self.inner.permits.is_closed()
    }

    /// Raise the capacity; new workers are created lazily on demand.
    pub fn add_capacity(&self, additional: usize) {
        if additional == 0 || self.is_disposed() {
            return;
        }
        self.inner.capacity.fetch_add(additional, Ordering::SeqCst);
        self.inner.permits.add_permits(additional);
    }

    /// Eagerly create and initialize workers up to the current capacity.
    ///
    /// Must run before any call is scheduled.
    pub async fn init(&self) -> Result<(), PoolError> {
        if self.is_disposed() {
            return Err(PoolError::Disposed);
        }
        let missing = self.capacity().saturating_sub(self.worker_count());
        let created =
            futures::future::try_join_all((0..missing).map(|_| self.create_worker())).await?;
        self.inner.lock_state().idle.extend(created);
        Ok(())
    }

    async fn create_worker(&self) -> Result<Arc<R>, PoolError> {
        let worker = (self.inner.factory)();
        if let Err(err) = worker.init().await {
            if let Err(dispose_err) = worker.dispose().await {
                log::debug!("failed to dispose worker after init failure: {dispose_err}");
            }
            return Err(err.into());
        }
        self.inner.lock_state().all.push(Arc::clone(&worker));
        Ok(worker)
    }

    /// Wait for an idle worker, creating one if the pool is below capacity.
    pub async fn acquire(&self) -> Result<PooledWorker<R>, PoolError> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Disposed)?;
        let idle = self.inner.lock_state().idle.pop_front();
        let worker = match idle {
            Some(worker) => worker,
            None => self.create_worker().await?,
        };
        Ok(PooledWorker {
            worker: Some(worker),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Run `work` for every item on an exclusive worker.
    ///
    /// Results are yielded in completion order, not input order. The next input item is only
    /// pulled once a worker is available for it.
    pub fn schedule<S, T, O, E, F, Fut>(
        &self,
        input: S,
        work: F,
    ) -> impl Stream<Item = Result<O, E>> + Send
    where
        R: 'static,
        S: Stream<Item = T> + Send,
        T: Send,
        F: Fn(Arc<R>, T) -> Fut + Send + Sync,
        Fut: Future<Output = Result<O, E>> + Send,
        O: Send,
        E: From<PoolError> + Send,
    {
        let pool = self.clone();
        let work = Arc::new(work);
        input
            .then(move |item| {
                let pool = pool.clone();
                async move { (pool.acquire().await, item) }
            })
            .map(move |(acquired, item)| {
                let work = Arc::clone(&work);
                async move {
                    let worker = acquired.map_err(E::from)?;
                    let result = (*work)(worker.resource(), item).await;
                    drop(worker);
                    result
                }
            })
            // Held workers bound the in-flight calls, not this buffer.
            .buffer_unordered(usize::MAX)
    }

    /// Invoke `f` once on every worker created so far.
    pub async fn run_on_all<F, Fut>(&self, f: F) -> Result<(), WorkerError>
    where
        F: Fn(Arc<R>) -> Fut,
        Fut: Future<Output = Result<(), WorkerError>>,
    {
        let workers = self.inner.lock_state().all.clone();
        futures::future::try_join_all(workers.into_iter().map(f)).await?;
        Ok(())
    }

    /// Stop accepting work, wait for in-flight calls, then dispose every worker.
    pub async fn dispose(&self) -> Result<(), WorkerError> {
        if self.is_disposed() {
            return Ok(());
        }
        let capacity = u32::try_from(self.capacity()).unwrap_or(u32::MAX);
        let drained = self.inner.permits.acquire_many(capacity).await;
        self.inner.permits.close();
        drop(drained);

        let workers = {
            let mut state = self.inner.lock_state();
            state.idle.clear();
            std::mem::take(&mut state.all)
        };

        let mut first_error = None;
        for worker in workers {
            if let Err(err) = worker.dispose().await {
                log::warn!("failed to dispose worker: {err}");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
