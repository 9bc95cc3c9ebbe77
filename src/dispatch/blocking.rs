//! Sync dispatcher.
//!
//! # Responsibilities
//! - Run a sync chain on tokio's blocking pool
//! - Bound concurrent sync handlers to `workers`
//! - Surface handler failures and panics to the awaiting caller
//!
//! # Limitations
//! - A handler that is running when its client goes away is not
//!   interrupted. It runs to completion, keeps its worker slot until then,
//!   and its result is dropped.

use std::sync::Arc;

use axum::response::Response;
use tokio::sync::Semaphore;

use crate::dispatch::panic_message;
use crate::error::DispatchError;
use crate::http::request::RequestContext;
use crate::middleware::SyncChain;
use crate::observability::metrics;

#[derive(Debug, Clone)]
pub struct SyncDispatcher {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl SyncDispatcher {
    /// Pool with `workers` slots (at least one).
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Free worker slots right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `chain` for `ctx` on a worker and wait for the result.
    pub async fn dispatch(&self, chain: SyncChain, mut ctx: RequestContext) -> Result<Response, DispatchError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| DispatchError::WorkerPool(e.to_string()))?;

        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let _busy = metrics::WorkerBusyGuard::new();
            chain.call(&mut ctx)
        });

        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(DispatchError::Handler(panic_message(e.into_panic()).into())),
            Err(e) => Err(DispatchError::WorkerPool(e.to_string())),
        }
    }
}
