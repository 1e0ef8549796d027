use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use fuxi_core::{DeltaKind, Keyed, Outcome, Result};
use fuxi_store::{DeltaFifo, Popped};
use metrics::counter;
use tracing::{debug, error, info};

use crate::RunFlag;

type ObjFn<K> = Arc<dyn Fn(K) -> BoxFuture<'static, Result<Outcome>> + Send + Sync>;
type PairFn<K> = Arc<dyn Fn(K, K) -> BoxFuture<'static, Result<Outcome>> + Send + Sync>;

/// Three independently optional callbacks; an unset slot is a no-op.
pub struct ResourceEventHandler<K> {
    on_add: Option<ObjFn<K>>,
    on_update: Option<PairFn<K>>,
    on_delete: Option<ObjFn<K>>,
}

impl<K> Default for ResourceEventHandler<K> {
    fn default() -> Self { Self { on_add: None, on_update: None, on_delete: None } }
}

impl<K> Clone for ResourceEventHandler<K> {
    fn clone(&self) -> Self {
        Self { on_add: self.on_add.clone(), on_update: self.on_update.clone(), on_delete: self.on_delete.clone() }
    }
}

impl<K: Send + 'static> ResourceEventHandler<K> {
    pub fn new() -> Self { Self::default() }

    pub fn on_add<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Outcome>> + Send + 'static,
    {
        self.on_add = Some(Arc::new(move |obj| f(obj).boxed()));
        self
    }

    pub fn on_update<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(K, K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Outcome>> + Send + 'static,
    {
        self.on_update = Some(Arc::new(move |old, new| f(old, new).boxed()));
        self
    }

    pub fn on_delete<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Outcome>> + Send + 'static,
    {
        self.on_delete = Some(Arc::new(move |obj| f(obj).boxed()));
        self
    }

    pub async fn handle_add(&self, obj: K) -> Result<Outcome> {
        match &self.on_add {
            Some(f) => f(obj).await,
            None => Ok(Outcome::skipped("no add handler")),
        }
    }

    pub async fn handle_update(&self, old: K, new: K) -> Result<Outcome> {
        match &self.on_update {
            Some(f) => f(old, new).await,
            None => Ok(Outcome::skipped("no update handler")),
        }
    }

    pub async fn handle_delete(&self, obj: K) -> Result<Outcome> {
        match &self.on_delete {
            Some(f) => f(obj).await,
            None => Ok(Outcome::skipped("no delete handler")),
        }
    }
}

/// Drains a [`DeltaFifo`] into a [`ResourceEventHandler`].
///
/// At least once, never blocking: handler errors and panics are logged and
/// the loop moves on to the next delta.
pub struct Dispatcher<K> {
    name: String,
    fifo: Arc<DeltaFifo<K>>,
    handler: ResourceEventHandler<K>,
    poll_interval: Duration,
    running: RunFlag,
}

impl<K> Dispatcher<K>
where
    K: Keyed + Clone + Send + Sync + 'static,
{
    pub fn new(
        name: impl Into<String>,
        fifo: Arc<DeltaFifo<K>>,
        handler: ResourceEventHandler<K>,
        poll_interval: Duration,
        running: RunFlag,
    ) -> Self {
        Self { name: name.into(), fifo, handler, poll_interval, running }
    }

    pub async fn run(self) {
        info!(dispatcher = %self.name, "dispatcher started");
        while self.running.is_running() {
            match self.fifo.pop_and_apply() {
                Some(popped) => self.process(popped).await,
                None => self.fifo.wait_ready(self.poll_interval).await,
            }
        }
        info!(dispatcher = %self.name, "dispatcher stopped");
    }

    /// Route one popped delta. The cache was already updated by the pop.
    pub async fn process(&self, popped: Popped<K>) {
        let Popped { key, delta, previous } = popped;
        let (phase, fut) = match delta.kind {
            DeltaKind::Added | DeltaKind::Updated | DeltaKind::Synced => {
                let new = delta.object.into_object();
                match previous {
                    Some(old) => ("update", self.handler.handle_update(old, new).boxed()),
                    None => ("add", self.handler.handle_add(new).boxed()),
                }
            }
            DeltaKind::Deleted => ("delete", self.handler.handle_delete(delta.object.into_object()).boxed()),
        };
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(Outcome::Done)) => debug!(dispatcher = %self.name, key = %key, phase, "handled"),
            Ok(Ok(Outcome::Skipped(reason))) => debug!(dispatcher = %self.name, key = %key, phase, reason = %reason, "skipped"),
            Ok(Err(e)) => {
                error!(dispatcher = %self.name, key = %key, phase, error = %e, "handler failed");
                counter!("dispatcher_handler_errors_total", 1u64, "dispatcher" => self.name.clone());
            }
            Err(_) => {
                error!(dispatcher = %self.name, key = %key, phase, "handler panicked");
                counter!("dispatcher_handler_errors_total", 1u64, "dispatcher" => self.name.clone());
            }
        }
    }
}
