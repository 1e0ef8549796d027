use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use fuxi_core::Keyed;
use fuxi_store::{Cache, DeltaFifo};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{Dispatcher, ListerWatcher, Reflector, ReflectorConfig, ResourceEventHandler, RunFlag};

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub reflector: ReflectorConfig,
    /// Upper bound on how long the dispatcher sleeps when the queue is empty.
    pub poll_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self { Self { reflector: ReflectorConfig::default(), poll_interval: Duration::from_secs(1) } }
}

/// One resource type's reflector + dispatcher pair, sharing a cache and queue.
pub struct Controller<K> {
    name: String,
    cache: Arc<Cache<K>>,
    running: RunFlag,
    reflector: Option<BoxFuture<'static, ()>>,
    dispatcher: Option<BoxFuture<'static, ()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<K> Controller<K>
where
    K: Keyed + Clone + Send + Sync + 'static,
{
    pub fn new<L>(name: impl Into<String>, lw: L, handler: ResourceEventHandler<K>, config: ControllerConfig) -> Self
    where
        L: ListerWatcher<K> + 'static,
    {
        let name = name.into();
        let cache = Arc::new(Cache::new());
        let fifo = Arc::new(DeltaFifo::new(name.clone(), cache.clone()));
        let running = RunFlag::new();
        let reflector = Reflector::new(name.clone(), lw, fifo.clone(), config.reflector, running.clone());
        let dispatcher = Dispatcher::new(name.clone(), fifo.clone(), handler, config.poll_interval, running.clone());
        Self {
            name,
            cache,
            running,
            reflector: Some(reflector.run().boxed()),
            dispatcher: Some(dispatcher.run().boxed()),
            tasks: Vec::new(),
        }
    }

    /// Read-only view of the objects delivered so far.
    pub fn cache(&self) -> Arc<Cache<K>> { self.cache.clone() }

    /// Spawn the reflector and dispatcher tasks. A second call is a no-op.
    pub fn start(&mut self) {
        let (Some(reflector), Some(dispatcher)) = (self.reflector.take(), self.dispatcher.take()) else {
            warn!(controller = %self.name, "controller already started");
            return;
        };
        info!(controller = %self.name, "controller starting");
        self.tasks.push(tokio::spawn(reflector));
        self.tasks.push(tokio::spawn(dispatcher));
    }

    /// Ask both loops to exit at their next boundary.
    pub fn stop(&self) { self.running.stop(); }

    /// Wait for the spawned tasks to finish (after [`Controller::stop`]).
    pub async fn join(&mut self) {
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(controller = %self.name, error = %e, "controller task ended abnormally");
            }
        }
    }
}
