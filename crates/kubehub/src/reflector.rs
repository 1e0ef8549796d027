use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use fuxi_core::{Error, Keyed, Result, WatchEvent};
use fuxi_store::DeltaFifo;
use metrics::counter;
use tracing::{debug, info, warn};

use crate::{ListerWatcher, RunFlag};

/// Longest pause between a normally closed watch and the next one.
const RESUME_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ReflectorConfig {
    /// Server-side timeout for each watch request.
    pub watch_timeout_secs: u32,
    /// Pause after a failed list or an aborted watch before relisting.
    pub backoff: Duration,
    /// Relist this often even when the watch is healthy. `None` disables it.
    pub resync_period: Option<Duration>,
}

impl Default for ReflectorConfig {
    fn default() -> Self {
        Self { watch_timeout_secs: 60, backoff: Duration::from_secs(10), resync_period: Some(Duration::from_secs(300)) }
    }
}

/// Why an inner watch loop ended.
#[derive(Debug, PartialEq, Eq)]
enum WatchEnd {
    /// Stream closed normally (server timeout); resume from the last version.
    Closed,
    Stopped,
}

/// Keeps a [`DeltaFifo`] mirroring a remote collection: list, replace, then
/// stream incremental events, relisting after any gap.
pub struct Reflector<K, L> {
    name: String,
    lw: L,
    fifo: Arc<DeltaFifo<K>>,
    config: ReflectorConfig,
    running: RunFlag,
}

impl<K, L> Reflector<K, L>
where
    K: Keyed + Clone + Send + Sync + 'static,
    L: ListerWatcher<K>,
{
    pub fn new(name: impl Into<String>, lw: L, fifo: Arc<DeltaFifo<K>>, config: ReflectorConfig, running: RunFlag) -> Self {
        Self { name: name.into(), lw, fifo, config, running }
    }

    pub async fn run(self) {
        info!(reflector = %self.name, "reflector started");
        while self.running.is_running() {
            let mut resource_version = match self.list().await {
                Ok(rv) => rv,
                Err(e) => {
                    warn!(reflector = %self.name, error = %e, "list failed");
                    counter!("reflector_list_errors_total", 1u64, "reflector" => self.name.clone());
                    tokio::time::sleep(self.config.backoff).await;
                    continue;
                }
            };
            let listed_at = Instant::now();

            let mut failed = false;
            while self.running.is_running() {
                if self.config.resync_period.is_some_and(|p| listed_at.elapsed() >= p) {
                    debug!(reflector = %self.name, "resync period elapsed; relisting");
                    break;
                }
                match self.watch(&mut resource_version).await {
                    Ok(WatchEnd::Closed) => tokio::time::sleep(self.config.backoff.min(RESUME_PAUSE)).await,
                    Ok(WatchEnd::Stopped) => break,
                    Err(e) => {
                        warn!(reflector = %self.name, rv = %resource_version, error = %e, "watch aborted; will relist");
                        counter!("reflector_watch_restarts_total", 1u64, "reflector" => self.name.clone());
                        failed = true;
                        break;
                    }
                }
            }
            if failed && self.running.is_running() {
                tokio::time::sleep(self.config.backoff).await;
            }
        }
        info!(reflector = %self.name, "reflector stopped");
    }

    async fn list(&self) -> Result<String> {
        let page = self.lw.list("0").await?;
        counter!("reflector_list_total", 1u64, "reflector" => self.name.clone());
        debug!(reflector = %self.name, count = page.items.len(), rv = %page.resource_version, "listed");
        self.fifo.replace(page.items);
        Ok(page.resource_version)
    }

    async fn watch(&self, resource_version: &mut String) -> Result<WatchEnd> {
        let mut stream = self.lw.watch(resource_version, self.config.watch_timeout_secs).await?;
        while let Some(item) = stream.next().await {
            if !self.running.is_running() {
                return Ok(WatchEnd::Stopped);
            }
            let event = match item {
                Ok(ev) => ev,
                Err(Error::Decode(msg)) => {
                    warn!(reflector = %self.name, error = %msg, "skipping watch event of unexpected type");
                    continue;
                }
                Err(e) => return Err(e),
            };
            match event {
                WatchEvent::Added(o) => {
                    advance(resource_version, &o);
                    self.fifo.add(o);
                }
                WatchEvent::Modified(o) => {
                    advance(resource_version, &o);
                    self.fifo.update(o);
                }
                WatchEvent::Deleted(o) => {
                    advance(resource_version, &o);
                    self.fifo.delete(o);
                }
                WatchEvent::Bookmark(rv) => *resource_version = rv,
                WatchEvent::Error(msg) => return Err(Error::transport(msg)),
            }
            counter!("reflector_watch_events_total", 1u64, "reflector" => self.name.clone());
        }
        Ok(WatchEnd::Closed)
    }
}

fn advance<K: Keyed>(resource_version: &mut String, obj: &K) {
    if let Some(rv) = obj.resource_version() {
        *resource_version = rv;
    }
}
