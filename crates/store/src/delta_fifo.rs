use std::collections::hash_map::Entry;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use fuxi_core::{Delta, DeltaKind, DeltaObject, Keyed};
use metrics::gauge;
use rustc_hash::FxHashMap;
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Result of [`DeltaFifo::pop_and_apply`]: the delta plus the cached object it
/// replaced (or removed), read in the same critical section.
#[derive(Debug, Clone)]
pub struct Popped<K> {
    pub key: String,
    pub delta: Delta<K>,
    pub previous: Option<K>,
}

struct Inner<K> {
    items: FxHashMap<String, Vec<Delta<K>>>,
    queue: VecDeque<String>,
}

impl<K: Keyed> Inner<K> {
    fn will_be_deleted(&self, key: &str) -> bool {
        self.items.get(key).and_then(|d| d.last()).map(|d| d.is_delete()).unwrap_or(false)
    }

    fn queue_action(&mut self, kind: DeltaKind, object: DeltaObject<K>) -> bool {
        let key = object.key();
        // Delete wins over a later relist of the same key.
        if kind == DeltaKind::Synced && self.will_be_deleted(&key) {
            trace!(key = %key, "sync dropped: delete pending");
            return false;
        }
        let Inner { items, queue } = self;
        let deltas = match items.entry(key) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                queue.push_back(e.key().clone());
                e.insert(Vec::new())
            }
        };
        deltas.push(Delta { kind, object });
        dedup_deletions(deltas);
        true
    }

    fn pop(&mut self) -> Option<(String, Delta<K>)> {
        while let Some(key) = self.queue.front().cloned() {
            let Some(deltas) = self.items.get_mut(&key) else {
                self.queue.pop_front();
                continue;
            };
            if deltas.is_empty() {
                self.items.remove(&key);
                self.queue.pop_front();
                continue;
            }
            let delta = deltas.remove(0);
            if deltas.is_empty() {
                self.items.remove(&key);
                self.queue.pop_front();
            }
            return Some((key, delta));
        }
        None
    }
}

/// Collapse a trailing pair of deletes into one, keeping the newest unless it
/// is only a placeholder.
fn dedup_deletions<K>(deltas: &mut Vec<Delta<K>>) {
    let n = deltas.len();
    if n < 2 {
        return;
    }
    let (older, newer) = (&deltas[n - 2], &deltas[n - 1]);
    if !(older.is_delete() && newer.is_delete()) {
        return;
    }
    if newer.object.is_placeholder() {
        deltas.pop();
    } else {
        deltas.remove(n - 2);
    }
}

/// Ordered per-key event queue.
///
/// Keys are served first-queued-first-served and deltas within a key in
/// arrival order. All operations take one lock; the known-object cache is
/// only ever locked while holding it, never the other way round.
pub struct DeltaFifo<K> {
    name: String,
    inner: Mutex<Inner<K>>,
    known: Arc<crate::Cache<K>>,
    ready: Notify,
}

impl<K: Keyed + Clone> DeltaFifo<K> {
    pub fn new(name: impl Into<String>, known: Arc<crate::Cache<K>>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner { items: FxHashMap::default(), queue: VecDeque::new() }),
            known,
            ready: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K>> { self.inner.lock().unwrap_or_else(PoisonError::into_inner) }

    pub fn known_objects(&self) -> &Arc<crate::Cache<K>> { &self.known }

    /// Number of keys with pending deltas.
    pub fn len(&self) -> usize { self.lock().queue.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Pending delta kinds for a key, oldest first.
    pub fn pending(&self, key: &str) -> Vec<DeltaKind> {
        self.lock().items.get(key).map(|d| d.iter().map(|d| d.kind).collect()).unwrap_or_default()
    }

    fn enqueued(&self, inner: &Inner<K>) {
        gauge!("delta_fifo_depth", inner.queue.len() as f64, "queue" => self.name.clone());
        self.ready.notify_one();
    }

    pub fn add(&self, obj: K) {
        let mut inner = self.lock();
        inner.queue_action(DeltaKind::Added, DeltaObject::Object(obj));
        self.enqueued(&inner);
    }

    pub fn update(&self, obj: K) {
        let mut inner = self.lock();
        inner.queue_action(DeltaKind::Updated, DeltaObject::Object(obj));
        self.enqueued(&inner);
    }

    /// Queue a delete. Returns false (and queues nothing) when the key is
    /// neither pending nor known, i.e. a duplicate or late notification.
    pub fn delete(&self, obj: K) -> bool {
        let key = obj.key();
        let mut inner = self.lock();
        if !inner.items.contains_key(&key) && !self.known.contains_key(&key) {
            debug!(queue = %self.name, key = %key, "delete ignored: unknown key");
            return false;
        }
        inner.queue_action(DeltaKind::Deleted, DeltaObject::Object(obj));
        self.enqueued(&inner);
        true
    }

    /// Full resynchronization: a `Synced` delta for every listed object and a
    /// placeholder delete for every known key the listing no longer contains.
    pub fn replace(&self, objs: Vec<K>) {
        let mut inner = self.lock();
        let mut listed = rustc_hash::FxHashSet::default();
        for obj in objs {
            listed.insert(obj.key());
            inner.queue_action(DeltaKind::Synced, DeltaObject::Object(obj));
        }
        let mut vanished = 0usize;
        for (key, last_known) in self.known.snapshot() {
            if listed.contains(&key) {
                continue;
            }
            vanished += 1;
            inner.queue_action(DeltaKind::Deleted, DeltaObject::DeletedFinalStateUnknown { key, last_known });
        }
        debug!(queue = %self.name, listed = listed.len(), vanished, "replace");
        self.enqueued(&inner);
    }

    /// Oldest delta of the oldest non-empty key.
    pub fn pop(&self) -> Option<(String, Delta<K>)> {
        let mut inner = self.lock();
        let out = inner.pop();
        gauge!("delta_fifo_depth", inner.queue.len() as f64, "queue" => self.name.clone());
        out
    }

    /// Pop and reflect the delta into the known-object cache atomically, so a
    /// concurrent `delete` never observes the key as absent from both.
    pub fn pop_and_apply(&self) -> Option<Popped<K>> {
        let mut inner = self.lock();
        let (key, delta) = inner.pop()?;
        gauge!("delta_fifo_depth", inner.queue.len() as f64, "queue" => self.name.clone());
        let previous = match delta.kind {
            DeltaKind::Added | DeltaKind::Updated | DeltaKind::Synced => {
                self.known.upsert(delta.object.object().clone())
            }
            DeltaKind::Deleted => self.known.delete_by_key(&key),
        };
        Some(Popped { key, delta, previous })
    }

    /// Wait until something is enqueued or `max` elapses.
    pub async fn wait_ready(&self, max: Duration) {
        let _ = tokio::time::timeout(max, self.ready.notified()).await;
    }
}
