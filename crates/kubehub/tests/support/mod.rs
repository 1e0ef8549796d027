#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use fuxi_core::{Error, ListPage, Result, WatchEvent};
use fuxi_kubehub::{ListerWatcher, WatchStream};
use k8s_openapi::api::core::v1::ConfigMap;
use tokio::sync::Notify;

pub fn cm(name: &str, rv: &str) -> ConfigMap {
    serde_json::from_value(serde_json::json!({
        "metadata": { "name": name, "namespace": "ns", "resourceVersion": rv }
    }))
    .unwrap()
}

pub fn page(items: Vec<ConfigMap>, rv: &str) -> ListPage<ConfigMap> {
    ListPage { items, resource_version: rv.to_string() }
}

pub struct ListStep {
    pub gate: Option<Arc<Notify>>,
    pub result: Result<ListPage<ConfigMap>>,
}

impl ListStep {
    pub fn ok(items: Vec<ConfigMap>, rv: &str) -> Self { Self { gate: None, result: Ok(page(items, rv)) } }
    pub fn err(msg: &str) -> Self { Self { gate: None, result: Err(Error::transport(msg)) } }
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }
}

pub enum WatchStep {
    Events(Vec<Result<WatchEvent<ConfigMap>>>),
    Fail(String),
}

/// Lister-watcher that replays scripted responses and records the versions
/// it was called with. Once a script runs dry, calls park forever.
#[derive(Default)]
pub struct ScriptedLw {
    lists: Mutex<VecDeque<ListStep>>,
    watches: Mutex<VecDeque<WatchStep>>,
    pub list_calls: Mutex<Vec<String>>,
    pub watch_calls: Mutex<Vec<String>>,
}

impl ScriptedLw {
    pub fn new(lists: Vec<ListStep>, watches: Vec<WatchStep>) -> Arc<Self> {
        Arc::new(Self {
            lists: Mutex::new(lists.into()),
            watches: Mutex::new(watches.into()),
            ..Default::default()
        })
    }

    pub fn list_count(&self) -> usize { self.list_calls.lock().unwrap().len() }
    pub fn watch_versions(&self) -> Vec<String> { self.watch_calls.lock().unwrap().clone() }
}

#[async_trait]
impl ListerWatcher<ConfigMap> for ScriptedLw {
    async fn list(&self, resource_version: &str) -> Result<ListPage<ConfigMap>> {
        self.list_calls.lock().unwrap().push(resource_version.to_string());
        let step = self.lists.lock().unwrap().pop_front();
        match step {
            Some(step) => {
                if let Some(gate) = step.gate {
                    gate.notified().await;
                }
                step.result
            }
            None => futures::future::pending().await,
        }
    }

    async fn watch(&self, resource_version: &str, _timeout_secs: u32) -> Result<WatchStream<ConfigMap>> {
        self.watch_calls.lock().unwrap().push(resource_version.to_string());
        let step = self.watches.lock().unwrap().pop_front();
        match step {
            Some(WatchStep::Events(events)) => Ok(stream::iter(events).boxed()),
            Some(WatchStep::Fail(msg)) => Err(Error::transport(msg)),
            None => Ok(stream::pending().boxed()),
        }
    }
}

pub async fn eventually<F: Fn() -> bool>(what: &str, f: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !f() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
