#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use fuxi_core::{Error, ListPage, Result, WatchEvent};
use fuxi_kubehub::{ListerWatcher, WatchStream};
use fuxi_provisioner::{Deleter, PluginRegistry, ProvisionPlugin, Provisioner, RetryPolicy, VolumeApi, VolumeOptions};
use fuxi_store::Cache;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use serde_json::json;
use tokio::sync::Notify;

pub fn claim(ns: &str, name: &str, uid: &str, class: &str) -> PersistentVolumeClaim {
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": { "name": name, "namespace": ns, "uid": uid, "resourceVersion": "100" },
        "spec": {
            "accessModes": ["ReadWriteOnce"],
            "storageClassName": class,
            "resources": { "requests": { "storage": "5Gi" } }
        }
    }))
    .unwrap()
}

pub fn bound(mut pvc: PersistentVolumeClaim, volume: &str) -> PersistentVolumeClaim {
    pvc.spec.get_or_insert_with(Default::default).volume_name = Some(volume.to_string());
    pvc
}

pub fn annotated(mut pvc: PersistentVolumeClaim, key: &str, value: &str) -> PersistentVolumeClaim {
    pvc.metadata.annotations.get_or_insert_with(Default::default).insert(key.to_string(), value.to_string());
    pvc
}

pub fn storage_class(name: &str, provisioner: &str, params: &[(&str, &str)]) -> StorageClass {
    let parameters: serde_json::Map<String, serde_json::Value> =
        params.iter().map(|(k, v)| (k.to_string(), json!(v))).collect();
    serde_json::from_value(json!({
        "metadata": { "name": name },
        "provisioner": provisioner,
        "parameters": parameters
    }))
    .unwrap()
}

pub fn with_phase(mut pv: PersistentVolume, phase: &str) -> PersistentVolume {
    pv.status.get_or_insert_with(Default::default).phase = Some(phase.to_string());
    pv
}

/// Plugin that hands out `vol-<pv name>` assets and records every call.
#[derive(Default)]
pub struct FakePlugin {
    pub provisioned: Mutex<Vec<VolumeOptions>>,
    pub deleted: Mutex<Vec<PersistentVolume>>,
    pub fail_provision: AtomicBool,
    pub fail_delete: AtomicBool,
}

impl FakePlugin {
    pub fn provision_count(&self) -> usize { self.provisioned.lock().unwrap().len() }
    pub fn deleted(&self) -> Vec<PersistentVolume> { self.deleted.lock().unwrap().clone() }
}

#[async_trait]
impl ProvisionPlugin for FakePlugin {
    async fn provision(&self, options: VolumeOptions) -> Result<PersistentVolume> {
        self.provisioned.lock().unwrap().push(options.clone());
        if self.fail_provision.load(Ordering::SeqCst) {
            return Err(Error::backend("no valid host was found"));
        }
        Ok(serde_json::from_value(json!({
            "metadata": { "name": options.pv_name },
            "spec": {
                "persistentVolumeReclaimPolicy": options.reclaim_policy,
                "capacity": { "storage": "5Gi" },
                "flexVolume": { "driver": "openstack/cinder", "options": { "VolumeID": format!("vol-{}", options.pv_name) } }
            }
        }))
        .unwrap())
    }

    async fn delete(&self, pv: &PersistentVolume) -> Result<()> {
        self.deleted.lock().unwrap().push(pv.clone());
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(Error::backend("volume is in-use"));
        }
        Ok(())
    }
}

/// PV API whose first `fail_creates` creates fail.
#[derive(Default)]
pub struct FakeVolumes {
    pub created: Mutex<Vec<PersistentVolume>>,
    pub create_attempts: Mutex<Vec<PersistentVolume>>,
    pub fail_creates: AtomicU32,
    pub deleted: Mutex<Vec<String>>,
    pub fail_delete: AtomicBool,
}

impl FakeVolumes {
    pub fn created(&self) -> Vec<PersistentVolume> { self.created.lock().unwrap().clone() }
    pub fn attempts(&self) -> usize { self.create_attempts.lock().unwrap().len() }
    pub fn deleted(&self) -> Vec<String> { self.deleted.lock().unwrap().clone() }
}

#[async_trait]
impl VolumeApi for FakeVolumes {
    async fn create_pv(&self, pv: &PersistentVolume) -> Result<()> {
        self.create_attempts.lock().unwrap().push(pv.clone());
        let failing = self.fail_creates.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok();
        if failing {
            return Err(Error::api("etcdserver: request timed out"));
        }
        self.created.lock().unwrap().push(pv.clone());
        Ok(())
    }

    async fn delete_pv(&self, name: &str) -> Result<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(Error::api("forbidden"));
        }
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

pub struct Rig {
    pub plugin: Arc<FakePlugin>,
    pub volumes: Arc<FakeVolumes>,
    pub classes: Arc<Cache<StorageClass>>,
    pub provisioner: Arc<Provisioner>,
    pub deleter: Arc<Deleter>,
}

/// Provisioner + deleter over fakes, with `sc1` backed by the `cinder` plugin.
pub fn rig() -> Rig {
    let plugin = Arc::new(FakePlugin::default());
    let volumes = Arc::new(FakeVolumes::default());
    let classes = Arc::new(Cache::new());
    classes.add(storage_class("sc1", "cinder", &[("volume_type", "ssd")]));
    let plugins = Arc::new(PluginRegistry::new().with("cinder", plugin.clone()));
    let retry = RetryPolicy::new(3, Duration::from_millis(1));
    let provisioner = Arc::new(Provisioner::new(plugins.clone(), volumes.clone(), classes.clone(), retry));
    let deleter = Arc::new(Deleter::new(plugins, volumes.clone(), provisioner.clone()));
    Rig { plugin, volumes, classes, provisioner, deleter }
}

struct Step<T> {
    gate: Option<Arc<Notify>>,
    value: T,
}

/// Lister-watcher replaying scripted lists and watches, each optionally held
/// until a gate is notified. Calls past the script park forever.
pub struct ScriptLw<K> {
    lists: Mutex<VecDeque<Step<Vec<K>>>>,
    watches: Mutex<VecDeque<Step<Vec<WatchEvent<K>>>>>,
}

impl<K> ScriptLw<K> {
    pub fn new() -> Self { Self { lists: Mutex::new(VecDeque::new()), watches: Mutex::new(VecDeque::new()) } }

    pub fn list(self, items: Vec<K>, gate: Option<Arc<Notify>>) -> Self {
        self.lists.lock().unwrap().push_back(Step { gate, value: items });
        self
    }

    pub fn watch(self, events: Vec<WatchEvent<K>>, gate: Option<Arc<Notify>>) -> Self {
        self.watches.lock().unwrap().push_back(Step { gate, value: events });
        self
    }
}

#[async_trait]
impl<K: Clone + Send + Sync + 'static> ListerWatcher<K> for ScriptLw<K> {
    async fn list(&self, _resource_version: &str) -> Result<ListPage<K>> {
        let step = self.lists.lock().unwrap().pop_front();
        let Some(step) = step else { return futures::future::pending().await };
        if let Some(gate) = step.gate {
            gate.notified().await;
        }
        Ok(ListPage { items: step.value, resource_version: "1".to_string() })
    }

    async fn watch(&self, _resource_version: &str, _timeout_secs: u32) -> Result<WatchStream<K>> {
        let step = self.watches.lock().unwrap().pop_front();
        let Some(step) = step else { return Ok(stream::pending().boxed()) };
        if let Some(gate) = step.gate {
            gate.notified().await;
        }
        Ok(stream::iter(step.value.into_iter().map(Ok)).boxed())
    }
}

pub async fn eventually<F: Fn() -> bool>(what: &str, f: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !f() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
