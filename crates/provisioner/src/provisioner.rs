use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use fuxi_core::constants::{ANNOTATION_PROVISIONED_BY, ANNOTATION_STORAGE_PROVISIONER, RECLAIM_POLICY_DELETE};
use fuxi_core::{Keyed, Outcome, Result};
use fuxi_kubehub::ResourceEventHandler;
use fuxi_store::Cache;
use k8s_openapi::api::core::v1::{ObjectReference, PersistentVolume, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use metrics::{counter, histogram};
use tracing::{debug, error, info, warn};

use crate::{storage_class_name, PluginRegistry, ProvisionPlugin, VolumeApi, VolumeOptions};

/// Fixed-interval bounded retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, interval: Duration) -> Self { Self { attempts: attempts.max(1), interval } }

    /// Run `op` until it succeeds or `attempts` calls have failed, sleeping
    /// `interval` between calls. Returns the last error.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt >= self.attempts => return Err(e),
                Err(e) => {
                    warn!(operation, attempt, error = %e, "operation failed, retrying");
                    tokio::time::sleep(self.interval).await;
                }
            }
        }
    }
}

/// Everything the eligibility check resolved for one claim.
struct Plan {
    pv_name: String,
    class_name: String,
    plugin_name: String,
    plugin: Arc<dyn ProvisionPlugin>,
    parameters: BTreeMap<String, String>,
}

/// Provisions a PV for every eligible unbound claim.
///
/// Add and update events both run [`Provisioner::reconcile`]. The set of PV
/// names created by this process makes duplicate events no-ops; the
/// [`Deleter`](crate::Deleter) clears entries when it removes a volume.
pub struct Provisioner {
    plugins: Arc<PluginRegistry>,
    volumes: Arc<dyn VolumeApi>,
    classes: Arc<Cache<StorageClass>>,
    retry: RetryPolicy,
    created: Mutex<HashSet<String>>,
}

impl Provisioner {
    pub fn new(
        plugins: Arc<PluginRegistry>,
        volumes: Arc<dyn VolumeApi>,
        classes: Arc<Cache<StorageClass>>,
        retry: RetryPolicy,
    ) -> Self {
        Self { plugins, volumes, classes, retry, created: Mutex::new(HashSet::new()) }
    }

    /// PV name for a claim uid. Stable across retries and restarts.
    pub fn pv_name(uid: &str) -> String { format!("pvc-{uid}") }

    fn created(&self) -> MutexGuard<'_, HashSet<String>> { self.created.lock().unwrap_or_else(PoisonError::into_inner) }

    pub fn is_created(&self, pv_name: &str) -> bool { self.created().contains(pv_name) }

    /// Forget a PV name so a later claim deriving it can be provisioned again.
    pub fn release(&self, pv_name: &str) -> bool { self.created().remove(pv_name) }

    pub fn handler(self: &Arc<Self>) -> ResourceEventHandler<PersistentVolumeClaim> {
        let (on_add, on_update) = (self.clone(), self.clone());
        ResourceEventHandler::new()
            .on_add(move |pvc: PersistentVolumeClaim| {
                let p = on_add.clone();
                async move { p.reconcile(pvc).await }
            })
            .on_update(move |_old: PersistentVolumeClaim, pvc: PersistentVolumeClaim| {
                let p = on_update.clone();
                async move { p.reconcile(pvc).await }
            })
    }

    pub async fn reconcile(&self, pvc: PersistentVolumeClaim) -> Result<Outcome> {
        let claim = pvc.key();
        let plan = match self.check(&pvc) {
            Ok(plan) => plan,
            Err(reason) => {
                debug!(pvc = %claim, reason = %reason, "claim not eligible");
                return Ok(Outcome::Skipped(reason));
            }
        };

        let started = Instant::now();
        let options = VolumeOptions {
            reclaim_policy: RECLAIM_POLICY_DELETE.to_string(),
            pv_name: plan.pv_name.clone(),
            pvc: pvc.clone(),
            parameters: plan.parameters.clone(),
        };
        let mut pv = match plan.plugin.provision(options).await {
            Ok(pv) => pv,
            Err(e) => {
                error!(pvc = %claim, pv = %plan.pv_name, phase = "provision", error = %e, "creating storage asset failed");
                return Err(e);
            }
        };
        bind(&mut pv, &pvc, &plan);

        match self.retry.run("create_pv", || self.volumes.create_pv(&pv)).await {
            Ok(()) => {
                self.created().insert(plan.pv_name.clone());
                counter!("provisioner_pv_created_total", 1u64, "plugin" => plan.plugin_name.clone());
                histogram!("provisioner_provision_ms", started.elapsed().as_secs_f64() * 1000.0, "plugin" => plan.plugin_name.clone());
                info!(pvc = %claim, pv = %plan.pv_name, class = %plan.class_name, plugin = %plan.plugin_name, "provisioned volume");
                Ok(Outcome::Done)
            }
            Err(e) => {
                error!(
                    pvc = %claim,
                    pv = %plan.pv_name,
                    phase = "create_pv",
                    attempts = self.retry.attempts,
                    error = %e,
                    "creating pv failed, releasing storage asset"
                );
                self.compensate(&claim, &plan, &pv).await;
                Err(e)
            }
        }
    }

    /// Checks run in a fixed order and all of them precede any remote call.
    fn check(&self, pvc: &PersistentVolumeClaim) -> std::result::Result<Plan, String> {
        if let Some(volume) = pvc.spec.as_ref().and_then(|s| s.volume_name.as_deref()).filter(|v| !v.is_empty()) {
            return Err(format!("claim already bound to {volume}"));
        }
        let Some(uid) = pvc.metadata.uid.as_deref().filter(|u| !u.is_empty()) else {
            return Err("claim has no uid".to_string());
        };
        let pv_name = Self::pv_name(uid);
        if self.is_created(&pv_name) {
            return Err(format!("pv {pv_name} already created"));
        }
        let requested = pvc.metadata.annotations.as_ref().and_then(|a| a.get(ANNOTATION_STORAGE_PROVISIONER));
        if let Some(requested) = requested.filter(|r| !r.is_empty()) {
            if !self.plugins.contains(requested) {
                return Err(format!("requested provisioner {requested} is not registered"));
            }
        }
        let class_name = storage_class_name(pvc);
        let Some(class) = self.classes.get_by_key(&class_name) else {
            return Err(format!("storage class {class_name:?} not found"));
        };
        let Some(plugin) = self.plugins.get(&class.provisioner) else {
            return Err(format!("storage class {class_name} uses unregistered provisioner {}", class.provisioner));
        };
        Ok(Plan {
            pv_name,
            class_name,
            plugin_name: class.provisioner,
            plugin,
            parameters: class.parameters.unwrap_or_default(),
        })
    }

    async fn compensate(&self, claim: &str, plan: &Plan, pv: &PersistentVolume) {
        match self.retry.run("delete_storage_asset", || plan.plugin.delete(pv)).await {
            Ok(()) => info!(pvc = %claim, pv = %plan.pv_name, "storage asset released"),
            Err(e) => {
                error!(
                    pvc = %claim,
                    pv = %plan.pv_name,
                    asset = %asset_identity(pv),
                    plugin = %plan.plugin_name,
                    error = %e,
                    "storage asset orphaned: release failed after exhausting retries"
                );
                counter!("provisioner_orphaned_assets_total", 1u64, "plugin" => plan.plugin_name.clone());
            }
        }
    }
}

fn bind(pv: &mut PersistentVolume, pvc: &PersistentVolumeClaim, plan: &Plan) {
    pv.metadata.name.get_or_insert_with(|| plan.pv_name.clone());
    pv.metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(ANNOTATION_PROVISIONED_BY.to_string(), plan.plugin_name.clone());
    let spec = pv.spec.get_or_insert_with(Default::default);
    spec.storage_class_name = Some(plan.class_name.clone());
    spec.claim_ref = Some(claim_ref(pvc));
}

pub(crate) fn claim_ref(pvc: &PersistentVolumeClaim) -> ObjectReference {
    ObjectReference {
        api_version: Some(<PersistentVolumeClaim as k8s_openapi::Resource>::API_VERSION.to_string()),
        kind: Some(<PersistentVolumeClaim as k8s_openapi::Resource>::KIND.to_string()),
        name: pvc.metadata.name.clone(),
        namespace: pvc.metadata.namespace.clone(),
        uid: pvc.metadata.uid.clone(),
        resource_version: pvc.metadata.resource_version.clone(),
        ..Default::default()
    }
}

/// Backend identity of a descriptor, for operators chasing orphans.
fn asset_identity(pv: &PersistentVolume) -> String {
    let options = pv.spec.as_ref().and_then(|s| s.flex_volume.as_ref()).and_then(|f| f.options.as_ref());
    match options {
        Some(o) if !o.is_empty() => o.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(","),
        _ => "unknown".to_string(),
    }
}
