use std::sync::Arc;

use fuxi_core::constants::ANNOTATION_BETA_STORAGE_CLASS;
use fuxi_core::Outcome;
use fuxi_kubehub::{Controller, ControllerConfig, ListerWatcher, ResourceEventHandler};
use fuxi_store::Cache;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::storage::v1::StorageClass;
use tracing::{debug, info};

fn class_name(sc: &StorageClass) -> &str { sc.metadata.name.as_deref().unwrap_or("") }

/// Mirrors StorageClasses into a cache the provisioner reads by name.
pub struct StorageClassWatcher {
    controller: Controller<StorageClass>,
}

impl StorageClassWatcher {
    pub fn new<L>(lw: L, config: ControllerConfig) -> Self
    where
        L: ListerWatcher<StorageClass> + 'static,
    {
        let handler = ResourceEventHandler::new()
            .on_add(|sc: StorageClass| async move {
                info!(class = %class_name(&sc), provisioner = %sc.provisioner, "storage class added");
                Ok(Outcome::Done)
            })
            .on_update(|_old: StorageClass, sc: StorageClass| async move {
                debug!(class = %class_name(&sc), provisioner = %sc.provisioner, "storage class updated");
                Ok(Outcome::Done)
            })
            .on_delete(|sc: StorageClass| async move {
                info!(class = %class_name(&sc), "storage class removed");
                Ok(Outcome::Done)
            });
        Self { controller: Controller::new("storageclass", lw, handler, config) }
    }

    /// StorageClasses are cluster-scoped, so the cache key is the class name.
    pub fn classes(&self) -> Arc<Cache<StorageClass>> { self.controller.cache() }

    pub fn start(&mut self) { self.controller.start(); }

    pub fn stop(&self) { self.controller.stop(); }

    pub async fn join(&mut self) { self.controller.join().await; }
}

/// The class a claim asks for: the beta annotation wins over
/// `spec.storageClassName`; neither yields "".
pub fn storage_class_name(pvc: &PersistentVolumeClaim) -> String {
    let annotated = pvc
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_BETA_STORAGE_CLASS))
        .filter(|s| !s.is_empty());
    if let Some(name) = annotated {
        return name.clone();
    }
    pvc.spec.as_ref().and_then(|s| s.storage_class_name.clone()).unwrap_or_default()
}
