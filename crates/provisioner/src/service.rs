use std::sync::Arc;

use fuxi_kubehub::{Controller, KubeListerWatcher, ListerWatcher};
use fuxi_store::Cache;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::{Api, Client};
use tracing::info;

use crate::{Deleter, KubeVolumeApi, PluginRegistry, Provisioner, Settings, StorageClassWatcher, VolumeApi};

/// The three controllers of a provisioner process: StorageClass mirror,
/// claim provisioning and released-volume deletion.
pub struct Service {
    classes: StorageClassWatcher,
    claims: Controller<PersistentVolumeClaim>,
    volumes: Controller<PersistentVolume>,
    provisioner: Arc<Provisioner>,
    plugins: Arc<PluginRegistry>,
}

impl Service {
    /// Cluster-wide watches on the given client.
    pub fn new(client: Client, plugins: PluginRegistry, settings: &Settings) -> Self {
        Self::with_sources(
            KubeListerWatcher::new(Api::<StorageClass>::all(client.clone())),
            KubeListerWatcher::new(Api::<PersistentVolumeClaim>::all(client.clone())),
            KubeListerWatcher::new(Api::<PersistentVolume>::all(client.clone())),
            Arc::new(KubeVolumeApi::new(client)),
            plugins,
            settings,
        )
    }

    pub fn with_sources<S, C, V>(
        storage_classes: S,
        claims: C,
        volumes: V,
        volume_api: Arc<dyn VolumeApi>,
        plugins: PluginRegistry,
        settings: &Settings,
    ) -> Self
    where
        S: ListerWatcher<StorageClass> + 'static,
        C: ListerWatcher<PersistentVolumeClaim> + 'static,
        V: ListerWatcher<PersistentVolume> + 'static,
    {
        let config = settings.controller_config();
        let plugins = Arc::new(plugins);
        let classes = StorageClassWatcher::new(storage_classes, config.clone());
        let provisioner =
            Arc::new(Provisioner::new(plugins.clone(), volume_api.clone(), classes.classes(), settings.retry_policy()));
        let deleter = Arc::new(Deleter::new(plugins.clone(), volume_api, provisioner.clone()));
        Self {
            claims: Controller::new("pvc", claims, provisioner.handler(), config.clone()),
            volumes: Controller::new("pv", volumes, deleter.handler(), config),
            classes,
            provisioner,
            plugins,
        }
    }

    pub fn provisioner(&self) -> Arc<Provisioner> { self.provisioner.clone() }

    pub fn storage_classes(&self) -> Arc<Cache<StorageClass>> { self.classes.classes() }

    /// StorageClasses first so claims find their class as early as possible.
    pub fn start(&mut self) {
        info!(plugins = ?self.plugins, "provisioner service starting");
        self.classes.start();
        self.claims.start();
        self.volumes.start();
    }

    pub fn stop(&self) {
        info!("provisioner service stopping");
        self.classes.stop();
        self.claims.stop();
        self.volumes.stop();
    }

    pub async fn join(&mut self) {
        self.claims.join().await;
        self.volumes.join().await;
        self.classes.join().await;
    }
}
