use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use fuxi_core::Result;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};

/// Input to [`ProvisionPlugin::provision`].
#[derive(Debug, Clone)]
pub struct VolumeOptions {
    pub reclaim_policy: String,
    /// Deterministic PV name derived from the claim uid.
    pub pv_name: String,
    pub pvc: PersistentVolumeClaim,
    /// StorageClass parameters, passed through untouched.
    pub parameters: BTreeMap<String, String>,
}

/// A storage backend able to create and destroy volume assets.
///
/// `provision` returns a PV descriptor that is not yet persisted; the caller
/// binds it to the claim and creates the object.
#[async_trait]
pub trait ProvisionPlugin: Send + Sync {
    async fn provision(&self, options: VolumeOptions) -> Result<PersistentVolume>;
    async fn delete(&self, pv: &PersistentVolume) -> Result<()>;
}

/// Plugins by name, built once at startup and shared by the controllers.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Arc<dyn ProvisionPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, name: impl Into<String>, plugin: Arc<dyn ProvisionPlugin>) -> Self {
        self.insert(name, plugin);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, plugin: Arc<dyn ProvisionPlugin>) {
        self.plugins.insert(name.into(), plugin);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProvisionPlugin>> { self.plugins.get(name).cloned() }

    pub fn contains(&self, name: &str) -> bool { self.plugins.contains_key(name) }

    pub fn names(&self) -> impl Iterator<Item = &str> { self.plugins.keys().map(String::as_str) }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
