//! Fuxi provisioner: PVC-driven dynamic provisioning and released-PV deletion
//! built on the kubehub watch framework, plus the Cinder provisioning plugin.

#![forbid(unsafe_code)]

pub mod cinder;
mod deleter;
mod plugin;
mod provisioner;
mod service;
mod settings;
mod storage_class;
mod volume_api;

pub use deleter::Deleter;
pub use plugin::{PluginRegistry, ProvisionPlugin, VolumeOptions};
pub use provisioner::{Provisioner, RetryPolicy};
pub use service::Service;
pub use settings::Settings;
pub use storage_class::{storage_class_name, StorageClassWatcher};
pub use volume_api::{KubeVolumeApi, VolumeApi};
