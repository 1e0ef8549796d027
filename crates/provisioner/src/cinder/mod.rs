//! Cinder provisioning plugin: volumes exposed to pods through the
//! `openstack/cinder` FlexVolume driver.

mod client;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use fuxi_core::constants::{
    ACCESS_MODE_READ_WRITE_ONCE, ANNOTATION_CREATED_BY, CAPACITY_STORAGE, CINDER_VOLUME_ID, FLEX_VOLUME_DRIVER_CINDER,
};
use fuxi_core::{Error, Result};
use k8s_openapi::api::core::v1::{
    FlexPersistentVolumeSource, PersistentVolume, PersistentVolumeClaim, PersistentVolumeSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::info;

pub use client::{BlockStorage, CinderClient, CinderError, CreateVolume, Volume};

use crate::{ProvisionPlugin, VolumeOptions};

pub const CREATED_BY: &str = "external-cinder-dynamic-provisioner";
const DEFAULT_FS_TYPE: &str = "ext4";

pub struct CinderVolumePlugin {
    storage: Arc<dyn BlockStorage>,
}

impl CinderVolumePlugin {
    pub fn new(storage: Arc<dyn BlockStorage>) -> Self { Self { storage } }
}

#[async_trait]
impl ProvisionPlugin for CinderVolumePlugin {
    async fn provision(&self, options: VolumeOptions) -> Result<PersistentVolume> {
        let access_modes = access_modes(&options.pvc)?;
        let request = CreateVolume {
            size: requested_gib(&options.pvc)?,
            name: options.pv_name.clone(),
            volume_type: options.parameters.get("volume_type").cloned(),
            availability_zone: options.parameters.get("availability_zone").cloned(),
        };
        let volume = self
            .storage
            .create_volume(&request)
            .await
            .map_err(|e| Error::backend(format!("create cinder volume {}: {e}", options.pv_name)))?;
        info!(pv = %options.pv_name, volume = %volume.id, size_gib = volume.size, "cinder volume created");
        Ok(descriptor(&options, access_modes, &volume))
    }

    async fn delete(&self, pv: &PersistentVolume) -> Result<()> {
        let id = pv
            .spec
            .as_ref()
            .and_then(|s| s.flex_volume.as_ref())
            .and_then(|f| f.options.as_ref())
            .and_then(|o| o.get(CINDER_VOLUME_ID));
        let Some(id) = id else { return Ok(()) };
        self.storage
            .delete_volume(id)
            .await
            .map_err(|e| Error::backend(format!("delete cinder volume {id}: {e}")))
    }
}

/// Only ReadWriteOnce is supported; an empty request means ReadWriteOnce.
fn access_modes(pvc: &PersistentVolumeClaim) -> Result<Vec<String>> {
    let requested = pvc.spec.as_ref().and_then(|s| s.access_modes.clone()).unwrap_or_default();
    if let Some(bad) = requested.iter().find(|m| m.as_str() != ACCESS_MODE_READ_WRITE_ONCE) {
        return Err(Error::invalid(format!("cinder volumes do not support access mode {bad}")));
    }
    if requested.is_empty() {
        return Ok(vec![ACCESS_MODE_READ_WRITE_ONCE.to_string()]);
    }
    Ok(requested)
}

fn requested_gib(pvc: &PersistentVolumeClaim) -> Result<u64> {
    let size = pvc
        .spec
        .as_ref()
        .and_then(|s| s.resources.as_ref())
        .and_then(|r| r.requests.as_ref())
        .and_then(|r| r.get(CAPACITY_STORAGE))
        .ok_or_else(|| Error::invalid("claim does not request storage"))?;
    parse_size_gib(&size.0)
}

/// Whole GiB for a quantity, rounding up. Accepts a byte count or a binary
/// suffix (`Ki` through `Ei`).
pub fn parse_size_gib(size: &str) -> Result<u64> {
    let size = size.trim();
    let invalid = || Error::invalid(format!("unsupported volume size {size:?}"));
    let (digits, unit) = match size.find(|c: char| !c.is_ascii_digit()) {
        Some(i) => size.split_at(i),
        None => (size, ""),
    };
    let n: u64 = digits.parse().map_err(|_| invalid())?;
    // bytes per unit as a power of two
    let shift = match unit {
        "" => 0,
        "Ki" => 10,
        "Mi" => 20,
        "Gi" => 30,
        "Ti" => 40,
        "Pi" => 50,
        "Ei" => 60,
        _ => return Err(invalid()),
    };
    let gib = if shift >= 30 {
        n.checked_mul(1u64 << (shift - 30)).ok_or_else(invalid)?
    } else {
        n.div_ceil(1u64 << (30 - shift))
    };
    if gib == 0 {
        return Err(Error::invalid(format!("volume size {size:?} is zero")));
    }
    Ok(gib)
}

fn descriptor(options: &VolumeOptions, access_modes: Vec<String>, volume: &Volume) -> PersistentVolume {
    let params = &options.parameters;
    let read_only = params.get("read_only").is_some_and(|v| v.eq_ignore_ascii_case("true"));
    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(options.pv_name.clone()),
            annotations: Some(BTreeMap::from([(ANNOTATION_CREATED_BY.to_string(), CREATED_BY.to_string())])),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            persistent_volume_reclaim_policy: Some(options.reclaim_policy.clone()),
            access_modes: Some(access_modes),
            capacity: Some(BTreeMap::from([(CAPACITY_STORAGE.to_string(), Quantity(format!("{}Gi", volume.size)))])),
            flex_volume: Some(FlexPersistentVolumeSource {
                driver: FLEX_VOLUME_DRIVER_CINDER.to_string(),
                fs_type: Some(params.get("fstype").cloned().unwrap_or_else(|| DEFAULT_FS_TYPE.to_string())),
                options: Some(BTreeMap::from([(CINDER_VOLUME_ID.to_string(), volume.id.clone())])),
                read_only: Some(read_only),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    }
}
