//! Well-known Kubernetes names used by the controllers.

/// Marks a PV as created by a provisioner plugin; value is the plugin name.
pub const ANNOTATION_PROVISIONED_BY: &str = "pv.kubernetes.io/provisioned-by";
/// Requests a specific provisioner plugin on a PVC.
pub const ANNOTATION_STORAGE_PROVISIONER: &str = "volume.beta.kubernetes.io/storage-provisioner";
/// Beta storage class annotation; wins over `spec.storageClassName`.
pub const ANNOTATION_BETA_STORAGE_CLASS: &str = "volume.beta.kubernetes.io/storage-class";
pub const ANNOTATION_CREATED_BY: &str = "kubernetes.io/createdby";

pub const RECLAIM_POLICY_DELETE: &str = "Delete";
pub const PV_PHASE_RELEASED: &str = "Released";

pub const ACCESS_MODE_READ_WRITE_ONCE: &str = "ReadWriteOnce";
pub const CAPACITY_STORAGE: &str = "storage";

pub const FLEX_VOLUME_DRIVER_CINDER: &str = "openstack/cinder";
pub const CINDER_VOLUME_ID: &str = "VolumeID";
