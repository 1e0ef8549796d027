use std::sync::Arc;

use fuxi_core::constants::{ANNOTATION_PROVISIONED_BY, PV_PHASE_RELEASED, RECLAIM_POLICY_DELETE};
use fuxi_core::{Outcome, Result};
use fuxi_kubehub::ResourceEventHandler;
use k8s_openapi::api::core::v1::PersistentVolume;
use metrics::counter;
use tracing::{debug, error, info};

use crate::{PluginRegistry, ProvisionPlugin, Provisioner, VolumeApi};

/// Removes released volumes this controller provisioned, asset first and
/// PV object second.
pub struct Deleter {
    plugins: Arc<PluginRegistry>,
    volumes: Arc<dyn VolumeApi>,
    provisioner: Arc<Provisioner>,
}

impl Deleter {
    pub fn new(plugins: Arc<PluginRegistry>, volumes: Arc<dyn VolumeApi>, provisioner: Arc<Provisioner>) -> Self {
        Self { plugins, volumes, provisioner }
    }

    /// Only updates are routed: a PV reaches `Released` through a phase change,
    /// and relists re-deliver known PVs as updates.
    pub fn handler(self: &Arc<Self>) -> ResourceEventHandler<PersistentVolume> {
        let this = self.clone();
        ResourceEventHandler::new().on_update(move |_old: PersistentVolume, pv: PersistentVolume| {
            let d = this.clone();
            async move { d.reconcile(pv).await }
        })
    }

    pub async fn reconcile(&self, pv: PersistentVolume) -> Result<Outcome> {
        let name = pv.metadata.name.clone().unwrap_or_default();
        let plugin = match self.check(&pv) {
            Ok(plugin) => plugin,
            Err(reason) => {
                debug!(pv = %name, reason = %reason, "volume not eligible for deletion");
                return Ok(Outcome::Skipped(reason));
            }
        };

        self.provisioner.release(&name);

        if let Err(e) = plugin.delete(&pv).await {
            error!(pv = %name, phase = "delete_asset", error = %e, "deleting storage asset failed, keeping pv");
            counter!("deleter_errors_total", 1u64, "phase" => "delete_asset");
            return Err(e);
        }
        if let Err(e) = self.volumes.delete_pv(&name).await {
            error!(pv = %name, phase = "delete_pv", error = %e, "deleting pv failed");
            counter!("deleter_errors_total", 1u64, "phase" => "delete_pv");
            return Err(e);
        }
        counter!("deleter_pv_deleted_total", 1u64);
        info!(pv = %name, "deleted released volume");
        Ok(Outcome::Done)
    }

    fn check(&self, pv: &PersistentVolume) -> std::result::Result<Arc<dyn ProvisionPlugin>, String> {
        let phase = pv.status.as_ref().and_then(|s| s.phase.as_deref());
        if phase != Some(PV_PHASE_RELEASED) {
            return Err(format!("phase is {}", phase.unwrap_or("unknown")));
        }
        let policy = pv.spec.as_ref().and_then(|s| s.persistent_volume_reclaim_policy.as_deref());
        if policy != Some(RECLAIM_POLICY_DELETE) {
            return Err(format!("reclaim policy is {}", policy.unwrap_or("unset")));
        }
        let Some(plugin_name) = pv.metadata.annotations.as_ref().and_then(|a| a.get(ANNOTATION_PROVISIONED_BY)) else {
            return Err("not dynamically provisioned".to_string());
        };
        self.plugins.get(plugin_name).ok_or_else(|| format!("provisioned by unregistered plugin {plugin_name}"))
    }
}
