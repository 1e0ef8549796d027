use async_trait::async_trait;
use fuxi_core::{Error, Result};
use k8s_openapi::api::core::v1::PersistentVolume;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use tracing::debug;

/// PV object mutations performed by the controllers.
#[async_trait]
pub trait VolumeApi: Send + Sync {
    async fn create_pv(&self, pv: &PersistentVolume) -> Result<()>;
    /// Deleting a PV that no longer exists succeeds.
    async fn delete_pv(&self, name: &str) -> Result<()>;
}

pub struct KubeVolumeApi {
    api: Api<PersistentVolume>,
}

impl KubeVolumeApi {
    pub fn new(client: Client) -> Self { Self { api: Api::all(client) } }
}

#[async_trait]
impl VolumeApi for KubeVolumeApi {
    async fn create_pv(&self, pv: &PersistentVolume) -> Result<()> {
        self.api
            .create(&PostParams::default(), pv)
            .await
            .map(|_| ())
            .map_err(|e| Error::api(format!("create pv: {e}")))
    }

    async fn delete_pv(&self, name: &str) -> Result<()> {
        match self.api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(pv = %name, "pv already gone");
                Ok(())
            }
            Err(e) => Err(Error::api(format!("delete pv {name}: {e}"))),
        }
    }
}
