use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use fuxi_core::{Error, ListPage, Result, WatchEvent};
use kube::api::{Api, ListParams, WatchParams};
use serde::de::DeserializeOwned;

/// Watch events; `Err(Error::Decode)` items are skippable, other errors end the stream.
pub type WatchStream<K> = BoxStream<'static, Result<WatchEvent<K>>>;

/// List+watch source for one resource type.
#[async_trait]
pub trait ListerWatcher<K>: Send + Sync {
    async fn list(&self, resource_version: &str) -> Result<ListPage<K>>;

    async fn watch(&self, resource_version: &str, timeout_secs: u32) -> Result<WatchStream<K>>;
}

#[async_trait]
impl<K, T> ListerWatcher<K> for Arc<T>
where
    K: Send + 'static,
    T: ListerWatcher<K> + ?Sized,
{
    async fn list(&self, resource_version: &str) -> Result<ListPage<K>> { (**self).list(resource_version).await }

    async fn watch(&self, resource_version: &str, timeout_secs: u32) -> Result<WatchStream<K>> {
        (**self).watch(resource_version, timeout_secs).await
    }
}

/// The API server rejects watch timeouts at or above this many seconds.
pub const MAX_WATCH_TIMEOUT_SECS: u32 = 290;

/// [`ListerWatcher`] over a kube `Api<K>` (namespaced or cluster-wide).
pub struct KubeListerWatcher<K> {
    api: Api<K>,
}

impl<K> KubeListerWatcher<K> {
    pub fn new(api: Api<K>) -> Self { Self { api } }
}

fn watch_params(timeout_secs: u32) -> WatchParams {
    WatchParams::default().timeout(timeout_secs.clamp(1, MAX_WATCH_TIMEOUT_SECS))
}

fn convert<K>(item: kube::Result<kube::api::WatchEvent<K>>) -> Result<WatchEvent<K>> {
    use kube::api::WatchEvent as Kw;
    match item {
        Ok(Kw::Added(o)) => Ok(WatchEvent::Added(o)),
        Ok(Kw::Modified(o)) => Ok(WatchEvent::Modified(o)),
        Ok(Kw::Deleted(o)) => Ok(WatchEvent::Deleted(o)),
        Ok(Kw::Bookmark(b)) => Ok(WatchEvent::Bookmark(b.metadata.resource_version)),
        Ok(Kw::Error(e)) => Ok(WatchEvent::Error(format!("{} ({}: {})", e.message, e.code, e.reason))),
        Err(kube::Error::SerdeError(e)) => Err(Error::decode(e.to_string())),
        Err(e) => Err(Error::transport(e.to_string())),
    }
}

#[async_trait]
impl<K> ListerWatcher<K> for KubeListerWatcher<K>
where
    K: kube::Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    async fn list(&self, resource_version: &str) -> Result<ListPage<K>> {
        let lp = match resource_version {
            "" | "0" => ListParams::default().match_any(),
            rv => ListParams::default().at(rv),
        };
        let list = self.api.list(&lp).await.map_err(|e| Error::transport(e.to_string()))?;
        Ok(ListPage { resource_version: list.metadata.resource_version.unwrap_or_default(), items: list.items })
    }

    async fn watch(&self, resource_version: &str, timeout_secs: u32) -> Result<WatchStream<K>> {
        let wp = watch_params(timeout_secs);
        let stream = self
            .api
            .watch(&wp, resource_version)
            .await
            .map_err(|e| Error::transport(e.to_string()))?;
        Ok(stream.map(convert).boxed())
    }
}
