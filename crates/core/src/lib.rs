//! Fuxi core types: object keys, deltas, watch events and the error
//! taxonomy shared by the store, the reflector and the controllers.

#![forbid(unsafe_code)]

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

pub mod constants;

/// Identity of an object as seen by the watch framework.
///
/// The framework never interprets object content beyond these two values.
pub trait Keyed {
    /// Stable key: `namespace/name`, or `name` for cluster-scoped objects.
    fn key(&self) -> String;
    /// Opaque version token assigned by the API server.
    fn resource_version(&self) -> Option<String>;
}

impl<K> Keyed for K
where
    K: k8s_openapi::Metadata<Ty = ObjectMeta>,
{
    fn key(&self) -> String { meta_namespace_key(self.metadata()) }

    fn resource_version(&self) -> Option<String> { self.metadata().resource_version.clone() }
}

pub fn meta_namespace_key(meta: &ObjectMeta) -> String {
    let name = meta.name.as_deref().unwrap_or("");
    match meta.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => format!("{ns}/{name}"),
        _ => name.to_string(),
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DeltaKind {
    Added,
    Updated,
    Deleted,
    /// Emitted for every listed object during a full resynchronization.
    Synced,
}

/// Payload of a delta.
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaObject<K> {
    Object(K),
    /// A delete inferred from a relist diff; the object vanished while the
    /// watch was down, so only the last state we delivered is known.
    DeletedFinalStateUnknown { key: String, last_known: K },
}

impl<K: Keyed> DeltaObject<K> {
    pub fn key(&self) -> String {
        match self {
            DeltaObject::Object(o) => o.key(),
            DeltaObject::DeletedFinalStateUnknown { key, .. } => key.clone(),
        }
    }
}

impl<K> DeltaObject<K> {
    pub fn object(&self) -> &K {
        match self {
            DeltaObject::Object(o) => o,
            DeltaObject::DeletedFinalStateUnknown { last_known, .. } => last_known,
        }
    }

    pub fn into_object(self) -> K {
        match self {
            DeltaObject::Object(o) => o,
            DeltaObject::DeletedFinalStateUnknown { last_known, .. } => last_known,
        }
    }

    pub fn is_placeholder(&self) -> bool { matches!(self, DeltaObject::DeletedFinalStateUnknown { .. }) }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delta<K> {
    pub kind: DeltaKind,
    pub object: DeltaObject<K>,
}

impl<K> Delta<K> {
    pub fn new(kind: DeltaKind, object: K) -> Self { Self { kind, object: DeltaObject::Object(object) } }

    pub fn is_delete(&self) -> bool { self.kind == DeltaKind::Deleted }
}

/// One item of a watch stream.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
    /// Progress marker carrying only a resourceVersion.
    Bookmark(String),
    /// Server-side stream failure (e.g. 410 Gone for an expired version).
    Error(String),
}

/// A listed collection and the version it was read at.
#[derive(Debug, Clone)]
pub struct ListPage<K> {
    pub items: Vec<K>,
    pub resource_version: String,
}

/// Errors crossing the framework and controller seams.
#[derive(Debug, thiserror::Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum Error {
    /// List/watch transport failures; recovered by backoff and relist.
    #[error("transport: {0}")]
    Transport(String),
    /// The received object does not have the expected type or shape.
    #[error("decode: {0}")]
    Decode(String),
    /// Storage backend operation failed.
    #[error("backend: {0}")]
    Backend(String),
    /// Kubernetes API mutation failed.
    #[error("api: {0}")]
    Api(String),
    #[error("invalid: {0}")]
    Invalid(String),
}

impl Error {
    pub fn transport(msg: impl Into<String>) -> Self { Self::Transport(msg.into()) }
    pub fn decode(msg: impl Into<String>) -> Self { Self::Decode(msg.into()) }
    pub fn backend(msg: impl Into<String>) -> Self { Self::Backend(msg.into()) }
    pub fn api(msg: impl Into<String>) -> Self { Self::Api(msg.into()) }
    pub fn invalid(msg: impl Into<String>) -> Self { Self::Invalid(msg.into()) }
}

pub type Result<T> = std::result::Result<T, Error>;

/// What a handler did with an event. "Nothing to do" is an outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Skipped(String),
}

impl Outcome {
    pub fn skipped(reason: impl Into<String>) -> Self { Self::Skipped(reason.into()) }
}

pub mod prelude {
    pub use super::{Delta, DeltaKind, DeltaObject, Error, Keyed, ListPage, Outcome, Result, WatchEvent};
}
