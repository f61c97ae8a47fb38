//! Read/write contract against the shared state store.
//!
//! The reconcile engines only ever talk to [`Store`]; the cluster-backed
//! [`KubeStore`] and the in-process [`MemoryStore`] both implement it.

mod kube_store;
mod memory;
mod registry;

use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Service};
use kube::{Api, Client, Resource};
use serde::{Serialize, de::DeserializeOwned};

use crate::crd::DataLogger;

pub use kube_store::KubeStore;
pub use memory::{Call, MemoryStore, Verb};
pub use registry::{TypeRegistry, TypeRegistryBuilder};

/// Identity of a stored object. `namespace` is `None` for cluster-scoped kinds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Key of an existing object; fails when the object carries no name.
    pub fn of<K: Resource>(obj: &K) -> Result<Self, StoreError> {
        let meta = obj.meta();
        let name = meta
            .name
            .clone()
            .ok_or_else(|| StoreError::Invalid("object has no name".into()))?;
        Ok(Self {
            namespace: meta.namespace.clone(),
            name,
        })
    }
}

impl Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: String },
    #[error("conflict on {kind} {key}: {message}")]
    Conflict {
        kind: String,
        key: String,
        message: String,
    },
    #[error("store unavailable: {0}")]
    Transient(String),
    #[error("kind {0} is not registered with the store")]
    Unregistered(String),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("invalid object: {0}")]
    Invalid(String),
}

impl StoreError {
    pub fn not_found(kind: impl Into<String>, key: &ObjectKey) -> Self {
        StoreError::NotFound {
            kind: kind.into(),
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// A resource type the store knows how to address and encode.
pub trait Managed:
    Resource<DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    fn api(client: Client, namespace: Option<&str>) -> Api<Self>;
}

macro_rules! namespaced_managed {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Managed for $ty {
                fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
                    match namespace {
                        Some(ns) => Api::namespaced(client, ns),
                        None => Api::default_namespaced(client),
                    }
                }
            }
        )*
    };
}

namespaced_managed!(DataLogger, Deployment, Service);

impl Managed for Namespace {
    fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
        Api::all(client)
    }
}

pub(crate) fn kind_of<K: Resource<DynamicType = ()>>() -> String {
    K::kind(&()).to_string()
}

/// Equality-based label selector, e.g. `a=1,b=2`.
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
pub trait Store: Send + Sync {
    fn registry(&self) -> &TypeRegistry;

    async fn get<K: Managed>(&self, key: &ObjectKey) -> Result<K, StoreError>;

    async fn create<K: Managed>(&self, obj: &K) -> Result<K, StoreError>;

    /// Full replace guarded by the object's `resourceVersion`.
    async fn update<K: Managed>(&self, obj: &K) -> Result<K, StoreError>;

    async fn delete<K: Managed>(&self, obj: &K) -> Result<(), StoreError>;

    /// Objects carrying every label in `labels`. `namespace = None` lists
    /// across all namespaces.
    async fn list<K: Managed>(
        &self,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>, StoreError>;
}
