use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client};
use tracing::{debug, instrument};

use super::{Managed, ObjectKey, Store, StoreError, TypeRegistry, kind_of, label_selector};

/// [`Store`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    registry: Arc<TypeRegistry>,
    field_manager: String,
}

impl KubeStore {
    pub fn new(
        client: Client,
        registry: Arc<TypeRegistry>,
        field_manager: &str,
    ) -> Self {
        Self {
            client,
            registry,
            field_manager: field_manager.to_string(),
        }
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }
}

fn classify(kind: &str, key: &ObjectKey, err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound {
            kind: kind.to_string(),
            key: key.to_string(),
        },
        kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict {
            kind: kind.to_string(),
            key: key.to_string(),
            message: ae.message,
        },
        kube::Error::SerdeError(e) => StoreError::Codec(e.to_string()),
        other => StoreError::Transient(other.to_string()),
    }
}

#[async_trait]
impl Store for KubeStore {
    fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    #[instrument(level = "trace", skip_all, fields(kind = %kind_of::<K>(), key = %key))]
    async fn get<K: Managed>(&self, key: &ObjectKey) -> Result<K, StoreError> {
        self.registry.ensure::<K>()?;
        K::api(self.client.clone(), key.namespace.as_deref())
            .get(&key.name)
            .await
            .map_err(|e| classify(&kind_of::<K>(), key, e))
    }

    async fn create<K: Managed>(&self, obj: &K) -> Result<K, StoreError> {
        self.registry.ensure::<K>()?;
        let key = ObjectKey::of(obj)?;
        debug!(kind = %kind_of::<K>(), %key, "store: create");
        K::api(self.client.clone(), key.namespace.as_deref())
            .create(&self.post_params(), obj)
            .await
            .map_err(|e| classify(&kind_of::<K>(), &key, e))
    }

    async fn update<K: Managed>(&self, obj: &K) -> Result<K, StoreError> {
        self.registry.ensure::<K>()?;
        let key = ObjectKey::of(obj)?;
        debug!(kind = %kind_of::<K>(), %key, "store: update");
        K::api(self.client.clone(), key.namespace.as_deref())
            .replace(&key.name, &self.post_params(), obj)
            .await
            .map_err(|e| classify(&kind_of::<K>(), &key, e))
    }

    async fn delete<K: Managed>(&self, obj: &K) -> Result<(), StoreError> {
        self.registry.ensure::<K>()?;
        let key = ObjectKey::of(obj)?;
        debug!(kind = %kind_of::<K>(), %key, "store: delete");
        K::api(self.client.clone(), key.namespace.as_deref())
            .delete(&key.name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| classify(&kind_of::<K>(), &key, e))
    }

    async fn list<K: Managed>(
        &self,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>, StoreError> {
        self.registry.ensure::<K>()?;
        let selector = label_selector(labels);
        let key = ObjectKey {
            namespace: namespace.map(str::to_string),
            name: selector.clone(),
        };
        debug!(kind = %kind_of::<K>(), %key, "store: list");
        let api: Api<K> = match namespace {
            Some(ns) => K::api(self.client.clone(), Some(ns)),
            None => Api::all(self.client.clone()),
        };
        api.list(&ListParams::default().labels(&selector))
            .await
            .map(|list| list.items)
            .map_err(|e| classify(&kind_of::<K>(), &key, e))
    }
}
