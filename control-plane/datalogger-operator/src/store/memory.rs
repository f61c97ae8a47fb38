use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;

use super::{Managed, ObjectKey, Store, StoreError, TypeRegistry, kind_of, label_selector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Create,
    Update,
    Delete,
    List,
}

impl Verb {
    pub fn is_write(self) -> bool {
        matches!(self, Verb::Create | Verb::Update | Verb::Delete)
    }
}

/// One recorded store call, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub verb: Verb,
    pub kind: String,
    pub key: ObjectKey,
}

#[derive(Debug, Clone)]
struct Fault {
    verb: Verb,
    kind: String,
    name: Option<String>,
    error: StoreError,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<(String, ObjectKey), JsonValue>,
    calls: Vec<Call>,
    faults: Vec<Fault>,
    next_uid: u64,
    next_version: u64,
}

impl Inner {
    fn record(&mut self, verb: Verb, kind: &str, key: &ObjectKey) -> Result<(), StoreError> {
        self.calls.push(Call {
            verb,
            kind: kind.to_string(),
            key: key.clone(),
        });
        match self.faults.iter().find(|f| {
            f.verb == verb
                && f.kind == kind
                && f.name.as_deref().is_none_or(|n| n == key.name)
        }) {
            Some(f) => Err(f.error.clone()),
            None => Ok(()),
        }
    }

    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn assign_uid(&mut self) -> String {
        self.next_uid += 1;
        format!("uid-{:04}", self.next_uid)
    }
}

/// In-process [`Store`] with optimistic concurrency, a call log and fault
/// injection. Used to drive reconcile passes without a cluster.
#[derive(Clone)]
pub struct MemoryStore {
    registry: Arc<TypeRegistry>,
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(TypeRegistry::standard()))
    }
}

fn encode<K: Managed>(obj: &K) -> Result<JsonValue, StoreError> {
    serde_json::to_value(obj).map_err(|e| StoreError::Codec(e.to_string()))
}

fn decode<K: Managed>(value: &JsonValue) -> Result<K, StoreError> {
    serde_json::from_value(value.clone())
        .map_err(|e| StoreError::Codec(e.to_string()))
}

fn stored_version(value: &JsonValue) -> Option<&str> {
    value.pointer("/metadata/resourceVersion")?.as_str()
}

fn stored_uid(value: &JsonValue) -> Option<String> {
    value
        .pointer("/metadata/uid")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

impl MemoryStore {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Seed an object without recording a call. Missing uid and
    /// resourceVersion are filled in; the stored copy is returned.
    pub async fn insert<K: Managed>(&self, obj: K) -> Result<K, StoreError> {
        self.registry.ensure::<K>()?;
        let key = ObjectKey::of(&obj)?;
        let mut inner = self.inner.lock().await;
        let mut obj = obj;
        if obj.meta().uid.is_none() {
            obj.meta_mut().uid = Some(inner.assign_uid());
        }
        obj.meta_mut().resource_version = Some(inner.bump_version());
        let value = encode(&obj)?;
        inner.objects.insert((kind_of::<K>(), key), value);
        Ok(obj)
    }

    /// Read an object without recording a call.
    pub async fn peek<K: Managed>(&self, key: &ObjectKey) -> Option<K> {
        let inner = self.inner.lock().await;
        inner
            .objects
            .get(&(kind_of::<K>(), key.clone()))
            .and_then(|v| decode(v).ok())
    }

    /// Fail every matching call with `error`; `name = None` matches any name.
    pub async fn fail_on(
        &self,
        verb: Verb,
        kind: &str,
        name: Option<&str>,
        error: StoreError,
    ) {
        self.inner.lock().await.faults.push(Fault {
            verb,
            kind: kind.to_string(),
            name: name.map(str::to_string),
            error,
        });
    }

    pub async fn clear_faults(&self) {
        self.inner.lock().await.faults.clear();
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.inner.lock().await.calls.clone()
    }

    pub async fn clear_calls(&self) {
        self.inner.lock().await.calls.clear();
    }

    /// Create, update and delete calls in the order they were issued.
    pub async fn writes(&self) -> Vec<Call> {
        self.calls()
            .await
            .into_iter()
            .filter(|c| c.verb.is_write())
            .collect()
    }

    pub async fn count(&self, verb: Verb, kind: &str) -> usize {
        self.calls()
            .await
            .iter()
            .filter(|c| c.verb == verb && c.kind == kind)
            .count()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    async fn get<K: Managed>(&self, key: &ObjectKey) -> Result<K, StoreError> {
        self.registry.ensure::<K>()?;
        let kind = kind_of::<K>();
        let mut inner = self.inner.lock().await;
        inner.record(Verb::Get, &kind, key)?;
        match inner.objects.get(&(kind.clone(), key.clone())) {
            Some(value) => decode(value),
            None => Err(StoreError::not_found(kind, key)),
        }
    }

    async fn create<K: Managed>(&self, obj: &K) -> Result<K, StoreError> {
        self.registry.ensure::<K>()?;
        let kind = kind_of::<K>();
        let key = ObjectKey::of(obj)?;
        let mut inner = self.inner.lock().await;
        inner.record(Verb::Create, &kind, &key)?;
        let slot = (kind.clone(), key.clone());
        if inner.objects.contains_key(&slot) {
            return Err(StoreError::Conflict {
                kind,
                key: key.to_string(),
                message: "already exists".into(),
            });
        }
        let mut created = obj.clone();
        created.meta_mut().uid = Some(inner.assign_uid());
        created.meta_mut().resource_version = Some(inner.bump_version());
        let value = encode(&created)?;
        inner.objects.insert(slot, value);
        Ok(created)
    }

    async fn update<K: Managed>(&self, obj: &K) -> Result<K, StoreError> {
        self.registry.ensure::<K>()?;
        let kind = kind_of::<K>();
        let key = ObjectKey::of(obj)?;
        let mut inner = self.inner.lock().await;
        inner.record(Verb::Update, &kind, &key)?;
        let slot = (kind.clone(), key.clone());
        let (current_version, current_uid) = match inner.objects.get(&slot) {
            Some(v) => (stored_version(v).map(str::to_string), stored_uid(v)),
            None => return Err(StoreError::not_found(kind, &key)),
        };
        if let Some(expected) = obj.meta().resource_version.as_deref() {
            if current_version.as_deref() != Some(expected) {
                return Err(StoreError::Conflict {
                    kind,
                    key: key.to_string(),
                    message: format!(
                        "resourceVersion {expected} is stale (current {})",
                        current_version.unwrap_or_default()
                    ),
                });
            }
        }
        let mut updated = obj.clone();
        updated.meta_mut().uid = current_uid;
        updated.meta_mut().resource_version = Some(inner.bump_version());
        let value = encode(&updated)?;
        inner.objects.insert(slot, value);
        Ok(updated)
    }

    async fn delete<K: Managed>(&self, obj: &K) -> Result<(), StoreError> {
        self.registry.ensure::<K>()?;
        let kind = kind_of::<K>();
        let key = ObjectKey::of(obj)?;
        let mut inner = self.inner.lock().await;
        inner.record(Verb::Delete, &kind, &key)?;
        match inner.objects.remove(&(kind.clone(), key.clone())) {
            Some(_) => Ok(()),
            None => Err(StoreError::not_found(kind, &key)),
        }
    }

    async fn list<K: Managed>(
        &self,
        namespace: Option<&str>,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>, StoreError> {
        self.registry.ensure::<K>()?;
        let kind = kind_of::<K>();
        let key = ObjectKey {
            namespace: namespace.map(str::to_string),
            name: label_selector(labels),
        };
        let mut inner = self.inner.lock().await;
        inner.record(Verb::List, &kind, &key)?;
        let mut out = Vec::new();
        for ((k, obj_key), value) in &inner.objects {
            if *k != kind || namespace.is_some_and(|ns| obj_key.namespace.as_deref() != Some(ns)) {
                continue;
            }
            let obj: K = decode(value)?;
            let have = obj.meta().labels.as_ref();
            if labels
                .iter()
                .all(|(lk, lv)| have.and_then(|m| m.get(lk)) == Some(lv))
            {
                out.push(obj);
            }
        }
        Ok(out)
    }
}
