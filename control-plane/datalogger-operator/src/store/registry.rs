use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Service};
use kube::Resource;
use kube::core::GroupVersionKind;

use super::StoreError;
use crate::crd::DataLogger;

/// Immutable (group, kind) → GVK table built once at startup and handed to
/// the store by reference.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    kinds: BTreeMap<(String, String), GroupVersionKind>,
}

#[derive(Debug, Default)]
pub struct TypeRegistryBuilder {
    kinds: BTreeMap<(String, String), GroupVersionKind>,
}

impl TypeRegistryBuilder {
    pub fn register<K: Resource<DynamicType = ()>>(mut self) -> Self {
        let gvk = GroupVersionKind::gvk(
            &K::group(&()),
            &K::version(&()),
            &K::kind(&()),
        );
        self.kinds
            .insert((gvk.group.clone(), gvk.kind.clone()), gvk);
        self
    }

    pub fn build(self) -> TypeRegistry {
        TypeRegistry { kinds: self.kinds }
    }
}

impl TypeRegistry {
    pub fn builder() -> TypeRegistryBuilder {
        TypeRegistryBuilder::default()
    }

    /// Every kind the operator reads or writes.
    pub fn standard() -> Self {
        Self::builder()
            .register::<DataLogger>()
            .register::<Deployment>()
            .register::<Service>()
            .register::<Namespace>()
            .build()
    }

    pub fn lookup<K: Resource<DynamicType = ()>>(
        &self,
    ) -> Option<&GroupVersionKind> {
        self.kinds
            .get(&(K::group(&()).to_string(), K::kind(&()).to_string()))
    }

    pub fn contains<K: Resource<DynamicType = ()>>(&self) -> bool {
        self.lookup::<K>().is_some()
    }

    pub fn ensure<K: Resource<DynamicType = ()>>(
        &self,
    ) -> Result<&GroupVersionKind, StoreError> {
        self.lookup::<K>()
            .ok_or_else(|| StoreError::Unregistered(K::kind(&()).to_string()))
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_knows_all_managed_kinds() {
        let reg = TypeRegistry::standard();
        assert_eq!(reg.len(), 4);
        let dl = reg.lookup::<DataLogger>().unwrap();
        assert_eq!(dl.api_version(), "app.datalogger.io/v1");
        assert_eq!(reg.lookup::<Deployment>().unwrap().api_version(), "apps/v1");
        assert_eq!(reg.lookup::<Namespace>().unwrap().api_version(), "v1");
        assert!(reg.contains::<Service>());
    }

    #[test]
    fn ensure_reports_unregistered_kinds() {
        let reg = TypeRegistry::builder().register::<Deployment>().build();
        assert!(reg.ensure::<Deployment>().is_ok());
        assert_eq!(
            reg.ensure::<Service>().unwrap_err(),
            StoreError::Unregistered("Service".into())
        );
        assert!(TypeRegistry::default().is_empty());
    }
}
