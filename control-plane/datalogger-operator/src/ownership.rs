//! Controller/owner relations between records.
//!
//! An owner reference is a value resolved by lookup, never a pointer: the
//! helpers here only stamp and compare [`OwnerReference`] entries.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;

use crate::store::TypeRegistry;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OwnershipError {
    #[error("kind {0} is not registered; owner and dependent must both be registered")]
    NotRegistered(String),
    #[error("owner {kind}/{name} has no uid yet")]
    MissingUid { kind: String, name: String },
    #[error("owner {kind} has no name")]
    MissingName { kind: String },
    #[error("{dependent} is already controlled by {existing}")]
    AlreadyControlled { dependent: String, existing: String },
    #[error("cross-namespace owner reference from {dependent} to {owner}")]
    CrossNamespace { dependent: String, owner: String },
}

/// Identity of an owner as stored on its dependents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
}

impl OwnerRef {
    pub fn for_owner<O: Resource<DynamicType = ()>>(
        registry: &TypeRegistry,
        owner: &O,
    ) -> Result<Self, OwnershipError> {
        let kind = O::kind(&()).to_string();
        let gvk = registry
            .lookup::<O>()
            .ok_or_else(|| OwnershipError::NotRegistered(kind.clone()))?;
        let meta = owner.meta();
        let name = meta
            .name
            .clone()
            .ok_or_else(|| OwnershipError::MissingName { kind: kind.clone() })?;
        let uid = meta.uid.clone().ok_or_else(|| OwnershipError::MissingUid {
            kind: kind.clone(),
            name: name.clone(),
        })?;
        Ok(Self {
            api_version: gvk.api_version(),
            kind,
            name,
            uid,
        })
    }

    fn to_reference(&self, controller: bool) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: controller.then_some(true),
            block_owner_deletion: controller.then_some(true),
        }
    }

    /// Same object as `r`: group, kind and name match (version may differ).
    fn refers_to(&self, r: &OwnerReference) -> bool {
        group_of(&self.api_version) == group_of(&r.api_version)
            && self.kind == r.kind
            && self.name == r.name
    }
}

fn group_of(api_version: &str) -> &str {
    match api_version.split_once('/') {
        Some((group, _)) => group,
        None => "",
    }
}

fn describe<K: Resource<DynamicType = ()>>(obj: &K) -> String {
    format!(
        "{}/{}",
        K::kind(&()),
        obj.meta().name.as_deref().unwrap_or("<unnamed>")
    )
}

fn check_scope<O, C>(owner: &O, controlled: &C) -> Result<(), OwnershipError>
where
    O: Resource<DynamicType = ()>,
    C: Resource<DynamicType = ()>,
{
    if let Some(owner_ns) = owner.meta().namespace.as_deref() {
        if controlled.meta().namespace.as_deref() != Some(owner_ns) {
            return Err(OwnershipError::CrossNamespace {
                dependent: describe(controlled),
                owner: describe(owner),
            });
        }
    }
    Ok(())
}

/// Current controller reference of `obj`, if any.
pub fn controller_of<K: Resource>(obj: &K) -> Option<&OwnerReference> {
    obj.meta()
        .owner_references
        .as_ref()?
        .iter()
        .find(|r| r.controller == Some(true))
}

/// Mark `owner` as the controller of `controlled`.
///
/// Fails when either kind is unregistered, when the owner has no uid, when
/// the two live in different namespaces, or when `controlled` already has a
/// different controller. Re-stamping the same controller is a no-op.
pub fn set_controller_reference<O, C>(
    registry: &TypeRegistry,
    owner: &O,
    controlled: &mut C,
) -> Result<(), OwnershipError>
where
    O: Resource<DynamicType = ()>,
    C: Resource<DynamicType = ()>,
{
    if !registry.contains::<C>() {
        return Err(OwnershipError::NotRegistered(C::kind(&()).to_string()));
    }
    let owner_ref = OwnerRef::for_owner(registry, owner)?;
    check_scope(owner, controlled)?;
    if let Some(existing) = controller_of(controlled) {
        if !owner_ref.refers_to(existing) {
            return Err(OwnershipError::AlreadyControlled {
                dependent: describe(controlled),
                existing: format!("{}/{}", existing.kind, existing.name),
            });
        }
    }
    upsert(controlled, &owner_ref, true);
    Ok(())
}

/// Record `owner` as a non-controlling owner of `dependent`.
pub fn set_owner_reference<O, C>(
    registry: &TypeRegistry,
    owner: &O,
    dependent: &mut C,
) -> Result<(), OwnershipError>
where
    O: Resource<DynamicType = ()>,
    C: Resource<DynamicType = ()>,
{
    if !registry.contains::<C>() {
        return Err(OwnershipError::NotRegistered(C::kind(&()).to_string()));
    }
    let owner_ref = OwnerRef::for_owner(registry, owner)?;
    check_scope(owner, dependent)?;
    let controller = dependent
        .meta()
        .owner_references
        .iter()
        .flatten()
        .any(|r| owner_ref.refers_to(r) && r.controller == Some(true));
    upsert(dependent, &owner_ref, controller);
    Ok(())
}

fn upsert<C: Resource>(obj: &mut C, owner_ref: &OwnerRef, controller: bool) {
    let refs = obj.meta_mut().owner_references.get_or_insert_with(Vec::new);
    let new_ref = owner_ref.to_reference(controller);
    match refs.iter_mut().find(|r| owner_ref.refers_to(r)) {
        Some(slot) => *slot = new_ref,
        None => refs.push(new_ref),
    }
}

/// True iff `obj`'s controller reference points at `owner` (compared by uid).
pub fn is_controlled_by<C: Resource, O: Resource>(obj: &C, owner: &O) -> bool {
    match (controller_of(obj), owner.meta().uid.as_deref()) {
        (Some(r), Some(uid)) => r.uid == uid,
        _ => false,
    }
}

/// True iff any owner reference of `obj`, controlling or not, has `owner`'s uid.
pub fn has_owner_reference<C: Resource, O: Resource>(obj: &C, owner: &O) -> bool {
    let Some(uid) = owner.meta().uid.as_deref() else {
        return false;
    };
    obj.meta()
        .owner_references
        .iter()
        .flatten()
        .any(|r| r.uid == uid)
}

/// Fails when a stored object is controlled by something other than `owner`.
/// Objects without a controller may be adopted.
pub fn ensure_adoptable<C, O>(stored: &C, owner: &O) -> Result<(), OwnershipError>
where
    C: Resource<DynamicType = ()>,
    O: Resource<DynamicType = ()>,
{
    match controller_of(stored) {
        Some(existing) if !is_controlled_by(stored, owner) => {
            Err(OwnershipError::AlreadyControlled {
                dependent: describe(stored),
                existing: format!("{}/{}", existing.kind, existing.name),
            })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::Service;
    use kube::core::ObjectMeta;

    use super::*;
    use crate::crd::{DataLogger, DataLoggerSpec};

    fn meta(name: &str, uid: Option<&str>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.into()),
            namespace: Some("default".into()),
            uid: uid.map(str::to_string),
            ..Default::default()
        }
    }

    fn dl(name: &str, uid: &str) -> DataLogger {
        let mut dl = DataLogger::new(name, DataLoggerSpec::default());
        dl.metadata = meta(name, Some(uid));
        dl
    }

    fn deployment(name: &str, uid: Option<&str>) -> Deployment {
        Deployment {
            metadata: meta(name, uid),
            ..Default::default()
        }
    }

    #[test]
    fn set_controller_reference_stamps_controller() {
        let reg = TypeRegistry::standard();
        let owner = dl("logger", "uid-1");
        let mut dep = deployment("app1", None);
        set_controller_reference(&reg, &owner, &mut dep).unwrap();

        let r = controller_of(&dep).unwrap();
        assert_eq!(r.api_version, "app.datalogger.io/v1");
        assert_eq!(r.kind, "DataLogger");
        assert_eq!(r.name, "logger");
        assert_eq!(r.uid, "uid-1");
        assert_eq!(r.block_owner_deletion, Some(true));
        assert!(is_controlled_by(&dep, &owner));

        // idempotent
        set_controller_reference(&reg, &owner, &mut dep).unwrap();
        assert_eq!(dep.metadata.owner_references.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn set_controller_reference_refuses_second_controller() {
        let reg = TypeRegistry::standard();
        let mut dep = deployment("app1", None);
        set_controller_reference(&reg, &dl("a", "uid-a"), &mut dep).unwrap();
        let err =
            set_controller_reference(&reg, &dl("b", "uid-b"), &mut dep).unwrap_err();
        assert!(matches!(err, OwnershipError::AlreadyControlled { .. }));
        assert!(!is_controlled_by(&dep, &dl("b", "uid-b")));
    }

    #[test]
    fn set_controller_reference_requires_registration() {
        let reg = TypeRegistry::builder().register::<Deployment>().build();
        let mut dep = deployment("app1", None);
        assert_eq!(
            set_controller_reference(&reg, &dl("a", "uid-a"), &mut dep),
            Err(OwnershipError::NotRegistered("DataLogger".into()))
        );

        let reg = TypeRegistry::builder().register::<DataLogger>().build();
        assert_eq!(
            set_controller_reference(&reg, &dl("a", "uid-a"), &mut dep),
            Err(OwnershipError::NotRegistered("Deployment".into()))
        );
    }

    #[test]
    fn set_controller_reference_rejects_cross_namespace_and_missing_uid() {
        let reg = TypeRegistry::standard();
        let mut dep = deployment("app1", None);
        dep.metadata.namespace = Some("other".into());
        assert!(matches!(
            set_controller_reference(&reg, &dl("a", "uid-a"), &mut dep),
            Err(OwnershipError::CrossNamespace { .. })
        ));

        let mut owner = dl("a", "uid-a");
        owner.metadata.uid = None;
        let mut dep = deployment("app1", None);
        assert!(matches!(
            set_controller_reference(&reg, &owner, &mut dep),
            Err(OwnershipError::MissingUid { .. })
        ));
    }

    #[test]
    fn owner_reference_sits_beside_controller() {
        let reg = TypeRegistry::standard();
        let workload = deployment("app1", Some("uid-dep"));
        let owner = dl("logger", "uid-dl");
        let mut svc = Service {
            metadata: meta("app1", None),
            ..Default::default()
        };
        set_controller_reference(&reg, &workload, &mut svc).unwrap();
        set_owner_reference(&reg, &owner, &mut svc).unwrap();

        let refs = svc.metadata.owner_references.as_ref().unwrap();
        assert_eq!(refs.len(), 2);
        assert!(is_controlled_by(&svc, &workload));
        assert!(!is_controlled_by(&svc, &owner));
        let dl_ref = refs.iter().find(|r| r.kind == "DataLogger").unwrap();
        assert_eq!(dl_ref.controller, None);
    }

    #[test]
    fn is_controlled_by_is_false_without_uid_or_controller() {
        let dep = deployment("app1", Some("uid-dep"));
        let svc = Service {
            metadata: meta("app1", None),
            ..Default::default()
        };
        assert!(!is_controlled_by(&svc, &dep));
        assert!(!is_controlled_by(&svc, &deployment("app1", None)));
    }

    #[test]
    fn ensure_adoptable_refuses_foreign_controller() {
        let reg = TypeRegistry::standard();
        let a = dl("a", "uid-a");
        let b = dl("b", "uid-b");

        let unowned = deployment("app1", Some("uid-dep"));
        assert_eq!(ensure_adoptable(&unowned, &a), Ok(()));

        let mut dep = unowned.clone();
        set_controller_reference(&reg, &a, &mut dep).unwrap();
        assert_eq!(ensure_adoptable(&dep, &a), Ok(()));
        assert!(matches!(
            ensure_adoptable(&dep, &b),
            Err(OwnershipError::AlreadyControlled { existing, .. }) if existing == "DataLogger/a"
        ));
    }

    #[test]
    fn has_owner_reference_matches_any_reference_by_uid() {
        let reg = TypeRegistry::standard();
        let owner = dl("logger", "uid-dl");
        let mut svc = Service {
            metadata: meta("app1", None),
            ..Default::default()
        };
        assert!(!has_owner_reference(&svc, &owner));
        set_owner_reference(&reg, &owner, &mut svc).unwrap();
        assert!(has_owner_reference(&svc, &owner));
        assert!(!has_owner_reference(&svc, &dl("logger", "uid-recreated")));
    }
}
