use crate::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use urlshortener_k8s_api::{labels::Selector, NamespaceResourceScope, ObjectMeta, Resource, ResourceExt};

/// A namespaced Kubernetes object the store knows how to read and write.
pub trait Object:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> Object for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Generic access to a declarative, versioned object store.
///
/// Writes are conditional on the object's `resourceVersion` when one is set,
/// failing with [`Error::Conflict`] when the stored version has moved on.
/// Spec and status are written through independent paths: `update` never
/// changes status and `update_status` never changes anything else.
#[async_trait::async_trait]
pub trait ObjectStore: Clone + Send + Sync + 'static {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<K>;

    async fn list<K: Object>(&self, namespace: &str, selector: Option<&Selector>) -> Result<Vec<K>>;

    async fn create<K: Object>(&self, obj: &K) -> Result<K>;

    async fn update<K: Object>(&self, obj: &K) -> Result<K>;

    async fn update_status<K: Object>(&self, obj: &K) -> Result<K>;

    async fn delete<K: Object>(&self, obj: &K) -> Result<()>;
}

/// Supplies the namespace used when a caller does not name one.
pub trait NamespaceResolver: Send + Sync + 'static {
    fn default_namespace(&self) -> &str;
}

/// A namespace resolved once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaticNamespace(String);

// === impl StaticNamespace ===

impl StaticNamespace {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self(namespace.into())
    }
}

impl NamespaceResolver for StaticNamespace {
    fn default_namespace(&self) -> &str {
        &self.0
    }
}

/// Makes `owner` the controlling owner of the object described by `dependent`,
/// so that deleting the owner cascades to the dependent.
///
/// Fails if the owner has not been persisted yet (it has no uid) or if the
/// dependent is already controlled by a different object.
pub fn set_controller_reference<O: Object>(owner: &O, dependent: &mut ObjectMeta) -> Result<()> {
    let reference = owner.controller_owner_ref(&()).ok_or_else(|| {
        Error::Validation(format!(
            "{} {} has no uid and cannot own other objects",
            O::kind(&()),
            owner.name_any()
        ))
    })?;

    let references = dependent.owner_references.get_or_insert_with(Vec::new);
    if let Some(other) = references
        .iter()
        .find(|r| r.controller == Some(true) && r.uid != reference.uid)
    {
        return Err(Error::Validation(format!(
            "{} is already controlled by {} {}",
            dependent.name.as_deref().unwrap_or_default(),
            other.kind,
            other.name
        )));
    }
    references.retain(|r| r.uid != reference.uid);
    references.push(reference);
    Ok(())
}

/// The error returned when the store holds no such object.
pub fn not_found<K: Object>(namespace: &str, name: &str) -> Error {
    Error::NotFound {
        kind: K::kind(&()).to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

/// The error returned when a write loses against a newer version, or a
/// create collides with an existing name.
pub fn conflict<K: Object>(namespace: &str, name: &str) -> Error {
    Error::Conflict {
        kind: K::kind(&()).to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use urlshortener_k8s_api::{Ingress, Redirect, RedirectSpec};

    fn redirect(uid: Option<&str>) -> Redirect {
        let mut redirect = Redirect::new("old-site", RedirectSpec::new("old.example.com", "new.example.com"));
        redirect.metadata.namespace = Some("default".to_string());
        redirect.metadata.uid = uid.map(Into::into);
        redirect
    }

    #[test]
    fn controller_reference_is_idempotent() {
        let owner = redirect(Some("uid-1"));
        let mut ingress = Ingress::default();
        ingress.metadata.name = Some("old-site".to_string());

        set_controller_reference(&owner, &mut ingress.metadata).unwrap();
        set_controller_reference(&owner, &mut ingress.metadata).unwrap();

        let references = ingress.metadata.owner_references.unwrap();
        assert_eq!(references.len(), 1);
        assert_eq!(references[0].uid, "uid-1");
        assert_eq!(references[0].kind, "Redirect");
        assert_eq!(references[0].name, "old-site");
        assert_eq!(references[0].controller, Some(true));
    }

    #[test]
    fn controller_reference_requires_uid() {
        let owner = redirect(None);
        let mut ingress = Ingress::default();
        let error = set_controller_reference(&owner, &mut ingress.metadata).unwrap_err();
        assert!(matches!(error, Error::Validation(_)), "{error}");
    }

    #[test]
    fn controller_reference_rejects_second_controller() {
        let mut ingress = Ingress::default();
        ingress.metadata.name = Some("old-site".to_string());
        set_controller_reference(&redirect(Some("uid-1")), &mut ingress.metadata).unwrap();

        let error = set_controller_reference(&redirect(Some("uid-2")), &mut ingress.metadata).unwrap_err();
        assert!(matches!(error, Error::Validation(_)), "{error}");
    }

    #[test]
    fn static_namespace() {
        assert_eq!(StaticNamespace::new("links").default_namespace(), "links");
    }
}
