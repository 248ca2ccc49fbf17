//! An in-memory [`ObjectStore`] standing in for the Kubernetes API in tests.
//!
//! It mirrors the API server behaviors the controllers depend on: resource
//! versions are bumped on every write and checked when a write names one,
//! spec and status are written through separate paths, list queries honor
//! label selectors, and deleting an object removes everything it owns.

use crate::{
    store::{self, Object, ObjectStore},
    Error, Result,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc};
use urlshortener_k8s_api::{labels::Selector, ResourceExt};

#[derive(Clone, Debug, Default)]
pub struct MemoryStore(Arc<Mutex<State>>);

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    version: u64,
    writes: usize,
    failing_kind: Option<String>,
    conflicts: usize,
}

/// Objects are keyed by kind, namespace and name.
type Key = (String, String, String);

// === impl MemoryStore ===

impl MemoryStore {
    /// The number of successful writes so far.
    pub fn writes(&self) -> usize {
        self.0.lock().writes
    }

    /// Fails every subsequent write to objects of `kind` with a store error.
    pub fn fail_writes(&self, kind: &str) {
        self.0.lock().failing_kind = Some(kind.to_string());
    }

    pub fn heal(&self) {
        self.0.lock().failing_kind = None;
    }

    /// Rejects the next `n` writes as conflicting, as if another writer had
    /// raced each of them.
    pub fn conflict_next_writes(&self, n: usize) {
        self.0.lock().conflicts = n;
    }

    /// The number of objects of `K` across all namespaces.
    pub fn len<K: Object>(&self) -> usize {
        let kind = K::kind(&()).to_string();
        self.0
            .lock()
            .objects
            .keys()
            .filter(|(k, _, _)| *k == kind)
            .count()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<K> {
        let state = self.0.lock();
        let value = state
            .objects
            .get(&key::<K>(namespace, name))
            .ok_or_else(|| store::not_found::<K>(namespace, name))?;
        decode(value.clone())
    }

    async fn list<K: Object>(&self, namespace: &str, selector: Option<&Selector>) -> Result<Vec<K>> {
        let kind = K::kind(&()).to_string();
        let state = self.0.lock();
        let mut objects = Vec::new();
        for ((k, ns, _), value) in &state.objects {
            if *k != kind || ns != namespace {
                continue;
            }
            let obj = decode::<K>(value.clone())?;
            if selector.map_or(true, |s| s.matches(obj.meta().labels.as_ref())) {
                objects.push(obj);
            }
        }
        Ok(objects)
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K> {
        let (namespace, name) = identity(obj)?;
        let mut state = self.0.lock();
        state.check_write::<K>(&namespace, &name)?;
        let key = key::<K>(&namespace, &name);
        if state.objects.contains_key(&key) {
            return Err(store::conflict::<K>(&namespace, &name));
        }

        let version = state.next_version();
        let mut obj = obj.clone();
        let meta = obj.meta_mut();
        meta.resource_version = Some(version.to_string());
        meta.uid = Some(format!("uid-{version}"));

        // Status is a subresource and cannot be set on create.
        let mut value = encode(&obj)?;
        set_field(&mut value, "status", None);
        state.objects.insert(key, value.clone());
        state.writes += 1;
        decode(value)
    }

    async fn update<K: Object>(&self, obj: &K) -> Result<K> {
        let (namespace, name) = identity(obj)?;
        let mut state = self.0.lock();
        state.check_write::<K>(&namespace, &name)?;
        let key = key::<K>(&namespace, &name);
        let stored = decode::<K>(state.current::<K>(&key, obj)?.clone())?;
        let status = state.objects.get(&key).and_then(|v| v.get("status")).cloned();

        let version = state.next_version();
        let mut obj = obj.clone();
        let meta = obj.meta_mut();
        meta.resource_version = Some(version.to_string());
        meta.uid = stored.uid();

        let mut value = encode(&obj)?;
        set_field(&mut value, "status", status);
        state.objects.insert(key, value.clone());
        state.writes += 1;
        decode(value)
    }

    async fn update_status<K: Object>(&self, obj: &K) -> Result<K> {
        let (namespace, name) = identity(obj)?;
        let mut state = self.0.lock();
        state.check_write::<K>(&namespace, &name)?;
        let key = key::<K>(&namespace, &name);
        let mut stored = decode::<K>(state.current::<K>(&key, obj)?.clone())?;

        let version = state.next_version();
        stored.meta_mut().resource_version = Some(version.to_string());
        let status = encode(obj)?.get("status").cloned();
        let mut value = encode(&stored)?;
        set_field(&mut value, "status", status);
        state.objects.insert(key, value.clone());
        state.writes += 1;
        decode(value)
    }

    async fn delete<K: Object>(&self, obj: &K) -> Result<()> {
        let (namespace, name) = identity(obj)?;
        let mut state = self.0.lock();
        state.check_write::<K>(&namespace, &name)?;
        let value = state
            .objects
            .remove(&key::<K>(&namespace, &name))
            .ok_or_else(|| store::not_found::<K>(&namespace, &name))?;
        state.writes += 1;

        let mut orphaned = uid_of(&value).into_iter().collect::<Vec<_>>();
        while let Some(owner) = orphaned.pop() {
            let owned = state
                .objects
                .iter()
                .filter(|(_, v)| owner_uids(v).any(|uid| uid == owner))
                .map(|(k, _)| k.clone())
                .collect::<Vec<_>>();
            for key in owned {
                if let Some(value) = state.objects.remove(&key) {
                    orphaned.extend(uid_of(&value));
                }
            }
        }
        Ok(())
    }
}

// === impl State ===

impl State {
    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    fn check_write<K: Object>(&mut self, namespace: &str, name: &str) -> Result<()> {
        if self.failing_kind.as_deref() == Some(&*K::kind(&())) {
            return Err(Error::store(format!(
                "injected failure writing {} {namespace}/{name}",
                K::kind(&())
            )));
        }
        if self.conflicts > 0 {
            self.conflicts -= 1;
            return Err(store::conflict::<K>(namespace, name));
        }
        Ok(())
    }

    /// Returns the stored value `obj` replaces, failing if it is absent or if
    /// `obj` names a version other than the stored one.
    fn current<K: Object>(&self, key: &Key, obj: &K) -> Result<&Value> {
        let (_, namespace, name) = key;
        let value = self
            .objects
            .get(key)
            .ok_or_else(|| store::not_found::<K>(namespace, name))?;
        if let Some(version) = obj.meta().resource_version.as_deref() {
            let stored = value
                .pointer("/metadata/resourceVersion")
                .and_then(Value::as_str);
            if stored != Some(version) {
                return Err(store::conflict::<K>(namespace, name));
            }
        }
        Ok(value)
    }
}

fn key<K: Object>(namespace: &str, name: &str) -> Key {
    (K::kind(&()).to_string(), namespace.to_string(), name.to_string())
}

fn identity<K: Object>(obj: &K) -> Result<(String, String)> {
    match (obj.namespace(), obj.meta().name.clone()) {
        (Some(namespace), Some(name)) => Ok((namespace, name)),
        _ => Err(Error::Validation(format!(
            "{} must have a namespace and a name",
            K::kind(&())
        ))),
    }
}

fn encode<K: Object>(obj: &K) -> Result<Value> {
    serde_json::to_value(obj).map_err(Error::store)
}

fn decode<K: Object>(value: Value) -> Result<K> {
    serde_json::from_value(value).map_err(Error::store)
}

fn set_field(value: &mut Value, field: &str, update: Option<Value>) {
    if let Some(map) = value.as_object_mut() {
        match update {
            Some(v) => map.insert(field.to_string(), v),
            None => map.remove(field),
        };
    }
}

fn uid_of(value: &Value) -> Option<String> {
    value
        .pointer("/metadata/uid")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn owner_uids(value: &Value) -> impl Iterator<Item = &str> {
    value
        .pointer("/metadata/ownerReferences")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|r| r.get("uid").and_then(Value::as_str))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::set_controller_reference;
    use maplit::btreemap;
    use urlshortener_k8s_api::{
        Ingress, Redirect, RedirectSpec, RedirectStatus, ShortLink, ShortLinkSpec, ShortLinkStatus,
    };

    fn link(name: &str) -> ShortLink {
        let mut link = ShortLink::new(name, ShortLinkSpec::new("example.com"));
        link.metadata.namespace = Some("default".to_string());
        link
    }

    #[tokio::test]
    async fn versions_guard_writes() {
        let store = MemoryStore::default();
        let created = store.create(&link("home")).await.unwrap();

        let mut first = created.clone();
        first.spec.target = "example.com/first".to_string();
        let updated = store.update(&first).await.unwrap();
        assert_ne!(updated.resource_version(), created.resource_version());
        assert_eq!(updated.uid(), created.uid());

        let mut stale = created.clone();
        stale.spec.target = "example.com/stale".to_string();
        assert!(store.update(&stale).await.unwrap_err().is_conflict());

        let stored = store.get::<ShortLink>("default", "home").await.unwrap();
        assert_eq!(stored.spec.target, "example.com/first");

        let duplicate = store.create(&link("home")).await.unwrap_err();
        assert!(duplicate.is_conflict(), "{duplicate}");
    }

    #[tokio::test]
    async fn spec_and_status_paths_are_separate() {
        let store = MemoryStore::default();
        let mut input = link("home");
        input.status = Some(ShortLinkStatus {
            count: 10,
            ..Default::default()
        });
        let created = store.create(&input).await.unwrap();
        assert_eq!(created.status, None, "status is ignored on create");

        let mut with_status = created.clone();
        with_status.spec.target = "ignored.example.com".to_string();
        with_status.status = Some(ShortLinkStatus {
            count: 3,
            ..Default::default()
        });
        let updated = store.update_status(&with_status).await.unwrap();
        assert_eq!(updated.count(), 3);
        assert_eq!(updated.spec.target, "example.com");

        let mut with_spec = updated.clone();
        with_spec.spec.target = "example.com/new".to_string();
        with_spec.status = None;
        let updated = store.update(&with_spec).await.unwrap();
        assert_eq!(updated.count(), 3);
        assert_eq!(updated.spec.target, "example.com/new");
    }

    #[tokio::test]
    async fn list_honors_namespace_and_selector() {
        let store = MemoryStore::default();
        let mut a = link("a");
        a.metadata.labels = Some(btreemap! { "shortlink".to_string() => "docs".to_string() });
        store.create(&a).await.unwrap();
        store.create(&link("b")).await.unwrap();
        let mut other = link("c");
        other.metadata.namespace = Some("other".to_string());
        store.create(&other).await.unwrap();

        let all = store.list::<ShortLink>("default", None).await.unwrap();
        assert_eq!(all.len(), 2);

        let selector = Selector::from_iter(Some(("shortlink", "docs")));
        let docs = store.list::<ShortLink>("default", Some(&selector)).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].name_any(), "a");

        assert!(store.list::<Redirect>("default", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_cascades_to_owned_objects() {
        let store = MemoryStore::default();
        let mut redirect = Redirect::new("old-site", RedirectSpec::new("old.example.com", "new.example.com"));
        redirect.metadata.namespace = Some("default".to_string());
        let redirect = store.create(&redirect).await.unwrap();

        let mut ingress = Ingress::default();
        ingress.metadata.name = Some("old-site".to_string());
        ingress.metadata.namespace = Some("default".to_string());
        set_controller_reference(&redirect, &mut ingress.metadata).unwrap();
        store.create(&ingress).await.unwrap();

        let mut unrelated = Ingress::default();
        unrelated.metadata.name = Some("unrelated".to_string());
        unrelated.metadata.namespace = Some("default".to_string());
        store.create(&unrelated).await.unwrap();
        assert_eq!(store.len::<Ingress>(), 2);

        store.delete(&redirect).await.unwrap();
        assert_eq!(store.len::<Redirect>(), 0);
        assert_eq!(store.len::<Ingress>(), 1);
        assert!(store.get::<Ingress>("default", "unrelated").await.is_ok());
    }

    #[tokio::test]
    async fn injected_failures() {
        let store = MemoryStore::default();
        store.fail_writes("Redirect");
        let mut redirect = Redirect::new("old-site", RedirectSpec::new("old.example.com", "new.example.com"));
        redirect.metadata.namespace = Some("default".to_string());
        redirect.status = Some(RedirectStatus::default());
        let error = store.create(&redirect).await.unwrap_err();
        assert!(error.is_retryable(), "{error}");

        // Other kinds are unaffected.
        store.create(&link("home")).await.unwrap();

        store.heal();
        store.create(&redirect).await.unwrap();
        assert_eq!(store.writes(), 2);
    }
}
