use crate::{
    store::{NamespaceResolver, Object, ObjectStore},
    Result,
};
use std::{marker::PhantomData, sync::Arc};
use tracing::debug;
use urlshortener_k8s_api::{labels, labels::Selector, Redirect, ResourceExt, ShortLink, ShortLinkStatus};

/// A resource kind reachable by a single-label query.
pub trait Queryable: Object {
    /// The label key `query` matches against.
    const QUERY_LABEL: &'static str;
}

/// Typed CRUD over one resource kind, defaulting to the namespace supplied by
/// the resolver.
pub struct Client<K, S> {
    store: S,
    namespace: Arc<dyn NamespaceResolver>,
    _kind: PhantomData<fn() -> K>,
}

pub type ShortlinkClient<S> = Client<ShortLink, S>;

pub type RedirectClient<S> = Client<Redirect, S>;

/// Invocation-count increments give up after this many conflicting writes.
const MAX_INCREMENT_ATTEMPTS: usize = 3;

impl Queryable for ShortLink {
    const QUERY_LABEL: &'static str = labels::SHORTLINK;
}

impl Queryable for Redirect {
    const QUERY_LABEL: &'static str = labels::REDIRECT;
}

// === impl Client ===

impl<K, S: Clone> Clone for Client<K, S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            namespace: self.namespace.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K: Queryable, S: ObjectStore> Client<K, S> {
    pub fn new(store: S, namespace: Arc<dyn NamespaceResolver>) -> Self {
        Self {
            store,
            namespace,
            _kind: PhantomData,
        }
    }

    pub fn namespace(&self) -> &str {
        self.namespace.default_namespace()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn get(&self, name: &str) -> Result<K> {
        self.get_namespaced(self.namespace(), name).await
    }

    pub async fn get_namespaced(&self, namespace: &str, name: &str) -> Result<K> {
        self.store.get(namespace, name).await
    }

    pub async fn list(&self) -> Result<Vec<K>> {
        self.list_namespaced(self.namespace()).await
    }

    pub async fn list_namespaced(&self, namespace: &str) -> Result<Vec<K>> {
        self.store.list(namespace, None).await
    }

    /// Lists the objects in the default namespace whose query label equals
    /// `value`.
    pub async fn query(&self, value: &str) -> Result<Vec<K>> {
        let selector = Selector::from_iter(Some((K::QUERY_LABEL.to_string(), value.to_string())));
        self.store.list(self.namespace(), Some(&selector)).await
    }

    /// Creates `obj`, placing it in the default namespace if it names none.
    pub async fn create(&self, obj: &K) -> Result<K> {
        if obj.meta().namespace.is_some() {
            return self.store.create(obj).await;
        }
        let mut obj = obj.clone();
        obj.meta_mut().namespace = Some(self.namespace().to_string());
        self.store.create(&obj).await
    }

    /// Writes everything but status.
    pub async fn save(&self, obj: &K) -> Result<K> {
        self.store.update(obj).await
    }

    /// Writes only status.
    pub async fn save_status(&self, obj: &K) -> Result<K> {
        self.store.update_status(obj).await
    }

    pub async fn delete(&self, obj: &K) -> Result<()> {
        self.store.delete(obj).await
    }
}

impl<S: ObjectStore> Client<ShortLink, S> {
    /// Adds one to the ShortLink's invocation counter.
    ///
    /// The write is conditional on the version of `link`; when it loses a race
    /// the ShortLink is re-read and the increment retried, so concurrent hits
    /// are eventually counted rather than overwritten.
    pub async fn increment_invocation_count(&self, link: &ShortLink) -> Result<ShortLink> {
        let namespace = link.namespace().unwrap_or_else(|| self.namespace().to_string());
        let mut current = link.clone();
        let mut attempt = 1;
        loop {
            let mut next = current.clone();
            next.status.get_or_insert_with(ShortLinkStatus::default).count += 1;
            match self.save_status(&next).await {
                Err(error) if error.is_conflict() && attempt < MAX_INCREMENT_ATTEMPTS => {
                    debug!(%namespace, link = %link.name_any(), attempt, "Invocation count conflicted; retrying");
                    attempt += 1;
                    current = self.get_namespaced(&namespace, &link.name_any()).await?;
                }
                res => return res,
            }
        }
    }
}
