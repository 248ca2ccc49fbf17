use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use serde_json::json;
use urlshortener_core::{
    store::{self, Object, ObjectStore},
    Error, Result,
};
use urlshortener_k8s_api::{labels::Selector, Api, Client, ResourceExt};

/// An [`ObjectStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

// === impl KubeStore ===

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: Object>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<K> {
        self.api::<K>(namespace)
            .get(name)
            .await
            .map_err(|e| api_error::<K>(namespace, name, e))
    }

    async fn list<K: Object>(&self, namespace: &str, selector: Option<&Selector>) -> Result<Vec<K>> {
        let mut params = ListParams::default();
        if let Some(selector) = selector.filter(|s| !s.is_empty()) {
            params = params.labels(&selector.to_string());
        }
        let list = self
            .api::<K>(namespace)
            .list(&params)
            .await
            .map_err(Error::store)?;
        Ok(list.items)
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K> {
        let (namespace, name) = identity(obj);
        self.api::<K>(&namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| api_error::<K>(&namespace, &name, e))
    }

    async fn update<K: Object>(&self, obj: &K) -> Result<K> {
        let (namespace, name) = identity(obj);
        self.api::<K>(&namespace)
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| api_error::<K>(&namespace, &name, e))
    }

    /// Merge-patches the status subresource. The object's resource version is
    /// included in the patch so the API server rejects stale writes.
    async fn update_status<K: Object>(&self, obj: &K) -> Result<K> {
        let (namespace, name) = identity(obj);
        let status = serde_json::to_value(obj)
            .map_err(Error::store)?
            .get("status")
            .cloned()
            .unwrap_or_default();
        let patch = json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": status,
        });
        self.api::<K>(&namespace)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| api_error::<K>(&namespace, &name, e))
    }

    async fn delete<K: Object>(&self, obj: &K) -> Result<()> {
        let (namespace, name) = identity(obj);
        self.api::<K>(&namespace)
            .delete(&name, &DeleteParams::background())
            .await
            .map_err(|e| api_error::<K>(&namespace, &name, e))?;
        Ok(())
    }
}

fn identity<K: Object>(obj: &K) -> (String, String) {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

fn api_error<K: Object>(namespace: &str, name: &str, error: kube::Error) -> Error {
    match error {
        kube::Error::Api(ref response) if response.code == 404 => store::not_found::<K>(namespace, name),
        kube::Error::Api(ref response) if response.code == 409 => store::conflict::<K>(namespace, name),
        error => Error::store(error),
    }
}
