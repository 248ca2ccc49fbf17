use crate::{ingress, ReconcileMetrics};
use std::time::Instant;
use tracing::{debug, info};
use urlshortener_core::{set_controller_reference, ObjectStore, Result};
use urlshortener_k8s_api::{labels, Ingress, Redirect, RedirectStatus, Selector};

/// Converges a Redirect's generated Ingress and its status.
#[derive(Clone, Debug)]
pub struct RedirectReconciler<S> {
    store: S,
    metrics: ReconcileMetrics,
}

// === impl RedirectReconciler ===

impl<S: ObjectStore> RedirectReconciler<S> {
    pub fn new(store: S, metrics: ReconcileMetrics) -> Self {
        Self { store, metrics }
    }

    /// Runs a single reconciliation pass for the named Redirect.
    ///
    /// A Redirect that no longer exists is not an error: its Ingress is
    /// removed by the store's owner-reference cascade. If the Ingress cannot
    /// be written, the pass fails before status is touched.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<()> {
        let start = Instant::now();
        let res = self.reconcile_inner(namespace, name).await;
        self.metrics
            .observe_duration("redirect", namespace, name, start.elapsed());
        res
    }

    async fn reconcile_inner(&self, namespace: &str, name: &str) -> Result<()> {
        let redirect = match self.store.get::<Redirect>(namespace, name).await {
            Ok(redirect) => redirect,
            Err(error) if error.is_not_found() => {
                debug!("Redirect deleted");
                return Ok(());
            }
            Err(error) => return Err(error),
        };

        let ingress = self.upsert_ingress(&redirect).await?;

        let selector = Selector::from(labels::for_redirect(name));
        let ingresses = self
            .store
            .list::<Ingress>(namespace, Some(&selector))
            .await?;
        let mut ingress_names = ingress::ingress_names(&ingresses);
        ingress_names.sort();

        let status = RedirectStatus {
            target: ingress
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(ingress::PERMANENT_REDIRECT))
                .cloned(),
            ingress_names,
        };
        if redirect.status.as_ref() == Some(&status) {
            debug!("Status is current");
            return Ok(());
        }

        let ingresses = status.ingress_names.len();
        let mut next = redirect;
        next.status = Some(status);
        self.store.update_status(&next).await?;
        info!(ingresses, "Updated Redirect status");
        Ok(())
    }

    async fn upsert_ingress(&self, redirect: &Redirect) -> Result<Ingress> {
        let namespace = redirect.metadata.namespace.as_deref().unwrap_or_default();
        let name = redirect.metadata.name.as_deref().unwrap_or_default();
        let existing = match self.store.get::<Ingress>(namespace, name).await {
            Ok(ingress) => Some(ingress),
            Err(error) if error.is_not_found() => None,
            Err(error) => return Err(error),
        };

        let mut desired = ingress::synthesize(existing.as_ref(), redirect);
        set_controller_reference(redirect, &mut desired.metadata)?;

        match existing {
            None => {
                let created = self.store.create(&desired).await?;
                info!("Created Ingress");
                Ok(created)
            }
            Some(existing) if ingress::differs(&existing, &desired) => {
                let updated = self.store.update(&desired).await?;
                info!("Updated Ingress");
                Ok(updated)
            }
            Some(existing) => {
                debug!("Ingress is current");
                Ok(existing)
            }
        }
    }
}
