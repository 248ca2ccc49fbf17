use crate::ReconcileMetrics;
use std::time::Instant;
use tracing::{debug, info};
use urlshortener_core::{ObjectStore, Result};
use urlshortener_k8s_api::{labels, ResourceExt, ShortLink, ShortLinkStatus};

/// Publishes ShortLink metrics and keeps the alias label in step with the
/// spec.
#[derive(Clone, Debug)]
pub struct ShortLinkReconciler<S> {
    store: S,
    metrics: ReconcileMetrics,
}

// === impl ShortLinkReconciler ===

impl<S: ObjectStore> ShortLinkReconciler<S> {
    pub fn new(store: S, metrics: ReconcileMetrics) -> Self {
        Self { store, metrics }
    }

    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<()> {
        let start = Instant::now();
        let res = self.reconcile_inner(namespace, name).await;
        self.metrics
            .observe_duration("shortlink", namespace, name, start.elapsed());
        res
    }

    async fn reconcile_inner(&self, namespace: &str, name: &str) -> Result<()> {
        let link = match self.store.get::<ShortLink>(namespace, name).await {
            Ok(link) => link,
            Err(error) if error.is_not_found() => {
                debug!("ShortLink deleted");
                self.metrics.remove_invocations(namespace, name);
                return self.publish(namespace).await;
            }
            Err(error) => return Err(error),
        };

        self.publish(namespace).await?;
        self.normalize(link).await
    }

    /// Sets the active count and per-link invocation gauges from a fresh
    /// listing of the namespace.
    async fn publish(&self, namespace: &str) -> Result<()> {
        let links = self.store.list::<ShortLink>(namespace, None).await?;
        self.metrics.set_active_shortlinks(links.len());
        for l in &links {
            self.metrics
                .set_invocations(namespace, &l.name_any(), l.count());
        }
        Ok(())
    }

    /// Mirrors `spec.alias` into the `shortlink` label, then marks the
    /// ShortLink ready. Writes nothing once both hold.
    async fn normalize(&self, mut link: ShortLink) -> Result<()> {
        if let Some(alias) = link.spec.alias.clone().filter(|a| !a.is_empty()) {
            if link.labels().get(labels::SHORTLINK) != Some(&alias) {
                link.labels_mut()
                    .insert(labels::SHORTLINK.to_string(), alias.clone());
                link = self.store.update(&link).await?;
                info!(%alias, "Labeled ShortLink");
            }
        }

        if link.status.as_ref().map_or(false, |s| s.ready) {
            return Ok(());
        }
        link.status.get_or_insert_with(ShortLinkStatus::default).ready = true;
        self.store.update_status(&link).await?;
        info!("ShortLink ready");
        Ok(())
    }
}
