use futures::prelude::*;
use kube::runtime::{
    controller::{self, Action},
    reflector::ObjectRef,
    watcher, Controller,
};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::{debug, info, info_span, warn, Instrument};
use urlshortener_core::{Error, ObjectStore};
use urlshortener_k8s_api::{Api, Client, Ingress, Redirect, Resource, ResourceExt, ShortLink};
use urlshortener_k8s_reconcile::{RedirectReconciler, ShortLinkReconciler};

const BACKOFF_MIN: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(5 * 60);

/// A single reconciliation pass for the object named by namespace and name.
#[async_trait::async_trait]
trait Reconcile: Send + Sync + 'static {
    const NAME: &'static str;

    async fn reconcile(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

type ControllerError = controller::Error<Error, watcher::Error>;

struct Context<R> {
    reconciler: R,
    resync: Duration,
    backoff: Backoff,
}

/// Tracks the retry delay of each object whose last pass failed.
#[derive(Debug, Default)]
struct Backoff(Mutex<HashMap<(String, String), Duration>>);

/// Drives the Redirect reconciler from watches on Redirects and the Ingresses
/// they own, until `drain` is signaled.
pub async fn redirects<S: ObjectStore>(
    client: Client,
    reconciler: RedirectReconciler<S>,
    resync: Duration,
    drain: drain::Watch,
) {
    let ctx = Arc::new(Context::new(reconciler, resync));
    let controller = Controller::new(Api::<Redirect>::all(client.clone()), watcher::Config::default())
        .owns(Api::<Ingress>::all(client), watcher::Config::default())
        .run(
            reconcile::<Redirect, _>,
            error_policy::<Redirect, _>,
            ctx.clone(),
        )
        .for_each(move |res| future::ready(ctx.observe(res)));
    run(controller, drain).await
}

/// Drives the ShortLink reconciler until `drain` is signaled.
pub async fn shortlinks<S: ObjectStore>(
    client: Client,
    reconciler: ShortLinkReconciler<S>,
    resync: Duration,
    drain: drain::Watch,
) {
    let ctx = Arc::new(Context::new(reconciler, resync));
    let controller = Controller::new(Api::<ShortLink>::all(client), watcher::Config::default())
        .run(
            reconcile::<ShortLink, _>,
            error_policy::<ShortLink, _>,
            ctx.clone(),
        )
        .for_each(move |res| future::ready(ctx.observe(res)));
    run(controller, drain).await
}

async fn run(controller: impl Future<Output = ()>, drain: drain::Watch) {
    tokio::select! {
        _ = controller => warn!("Controller stream ended"),
        release = drain.signaled() => {
            drop(release);
            info!("Controller shutting down");
        }
    }
}

async fn reconcile<K, R>(obj: Arc<K>, ctx: Arc<Context<R>>) -> Result<Action, Error>
where
    K: Resource,
    R: Reconcile,
{
    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();
    ctx.reconciler
        .reconcile(&namespace, &name)
        .instrument(info_span!("reconcile", reconciler = R::NAME, %namespace, %name))
        .await?;
    ctx.backoff.reset(&namespace, &name);
    Ok(Action::requeue(ctx.resync))
}

fn error_policy<K, R>(obj: Arc<K>, error: &Error, ctx: Arc<Context<R>>) -> Action
where
    K: Resource,
    R: Reconcile,
{
    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();
    let delay = ctx.backoff.next(&namespace, &name);
    warn!(reconciler = R::NAME, %namespace, %name, %error, ?delay, "Reconciliation failed");
    Action::requeue(delay)
}

// === impl Context ===

impl<R> Context<R> {
    fn new(reconciler: R, resync: Duration) -> Self {
        Self {
            reconciler,
            resync,
            backoff: Backoff::default(),
        }
    }

    /// Logs a controller result. A requeued object that no longer exists
    /// loses its retry delay.
    fn observe<K>(&self, res: Result<(ObjectRef<K>, Action), ControllerError>)
    where
        K: Resource<DynamicType = ()>,
    {
        match res {
            Ok((obj, _)) => debug!(%obj, "Reconciled"),
            Err(controller::Error::ObjectNotFound(obj)) => {
                self.backoff
                    .reset(obj.namespace.as_deref().unwrap_or_default(), &obj.name);
                debug!(%obj, "Object deleted");
            }
            Err(error) => debug!(%error, "Controller error"),
        }
    }
}

#[async_trait::async_trait]
impl<S: ObjectStore> Reconcile for RedirectReconciler<S> {
    const NAME: &'static str = "redirect";

    async fn reconcile(&self, namespace: &str, name: &str) -> Result<(), Error> {
        RedirectReconciler::reconcile(self, namespace, name).await
    }
}

#[async_trait::async_trait]
impl<S: ObjectStore> Reconcile for ShortLinkReconciler<S> {
    const NAME: &'static str = "shortlink";

    async fn reconcile(&self, namespace: &str, name: &str) -> Result<(), Error> {
        ShortLinkReconciler::reconcile(self, namespace, name).await
    }
}

// === impl Backoff ===

impl Backoff {
    /// Returns the delay before retrying the object, doubling it for the
    /// following failure.
    fn next(&self, namespace: &str, name: &str) -> Duration {
        let mut delays = self.0.lock();
        let delay = delays
            .entry((namespace.to_string(), name.to_string()))
            .and_modify(|d| *d = (*d * 2).min(BACKOFF_MAX))
            .or_insert(BACKOFF_MIN);
        *delay
    }

    fn reset(&self, namespace: &str, name: &str) {
        self.0
            .lock()
            .remove(&(namespace.to_string(), name.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let backoff = Backoff::default();
        let delays = (0..12)
            .map(|_| backoff.next("links", "home").as_secs())
            .collect::<Vec<_>>();
        assert_eq!(
            delays,
            [1, 2, 4, 8, 16, 32, 64, 128, 256, 300, 300, 300]
        );
    }

    #[test]
    fn backoff_is_per_object_and_resets() {
        let backoff = Backoff::default();
        backoff.next("links", "home");
        backoff.next("links", "home");
        assert_eq!(backoff.next("links", "docs"), BACKOFF_MIN);
        assert_eq!(backoff.next("other", "home"), BACKOFF_MIN);

        backoff.reset("links", "home");
        assert_eq!(backoff.next("links", "home"), BACKOFF_MIN);
    }

    #[test]
    fn deleted_object_drops_backoff() {
        let ctx = Context::new((), Duration::from_secs(300));
        ctx.backoff.next("links", "home");
        ctx.backoff.next("links", "docs");

        let gone = ObjectRef::<ShortLink>::new("home").within("links").erase();
        ctx.observe::<ShortLink>(Err(controller::Error::ObjectNotFound(gone)));

        let delays = ctx.backoff.0.lock();
        assert!(!delays.contains_key(&("links".to_string(), "home".to_string())));
        assert!(delays.contains_key(&("links".to_string(), "docs".to_string())));
    }
}
