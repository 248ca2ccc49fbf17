use crate::{controller, github::GitHub, http, store::KubeStore};
use anyhow::{bail, Context, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing::{info, info_span, Instrument};
use urlshortener_core::{ShortlinkClient, ShortlinkClientAuth, StaticNamespace};
use urlshortener_k8s_api::{Client, Redirect, Resource, ShortLink};
use urlshortener_k8s_reconcile::{ReconcileMetrics, RedirectReconciler, ShortLinkReconciler};

const SERVICE_ACCOUNT_NAMESPACE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

#[derive(Debug, Parser)]
#[clap(name = "urlshortener", about = "A ShortLink and Redirect controller")]
pub struct Args {
    #[clap(long, default_value = "urlshortener=info,warn", env = "URLSHORTENER_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The address on which redirects and the ShortLink API are served.
    #[clap(long, default_value = "0.0.0.0:8443")]
    bind_addr: SocketAddr,

    /// The namespace ShortLinks are resolved in. Defaults to the pod's own
    /// namespace.
    #[clap(long, env = "POD_NAMESPACE")]
    namespace: Option<String>,

    #[clap(long, default_value = "300")]
    resync_period_secs: u64,

    #[clap(long, default_value = "5000")]
    request_timeout_ms: u64,

    #[clap(long, default_value = "https://api.github.com")]
    github_api_url: String,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            bind_addr,
            namespace,
            resync_period_secs,
            request_timeout_ms,
            github_api_url,
        } = self;

        let namespace = match namespace {
            Some(ns) => ns,
            None => service_account_namespace().await?,
        };
        let resync = Duration::from_secs(resync_period_secs);

        let mut prom = <Registry>::default();
        let metrics = ReconcileMetrics::register(prom.sub_registry_with_prefix("urlshortener"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let client = runtime.client();
        for (kind, exists) in [
            ("shortlinks", api_resource_exists::<ShortLink>(&client).await),
            ("redirects", api_resource_exists::<Redirect>(&client).await),
        ] {
            if !exists {
                tracing::warn!("{kind}.{} resource kind not found", urlshortener_k8s_api::API_GROUP);
            }
        }

        let store = KubeStore::new(client.clone());
        info!(%namespace, "Resolving ShortLinks");
        let shortlinks = ShortlinkClient::new(store.clone(), Arc::new(StaticNamespace::new(namespace)));
        let github = GitHub::new(&github_api_url)?;
        let frontend = http::Frontend::new(
            ShortlinkClientAuth::new(shortlinks),
            Arc::new(github),
            Duration::from_millis(request_timeout_ms),
        );

        tokio::spawn(
            http::serve(bind_addr, frontend, runtime.shutdown_handle())
                .instrument(info_span!("http", port = %bind_addr.port())),
        );

        tokio::spawn(
            controller::redirects(
                client.clone(),
                RedirectReconciler::new(store.clone(), metrics.clone()),
                resync,
                runtime.shutdown_handle(),
            )
            .instrument(info_span!("redirects")),
        );

        tokio::spawn(
            controller::shortlinks(
                client,
                ShortLinkReconciler::new(store, metrics),
                resync,
                runtime.shutdown_handle(),
            )
            .instrument(info_span!("shortlinks")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

async fn service_account_namespace() -> Result<String> {
    let ns = tokio::fs::read_to_string(SERVICE_ACCOUNT_NAMESPACE)
        .await
        .with_context(|| format!("--namespace not set and {SERVICE_ACCOUNT_NAMESPACE} unreadable"))?;
    let ns = ns.trim();
    if ns.is_empty() {
        bail!("{SERVICE_ACCOUNT_NAMESPACE} is empty");
    }
    Ok(ns.to_string())
}

async fn api_resource_exists<T>(client: &Client) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    client
        .list_api_group_resources(&T::api_version(&dt))
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == T::kind(&dt))
}
