use crate::ReconcileMetrics;
use prometheus_client::{encoding::text::encode, registry::Registry};

mod shortlink;

fn metrics() -> (ReconcileMetrics, Registry) {
    let mut prom = Registry::default();
    let metrics = ReconcileMetrics::register(prom.sub_registry_with_prefix("urlshortener"));
    (metrics, prom)
}

fn render(prom: &Registry) -> String {
    let mut text = String::new();
    encode(&mut text, prom).unwrap();
    text
}
