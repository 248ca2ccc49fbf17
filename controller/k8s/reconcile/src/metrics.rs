use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{
        family::Family,
        gauge::Gauge,
        histogram::{exponential_buckets, Histogram},
    },
    registry::{Registry, Unit},
};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ReconcileMetrics {
    duration: Family<ReconcileLabels, Histogram, fn() -> Histogram>,
    active: Family<ActiveLabels, Gauge>,
    invocations: Family<ObjectLabels, Gauge>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ReconcileLabels {
    reconciler: &'static str,
    name: String,
    namespace: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ActiveLabels {
    r#type: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ObjectLabels {
    name: String,
    namespace: String,
}

// === impl ReconcileMetrics ===

impl ReconcileMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let duration = Family::<_, _, fn() -> Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.001, 2.0, 14))
        });
        prom.register_with_unit(
            "reconciler_duration",
            "Time spent in a single reconciliation pass",
            Unit::Seconds,
            duration.clone(),
        );

        let active = Family::default();
        prom.register(
            "active",
            "Number of active resources by type",
            active.clone(),
        );

        let invocations = Family::default();
        prom.register(
            "shortlink_invocation",
            "Number of times a ShortLink has been invoked",
            invocations.clone(),
        );

        Self {
            duration,
            active,
            invocations,
        }
    }

    pub(crate) fn observe_duration(
        &self,
        reconciler: &'static str,
        namespace: &str,
        name: &str,
        elapsed: Duration,
    ) {
        self.duration
            .get_or_create(&ReconcileLabels {
                reconciler,
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
            .observe(elapsed.as_secs_f64());
    }

    pub(crate) fn set_active_shortlinks(&self, count: usize) {
        self.active
            .get_or_create(&ActiveLabels { r#type: "shortlink" })
            .set(count as i64);
    }

    pub(crate) fn set_invocations(&self, namespace: &str, name: &str, count: i64) {
        self.invocations
            .get_or_create(&ObjectLabels {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
            .set(count);
    }

    pub(crate) fn remove_invocations(&self, namespace: &str, name: &str) {
        self.invocations.remove(&ObjectLabels {
            name: name.to_string(),
            namespace: namespace.to_string(),
        });
    }
}
