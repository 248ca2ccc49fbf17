#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod ingress;
mod metrics;
mod redirect;
mod shortlink;

#[cfg(test)]
mod tests;

pub use self::{
    metrics::ReconcileMetrics, redirect::RedirectReconciler, shortlink::ShortLinkReconciler,
};
