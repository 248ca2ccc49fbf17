#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;
pub mod redirect;
pub mod shortlink;

pub use self::{
    labels::Selector,
    redirect::{Redirect, RedirectSpec, RedirectStatus, TlsSpec},
    shortlink::{ShortLink, ShortLinkSpec, ShortLinkStatus},
};
pub use k8s_openapi::{
    api::networking::v1::{
        HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
        IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
    },
    NamespaceResourceScope,
};
pub use kube::{
    api::{Api, ObjectMeta, Resource, ResourceExt},
    Client,
};

/// The API group shared by both custom resources.
pub const API_GROUP: &str = "urlshortener.cedi.dev";

/// The value of the `app` label on every object this controller generates.
pub const APP_LABEL_VALUE: &str = "urlshortener";
