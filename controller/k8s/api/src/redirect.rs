use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status codes the ingress controller accepts for a permanent redirect.
pub const ALLOWED_CODES: [u16; 8] = [300, 301, 302, 303, 304, 305, 307, 308];

pub const DEFAULT_CODE: u16 = 308;

pub const DEFAULT_INGRESS_CLASS: &str = "nginx";

/// Redirects every request for one hostname to another, realised as a
/// generated Ingress owned by this resource.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "urlshortener.cedi.dev",
    version = "v1alpha1",
    kind = "Redirect",
    status = "RedirectStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Source","type":"string","jsonPath":".spec.source"}"#,
    printcolumn = r#"{"name":"Target","type":"string","jsonPath":".spec.target"}"#,
    printcolumn = r#"{"name":"Code","type":"integer","jsonPath":".spec.code"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RedirectSpec {
    /// The hostname requests are redirected from.
    pub source: String,

    /// The host requests are redirected to.
    pub target: String,

    #[serde(default = "default_code")]
    pub code: u16,

    #[serde(default)]
    pub tls: TlsSpec,

    #[serde(default = "default_ingress_class")]
    pub ingress_class_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct TlsSpec {
    #[serde(default)]
    pub enable: bool,

    /// Extra annotations placed on the generated Ingress when TLS is enabled,
    /// e.g. a cert-manager issuer.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedirectStatus {
    /// The redirect target last applied to the generated Ingress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Names of the Ingresses currently labeled for this Redirect.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingress_names: Vec<String>,
}

fn default_code() -> u16 {
    DEFAULT_CODE
}

fn default_ingress_class() -> String {
    DEFAULT_INGRESS_CLASS.to_string()
}

// === impl RedirectSpec ===

impl RedirectSpec {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            code: DEFAULT_CODE,
            tls: TlsSpec::default(),
            ingress_class_name: default_ingress_class(),
        }
    }

    /// The configured code if it is allow-listed, otherwise 308.
    pub fn effective_code(&self) -> u16 {
        if ALLOWED_CODES.contains(&self.code) {
            self.code
        } else {
            DEFAULT_CODE
        }
    }

    pub fn effective_ingress_class(&self) -> &str {
        if self.ingress_class_name.is_empty() {
            DEFAULT_INGRESS_CLASS
        } else {
            &self.ingress_class_name
        }
    }
}
