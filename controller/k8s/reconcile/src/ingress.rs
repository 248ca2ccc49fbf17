use std::collections::BTreeMap;
use urlshortener_k8s_api::{
    labels, HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ObjectMeta, Redirect, ResourceExt,
    ServiceBackendPort,
};

pub const REWRITE_TARGET: &str = "nginx.ingress.kubernetes.io/rewrite-target";
pub const PERMANENT_REDIRECT: &str = "nginx.ingress.kubernetes.io/permanent-redirect";
pub const PERMANENT_REDIRECT_CODE: &str = "nginx.ingress.kubernetes.io/permanent-redirect-code";

/// Every generated rule routes to this service; the ingress controller answers
/// with the redirect before the backend is ever reached.
pub const BACKEND_SERVICE: &str = "http-svc";
pub const BACKEND_PORT: i32 = 80;

/// Computes the Ingress that realises `redirect`.
///
/// The result depends only on the Redirect's identity and spec. From
/// `existing` only the bookkeeping the API server owns (resource version,
/// uid, owner references, status) is carried over, so synthesizing again from
/// a previous result yields the same object.
pub fn synthesize(existing: Option<&Ingress>, redirect: &Redirect) -> Ingress {
    let name = redirect.name_any();
    let spec = &redirect.spec;

    let mut annotations = BTreeMap::new();
    annotations.insert(REWRITE_TARGET.to_string(), "/".to_string());
    annotations.insert(PERMANENT_REDIRECT.to_string(), redirect_target(redirect));
    annotations.insert(
        PERMANENT_REDIRECT_CODE.to_string(),
        spec.effective_code().to_string(),
    );
    if spec.tls.enable {
        annotations.extend(spec.tls.annotations.clone());
    }

    let tls = spec.tls.enable.then(|| {
        vec![IngressTLS {
            hosts: Some(vec![spec.source.clone()]),
            secret_name: Some(tls_secret_name(&spec.source)),
        }]
    });

    let previous = existing.map(|i| &i.metadata);
    Ingress {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: redirect.namespace(),
            labels: Some(labels::for_redirect(&name)),
            annotations: Some(annotations),
            resource_version: previous.and_then(|m| m.resource_version.clone()),
            uid: previous.and_then(|m| m.uid.clone()),
            owner_references: previous.and_then(|m| m.owner_references.clone()),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: Some(spec.effective_ingress_class().to_string()),
            rules: Some(vec![IngressRule {
                host: Some(spec.source.clone()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: BACKEND_SERVICE.to_string(),
                                port: Some(ServiceBackendPort {
                                    number: Some(BACKEND_PORT),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            tls,
            ..Default::default()
        }),
        status: existing.and_then(|i| i.status.clone()),
    }
}

/// The value of the permanent-redirect annotation: the target host with the
/// original request URI appended.
pub fn redirect_target(redirect: &Redirect) -> String {
    format!("http://{}$request_uri", redirect.spec.target)
}

pub fn tls_secret_name(source: &str) -> String {
    format!("{}-redirect-secret", source.replace('.', "-"))
}

/// Projects ingresses onto their names, preserving order.
pub fn ingress_names(ingresses: &[Ingress]) -> Vec<String> {
    ingresses.iter().map(ResourceExt::name_any).collect()
}

/// Returns true if writing `desired` over `actual` would change anything the
/// synthesizer controls.
pub(crate) fn differs(actual: &Ingress, desired: &Ingress) -> bool {
    actual.spec != desired.spec
        || actual.metadata.labels != desired.metadata.labels
        || actual.metadata.annotations != desired.metadata.annotations
        || actual.metadata.owner_references != desired.metadata.owner_references
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;
    use urlshortener_k8s_api::{RedirectSpec, TlsSpec};

    fn redirect(spec: RedirectSpec) -> Redirect {
        let mut redirect = Redirect::new("old-site", spec);
        redirect.metadata.namespace = Some("web".to_string());
        redirect
    }

    fn annotation<'i>(ingress: &'i Ingress, key: &str) -> Option<&'i str> {
        ingress
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    #[test]
    fn plain_redirect() {
        let redirect = redirect(RedirectSpec::new("old.example.com", "new.example.com"));
        let ingress = synthesize(None, &redirect);

        assert_eq!(ingress.metadata.name.as_deref(), Some("old-site"));
        assert_eq!(ingress.metadata.namespace.as_deref(), Some("web"));
        assert_eq!(
            ingress.metadata.labels,
            Some(btreemap! {
                "app".to_string() => "urlshortener".to_string(),
                "redirect".to_string() => "old-site".to_string(),
            })
        );
        assert_eq!(
            annotation(&ingress, PERMANENT_REDIRECT),
            Some("http://new.example.com$request_uri")
        );
        assert_eq!(annotation(&ingress, PERMANENT_REDIRECT_CODE), Some("308"));
        assert_eq!(annotation(&ingress, REWRITE_TARGET), Some("/"));

        let spec = ingress.spec.unwrap();
        assert_eq!(spec.ingress_class_name.as_deref(), Some("nginx"));
        assert_eq!(spec.tls, None);
        let rules = spec.rules.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].host.as_deref(), Some("old.example.com"));
        let paths = &rules[0].http.as_ref().unwrap().paths;
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].path.as_deref(), Some("/"));
        assert_eq!(paths[0].path_type, "Prefix");
        let service = paths[0].backend.service.as_ref().unwrap();
        assert_eq!(service.name, "http-svc");
        assert_eq!(service.port.as_ref().unwrap().number, Some(80));
    }

    #[test]
    fn tls_toggle() {
        let mut spec = RedirectSpec::new("old.example.com", "new.example.com");
        spec.tls = TlsSpec {
            enable: true,
            annotations: btreemap! {
                "cert-manager.io/cluster-issuer".to_string() => "letsencrypt".to_string(),
            },
        };
        let enabled = synthesize(None, &redirect(spec.clone()));
        assert_eq!(
            enabled.spec.as_ref().unwrap().tls,
            Some(vec![IngressTLS {
                hosts: Some(vec!["old.example.com".to_string()]),
                secret_name: Some("old-example-com-redirect-secret".to_string()),
            }])
        );
        assert_eq!(
            annotation(&enabled, "cert-manager.io/cluster-issuer"),
            Some("letsencrypt")
        );

        spec.tls.enable = false;
        let disabled = synthesize(Some(&enabled), &redirect(spec));
        assert_eq!(disabled.spec.as_ref().unwrap().tls, None);
        assert_eq!(annotation(&disabled, "cert-manager.io/cluster-issuer"), None);
    }

    #[test]
    fn tls_annotations_override_generated_ones() {
        let mut spec = RedirectSpec::new("old.example.com", "new.example.com");
        spec.tls.enable = true;
        spec.tls.annotations = btreemap! {
            REWRITE_TARGET.to_string() => "/landing".to_string(),
        };
        let ingress = synthesize(None, &redirect(spec));
        assert_eq!(annotation(&ingress, REWRITE_TARGET), Some("/landing"));
    }

    #[test]
    fn disallowed_code_falls_back() {
        let mut spec = RedirectSpec::new("old.example.com", "new.example.com");
        spec.code = 200;
        let ingress = synthesize(None, &redirect(spec));
        assert_eq!(annotation(&ingress, PERMANENT_REDIRECT_CODE), Some("308"));

        let mut spec = RedirectSpec::new("old.example.com", "new.example.com");
        spec.code = 302;
        let ingress = synthesize(None, &redirect(spec));
        assert_eq!(annotation(&ingress, PERMANENT_REDIRECT_CODE), Some("302"));
    }

    #[test]
    fn synthesis_is_idempotent() {
        for tls in [false, true] {
            let mut spec = RedirectSpec::new("old.example.com", "new.example.com");
            spec.tls.enable = tls;
            let redirect = redirect(spec);
            let first = synthesize(None, &redirect);
            let second = synthesize(Some(&first), &redirect);
            assert_eq!(first, second);
            assert!(!differs(&first, &second));
        }
    }

    #[test]
    fn carries_server_bookkeeping() {
        let redirect = redirect(RedirectSpec::new("old.example.com", "new.example.com"));
        let mut existing = synthesize(None, &redirect);
        existing.metadata.resource_version = Some("7".to_string());
        existing.metadata.uid = Some("uid-7".to_string());
        existing.metadata.annotations = Some(btreemap! {
            "stale".to_string() => "value".to_string(),
        });

        let desired = synthesize(Some(&existing), &redirect);
        assert_eq!(desired.metadata.resource_version.as_deref(), Some("7"));
        assert_eq!(desired.metadata.uid.as_deref(), Some("uid-7"));
        assert_eq!(annotation(&desired, "stale"), None);
        assert!(differs(&existing, &desired));
    }

    #[test]
    fn names_preserve_order() {
        assert!(ingress_names(&[]).is_empty());

        let named = |name: &str| Ingress {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(ingress_names(&[named("b"), named("a")]), ["b", "a"]);
    }
}
