use super::{metrics, render};
use crate::ShortLinkReconciler;
use urlshortener_core::{memory::MemoryStore, ObjectStore};
use urlshortener_k8s_api::{labels, ResourceExt, ShortLink, ShortLinkSpec, ShortLinkStatus};

const NS: &str = "links";

async fn create_link(store: &MemoryStore, name: &str, alias: Option<&str>) -> ShortLink {
    let mut spec = ShortLinkSpec::new("example.com/page");
    spec.alias = alias.map(Into::into);
    let mut link = ShortLink::new(name, spec);
    link.metadata.namespace = Some(NS.to_string());
    store.create(&link).await.unwrap()
}

#[tokio::test]
async fn alias_is_labeled_and_marked_ready_once() {
    let store = MemoryStore::default();
    let reconciler = ShortLinkReconciler::new(store.clone(), metrics().0);
    create_link(&store, "home", Some("start")).await;

    reconciler.reconcile(NS, "home").await.unwrap();

    let link = store.get::<ShortLink>(NS, "home").await.unwrap();
    assert_eq!(
        link.labels().get(labels::SHORTLINK).map(String::as_str),
        Some("start")
    );
    assert!(link.status.as_ref().unwrap().ready);
    assert_eq!(link.spec.alias.as_deref(), Some("start"));

    let writes = store.writes();
    reconciler.reconcile(NS, "home").await.unwrap();
    assert_eq!(store.writes(), writes);
}

#[tokio::test]
async fn changed_alias_is_relabeled() {
    let store = MemoryStore::default();
    let reconciler = ShortLinkReconciler::new(store.clone(), metrics().0);
    create_link(&store, "home", Some("start")).await;
    reconciler.reconcile(NS, "home").await.unwrap();

    let mut link = store.get::<ShortLink>(NS, "home").await.unwrap();
    link.spec.alias = Some("begin".to_string());
    store.update(&link).await.unwrap();
    reconciler.reconcile(NS, "home").await.unwrap();

    let link = store.get::<ShortLink>(NS, "home").await.unwrap();
    assert_eq!(
        link.labels().get(labels::SHORTLINK).map(String::as_str),
        Some("begin")
    );
}

#[tokio::test]
async fn without_alias_only_ready_is_set() {
    let store = MemoryStore::default();
    let reconciler = ShortLinkReconciler::new(store.clone(), metrics().0);
    create_link(&store, "home", None).await;

    reconciler.reconcile(NS, "home").await.unwrap();

    let link = store.get::<ShortLink>(NS, "home").await.unwrap();
    assert!(link.labels().get(labels::SHORTLINK).is_none());
    assert!(link.status.unwrap().ready);
}

#[tokio::test]
async fn ready_write_keeps_invocation_count() {
    let store = MemoryStore::default();
    let reconciler = ShortLinkReconciler::new(store.clone(), metrics().0);
    let mut link = create_link(&store, "home", None).await;
    link.status = Some(ShortLinkStatus {
        count: 5,
        ..Default::default()
    });
    store.update_status(&link).await.unwrap();

    reconciler.reconcile(NS, "home").await.unwrap();

    let link = store.get::<ShortLink>(NS, "home").await.unwrap();
    assert_eq!(link.count(), 5);
    assert!(link.status.unwrap().ready);
}

#[tokio::test]
async fn publishes_metrics() {
    let store = MemoryStore::default();
    let (metrics, prom) = metrics();
    let reconciler = ShortLinkReconciler::new(store.clone(), metrics);
    let mut home = create_link(&store, "home", None).await;
    create_link(&store, "docs", None).await;
    home.status = Some(ShortLinkStatus {
        count: 3,
        ..Default::default()
    });
    let home = store.update_status(&home).await.unwrap();

    reconciler.reconcile(NS, "home").await.unwrap();

    let text = render(&prom);
    assert!(
        text.contains(r#"urlshortener_active{type="shortlink"} 2"#),
        "{text}"
    );
    assert!(
        text.contains(r#"urlshortener_shortlink_invocation{name="home",namespace="links"} 3"#),
        "{text}"
    );
    assert!(
        text.contains(r#"urlshortener_shortlink_invocation{name="docs",namespace="links"} 0"#),
        "{text}"
    );

    store.delete(&home).await.unwrap();
    reconciler.reconcile(NS, "home").await.unwrap();
    let text = render(&prom);
    assert!(
        !text.contains(r#"urlshortener_shortlink_invocation{name="home""#),
        "{text}"
    );
    assert!(
        text.contains(r#"urlshortener_active{type="shortlink"} 1"#),
        "{text}"
    );
}

#[tokio::test]
async fn missing_shortlink_is_a_no_op() {
    let store = MemoryStore::default();
    let reconciler = ShortLinkReconciler::new(store.clone(), metrics().0);
    reconciler.reconcile(NS, "gone").await.unwrap();
    assert_eq!(store.writes(), 0);
    assert_eq!(store.len::<ShortLink>(), 0);
}
