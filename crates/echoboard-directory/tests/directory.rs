//! End-to-end directory behavior over the in-memory backend: atomic
//! creation, slug uniqueness, optimistic concurrency, the slug migration
//! protocol with rollback and grace, cache coherence, and batch resilience.
use echoboard_directory::cache::DirectoryCaches;
use echoboard_directory::codec;
use echoboard_directory::config::DirectoryConfig;
use echoboard_directory::error::StoreError;
use echoboard_directory::model::{
    ProjectConfig, ResourceType, VersionedConfig, WebhookListener,
};
use echoboard_directory::store::{KvProjectStore, ProjectStore};
use echoboard_kv::{AttrValue, Key, KeyValueBackend, MemoryKv, Precondition};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

fn backend() -> Arc<MemoryKv> {
    Arc::new(MemoryKv::new(codec::TABLE_SCHEMAS))
}

fn store(backend: &Arc<MemoryKv>) -> KvProjectStore {
    let config = DirectoryConfig::default();
    let caches = Arc::new(DirectoryCaches::new(&config));
    KvProjectStore::new(backend.clone(), caches, config)
}

fn config_blob(slug: &str, domain: Option<&str>, name: Option<&str>) -> ProjectConfig {
    serde_json::from_value(serde_json::json!({
        "schemaVersion": 2,
        "slug": slug,
        "domain": domain,
        "name": name,
    }))
    .expect("config")
}

fn versioned(version: &str, slug: &str, domain: Option<&str>) -> VersionedConfig {
    VersionedConfig {
        version: version.to_string(),
        config: config_blob(slug, domain, None),
    }
}

fn epoch_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_secs() as i64
}

#[tokio::test]
async fn create_then_resolve_by_subdomain_domain_and_id() {
    let backend = backend();
    let store = store(&backend);
    store
        .create_project("acct-1", "p1", versioned("v1", "acme", Some("feedback.acme.com")))
        .await
        .expect("create");

    let by_subdomain = store
        .project_by_slug("acme", true)
        .await
        .expect("resolve")
        .expect("present");
    assert_eq!(by_subdomain.project_id(), "p1");
    assert_eq!(by_subdomain.account_id(), "acct-1");

    let by_domain = store
        .project_by_slug("feedback.acme.com", true)
        .await
        .expect("resolve")
        .expect("present");
    assert_eq!(by_domain.project_id(), "p1");

    let by_id = store.project("p1", false).await.expect("get").expect("present");
    assert_eq!(by_id.version(), "v1");

    assert!(store.project_by_slug("nope", true).await.expect("miss").is_none());
}

#[tokio::test]
async fn racing_creates_on_one_subdomain_admit_at_most_one_winner() {
    let backend = backend();
    let store = store(&backend);
    let (first, second) = tokio::join!(
        store.create_project("acct-1", "p1", versioned("v1", "acme", None)),
        store.create_project("acct-2", "p2", versioned("v1", "acme", None)),
    );
    let winners = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    let loser = if first.is_err() { first } else { second };
    assert!(matches!(loser.expect_err("conflict"), StoreError::Conflict(_)));
}

#[tokio::test]
async fn failed_create_leaves_no_partial_artifacts() {
    let backend = backend();
    let store = store(&backend);
    store
        .create_project("acct-1", "p1", versioned("v1", "acme", Some("feedback.acme.com")))
        .await
        .expect("first create");

    // Different subdomain, same custom domain: the whole transaction fails.
    let err = store
        .create_project("acct-2", "p2", versioned("v1", "other", Some("feedback.acme.com")))
        .await
        .expect_err("domain taken");
    assert!(matches!(err, StoreError::Conflict(_)));

    // Neither the project record nor the subdomain slug exists.
    assert!(
        backend
            .get(codec::PROJECT_TABLE, &Key::hash("p2"), true)
            .await
            .expect("get")
            .is_none()
    );
    assert!(
        backend
            .get(codec::SLUG_TABLE, &Key::hash("other"), true)
            .await
            .expect("get")
            .is_none()
    );
}

#[tokio::test]
async fn config_update_is_version_gated() {
    let backend = backend();
    let store = store(&backend);
    store
        .create_project("acct-1", "p1", versioned("v1", "acme", None))
        .await
        .expect("create");

    let stale = store
        .update_config("p1", Some("not-v1"), versioned("v2", "acme", None))
        .await
        .expect_err("stale version");
    assert!(matches!(stale, StoreError::Conflict(_)));

    store
        .update_config("p1", Some("v1"), versioned("v2", "acme", None))
        .await
        .expect("matching version");
    let project = store.project("p1", false).await.expect("get").expect("present");
    assert_eq!(project.version(), "v2");

    // The old token is now stale for everyone.
    let replayed = store
        .update_config("p1", Some("v1"), versioned("v3", "acme", None))
        .await
        .expect_err("replayed stale version");
    assert!(matches!(replayed, StoreError::Conflict(_)));
}

#[tokio::test]
async fn rename_keeps_old_slug_resolving_through_grace() {
    let backend = backend();
    let store = store(&backend);
    store
        .create_project("acct-1", "p1", versioned("v1", "acme", None))
        .await
        .expect("create");
    store
        .update_config("p1", Some("v1"), versioned("v2", "acme2", None))
        .await
        .expect("rename");

    let via_new = store
        .project_by_slug("acme2", true)
        .await
        .expect("resolve")
        .expect("present");
    let via_old = store
        .project_by_slug("acme", true)
        .await
        .expect("resolve")
        .expect("still resolving");
    assert_eq!(via_new.project_id(), "p1");
    assert_eq!(via_old.project_id(), "p1");

    // The old mapping is marked for reclamation one grace period out; the
    // new one carries no expiry.
    let old_item = backend
        .get(codec::SLUG_TABLE, &Key::hash("acme"), true)
        .await
        .expect("get")
        .expect("present");
    let expires_at = old_item
        .get(codec::ATTR_EXPIRES_AT)
        .and_then(AttrValue::as_n)
        .expect("grace expiry");
    let grace = DirectoryConfig::default().slug_expire_after_migration.as_secs() as i64;
    assert!(expires_at > epoch_now());
    assert!(expires_at <= epoch_now() + grace);

    let new_item = backend
        .get(codec::SLUG_TABLE, &Key::hash("acme2"), true)
        .await
        .expect("get")
        .expect("present");
    assert!(new_item.get(codec::ATTR_EXPIRES_AT).is_none());
}

#[tokio::test]
async fn failed_project_write_rolls_back_the_claimed_slug() {
    let backend = backend();
    let store = store(&backend);
    store
        .create_project("acct-1", "p1", versioned("v1", "acme", None))
        .await
        .expect("create");

    let err = store
        .update_config("p1", Some("stale"), versioned("v2", "acme2", None))
        .await
        .expect_err("version conflict");
    assert!(matches!(err, StoreError::Conflict(_)));

    // The claimed slug was unwound; the old one is exactly as it was.
    assert!(
        backend
            .get(codec::SLUG_TABLE, &Key::hash("acme2"), true)
            .await
            .expect("get")
            .is_none()
    );
    let old_item = backend
        .get(codec::SLUG_TABLE, &Key::hash("acme"), true)
        .await
        .expect("get")
        .expect("present");
    assert!(old_item.get(codec::ATTR_EXPIRES_AT).is_none());
    let project = store.project("p1", false).await.expect("get").expect("present");
    assert_eq!(project.version(), "v1");
    assert_eq!(project.config().slug, "acme");
}

#[tokio::test]
async fn claim_conflict_unwinds_earlier_claims_in_the_batch() {
    let backend = backend();
    let store = store(&backend);
    store
        .create_project("acct-1", "p1", versioned("v1", "acme", None))
        .await
        .expect("create p1");
    store
        .create_project("acct-2", "p2", versioned("v1", "taken", None))
        .await
        .expect("create p2");

    // Domain rename is claimed first and succeeds; the subdomain rename
    // then collides with p2 and the whole update must unwind.
    let update = versioned("v2", "taken", Some("feedback.fresh.com"));
    let err = store
        .update_config("p1", Some("v1"), update)
        .await
        .expect_err("subdomain taken");
    assert!(matches!(err, StoreError::Conflict(_)));

    // The already-claimed domain slug was released again.
    assert!(
        backend
            .get(codec::SLUG_TABLE, &Key::hash("feedback.fresh.com"), true)
            .await
            .expect("get")
            .is_none()
    );
    // p2's ownership of the contested slug is untouched.
    let taken = store
        .project_by_slug("taken", false)
        .await
        .expect("resolve")
        .expect("present");
    assert_eq!(taken.project_id(), "p2");
    // p1 is unchanged.
    let p1 = store.project("p1", false).await.expect("get").expect("present");
    assert_eq!(p1.config().slug, "acme");
    assert_eq!(p1.version(), "v1");
}

#[tokio::test]
async fn reclaiming_your_own_slug_mid_migration_is_allowed() {
    let backend = backend();
    let store = store(&backend);
    store
        .create_project("acct-1", "p1", versioned("v1", "acme", None))
        .await
        .expect("create");
    store
        .update_config("p1", Some("v1"), versioned("v2", "acme2", None))
        .await
        .expect("rename away");
    // Change of heart: going back to the original slug, which still exists
    // as a grace mapping owned by this project.
    store
        .update_config("p1", Some("v2"), versioned("v3", "acme", None))
        .await
        .expect("rename back");

    let project = store
        .project_by_slug("acme", false)
        .await
        .expect("resolve")
        .expect("present");
    assert_eq!(project.config().slug, "acme");
    // Reclaimed as primary: the grace expiry is gone.
    let item = backend
        .get(codec::SLUG_TABLE, &Key::hash("acme"), true)
        .await
        .expect("get")
        .expect("present");
    assert!(item.get(codec::ATTR_EXPIRES_AT).is_none());
}

#[tokio::test]
async fn reads_after_mutations_never_see_pre_mutation_data() {
    let backend = backend();
    let store = store(&backend);
    store
        .create_project("acct-1", "p1", versioned("v1", "acme", None))
        .await
        .expect("create");

    // Warm both caches.
    let warm = store
        .project_by_slug("acme", true)
        .await
        .expect("resolve")
        .expect("present");
    assert!(warm.config().name.is_none());

    let renamed = VersionedConfig {
        version: "v2".to_string(),
        config: config_blob("acme", None, Some("Acme Feedback")),
    };
    store
        .update_config("p1", Some("v1"), renamed)
        .await
        .expect("update");

    // Cached read immediately after the mutation reflects it.
    let fresh = store
        .project_by_slug("acme", true)
        .await
        .expect("resolve")
        .expect("present");
    assert_eq!(fresh.config().name.as_deref(), Some("Acme Feedback"));
    assert_eq!(fresh.version(), "v2");

    store.delete_project("p1").await.expect("delete");
    assert!(store.project("p1", true).await.expect("get").is_none());
    assert!(store.project_by_slug("acme", true).await.expect("resolve").is_none());
}

#[tokio::test]
async fn webhook_listeners_are_added_and_removed() {
    let backend = backend();
    let store = store(&backend);
    store
        .create_project("acct-1", "p1", versioned("v1", "acme", None))
        .await
        .expect("create");
    let listener = WebhookListener {
        resource_type: ResourceType::Post,
        event_type: "created".to_string(),
        url: "https://hooks.acme.com/posts".to_string(),
    };

    store
        .add_webhook_listener("p1", &listener)
        .await
        .expect("add");
    let project = store.project("p1", true).await.expect("get").expect("present");
    assert_eq!(
        project.webhook_listeners(ResourceType::Post, "created").len(),
        1
    );

    store
        .remove_webhook_listener("p1", &listener)
        .await
        .expect("remove");
    let project = store.project("p1", true).await.expect("get").expect("present");
    assert!(
        project
            .webhook_listeners(ResourceType::Post, "created")
            .is_empty()
    );
}

#[tokio::test]
async fn webhook_update_on_missing_project_is_benign() {
    let backend = backend();
    let store = store(&backend);
    let listener = WebhookListener {
        resource_type: ResourceType::Comment,
        event_type: "created".to_string(),
        url: "https://hooks.acme.com/comments".to_string(),
    };
    store
        .add_webhook_listener("ghost", &listener)
        .await
        .expect("benign");
    // No phantom project record appeared.
    assert!(
        backend
            .get(codec::PROJECT_TABLE, &Key::hash("ghost"), true)
            .await
            .expect("get")
            .is_none()
    );
}

#[tokio::test]
async fn delete_cascades_over_every_owned_slug() {
    // Batch limit of one forces the delete to retry unprocessed subsets.
    let backend = Arc::new(MemoryKv::with_batch_limit(codec::TABLE_SCHEMAS, 1));
    let store = store(&backend);
    store
        .create_project("acct-1", "p1", versioned("v1", "acme", Some("feedback.acme.com")))
        .await
        .expect("create");
    // Leave a grace slug behind as well.
    store
        .update_config(
            "p1",
            Some("v1"),
            versioned("v2", "acme2", Some("feedback.acme.com")),
        )
        .await
        .expect("rename");

    store.delete_project("p1").await.expect("delete");

    for slug in ["acme", "acme2", "feedback.acme.com"] {
        assert!(
            backend
                .get(codec::SLUG_TABLE, &Key::hash(slug), true)
                .await
                .expect("get")
                .is_none(),
            "slug {slug} should be deleted"
        );
    }
    assert!(store.project("p1", false).await.expect("get").is_none());
}

#[tokio::test]
async fn batch_get_retries_unprocessed_keys_until_complete() {
    let backend = Arc::new(MemoryKv::with_batch_limit(codec::TABLE_SCHEMAS, 2));
    let store = store(&backend);
    let mut ids = Vec::new();
    for index in 0..5 {
        let id = format!("p{index}");
        let slug = format!("proj-{index}");
        store
            .create_project("acct-1", &id, versioned("v1", &slug, None))
            .await
            .expect("create");
        ids.push(id);
    }
    ids.push("absent".to_string());

    let projects = store.projects(&ids, false).await.expect("batch get");
    assert_eq!(projects.len(), 5);
    let mut returned: Vec<&str> = projects.iter().map(|p| p.project_id()).collect();
    returned.sort_unstable();
    assert_eq!(returned, ["p0", "p1", "p2", "p3", "p4"]);
}

#[tokio::test]
async fn stale_config_schema_upgrades_lazily_on_read() {
    let backend = backend();
    let store = store(&backend);

    // Seed a v1-era record directly, bypassing the store.
    let config_json = r#"{"schemaVersion":1,"slug":"legacy","categories":[{"categoryId":"c1","name":"Ideas","support":{"express":true,"fund":false}}]}"#;
    let record = echoboard_directory::model::ProjectRecord {
        account_id: "acct-1".to_string(),
        project_id: "p-legacy".to_string(),
        version: "v1".to_string(),
        schema_version: 1,
        webhook_listeners: Default::default(),
        config_json: config_json.to_string(),
    };
    backend
        .put(
            codec::PROJECT_TABLE,
            codec::encode_project(&record),
            Precondition::None,
        )
        .await
        .expect("seed project");

    let project = store
        .project("p-legacy", false)
        .await
        .expect("get")
        .expect("present");
    // The returned view is upgraded...
    assert_eq!(
        project.config().schema_version,
        echoboard_directory::schema::CURRENT_CONFIG_SCHEMA_VERSION
    );
    assert!(
        project.category("c1").expect("category").support.express.is_some()
    );
    // ...and the upgrade was written back.
    let stored = backend
        .get(codec::PROJECT_TABLE, &Key::hash("p-legacy"), true)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(
        stored.get(codec::ATTR_SCHEMA_VERSION).and_then(AttrValue::as_n),
        Some(echoboard_directory::schema::CURRENT_CONFIG_SCHEMA_VERSION)
    );
}

#[tokio::test]
async fn malformed_input_fails_validation() {
    let backend = backend();
    let store = store(&backend);
    let err = store
        .create_project("acct-1", "p1", versioned("v1", "Not A Slug", None))
        .await
        .expect_err("bad subdomain");
    assert!(matches!(err, StoreError::ValidationFailed(_)));

    store
        .create_project("acct-1", "p1", versioned("v1", "acme", None))
        .await
        .expect("create");
    let err = store
        .update_config("p1", Some("v1"), versioned("v2", "acme", Some("not a domain")))
        .await
        .expect_err("bad domain");
    assert!(matches!(err, StoreError::ValidationFailed(_)));
}

#[tokio::test]
async fn updating_a_missing_project_is_not_found() {
    let backend = backend();
    let store = store(&backend);
    let err = store
        .update_config("ghost", None, versioned("v1", "acme", None))
        .await
        .expect_err("missing project");
    assert!(matches!(err, StoreError::NotFound(_)));
}
