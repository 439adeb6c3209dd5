//! End-to-end registry behavior against the in-memory backend with real
//! kinds: identity rules, optimistic concurrency, patching, the status
//! subresource, and dry runs.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use palisade_backend::MemoryBackend;
use palisade_core::{
    ApplyContext, ListScope, RegistryError, ReplaceWith, ResourceObject, WatchEvent,
};
use palisade_kinds::{
    AddressGroup, AddressGroupConverter, AddressGroupValidator, Service, ServiceConverter,
    ServicePort, ServiceRecord, ServiceSpec, ServiceStatus, ServiceTabulator, ServiceValidator,
};
use palisade_registry::{BaseStorage, StatusStorage, StorageOptions};
use palisade_watch::HubConfig;

fn service_storage() -> BaseStorage<Service, ServiceRecord> {
    BaseStorage::new(
        Arc::new(ServiceConverter),
        Arc::new(ServiceValidator),
        Arc::new(MemoryBackend::new()),
    )
    .with_tabulator(Arc::new(ServiceTabulator))
}

fn storage_with(options: StorageOptions) -> BaseStorage<Service, ServiceRecord> {
    BaseStorage::with_options(
        Arc::new(ServiceConverter),
        Arc::new(ServiceValidator),
        Arc::new(MemoryBackend::new()),
        options,
    )
}

fn web() -> Service {
    Service::new(
        "edge",
        "web",
        ServiceSpec {
            protocol: "TCP".into(),
            ports: vec![ServicePort { name: "http".into(), port: 80 }],
            description: "frontend".into(),
        },
    )
}

fn ctx() -> ApplyContext {
    ApplyContext::new("palisadectl")
}

#[tokio::test]
async fn create_then_get_round_trips_with_backend_fields() {
    let storage = service_storage();
    let created = storage.create(&web(), &ctx()).await.unwrap();
    assert!(created.metadata.uid.is_some());
    assert!(created.resource_version().is_some());
    assert!(created.metadata.creation_timestamp.is_some());

    let fetched = storage.get(Some("edge"), "web").await.unwrap();
    assert_eq!(fetched, created);
}

#[tokio::test]
async fn namespace_scoping_is_enforced_before_the_backend() {
    let storage = service_storage();
    let err = storage.get(None, "web").await.unwrap_err();
    assert!(matches!(err, RegistryError::BadRequest { .. }), "{err:?}");

    let groups: BaseStorage<AddressGroup, palisade_kinds::AddressGroupRecord> = BaseStorage::new(
        Arc::new(AddressGroupConverter),
        Arc::new(AddressGroupValidator),
        Arc::new(MemoryBackend::new()),
    );
    let err = groups.get(Some("edge"), "internal").await.unwrap_err();
    assert!(matches!(err, RegistryError::BadRequest { .. }), "{err:?}");
    let err = groups.list(&ListScope::in_namespace("edge")).await.unwrap_err();
    assert!(matches!(err, RegistryError::BadRequest { .. }), "{err:?}");
}

#[tokio::test]
async fn duplicate_create_is_already_exists() {
    let storage = service_storage();
    storage.create(&web(), &ctx()).await.unwrap();
    let err = storage.create(&web(), &ctx()).await.unwrap_err();
    assert!(matches!(err, RegistryError::AlreadyExists(_)), "{err:?}");
    assert_eq!(err.http_status(), 409);
}

#[tokio::test]
async fn every_write_moves_the_resource_version() {
    let storage = service_storage();
    let v1 = storage.create(&web(), &ctx()).await.unwrap();

    let mut desired = v1.clone();
    desired.spec.description = "frontend tier".into();
    let (v2, created) =
        storage.update(Some("edge"), "web", &ReplaceWith(desired), &ctx()).await.unwrap();
    assert!(!created);
    assert_ne!(v1.resource_version(), v2.resource_version());

    let patch = br#"{"spec":{"description":"edge tier"}}"#;
    let v3 = storage
        .patch(Some("edge"), "web", "application/merge-patch+json", patch, &ctx())
        .await
        .unwrap();
    assert_ne!(v2.resource_version(), v3.resource_version());
    assert_eq!(v3.spec.description, "edge tier");
}

#[tokio::test]
async fn stale_resource_version_is_a_conflict() {
    let storage = service_storage();
    let first = storage.create(&web(), &ctx()).await.unwrap();

    let mut fresh = first.clone();
    fresh.spec.description = "one".into();
    storage.update(Some("edge"), "web", &ReplaceWith(fresh), &ctx()).await.unwrap();

    let mut stale = first;
    stale.spec.description = "two".into();
    let err =
        storage.update(Some("edge"), "web", &ReplaceWith(stale), &ctx()).await.unwrap_err();
    assert!(matches!(err, RegistryError::Conflict(_)), "{err:?}");
    assert!(!err.retryable());
}

#[tokio::test]
async fn update_of_absent_object_honors_create_on_update() {
    let strict = service_storage();
    let err = strict
        .update(Some("edge"), "web", &ReplaceWith(web()), &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::NotFound(_)), "{err:?}");

    let lenient = storage_with(StorageOptions {
        allow_create_on_update: true,
        watch: HubConfig::default(),
    });
    let (obj, created) =
        lenient.update(Some("edge"), "web", &ReplaceWith(web()), &ctx()).await.unwrap();
    assert!(created);
    assert!(obj.metadata.uid.is_some());
}

#[tokio::test]
async fn create_on_update_keeps_the_addressed_identity() {
    let lenient = storage_with(StorageOptions {
        allow_create_on_update: true,
        watch: HubConfig::default(),
    });
    // addressed as edge/web, but the source produces edge/api
    let mut other = web();
    other.metadata.name = "api".into();
    let err = lenient
        .update(Some("edge"), "web", &ReplaceWith(other), &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::BadRequest { .. }), "{err:?}");

    // nothing was persisted under either identity
    let err = lenient.get(Some("edge"), "api").await.unwrap_err();
    assert!(matches!(err, RegistryError::NotFound(_)), "{err:?}");
    let err = lenient.get(Some("edge"), "web").await.unwrap_err();
    assert!(matches!(err, RegistryError::NotFound(_)), "{err:?}");
}

#[tokio::test]
async fn unknown_patch_type_fails_before_touching_anything() {
    let storage = service_storage();
    // no object exists; a backend-first implementation would say NotFound
    let err = storage
        .patch(Some("edge"), "web", "application/strategic-merge-patch+json", b"{}", &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::BadRequest { .. }), "{err:?}");
}

#[tokio::test]
async fn json_patch_ops_apply_atomically() {
    let storage = service_storage();
    storage.create(&web(), &ctx()).await.unwrap();

    let ops = br#"[
        {"op": "add", "path": "/spec/ports/-", "value": {"name": "https", "port": 443}},
        {"op": "test", "path": "/spec/protocol", "value": "UDP"}
    ]"#;
    let err = storage
        .patch(Some("edge"), "web", "application/json-patch+json", ops, &ctx())
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::BadRequest { .. }), "{err:?}");
    // the failed test op rolled back the add
    let current = storage.get(Some("edge"), "web").await.unwrap();
    assert_eq!(current.spec.ports.len(), 1);
}

#[tokio::test]
async fn validation_failures_aggregate_into_one_bad_request() {
    let storage = service_storage();
    let mut bad = web();
    bad.spec.protocol = "GRE".into();
    bad.spec.ports[0].port = 0;
    let err = storage.create(&bad, &ctx()).await.unwrap_err();
    match err {
        RegistryError::BadRequest { fields, .. } => assert_eq!(fields.len(), 2),
        other => panic!("expected BadRequest, got {other:?}"),
    }
}

#[tokio::test]
async fn dry_run_validates_but_persists_nothing() {
    let storage = service_storage();
    let dry = ctx().dry_run_all();
    let echo = storage.create(&web(), &dry).await.unwrap();
    assert!(echo.metadata.uid.is_none(), "dry-run must not reach the backend");
    let err = storage.get(Some("edge"), "web").await.unwrap_err();
    assert!(matches!(err, RegistryError::NotFound(_)), "{err:?}");
}

#[tokio::test]
async fn field_manager_is_recorded_in_managed_fields() {
    let storage = service_storage();
    let created = storage.create(&web(), &ctx()).await.unwrap();
    assert_eq!(created.metadata.managed_fields.len(), 1);
    assert_eq!(created.metadata.managed_fields[0].manager, "palisadectl");
    assert_eq!(created.metadata.managed_fields[0].operation, "Update");

    let patch = br#"{"spec":{"description":"patched"}}"#;
    let patched = storage
        .patch(
            Some("edge"),
            "web",
            "application/merge-patch+json",
            patch,
            &ApplyContext::new("controller"),
        )
        .await
        .unwrap();
    assert_eq!(patched.metadata.managed_fields.len(), 2);
    assert_eq!(patched.metadata.managed_fields[1].manager, "controller");
    assert_eq!(patched.metadata.managed_fields[1].operation, "Apply");
}

#[tokio::test]
async fn status_subresource_ignores_spec_edits() {
    let storage = Arc::new(service_storage());
    let created = storage.create(&web(), &ctx()).await.unwrap();
    let status = StatusStorage::new(Arc::clone(&storage));

    let mut report = created.clone();
    report.spec.description = "smuggled spec change".into();
    report.status = Some(ServiceStatus {
        conditions: vec![],
        observed_generation: Some(1),
        bound_rules: vec!["allow-web".into()],
    });
    let stored = status.update(Some("edge"), "web", &report, &ctx()).await.unwrap();

    assert_eq!(stored.spec.description, "frontend", "spec must be untouched");
    assert_eq!(
        stored.status.as_ref().and_then(|s| s.observed_generation),
        Some(1)
    );
    assert_ne!(stored.resource_version(), created.resource_version());
}

#[tokio::test]
async fn status_patch_touches_only_status() {
    let storage = Arc::new(service_storage());
    storage.create(&web(), &ctx()).await.unwrap();
    let status = StatusStorage::new(Arc::clone(&storage));

    let patch = br#"{"spec":{"description":"nope"},"status":{"observedGeneration":5}}"#;
    let stored = status
        .patch(Some("edge"), "web", "application/merge-patch+json", patch, &ctx())
        .await
        .unwrap();
    assert_eq!(stored.spec.description, "frontend");
    assert_eq!(stored.status.as_ref().and_then(|s| s.observed_generation), Some(5));
}

#[tokio::test]
async fn delete_returns_the_last_object() {
    let storage = service_storage();
    let created = storage.create(&web(), &ctx()).await.unwrap();
    let (gone, immediate) = storage.delete(Some("edge"), "web", &ctx()).await.unwrap();
    assert!(immediate);
    assert_eq!(gone.metadata.uid, created.metadata.uid);
    let err = storage.get(Some("edge"), "web").await.unwrap_err();
    assert!(matches!(err, RegistryError::NotFound(_)), "{err:?}");
}

#[tokio::test]
async fn table_rendering_uses_the_kind_columns() {
    let storage = service_storage();
    let created = storage.create(&web(), &ctx()).await.unwrap();
    let table = storage.table(&[created]);
    let labels: Vec<&str> = table.columns.iter().map(|c| c.label).collect();
    assert_eq!(labels, vec!["Namespace", "Name", "Protocol", "Ports", "Age"]);
    assert_eq!(table.rows[0][0], "edge");
    assert_eq!(table.rows[0][3], "80");
}

#[tokio::test]
async fn writes_reach_a_registered_watcher() {
    let storage = storage_with(StorageOptions {
        allow_create_on_update: false,
        watch: HubConfig {
            queue_cap: 16,
            poll_interval: Duration::from_millis(5),
            backoff_max: Duration::from_millis(50),
            bookmark_ticks: 0,
        },
    });
    let mut handle = storage.watch(ListScope::in_namespace("edge")).unwrap();

    storage.create(&web(), &ctx()).await.unwrap();
    let ev = tokio::time::timeout(Duration::from_secs(2), handle.recv())
        .await
        .expect("no event after create")
        .expect("stream closed");
    assert!(matches!(ev, WatchEvent::Added(ref o) if o.metadata.name == "web"), "{ev:?}");

    storage.delete(Some("edge"), "web", &ctx()).await.unwrap();
    let ev = tokio::time::timeout(Duration::from_secs(2), handle.recv())
        .await
        .expect("no event after delete")
        .expect("stream closed");
    assert!(matches!(ev, WatchEvent::Deleted(_)), "{ev:?}");
}
