//! End-to-end tests of the mutation/query contracts against an
//! in-process store.
//!
//! Run with: cargo test --package strata-api --test integration

use serde_json::json;

use strata_api::OntologyService;
use strata_auth::Role;
use strata_core::config::StrataConfig;
use strata_core::{ActorContext, ActorId, EntityId, GroupId, StrataError};
use strata_knowledge::SearchFilters;
use strata_store::{OntologyStore, RelationSpec, SchemaRegistry};

fn service() -> (OntologyService, ActorContext) {
    let schemas = SchemaRegistry::new();
    schemas.register_relation_type(
        "contains",
        RelationSpec {
            ordered: true,
            cross_tenant: false,
        },
    );
    let store = OntologyStore::with_schemas(StrataConfig::default(), schemas);
    let root = ActorId::new();
    store.seed_platform_owner(root).unwrap();
    (OntologyService::with_store(store), ActorContext::new(root))
}

async fn create_group(service: &OntologyService, root: &ActorContext, slug: &str) -> GroupId {
    let receipt = service
        .mutate(root, "group.create", json!({ "slug": slug, "name": slug }))
        .await
        .unwrap();
    GroupId(receipt.id)
}

async fn create_entity(
    service: &OntologyService,
    ctx: &ActorContext,
    group: GroupId,
    entity_type: &str,
    name: &str,
) -> EntityId {
    let receipt = service
        .mutate(
            ctx,
            "entity.create",
            json!({
                "group_id": group.0.to_string(),
                "entity_type": entity_type,
                "name": name,
            }),
        )
        .await
        .unwrap();
    EntityId(receipt.id)
}

async fn org_user_in(
    service: &OntologyService,
    root: &ActorContext,
    group: GroupId,
) -> ActorContext {
    let member = ActorId::new();
    service
        .mutate(
            root,
            "group.grantRole",
            json!({
                "group_id": group.0.to_string(),
                "subject": member.0.to_string(),
                "role": Role::OrgUser,
            }),
        )
        .await
        .unwrap();
    ActorContext::new(member)
}

// ── Spec scenarios ────────────────────────────────────────────────

#[tokio::test]
async fn listing_another_group_returns_nothing() {
    let (service, root) = service();
    let acme = create_group(&service, &root, "acme").await;
    let other = create_group(&service, &root, "other").await;
    create_entity(&service, &root, acme, "funnel", "Spring").await;

    let result = service
        .query(
            &root,
            "entity.list",
            json!({ "group_id": other.0.to_string(), "entity_type": "funnel" }),
        )
        .await
        .unwrap();
    assert!(result.items.is_empty());

    let result = service
        .query(&root, "entity.list", json!({ "group_id": acme.0.to_string() }))
        .await
        .unwrap();
    assert_eq!(result.items.len(), 1);
}

#[tokio::test]
async fn reorder_omitting_a_member_is_rejected() {
    let (service, root) = service();
    let acme = create_group(&service, &root, "acme").await;
    let funnel = create_entity(&service, &root, acme, "funnel", "Spring").await;

    let mut edges = Vec::new();
    for name in ["landing", "checkout"] {
        let step = create_entity(&service, &root, acme, "step", name).await;
        let receipt = service
            .mutate(
                &root,
                "relationship.connect",
                json!({
                    "from_id": funnel.0.to_string(),
                    "to_id": step.0.to_string(),
                    "relation_type": "contains",
                    "metadata": { "sequence": 0 },
                }),
            )
            .await
            .unwrap();
        edges.push(receipt.id);
    }

    let version = service
        .query(
            &root,
            "relationship.orderingVersion",
            json!({
                "group_id": acme.0.to_string(),
                "entity_id": funnel.0.to_string(),
                "relation_type": "contains",
            }),
        )
        .await
        .unwrap()
        .items[0]["version"]
        .as_u64()
        .unwrap();

    let err = service
        .mutate(
            &root,
            "relationship.reorder",
            json!({
                "parent_id": funnel.0.to_string(),
                "relation_type": "contains",
                "new_order": [edges[0].to_string()],
                "expected_version": version,
            }),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StrataError::InvalidSequence { .. }));
}

#[tokio::test]
async fn vector_search_is_model_scoped() {
    let (service, root) = service();
    let acme = create_group(&service, &root, "acme").await;
    let doc = create_entity(&service, &root, acme, "document", "Guide").await;

    service
        .mutate(
            &root,
            "knowledge.upsertEmbedding",
            json!({
                "entity_id": doc.0.to_string(),
                "text": "text",
                "vector": [1.0, 0.0],
                "model": "model-v1",
            }),
        )
        .await
        .unwrap();
    service
        .mutate(
            &root,
            "knowledge.upsertEmbedding",
            json!({
                "entity_id": doc.0.to_string(),
                "text": "text2",
                "vector": [0.0, 1.0, 0.0],
                "model": "model-v2",
            }),
        )
        .await
        .unwrap();
    service.store().refresh_knowledge().unwrap();

    let hits = service
        .search(&root, acme, &[1.0, 0.0], "model-v1", 10, &SearchFilters::default())
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0, doc);

    let hits = service
        .search(&root, acme, &[0.0, 1.0, 0.0], "model-v2", 10, &SearchFilters::default())
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn org_user_cannot_touch_foreign_entities() {
    let (service, root) = service();
    let acme = create_group(&service, &root, "acme").await;
    let other = create_group(&service, &root, "other").await;
    let foreign = create_entity(&service, &root, other, "funnel", "Theirs").await;

    let member = org_user_in(&service, &root, acme).await;
    let err = service
        .mutate(
            &member,
            "entity.update",
            json!({ "entity_id": foreign.0.to_string(), "name": "Hijacked" }),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StrataError::Unauthorized { .. }));
}

// ── Contract edges ────────────────────────────────────────────────

#[tokio::test]
async fn unknown_operations_are_unsupported() {
    let (service, root) = service();

    let err = service
        .mutate(&root, "entity.destroy", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, StrataError::UnsupportedOperation { .. }));

    let err = service.query(&root, "entity.dump", json!({})).await.unwrap_err();
    assert!(matches!(err, StrataError::UnsupportedOperation { .. }));
}

#[tokio::test]
async fn queries_demand_a_group_or_explicit_platform_scope() {
    let (service, root) = service();
    let acme = create_group(&service, &root, "acme").await;
    let member = org_user_in(&service, &root, acme).await;

    // No group_id, no platform scope: rejected at the router.
    let err = service.query(&member, "entity.list", json!({})).await.unwrap_err();
    assert!(matches!(err, StrataError::Validation { .. }));

    // Platform scope without platform authorization: denied.
    let err = service
        .query(&member, "entity.list", json!({ "scope": "platform" }))
        .await
        .unwrap_err();
    assert!(matches!(err, StrataError::Unauthorized { .. }));

    // The platform owner may ask for the global scope explicitly.
    assert!(service
        .query(&root, "entity.list", json!({ "scope": "platform" }))
        .await
        .is_ok());
}

#[tokio::test]
async fn ingestion_replays_return_the_original_event() {
    let (service, root) = service();
    let acme = create_group(&service, &root, "acme").await;

    let payload = json!({ "group_id": acme.0.to_string(), "order": "1001", "total": "41.00" });
    let first = service
        .ingest_external_event(&root, "shopify", "order-1001", payload.clone())
        .await
        .unwrap();
    let replay = service
        .ingest_external_event(&root, "shopify", "order-1001", payload)
        .await
        .unwrap();
    assert_eq!(first.id, replay.id);

    let events = service
        .query(
            &root,
            "event.byType",
            json!({ "group_id": acme.0.to_string(), "event_type": "external.shopify" }),
        )
        .await
        .unwrap();
    assert_eq!(events.items.len(), 1);
}

#[tokio::test]
async fn unknown_actors_cannot_ingest() {
    let (service, _) = service();
    let stranger = ActorContext::new(ActorId::new());

    let err = service
        .ingest_external_event(&stranger, "shopify", "order-1", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, StrataError::Unauthorized { .. }));
}

#[tokio::test]
async fn receipts_carry_the_mutation_event() {
    let (service, root) = service();
    let acme = create_group(&service, &root, "acme").await;

    let receipt = service
        .mutate(
            &root,
            "entity.create",
            json!({
                "group_id": acme.0.to_string(),
                "entity_type": "funnel",
                "name": "Spring",
            }),
        )
        .await
        .unwrap();

    assert_eq!(receipt.event.event_type, "entity.created");
    assert_eq!(receipt.event.target_id, Some(receipt.id));
    assert!(receipt.event.verify_integrity());
}

#[tokio::test]
async fn external_actor_reaches_only_assigned_resources() {
    let (service, root) = service();
    let acme = create_group(&service, &root, "acme").await;
    let assigned = create_entity(&service, &root, acme, "funnel", "Assigned").await;
    let unassigned = create_entity(&service, &root, acme, "funnel", "Private").await;

    let external = ActorId::new();
    service
        .mutate(
            &root,
            "access.assign",
            json!({
                "subject": external.0.to_string(),
                "resource_id": assigned.0.to_string(),
            }),
        )
        .await
        .unwrap();

    let ctx = ActorContext::new(external);
    assert!(service
        .mutate(
            &ctx,
            "entity.update",
            json!({ "entity_id": assigned.0.to_string(), "name": "Renamed" }),
        )
        .await
        .is_ok());

    let err = service
        .mutate(
            &ctx,
            "entity.update",
            json!({ "entity_id": unassigned.0.to_string(), "name": "Nope" }),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StrataError::Unauthorized { .. }));
}

#[tokio::test]
async fn reorder_through_the_contract_applies_and_bumps_version() {
    let (service, root) = service();
    let acme = create_group(&service, &root, "acme").await;
    let funnel = create_entity(&service, &root, acme, "funnel", "Spring").await;

    let mut edges = Vec::new();
    for name in ["a", "b", "c"] {
        let step = create_entity(&service, &root, acme, "step", name).await;
        let receipt = service
            .mutate(
                &root,
                "relationship.connect",
                json!({
                    "from_id": funnel.0.to_string(),
                    "to_id": step.0.to_string(),
                    "relation_type": "contains",
                }),
            )
            .await
            .unwrap();
        edges.push(receipt.id.to_string());
    }

    let version = service.store().ordering_version(funnel, "contains").unwrap();
    let proposed = vec![edges[2].clone(), edges[0].clone(), edges[1].clone()];
    service
        .mutate(
            &root,
            "relationship.reorder",
            json!({
                "parent_id": funnel.0.to_string(),
                "relation_type": "contains",
                "new_order": proposed,
                "expected_version": version,
            }),
        )
        .await
        .unwrap();

    let listed = service
        .query(
            &root,
            "relationship.listFrom",
            json!({
                "group_id": acme.0.to_string(),
                "entity_id": funnel.0.to_string(),
                "relation_type": "contains",
            }),
        )
        .await
        .unwrap();
    let order: Vec<String> = listed
        .items
        .iter()
        .map(|r| r["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(order, vec![edges[2].clone(), edges[0].clone(), edges[1].clone()]);

    // The stale version now conflicts.
    let err = service
        .mutate(
            &root,
            "relationship.reorder",
            json!({
                "parent_id": funnel.0.to_string(),
                "relation_type": "contains",
                "new_order": [edges[0].clone(), edges[1].clone(), edges[2].clone()],
                "expected_version": version,
            }),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StrataError::Conflict { .. }));
}

#[tokio::test]
async fn entity_lookups_never_leak_across_tenants() {
    let (service, root) = service();
    let acme = create_group(&service, &root, "acme").await;
    let other = create_group(&service, &root, "other").await;
    let theirs = create_entity(&service, &root, other, "funnel", "Theirs").await;

    // Asking for a foreign entity under acme's scope looks identical to
    // asking for a missing one.
    let err = service
        .query(
            &root,
            "entity.get",
            json!({ "group_id": acme.0.to_string(), "entity_id": theirs.0.to_string() }),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StrataError::NotFound { .. }));
}

#[tokio::test]
async fn randomized_group_pairs_stay_isolated() {
    let (service, root) = service();

    for round in 0..10 {
        let left = create_group(&service, &root, &format!("left-{round}")).await;
        let right = create_group(&service, &root, &format!("right-{round}")).await;

        let per_side = (round % 4) + 1;
        for i in 0..per_side {
            let doc = create_entity(&service, &root, left, "document", &format!("L{round}-{i}")).await;
            service
                .mutate(
                    &root,
                    "knowledge.upsertEmbedding",
                    json!({
                        "entity_id": doc.0.to_string(),
                        "text": "left doc",
                        "vector": [1.0, 0.0],
                        "model": "m",
                    }),
                )
                .await
                .unwrap();
            create_entity(&service, &root, right, "document", &format!("R{round}-{i}")).await;
        }
        service.store().refresh_knowledge().unwrap();

        let left_list = service
            .query(&root, "entity.list", json!({ "group_id": left.0.to_string() }))
            .await
            .unwrap();
        assert_eq!(left_list.items.len(), per_side);
        for item in &left_list.items {
            assert_eq!(item["group_id"].as_str().unwrap(), left.0.to_string());
        }

        // Vector hits from the right-hand tenant would be exact matches;
        // none may appear.
        let right_hits = service
            .search(&root, right, &[1.0, 0.0], "m", 10, &SearchFilters::default())
            .await
            .unwrap();
        assert!(right_hits.is_empty());

        let right_events = service
            .query(
                &root,
                "event.byType",
                json!({ "group_id": right.0.to_string(), "event_type": "knowledge.embeddingUpserted" }),
            )
            .await
            .unwrap();
        assert!(right_events.items.is_empty());
    }
}

#[tokio::test]
async fn snapshot_persistence_roundtrips_through_the_service() {
    let (service, root) = service();
    let acme = create_group(&service, &root, "acme").await;
    create_entity(&service, &root, acme, "funnel", "Spring").await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.json");
    service.persist(&path).await.unwrap();

    let schemas = SchemaRegistry::new();
    schemas.register_relation_type(
        "contains",
        RelationSpec {
            ordered: true,
            cross_tenant: false,
        },
    );
    let reopened = OntologyService::open(StrataConfig::default(), schemas, &path).unwrap();
    let listed = reopened
        .query(&root, "entity.list", json!({ "group_id": acme.0.to_string() }))
        .await
        .unwrap();
    assert_eq!(listed.items.len(), 1);

    // A second open of a missing path starts empty instead of failing.
    let empty = OntologyService::open(
        StrataConfig::default(),
        SchemaRegistry::new(),
        &dir.path().join("absent.json"),
    )
    .unwrap();
    assert_eq!(empty.store().event_count().unwrap(), 0);
}
