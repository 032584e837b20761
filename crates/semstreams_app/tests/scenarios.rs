//! End-to-end scenarios over in-memory buckets: the full ingest pipeline,
//! index maintenance, embedding tier and query surface, without a bus.

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use semstreams_app::config::{AppConfig, VocabularyAlias, VocabularyEntry};
use semstreams_app::{AppMetrics, Core, CoreBuckets, Pipeline};
use semstreams_embed::ProviderKind;
use semstreams_model::{AliasType, EntityId, EntityPayload, Triple};
use semstreams_net::api::{
    EntityGetRequest, EntityQueryRequest, LocalQueryRequest, PathQueryRequest,
    PredicateQueryRequest, SemanticQueryRequest,
};

const DRONE1: &str = "acme.tele.robo.gcs1.drone.001";
const DRONE2: &str = "acme.tele.robo.gcs1.drone.002";
const FLEET: &str = "acme.ops.log.hq.fleet.rescue";
const SENSOR: &str = "acme.tele.robo.gcs1.sensor.042";

fn id(s: &str) -> EntityId {
    EntityId::parse(s).unwrap()
}

fn callsign_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.vocabulary.push(VocabularyEntry {
        name: "robotics.communication.callsign".to_string(),
        description: "radio callsign".to_string(),
        datatype: None,
        units: None,
        iri: None,
        alias: Some(VocabularyAlias {
            alias_type: AliasType::Communication,
            priority: 0,
        }),
    });
    config
}

struct Harness {
    core: Arc<Core>,
    pipeline: Arc<Pipeline>,
    cancel: CancellationToken,
}

impl Harness {
    fn build(config: &AppConfig) -> Self {
        let metrics = Arc::new(AppMetrics::new().unwrap());
        let core = Core::build(config, CoreBuckets::in_memory(), metrics.clone()).unwrap();
        let (pipeline, embed_worker) = Pipeline::new(
            core.entities.clone(),
            core.index.clone(),
            core.embedder.clone(),
            core.detector.clone(),
            metrics,
            None,
        );
        let cancel = CancellationToken::new();
        tokio::spawn(embed_worker.run(cancel.clone()));
        Self {
            core,
            pipeline,
            cancel,
        }
    }

    async fn ingest(&self, payload: EntityPayload) {
        self.pipeline.process(payload).await.unwrap();
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn drone1_payload() -> EntityPayload {
    let mut payload = EntityPayload::new(id(DRONE1), "robotics.drone");
    payload.triples = vec![
        Triple::new(id(DRONE1), "robotics.battery.level", json!(85.2)),
        Triple::new(id(DRONE1), "ops.fleet.member_of", json!(FLEET)),
    ];
    payload
}

// ── S1: basic upsert & retrieval ────────────────────────────────────────────

#[tokio::test]
async fn s1_upsert_and_retrieve() {
    let harness = Harness::build(&AppConfig::default());
    harness.ingest(drone1_payload()).await;

    let reply = harness
        .core
        .entity_get(EntityGetRequest {
            id: Some(DRONE1.to_string()),
            alias: None,
        })
        .await;
    let state = reply.ok.unwrap().entity.unwrap();
    assert_eq!(state.version, 1);
    assert!(state
        .triples
        .iter()
        .any(|t| t.predicate == "robotics.battery.level" && t.object == json!(85.2)));
    assert_eq!(state.edges.len(), 1);
    assert_eq!(state.edges[0].target.as_str(), FLEET);
}

// ── S2: alias resolution ────────────────────────────────────────────────────

#[tokio::test]
async fn s2_alias_resolution() {
    let harness = Harness::build(&callsign_config());
    let mut payload = drone1_payload();
    payload.triples.push(Triple::new(
        id(DRONE1),
        "robotics.communication.callsign",
        json!("rescue-alpha"),
    ));
    harness.ingest(payload).await;

    let reply = harness
        .core
        .entity_get(EntityGetRequest {
            id: None,
            alias: Some("rescue-alpha".to_string()),
        })
        .await;
    let state = reply.ok.unwrap().entity.unwrap();
    assert_eq!(state.id.as_str(), DRONE1);

    // Alias round-trip holds for every resolvable alias on the entity.
    let resolved = harness.core.index.resolve_alias("RESCUE-ALPHA").await.unwrap();
    assert_eq!(resolved.as_deref(), Some(DRONE1));
}

// ── S3: incoming index growth ───────────────────────────────────────────────

#[tokio::test]
async fn s3_predicate_query_grows() {
    let harness = Harness::build(&AppConfig::default());
    harness.ingest(drone1_payload()).await;

    let request = PredicateQueryRequest {
        predicate: "ops.fleet.member_of".to_string(),
        object: json!(FLEET),
    };
    let reply = harness.core.predicate_query(request.clone()).await;
    assert_eq!(reply.ok.unwrap().entities, vec![DRONE1.to_string()]);

    let mut second = EntityPayload::new(id(DRONE2), "robotics.drone");
    second.triples = vec![Triple::new(id(DRONE2), "ops.fleet.member_of", json!(FLEET))];
    harness.ingest(second).await;

    let reply = harness.core.predicate_query(request).await;
    assert_eq!(
        reply.ok.unwrap().entities,
        vec![DRONE1.to_string(), DRONE2.to_string()]
    );
}

// ── S4: PathRAG bounds ──────────────────────────────────────────────────────

async fn seed_path_graph(harness: &Harness) {
    let mut p1 = drone1_payload();
    p1.triples.push(Triple::new(
        id(DRONE1),
        "robotics.sensor.has_sensor",
        json!(SENSOR),
    ));
    harness.ingest(p1).await;

    let mut p2 = EntityPayload::new(id(DRONE2), "robotics.drone");
    p2.triples = vec![Triple::new(id(DRONE2), "ops.fleet.member_of", json!(FLEET))];
    harness.ingest(p2).await;
    harness.ingest(EntityPayload::new(id(FLEET), "ops.fleet")).await;
    harness.ingest(EntityPayload::new(id(SENSOR), "robotics.sensor")).await;
}

fn path_request() -> PathQueryRequest {
    serde_json::from_value(json!({
        "start": DRONE1,
        "max_depth": 2,
        "max_nodes": 10,
        "edge_filter": ["ops.fleet.member_of", "robotics.sensor.has_sensor"],
        "decay_factor": 0.8
    }))
    .unwrap()
}

#[tokio::test]
async fn s4_pathrag_scores_and_bounds() {
    let harness = Harness::build(&AppConfig::default());
    seed_path_graph(&harness).await;

    let response = harness.core.path_query(path_request()).await.ok.unwrap();
    assert!(!response.truncated);
    assert_eq!(response.scores.len(), 4);
    assert!((response.scores[DRONE1] - 1.0).abs() < 1e-9);
    assert!((response.scores[FLEET] - 0.8).abs() < 1e-9);
    assert!((response.scores[SENSOR] - 0.8).abs() < 1e-9);
    assert!((response.scores[DRONE2] - 0.64).abs() < 1e-9);

    let mut bounded = path_request();
    bounded.max_nodes = 2;
    let response = harness.core.path_query(bounded).await.ok.unwrap();
    assert!(response.truncated);
    assert_eq!(response.scores.len(), 2);
    assert!(response.scores.contains_key(DRONE1));
    assert!(response.scores.contains_key(FLEET));
}

// ── S5: embedder fallback ───────────────────────────────────────────────────

#[tokio::test]
async fn s5_http_probe_failure_degrades_to_bm25() {
    let mut config = AppConfig::default();
    config.embedder.provider = ProviderKind::Http;
    config.embedder.http_endpoint = Some("http://127.0.0.1:1/embeddings".to_string());
    config.validate().unwrap();

    let harness = Harness::build(&config);
    harness.core.embedder.probe().await;
    assert_eq!(harness.core.metrics.embed.fallbacks.get(), 1);
    assert_eq!(harness.core.embedder.active(), ProviderKind::Bm25);
    assert_eq!(harness.core.health().status, "degraded");

    // Embeddings and local search still work on the baseline.
    let mut payload = drone1_payload();
    payload
        .properties
        .insert("description".to_string(), json!("search and rescue drone"));
    harness.ingest(payload).await;
    let state = harness.core.entities.get(&id(DRONE1)).await.unwrap().unwrap();
    harness.core.embedder.embed_entity(&state).await.unwrap();

    let reply = harness
        .core
        .local_query(LocalQueryRequest {
            start: DRONE1.to_string(),
            query: "rescue drone".to_string(),
            level: 0,
            limit: 5,
        })
        .await;
    let response = reply.ok.unwrap();
    assert!(!response.results.is_empty());
}

// ── S6: skip-type memory bound ──────────────────────────────────────────────

#[tokio::test]
async fn s6_skip_types_bound_vector_memory() {
    let mut config = AppConfig::default();
    config.embedder.skip_types = vec!["telemetry.*.*".to_string()];
    let harness = Harness::build(&config);

    for i in 0..1_000 {
        let entity =
            id(&format!("acme.tele.robo.gcs1.sample.{i:04}"));
        let mut payload = EntityPayload::new(entity, "telemetry.drone.position");
        payload
            .properties
            .insert("description".to_string(), json!(format!("position sample {i}")));
        harness.ingest(payload).await;
        let state = harness
            .core
            .entities
            .get(&id(&format!("acme.tele.robo.gcs1.sample.{i:04}")))
            .await
            .unwrap()
            .unwrap();
        harness.core.embedder.embed_entity(&state).await.unwrap();
    }
    for i in 0..5 {
        let entity = id(&format!("acme.tele.robo.gcs1.alert.{i:04}"));
        let mut payload = EntityPayload::new(entity.clone(), "alerts.battery.critical");
        payload
            .properties
            .insert("description".to_string(), json!(format!("battery critical {i}")));
        harness.ingest(payload).await;
        let state = harness.core.entities.get(&entity).await.unwrap().unwrap();
        harness.core.embedder.embed_entity(&state).await.unwrap();
    }

    assert_eq!(harness.core.embedder.l1().active_count(), 5);
}

// ── Invariants ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn invariant_version_monotonic_after_repeat_upserts() {
    let harness = Harness::build(&AppConfig::default());
    harness.ingest(drone1_payload()).await;
    harness.ingest(drone1_payload()).await;
    harness.ingest(drone1_payload()).await;

    let state = harness.core.entities.get(&id(DRONE1)).await.unwrap().unwrap();
    assert_eq!(state.version, 3);
}

#[tokio::test]
async fn invariant_incoming_index_matches_triples() {
    let harness = Harness::build(&AppConfig::default());
    seed_path_graph(&harness).await;

    for state in harness.core.entities.scan_all().await.unwrap() {
        for triple in &state.triples {
            if let Some(target) = triple.object_entity() {
                let sources = harness
                    .core
                    .index
                    .incoming_lookup(&target, &triple.predicate)
                    .await
                    .unwrap();
                assert!(
                    sources.contains(&state.id.as_str().to_string()),
                    "missing incoming entry for {} -{}-> {}",
                    state.id,
                    triple.predicate,
                    target
                );
            }
        }
    }
}

#[tokio::test]
async fn invariant_rebuild_reproduces_index() {
    let harness = Harness::build(&callsign_config());
    let mut payload = drone1_payload();
    payload.triples.push(Triple::new(
        id(DRONE1),
        "robotics.communication.callsign",
        json!("rescue-alpha"),
    ));
    harness.ingest(payload).await;
    harness.ingest(EntityPayload::new(id(FLEET), "ops.fleet")).await;

    let live_incoming = harness
        .core
        .index
        .incoming_lookup(&id(FLEET), "ops.fleet.member_of")
        .await
        .unwrap();
    let live_alias = harness.core.index.resolve_alias("rescue-alpha").await.unwrap();

    let reply = harness.core.index_rebuild().await;
    let rebuilt = reply.ok.unwrap();
    assert_eq!(rebuilt.entities_scanned, 2);

    assert_eq!(
        harness
            .core
            .index
            .incoming_lookup(&id(FLEET), "ops.fleet.member_of")
            .await
            .unwrap(),
        live_incoming
    );
    assert_eq!(
        harness.core.index.resolve_alias("rescue-alpha").await.unwrap(),
        live_alias
    );
}

#[tokio::test]
async fn delete_clears_derived_state() {
    let harness = Harness::build(&callsign_config());
    let mut payload = drone1_payload();
    payload.triples.push(Triple::new(
        id(DRONE1),
        "robotics.communication.callsign",
        json!("rescue-alpha"),
    ));
    harness.ingest(payload).await;

    let reply = harness
        .core
        .entity_delete(semstreams_net::api::EntityDeleteRequest {
            id: DRONE1.to_string(),
        })
        .await;
    assert!(reply.ok.unwrap().deleted);

    assert!(harness.core.entities.get(&id(DRONE1)).await.unwrap().is_none());
    assert!(harness.core.index.resolve_alias("rescue-alpha").await.unwrap().is_none());
    assert!(harness
        .core
        .index
        .incoming_lookup(&id(FLEET), "ops.fleet.member_of")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn entity_query_filters_by_type_and_property() {
    let harness = Harness::build(&AppConfig::default());
    let mut low = drone1_payload();
    low.properties.insert("battery".to_string(), json!(12));
    harness.ingest(low).await;

    let mut high = EntityPayload::new(id(DRONE2), "robotics.drone");
    high.properties.insert("battery".to_string(), json!(90));
    harness.ingest(high).await;
    harness.ingest(EntityPayload::new(id(FLEET), "ops.fleet")).await;

    let reply = harness
        .core
        .entity_query(EntityQueryRequest {
            entity_type: Some("robotics.*".to_string()),
            filters: vec![serde_json::from_value(json!({
                "field": "battery", "op": "lt", "value": 50
            }))
            .unwrap()],
            limit: 10,
        })
        .await;
    let entities = reply.ok.unwrap().entities;
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0].id.as_str(), DRONE1);
}

#[tokio::test]
async fn disabled_embedder_surfaces_preconditions() {
    let mut config = AppConfig::default();
    config.embedder.enabled = false;
    let harness = Harness::build(&config);

    let reply = harness
        .core
        .semantic_query(SemanticQueryRequest {
            query: "anything".to_string(),
            limit: 5,
            entity_type: None,
        })
        .await;
    let error = reply.error.unwrap();
    assert_eq!(error.class, semstreams_model::ErrorClass::Preconditions);
}

#[tokio::test]
async fn query_cache_serves_repeat_path_queries() {
    let harness = Harness::build(&AppConfig::default());
    seed_path_graph(&harness).await;

    let first = harness.core.path_query(path_request()).await;
    assert!(first.ok.is_some());
    let before = harness.core.metrics.query.cache_hits.get();
    let second = harness.core.path_query(path_request()).await;
    assert!(second.ok.is_some());
    assert_eq!(harness.core.metrics.query.cache_hits.get(), before + 1);
}

#[tokio::test]
async fn stats_and_health_report() {
    let harness = Harness::build(&AppConfig::default());
    harness.ingest(drone1_payload()).await;

    let stats = harness.core.stats().await.ok.unwrap();
    assert_eq!(stats.entities, 1);
    let health = harness.core.health();
    assert_eq!(health.status, "ok");
    assert_eq!(health.embedder, "bm25");
}
