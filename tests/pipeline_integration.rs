//! Server-side pipeline tests: publisher -> relay -> gateway -> connections,
//! and the HTTP surface, all on the in-memory relay.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

use bookmark_realtime::config::Settings;
use bookmark_realtime::connection_manager::FanoutResult;
use bookmark_realtime::event::{DeletedLink, Event, EventBody, EventDraft, LinkRecord};
use bookmark_realtime::gateway::Delivery;
use bookmark_realtime::relay::MemoryRelay;
use bookmark_realtime::server::{create_app, AppState};
use bookmark_realtime::websocket::OutboundMessage;

fn test_state() -> AppState {
    AppState::new(Settings::default(), Arc::new(MemoryRelay::new()))
}

fn created_json(id: &str, ts: i64) -> String {
    Event::from_parts(
        EventBody::Created(LinkRecord::new(id, "https://example.com")),
        ts,
        format!("msg_{}", id),
    )
    .to_json()
    .unwrap()
}

async fn wait_until_active(state: &AppState) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !state.gateway.is_active() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("relay subscription should become active");
}

fn event_text(msg: OutboundMessage) -> String {
    match msg {
        OutboundMessage::Event(text) => text.to_string(),
        other => panic!("expected an event, got {:?}", other),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ============================================================================
// Publisher and gateway
// ============================================================================

#[tokio::test]
async fn test_publish_with_no_consumers_returns_id() {
    let state = test_state();

    let id = state
        .publisher
        .broadcast(EventBody::Created(LinkRecord::new("L1", "http://x")))
        .await
        .expect("publish should succeed without consumers");

    assert!(id.starts_with("msg_"));
    assert_eq!(state.gateway.stats().delivered, 0);
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn test_published_event_reaches_every_connection() {
    let state = test_state();
    let (tx1, mut rx1) = mpsc::channel(8);
    let (tx2, mut rx2) = mpsc::channel(8);
    state.registry.register(tx1);
    state.registry.register(tx2);

    assert!(state.gateway.ensure_started());
    assert!(!state.gateway.ensure_started());
    wait_until_active(&state).await;

    let id = state
        .publisher
        .broadcast(EventBody::Deleted(DeletedLink::new("L1", "Example")))
        .await
        .unwrap();

    for rx in [&mut rx1, &mut rx2] {
        let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event should arrive")
            .expect("channel open");
        let event = Event::from_json(&event_text(msg)).unwrap();
        assert_eq!(event.id(), id);
        assert_eq!(event.record_id(), Some("L1"));
    }
}

#[tokio::test]
async fn test_fanout_survives_connection_churn() {
    let state = test_state();
    state.gateway.activate().await;

    let mut stable = Vec::new();
    for _ in 0..10 {
        let (tx, rx) = mpsc::channel(64);
        state.registry.register(tx);
        stable.push(rx);
    }

    // Connections that come and go while messages flow
    let registry = state.registry.clone();
    let churn = tokio::spawn(async move {
        for _ in 0..50 {
            let (tx, rx) = mpsc::channel(64);
            let handle = registry.register(tx);
            tokio::task::yield_now().await;
            drop(rx);
            tokio::task::yield_now().await;
            registry.unregister(handle.id);
        }
    });

    for i in 0..20 {
        let result = state.gateway.deliver(&created_json(&format!("L{}", i), i)).await;
        assert!(matches!(result, Delivery::Delivered(_)));
        tokio::task::yield_now().await;
    }
    churn.await.unwrap();

    for mut rx in stable {
        let mut seen = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            seen.push(Event::from_json(&event_text(msg)).unwrap().timestamp());
        }
        // Every message exactly once, in publish order
        assert_eq!(seen, (0..20).collect::<Vec<i64>>());
    }
    assert_eq!(state.registry.len(), 10);
}

#[tokio::test]
async fn test_dead_connection_is_pruned_and_others_still_receive() {
    let state = test_state();
    state.gateway.activate().await;

    let (live_tx, mut live_rx) = mpsc::channel(8);
    let (dead_tx, dead_rx) = mpsc::channel(8);
    state.registry.register(live_tx);
    state.registry.register(dead_tx);
    drop(dead_rx);

    let result = state.gateway.deliver(&created_json("L1", 1)).await;

    assert_eq!(
        result,
        Delivery::Delivered(FanoutResult {
            delivered: 1,
            pruned: 1
        })
    );
    assert_eq!(state.registry.len(), 1);
    assert!(live_rx.try_recv().is_ok());
}

#[tokio::test]
async fn test_publishes_before_activation_flush_in_order() {
    let state = test_state();
    let (tx, mut rx) = mpsc::channel(8);
    state.registry.register(tx);
    assert!(state.gateway.ensure_started());

    // The bridge task has not run yet, so the subscription is still down
    assert!(!state.gateway.is_active());
    let mut ids = Vec::new();
    for (i, id) in ["L1", "L2", "L3"].iter().enumerate() {
        let draft = EventDraft::at(
            EventBody::Created(LinkRecord::new(*id, "https://example.com")),
            1_000 + i as i64,
        );
        ids.push(state.publisher.broadcast(draft).await.expect("publish accepted"));
    }
    assert!(rx.try_recv().is_err());

    wait_until_active(&state).await;
    ids.push(
        state
            .publisher
            .broadcast(EventBody::Deleted(DeletedLink::new("L1", "Example")))
            .await
            .unwrap(),
    );

    let mut order = Vec::new();
    for _ in 0..4 {
        let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event should arrive")
            .expect("channel open");
        order.push(Event::from_json(&event_text(msg)).unwrap().id().to_string());
    }
    assert_eq!(order, ids);

    let nothing_more = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
    assert!(nothing_more.is_err());
    assert_eq!(state.gateway.stats().buffered, 0);
}

#[tokio::test]
async fn test_relay_messages_before_activation_flush_in_order() {
    let state = test_state();
    let (tx, mut rx) = mpsc::channel(8);
    state.registry.register(tx);

    for (i, id) in ["m1", "m2", "m3"].iter().enumerate() {
        assert_eq!(
            state.gateway.deliver(&created_json(id, i as i64)).await,
            Delivery::Buffered
        );
    }
    assert!(rx.try_recv().is_err());

    assert_eq!(state.gateway.activate().await, 3);
    state.gateway.deliver(&created_json("m4", 3)).await;

    let order: Vec<String> = (0..4)
        .map(|_| Event::from_json(&event_text(rx.try_recv().unwrap())).unwrap().id().to_string())
        .collect();
    assert_eq!(order, vec!["msg_m1", "msg_m2", "msg_m3", "msg_m4"]);
}

#[tokio::test]
async fn test_malformed_relay_message_is_dropped() {
    let state = test_state();
    state.gateway.activate().await;
    let (tx, mut rx) = mpsc::channel(8);
    state.registry.register(tx);

    assert_eq!(state.gateway.deliver("{not json").await, Delivery::Rejected);
    assert_eq!(
        state
            .gateway
            .deliver(r#"{"type":"renamed","payload":{},"timestamp":1,"id":"x"}"#)
            .await,
        Delivery::Rejected
    );

    assert!(rx.try_recv().is_err());
    assert_eq!(state.gateway.stats().rejected, 2);
}

#[tokio::test]
async fn test_stop_closes_connections_with_shutdown_frame() {
    let state = test_state();
    let (tx, mut rx) = mpsc::channel(8);
    state.registry.register(tx);
    state.gateway.ensure_started();

    assert_eq!(state.gateway.stop().await, 1);
    assert_eq!(rx.recv().await, Some(OutboundMessage::shutdown()));
    assert!(state.registry.is_empty());
    assert!(!state.gateway.ensure_started());
}

// ============================================================================
// HTTP surface
// ============================================================================

#[tokio::test]
async fn test_plain_get_on_live_endpoint_is_426() {
    let app = create_app(test_state());

    let response = app
        .oneshot(Request::get("/api/websocket").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UPGRADE_REQUIRED);
    assert_eq!(response.headers()[header::UPGRADE], "websocket");
}

#[tokio::test]
async fn test_http_trigger_feeds_polling_and_snapshot() {
    let state = test_state();
    let app = create_app(state.clone());

    let body = json!({
        "type": "created",
        "payload": {"id": "L1", "url": "https://example.com", "title": "Example"}
    });
    let response = app
        .clone()
        .oneshot(
            Request::post("/api/v1/events")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let published = body_json(response).await;
    let id = published["id"].as_str().expect("id assigned").to_string();

    let response = app
        .clone()
        .oneshot(Request::get("/api/updates?since=0").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_json(response).await;
    assert!(page["timestamp"].as_i64().unwrap() > 0);
    let updates = page["updates"].as_array().unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["id"], id.as_str());
    assert_eq!(updates[0]["type"], "created");

    let response = app
        .oneshot(Request::get("/api/links").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let links = body_json(response).await;
    assert_eq!(links[0]["id"], "L1");
    assert_eq!(links[0]["title"], "Example");
}

async fn poll(app: &axum::Router, since: i64) -> Value {
    let response = app
        .clone()
        .oneshot(
            Request::get(format!("/api/updates?since={}", since))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

fn update_ids(page: &Value) -> Vec<String> {
    page["updates"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["payload"]["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_polling_returns_updates_in_timestamp_order() {
    let state = test_state();
    let app = create_app(state.clone());
    state.feed.record(&Event::from_parts(
        EventBody::Created(LinkRecord::new("L1", "http://x")),
        1000,
        "msg_L1",
    ));
    let cursor = poll(&app, 0).await["timestamp"].as_i64().unwrap();

    for (id, ts) in [("L3", 3000), ("L2", 2000)] {
        state.feed.record(&Event::from_parts(
            EventBody::Created(LinkRecord::new(id, "http://x")),
            ts,
            format!("msg_{}", id),
        ));
    }

    let page = poll(&app, cursor).await;
    assert_eq!(update_ids(&page), vec!["L2", "L3"]);
}

#[tokio::test]
async fn test_event_published_after_a_poll_reaches_the_next_poll() {
    let state = test_state();
    let app = create_app(state.clone());

    let first = poll(&app, 900).await;
    assert!(update_ids(&first).is_empty());
    let cursor = first["timestamp"].as_i64().unwrap();
    assert!(cursor >= 900);

    // Carries a timestamp older than the cursor the client already holds
    state
        .publisher
        .broadcast(EventDraft::at(
            EventBody::Created(LinkRecord::new("L1", "http://x")),
            1000,
        ))
        .await
        .expect("published");

    let second = poll(&app, cursor).await;
    assert_eq!(update_ids(&second), vec!["L1"]);
    assert!(second["timestamp"].as_i64().unwrap() > cursor);
    assert!(update_ids(&poll(&app, second["timestamp"].as_i64().unwrap()).await).is_empty());
}

#[tokio::test]
async fn test_invalid_event_body_is_rejected() {
    let app = create_app(test_state());

    let response = app
        .oneshot(
            Request::post("/api/v1/events")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"type":"created","payload":{"title":"no id"}}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_snapshot_events_cannot_be_published() {
    let state = test_state();
    let app = create_app(state.clone());

    let response = app
        .oneshot(
            Request::post("/api/v1/events")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"type":"initial_state_snapshot","payload":[]}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "UNSUPPORTED_EVENT");
    assert_eq!(state.publisher.stats().published, 0);
}

#[tokio::test]
async fn test_health_reports_memory_relay_as_degraded() {
    let app = create_app(test_state());

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["relay"]["backend"], "memory");
    assert_eq!(body["connections"], 0);
}

#[tokio::test]
async fn test_stats_and_metrics_endpoints() {
    let state = test_state();
    state
        .publisher
        .broadcast(EventBody::Deleted(DeletedLink::new("L9", "gone")))
        .await;
    let app = create_app(state);

    let response = app
        .clone()
        .oneshot(Request::get("/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let stats = body_json(response).await;
    assert_eq!(stats["publisher"]["published"], 1);
    assert_eq!(stats["relay"]["backend"], "memory");
    assert_eq!(stats["feed"]["deleted"], 1);

    let response = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()).unwrap();
    let names: HashSet<&str> = text
        .lines()
        .filter(|l| l.starts_with("bookmark_"))
        .filter_map(|l| l.split([' ', '{']).next())
        .collect();
    assert!(names.contains("bookmark_events_published_total"));
}
