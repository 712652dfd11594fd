//! End-to-end scenarios against the scripted mock upstream.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use hatago_common::config::NamingStrategy;
use hatago_hub::UpstreamState;
use hatago_tests::{config_of, hub_with, mock_spec, rpc_request};

const BIN: &str = env!("CARGO_BIN_EXE_mock_upstream");

#[tokio::test]
async fn echo_call_with_namespace_strategy() {
    let hub = hub_with(NamingStrategy::Namespace, "_", &[]);
    hub.add_server("s1", mock_spec(BIN, &[])).await.unwrap();
    assert_eq!(hub.server_state("s1"), Some(UpstreamState::Active));

    let called: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&called);
    hub.on("tool:called", move |payload| {
        sink.lock().unwrap().push(payload.clone());
    });

    let response = hub
        .handle_json_rpc_request(
            rpc_request(
                1,
                "tools/call",
                json!({ "name": "s1_echo", "arguments": { "msg": "hi" } }),
            ),
            None,
        )
        .await
        .unwrap();

    let result = response.result.expect("call should succeed");
    assert_eq!(result["content"][0]["text"], "hi");

    let events = called.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["serverId"], "s1");
    assert_eq!(events[0]["publicName"], "s1_echo");
}

#[tokio::test]
async fn progress_forwarding_order_and_isolation() {
    let hub = hub_with(NamingStrategy::Namespace, "_", &[]);
    hub.add_server("s1", mock_spec(BIN, &[("MOCK_PROGRESS", "10,100")]))
        .await
        .unwrap();

    let session = hub.sessions().get_or_create(None);
    let other = hub.sessions().get_or_create(None);
    let mut rx = hub.broker().attach_session(&session.id);
    let mut other_rx = hub.broker().attach_session(&other.id);

    let response = hub
        .handle_json_rpc_request(
            rpc_request(
                1,
                "tools/call",
                json!({
                    "name": "s1_echo",
                    "arguments": { "msg": "go" },
                    "_meta": { "progressToken": "pt-1" },
                }),
            ),
            Some(&session.id),
        )
        .await
        .unwrap();
    assert_eq!(response.result.unwrap()["content"][0]["text"], "go");

    // Exactly the two updates, in order, token intact, before the result
    // was returned.
    let first = rx.try_recv().expect("first progress update");
    let second = rx.try_recv().expect("second progress update");
    assert!(rx.try_recv().is_err());

    assert_eq!(first.method, "notifications/progress");
    assert_eq!(first.params.as_ref().unwrap()["progressToken"], "pt-1");
    assert_eq!(first.params.as_ref().unwrap()["progress"], 10.0);
    assert_eq!(second.params.as_ref().unwrap()["progress"], 100.0);

    // Never another session's.
    assert!(other_rx.try_recv().is_err());

    // The route dies with the call.
    assert_eq!(hub.broker().routes_for_upstream("s1"), 0);
}

#[tokio::test]
async fn naming_collision_leaves_registry_unchanged() {
    let hub = hub_with(NamingStrategy::None, "_", &[]);
    hub.add_server("a", mock_spec(BIN, &[("MOCK_TOOL", "foo")]))
        .await
        .unwrap();
    let (revision, hash) = hub.toolset_version();

    let err = hub
        .add_server("b", mock_spec(BIN, &[("MOCK_TOOL", "foo")]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("duplicate public name 'foo'"));

    assert_eq!(hub.server_state("b"), Some(UpstreamState::Error));
    assert_eq!(hub.toolset_version(), (revision, hash));

    // The tool still routes to its original owner.
    let response = hub
        .handle_json_rpc_request(
            rpc_request(2, "tools/call", json!({ "name": "foo", "arguments": {} })),
            None,
        )
        .await
        .unwrap();
    assert!(response.result.is_some());
}

#[tokio::test]
async fn tag_filter_admits_only_intersecting_upstreams() {
    let hub = hub_with(NamingStrategy::Namespace, "_", &["prod"]);

    let config = config_of(vec![
        ("x", {
            let mut spec = mock_spec(BIN, &[]);
            spec.tags = vec!["dev".to_string()];
            spec
        }),
        ("y", {
            let mut spec = mock_spec(BIN, &[]);
            spec.tags = vec!["prod".to_string()];
            spec
        }),
        ("z", mock_spec(BIN, &[])),
    ]);

    hub.start(&config).await.unwrap();

    assert_eq!(hub.server_ids(), vec!["y".to_string()]);
    assert_eq!(hub.server_state("y"), Some(UpstreamState::Active));
    hub.stop().await;
}

#[tokio::test]
async fn internal_servers_resource_tracks_upstreams() {
    let hub = hub_with(NamingStrategy::Namespace, "_", &[]);
    hub.start(&config_of(vec![])).await.unwrap();

    let read = |hub: &hatago_hub::Hub| {
        let hub = hub.clone();
        async move {
            let response = hub
                .handle_json_rpc_request(
                    rpc_request(1, "resources/read", json!({ "uri": "hatago://servers" })),
                    None,
                )
                .await
                .unwrap();
            let result = response.result.unwrap();
            let text = result["contents"][0]["text"].as_str().unwrap().to_string();
            serde_json::from_str::<Value>(&text).unwrap()
        }
    };

    let before = read(&hub).await;
    assert_eq!(before["total"], 0);
    assert_eq!(before["servers"], json!([]));

    hub.add_server("t", mock_spec(BIN, &[])).await.unwrap();

    let after = read(&hub).await;
    assert_eq!(after["total"], 1);
    assert_eq!(after["servers"][0]["id"], "t");
    hub.stop().await;
}

#[tokio::test]
async fn invalid_transition_is_rejected_without_side_effects() {
    let hub = hub_with(NamingStrategy::Namespace, "_", &[]);
    hub.add_server("s1", mock_spec(BIN, &[])).await.unwrap();

    let history_before = hub.server_history("s1").unwrap();
    assert_eq!(history_before.len(), 2); // INACTIVE->ACTIVATING->ACTIVE

    // Adding the same id again must not disturb the running upstream.
    let err = hub.add_server("s1", mock_spec(BIN, &[])).await.unwrap_err();
    assert!(err.to_string().contains("already exists"));

    assert_eq!(hub.server_state("s1"), Some(UpstreamState::Active));
    assert_eq!(hub.server_history("s1").unwrap().len(), 2);
}
