//! Cross-cutting invariants: cleanup on removal, registry round-trips,
//! timeouts, and routing of qualified names.

use serde_json::json;

use hatago_common::config::{NamingStrategy, Timeouts};
use hatago_core::messages::ProgressToken;
use hatago_hub::UpstreamState;
use hatago_tests::{hub_with, mock_spec, rpc_request};

const BIN: &str = env!("CARGO_BIN_EXE_mock_upstream");

#[tokio::test]
async fn add_then_remove_restores_pre_state() {
    let hub = hub_with(NamingStrategy::Namespace, "_", &[]);
    let hash_before = hub.toolset_version().1;

    hub.add_server("s1", mock_spec(BIN, &[])).await.unwrap();
    assert_ne!(hub.toolset_version().1, hash_before);

    // Simulate an in-flight progress route owned by the upstream.
    hub.broker()
        .register_route(&ProgressToken::from("pt-x"), "some-session", "s1");

    hub.remove_server("s1").await.unwrap();

    // Registry content identical to the pre-state, no entries, no
    // routes, no record of the server.
    assert_eq!(hub.toolset_version().1, hash_before);
    assert_eq!(hub.broker().routes_for_upstream("s1"), 0);
    assert!(hub.server_ids().is_empty());
    assert!(hub.server_state("s1").is_none());
}

#[tokio::test]
async fn revision_is_monotonic_across_mutations() {
    let hub = hub_with(NamingStrategy::Namespace, "_", &[]);
    let mut last = hub.toolset_version().0;

    for id in ["a", "b"] {
        hub.add_server(id, mock_spec(BIN, &[])).await.unwrap();
        let revision = hub.toolset_version().0;
        assert!(revision > last);
        last = revision;
    }
    for id in ["a", "b"] {
        hub.remove_server(id).await.unwrap();
        let revision = hub.toolset_version().0;
        assert!(revision > last);
        last = revision;
    }
}

#[tokio::test]
async fn destroying_a_session_purges_its_routes() {
    let hub = hub_with(NamingStrategy::Namespace, "_", &[]);
    let session = hub.sessions().get_or_create(None);
    let _rx = hub.broker().attach_session(&session.id);
    hub.broker()
        .register_route(&ProgressToken::from("pt-s"), &session.id, "s1");

    assert!(hub.sessions().destroy(&session.id));
    assert!(hub.broker().route(&ProgressToken::from("pt-s")).is_none());
}

#[tokio::test]
async fn removing_unknown_server_fails() {
    let hub = hub_with(NamingStrategy::Namespace, "_", &[]);
    let err = hub.remove_server("ghost").await.unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[tokio::test]
async fn failed_server_can_be_removed() {
    let hub = hub_with(NamingStrategy::None, "_", &[]);
    hub.add_server("a", mock_spec(BIN, &[("MOCK_TOOL", "foo")]))
        .await
        .unwrap();
    hub.add_server("b", mock_spec(BIN, &[("MOCK_TOOL", "foo")]))
        .await
        .unwrap_err();
    assert_eq!(hub.server_state("b"), Some(UpstreamState::Error));

    // ERROR -> INACTIVE -> gone.
    hub.remove_server("b").await.unwrap();
    assert!(hub.server_state("b").is_none());
    assert_eq!(hub.server_state("a"), Some(UpstreamState::Active));
}

#[tokio::test]
async fn slow_call_times_out_with_descriptive_error() {
    let hub = hub_with(NamingStrategy::Namespace, "_", &[]);
    let mut spec = mock_spec(BIN, &[("MOCK_DELAY_MS", "5000")]);
    spec.timeouts = Some(Timeouts {
        request_ms: Some(250),
        ..Default::default()
    });
    hub.add_server("slow", spec).await.unwrap();

    let response = hub
        .handle_json_rpc_request(
            rpc_request(
                1,
                "tools/call",
                json!({ "name": "slow_echo", "arguments": { "msg": "x" } }),
            ),
            None,
        )
        .await
        .unwrap();

    let error = response.error.expect("call should time out");
    assert_eq!(error.code, -32603);
    assert!(error.data.unwrap()["message"]
        .as_str()
        .unwrap()
        .contains("timed out"));
}

#[tokio::test]
async fn qualified_name_with_unknown_upstream_is_rejected() {
    let hub = hub_with(NamingStrategy::Namespace, "_", &[]);
    hub.add_server("s1", mock_spec(BIN, &[])).await.unwrap();

    let response = hub
        .handle_json_rpc_request(
            rpc_request(
                1,
                "tools/call",
                json!({ "name": "ghost_echo", "arguments": {} }),
            ),
            None,
        )
        .await
        .unwrap();

    let error = response.error.unwrap();
    assert_eq!(error.code, -32602);
    assert!(error.data.unwrap()["message"]
        .as_str()
        .unwrap()
        .contains("unknown upstream 'ghost'"));
}

#[tokio::test]
async fn slash_form_routes_to_upstream() {
    let hub = hub_with(NamingStrategy::Namespace, "_", &[]);
    hub.add_server("s1", mock_spec(BIN, &[])).await.unwrap();

    let response = hub
        .handle_json_rpc_request(
            rpc_request(
                1,
                "tools/call",
                json!({ "name": "s1/echo", "arguments": { "msg": "via slash" } }),
            ),
            None,
        )
        .await
        .unwrap();
    assert_eq!(response.result.unwrap()["content"][0]["text"], "via slash");
}

#[tokio::test]
async fn tools_list_serves_public_descriptors() {
    let hub = hub_with(NamingStrategy::Namespace, "_", &[]);
    hub.add_server("s1", mock_spec(BIN, &[])).await.unwrap();

    let response = hub
        .handle_json_rpc_request(rpc_request(1, "tools/list", json!({})), None)
        .await
        .unwrap();
    let tools = response.result.unwrap()["tools"].clone();
    assert_eq!(tools.as_array().unwrap().len(), 1);
    assert_eq!(tools[0]["name"], "s1_echo");
    assert_eq!(tools[0]["description"], "Echoes its input");
}
