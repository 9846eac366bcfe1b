//! Session lifecycle tests
//!
//! Approval, trust, preemption and teardown of client connections.

use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use tests::async_helpers::{eventually, with_timeout, DEFAULT_TIMEOUT};
use tests::client::{connect, connect_active, tool_names, CountingClient};
use tests::events::{collect_events, wait_for_event};
use tests::harness::GatewayHarness;
use tests::{ClientIdentity, GatewayEvent, ScriptedPrompt};
use toolgate_core::{SessionPhase, TrustStore};

#[tokio::test]
async fn test_approved_client_lists_builtin_tools() {
    let harness = GatewayHarness::new(ScriptedPrompt::approving());

    let (id, client) = connect_active(&harness.gateway, CountingClient::new("cursor")).await;

    let mut names = tool_names(&client).await.unwrap();
    names.sort();
    assert_eq!(names, vec!["add", "echo"]);
    assert_eq!(harness.prompt.calls(), 1);
    assert_eq!(harness.prompt.requests()[0].client, ClientIdentity::new("cursor"));
    assert_eq!(
        harness.gateway.connection_for(&ClientIdentity::new("cursor")),
        Some(id)
    );
}

#[tokio::test]
async fn test_concurrent_remove_is_idempotent() {
    let harness = GatewayHarness::new(ScriptedPrompt::approving());
    let mut events = harness.gateway.subscribe();
    let (id, client) = connect_active(&harness.gateway, CountingClient::new("cursor")).await;

    let first = {
        let gateway = harness.gateway.clone();
        tokio::spawn(async move { gateway.remove_connection(id) })
    };
    let second = {
        let gateway = harness.gateway.clone();
        tokio::spawn(async move { gateway.remove_connection(id) })
    };
    let (first, second) = (first.await.unwrap(), second.await.unwrap());

    assert!(first ^ second, "exactly one removal must win");
    assert_eq!(harness.gateway.connection_count(), 0);
    assert!(!harness.gateway.remove_connection(id));

    let disconnects = collect_events(&mut events, Duration::from_millis(300))
        .await
        .into_iter()
        .filter(|event| {
            matches!(event, GatewayEvent::ClientDisconnected { connection_id, .. } if *connection_id == id)
        })
        .count();
    assert_eq!(disconnects, 1);

    // The client side sees the transport close
    with_timeout(DEFAULT_TIMEOUT, client.waiting()).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_connections_share_one_prompt() {
    let harness = GatewayHarness::new(ScriptedPrompt::approving().held());
    let cursor = ClientIdentity::new("cursor");

    let spawn_connect = || {
        let gateway = harness.gateway.clone();
        tokio::spawn(async move { connect(&gateway, CountingClient::new("cursor")).await })
    };
    let first = spawn_connect();
    let second = spawn_connect();

    let both_waiting = eventually(DEFAULT_TIMEOUT, || {
        harness.gateway.approvals().waiter_count(&cursor) == 2
    })
    .await;
    assert!(both_waiting);
    assert_eq!(harness.prompt.calls(), 1);
    for id in harness.gateway.connection_ids() {
        let session = harness.gateway.session(id).unwrap();
        assert_eq!(session.phase(), SessionPhase::AwaitingApproval);
    }

    harness.prompt.release();
    let (first_id, first_client) = first.await.unwrap();
    let (second_id, second_client) = second.await.unwrap();

    // The preempted one may lose its handshake reply, the survivor never does
    assert!(first_client.is_ok() || second_client.is_ok());
    assert_eq!(harness.prompt.calls(), 1);
    assert!(!harness.gateway.approvals().is_pending(&cursor));

    // Both were admitted under one identity; the later registration wins
    assert!(eventually(DEFAULT_TIMEOUT, || harness.gateway.connection_count() == 1).await);
    let owner = harness.gateway.connection_for(&cursor);
    assert!(owner == Some(first_id) || owner == Some(second_id));
}

#[tokio::test]
async fn test_distinct_clients_are_prompted_separately() {
    let harness = GatewayHarness::new(ScriptedPrompt::approving());

    let (_, cursor) = connect_active(&harness.gateway, CountingClient::new("cursor")).await;
    let (_, zed) = connect_active(&harness.gateway, CountingClient::new("zed")).await;

    assert_eq!(harness.prompt.calls(), 2);
    assert_eq!(harness.gateway.connection_count(), 2);
    assert!(!tool_names(&cursor).await.unwrap().is_empty());
    assert!(!tool_names(&zed).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_trusted_client_skips_prompt() {
    let trust = TrustStore::in_memory();
    trust.insert(&ClientIdentity::new("cursor")).await.unwrap();
    let harness = GatewayHarness::with_trust(ScriptedPrompt::denying(), trust);
    let mut events = harness.gateway.subscribe();

    let (id, client) = connect_active(&harness.gateway, CountingClient::new("cursor")).await;

    assert_eq!(harness.prompt.calls(), 0);
    assert!(!tool_names(&client).await.unwrap().is_empty());
    let event = wait_for_event(&mut events, DEFAULT_TIMEOUT, |event| {
        matches!(event, GatewayEvent::ClientAutoApproved { .. })
    })
    .await;
    assert_eq!(
        event,
        Some(GatewayEvent::ClientAutoApproved {
            connection_id: id,
            client: ClientIdentity::new("cursor"),
        })
    );
}

#[tokio::test]
async fn test_always_trust_skips_prompt_on_reconnect() {
    let harness = GatewayHarness::new(ScriptedPrompt::always_trusting());
    let cursor = ClientIdentity::new("cursor");

    let (first_id, first) = connect_active(&harness.gateway, CountingClient::new("cursor")).await;
    assert_eq!(harness.prompt.calls(), 1);
    assert!(harness.trust.contains(&cursor));

    first.cancel().await.unwrap();
    assert!(eventually(DEFAULT_TIMEOUT, || harness.gateway.session(first_id).is_none()).await);

    let (_, second) = connect_active(&harness.gateway, CountingClient::new("cursor")).await;
    assert_eq!(harness.prompt.calls(), 1);
    assert!(!tool_names(&second).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_new_connection_preempts_same_identity() {
    let harness = GatewayHarness::new(ScriptedPrompt::approving());
    let cursor = ClientIdentity::new("cursor");

    let (old_id, old) = connect_active(&harness.gateway, CountingClient::new("cursor")).await;
    let (new_id, new) = connect_active(&harness.gateway, CountingClient::new("cursor")).await;

    with_timeout(DEFAULT_TIMEOUT, old.waiting()).await.unwrap();
    assert!(harness.gateway.session(old_id).is_none());
    assert_eq!(harness.gateway.connection_for(&cursor), Some(new_id));
    assert_eq!(harness.gateway.connection_count(), 1);
    assert!(!tool_names(&new).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_denied_client_gets_error_and_is_removed() {
    let harness = GatewayHarness::new(ScriptedPrompt::denying());
    let mut events = harness.gateway.subscribe();

    let (id, client) = connect(&harness.gateway, CountingClient::new("intruder")).await;
    assert!(client.is_err());

    let denied = wait_for_event(&mut events, DEFAULT_TIMEOUT, |event| {
        matches!(event, GatewayEvent::ClientDenied { .. })
    })
    .await;
    assert!(matches!(denied, Some(GatewayEvent::ClientDenied { connection_id, .. }) if connection_id == id));

    let removed = wait_for_event(&mut events, DEFAULT_TIMEOUT, |event| {
        matches!(event, GatewayEvent::ClientDisconnected { connection_id, .. } if *connection_id == id)
    })
    .await;
    assert!(removed.is_some());
    assert_eq!(harness.gateway.connection_count(), 0);

    // A denial is not remembered
    let (_, again) = connect(&harness.gateway, CountingClient::new("intruder")).await;
    assert!(again.is_err());
    assert_eq!(harness.prompt.calls(), 2);
}

#[tokio::test]
async fn test_silent_connection_times_out() {
    let harness = GatewayHarness::new(ScriptedPrompt::approving());
    let mut events = harness.gateway.subscribe();

    // Keep the client end open but never send initialize
    let (_client_side, server_side) = tokio::io::duplex(1024);
    let id = harness.gateway.accept_connection(server_side);

    let removed = wait_for_event(&mut events, Duration::from_secs(6), |event| {
        matches!(event, GatewayEvent::ClientDisconnected { connection_id, .. } if *connection_id == id)
    })
    .await;
    assert!(removed.is_some(), "unfinished handshake should be dropped");
    assert_eq!(harness.prompt.calls(), 0);
    assert!(harness.gateway.session(id).is_none());
}

#[tokio::test]
async fn test_approval_wait_is_not_bounded_by_setup_timeout() {
    let harness = GatewayHarness::new(ScriptedPrompt::approving().held());
    let cursor = ClientIdentity::new("cursor");

    let pending = {
        let gateway = harness.gateway.clone();
        tokio::spawn(async move { connect(&gateway, CountingClient::new("cursor")).await })
    };
    assert!(eventually(DEFAULT_TIMEOUT, || harness.gateway.approvals().is_pending(&cursor)).await);

    // Longer than the two second setup timeout of the test config
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(harness.gateway.connection_count(), 1);

    harness.prompt.release();
    let (_, client) = pending.await.unwrap();
    assert!(client.is_ok());
}

#[tokio::test]
async fn test_approved_client_that_never_initializes_times_out() {
    let harness = GatewayHarness::new(ScriptedPrompt::approving());
    let mut events = harness.gateway.subscribe();
    let lazy = ClientIdentity::new("lazy");

    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let id = harness.gateway.accept_connection(server_side);
    let (read_half, mut write_half) = tokio::io::split(client_side);

    let initialize = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": {"name": "lazy", "version": "0.0.0"}
        }
    });
    write_half
        .write_all(format!("{}\n", initialize).as_bytes())
        .await
        .unwrap();

    // The reply arrives, then the client goes quiet without `notifications/initialized`
    let mut lines = BufReader::new(read_half).lines();
    let reply = with_timeout(DEFAULT_TIMEOUT, lines.next_line()).await.unwrap().unwrap();
    let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
    assert!(reply.get("result").is_some(), "unexpected reply: {reply}");
    assert_eq!(harness.gateway.connection_for(&lazy), Some(id));
    assert_eq!(
        harness.gateway.session(id).map(|session| session.phase()),
        Some(SessionPhase::AwaitingApproval)
    );

    let removed = wait_for_event(&mut events, Duration::from_secs(6), |event| {
        matches!(event, GatewayEvent::ClientDisconnected { connection_id, .. } if *connection_id == id)
    })
    .await;
    assert!(removed.is_some(), "approved but uninitialized session should be dropped");
    assert_eq!(harness.gateway.connection_count(), 0);
    assert_eq!(harness.prompt.calls(), 1);
}
