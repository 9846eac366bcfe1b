//! Network listener tests
//!
//! Real TCP listener on loopback with a recording advertiser.

use pretty_assertions::assert_eq;
use rmcp::ServiceExt;
use tokio::net::TcpStream;

use tests::async_helpers::{eventually, with_timeout, DEFAULT_TIMEOUT};
use tests::client::{tool_names, CountingClient};
use tests::events::wait_for_event;
use tests::harness::GatewayHarness;
use tests::{GatewayEvent, ScriptedPrompt};

#[tokio::test]
async fn test_start_advertises_and_accepts_tcp_clients() {
    let harness = GatewayHarness::new(ScriptedPrompt::approving());
    let mut events = harness.gateway.subscribe();

    let port = harness.gateway.start().await.unwrap();
    assert_ne!(port, 0);
    assert_eq!(harness.gateway.listening_port().await, Some(port));

    let ready = wait_for_event(&mut events, DEFAULT_TIMEOUT, |event| {
        matches!(event, GatewayEvent::ListenerReady { .. })
    })
    .await;
    assert_eq!(ready, Some(GatewayEvent::ListenerReady { port }));

    let registration = harness.advertiser.current().expect("listener not advertised");
    assert_eq!(registration.port, port);
    assert_eq!(registration.service_type, "_mcp._tcp");
    assert_eq!(registration.instance_name, "toolgate-test");

    let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let client = CountingClient::new("cursor").serve(stream).await.unwrap();
    let mut names = tool_names(&client).await.unwrap();
    names.sort();
    assert_eq!(names, vec!["add", "echo"]);
    assert_eq!(harness.gateway.connection_count(), 1);

    harness.gateway.stop().await;

    assert!(harness.advertiser.current().is_none());
    assert_eq!(harness.advertiser.withdrawals(), 1);
    assert_eq!(harness.gateway.listening_port().await, None);
    assert_eq!(harness.gateway.connection_count(), 0);
    with_timeout(DEFAULT_TIMEOUT, client.waiting()).await.unwrap();
}

#[tokio::test]
async fn test_start_is_idempotent_while_listening() {
    let harness = GatewayHarness::new(ScriptedPrompt::approving());

    let first = harness.gateway.start().await.unwrap();
    let second = harness.gateway.start().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(harness.advertiser.history().len(), 1);
    harness.gateway.stop().await;
}

#[tokio::test]
async fn test_gateway_restarts_after_stop() {
    let harness = GatewayHarness::new(ScriptedPrompt::approving());

    harness.gateway.start().await.unwrap();
    harness.gateway.stop().await;
    let port = harness.gateway.start().await.unwrap();

    assert_eq!(harness.advertiser.current().map(|r| r.port), Some(port));
    assert_eq!(harness.advertiser.history().len(), 2);

    let _stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    assert!(eventually(DEFAULT_TIMEOUT, || harness.gateway.connection_count() == 1).await);
    harness.gateway.stop().await;
}
