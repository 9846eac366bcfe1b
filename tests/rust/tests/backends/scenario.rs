//! Mixed backend scenario
//!
//! Remote servers and a broken subprocess configured next to the built-in
//! provider. Neither failure may disturb clients or the built-in tools.
//! Whether the public remote comes up depends on the network, so only its
//! registration is checked.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;

use tests::async_helpers::DEFAULT_TIMEOUT;
use tests::client::{call, connect_active, first_text, tool_names, CountingClient};
use tests::events::wait_for_event;
use tests::fixtures::arguments;
use tests::harness::GatewayHarness;
use tests::{GatewayEvent, ProviderId, ScriptedPrompt, ServerEntry};
use toolgate_core::ProviderKind;

#[tokio::test]
async fn test_builtins_survive_failing_backends() {
    tests::init_tracing();
    let harness = GatewayHarness::new(ScriptedPrompt::approving());
    let mut events = harness.gateway.subscribe();
    let (_, client) = connect_active(&harness.gateway, CountingClient::new("cursor")).await;

    let search = ServerEntry::remote("search", "https://example.com/sse");
    let unreachable = ServerEntry::remote("offline", "http://127.0.0.1:1/mcp");
    let local = ServerEntry::subprocess("echo", "echo", ["hi"]);
    harness
        .gateway
        .apply_servers(&[search, unreachable.clone(), local.clone()])
        .await;

    let registry = harness.gateway.registry();
    assert_eq!(registry.len(), 4);
    assert_eq!(
        registry
            .entries()
            .iter()
            .map(|entry| entry.kind())
            .collect::<Vec<_>>(),
        vec![
            ProviderKind::Builtin,
            ProviderKind::Remote,
            ProviderKind::Remote,
            ProviderKind::Subprocess,
        ]
    );

    // Remotes are activated in the background; the closed port fails fast
    let offline_id = ProviderId::from(unreachable.id).to_string();
    let failed = wait_for_event(&mut events, Duration::from_secs(10), |event| {
        matches!(event, GatewayEvent::BackendActivationFailed { provider_id, .. } if *provider_id == offline_id)
    })
    .await;
    assert!(failed.is_some(), "unreachable remote should report a failure");

    let local_id = ProviderId::from(local.id);
    assert!(harness.gateway.activate_provider(&local_id).await.is_err());
    assert!(!registry.get(&local_id).unwrap().provider.is_activated());

    let mut names = tool_names(&client).await.unwrap();
    names.sort();
    assert_eq!(names, vec!["add", "echo"]);

    let result = call(&client, "echo", arguments(json!({"message": "still here"})))
        .await
        .unwrap();
    assert_eq!(first_text(&result).as_deref(), Some("still here"));

    harness.gateway.stop().await;
}

#[tokio::test]
async fn test_removing_servers_keeps_builtins_first() {
    let harness = GatewayHarness::new(ScriptedPrompt::approving());
    let handler = CountingClient::new("cursor");
    let (_, _client) = connect_active(&harness.gateway, handler.clone()).await;

    let remote = ServerEntry::remote("offline", "http://127.0.0.1:1/mcp");
    harness.gateway.apply_servers(std::slice::from_ref(&remote)).await;
    assert_eq!(harness.gateway.registry().len(), 2);

    harness.gateway.apply_servers(&[]).await;
    let registry = harness.gateway.registry();
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.entries()[0].kind(), ProviderKind::Builtin);

    // One notification per registry swap
    assert!(handler.wait_for_list_changed(2, DEFAULT_TIMEOUT).await);
}
