//! Subprocess backend tests
//!
//! Spawns the `echo-mcp-server` helper binary as a real stdio MCP server.

use pretty_assertions::assert_eq;
use serde_json::json;

use tests::async_helpers::DEFAULT_TIMEOUT;
use tests::client::{call, connect_active, first_text, tool_names, CountingClient};
use tests::events::wait_for_event;
use tests::fixtures::arguments;
use tests::harness::GatewayHarness;
use tests::{GatewayEvent, ProviderId, ScriptedPrompt, ServerEntry};
use toolgate_core::ActivationError;

const ECHO_SERVER: &str = env!("CARGO_BIN_EXE_echo-mcp-server");

fn echo_server_entry() -> ServerEntry {
    ServerEntry::subprocess("echo-server", ECHO_SERVER, Vec::<String>::new())
}

#[tokio::test]
async fn test_activated_subprocess_tools_reach_clients() {
    tests::init_tracing();
    let harness = GatewayHarness::bare(ScriptedPrompt::approving());
    let handler = CountingClient::new("cursor");
    let (_, client) = connect_active(&harness.gateway, handler.clone()).await;
    assert!(tool_names(&client).await.unwrap().is_empty());

    let entry = echo_server_entry();
    let provider_id = ProviderId::from(entry.id);
    harness.gateway.apply_servers(std::slice::from_ref(&entry)).await;

    // Registered but not running: nothing to see yet
    assert!(harness.gateway.visible_tools().is_empty());

    harness.gateway.activate_provider(&provider_id).await.unwrap();
    assert!(handler.wait_for_list_changed(2, DEFAULT_TIMEOUT).await);

    let mut names = tool_names(&client).await.unwrap();
    names.sort();
    assert_eq!(names, vec!["add", "echo"]);

    let result = call(&client, "echo", arguments(json!({"message": "through the pipe"})))
        .await
        .unwrap();
    assert_eq!(result.is_error, Some(false));
    assert_eq!(first_text(&result).as_deref(), Some("through the pipe"));

    let sum = call(&client, "add", arguments(json!({"a": 20, "b": 22})))
        .await
        .unwrap();
    assert_eq!(first_text(&sum).as_deref(), Some("42"));

    assert!(harness.gateway.deactivate_provider(&provider_id).await);
    assert!(tool_names(&client).await.unwrap().is_empty());
    harness.gateway.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_failed_activation_is_retryable_after_reconfigure() {
    let harness = GatewayHarness::bare(ScriptedPrompt::approving());
    let mut events = harness.gateway.subscribe();

    // `echo hi` is not an MCP server
    let broken = ServerEntry::subprocess("echo", "echo", ["hi"]);
    let provider_id = ProviderId::from(broken.id);
    harness.gateway.apply_servers(std::slice::from_ref(&broken)).await;

    let err = harness.gateway.activate_provider(&provider_id).await.unwrap_err();
    assert!(
        matches!(
            err,
            ActivationError::ExitedImmediately { .. } | ActivationError::Handshake(_)
        ),
        "unexpected error: {err}"
    );
    let failed = wait_for_event(&mut events, DEFAULT_TIMEOUT, |event| {
        matches!(event, GatewayEvent::BackendActivationFailed { .. })
    })
    .await;
    assert!(matches!(
        failed,
        Some(GatewayEvent::BackendActivationFailed { provider_id: ref id, .. }) if id == provider_id.as_str()
    ));
    assert!(harness.gateway.visible_tools().is_empty());

    // Same server id, fixed command: the same backend is reused and retried
    let fixed = echo_server_entry().with_id(broken.id);
    harness.gateway.apply_servers(&[fixed]).await;
    harness.gateway.activate_provider(&provider_id).await.unwrap();

    let activated = wait_for_event(&mut events, DEFAULT_TIMEOUT, |event| {
        matches!(event, GatewayEvent::BackendActivated { .. })
    })
    .await;
    assert_eq!(
        activated,
        Some(GatewayEvent::BackendActivated {
            provider_id: provider_id.to_string(),
            tool_count: 2,
        })
    );
    assert_eq!(harness.gateway.visible_tools().len(), 2);
    harness.gateway.stop().await;
}

#[tokio::test]
async fn test_edited_running_server_is_restarted() {
    let harness = GatewayHarness::bare(ScriptedPrompt::approving());
    let entry = echo_server_entry();
    let provider_id = ProviderId::from(entry.id);
    harness.gateway.apply_servers(std::slice::from_ref(&entry)).await;
    harness.gateway.activate_provider(&provider_id).await.unwrap();
    assert_eq!(harness.gateway.visible_tools().len(), 2);

    let mut events = harness.gateway.subscribe();
    let edited = entry.clone().with_setting("ECHO_SERVER_MODE", "edited");
    harness.gateway.apply_servers(&[edited]).await;

    // Stopped for the edit, then brought back without a host call
    let restarted = wait_for_event(&mut events, DEFAULT_TIMEOUT, |event| {
        matches!(event, GatewayEvent::BackendActivated { .. })
    })
    .await;
    assert_eq!(
        restarted,
        Some(GatewayEvent::BackendActivated {
            provider_id: provider_id.to_string(),
            tool_count: 2,
        })
    );
    assert!(harness.gateway.registry().get(&provider_id).unwrap().provider.is_activated());
    assert_eq!(harness.gateway.visible_tools().len(), 2);

    // An edit to a stopped server leaves it stopped
    harness.gateway.deactivate_provider(&provider_id).await;
    let mut events = harness.gateway.subscribe();
    harness
        .gateway
        .apply_servers(&[entry.with_setting("ECHO_SERVER_MODE", "again")])
        .await;
    let activated = wait_for_event(&mut events, std::time::Duration::from_millis(500), |event| {
        matches!(event, GatewayEvent::BackendActivated { .. })
    })
    .await;
    assert!(activated.is_none());
    assert!(harness.gateway.visible_tools().is_empty());
    harness.gateway.stop().await;
}

#[tokio::test]
async fn test_unknown_command_fails_without_affecting_others() {
    let harness = GatewayHarness::new(ScriptedPrompt::approving());
    let missing = ServerEntry::subprocess("ghost", "toolgate-definitely-not-installed", ["--stdio"]);
    let provider_id = ProviderId::from(missing.id);
    harness.gateway.apply_servers(&[missing]).await;

    let err = harness.gateway.activate_provider(&provider_id).await.unwrap_err();
    assert!(matches!(err, ActivationError::CommandNotFound { .. }));

    let (_, client) = connect_active(&harness.gateway, CountingClient::new("cursor")).await;
    let mut names = tool_names(&client).await.unwrap();
    names.sort();
    assert_eq!(names, vec!["add", "echo"]);
}

#[tokio::test]
async fn test_unknown_provider_id_is_rejected() {
    let harness = GatewayHarness::new(ScriptedPrompt::approving());
    let err = harness
        .gateway
        .activate_provider(&ProviderId::new("nope"))
        .await
        .unwrap_err();
    assert!(matches!(err, ActivationError::InvalidConfig(_)));
    assert!(!harness.gateway.deactivate_provider(&ProviderId::new("nope")).await);
}
