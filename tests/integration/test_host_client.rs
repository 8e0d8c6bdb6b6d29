//! Integration tests for the host client's error mapping.
//!
//! A bare HTTP failure or an unreachable host is a network error; a refusal
//! that explains itself is a server error whose message reaches the learner
//! verbatim; an undecodable body is a malformed response.

mod common;

use std::time::Duration;

use codelab_widget::host::{ProjectApi, SandboxApi};
use codelab_widget::websocket::MessagePayload;
use codelab_widget::{ErrorCategory, HostClient, SubmitRequest, WidgetError, WidgetEvent};
use common::{collect_until, host_with_main, start_widget, widget_config, FakeHost};

async fn client_for(host: &FakeHost) -> HostClient {
    HostClient::new(host.base_url(), Duration::from_secs(5)).expect("Failed to build client")
}

// ============================================================================
// Transport Errors
// ============================================================================

/// A 500 without an explanatory body is a network error, not a server error.
#[tokio::test]
async fn test_bare_http_error_is_transport() {
    let host = FakeHost::start(host_with_main("print(1)")).await;
    host.fail("get_submission_result_handler", 500, "boom");
    let client = client_for(&host).await;

    let err = client.poll("token-1").await.unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Transport);
    let WidgetError::Transport { endpoint, message } = &err else {
        panic!("Expected Transport, got: {err:?}");
    };
    assert_eq!(endpoint, "get_submission_result_handler");
    assert!(message.contains("500"), "status missing from: {message}");
    assert!(message.contains("boom"));
}

/// A host that is not listening is a network error.
#[tokio::test]
async fn test_unreachable_host_is_transport() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");
    drop(listener);

    let client = HostClient::new(format!("http://{addr}/handler"), Duration::from_secs(2))
        .expect("Failed to build client");
    let err = client
        .submit(&SubmitRequest::code("print(1)"))
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Transport);
}

/// A poll failing mid-submission alerts with a network error, not a timeout.
#[tokio::test]
async fn test_poll_http_error_alerts_network_error() {
    let host = FakeHost::start(host_with_main("print(1)")).await;
    let handle = start_widget(widget_config(&host)).await;
    host.fail("get_submission_result_handler", 502, "");
    let mut events = handle.events().subscribe();

    handle.submit().await.expect("Failed to submit");
    let seen = collect_until(&mut events, |e| {
        matches!(e, WidgetEvent::Submitting(payload) if !payload.active)
    })
    .await;

    let alert = seen
        .iter()
        .find_map(|e| match e {
            WidgetEvent::Alert(MessagePayload { message }) => Some(message.clone()),
            _ => None,
        })
        .expect("Expected an alert");
    assert!(alert.starts_with("Network error"), "unexpected alert: {alert}");
    assert_eq!(host.state().polls, 0, "the canned answer bypasses the poll handler");
}

// ============================================================================
// Server Errors
// ============================================================================

/// An error status with a `message` body is a server error shown verbatim.
#[tokio::test]
async fn test_error_status_with_message_is_server_error() {
    let host = FakeHost::start(host_with_main("print(1)")).await;
    host.fail("create_file", 400, r#"{"message": "Quota exceeded for this course"}"#);
    let client = client_for(&host).await;

    let err = client
        .create_file("extra.py", "", codelab_widget::FileType::Python)
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Server);
    assert_eq!(err.to_string(), "Quota exceeded for this course");
}

/// `success: false` on a 200 is a server error carrying the host's message.
#[tokio::test]
async fn test_success_false_is_server_error() {
    let host = FakeHost::start(host_with_main("print(1)")).await;
    host.fail(
        "rename_file",
        200,
        r#"{"success": false, "message": "Renaming is disabled"}"#,
    );
    let client = client_for(&host).await;

    let err = client.rename_file("a.py", "b.py").await.unwrap_err();

    assert!(matches!(&err, WidgetError::Server { endpoint, .. } if endpoint == "rename_file"));
    assert_eq!(err.alert_text(), "Renaming is disabled");
}

/// A delete the host refuses alerts with its message and keeps local state.
#[tokio::test]
async fn test_rejected_delete_alerts_host_message() {
    let host = FakeHost::start(host_with_main("print(1)")).await;
    let handle = start_widget(widget_config(&host)).await;
    handle
        .create_file("scratch.py", "")
        .await
        .expect("Failed to create file");
    host.fail(
        "delete_file",
        200,
        r#"{"success": false, "message": "Files cannot be deleted after the deadline"}"#,
    );
    let mut events = handle.events().subscribe();

    handle
        .delete_file("scratch.py")
        .await
        .expect("Local delete should succeed");
    let seen = collect_until(&mut events, |e| matches!(e, WidgetEvent::Alert(_))).await;

    assert_eq!(
        seen.last(),
        Some(&WidgetEvent::Alert(MessagePayload {
            message: "Files cannot be deleted after the deadline".to_string(),
        }))
    );
    let snapshot = handle.snapshot().await.expect("Failed to get snapshot");
    assert!(!snapshot.project.contains("scratch.py"));
    assert!(host.state().files.contains_key("scratch.py"));
}

// ============================================================================
// Malformed Responses
// ============================================================================

/// A 200 whose body is not the expected JSON is a malformed response.
#[tokio::test]
async fn test_undecodable_body_is_malformed() {
    let host = FakeHost::start(host_with_main("print(1)")).await;
    host.fail("get_project_structure", 200, "<html>Login required</html>");
    let client = client_for(&host).await;

    let err = client.project_structure().await.unwrap_err();

    let WidgetError::MalformedResponse { endpoint, message } = &err else {
        panic!("Expected MalformedResponse, got: {err:?}");
    };
    assert_eq!(endpoint, "get_project_structure");
    assert!(message.contains("Login required"));
}
