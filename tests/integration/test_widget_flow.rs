//! End-to-end tests of a widget driving a host over HTTP.
//!
//! Each test starts an in-process host speaking the handler protocol and a
//! widget using the real `HostClient`, then exercises submissions, file
//! management, autosave and the widget's own HTTP API.

mod common;

use std::time::Duration;

use codelab_report::TestCase;
use codelab_widget::websocket::{OutputPayload, SubmittingPayload, TabPayload};
use codelab_widget::{Tab, WidgetError, WidgetEvent, WidgetSnapshot};
use common::{collect_until, host_with_main, start_server, start_widget, widget_config, FakeHost};
use serde_json::{json, Value};

fn is_idle(event: &WidgetEvent) -> bool {
    matches!(
        event,
        WidgetEvent::Submitting(SubmittingPayload { active: false })
    )
}

// ============================================================================
// Submission Tests
// ============================================================================

/// A submission polls until the sandbox finishes, shows the output and
/// then the feedback.
#[tokio::test]
async fn test_submission_polls_then_shows_output_and_feedback() {
    let mut state = host_with_main("print('Hello from the sandbox')");
    state.pending_polls = 3;
    let host = FakeHost::start(state).await;
    let handle = start_widget(widget_config(&host)).await;
    let mut events = handle.events().subscribe();

    handle.submit().await.expect("Failed to submit");
    let seen = collect_until(&mut events, is_idle).await;

    let names: Vec<&str> = seen.iter().map(WidgetEvent::event_name).collect();
    assert_eq!(
        names,
        vec![
            "submitting",
            "output",
            "tab_switched",
            "feedback",
            "tab_switched",
            "submitting"
        ]
    );
    assert_eq!(
        seen[1],
        WidgetEvent::Output(OutputPayload {
            stdout: "Hello from the sandbox".to_string(),
            stderr: String::new(),
        })
    );
    assert_eq!(seen[2], WidgetEvent::TabSwitched(TabPayload { tab: Tab::Output }));
    assert_eq!(seen[4], WidgetEvent::TabSwitched(TabPayload { tab: Tab::Feedback }));

    let host_state = host.state();
    assert_eq!(host_state.polls, 4, "three pending answers, then the result");
    assert_eq!(host_state.submissions.len(), 1);
    let (handler, body) = &host_state.submissions[0];
    assert_eq!(handler, "submit_project");
    assert_eq!(body["files"]["main.py"], "print('Hello from the sandbox')");
    assert_eq!(host_state.feedback_requests[0]["stdout"], "Hello from the sandbox");
}

/// A sandbox that never finishes times out after the poll limit.
#[tokio::test]
async fn test_submission_times_out_after_poll_limit() {
    let mut state = host_with_main("while True: pass");
    state.pending_polls = u32::MAX;
    let host = FakeHost::start(state).await;
    let handle = start_widget(widget_config(&host)).await;
    let mut events = handle.events().subscribe();

    handle.submit().await.expect("Failed to submit");
    let seen = collect_until(&mut events, is_idle).await;

    assert!(
        seen.iter().any(|e| matches!(e, WidgetEvent::Alert(_))),
        "Expected a timeout alert, got: {seen:?}"
    );
    assert!(!seen.iter().any(|e| matches!(e, WidgetEvent::Output(_))));
    assert_eq!(host.state().polls, 5);
    assert!(host.state().feedback_requests.is_empty());
}

/// A second submission is rejected while the first is pending.
#[tokio::test]
async fn test_second_submission_rejected_while_pending() {
    let mut state = host_with_main("print(1)");
    state.pending_polls = 2;
    let host = FakeHost::start(state).await;
    let handle = start_widget(widget_config(&host)).await;
    let mut events = handle.events().subscribe();

    handle.submit().await.expect("Failed to submit");
    let second = handle.submit().await;
    assert!(matches!(second, Err(WidgetError::SubmissionInProgress)));

    collect_until(&mut events, is_idle).await;
    assert_eq!(host.state().submissions.len(), 1);
}

// ============================================================================
// Project Tests
// ============================================================================

/// File operations are mirrored to the host.
#[tokio::test]
async fn test_file_operations_are_persisted() {
    let host = FakeHost::start(host_with_main("import util")).await;
    let handle = start_widget(widget_config(&host)).await;

    handle
        .create_file("util.py", "def helper():\n    return 1\n")
        .await
        .expect("Failed to create file");
    handle
        .rename_file("util.py", "helpers.py")
        .await
        .expect("Failed to rename file");
    handle
        .create_file("notes.txt", "")
        .await
        .expect("Failed to create file");
    handle
        .delete_file("notes.txt")
        .await
        .expect("Failed to delete file");

    let stored: Vec<String> = host.state().files.keys().cloned().collect();
    assert_eq!(stored, vec!["helpers.py", "main.py"]);
    assert_eq!(host.state().files["helpers.py"].1, "python");

    let snapshot = handle.snapshot().await.expect("Failed to get snapshot");
    assert_eq!(snapshot.project.current_file(), Some("helpers.py"));
    assert!(snapshot.project.contains("helpers.py"));
    assert!(!snapshot.project.contains("notes.txt"));
}

/// The entry file can never be removed.
#[tokio::test]
async fn test_entry_file_is_protected() {
    let host = FakeHost::start(host_with_main("print(1)")).await;
    let handle = start_widget(widget_config(&host)).await;

    let result = handle.delete_file("main.py").await;
    assert!(matches!(result, Err(WidgetError::ProtectedFile { .. })));
    assert!(host.state().files.contains_key("main.py"));
}

/// Edits are buffered and saved after the quiet window.
#[tokio::test]
async fn test_editor_changes_are_autosaved() {
    let host = FakeHost::start(host_with_main("print(1)")).await;
    let handle = start_widget(widget_config(&host)).await;

    for content in ["print(2)", "print(3)", "print(4)"] {
        handle
            .bridge()
            .deliver_raw(&json!({"type": "contentChanged", "file": "main.py", "content": content}).to_string())
            .expect("Failed to deliver frame");
    }

    let dirty = handle.snapshot().await.expect("Failed to get snapshot");
    assert!(dirty.project.is_dirty("main.py"));

    tokio::time::sleep(Duration::from_millis(300)).await;

    let saved = handle.snapshot().await.expect("Failed to get snapshot");
    assert!(!saved.project.is_dirty("main.py"));
    assert_eq!(saved.project.file("main.py").map(|f| f.content.as_str()), Some("print(4)"));
    assert_eq!(
        host.state().saves,
        vec![("main.py".to_string(), "print(4)".to_string())],
        "only the last content of the burst is saved"
    );
}

/// Resetting reloads the cleared project from the host.
#[tokio::test]
async fn test_reset_reloads_default_project() {
    let mut state = host_with_main("print('custom')");
    state
        .files
        .insert("extra.py".to_string(), ("x = 1".to_string(), "python".to_string()));
    let host = FakeHost::start(state).await;
    let handle = start_widget(widget_config(&host)).await;
    assert_eq!(handle.snapshot().await.expect("snapshot").project.len(), 2);

    handle.reset().await.expect("Failed to reset");

    let snapshot = handle.snapshot().await.expect("Failed to get snapshot");
    assert_eq!(snapshot.project.len(), 1);
    assert!(snapshot.project.contains("main.py"));
}

/// Locally configured test cases run through the sandbox with their input.
#[tokio::test]
async fn test_local_test_cases_produce_report() {
    let host = FakeHost::start(host_with_main("print(input())")).await;
    let mut config = widget_config(&host);
    config.test_cases = vec![
        TestCase::new("echo", "42").with_input("42"),
        TestCase::new("wrong", "7").with_input("8"),
    ];
    let handle = start_widget(config).await;
    let mut events = handle.events().subscribe();

    handle.run_tests().await.expect("Failed to run tests");
    let seen = collect_until(&mut events, is_idle).await;

    let report = seen
        .iter()
        .find_map(|e| match e {
            WidgetEvent::TestResults(payload) => Some(payload.report.clone()),
            _ => None,
        })
        .expect("Expected a test_results event");
    assert_eq!(report.summary.total, 2);
    assert_eq!(report.summary.passed, 1);
    assert!(report.results[0].passed);
    assert!(!report.results[1].passed);

    let host_state = host.state();
    let submissions = &host_state.submissions;
    assert!(submissions
        .iter()
        .all(|(handler, _)| handler == "submit_code_handler"));
    assert_eq!(submissions[0].1["stdin"], "42");
}

// ============================================================================
// HTTP API Tests
// ============================================================================

/// The widget server drives the same operations over HTTP.
#[tokio::test]
async fn test_http_api_round_trip() {
    let host = FakeHost::start(host_with_main("print(1)")).await;
    let handle = start_widget(widget_config(&host)).await;
    let addr = start_server(handle).await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}/api/widgets/{}", common::USAGE_ID);

    let widgets: Value = client
        .get(format!("http://{addr}/api/widgets"))
        .send()
        .await
        .expect("Failed to list widgets")
        .json()
        .await
        .expect("Invalid JSON");
    assert_eq!(widgets, json!({"usageIds": [common::USAGE_ID]}));

    let created = client
        .post(format!("{base}/files"))
        .json(&json!({"filename": "pkg/mod.py", "content": "X = 1"}))
        .send()
        .await
        .expect("Failed to create file");
    assert_eq!(created.status(), reqwest::StatusCode::CREATED);

    let duplicate = client
        .post(format!("{base}/files"))
        .json(&json!({"filename": "pkg/mod.py"}))
        .send()
        .await
        .expect("Failed to create file");
    assert_eq!(duplicate.status(), reqwest::StatusCode::CONFLICT);

    let snapshot: WidgetSnapshot = client
        .get(format!("{base}/project"))
        .send()
        .await
        .expect("Failed to get project")
        .json()
        .await
        .expect("Invalid snapshot");
    assert_eq!(snapshot.usage_id, common::USAGE_ID);
    assert!(snapshot.project.contains("pkg/mod.py"));
    assert_eq!(snapshot.structure.total_files, 2);

    let deleted = client
        .delete(format!("{base}/files/pkg%2Fmod.py"))
        .send()
        .await
        .expect("Failed to delete file");
    assert_eq!(deleted.status(), reqwest::StatusCode::OK);
    assert!(!host.state().files.contains_key("pkg/mod.py"));

    let missing = client
        .get(format!("http://{addr}/api/widgets/nope/project"))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
}
