use std::sync::atomic::Ordering;

use serde_json::json;
use tern_session::{EntryKind, SessionStatus, SessionUsage};

use super::harness;
use crate::{
    ActivityContent, AgentRuntimeMessage, MessageDisposition, ProcedureOutcome, PublishOutcome,
    ResultMessage, SubroutineDefinition, SuppressReason,
};

#[tokio::test]
async fn functional_entry_log_preserves_arrival_order_and_completes_on_result() {
    let harness = harness();
    harness.create_session("session-1", false);

    let messages = vec![
        AgentRuntimeMessage::system_init("rt-1", "sonnet", &["Bash"]),
        AgentRuntimeMessage::assistant_text("Looking into it."),
        AgentRuntimeMessage::assistant_tool_use("toolu_1", "Bash", json!({"command": "ls"})),
        AgentRuntimeMessage::tool_result("toolu_1", "Cargo.toml", false),
        AgentRuntimeMessage::assistant_text("Found the manifest."),
    ];
    for message in &messages {
        harness
            .engine
            .handle_runtime_message("session-1", message)
            .await;
    }
    assert_eq!(
        harness.store.session("session-1").expect("session").status,
        SessionStatus::Active
    );

    let disposition = harness
        .engine
        .handle_runtime_message(
            "session-1",
            &AgentRuntimeMessage::result_success("All done."),
        )
        .await;
    assert!(matches!(
        disposition,
        MessageDisposition::Completed {
            entry_index: 5,
            outcome: ProcedureOutcome::Finished {
                parent_notified: false
            },
        }
    ));

    let entries = harness.store.session_entries("session-1");
    let kinds = entries.iter().map(|entry| entry.kind).collect::<Vec<_>>();
    assert_eq!(
        kinds,
        vec![
            EntryKind::System,
            EntryKind::Assistant,
            EntryKind::Assistant,
            EntryKind::User,
            EntryKind::Assistant,
            EntryKind::Result,
        ]
    );
    let session = harness.store.session("session-1").expect("session");
    assert_eq!(session.status, SessionStatus::Complete);
    assert_eq!(session.runtime_session_id.as_deref(), Some("rt-1"));
    assert_eq!(session.metadata.model.as_deref(), Some("sonnet"));

    let contents = harness.poster.contents();
    assert_eq!(contents.len(), 6);
    assert!(matches!(
        contents.last(),
        Some(ActivityContent::Response { body }) if body == "All done."
    ));
    assert!(entries.iter().all(|entry| entry.activity_id.is_some()));
}

#[tokio::test]
async fn functional_tool_call_pair_posts_two_activities_and_clears_ledger() {
    let harness = harness();
    harness.create_session("session-1", false);

    harness
        .engine
        .handle_runtime_message(
            "session-1",
            &AgentRuntimeMessage::assistant_tool_use(
                "toolu_1",
                "Edit",
                json!({"file_path": "src/auth.rs"}),
            ),
        )
        .await;
    harness
        .engine
        .handle_runtime_message(
            "session-1",
            &AgentRuntimeMessage::tool_result("toolu_1", "edited", false),
        )
        .await;

    let requests = harness.poster.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].ephemeral, Some(true));
    assert_eq!(requests[0].agent_session_id, "session-1");
    assert_eq!(requests[1].ephemeral, None);
    assert!(harness.store.ledger().tool_call("toolu_1").is_none());

    // A duplicate delivery of the same result finds nothing to close.
    let duplicate = harness
        .engine
        .handle_runtime_message(
            "session-1",
            &AgentRuntimeMessage::tool_result("toolu_1", "edited", false),
        )
        .await;
    assert_eq!(
        duplicate,
        MessageDisposition::Suppressed(SuppressReason::UnmatchedToolResult)
    );
    assert_eq!(harness.poster.count(), 2);
}

#[tokio::test]
async fn functional_local_only_session_never_posts() {
    let harness = harness();
    harness.create_session("session-local", true);

    let messages = vec![
        AgentRuntimeMessage::system_init("rt-9", "haiku", &[]),
        AgentRuntimeMessage::assistant_text("Working locally."),
        AgentRuntimeMessage::assistant_tool_use("toolu_1", "Bash", json!({"command": "make"})),
        AgentRuntimeMessage::tool_result("toolu_1", "ok", false),
    ];
    for message in &messages {
        let disposition = harness
            .engine
            .handle_runtime_message("session-local", message)
            .await;
        assert!(matches!(
            disposition,
            MessageDisposition::Recorded {
                publish: Some(PublishOutcome::LocalOnly),
                ..
            }
        ));
    }
    harness
        .engine
        .handle_runtime_message("session-local", &AgentRuntimeMessage::result_success("ok"))
        .await;

    assert_eq!(harness.poster.count(), 0);
    assert_eq!(harness.store.session_entries("session-local").len(), 5);
}

#[tokio::test]
async fn functional_checklist_result_posts_no_action() {
    let harness = harness();
    harness.create_session("session-1", false);

    harness
        .engine
        .handle_runtime_message(
            "session-1",
            &AgentRuntimeMessage::assistant_tool_use(
                "toolu_todo",
                "TodoWrite",
                json!({"todos": [{"content": "Write tests", "status": "pending"}]}),
            ),
        )
        .await;
    let disposition = harness
        .engine
        .handle_runtime_message(
            "session-1",
            &AgentRuntimeMessage::tool_result("toolu_todo", "ok", false),
        )
        .await;

    assert_eq!(
        disposition,
        MessageDisposition::Suppressed(SuppressReason::ChecklistResult)
    );
    let contents = harness.poster.contents();
    assert_eq!(contents.len(), 1);
    assert!(matches!(contents[0], ActivityContent::Thought { .. }));
    assert_eq!(harness.store.session_entries("session-1").len(), 1);
}

#[tokio::test]
async fn functional_thought_suppression_drops_narrative_but_keeps_result() {
    let harness = harness();
    harness.create_session("session-1", false);
    harness.catalog.set_steps(
        Some(SubroutineDefinition::new("verify").suppressing_thoughts()),
        None,
    );

    let thought = harness
        .engine
        .handle_runtime_message(
            "session-1",
            &AgentRuntimeMessage::assistant_text("internal musing"),
        )
        .await;
    assert_eq!(
        thought,
        MessageDisposition::Suppressed(SuppressReason::ThoughtsSuppressed)
    );

    harness
        .engine
        .handle_runtime_message(
            "session-1",
            &AgentRuntimeMessage::result_success("Verification passed."),
        )
        .await;

    let contents = harness.poster.contents();
    assert_eq!(
        contents,
        vec![ActivityContent::Response {
            body: "Verification passed.".to_string()
        }]
    );
    assert_eq!(harness.store.session_entries("session-1").len(), 1);
}

#[tokio::test]
async fn functional_result_merges_cost_and_usage() {
    let harness = harness();
    harness.create_session("session-1", false);

    let result = AgentRuntimeMessage::Result(ResultMessage {
        subtype: "success".to_string(),
        result: Some("done".to_string()),
        total_cost_usd: Some(0.42),
        usage: Some(SessionUsage {
            input_tokens: 100,
            output_tokens: 20,
            ..SessionUsage::default()
        }),
        ..ResultMessage::default()
    });
    harness
        .engine
        .handle_runtime_message("session-1", &result)
        .await;

    let session = harness.store.session("session-1").expect("session");
    assert!((session.metadata.total_cost_usd - 0.42).abs() < f64::EPSILON);
    assert_eq!(session.metadata.usage.input_tokens, 100);
    assert_eq!(session.metadata.usage.output_tokens, 20);
}

#[tokio::test]
async fn functional_failed_result_marks_error_and_stops() {
    let harness = harness();
    harness.create_session("session-1", false);
    harness.catalog.set_steps(
        Some(SubroutineDefinition::new("implement")),
        Some(SubroutineDefinition::new("verify")),
    );

    let disposition = harness
        .engine
        .handle_runtime_message(
            "session-1",
            &AgentRuntimeMessage::result_error("error_during_execution", Some("tool crashed")),
        )
        .await;

    assert!(matches!(
        disposition,
        MessageDisposition::Completed {
            outcome: ProcedureOutcome::Failed,
            ..
        }
    ));
    assert_eq!(
        harness.store.session("session-1").expect("session").status,
        SessionStatus::Error
    );
    assert_eq!(
        harness.poster.contents(),
        vec![ActivityContent::Error {
            body: "tool crashed".to_string()
        }]
    );
    assert!(harness.catalog.advances().is_empty());
    assert!(harness.resumer.resumes().is_empty());
}

#[tokio::test]
async fn regression_events_after_terminal_state_are_dropped() {
    let harness = harness();
    harness.create_session("session-1", false);
    harness
        .engine
        .handle_runtime_message("session-1", &AgentRuntimeMessage::result_success("done"))
        .await;

    let late = harness
        .engine
        .handle_runtime_message(
            "session-1",
            &AgentRuntimeMessage::assistant_text("one more thing"),
        )
        .await;
    assert_eq!(late, MessageDisposition::Dropped);
    assert_eq!(harness.store.session_entries("session-1").len(), 1);
}

#[tokio::test]
async fn regression_late_task_tool_use_leaves_no_ledger_state_after_reactivation() {
    let harness = harness();
    harness.create_session("session-1", false);
    harness
        .engine
        .handle_runtime_message("session-1", &AgentRuntimeMessage::result_success("done"))
        .await;

    let late = harness
        .engine
        .handle_runtime_message(
            "session-1",
            &AgentRuntimeMessage::assistant_tool_use(
                "toolu_late",
                "Task",
                json!({"description": "late"}),
            ),
        )
        .await;
    assert_eq!(late, MessageDisposition::Dropped);
    assert_eq!(harness.store.ledger().active_task("session-1"), None);
    assert_eq!(harness.store.ledger().pending_tool_calls("session-1"), 0);

    assert!(harness.store.reactivate("session-1"));
    let posted_before = harness.poster.count();
    harness
        .engine
        .handle_runtime_message(
            "session-1",
            &AgentRuntimeMessage::assistant_tool_use(
                "toolu_bash",
                "Bash",
                json!({"command": "ls"}),
            )
            .nested_under("toolu_late"),
        )
        .await;
    let contents = harness.poster.contents();
    assert_eq!(contents.len(), posted_before + 1);
    match &contents[posted_before] {
        ActivityContent::Action { action, .. } => assert_eq!(action, "Bash"),
        other => panic!("unexpected content: {other:?}"),
    }
}

#[tokio::test]
async fn regression_terminal_session_publishes_at_most_one_trailing_result() {
    let harness = harness();
    harness.create_session("session-1", false);
    harness
        .engine
        .handle_runtime_message("session-1", &AgentRuntimeMessage::result_success("done"))
        .await;
    assert_eq!(harness.poster.count(), 1);

    let repeated = harness
        .engine
        .handle_runtime_message("session-1", &AgentRuntimeMessage::result_success("again"))
        .await;
    assert_eq!(repeated, MessageDisposition::Dropped);
    assert_eq!(harness.store.session_entries("session-1").len(), 1);
    assert_eq!(harness.poster.count(), 1);
}

#[tokio::test]
async fn functional_stopped_session_records_in_flight_result_once() {
    let harness = harness();
    harness.create_session("session-1", false);
    harness
        .engine
        .handle_runtime_message("session-1", &AgentRuntimeMessage::assistant_text("working"))
        .await;
    harness.store.update_status(
        "session-1",
        SessionStatus::Error,
        tern_session::SessionMetadataUpdate::default(),
    );

    let in_flight = harness
        .engine
        .handle_runtime_message("session-1", &AgentRuntimeMessage::result_success("finished"))
        .await;
    assert!(matches!(
        in_flight,
        MessageDisposition::Recorded {
            entry_index: 1,
            publish: Some(PublishOutcome::Published { .. }),
        }
    ));
    let repeated = harness
        .engine
        .handle_runtime_message("session-1", &AgentRuntimeMessage::result_success("finished"))
        .await;
    assert_eq!(repeated, MessageDisposition::Dropped);
    assert_eq!(harness.poster.count(), 2);
    assert!(harness.catalog.advances().is_empty());
}

#[tokio::test]
async fn regression_terminal_transition_clears_orphaned_tool_calls() {
    let harness = harness();
    harness.create_session("session-1", false);
    harness
        .engine
        .handle_runtime_message(
            "session-1",
            &AgentRuntimeMessage::assistant_tool_use(
                "toolu_task",
                "Task",
                json!({"description": "dig"}),
            ),
        )
        .await;
    assert_eq!(
        harness.store.ledger().active_task("session-1").as_deref(),
        Some("toolu_task")
    );

    harness
        .engine
        .handle_runtime_message(
            "session-1",
            &AgentRuntimeMessage::result_error("error_max_turns", None),
        )
        .await;

    assert_eq!(harness.store.ledger().active_task("session-1"), None);
    assert_eq!(harness.store.ledger().pending_tool_calls("session-1"), 0);
}

#[tokio::test]
async fn functional_poster_failure_is_swallowed_and_entry_kept() {
    let harness = harness();
    harness.create_session("session-1", false);
    harness.poster.fail.store(true, Ordering::SeqCst);

    let disposition = harness
        .engine
        .handle_runtime_message(
            "session-1",
            &AgentRuntimeMessage::assistant_text("still recorded"),
        )
        .await;

    assert_eq!(
        disposition,
        MessageDisposition::Recorded {
            entry_index: 0,
            publish: Some(PublishOutcome::Failed),
        }
    );
    let entries = harness.store.session_entries("session-1");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].activity_id, None);
}

#[tokio::test]
async fn unit_unknown_session_is_reported() {
    let harness = harness();
    let disposition = harness
        .engine
        .handle_runtime_message("missing", &AgentRuntimeMessage::assistant_text("hello"))
        .await;
    assert_eq!(disposition, MessageDisposition::SessionNotFound);
    assert_eq!(harness.poster.count(), 0);
}
