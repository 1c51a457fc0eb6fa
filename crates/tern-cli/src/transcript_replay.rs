//! Offline replay of a recorded runtime transcript through the activity engine.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tern_activity::{
    ActivityPoster, ActivityPublisher, ActivityReceipt, AgentRuntimeMessage, CollaboratorError,
    CreateActivityRequest, MessageDisposition, ProcedureAdvancer, ProcedureAdvancerConfig,
    SessionActivityEngine,
};
use tern_session::{IssueRef, SessionStore, WorkspaceRef};
use tracing::info;

/// Poster for sessions that never leave the process.
struct OfflineActivityPoster;

#[async_trait]
impl ActivityPoster for OfflineActivityPoster {
    async fn create_activity(
        &self,
        _request: CreateActivityRequest,
    ) -> Result<ActivityReceipt, CollaboratorError> {
        Err(CollaboratorError::Unavailable {
            operation: "create_activity",
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReplayCounts {
    pub recorded: usize,
    pub suppressed: usize,
    pub dropped: usize,
    pub completed: usize,
}

#[derive(Debug)]
pub(crate) struct ReplayReport {
    pub counts: ReplayCounts,
    pub snapshot_json: String,
}

pub(crate) fn read_transcript(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

pub(crate) async fn replay_transcript(
    raw: &str,
    session_id: &str,
    issue_identifier: &str,
    config: ProcedureAdvancerConfig,
) -> Result<ReplayReport> {
    let store = Arc::new(SessionStore::default());
    let publisher = ActivityPublisher::new(Arc::clone(&store), Arc::new(OfflineActivityPoster));
    let engine =
        SessionActivityEngine::new(Arc::new(ProcedureAdvancer::new(publisher).with_config(config)));
    store.create_session(
        session_id,
        IssueRef::new(issue_identifier, issue_identifier),
        WorkspaceRef::new("."),
        true,
    );

    let mut counts = ReplayCounts::default();
    for (index, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let message = AgentRuntimeMessage::parse_line(line)
            .with_context(|| format!("invalid runtime message on line {}", index + 1))?;
        match engine.handle_runtime_message(session_id, &message).await {
            MessageDisposition::Recorded { .. } => counts.recorded += 1,
            MessageDisposition::Suppressed(_) => counts.suppressed += 1,
            MessageDisposition::Dropped | MessageDisposition::SessionNotFound => {
                counts.dropped += 1
            }
            MessageDisposition::Completed { .. } => counts.completed += 1,
        }
    }
    info!(
        session_id,
        recorded = counts.recorded,
        suppressed = counts.suppressed,
        dropped = counts.dropped,
        completed = counts.completed,
        "replayed runtime transcript"
    );

    let snapshot_json = store
        .snapshot_json()
        .context("failed to serialize session snapshot")?;
    Ok(ReplayReport {
        counts,
        snapshot_json,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use tern_activity::{AgentRuntimeMessage, ProcedureAdvancerConfig};

    use super::{read_transcript, replay_transcript};

    fn transcript(messages: &[AgentRuntimeMessage]) -> String {
        messages
            .iter()
            .map(|message| serde_json::to_string(message).expect("serialize message"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[tokio::test]
    async fn functional_replay_records_every_event_of_a_completed_run() {
        let raw = transcript(&[
            AgentRuntimeMessage::system_init("runtime-1", "model-x", &["Bash"]),
            AgentRuntimeMessage::assistant_text("Looking at the failing test."),
            AgentRuntimeMessage::assistant_tool_use("tool-1", "Bash", json!({"command": "ls"})),
            AgentRuntimeMessage::tool_result("tool-1", "Cargo.toml", false),
            AgentRuntimeMessage::result_success("Fixed the test."),
            AgentRuntimeMessage::assistant_text("late event"),
        ]);

        let report = replay_transcript(
            &format!("\n{raw}\n\n"),
            "session-1",
            "ENG-1",
            ProcedureAdvancerConfig::default(),
        )
        .await
        .expect("replay");

        assert_eq!(report.counts.completed, 1);
        assert_eq!(report.counts.dropped, 1);
        let snapshot: Value = serde_json::from_str(&report.snapshot_json).expect("snapshot json");
        assert_eq!(snapshot["sessions"]["session-1"]["status"], "complete");
        let entries = snapshot["entries"]["session-1"]
            .as_array()
            .expect("entries array");
        assert_eq!(
            entries.len(),
            report.counts.recorded + report.counts.completed
        );
    }

    #[tokio::test]
    async fn functional_transcript_file_replays_into_snapshot() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("run.jsonl");
        std::fs::write(
            &path,
            transcript(&[
                AgentRuntimeMessage::assistant_text("Reading the issue."),
                AgentRuntimeMessage::result_error("error_during_execution", None),
            ]),
        )
        .expect("write transcript");

        let raw = read_transcript(&path).expect("read transcript");
        let report = replay_transcript(
            &raw,
            "session-2",
            "ENG-3",
            ProcedureAdvancerConfig::default(),
        )
        .await
        .expect("replay");
        let snapshot: Value = serde_json::from_str(&report.snapshot_json).expect("snapshot json");
        assert_eq!(snapshot["sessions"]["session-2"]["status"], "error");

        let missing =
            read_transcript(&temp.path().join("missing.jsonl")).expect_err("missing file");
        assert!(format!("{missing:#}").contains("failed to read"));
    }

    #[tokio::test]
    async fn regression_malformed_line_reports_its_position() {
        let raw = format!(
            "{}\nnot json",
            transcript(&[AgentRuntimeMessage::assistant_text("hello")])
        );
        let error = replay_transcript(&raw, "s", "ENG-2", ProcedureAdvancerConfig::default())
            .await
            .expect_err("malformed transcript");
        assert!(format!("{error:#}").contains("line 2"));
    }
}
