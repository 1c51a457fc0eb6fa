//! Wires translation, storage and publishing for one runtime event at a time.

use std::sync::Arc;

use tern_session::{AgentSession, SessionMetadataUpdate, SessionStatus, SessionStore};
use tracing::{debug, warn};

use crate::activity_translator::{ActivityTranslator, SuppressReason, Translation};
use crate::activity_types::{ActivityRecord, CreateActivityRequest};
use crate::collaborators::ActivityPoster;
use crate::procedure_advancer::{CompletionEvent, ProcedureAdvancer, ProcedureOutcome};
use crate::runtime_message::AgentRuntimeMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { activity_id: Option<String> },
    LocalOnly,
    Failed,
}

/// Posts activity records for sessions that sync to the issue tracker.
#[derive(Clone)]
pub struct ActivityPublisher {
    store: Arc<SessionStore>,
    poster: Arc<dyn ActivityPoster>,
}

impl ActivityPublisher {
    pub fn new(store: Arc<SessionStore>, poster: Arc<dyn ActivityPoster>) -> Self {
        Self { store, poster }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Posts `record` and binds the returned activity id to the entry at
    /// `entry_index`. Local-only sessions never reach the poster.
    pub async fn publish(
        &self,
        session: &AgentSession,
        entry_index: Option<usize>,
        record: ActivityRecord,
    ) -> PublishOutcome {
        if session.is_local_only() {
            debug!(
                session_id = %session.id,
                kind = record.kind().as_str(),
                "session is local-only; skipping activity post"
            );
            return PublishOutcome::LocalOnly;
        }
        let kind = record.kind();
        let request = CreateActivityRequest::from_record(&session.id, record);
        match self.poster.create_activity(request).await {
            Ok(receipt) => {
                if let (Some(index), Some(activity_id)) =
                    (entry_index, receipt.activity_id.as_deref())
                {
                    self.store
                        .set_entry_activity_id(&session.id, index, activity_id);
                }
                debug!(
                    session_id = %session.id,
                    kind = kind.as_str(),
                    "posted activity"
                );
                PublishOutcome::Published {
                    activity_id: receipt.activity_id,
                }
            }
            Err(error) => {
                warn!(
                    session_id = %session.id,
                    kind = kind.as_str(),
                    %error,
                    "failed to post activity"
                );
                PublishOutcome::Failed
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageDisposition {
    SessionNotFound,
    Suppressed(SuppressReason),
    /// The store refused the entry, e.g. a late event for a terminal session.
    Dropped,
    Recorded {
        entry_index: usize,
        publish: Option<PublishOutcome>,
    },
    Completed {
        entry_index: usize,
        outcome: ProcedureOutcome,
    },
}

/// Entry point for a session's runtime event stream.
///
/// Events for one session must be fed in arrival order; the engine neither
/// buffers nor reorders them.
pub struct SessionActivityEngine {
    translator: ActivityTranslator,
    advancer: Arc<ProcedureAdvancer>,
}

impl SessionActivityEngine {
    pub fn new(advancer: Arc<ProcedureAdvancer>) -> Self {
        let ledger = Arc::clone(advancer.publisher().store().ledger());
        Self {
            translator: ActivityTranslator::new(ledger),
            advancer,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        self.advancer.publisher().store()
    }

    pub async fn handle_runtime_message(
        &self,
        session_id: &str,
        message: &AgentRuntimeMessage,
    ) -> MessageDisposition {
        let store = self.store();
        let Some(session) = store.session(session_id) else {
            warn!(
                session_id,
                kind = message.kind_label(),
                "runtime message for unknown session"
            );
            return MessageDisposition::SessionNotFound;
        };

        if session.status.is_terminal() && !message.is_result() {
            debug!(
                session_id,
                status = session.status.as_str(),
                kind = message.kind_label(),
                "dropping runtime message for terminal session"
            );
            return MessageDisposition::Dropped;
        }

        let event = match self.translator.translate(&session, message) {
            Translation::Record(event) => event,
            Translation::Suppress(reason) => {
                debug!(session_id, reason = reason.as_str(), "suppressed runtime message");
                return MessageDisposition::Suppressed(reason);
            }
        };

        if let Some(init) = event.init {
            if let Some(runtime_session_id) = init.runtime_session_id.as_deref() {
                store.bind_runtime_session(session_id, runtime_session_id);
            }
            store.merge_metadata(session_id, init.metadata);
        }

        if event
            .activity
            .as_ref()
            .is_some_and(|record| record.content.is_suppressible())
            && self.advancer.suppresses_thoughts(&session)
        {
            debug!(
                session_id,
                reason = SuppressReason::ThoughtsSuppressed.as_str(),
                "suppressed runtime message"
            );
            return MessageDisposition::Suppressed(SuppressReason::ThoughtsSuppressed);
        }

        let already_terminal = session.status.is_terminal();
        let is_result = event.entry.is_result();
        let failed = event.entry.metadata.is_error.unwrap_or(false);
        let summary = event.entry.content.clone();
        let Some(entry_index) = store.append_entry(session_id, event.entry) else {
            return MessageDisposition::Dropped;
        };

        if !is_result || already_terminal {
            let publish = match event.activity {
                Some(record) => Some(
                    self.advancer
                        .publisher()
                        .publish(&session, Some(entry_index), record)
                        .await,
                ),
                None => None,
            };
            return MessageDisposition::Recorded {
                entry_index,
                publish,
            };
        }

        let status = if failed {
            SessionStatus::Error
        } else {
            SessionStatus::Complete
        };
        let Some(completed) = store.update_status(session_id, status, result_metadata(message))
        else {
            return MessageDisposition::Dropped;
        };
        let Some(record) = event.activity else {
            return MessageDisposition::Recorded {
                entry_index,
                publish: None,
            };
        };
        let outcome = self
            .advancer
            .handle_completion(
                &completed,
                CompletionEvent {
                    entry_index: Some(entry_index),
                    summary,
                    failed,
                    record,
                },
            )
            .await;
        MessageDisposition::Completed {
            entry_index,
            outcome,
        }
    }
}

fn result_metadata(message: &AgentRuntimeMessage) -> SessionMetadataUpdate {
    match message {
        AgentRuntimeMessage::Result(result) => SessionMetadataUpdate {
            cost_usd: result.total_cost_usd,
            usage: result.usage,
            ..SessionMetadataUpdate::default()
        },
        _ => SessionMetadataUpdate::default(),
    }
}
