//! Drives a session's multi-step procedure once a runtime run completes.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tern_core::truncate_for_display;
use tern_session::AgentSession;
use tracing::{debug, info, warn};

use crate::activity_types::ActivityRecord;
use crate::approval_gateway::{ApprovalGateway, ApprovalWaitOutcome};
use crate::collaborators::{
    ParentResolver, ParentResumer, ProcedureCatalog, SubroutineDefinition, SubroutineResumer,
};
use crate::session_engine::ActivityPublisher;

pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const PARENT_SUMMARY_MAX_CHARS: usize = 8_000;
const ELICITATION_SUMMARY_MAX_CHARS: usize = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcedureAdvancerConfig {
    pub approval_timeout: Duration,
}

impl Default for ProcedureAdvancerConfig {
    fn default() -> Self {
        Self {
            approval_timeout: DEFAULT_APPROVAL_TIMEOUT,
        }
    }
}

/// Terminal run as seen by the advancer.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionEvent {
    /// Index of the already-appended result entry, if it was stored.
    pub entry_index: Option<usize>,
    pub summary: String,
    pub failed: bool,
    pub record: ActivityRecord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcedureOutcome {
    Failed,
    Finished {
        parent_notified: bool,
    },
    Advanced {
        next_subroutine: String,
        resumed: bool,
    },
    ApprovalRejected,
    ApprovalTimedOut,
    ApprovalUnavailable,
    ApprovalSuperseded,
    AdvanceFailed,
}

impl ProcedureOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Failed => "failed",
            Self::Finished { .. } => "finished",
            Self::Advanced { .. } => "advanced",
            Self::ApprovalRejected => "approval_rejected",
            Self::ApprovalTimedOut => "approval_timed_out",
            Self::ApprovalUnavailable => "approval_unavailable",
            Self::ApprovalSuperseded => "approval_superseded",
            Self::AdvanceFailed => "advance_failed",
        }
    }
}

pub struct ProcedureAdvancer {
    publisher: ActivityPublisher,
    catalog: Option<Arc<dyn ProcedureCatalog>>,
    approvals: Option<Arc<ApprovalGateway>>,
    parent_resolver: Option<Arc<dyn ParentResolver>>,
    parent_resumer: Option<Arc<dyn ParentResumer>>,
    subroutine_resumer: Option<Arc<dyn SubroutineResumer>>,
    config: ProcedureAdvancerConfig,
}

impl ProcedureAdvancer {
    pub fn new(publisher: ActivityPublisher) -> Self {
        Self {
            publisher,
            catalog: None,
            approvals: None,
            parent_resolver: None,
            parent_resumer: None,
            subroutine_resumer: None,
            config: ProcedureAdvancerConfig::default(),
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn ProcedureCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_approvals(mut self, approvals: Arc<ApprovalGateway>) -> Self {
        self.approvals = Some(approvals);
        self
    }

    pub fn with_parent_resolver(mut self, resolver: Arc<dyn ParentResolver>) -> Self {
        self.parent_resolver = Some(resolver);
        self
    }

    pub fn with_parent_resumer(mut self, resumer: Arc<dyn ParentResumer>) -> Self {
        self.parent_resumer = Some(resumer);
        self
    }

    pub fn with_subroutine_resumer(mut self, resumer: Arc<dyn SubroutineResumer>) -> Self {
        self.subroutine_resumer = Some(resumer);
        self
    }

    pub fn with_config(mut self, config: ProcedureAdvancerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn publisher(&self) -> &ActivityPublisher {
        &self.publisher
    }

    pub fn approvals(&self) -> Option<&Arc<ApprovalGateway>> {
        self.approvals.as_ref()
    }

    /// True when the session's current subroutine mutes thoughts and actions.
    pub fn suppresses_thoughts(&self, session: &AgentSession) -> bool {
        self.catalog
            .as_ref()
            .and_then(|catalog| catalog.current_subroutine(session))
            .is_some_and(|subroutine| subroutine.suppress_thought_posting)
    }

    pub async fn handle_completion(
        &self,
        session: &AgentSession,
        completion: CompletionEvent,
    ) -> ProcedureOutcome {
        let CompletionEvent {
            entry_index,
            summary,
            failed,
            record,
        } = completion;

        if failed {
            self.publisher.publish(session, entry_index, record).await;
            info!(session_id = %session.id, "procedure stopped after failed run");
            return ProcedureOutcome::Failed;
        }

        let next = self
            .catalog
            .as_ref()
            .and_then(|catalog| catalog.next_subroutine(session));
        let Some(next) = next else {
            self.publisher.publish(session, entry_index, record).await;
            let parent_notified = self.notify_parent(session, &summary).await;
            info!(
                session_id = %session.id,
                parent_notified,
                "procedure finished"
            );
            return ProcedureOutcome::Finished { parent_notified };
        };

        // Intermediate results stay in the local log only.
        debug!(
            session_id = %session.id,
            next_subroutine = %next.name,
            "subroutine completed with more steps remaining"
        );

        let finished = self
            .catalog
            .as_ref()
            .and_then(|catalog| catalog.current_subroutine(session));
        if let Some(finished) = finished.filter(|subroutine| subroutine.requires_approval) {
            if let Some(outcome) = self.await_approval(session, &finished, &summary).await {
                return outcome;
            }
        }

        self.advance(session, next).await
    }

    /// Returns `Some` when advancement must stop.
    async fn await_approval(
        &self,
        session: &AgentSession,
        finished: &SubroutineDefinition,
        summary: &str,
    ) -> Option<ProcedureOutcome> {
        let Some(approvals) = self.approvals.as_ref() else {
            warn!(
                session_id = %session.id,
                subroutine = %finished.name,
                "approval required but no approval gateway is configured"
            );
            self.publisher
                .publish(
                    session,
                    None,
                    ActivityRecord::error(
                        "Approval is required to continue, but the approval service is unavailable. \
                         The procedure has been stopped.",
                    ),
                )
                .await;
            return Some(ProcedureOutcome::ApprovalUnavailable);
        };

        let pending = approvals.register(&session.id);
        let url = pending.url().to_string();
        let body = format!(
            "The **{}** step is complete and needs your approval before continuing.\n\n{}\n\nReview and respond here: {}",
            finished.name,
            truncate_for_display(summary.trim(), ELICITATION_SUMMARY_MAX_CHARS),
            url
        );
        self.publisher
            .publish(
                session,
                None,
                ActivityRecord::elicitation(body).with_signal_metadata(json!({ "url": url })),
            )
            .await;

        let timeout = self.config.approval_timeout;
        match pending.wait(timeout).await {
            ApprovalWaitOutcome::Decided(decision) if decision.approved => {
                info!(session_id = %session.id, "approval granted");
                if let Some(feedback) = decision.feedback {
                    self.publisher
                        .publish(
                            session,
                            None,
                            ActivityRecord::thought(format!("Approval feedback: {feedback}")),
                        )
                        .await;
                }
                None
            }
            ApprovalWaitOutcome::Decided(decision) => {
                info!(session_id = %session.id, "approval rejected");
                let body = match decision.feedback {
                    Some(feedback) => {
                        format!("Approval was rejected. The procedure has been stopped.\n\nFeedback: {feedback}")
                    }
                    None => "Approval was rejected. The procedure has been stopped.".to_string(),
                };
                self.publisher
                    .publish(session, None, ActivityRecord::error(body))
                    .await;
                Some(ProcedureOutcome::ApprovalRejected)
            }
            ApprovalWaitOutcome::TimedOut => {
                self.publisher
                    .publish(
                        session,
                        None,
                        ActivityRecord::error(format!(
                            "No approval response was received within {}. The procedure has been stopped.",
                            describe_duration(timeout)
                        )),
                    )
                    .await;
                Some(ProcedureOutcome::ApprovalTimedOut)
            }
            ApprovalWaitOutcome::Superseded => {
                info!(
                    session_id = %session.id,
                    "approval request superseded by a newer registration"
                );
                Some(ProcedureOutcome::ApprovalSuperseded)
            }
        }
    }

    async fn advance(
        &self,
        session: &AgentSession,
        next: SubroutineDefinition,
    ) -> ProcedureOutcome {
        let Some(catalog) = self.catalog.as_ref() else {
            return ProcedureOutcome::AdvanceFailed;
        };
        if let Err(error) =
            catalog.advance_to_next_subroutine(session, session.runtime_session_id.as_deref())
        {
            warn!(session_id = %session.id, %error, "failed to advance procedure");
            return ProcedureOutcome::AdvanceFailed;
        }
        // The cursor has moved; a failed resume below is not rolled back.
        self.publisher.store().reactivate(&session.id);

        let resumed = match self.subroutine_resumer.as_ref() {
            Some(resumer) => match resumer.resume_next_subroutine(&session.id).await {
                Ok(()) => true,
                Err(error) => {
                    warn!(
                        session_id = %session.id,
                        next_subroutine = %next.name,
                        %error,
                        "failed to resume next subroutine"
                    );
                    false
                }
            },
            None => {
                debug!(session_id = %session.id, "no subroutine resumer configured");
                false
            }
        };
        info!(
            session_id = %session.id,
            next_subroutine = %next.name,
            resumed,
            "advanced procedure"
        );
        ProcedureOutcome::Advanced {
            next_subroutine: next.name,
            resumed,
        }
    }

    async fn notify_parent(&self, session: &AgentSession, summary: &str) -> bool {
        let Some(parent_session_id) = self
            .parent_resolver
            .as_ref()
            .and_then(|resolver| resolver.parent_session_id(&session.id))
        else {
            return false;
        };
        let Some(resumer) = self.parent_resumer.as_ref() else {
            warn!(
                session_id = %session.id,
                parent_session_id = %parent_session_id,
                "child session finished but no parent resumer is configured"
            );
            return false;
        };
        let prompt = build_parent_prompt(session, summary);
        match resumer
            .resume_parent_session(&parent_session_id, &prompt, &session.id)
            .await
        {
            Ok(()) => true,
            Err(error) => {
                warn!(
                    session_id = %session.id,
                    parent_session_id = %parent_session_id,
                    %error,
                    "failed to resume parent session"
                );
                false
            }
        }
    }
}

/// Prompt handed to a parent session when one of its children finishes.
pub fn build_parent_prompt(child: &AgentSession, summary: &str) -> String {
    let summary = summary.trim();
    let summary = if summary.is_empty() {
        "(no result text was reported)".to_string()
    } else {
        truncate_for_display(summary, PARENT_SUMMARY_MAX_CHARS)
    };
    format!(
        "Child agent session {} for issue {} has completed.\n\nResult:\n{}",
        child.id, child.issue.identifier, summary
    )
}

fn describe_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    if seconds >= 60 && seconds % 60 == 0 {
        let minutes = seconds / 60;
        if minutes == 1 {
            "1 minute".to_string()
        } else {
            format!("{minutes} minutes")
        }
    } else if seconds >= 1 {
        format!("{seconds} seconds")
    } else {
        format!("{} ms", duration.as_millis())
    }
}
