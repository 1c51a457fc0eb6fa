//! Capability traits implemented by the surrounding orchestrator.

use async_trait::async_trait;
use tern_session::AgentSession;
use thiserror::Error;

use crate::activity_types::{ActivityReceipt, CreateActivityRequest};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("{operation} failed: {message}")]
    Failed {
        operation: &'static str,
        message: String,
    },
    #[error("{operation} is unavailable")]
    Unavailable { operation: &'static str },
}

impl CollaboratorError {
    pub fn failed(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Failed {
            operation,
            message: message.into(),
        }
    }
}

/// Issue-tracker client surface used to publish activities.
///
/// Implementations own retry and rate limiting.
#[async_trait]
pub trait ActivityPoster: Send + Sync {
    async fn create_activity(
        &self,
        request: CreateActivityRequest,
    ) -> Result<ActivityReceipt, CollaboratorError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubroutineDefinition {
    pub name: String,
    pub requires_approval: bool,
    pub suppress_thought_posting: bool,
}

impl SubroutineDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requires_approval: false,
            suppress_thought_posting: false,
        }
    }

    pub fn requiring_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    pub fn suppressing_thoughts(mut self) -> Self {
        self.suppress_thought_posting = true;
        self
    }
}

/// Procedure definition store: where a session is in its multi-step run.
pub trait ProcedureCatalog: Send + Sync {
    fn current_subroutine(&self, session: &AgentSession) -> Option<SubroutineDefinition>;
    fn next_subroutine(&self, session: &AgentSession) -> Option<SubroutineDefinition>;
    fn advance_to_next_subroutine(
        &self,
        session: &AgentSession,
        runtime_session_id: Option<&str>,
    ) -> Result<(), CollaboratorError>;
}

pub trait ParentResolver: Send + Sync {
    fn parent_session_id(&self, child_session_id: &str) -> Option<String>;
}

#[async_trait]
pub trait ParentResumer: Send + Sync {
    async fn resume_parent_session(
        &self,
        parent_session_id: &str,
        prompt: &str,
        child_session_id: &str,
    ) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait SubroutineResumer: Send + Sync {
    async fn resume_next_subroutine(&self, session_id: &str) -> Result<(), CollaboratorError>;
}
