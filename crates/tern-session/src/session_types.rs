//! Data model shared by the session store and the activity engine.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tern_core::current_unix_timestamp_ms;

/// Lifecycle state for an agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Complete,
    Error,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Complete => "complete",
            Self::Error => "error",
        }
    }

    /// Returns true when no further runtime output is expected.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    /// Returns true when a completion event may move this status to `next`.
    ///
    /// Re-opening a terminal session goes through `SessionStore::reactivate`.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Self::Active, Self::Complete) | (Self::Active, Self::Error)
        )
    }
}

/// Runtime message type an entry was translated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    System,
    User,
    Assistant,
    Result,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Result => "result",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueRef {
    pub id: String,
    pub identifier: String,
    #[serde(default)]
    pub title: String,
}

impl IssueRef {
    pub fn new(id: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            identifier: identifier.into(),
            title: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceRef {
    pub path: String,
    #[serde(default)]
    pub is_git_worktree: bool,
}

impl WorkspaceRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_git_worktree: false,
        }
    }
}

/// Token counters reported by the runtime's result events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

impl SessionUsage {
    pub fn accumulate(&mut self, other: &SessionUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.cache_creation_input_tokens = self
            .cache_creation_input_tokens
            .saturating_add(other.cache_creation_input_tokens);
        self.cache_read_input_tokens = self
            .cache_read_input_tokens
            .saturating_add(other.cache_read_input_tokens);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub permission_mode: Option<String>,
    #[serde(default)]
    pub api_key_source: Option<String>,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub usage: SessionUsage,
    /// Local-only sessions are tracked here but never published upstream.
    #[serde(default)]
    pub local_only: bool,
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

/// Partial metadata merged into a session on status changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionMetadataUpdate {
    pub model: Option<String>,
    pub tools: Option<Vec<String>>,
    pub permission_mode: Option<String>,
    pub api_key_source: Option<String>,
    pub cost_usd: Option<f64>,
    pub usage: Option<SessionUsage>,
    pub extra: BTreeMap<String, Value>,
}

impl SessionMetadataUpdate {
    pub fn is_empty(&self) -> bool {
        self.model.is_none()
            && self.tools.is_none()
            && self.permission_mode.is_none()
            && self.api_key_source.is_none()
            && self.cost_usd.is_none()
            && self.usage.is_none()
            && self.extra.is_empty()
    }

    pub(crate) fn apply_to(self, metadata: &mut SessionMetadata) {
        if let Some(model) = self.model {
            metadata.model = Some(model);
        }
        if let Some(tools) = self.tools {
            metadata.tools = tools;
        }
        if let Some(permission_mode) = self.permission_mode {
            metadata.permission_mode = Some(permission_mode);
        }
        if let Some(api_key_source) = self.api_key_source {
            metadata.api_key_source = Some(api_key_source);
        }
        if let Some(cost_usd) = self.cost_usd {
            metadata.total_cost_usd += cost_usd;
        }
        if let Some(usage) = self.usage {
            metadata.usage.accumulate(&usage);
        }
        metadata.extra.extend(self.extra);
    }
}

/// Live coding-agent process bound to a session.
pub trait RuntimeProcess: Send + Sync {
    fn is_running(&self) -> bool;
    fn stop(&self);
}

/// Shared handle to a [`RuntimeProcess`]. Never serialized.
#[derive(Clone)]
pub struct RuntimeHandle(Arc<dyn RuntimeProcess>);

impl RuntimeHandle {
    pub fn new(process: Arc<dyn RuntimeProcess>) -> Self {
        Self(process)
    }

    pub fn is_running(&self) -> bool {
        self.0.is_running()
    }

    pub fn stop(&self) {
        self.0.stop();
    }
}

impl fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("running", &self.is_running())
            .finish()
    }
}

impl PartialEq for RuntimeHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::as_ptr(&self.0).cast::<()>() == Arc::as_ptr(&other.0).cast::<()>()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSession {
    pub id: String,
    pub status: SessionStatus,
    pub created_unix_ms: u64,
    pub updated_unix_ms: u64,
    pub issue: IssueRef,
    pub workspace: WorkspaceRef,
    /// Bound once from the runtime's `system/init` event.
    #[serde(default)]
    pub runtime_session_id: Option<String>,
    #[serde(default)]
    pub metadata: SessionMetadata,
    #[serde(skip)]
    pub runtime: Option<RuntimeHandle>,
}

impl AgentSession {
    pub fn new(
        id: impl Into<String>,
        issue: IssueRef,
        workspace: WorkspaceRef,
        local_only: bool,
    ) -> Self {
        let now_unix_ms = current_unix_timestamp_ms();
        Self {
            id: id.into(),
            status: SessionStatus::Active,
            created_unix_ms: now_unix_ms,
            updated_unix_ms: now_unix_ms,
            issue,
            workspace,
            runtime_session_id: None,
            metadata: SessionMetadata {
                local_only,
                ..SessionMetadata::default()
            },
            runtime: None,
        }
    }

    pub fn is_local_only(&self) -> bool {
        self.metadata.local_only
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub timestamp_unix_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result_error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

/// One translated unit of a runtime event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub kind: EntryKind,
    pub content: String,
    pub metadata: EntryMetadata,
    /// Upstream activity id, present once the entry has been published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
}

impl SessionEntry {
    pub fn new(kind: EntryKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            metadata: EntryMetadata {
                timestamp_unix_ms: current_unix_timestamp_ms(),
                ..EntryMetadata::default()
            },
            activity_id: None,
        }
    }

    pub fn with_parent_tool_use_id(mut self, parent_tool_use_id: Option<String>) -> Self {
        self.metadata.parent_tool_use_id = parent_tool_use_id;
        self
    }

    pub fn with_tool_use(
        mut self,
        tool_use_id: impl Into<String>,
        tool_name: impl Into<String>,
        tool_input: Option<Value>,
    ) -> Self {
        self.metadata.tool_use_id = Some(tool_use_id.into());
        self.metadata.tool_name = Some(tool_name.into());
        self.metadata.tool_input = tool_input;
        self
    }

    pub fn with_tool_result_error(mut self, is_error: bool) -> Self {
        self.metadata.tool_result_error = Some(is_error);
        self
    }

    pub fn with_result_outcome(mut self, duration_ms: Option<u64>, is_error: bool) -> Self {
        self.metadata.duration_ms = duration_ms;
        self.metadata.is_error = Some(is_error);
        self
    }

    pub fn is_result(&self) -> bool {
        self.kind == EntryKind::Result
    }
}
