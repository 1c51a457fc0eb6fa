//! Session table, entry logs, and tool-call bookkeeping for agent sessions.

mod session_store;
mod session_types;
mod tool_call_ledger;

pub use session_store::{SessionStore, SessionStoreError, SessionStoreSnapshot};
pub use session_types::{
    AgentSession, EntryKind, EntryMetadata, IssueRef, RuntimeHandle, RuntimeProcess,
    SessionEntry, SessionMetadata, SessionMetadataUpdate, SessionStatus, SessionUsage,
    WorkspaceRef,
};
pub use tool_call_ledger::{ToolCallLedger, ToolCallRecord};
