//! In-flight tool invocations and the per-session active task pointer.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tern_core::lock_or_recover;

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRecord {
    pub session_id: String,
    /// Raw tool name as emitted by the runtime.
    pub tool_name: String,
    /// Name shown upstream, prefixed when nested under the active task.
    pub display_name: String,
    pub input: Value,
}

#[derive(Debug, Default)]
struct LedgerTables {
    tool_calls: HashMap<String, ToolCallRecord>,
    active_tasks: HashMap<String, String>,
}

/// Process-wide map of tool-use ids to their originating call.
///
/// Records are created when an assistant message introduces a tool call and
/// consumed when the matching tool result arrives. Anything left over for a
/// session is dropped by [`ToolCallLedger::clear_session`].
#[derive(Debug, Default)]
pub struct ToolCallLedger {
    tables: Mutex<LedgerTables>,
}

impl ToolCallLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tool_call(&self, tool_use_id: impl Into<String>, record: ToolCallRecord) {
        let mut tables = lock_or_recover(&self.tables);
        tables.tool_calls.insert(tool_use_id.into(), record);
    }

    pub fn tool_call(&self, tool_use_id: &str) -> Option<ToolCallRecord> {
        lock_or_recover(&self.tables)
            .tool_calls
            .get(tool_use_id)
            .cloned()
    }

    pub fn take_tool_call(&self, tool_use_id: &str) -> Option<ToolCallRecord> {
        lock_or_recover(&self.tables).tool_calls.remove(tool_use_id)
    }

    /// Marks `tool_use_id` as the session's active long-running task and
    /// returns the pointer it replaced.
    pub fn mark_active_task(&self, session_id: &str, tool_use_id: &str) -> Option<String> {
        lock_or_recover(&self.tables)
            .active_tasks
            .insert(session_id.to_string(), tool_use_id.to_string())
    }

    pub fn active_task(&self, session_id: &str) -> Option<String> {
        lock_or_recover(&self.tables)
            .active_tasks
            .get(session_id)
            .cloned()
    }

    /// Clears the active task pointer only when it still points at `tool_use_id`.
    pub fn clear_active_task_if(&self, session_id: &str, tool_use_id: &str) -> bool {
        let mut tables = lock_or_recover(&self.tables);
        if tables.active_tasks.get(session_id).map(String::as_str) == Some(tool_use_id) {
            tables.active_tasks.remove(session_id);
            return true;
        }
        false
    }

    /// Drops every orphaned tool call and the active task pointer of a session.
    /// Returns the number of tool-call records removed.
    pub fn clear_session(&self, session_id: &str) -> usize {
        let mut tables = lock_or_recover(&self.tables);
        tables.active_tasks.remove(session_id);
        let before = tables.tool_calls.len();
        tables
            .tool_calls
            .retain(|_, record| record.session_id != session_id);
        before - tables.tool_calls.len()
    }

    pub fn pending_tool_calls(&self, session_id: &str) -> usize {
        lock_or_recover(&self.tables)
            .tool_calls
            .values()
            .filter(|record| record.session_id == session_id)
            .count()
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.tables).tool_calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
