//! Authoritative in-memory table of agent sessions and their entry logs.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tern_core::{current_unix_timestamp_ms, lock_or_recover};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::session_types::{
    AgentSession, IssueRef, RuntimeHandle, SessionEntry, SessionMetadataUpdate, SessionStatus,
    WorkspaceRef,
};
use crate::tool_call_ledger::ToolCallLedger;

const SESSION_SNAPSHOT_SCHEMA_VERSION: u32 = 1;

fn session_snapshot_schema_version() -> u32 {
    SESSION_SNAPSHOT_SCHEMA_VERSION
}

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("unsupported session snapshot schema version {found} (expected {expected})")]
    UnsupportedSchemaVersion { found: u32, expected: u32 },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Persisted shape of the store: sessions without runtime handles plus entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStoreSnapshot {
    #[serde(default = "session_snapshot_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub sessions: BTreeMap<String, AgentSession>,
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<SessionEntry>>,
}

impl Default for SessionStoreSnapshot {
    fn default() -> Self {
        Self {
            schema_version: SESSION_SNAPSHOT_SCHEMA_VERSION,
            sessions: BTreeMap::new(),
            entries: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct StoreTables {
    sessions: HashMap<String, AgentSession>,
    entries: HashMap<String, Vec<SessionEntry>>,
}

/// Owns every session and entry log in the process.
///
/// Missing sessions are logged and turned into no-ops; nothing here returns an
/// error for an unknown id.
#[derive(Debug)]
pub struct SessionStore {
    tables: Mutex<StoreTables>,
    ledger: Arc<ToolCallLedger>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(Arc::new(ToolCallLedger::new()))
    }
}

impl SessionStore {
    pub fn new(ledger: Arc<ToolCallLedger>) -> Self {
        Self {
            tables: Mutex::new(StoreTables::default()),
            ledger,
        }
    }

    pub fn ledger(&self) -> &Arc<ToolCallLedger> {
        &self.ledger
    }

    /// Creates a fresh active session. An existing session with the same id is
    /// overwritten together with its entry log.
    pub fn create_session(
        &self,
        session_id: &str,
        issue: IssueRef,
        workspace: WorkspaceRef,
        local_only: bool,
    ) -> AgentSession {
        let session = AgentSession::new(session_id, issue, workspace, local_only);
        let mut tables = lock_or_recover(&self.tables);
        if tables
            .sessions
            .insert(session_id.to_string(), session.clone())
            .is_some()
        {
            warn!(session_id, "overwriting existing agent session");
        }
        tables.entries.insert(session_id.to_string(), Vec::new());
        info!(
            session_id,
            issue = %session.issue.identifier,
            local_only,
            "created agent session"
        );
        session
    }

    pub fn session(&self, session_id: &str) -> Option<AgentSession> {
        lock_or_recover(&self.tables)
            .sessions
            .get(session_id)
            .cloned()
    }

    pub fn has_session(&self, session_id: &str) -> bool {
        lock_or_recover(&self.tables)
            .sessions
            .contains_key(session_id)
    }

    /// All sessions ordered by creation time, then id.
    pub fn all_sessions(&self) -> Vec<AgentSession> {
        self.collect_sessions(|_| true)
    }

    pub fn sessions_for_issue(&self, issue_id: &str) -> Vec<AgentSession> {
        self.collect_sessions(|session| session.issue.id == issue_id)
    }

    pub fn active_sessions(&self) -> Vec<AgentSession> {
        self.collect_sessions(AgentSession::is_active)
    }

    pub fn active_sessions_for_issue(&self, issue_id: &str) -> Vec<AgentSession> {
        self.collect_sessions(|session| session.is_active() && session.issue.id == issue_id)
    }

    fn collect_sessions(&self, filter: impl Fn(&AgentSession) -> bool) -> Vec<AgentSession> {
        let tables = lock_or_recover(&self.tables);
        let mut sessions = tables
            .sessions
            .values()
            .filter(|session| filter(session))
            .cloned()
            .collect::<Vec<_>>();
        sessions.sort_by(|left, right| {
            left.created_unix_ms
                .cmp(&right.created_unix_ms)
                .then_with(|| left.id.cmp(&right.id))
        });
        sessions
    }

    pub fn session_entries(&self, session_id: &str) -> Vec<SessionEntry> {
        lock_or_recover(&self.tables)
            .entries
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Appends a translated entry and returns its index in the session log.
    ///
    /// Terminal sessions accept a single trailing result entry, the one still
    /// in flight when the run ended.
    pub fn append_entry(&self, session_id: &str, entry: SessionEntry) -> Option<usize> {
        let mut tables = lock_or_recover(&self.tables);
        let StoreTables { sessions, entries } = &mut *tables;
        let Some(session) = sessions.get_mut(session_id) else {
            warn!(session_id, "cannot append entry: session not found");
            return None;
        };
        if session.status.is_terminal() {
            let result_already_logged = entries
                .get(session_id)
                .and_then(|log| log.last())
                .is_some_and(SessionEntry::is_result);
            if !entry.is_result() || result_already_logged {
                warn!(
                    session_id,
                    status = session.status.as_str(),
                    kind = entry.kind.as_str(),
                    "dropping entry for terminal session"
                );
                return None;
            }
        }
        session.updated_unix_ms = current_unix_timestamp_ms();
        let log = entries.entry(session_id.to_string()).or_default();
        log.push(entry);
        Some(log.len() - 1)
    }

    pub fn set_entry_activity_id(&self, session_id: &str, index: usize, activity_id: &str) -> bool {
        let mut tables = lock_or_recover(&self.tables);
        match tables
            .entries
            .get_mut(session_id)
            .and_then(|log| log.get_mut(index))
        {
            Some(entry) => {
                entry.activity_id = Some(activity_id.to_string());
                true
            }
            None => {
                warn!(session_id, index, "cannot bind activity id: entry not found");
                false
            }
        }
    }

    /// Moves a session to `status` and merges `update` into its metadata.
    ///
    /// Every terminal transition clears the session's tool-call ledger state,
    /// including the active task pointer.
    pub fn update_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        update: SessionMetadataUpdate,
    ) -> Option<AgentSession> {
        let updated = {
            let mut tables = lock_or_recover(&self.tables);
            let Some(session) = tables.sessions.get_mut(session_id) else {
                warn!(session_id, "cannot update status: session not found");
                return None;
            };
            if !session.status.can_transition_to(status) {
                warn!(
                    session_id,
                    from = session.status.as_str(),
                    to = status.as_str(),
                    "rejecting non-monotonic session status transition"
                );
                return None;
            }
            session.status = status;
            update.apply_to(&mut session.metadata);
            session.updated_unix_ms = current_unix_timestamp_ms();
            session.clone()
        };
        if status.is_terminal() {
            let orphaned = self.ledger.clear_session(session_id);
            debug!(
                session_id,
                status = status.as_str(),
                orphaned_tool_calls = orphaned,
                "cleared tool-call ledger on terminal transition"
            );
        }
        Some(updated)
    }

    pub fn merge_metadata(&self, session_id: &str, update: SessionMetadataUpdate) -> bool {
        let mut tables = lock_or_recover(&self.tables);
        let Some(session) = tables.sessions.get_mut(session_id) else {
            warn!(session_id, "cannot merge metadata: session not found");
            return false;
        };
        update.apply_to(&mut session.metadata);
        session.updated_unix_ms = current_unix_timestamp_ms();
        true
    }

    /// Re-opens a terminal session for the next subroutine's run.
    pub fn reactivate(&self, session_id: &str) -> bool {
        let mut tables = lock_or_recover(&self.tables);
        let Some(session) = tables.sessions.get_mut(session_id) else {
            warn!(session_id, "cannot reactivate: session not found");
            return false;
        };
        session.status = SessionStatus::Active;
        session.updated_unix_ms = current_unix_timestamp_ms();
        true
    }

    /// Binds the runtime's own session id. Only the first binding sticks.
    pub fn bind_runtime_session(&self, session_id: &str, runtime_session_id: &str) -> bool {
        let mut tables = lock_or_recover(&self.tables);
        let Some(session) = tables.sessions.get_mut(session_id) else {
            warn!(session_id, "cannot bind runtime session: session not found");
            return false;
        };
        match session.runtime_session_id.as_deref() {
            Some(existing) if existing == runtime_session_id => true,
            Some(existing) => {
                debug!(
                    session_id,
                    existing, runtime_session_id, "runtime session id already bound"
                );
                false
            }
            None => {
                session.runtime_session_id = Some(runtime_session_id.to_string());
                session.updated_unix_ms = current_unix_timestamp_ms();
                true
            }
        }
    }

    pub fn attach_runtime(&self, session_id: &str, handle: RuntimeHandle) -> bool {
        let mut tables = lock_or_recover(&self.tables);
        let Some(session) = tables.sessions.get_mut(session_id) else {
            warn!(session_id, "cannot attach runtime: session not found");
            return false;
        };
        session.runtime = Some(handle);
        true
    }

    pub fn detach_runtime(&self, session_id: &str) -> Option<RuntimeHandle> {
        lock_or_recover(&self.tables)
            .sessions
            .get_mut(session_id)
            .and_then(|session| session.runtime.take())
    }

    /// Asks the attached runtime to stop. Returns false when none is attached.
    pub fn stop_runtime(&self, session_id: &str) -> bool {
        let handle = lock_or_recover(&self.tables)
            .sessions
            .get(session_id)
            .and_then(|session| session.runtime.clone());
        match handle {
            Some(handle) => {
                handle.stop();
                true
            }
            None => false,
        }
    }

    pub fn remove_session(&self, session_id: &str) -> Option<AgentSession> {
        let removed = {
            let mut tables = lock_or_recover(&self.tables);
            tables.entries.remove(session_id);
            tables.sessions.remove(session_id)
        };
        if removed.is_some() {
            self.ledger.clear_session(session_id);
        }
        removed
    }

    /// Captures every session and entry log; runtime handles are left out.
    pub fn snapshot(&self) -> SessionStoreSnapshot {
        let tables = lock_or_recover(&self.tables);
        SessionStoreSnapshot {
            schema_version: SESSION_SNAPSHOT_SCHEMA_VERSION,
            sessions: tables
                .sessions
                .iter()
                .map(|(id, session)| {
                    let mut session = session.clone();
                    session.runtime = None;
                    (id.clone(), session)
                })
                .collect(),
            entries: tables
                .entries
                .iter()
                .map(|(id, log)| (id.clone(), log.clone()))
                .collect(),
        }
    }

    /// Replaces the whole store with `snapshot`.
    pub fn restore(&self, snapshot: SessionStoreSnapshot) -> Result<(), SessionStoreError> {
        if snapshot.schema_version != SESSION_SNAPSHOT_SCHEMA_VERSION {
            return Err(SessionStoreError::UnsupportedSchemaVersion {
                found: snapshot.schema_version,
                expected: SESSION_SNAPSHOT_SCHEMA_VERSION,
            });
        }
        let SessionStoreSnapshot {
            sessions, entries, ..
        } = snapshot;
        let mut restored = StoreTables {
            sessions: sessions.into_iter().collect(),
            entries: entries.into_iter().collect(),
        };
        for session_id in restored.sessions.keys() {
            restored.entries.entry(session_id.clone()).or_default();
        }
        let session_count = restored.sessions.len();
        *lock_or_recover(&self.tables) = restored;
        info!(sessions = session_count, "restored session store snapshot");
        Ok(())
    }

    pub fn snapshot_json(&self) -> Result<String, SessionStoreError> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }

    pub fn restore_json(&self, raw: &str) -> Result<(), SessionStoreError> {
        let snapshot = serde_json::from_str::<SessionStoreSnapshot>(raw)?;
        self.restore(snapshot)
    }

    /// Removes terminal sessions last updated more than `max_age_ms` ago.
    pub fn cleanup(&self, max_age_ms: u64) -> usize {
        let cutoff_unix_ms = current_unix_timestamp_ms().saturating_sub(max_age_ms);
        self.cleanup_before(cutoff_unix_ms)
    }

    /// Removes terminal sessions whose last update predates `cutoff_unix_ms`.
    pub fn cleanup_before(&self, cutoff_unix_ms: u64) -> usize {
        let removed = {
            let mut tables = lock_or_recover(&self.tables);
            let stale = tables
                .sessions
                .values()
                .filter(|session| {
                    session.status.is_terminal() && session.updated_unix_ms < cutoff_unix_ms
                })
                .map(|session| session.id.clone())
                .collect::<Vec<_>>();
            for session_id in &stale {
                tables.sessions.remove(session_id);
                tables.entries.remove(session_id);
            }
            stale
        };
        for session_id in &removed {
            self.ledger.clear_session(session_id);
        }
        if !removed.is_empty() {
            info!(removed = removed.len(), cutoff_unix_ms, "cleaned up terminal sessions");
        }
        removed.len()
    }
}
