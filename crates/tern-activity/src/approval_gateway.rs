//! Pending human approvals keyed by session id.
//!
//! A registration hands out a correlation URL and a [`PendingApproval`]. The
//! first of {external resolution, timeout} removes the pending slot under the
//! registry lock; the loser observes that the slot is gone and becomes a no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tern_core::{current_unix_timestamp_ms, lock_or_recover};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use url::Url;

pub const APPROVAL_ENDPOINT: &str = "/approval";
pub const DEFAULT_APPROVAL_BASE_URL: &str = "http://localhost:3456";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalDecision {
    pub approved: bool,
    pub feedback: Option<String>,
}

impl ApprovalDecision {
    pub fn approve(feedback: Option<String>) -> Self {
        Self {
            approved: true,
            feedback: normalize_feedback(feedback),
        }
    }

    pub fn reject(feedback: Option<String>) -> Self {
        Self {
            approved: false,
            feedback: normalize_feedback(feedback),
        }
    }
}

fn normalize_feedback(feedback: Option<String>) -> Option<String> {
    feedback
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalWaitOutcome {
    Decided(ApprovalDecision),
    TimedOut,
    /// A newer registration for the same session replaced this one.
    Superseded,
}

/// Read-only view of a pending request, used to render the approval page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequestView {
    pub session_id: String,
    pub url: String,
    pub created_unix_ms: u64,
}

#[derive(Debug)]
struct PendingSlot {
    request_id: u64,
    url: String,
    created_unix_ms: u64,
    sender: oneshot::Sender<ApprovalDecision>,
}

#[derive(Debug)]
pub struct ApprovalGateway {
    base_url: RwLock<String>,
    pending: Mutex<HashMap<String, PendingSlot>>,
    next_request_id: AtomicU64,
}

impl Default for ApprovalGateway {
    fn default() -> Self {
        Self::new(DEFAULT_APPROVAL_BASE_URL)
    }
}

impl ApprovalGateway {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: RwLock::new(base_url.trim_end_matches('/').to_string()),
            pending: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(0),
        }
    }

    pub fn base_url(&self) -> String {
        match self.base_url.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Points newly minted approval URLs at `base_url`, e.g. a tunnel address.
    pub fn set_base_url(&self, base_url: &str) {
        let normalized = base_url.trim_end_matches('/').to_string();
        match self.base_url.write() {
            Ok(mut guard) => *guard = normalized,
            Err(poisoned) => *poisoned.into_inner() = normalized,
        }
    }

    pub fn approval_url(&self, session_id: &str) -> String {
        let base_url = self.base_url();
        match Url::parse(&format!("{base_url}{APPROVAL_ENDPOINT}")) {
            Ok(mut url) => {
                url.query_pairs_mut().append_pair("session", session_id);
                url.to_string()
            }
            Err(error) => {
                warn!(%base_url, %error, "approval base url is not a valid url");
                format!("{base_url}{APPROVAL_ENDPOINT}?session={session_id}")
            }
        }
    }

    /// Registers a pending approval for `session_id`.
    ///
    /// Only one request per session is outstanding: registering again replaces
    /// the earlier request, whose waiter then resolves as
    /// [`ApprovalWaitOutcome::Superseded`].
    pub fn register(self: &Arc<Self>, session_id: &str) -> PendingApproval {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        let url = self.approval_url(session_id);
        let created_unix_ms = current_unix_timestamp_ms();
        let (sender, receiver) = oneshot::channel();
        let replaced = lock_or_recover(&self.pending).insert(
            session_id.to_string(),
            PendingSlot {
                request_id,
                url: url.clone(),
                created_unix_ms,
                sender,
            },
        );
        if let Some(previous) = replaced {
            warn!(
                session_id,
                replaced_request_id = previous.request_id,
                "replacing pending approval request"
            );
        }
        info!(session_id, request_id, "registered approval request");
        PendingApproval {
            session_id: session_id.to_string(),
            request_id,
            url,
            receiver,
            gateway: Arc::clone(self),
        }
    }

    /// Delivers a decision. Returns false when nothing is pending, including
    /// when the request was already resolved or timed out.
    pub fn resolve(&self, session_id: &str, approved: bool, feedback: Option<String>) -> bool {
        let decision = if approved {
            ApprovalDecision::approve(feedback)
        } else {
            ApprovalDecision::reject(feedback)
        };
        let mut pending = lock_or_recover(&self.pending);
        let Some(slot) = pending.remove(session_id) else {
            debug!(session_id, "no pending approval to resolve");
            return false;
        };
        // Sent while holding the lock so a concurrent expiry sees either the
        // slot or the delivered decision.
        if slot.sender.send(decision).is_err() {
            debug!(session_id, "approval waiter already dropped");
            return false;
        }
        info!(session_id, approved, "resolved approval request");
        true
    }

    pub fn pending_request(&self, session_id: &str) -> Option<ApprovalRequestView> {
        lock_or_recover(&self.pending)
            .get(session_id)
            .map(|slot| ApprovalRequestView {
                session_id: session_id.to_string(),
                url: slot.url.clone(),
                created_unix_ms: slot.created_unix_ms,
            })
    }

    pub fn pending_count(&self) -> usize {
        lock_or_recover(&self.pending).len()
    }

    fn expire(&self, session_id: &str, request_id: u64) -> bool {
        let mut pending = lock_or_recover(&self.pending);
        match pending.get(session_id) {
            Some(slot) if slot.request_id == request_id => {
                pending.remove(session_id);
                true
            }
            _ => false,
        }
    }
}

/// Waiter for a single registered approval.
#[derive(Debug)]
pub struct PendingApproval {
    session_id: String,
    request_id: u64,
    url: String,
    receiver: oneshot::Receiver<ApprovalDecision>,
    gateway: Arc<ApprovalGateway>,
}

impl PendingApproval {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Races the external decision against `timeout`. Exactly one side wins.
    pub async fn wait(self, timeout: Duration) -> ApprovalWaitOutcome {
        let PendingApproval {
            session_id,
            request_id,
            mut receiver,
            gateway,
            ..
        } = self;
        match tokio::time::timeout(timeout, &mut receiver).await {
            Ok(Ok(decision)) => ApprovalWaitOutcome::Decided(decision),
            Ok(Err(_)) => ApprovalWaitOutcome::Superseded,
            Err(_) => {
                if gateway.expire(&session_id, request_id) {
                    info!(
                        session_id = %session_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "approval request timed out"
                    );
                    return ApprovalWaitOutcome::TimedOut;
                }
                match receiver.try_recv() {
                    Ok(decision) => ApprovalWaitOutcome::Decided(decision),
                    Err(_) => ApprovalWaitOutcome::Superseded,
                }
            }
        }
    }
}
