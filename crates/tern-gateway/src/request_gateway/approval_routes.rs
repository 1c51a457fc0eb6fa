//! `/approval` page rendering and decision intake.
use super::*;

use super::pages::{render_approval_page, render_decision_page};

#[derive(Debug, Deserialize)]
pub(super) struct ApprovalQuery {
    session: Option<String>,
    action: Option<String>,
    feedback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApprovalError {
    #[error("approval request is missing the session parameter")]
    MissingSession,
    #[error("unknown approval action '{0}'")]
    UnknownAction(String),
    #[error("no approval is pending for session '{0}'")]
    NotPending(String),
    #[error("approvals are not available on this gateway")]
    Unavailable,
}

impl ApprovalError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingSession | Self::UnknownAction(_) => StatusCode::BAD_REQUEST,
            Self::NotPending(_) => StatusCode::NOT_FOUND,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Self::MissingSession | Self::UnknownAction(_) => "Invalid approval request",
            Self::NotPending(_) => "Approval not found",
            Self::Unavailable => "Approvals unavailable",
        }
    }
}

impl IntoResponse for ApprovalError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        (self.status(), Html(render_message_page(self.title(), &message))).into_response()
    }
}

pub(super) async fn handle_approval(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<ApprovalQuery>,
) -> Response {
    match resolve_approval_request(&state, query) {
        Ok(page) => (StatusCode::OK, Html(page)).into_response(),
        Err(error) => {
            debug!(%error, "approval request refused");
            error.into_response()
        }
    }
}

fn resolve_approval_request(
    state: &GatewayState,
    query: ApprovalQuery,
) -> Result<String, ApprovalError> {
    let session_id = query
        .session
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(ApprovalError::MissingSession)?;
    let approvals = state.approvals().ok_or(ApprovalError::Unavailable)?;
    let action = query
        .action
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());

    let approved = match action {
        None => {
            let request = approvals
                .pending_request(session_id)
                .ok_or_else(|| ApprovalError::NotPending(session_id.to_string()))?;
            return Ok(render_approval_page(&request));
        }
        Some("approve") => true,
        Some("reject") => false,
        Some(other) => return Err(ApprovalError::UnknownAction(other.to_string())),
    };

    if !approvals.resolve(session_id, approved, query.feedback) {
        return Err(ApprovalError::NotPending(session_id.to_string()));
    }
    info!(session_id, approved, "approval resolved over http");
    Ok(render_decision_page(approved))
}
