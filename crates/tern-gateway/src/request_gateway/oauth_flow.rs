//! OAuth authorize/callback routes and the pending-flow waiters.
use super::*;

const OAUTH_STATE_ENTROPY_BYTES: usize = 24;
const VIEWER_ORGANIZATION_QUERY: &str = "query { viewer { organization { id name } } }";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthCredentials {
    pub access_token: String,
    pub workspace_id: String,
    pub workspace_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OAuthFlowError {
    #[error("oauth flow timed out after {timeout_ms} ms")]
    TimedOut { timeout_ms: u64 },
    #[error("oauth flow was rejected: {0}")]
    Rejected(String),
    #[error("oauth flow was abandoned before completion")]
    Abandoned,
}

/// Receives credentials after a successful callback.
#[async_trait]
pub trait OAuthCallbackHandler: Send + Sync {
    async fn on_oauth_success(&self, credentials: &OAuthCredentials) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub(super) struct PendingOAuthState {
    created_unix_ms: u64,
    redirect_uri: String,
}

/// Waiter settled by the next callback, or by its own timeout.
pub struct OAuthFlow {
    id: u64,
    receiver: oneshot::Receiver<Result<OAuthCredentials, OAuthFlowError>>,
    timeout: Duration,
    state: Arc<GatewayState>,
}

impl OAuthFlow {
    pub(super) fn begin(state: &Arc<GatewayState>) -> Self {
        let id = state.next_flow_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (sender, receiver) = oneshot::channel();
        lock_or_recover(&state.oauth_flows).insert(id, sender);
        debug!(flow_id = id, "started oauth flow");
        Self {
            id,
            receiver,
            timeout: state.config.oauth_flow_timeout,
            state: Arc::clone(state),
        }
    }

    pub async fn wait(self) -> Result<OAuthCredentials, OAuthFlowError> {
        let OAuthFlow {
            id,
            mut receiver,
            timeout,
            state,
        } = self;
        match tokio::time::timeout(timeout, &mut receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(OAuthFlowError::Abandoned),
            Err(_) => {
                if lock_or_recover(&state.oauth_flows).remove(&id).is_some() {
                    info!(flow_id = id, "oauth flow timed out");
                    return Err(OAuthFlowError::TimedOut {
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                receiver.try_recv().unwrap_or(Err(OAuthFlowError::Abandoned))
            }
        }
    }
}

impl GatewayState {
    fn settle_oauth_flows(&self, result: Result<OAuthCredentials, OAuthFlowError>) -> usize {
        let flows = std::mem::take(&mut *lock_or_recover(&self.oauth_flows));
        let settled = flows.len();
        for (_, sender) in flows {
            let _ = sender.send(result.clone());
        }
        settled
    }

    fn mint_oauth_state(&self, redirect_uri: &str) -> String {
        let now_unix_ms = current_unix_timestamp_ms();
        let token = mint_random_token(OAUTH_STATE_ENTROPY_BYTES);
        let mut states = lock_or_recover(&self.oauth_states);
        let ttl_ms = self.config.oauth_state_ttl.as_millis() as u64;
        let before = states.len();
        states.retain(|_, pending| now_unix_ms.saturating_sub(pending.created_unix_ms) < ttl_ms);
        let swept = before - states.len();
        if swept > 0 {
            debug!(swept, "swept expired oauth states");
        }
        states.insert(
            token.clone(),
            PendingOAuthState {
                created_unix_ms: now_unix_ms,
                redirect_uri: redirect_uri.to_string(),
            },
        );
        token
    }

    /// Removes and returns a state token if it is still within its TTL.
    fn consume_oauth_state(&self, token: &str) -> Option<PendingOAuthState> {
        let pending = lock_or_recover(&self.oauth_states).remove(token)?;
        let age_ms = current_unix_timestamp_ms().saturating_sub(pending.created_unix_ms);
        if age_ms >= self.config.oauth_state_ttl.as_millis() as u64 {
            debug!(age_ms, "oauth state expired");
            return None;
        }
        Some(pending)
    }

    fn callback_url(&self) -> String {
        format!("{}{}", self.public_base_url(), OAUTH_CALLBACK_ENDPOINT)
    }
}

pub(super) async fn handle_oauth_authorize(State(state): State<Arc<GatewayState>>) -> Response {
    let oauth = &state.config.oauth;
    if !oauth.direct {
        let Some(proxy_url) = oauth.proxy_url.as_deref() else {
            warn!("oauth authorize requested but no oauth proxy is configured");
            return html_page(
                StatusCode::BAD_REQUEST,
                "OAuth not configured",
                "This agent has no OAuth proxy configured.",
            );
        };
        let location = match authorize_redirect(
            &format!("{}/oauth/authorize", trim_base_url(proxy_url)),
            &[("callback", state.callback_url().as_str())],
        ) {
            Ok(location) => location,
            Err(error) => {
                error!(%error, "invalid oauth proxy url");
                return plain_text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error",
                );
            }
        };
        return found(&location);
    }

    let Some(client_id) = oauth.client_id() else {
        warn!("direct oauth requested without a client id");
        return html_page(
            StatusCode::BAD_REQUEST,
            "OAuth not configured",
            "An OAuth client id is required for direct authorization.",
        );
    };
    let redirect_uri = oauth
        .redirect_uri
        .clone()
        .unwrap_or_else(|| state.callback_url());
    let csrf_state = state.mint_oauth_state(&redirect_uri);
    let location = match authorize_redirect(
        &oauth.authorize_url,
        &[
            ("client_id", client_id),
            ("redirect_uri", redirect_uri.as_str()),
            ("response_type", "code"),
            ("state", csrf_state.as_str()),
            ("scope", oauth.scope.as_str()),
            ("actor", "app"),
            ("prompt", "consent"),
        ],
    ) {
        Ok(location) => location,
        Err(error) => {
            error!(%error, "invalid oauth authorize url");
            return plain_text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error",
            );
        }
    };
    info!("redirecting to upstream oauth authorize");
    found(&location)
}

pub(super) async fn handle_oauth_callback(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let param = |name: &str| {
        params
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    };

    if let (true, Some(code), Some(csrf_state)) =
        (state.config.oauth.direct, param("code"), param("state"))
    {
        let Some(pending) = state.consume_oauth_state(csrf_state) else {
            warn!("oauth callback carried an unknown or expired state");
            state.settle_oauth_flows(Err(OAuthFlowError::Rejected(
                "invalid or expired oauth state".to_string(),
            )));
            return html_page(
                StatusCode::BAD_REQUEST,
                "Authorization failed",
                "The authorization request is invalid or has expired. Please start again.",
            );
        };
        return match exchange_code_for_credentials(&state, code, &pending.redirect_uri).await {
            Ok(credentials) => complete_oauth(&state, credentials).await,
            Err(error) => {
                warn!(error = %format!("{error:#}"), "oauth code exchange failed");
                state.settle_oauth_flows(Err(OAuthFlowError::Rejected(
                    "oauth code exchange failed".to_string(),
                )));
                html_page(
                    StatusCode::BAD_REQUEST,
                    "Authorization failed",
                    "The authorization code could not be exchanged. Please start again.",
                )
            }
        };
    }

    if let (Some(token), Some(workspace_id), Some(workspace_name)) = (
        param("token"),
        param("workspaceId"),
        param("workspaceName"),
    ) {
        let credentials = OAuthCredentials {
            access_token: token.to_string(),
            workspace_id: workspace_id.to_string(),
            workspace_name: workspace_name.to_string(),
        };
        return complete_oauth(&state, credentials).await;
    }

    warn!("oauth callback is missing required parameters");
    state.settle_oauth_flows(Err(OAuthFlowError::Rejected(
        "missing required oauth parameters".to_string(),
    )));
    html_page(
        StatusCode::BAD_REQUEST,
        "Authorization failed",
        "The callback is missing required parameters.",
    )
}

async fn complete_oauth(state: &GatewayState, credentials: OAuthCredentials) -> Response {
    let settled = state.settle_oauth_flows(Ok(credentials.clone()));
    info!(
        workspace_id = %credentials.workspace_id,
        settled_flows = settled,
        "oauth authorization completed"
    );
    let handler = lock_or_recover(&state.oauth_callback).clone();
    if let Some(handler) = handler {
        if let Err(error) = handler.on_oauth_success(&credentials).await {
            warn!(
                workspace_id = %credentials.workspace_id,
                error = %format!("{error:#}"),
                "oauth callback handler failed"
            );
        }
    }
    html_page(
        StatusCode::OK,
        "Authorization complete",
        &format!(
            "Workspace {} is connected. You can close this window.",
            credentials.workspace_name
        ),
    )
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

async fn exchange_code_for_credentials(
    state: &GatewayState,
    code: &str,
    redirect_uri: &str,
) -> anyhow::Result<OAuthCredentials> {
    let oauth = &state.config.oauth;
    let client_id = oauth.client_id().context("oauth client id is not configured")?;
    let response = state
        .http
        .post(&oauth.token_url)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", client_id),
            ("client_secret", oauth.client_secret.as_deref().unwrap_or_default()),
        ])
        .send()
        .await
        .context("failed to reach oauth token endpoint")?;
    let status = response.status();
    if !status.is_success() {
        bail!("oauth token endpoint returned {status}");
    }
    let token = response
        .json::<TokenResponse>()
        .await
        .context("invalid oauth token response")?;

    let response = state
        .http
        .post(&oauth.graphql_url)
        .bearer_auth(&token.access_token)
        .json(&json!({ "query": VIEWER_ORGANIZATION_QUERY }))
        .send()
        .await
        .context("failed to query workspace identity")?;
    let status = response.status();
    if !status.is_success() {
        bail!("workspace identity query returned {status}");
    }
    let payload = response
        .json::<Value>()
        .await
        .context("invalid workspace identity response")?;
    let organization = payload
        .pointer("/data/viewer/organization")
        .context("workspace identity response has no organization")?;
    let field = |name: &str| {
        organization
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .with_context(|| format!("workspace identity response has no organization {name}"))
    };
    Ok(OAuthCredentials {
        access_token: token.access_token.clone(),
        workspace_id: field("id")?,
        workspace_name: field("name")?,
    })
}

fn authorize_redirect(base: &str, params: &[(&str, &str)]) -> Result<String, url::ParseError> {
    let mut url = Url::parse(base)?;
    {
        let mut query = url.query_pairs_mut();
        for (name, value) in params {
            query.append_pair(name, value);
        }
    }
    Ok(url.to_string())
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

fn html_page(status: StatusCode, title: &str, message: &str) -> Response {
    (status, Html(render_message_page(title, message))).into_response()
}
