//! Single HTTP listener multiplexing tenant webhooks, the OAuth handshake
//! and approval responses.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use futures_util::{FutureExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tern_activity::{ApprovalGateway, ApprovalRequestView, APPROVAL_ENDPOINT};
use tern_core::{current_unix_timestamp_ms, lock_or_recover, mint_random_token};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::webhook_signature::{
    verify_hmac_sha256_signature, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};

mod approval_routes;
mod config;
mod oauth_flow;
mod pages;
mod server_bootstrap;
mod webhook_routes;

pub use approval_routes::ApprovalError;
pub use config::{
    OAuthConfig, RequestGatewayConfig, DEFAULT_BIND, DEFAULT_DIRECT_SIGNATURE_HEADER,
    DEFAULT_MAX_WEBHOOK_BODY_BYTES, DEFAULT_OAUTH_FLOW_TIMEOUT, DEFAULT_OAUTH_STATE_TTL,
};
pub use oauth_flow::{OAuthCallbackHandler, OAuthCredentials, OAuthFlow, OAuthFlowError};
pub use server_bootstrap::{GatewayLifecycle, TunnelProvider};
pub use webhook_routes::{
    RawWebhookHandler, RawWebhookResponse, SignedWebhookHandler, WebhookHandlerError,
    WebhookRequest,
};

use approval_routes::handle_approval;
use oauth_flow::{handle_oauth_authorize, handle_oauth_callback, PendingOAuthState};
use pages::render_message_page;
use server_bootstrap::RunningServer;
use webhook_routes::{handle_webhook, SignedRegistration};

pub const WEBHOOK_ENDPOINT: &str = "/webhook";
pub const OAUTH_AUTHORIZE_ENDPOINT: &str = "/oauth/authorize";
pub const OAUTH_CALLBACK_ENDPOINT: &str = "/callback";
pub const HEALTH_ENDPOINT: &str = "/health";

type OAuthFlowSender = oneshot::Sender<Result<OAuthCredentials, OAuthFlowError>>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request gateway is already {0}")]
    AlreadyRunning(&'static str),
    #[error("invalid gateway bind address '{bind}': {source}")]
    InvalidBind {
        bind: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("failed to bind request gateway on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("request gateway server failed: {0}")]
    Serve(#[from] std::io::Error),
    #[error("request gateway task ended abnormally: {0}")]
    Join(String),
}

/// State shared by every route handler.
struct GatewayState {
    config: RequestGatewayConfig,
    approvals: Mutex<Option<Arc<ApprovalGateway>>>,
    raw_handlers: Mutex<Vec<Arc<dyn RawWebhookHandler>>>,
    signed_handlers: Mutex<Vec<SignedRegistration>>,
    oauth_states: Mutex<HashMap<String, PendingOAuthState>>,
    oauth_flows: Mutex<HashMap<u64, OAuthFlowSender>>,
    next_flow_id: AtomicU64,
    oauth_callback: Mutex<Option<Arc<dyn OAuthCallbackHandler>>>,
    public_base_url: Mutex<String>,
    http: reqwest::Client,
}

impl GatewayState {
    fn new(config: RequestGatewayConfig) -> Self {
        let public_base_url = config
            .public_base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", config.bind));
        Self {
            config,
            approvals: Mutex::new(None),
            raw_handlers: Mutex::new(Vec::new()),
            signed_handlers: Mutex::new(Vec::new()),
            oauth_states: Mutex::new(HashMap::new()),
            oauth_flows: Mutex::new(HashMap::new()),
            next_flow_id: AtomicU64::new(0),
            oauth_callback: Mutex::new(None),
            public_base_url: Mutex::new(trim_base_url(&public_base_url)),
            http: reqwest::Client::new(),
        }
    }

    fn approvals(&self) -> Option<Arc<ApprovalGateway>> {
        lock_or_recover(&self.approvals).clone()
    }

    fn public_base_url(&self) -> String {
        lock_or_recover(&self.public_base_url).clone()
    }

    fn set_public_base_url(&self, base_url: &str) {
        *lock_or_recover(&self.public_base_url) = trim_base_url(base_url);
        if let Some(approvals) = self.approvals() {
            approvals.set_base_url(base_url);
        }
    }
}

fn trim_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}

/// Public entry point owning the listener lifecycle and handler registry.
pub struct RequestGateway {
    state: Arc<GatewayState>,
    tunnel: Option<Arc<dyn TunnelProvider>>,
    lifecycle: Mutex<GatewayLifecycle>,
    server: tokio::sync::Mutex<Option<RunningServer>>,
}

impl RequestGateway {
    pub fn new(config: RequestGatewayConfig) -> Self {
        Self {
            state: Arc::new(GatewayState::new(config)),
            tunnel: None,
            lifecycle: Mutex::new(GatewayLifecycle::Stopped),
            server: tokio::sync::Mutex::new(None),
        }
    }

    /// Resolves approvals through `/approval` and keeps their URLs pointed at
    /// this gateway's public address.
    pub fn with_approvals(self, approvals: Arc<ApprovalGateway>) -> Self {
        approvals.set_base_url(&self.state.public_base_url());
        *lock_or_recover(&self.state.approvals) = Some(approvals);
        self
    }

    pub fn with_tunnel(mut self, tunnel: Arc<dyn TunnelProvider>) -> Self {
        self.tunnel = Some(tunnel);
        self
    }

    pub fn config(&self) -> &RequestGatewayConfig {
        &self.state.config
    }

    pub fn register_raw_handler(&self, handler: Arc<dyn RawWebhookHandler>) {
        lock_or_recover(&self.state.raw_handlers).push(handler);
    }

    pub fn register_signed_handler(
        &self,
        secret: impl Into<String>,
        handler: Arc<dyn SignedWebhookHandler>,
    ) {
        lock_or_recover(&self.state.signed_handlers).push(SignedRegistration {
            secret: secret.into(),
            handler,
        });
    }

    pub fn raw_handler_count(&self) -> usize {
        lock_or_recover(&self.state.raw_handlers).len()
    }

    pub fn signed_handler_count(&self) -> usize {
        lock_or_recover(&self.state.signed_handlers).len()
    }

    pub fn set_oauth_callback_handler(&self, handler: Arc<dyn OAuthCallbackHandler>) {
        *lock_or_recover(&self.state.oauth_callback) = Some(handler);
    }

    /// Starts waiting for the next OAuth callback.
    pub fn begin_oauth_flow(&self) -> OAuthFlow {
        OAuthFlow::begin(&self.state)
    }

    /// Base URL external actors use to reach this gateway.
    pub fn public_base_url(&self) -> String {
        self.state.public_base_url()
    }

    /// Router without a bound listener.
    pub fn router(&self) -> Router {
        build_request_gateway_router(Arc::clone(&self.state))
    }
}

fn build_request_gateway_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route(WEBHOOK_ENDPOINT, any(handle_webhook))
        .route(OAUTH_AUTHORIZE_ENDPOINT, any(handle_oauth_authorize))
        .route(OAUTH_CALLBACK_ENDPOINT, get(handle_oauth_callback))
        .route(APPROVAL_ENDPOINT, get(handle_approval).post(handle_approval))
        .route(HEALTH_ENDPOINT, get(handle_health))
        .fallback(handle_not_found)
        .layer(middleware::from_fn(catch_handler_panics))
        .with_state(state)
}

async fn handle_health() -> &'static str {
    "ok"
}

async fn handle_not_found() -> Response {
    plain_text_response(StatusCode::NOT_FOUND, "not found")
}

async fn catch_handler_panics(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            error!(
                %method,
                %path,
                panic = panic_message(panic.as_ref()),
                "request handler panicked"
            );
            plain_text_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

fn plain_text_response(status: StatusCode, body: &'static str) -> Response {
    (status, body).into_response()
}
