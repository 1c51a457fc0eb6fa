//! Listener and OAuth settings.
use super::*;

pub const DEFAULT_BIND: &str = "127.0.0.1:3456";
pub const DEFAULT_MAX_WEBHOOK_BODY_BYTES: usize = 1024 * 1024;
pub const DEFAULT_DIRECT_SIGNATURE_HEADER: &str = "linear-signature";
pub const DEFAULT_OAUTH_STATE_TTL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_OAUTH_FLOW_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const DEFAULT_OAUTH_SCOPE: &str = "read,write,app:assignable,app:mentionable";
const DEFAULT_OAUTH_AUTHORIZE_URL: &str = "https://linear.app/oauth/authorize";
const DEFAULT_OAUTH_TOKEN_URL: &str = "https://api.linear.app/oauth/token";
const DEFAULT_GRAPHQL_URL: &str = "https://api.linear.app/graphql";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthConfig {
    /// Run the authorize/token exchange here instead of through the proxy.
    pub direct: bool,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Defaults to `{public_base_url}/callback`.
    pub redirect_uri: Option<String>,
    pub scope: String,
    pub authorize_url: String,
    pub token_url: String,
    pub graphql_url: String,
    pub proxy_url: Option<String>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            direct: false,
            client_id: None,
            client_secret: None,
            redirect_uri: None,
            scope: DEFAULT_OAUTH_SCOPE.to_string(),
            authorize_url: DEFAULT_OAUTH_AUTHORIZE_URL.to_string(),
            token_url: DEFAULT_OAUTH_TOKEN_URL.to_string(),
            graphql_url: DEFAULT_GRAPHQL_URL.to_string(),
            proxy_url: None,
        }
    }
}

impl OAuthConfig {
    pub(super) fn client_id(&self) -> Option<&str> {
        self.client_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestGatewayConfig {
    pub bind: String,
    /// Externally reachable base URL; a tunnel URL takes precedence.
    pub public_base_url: Option<String>,
    pub max_webhook_body_bytes: usize,
    /// Header whose presence marks a delivery as coming straight from the
    /// issue-tracking platform.
    pub direct_signature_header: String,
    pub oauth: OAuthConfig,
    pub oauth_state_ttl: Duration,
    pub oauth_flow_timeout: Duration,
}

impl Default for RequestGatewayConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            public_base_url: None,
            max_webhook_body_bytes: DEFAULT_MAX_WEBHOOK_BODY_BYTES,
            direct_signature_header: DEFAULT_DIRECT_SIGNATURE_HEADER.to_string(),
            oauth: OAuthConfig::default(),
            oauth_state_ttl: DEFAULT_OAUTH_STATE_TTL,
            oauth_flow_timeout: DEFAULT_OAUTH_FLOW_TIMEOUT,
        }
    }
}
