use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tern_activity::{ProcedureAdvancerConfig, DEFAULT_APPROVAL_TIMEOUT};
use tern_gateway::{
    OAuthConfig, RequestGatewayConfig, DEFAULT_BIND, DEFAULT_DIRECT_SIGNATURE_HEADER,
    DEFAULT_MAX_WEBHOOK_BODY_BYTES, DEFAULT_OAUTH_FLOW_TIMEOUT, DEFAULT_OAUTH_STATE_TTL,
};

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

#[derive(Debug, Parser)]
#[command(
    name = "tern",
    about = "Relays coding-agent sessions to an issue tracker and gates procedure steps on human approval",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long,
        env = "TERN_BIND",
        default_value = DEFAULT_BIND,
        help = "Socket address for the request gateway (host:port)"
    )]
    pub bind: String,

    #[arg(
        long = "public-base-url",
        env = "TERN_PUBLIC_BASE_URL",
        help = "Externally reachable base URL used for OAuth callbacks and approval links"
    )]
    pub public_base_url: Option<String>,

    #[arg(
        long = "max-webhook-body-bytes",
        env = "TERN_MAX_WEBHOOK_BODY_BYTES",
        default_value_t = DEFAULT_MAX_WEBHOOK_BODY_BYTES,
        value_parser = parse_positive_usize,
        help = "Largest webhook body accepted before answering 413"
    )]
    pub max_webhook_body_bytes: usize,

    #[arg(
        long = "direct-signature-header",
        env = "TERN_DIRECT_SIGNATURE_HEADER",
        default_value = DEFAULT_DIRECT_SIGNATURE_HEADER,
        help = "Header marking deliveries sent directly by the issue tracker"
    )]
    pub direct_signature_header: String,

    #[arg(
        long = "oauth-direct",
        env = "TERN_OAUTH_DIRECT",
        default_value_t = false,
        help = "Run the OAuth code exchange locally instead of through the OAuth proxy"
    )]
    pub oauth_direct: bool,

    #[arg(long = "oauth-client-id", env = "TERN_OAUTH_CLIENT_ID")]
    pub oauth_client_id: Option<String>,

    #[arg(
        long = "oauth-client-secret",
        env = "TERN_OAUTH_CLIENT_SECRET",
        hide_env_values = true
    )]
    pub oauth_client_secret: Option<String>,

    #[arg(
        long = "oauth-redirect-uri",
        env = "TERN_OAUTH_REDIRECT_URI",
        help = "Redirect URI registered with the tracker (defaults to <public-base-url>/callback)"
    )]
    pub oauth_redirect_uri: Option<String>,

    #[arg(long = "oauth-scope", env = "TERN_OAUTH_SCOPE")]
    pub oauth_scope: Option<String>,

    #[arg(long = "oauth-authorize-url", env = "TERN_OAUTH_AUTHORIZE_URL")]
    pub oauth_authorize_url: Option<String>,

    #[arg(long = "oauth-token-url", env = "TERN_OAUTH_TOKEN_URL")]
    pub oauth_token_url: Option<String>,

    #[arg(long = "oauth-graphql-url", env = "TERN_OAUTH_GRAPHQL_URL")]
    pub oauth_graphql_url: Option<String>,

    #[arg(
        long = "oauth-proxy-url",
        env = "TERN_OAUTH_PROXY_URL",
        help = "OAuth proxy that performs the code exchange when --oauth-direct is off"
    )]
    pub oauth_proxy_url: Option<String>,

    #[arg(
        long = "oauth-state-ttl-ms",
        env = "TERN_OAUTH_STATE_TTL_MS",
        default_value_t = duration_ms(DEFAULT_OAUTH_STATE_TTL),
        value_parser = parse_positive_u64
    )]
    pub oauth_state_ttl_ms: u64,

    #[arg(
        long = "oauth-flow-timeout-ms",
        env = "TERN_OAUTH_FLOW_TIMEOUT_MS",
        default_value_t = duration_ms(DEFAULT_OAUTH_FLOW_TIMEOUT),
        value_parser = parse_positive_u64
    )]
    pub oauth_flow_timeout_ms: u64,

    #[arg(
        long = "approval-timeout-ms",
        env = "TERN_APPROVAL_TIMEOUT_MS",
        default_value_t = duration_ms(DEFAULT_APPROVAL_TIMEOUT),
        value_parser = parse_positive_u64,
        help = "How long a procedure waits for a human approval decision (used by replay)"
    )]
    pub approval_timeout_ms: u64,

    #[command(subcommand)]
    pub command: Option<TernCommand>,
}

#[derive(Debug, Subcommand)]
pub(crate) enum TernCommand {
    /// Run the bare request gateway until interrupted (default).
    ///
    /// Serves OAuth, `/approval` and health. No tenant webhook handlers or
    /// activity engine are registered, so every `/webhook` delivery answers
    /// 401 until an embedding process registers its own.
    Serve,
    /// Feed a recorded runtime transcript through a local-only session and
    /// print the resulting session snapshot.
    Replay {
        #[arg(help = "Path to a newline-delimited runtime message transcript")]
        transcript: PathBuf,
        #[arg(long = "session-id", default_value = "replay-session")]
        session_id: String,
        #[arg(long = "issue", default_value = "REPLAY-1")]
        issue: String,
    },
}

impl Cli {
    pub(crate) fn gateway_config(&self) -> RequestGatewayConfig {
        let defaults = OAuthConfig::default();
        RequestGatewayConfig {
            bind: self.bind.clone(),
            public_base_url: non_empty(self.public_base_url.as_deref()),
            max_webhook_body_bytes: self.max_webhook_body_bytes,
            direct_signature_header: self.direct_signature_header.trim().to_ascii_lowercase(),
            oauth: OAuthConfig {
                direct: self.oauth_direct,
                client_id: non_empty(self.oauth_client_id.as_deref()),
                client_secret: non_empty(self.oauth_client_secret.as_deref()),
                redirect_uri: non_empty(self.oauth_redirect_uri.as_deref()),
                scope: non_empty(self.oauth_scope.as_deref()).unwrap_or(defaults.scope),
                authorize_url: non_empty(self.oauth_authorize_url.as_deref())
                    .unwrap_or(defaults.authorize_url),
                token_url: non_empty(self.oauth_token_url.as_deref())
                    .unwrap_or(defaults.token_url),
                graphql_url: non_empty(self.oauth_graphql_url.as_deref())
                    .unwrap_or(defaults.graphql_url),
                proxy_url: non_empty(self.oauth_proxy_url.as_deref()),
            },
            oauth_state_ttl: Duration::from_millis(self.oauth_state_ttl_ms),
            oauth_flow_timeout: Duration::from_millis(self.oauth_flow_timeout_ms),
        }
    }

    pub(crate) fn advancer_config(&self) -> ProcedureAdvancerConfig {
        ProcedureAdvancerConfig {
            approval_timeout: Duration::from_millis(self.approval_timeout_ms),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
