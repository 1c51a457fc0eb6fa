//! Request gateway: one HTTP listener serving tenant webhooks, the OAuth
//! handshake and human approval responses.

mod request_gateway;
mod webhook_signature;

pub use request_gateway::{
    ApprovalError, GatewayError, GatewayLifecycle, OAuthCallbackHandler, OAuthConfig,
    OAuthCredentials, OAuthFlow, OAuthFlowError, RawWebhookHandler, RawWebhookResponse,
    RequestGateway, RequestGatewayConfig, SignedWebhookHandler, TunnelProvider,
    WebhookHandlerError, WebhookRequest, DEFAULT_BIND, DEFAULT_DIRECT_SIGNATURE_HEADER,
    DEFAULT_MAX_WEBHOOK_BODY_BYTES, DEFAULT_OAUTH_FLOW_TIMEOUT, DEFAULT_OAUTH_STATE_TTL,
    HEALTH_ENDPOINT, OAUTH_AUTHORIZE_ENDPOINT, OAUTH_CALLBACK_ENDPOINT, WEBHOOK_ENDPOINT,
};
pub use webhook_signature::{
    sign_hmac_sha256, verify_hmac_sha256_signature, WebhookSignatureError, SIGNATURE_HEADER,
    TIMESTAMP_HEADER,
};
