//! `/webhook` multiplexing across tenant handlers.
use super::*;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookHandlerError {
    /// The delivery is not addressed to this handler.
    #[error("webhook delivery rejected: {0}")]
    Rejected(String),
    #[error("webhook handler failed: {0}")]
    Failed(String),
}

/// Buffered inbound delivery.
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl WebhookRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawWebhookResponse {
    pub status: StatusCode,
    pub body: String,
}

impl RawWebhookResponse {
    pub fn ok() -> Self {
        Self {
            status: StatusCode::OK,
            body: "ok".to_string(),
        }
    }
}

impl IntoResponse for RawWebhookResponse {
    fn into_response(self) -> Response {
        (self.status, self.body).into_response()
    }
}

/// Handler for deliveries signed by the platform itself. It owns signature
/// verification and the response; any error passes the delivery on.
#[async_trait]
pub trait RawWebhookHandler: Send + Sync {
    async fn handle_raw(
        &self,
        request: &WebhookRequest,
    ) -> Result<RawWebhookResponse, WebhookHandlerError>;
}

/// Handler for proxy-relayed deliveries. Only invoked after the gateway has
/// verified the relay signature with the handler's secret.
#[async_trait]
pub trait SignedWebhookHandler: Send + Sync {
    async fn handle_signed(&self, request: &WebhookRequest) -> Result<(), WebhookHandlerError>;
}

#[derive(Clone)]
pub(super) struct SignedRegistration {
    pub(super) secret: String,
    pub(super) handler: Arc<dyn SignedWebhookHandler>,
}

#[derive(Debug)]
enum BodyReadError {
    TooLarge,
    Stream(axum::Error),
}

pub(super) async fn handle_webhook(
    State(state): State<Arc<GatewayState>>,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Response {
    if method != Method::POST {
        return plain_text_response(StatusCode::NOT_FOUND, "not found");
    }

    let limit = state.config.max_webhook_body_bytes;
    let declared_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    if declared_length.is_some_and(|length| length > limit) {
        warn!(limit, declared_length, "rejecting oversized webhook body");
        return payload_too_large_response();
    }
    let body = match read_capped_body(body, limit).await {
        Ok(body) => body,
        Err(BodyReadError::TooLarge) => {
            warn!(limit, "webhook body exceeded cap while streaming");
            return payload_too_large_response();
        }
        Err(BodyReadError::Stream(error)) => {
            warn!(%error, "failed to read webhook body");
            return plain_text_response(StatusCode::BAD_REQUEST, "invalid request body");
        }
    };

    let request = WebhookRequest { headers, body };
    if request
        .header(&state.config.direct_signature_header)
        .is_some()
    {
        return dispatch_raw_webhook(&state, &request).await;
    }
    dispatch_signed_webhook(&state, &request).await
}

/// Reads the body while enforcing `limit` on every chunk.
async fn read_capped_body(body: Body, limit: usize) -> Result<Bytes, BodyReadError> {
    let mut stream = body.into_data_stream();
    let mut buffer = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(BodyReadError::Stream)?;
        if buffer.len().saturating_add(chunk.len()) > limit {
            return Err(BodyReadError::TooLarge);
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buffer))
}

fn payload_too_large_response() -> Response {
    (
        StatusCode::PAYLOAD_TOO_LARGE,
        [(header::CONNECTION, "close")],
        "payload too large",
    )
        .into_response()
}

async fn dispatch_raw_webhook(state: &GatewayState, request: &WebhookRequest) -> Response {
    let handlers = lock_or_recover(&state.raw_handlers).clone();
    for (handler_index, handler) in handlers.iter().enumerate() {
        match AssertUnwindSafe(handler.handle_raw(request))
            .catch_unwind()
            .await
        {
            Ok(Ok(response)) => {
                debug!(
                    handler_index,
                    status = response.status.as_u16(),
                    "raw webhook handler accepted delivery"
                );
                return response.into_response();
            }
            Ok(Err(error)) => {
                debug!(handler_index, %error, "raw webhook handler passed on delivery");
            }
            Err(panic) => {
                error!(
                    handler_index,
                    panic = panic_message(panic.as_ref()),
                    "raw webhook handler panicked"
                );
            }
        }
    }
    warn!(
        handlers = handlers.len(),
        "no raw webhook handler accepted delivery"
    );
    plain_text_response(StatusCode::UNAUTHORIZED, "unauthorized")
}

async fn dispatch_signed_webhook(state: &GatewayState, request: &WebhookRequest) -> Response {
    let Some(signature) = request.header(SIGNATURE_HEADER) else {
        warn!("relayed webhook is missing its signature header");
        return plain_text_response(StatusCode::BAD_REQUEST, "missing signature");
    };
    let timestamp = request.header(TIMESTAMP_HEADER);

    let registrations = lock_or_recover(&state.signed_handlers).clone();
    for (handler_index, registration) in registrations.iter().enumerate() {
        if verify_hmac_sha256_signature(&registration.secret, timestamp, &request.body, signature)
            .is_err()
        {
            continue;
        }
        match AssertUnwindSafe(registration.handler.handle_signed(request))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {
                debug!(handler_index, "signed webhook handler accepted delivery");
                return plain_text_response(StatusCode::OK, "ok");
            }
            Ok(Err(error)) => {
                warn!(handler_index, %error, "signed webhook handler failed");
            }
            Err(panic) => {
                error!(
                    handler_index,
                    panic = panic_message(panic.as_ref()),
                    "signed webhook handler panicked"
                );
            }
        }
    }
    warn!(
        handlers = registrations.len(),
        "no signed webhook handler verified delivery"
    );
    plain_text_response(StatusCode::UNAUTHORIZED, "unauthorized")
}

#[cfg(test)]
mod body_cap_tests {
    use super::{read_capped_body, BodyReadError};
    use axum::body::{Body, Bytes};

    fn chunked(chunks: &[&'static [u8]]) -> Body {
        let items: Vec<Result<Bytes, std::io::Error>> = chunks
            .iter()
            .map(|chunk| Ok(Bytes::from_static(chunk)))
            .collect();
        Body::from_stream(futures_util::stream::iter(items))
    }

    #[tokio::test]
    async fn unit_streamed_body_within_cap_is_buffered() {
        let body = read_capped_body(chunked(&[b"hello ", b"world"]), 11)
            .await
            .expect("within cap");
        assert_eq!(body, Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn regression_streamed_body_without_length_is_capped() {
        let result = read_capped_body(chunked(&[b"0123456789", b"0123456789"]), 16).await;
        assert!(matches!(result, Err(BodyReadError::TooLarge)));
    }
}
