use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use http::{Response as HttpResponse, StatusCode};
use serde_json::json;
use tracing::{error, instrument, warn};
use uuid::Uuid;

use crate::mock::listener::ListenerAdapter;
use crate::mock::validator::{RawRequest, Rejection, ValidatedRequest, Validator};
use crate::reason::RejectionReason;
use crate::result::Result;
use crate::transport::Transport;

/// Pluggable request policy, so a test can swap the full protocol [`Validator`] for a
/// trivial always-accept handler (§4.7: "Handler contract allows replacing the
/// validator with user policy").
pub trait MockHandler: Send + Sync {
    fn handle(&self, request: RawRequest<'_>) -> std::result::Result<ValidatedRequest, Rejection>;
}

impl MockHandler for Validator {
    fn handle(&self, request: RawRequest<'_>) -> std::result::Result<ValidatedRequest, Rejection> {
        self.validate(request)
    }
}

/// Accepts every well-formed request without consulting a device registry or
/// verifying tokens; useful for tests that only exercise the wire format.
pub struct AcceptAllHandler;

impl MockHandler for AcceptAllHandler {
    fn handle(&self, request: RawRequest<'_>) -> std::result::Result<ValidatedRequest, Rejection> {
        let token = request
            .path
            .strip_prefix("/3/device/")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Rejection { reason: RejectionReason::BadPath, apns_id: None, token_invalidation_timestamp: None })?;
        let apns_id = request
            .apns_id
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .unwrap_or_else(Uuid::new_v4);
        Ok(ValidatedRequest {
            apns_id,
            apns_id_was_generated: request.apns_id.is_none(),
            token: token.to_string(),
            topic: request.topic.unwrap_or_default().to_string(),
            priority: request.priority.and_then(|p| p.parse().ok()),
            collapse_id: request.collapse_id.map(str::to_string),
            expiration: request.expiration.and_then(|e| e.parse().ok()),
            payload: String::from_utf8_lossy(request.body).into_owned(),
        })
    }
}

/// Drives the server side of one HTTP/2 connection, running every accepted request
/// through a [`MockHandler`] and recording the outcome on a [`ListenerAdapter`] (§4.7).
pub struct MockServer<H: MockHandler> {
    handler: Arc<H>,
    listener: Arc<ListenerAdapter>,
}

impl<H: MockHandler + 'static> MockServer<H> {
    pub fn new(handler: Arc<H>, listener: Arc<ListenerAdapter>) -> Self {
        Self { handler, listener }
    }

    /// Serves requests on `transport` until the peer closes the connection.
    #[instrument(skip(self, transport))]
    pub async fn serve<T: Transport>(&self, transport: T) -> Result<()> {
        let mut connection = h2::server::handshake(transport).await?;
        while let Some(request) = connection.accept().await {
            let (request, respond) = request?;
            self.handle_one(request, respond).await;
        }
        Ok(())
    }

    async fn handle_one(
        &self,
        request: http::Request<h2::RecvStream>,
        mut respond: h2::server::SendResponse<Bytes>,
    ) {
        let (parts, mut body) = request.into_parts();
        let mut buffer = Vec::new();
        while let Some(chunk) = body.data().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(error = %e, "failed reading request body");
                    return;
                }
            };
            let _ = body.flow_control().release_capacity(chunk.len());
            buffer.extend_from_slice(&chunk);
        }

        let header = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok());
        let raw = RawRequest {
            method: parts.method.as_str(),
            path: parts.uri.path(),
            apns_id: header("apns-id"),
            topic: header("apns-topic"),
            priority: header("apns-priority"),
            collapse_id: header("apns-collapse-id"),
            expiration: header("apns-expiration"),
            authorization: header("authorization"),
            body: &buffer,
        };

        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| self.handler.handle(raw)));

        let (status, apns_id, body) = match outcome {
            Ok(Ok(validated)) => {
                self.listener.record_accepted(&validated);
                (StatusCode::OK, validated.apns_id, None)
            }
            Ok(Err(rejection)) => {
                let apns_id = rejection.apns_id.unwrap_or_else(Uuid::new_v4);
                let validated_stub = stub_for_listener(&parts, &buffer, apns_id);
                self.listener.record_rejected(&validated_stub, rejection.reason, rejection.token_invalidation_timestamp);
                (rejection.reason.status_code(), apns_id, Some(error_body(rejection)))
            }
            Err(panic) => {
                error!(?panic, "mock handler panicked");
                (StatusCode::INTERNAL_SERVER_ERROR, Uuid::new_v4(), Some(error_body(Rejection {
                    reason: RejectionReason::InternalServerError,
                    apns_id: None,
                    token_invalidation_timestamp: None,
                })))
            }
        };

        let mut response_builder = HttpResponse::builder().status(status);
        response_builder = response_builder.header("apns-id", apns_id.to_string());
        let response = response_builder.body(()).expect("well-formed response");

        match body {
            None => {
                if let Err(e) = respond.send_response(response, true) {
                    warn!(error = %e, "failed sending response headers");
                }
            }
            Some(bytes) => match respond.send_response(response, false) {
                Ok(mut send_stream) => {
                    if let Err(e) = send_stream.send_data(bytes, true) {
                        warn!(error = %e, "failed sending response body");
                    }
                }
                Err(e) => warn!(error = %e, "failed sending response headers"),
            },
        }
    }
}

fn error_body(rejection: Rejection) -> Bytes {
    let value = match rejection.token_invalidation_timestamp {
        Some(timestamp) => json!({ "reason": rejection.reason.as_str(), "timestamp": timestamp }),
        None => json!({ "reason": rejection.reason.as_str() }),
    };
    Bytes::from(serde_json::to_vec(&value).unwrap_or_default())
}

/// Builds a minimal [`ValidatedRequest`] for the listener when the real handler
/// rejected before producing one, so rejected requests still show up in
/// [`ListenerAdapter::notifications`].
fn stub_for_listener(parts: &http::request::Parts, body: &[u8], apns_id: Uuid) -> ValidatedRequest {
    let header = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok());
    ValidatedRequest {
        apns_id,
        apns_id_was_generated: header("apns-id").is_none(),
        token: parts.uri.path().strip_prefix("/3/device/").unwrap_or_default().to_string(),
        topic: header("apns-topic").unwrap_or_default().to_string(),
        priority: header("apns-priority").and_then(|p| p.parse().ok()),
        collapse_id: header("apns-collapse-id").map(str::to_string),
        expiration: header("apns-expiration").and_then(|e| e.parse().ok()),
        payload: String::from_utf8_lossy(body).into_owned(),
    }
}
