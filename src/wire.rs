use http::header::{HeaderName, HeaderValue};
use http::{Request, StatusCode};
use serde::Deserialize;
use uuid::Uuid;

use crate::notification::{Priority, PushNotification};
use crate::reason::RejectionReason;
use crate::response::Response;
use crate::result::{Error, Result};

pub static APNS_ID: HeaderName = HeaderName::from_static("apns-id");
pub static APNS_EXPIRATION: HeaderName = HeaderName::from_static("apns-expiration");
pub static APNS_PRIORITY: HeaderName = HeaderName::from_static("apns-priority");
pub static APNS_TOPIC: HeaderName = HeaderName::from_static("apns-topic");
pub static APNS_COLLAPSE_ID: HeaderName = HeaderName::from_static("apns-collapse-id");

/// Builds the `:method`/`:path` + header set for a notification (§4.3, §6).
///
/// The body is returned separately (as the notification's owned payload bytes) since
/// `h2` sends HEADERS and DATA as two distinct writes.
pub fn encode_request(notification: &PushNotification, bearer: Option<&str>) -> Result<Request<()>> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/3/device/{}", notification.token()))
        .header(http::header::CONTENT_LENGTH, notification.payload().len())
        .header(APNS_TOPIC.clone(), HeaderValue::from_str(notification.topic())?);

    builder = builder.header(APNS_EXPIRATION.clone(), notification.expiration().unwrap_or(0));
    builder = builder.header(
        APNS_PRIORITY.clone(),
        match notification.priority() {
            Priority::Immediate => 10,
            Priority::ConservePower => 5,
        },
    );

    if let Some(collapse_id) = notification.collapse_id() {
        builder = builder.header(APNS_COLLAPSE_ID.clone(), HeaderValue::from_str(collapse_id)?);
    }
    if let Some(apns_id) = notification.apns_id() {
        builder = builder.header(APNS_ID.clone(), HeaderValue::from_str(&apns_id.to_string())?);
    }
    if let Some(bearer) = bearer {
        builder = builder.header(http::header::AUTHORIZATION, HeaderValue::from_str(bearer)?);
    }

    Ok(builder.body(())?)
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    reason: RejectionReason,
    #[serde(default)]
    timestamp: Option<u64>,
}

/// Decodes a terminal HEADERS+DATA pair into a [`Response`] (§4.3).
///
/// `apns_id` is whatever the caller resolved from the response's `apns-id` header, or
/// the id the client generated for the request if the server didn't echo one.
/// `body` is `None` on a bare `:status 200` with no DATA frame.
pub fn decode_response(apns_id: Uuid, status: StatusCode, body: Option<&[u8]>) -> Result<Response> {
    if status == StatusCode::OK {
        return Ok(Response::accepted(apns_id));
    }

    let body = body.ok_or_else(|| Error::transport("non-200 response carried no error body"))?;
    let error: ErrorBody = serde_json::from_slice(body)?;
    Ok(Response::rejected(apns_id, error.reason, error.timestamp))
}
