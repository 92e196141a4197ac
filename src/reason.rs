use http::StatusCode;
use serde::{Deserialize, Serialize};

/// The closed set of rejection reasons APNs (and the mock server) can report.
///
/// Serialises exactly as the `reason` field of an APNs error body, e.g.
/// `{"reason":"BadDeviceToken"}`.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum RejectionReason {
    #[error("the collapse identifier exceeds the maximum allowed size")]
    BadCollapseId,
    #[error("the specified device token is invalid")]
    BadDeviceToken,
    #[error("the apns-expiration value is invalid")]
    BadExpirationDate,
    #[error("the apns-id value is invalid")]
    BadMessageId,
    #[error("the request :path is invalid")]
    BadPath,
    #[error("the apns-priority value is invalid")]
    BadPriority,
    #[error("the apns-topic value is invalid")]
    BadTopic,
    #[error("the device token doesn't match the specified topic")]
    DeviceTokenNotForTopic,
    #[error("one or more headers are repeated")]
    DuplicateHeaders,
    #[error("the provider token is stale and a new token should be generated")]
    ExpiredProviderToken,
    #[error("the specified action is not allowed")]
    Forbidden,
    #[error("idle timeout")]
    IdleTimeout,
    #[error("the provider token is not valid, or its signature can't be verified")]
    InvalidProviderToken,
    #[error("the device token isn't specified in the request path")]
    MissingDeviceToken,
    #[error("no provider token was specified")]
    MissingProviderToken,
    #[error("the apns-topic header is required and was not specified")]
    MissingTopic,
    #[error("the message payload is empty")]
    PayloadEmpty,
    #[error("the message payload is too large")]
    PayloadTooLarge,
    #[error("the provider's authentication token is being updated too often")]
    TooManyProviderTokenUpdates,
    #[error("too many requests were made consecutively to the same device token")]
    TooManyRequests,
    #[error("pushing to this topic is not allowed")]
    TopicDisallowed,
    #[error("the device token is inactive for the specified topic")]
    Unregistered,
    #[error("an internal server error occurred")]
    InternalServerError,
    #[error("the service is unavailable")]
    ServiceUnavailable,
    #[error("the server is shutting down")]
    Shutdown,
}

impl RejectionReason {
    /// HTTP status the mock server (and real APNs) report alongside this reason.
    ///
    /// The spec's status vocabulary is `{400, 403, 405, 410, 413, 429, 500, 503}` — a
    /// narrower set than Apple's live documentation (which uses a separate 404 for
    /// `BadPath`). `BadPath` is folded into 400 here to stay within that vocabulary;
    /// see DESIGN.md for the rationale. 405 is unused: a non-POST method is folded into
    /// `BadPath`/400 by the validator alongside a malformed path, rather than reported
    /// separately.
    pub fn status_code(self) -> StatusCode {
        use RejectionReason::*;
        match self {
            BadCollapseId | BadDeviceToken | BadExpirationDate | BadMessageId | BadPath
            | BadPriority | BadTopic | DeviceTokenNotForTopic | DuplicateHeaders | IdleTimeout
            | MissingDeviceToken | MissingTopic | PayloadEmpty | TopicDisallowed => {
                StatusCode::BAD_REQUEST
            }
            ExpiredProviderToken | Forbidden | InvalidProviderToken | MissingProviderToken => {
                StatusCode::FORBIDDEN
            }
            Unregistered => StatusCode::GONE,
            PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            TooManyProviderTokenUpdates | TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceUnavailable | Shutdown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn as_str(self) -> &'static str {
        use RejectionReason::*;
        match self {
            BadCollapseId => "BadCollapseId",
            BadDeviceToken => "BadDeviceToken",
            BadExpirationDate => "BadExpirationDate",
            BadMessageId => "BadMessageId",
            BadPath => "BadPath",
            BadPriority => "BadPriority",
            BadTopic => "BadTopic",
            DeviceTokenNotForTopic => "DeviceTokenNotForTopic",
            DuplicateHeaders => "DuplicateHeaders",
            ExpiredProviderToken => "ExpiredProviderToken",
            Forbidden => "Forbidden",
            IdleTimeout => "IdleTimeout",
            InvalidProviderToken => "InvalidProviderToken",
            MissingDeviceToken => "MissingDeviceToken",
            MissingProviderToken => "MissingProviderToken",
            MissingTopic => "MissingTopic",
            PayloadEmpty => "PayloadEmpty",
            PayloadTooLarge => "PayloadTooLarge",
            TooManyProviderTokenUpdates => "TooManyProviderTokenUpdates",
            TooManyRequests => "TooManyRequests",
            TopicDisallowed => "TopicDisallowed",
            Unregistered => "Unregistered",
            InternalServerError => "InternalServerError",
            ServiceUnavailable => "ServiceUnavailable",
            Shutdown => "Shutdown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_stay_within_the_spec_vocabulary() {
        let allowed = [400, 403, 405, 410, 413, 429, 500, 503];
        for reason in [
            RejectionReason::BadCollapseId,
            RejectionReason::BadPath,
            RejectionReason::Unregistered,
            RejectionReason::PayloadTooLarge,
            RejectionReason::TooManyRequests,
            RejectionReason::InternalServerError,
            RejectionReason::Shutdown,
        ] {
            assert!(allowed.contains(&reason.status_code().as_u16()));
        }
    }

    #[test]
    fn round_trips_through_json() {
        let value = serde_json::json!({"reason": "Unregistered", "timestamp": 1700000000});
        let reason: RejectionReason = serde_json::from_value(
            value.get("reason").cloned().unwrap(),
        )
        .unwrap();
        assert_eq!(reason, RejectionReason::Unregistered);
        assert_eq!(serde_json::to_string(&reason).unwrap(), "\"Unregistered\"");
    }
}
