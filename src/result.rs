use crate::reason::RejectionReason;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error taxonomy for the APNs core.
///
/// Per-notification failures (`Rejected`, `Unprocessed`) resolve a single `send()`
/// future; connection- and pool-level failures (`TransportFailure`, `NotConnected`,
/// `ClientClosed`) may fail many pending handles at once. `InvalidArgument` and
/// `PayloadTooLarge` are caller-side validation failures raised before any I/O happens.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// APNs (or the mock server) returned a non-200 response for this notification.
    #[error("notification rejected: {reason}")]
    Rejected {
        reason: RejectionReason,
        token_invalidation_timestamp: Option<u64>,
    },

    /// The notification was written to the wire but GOAWAY indicates the server never
    /// processed it. Safe to retry on a different connection.
    #[error("notification not processed by the peer before GOAWAY; retry is safe")]
    Unprocessed,

    /// TCP/TLS/HTTP2 failure before or during write. Safe to retry.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// No connection became available within the caller's timeout.
    #[error("no connection available within timeout")]
    NotConnected,

    /// The façade or pool has already been shut down.
    #[error("client is closed")]
    ClientClosed,

    /// Caller-side validation failure (bad token, bad topic, out-of-range volume, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The payload's non-shortenable skeleton alone exceeds the requested byte budget.
    #[error("payload of {skeleton_bytes} bytes exceeds the {max_bytes} byte budget even with an empty alert body")]
    PayloadTooLarge { skeleton_bytes: usize, max_bytes: usize },

    #[error("interruption level does not match sound critical flag")]
    CriticalSound,

    #[error(transparent)]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error(transparent)]
    Http(#[from] http::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    H2(#[from] h2::Error),

    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    SystemTime(#[from] std::time::SystemTimeError),

    #[error("unknown")]
    Unknown,
}

impl Error {
    pub fn transport(cause: impl std::fmt::Display) -> Self {
        Error::TransportFailure(cause.to_string())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }
}
