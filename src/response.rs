use uuid::Uuid;

use crate::reason::RejectionReason;

/// The outcome of sending a single notification. Resolves exactly once (§3, §8).
#[derive(Debug, Clone)]
pub struct Response {
    pub accepted: bool,
    pub rejection_reason: Option<RejectionReason>,
    pub token_invalidation_timestamp: Option<u64>,
    pub apns_id: Uuid,
}

impl Response {
    pub fn accepted(apns_id: Uuid) -> Self {
        Self {
            accepted: true,
            rejection_reason: None,
            token_invalidation_timestamp: None,
            apns_id,
        }
    }

    pub fn rejected(apns_id: Uuid, reason: RejectionReason, token_invalidation_timestamp: Option<u64>) -> Self {
        Self {
            accepted: false,
            rejection_reason: Some(reason),
            token_invalidation_timestamp,
            apns_id,
        }
    }
}
