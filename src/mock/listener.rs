use std::sync::Mutex;

use uuid::Uuid;

use crate::mock::validator::ValidatedRequest;
use crate::reason::RejectionReason;

/// A reconstructed view of one request the mock server handled, assembled from the
/// same headers and payload bytes the wire carried (§4.7).
#[derive(Debug, Clone)]
pub struct ObservedNotification {
    pub apns_id: Uuid,
    pub token: String,
    pub topic: String,
    pub priority: Option<u16>,
    pub expiration: Option<i64>,
    pub collapse_id: Option<String>,
    pub payload: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Accepted,
    Rejected { reason: RejectionReason, token_invalidation_timestamp: Option<u64> },
}

/// Records every request the mock server processed, in arrival order, so tests can
/// assert on what the server actually saw (§4.7's "Listener adapter").
#[derive(Debug, Default)]
pub struct ListenerAdapter {
    observed: Mutex<Vec<ObservedNotification>>,
}

impl ListenerAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self, request: &ValidatedRequest) {
        self.observed.lock().unwrap().push(ObservedNotification {
            apns_id: request.apns_id,
            token: request.token.clone(),
            topic: request.topic.clone(),
            priority: request.priority,
            expiration: request.expiration,
            collapse_id: request.collapse_id.clone(),
            payload: request.payload.clone(),
            outcome: Outcome::Accepted,
        });
    }

    pub fn record_rejected(
        &self,
        request: &ValidatedRequest,
        reason: RejectionReason,
        token_invalidation_timestamp: Option<u64>,
    ) {
        self.observed.lock().unwrap().push(ObservedNotification {
            apns_id: request.apns_id,
            token: request.token.clone(),
            topic: request.topic.clone(),
            priority: request.priority,
            expiration: request.expiration,
            collapse_id: request.collapse_id.clone(),
            payload: request.payload.clone(),
            outcome: Outcome::Rejected { reason, token_invalidation_timestamp },
        });
    }

    pub fn notifications(&self) -> Vec<ObservedNotification> {
        self.observed.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.observed.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
