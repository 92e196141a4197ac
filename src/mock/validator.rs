use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use crate::clock::Clock;
use crate::reason::RejectionReason;
use crate::token::TokenVerifier;

/// A parsed, not-yet-validated view of an inbound request (§4.7).
pub struct RawRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub apns_id: Option<&'a str>,
    pub topic: Option<&'a str>,
    pub priority: Option<&'a str>,
    pub collapse_id: Option<&'a str>,
    pub expiration: Option<&'a str>,
    pub authorization: Option<&'a str>,
    pub body: &'a [u8],
}

/// The result of a successful validation: everything downstream needs to accept the
/// request and hand a view of it to the [`crate::mock::listener::ListenerAdapter`].
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub apns_id: Uuid,
    pub apns_id_was_generated: bool,
    pub token: String,
    pub topic: String,
    pub priority: Option<u16>,
    pub collapse_id: Option<String>,
    pub expiration: Option<i64>,
    pub payload: String,
}

/// Outcome of a failed validation: a rejection reason plus, for `Unregistered`, the
/// device's invalidation timestamp (§4.7, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectionReason,
    pub apns_id: Option<Uuid>,
    pub token_invalidation_timestamp: Option<u64>,
}

impl Rejection {
    fn new(reason: RejectionReason) -> Self {
        Self { reason, apns_id: None, token_invalidation_timestamp: None }
    }
}

/// Registered device tokens and their topic/expiration bindings, shared between the
/// validator and whatever test harness is asserting against it (§4.7).
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    device_tokens_by_topic: RwLock<HashMap<String, HashSet<String>>>,
    expiration_timestamps_by_device_token: RwLock<HashMap<String, u64>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_device(&self, topic: impl Into<String>, token: impl Into<String>) -> &Self {
        self.device_tokens_by_topic
            .write()
            .unwrap()
            .entry(topic.into())
            .or_default()
            .insert(token.into());
        self
    }

    pub fn expire_device(&self, token: impl Into<String>, at: u64) -> &Self {
        self.expiration_timestamps_by_device_token
            .write()
            .unwrap()
            .insert(token.into(), at);
        self
    }

    fn is_bound(&self, topic: &str, token: &str) -> bool {
        self.device_tokens_by_topic
            .read()
            .unwrap()
            .get(topic)
            .is_some_and(|tokens| tokens.contains(token))
    }

    fn expiration_of(&self, token: &str) -> Option<u64> {
        self.expiration_timestamps_by_device_token.read().unwrap().get(token).copied()
    }
}

/// Implements the mock server's ordered request-validation state machine (§4.7).
pub struct Validator {
    pub registry: Arc<DeviceRegistry>,
    pub token_verifier: Option<Arc<TokenVerifier>>,
    pub clock: Arc<dyn Clock>,
}

impl Validator {
    /// Runs the ten ordered checks from §4.7, first failure wins.
    pub fn validate(&self, request: RawRequest<'_>) -> Result<ValidatedRequest, Rejection> {
        // 1. method + path.
        if request.method != "POST" || !is_device_path(request.path) {
            return Err(Rejection::new(RejectionReason::BadPath));
        }
        let path_token = device_token_from_path(request.path);

        // 2. token presence + shape.
        let token = path_token.ok_or_else(|| Rejection::new(RejectionReason::MissingDeviceToken))?;
        if !is_valid_token_shape(token) {
            return Err(Rejection::new(RejectionReason::BadDeviceToken));
        }

        // 3. apns-id.
        let (apns_id, apns_id_was_generated) = match request.apns_id {
            Some(raw) => {
                let id = Uuid::parse_str(raw).map_err(|_| Rejection::new(RejectionReason::BadMessageId))?;
                (id, false)
            }
            None => (Uuid::new_v4(), true),
        };
        let fail = |reason: RejectionReason| Rejection { reason, apns_id: Some(apns_id), token_invalidation_timestamp: None };

        // 4. topic.
        let topic = request.topic.ok_or_else(|| fail(RejectionReason::MissingTopic))?;
        if topic.is_empty() {
            return Err(fail(RejectionReason::MissingTopic));
        }

        // 5. priority.
        let priority = match request.priority {
            Some(raw) => {
                let value: u16 = raw.parse().map_err(|_| fail(RejectionReason::BadPriority))?;
                if value != 10 && value != 5 {
                    return Err(fail(RejectionReason::BadPriority));
                }
                Some(value)
            }
            None => None,
        };

        // 6. collapse-id.
        let collapse_id = match request.collapse_id {
            Some(raw) if raw.len() > 64 => return Err(fail(RejectionReason::BadCollapseId)),
            Some(raw) => Some(raw.to_string()),
            None => None,
        };

        // 7. expiration.
        let expiration = match request.expiration {
            Some(raw) => {
                let value: i64 = raw.parse().map_err(|_| fail(RejectionReason::BadExpirationDate))?;
                if value < 0 {
                    return Err(fail(RejectionReason::BadExpirationDate));
                }
                Some(value)
            }
            None => None,
        };

        // 8. payload.
        if request.body.is_empty() {
            return Err(fail(RejectionReason::PayloadEmpty));
        }
        if request.body.len() > 4096 {
            return Err(fail(RejectionReason::PayloadTooLarge));
        }
        let payload = String::from_utf8(request.body.to_vec())
            .map_err(|_| fail(RejectionReason::PayloadEmpty))?;

        // 9. token auth.
        if let Some(verifier) = &self.token_verifier {
            let bearer = request.authorization.ok_or_else(|| fail(RejectionReason::MissingProviderToken))?;
            if !bearer.starts_with("bearer ") {
                return Err(fail(RejectionReason::MissingProviderToken));
            }
            verifier
                .verify(bearer, topic, self.clock.now())
                .map_err(|reason| fail(reason))?;
        }

        // 10. token/topic binding + registration.
        if !self.registry.is_bound(topic, token) {
            return Err(fail(RejectionReason::DeviceTokenNotForTopic));
        }
        if let Some(expired_at) = self.registry.expiration_of(token) {
            if expired_at < self.clock.now() {
                return Err(Rejection {
                    reason: RejectionReason::Unregistered,
                    apns_id: Some(apns_id),
                    token_invalidation_timestamp: Some(expired_at),
                });
            }
        }

        Ok(ValidatedRequest {
            apns_id,
            apns_id_was_generated,
            token: token.to_string(),
            topic: topic.to_string(),
            priority,
            collapse_id,
            expiration,
            payload,
        })
    }
}

fn is_device_path(path: &str) -> bool {
    path.starts_with("/3/device/")
}

fn device_token_from_path(path: &str) -> Option<&str> {
    path.strip_prefix("/3/device/").filter(|rest| !rest.is_empty())
}

fn is_valid_token_shape(token: &str) -> bool {
    (64..=200).contains(&token.len()) && token.bytes().all(|b| b.is_ascii_hexdigit())
}
