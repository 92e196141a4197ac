use uuid::Uuid;

use crate::result::{Error, Result};

/// Notification priority. Values are the literal `apns-priority` header values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde_repr::Serialize_repr, serde_repr::Deserialize_repr)]
#[repr(u8)]
pub enum Priority {
    /// Send the notification based on power considerations on the user's device.
    ConservePower = 5,
    /// Send the notification immediately.
    Immediate = 10,
}

/// An immutable, single-use push notification.
///
/// Constructed once by the caller and consumed by exactly one `send()`; its fields are
/// read-only for the rest of its lifetime (§3).
#[derive(Debug, Clone)]
pub struct PushNotification {
    token: String,
    topic: String,
    payload: String,
    expiration: Option<u64>,
    priority: Priority,
    collapse_id: Option<String>,
    apns_id: Option<Uuid>,
}

impl PushNotification {
    /// Validates and constructs a notification.
    ///
    /// `token` must be 64..=200 hex characters; `topic` must be non-empty; `payload`
    /// must be UTF-8 JSON no larger than 4096 bytes (use [`crate::payload::PayloadBuilder`]
    /// to stay within that budget); `collapse_id`, if present, must be at most 64 bytes.
    pub fn new(token: impl Into<String>, topic: impl Into<String>, payload: impl Into<String>) -> Result<Self> {
        let token = token.into();
        let topic = topic.into();
        let payload = payload.into();

        validate_token(&token)?;
        if topic.is_empty() {
            return Err(Error::invalid_argument("topic must not be empty"));
        }
        if payload.len() > 4096 {
            return Err(Error::invalid_argument(format!(
                "payload of {} bytes exceeds the 4096 byte APNs limit",
                payload.len()
            )));
        }

        Ok(Self {
            token,
            topic,
            payload,
            expiration: None,
            priority: Priority::Immediate,
            collapse_id: None,
            apns_id: None,
        })
    }

    pub fn with_expiration(mut self, expiration: u64) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_collapse_id(mut self, collapse_id: impl Into<String>) -> Result<Self> {
        let collapse_id = collapse_id.into();
        if collapse_id.len() > 64 {
            return Err(Error::invalid_argument("collapse-id must be at most 64 bytes"));
        }
        self.collapse_id = Some(collapse_id);
        self
    }

    pub fn with_apns_id(mut self, apns_id: Uuid) -> Self {
        self.apns_id = Some(apns_id);
        self
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn expiration(&self) -> Option<u64> {
        self.expiration
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn collapse_id(&self) -> Option<&str> {
        self.collapse_id.as_deref()
    }

    pub fn apns_id(&self) -> Option<Uuid> {
        self.apns_id
    }
}

fn validate_token(token: &str) -> Result<()> {
    if !(64..=200).contains(&token.len()) {
        return Err(Error::invalid_argument(format!(
            "device token must be 64..=200 hex characters, got {}",
            token.len()
        )));
    }
    if !token.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::invalid_argument("device token must be hex-encoded"));
    }
    Ok(())
}
