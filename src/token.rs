use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::reason::RejectionReason;
use crate::result::Result;

/// A provider token's lifetime before [`AuthTokenIssuer`] mints a replacement (§4.2).
pub const TOKEN_REFRESH_PERIOD_SECS: u64 = 55 * 60;

/// The window within which a provider token's `iat` is still considered fresh (§3, §4.2).
pub const TOKEN_MAX_AGE_SECS: u64 = 3600;

#[derive(Debug, Serialize, Deserialize)]
struct Claims<'a> {
    iss: &'a str,
    iat: u64,
}

/// An EC (P-256) private key identified by `(team_id, key_id)`, used to sign ES256
/// provider-token JWTs.
#[derive(Clone)]
pub struct SigningKey {
    team_id: String,
    key_id: String,
    encoding_key: EncodingKey,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("team_id", &self.team_id)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    pub fn from_ec_pem(team_id: impl Into<String>, key_id: impl Into<String>, pem: &[u8]) -> Result<Self> {
        Ok(Self {
            team_id: team_id.into(),
            key_id: key_id.into(),
            encoding_key: EncodingKey::from_ec_pem(pem)?,
        })
    }
}

struct CachedToken {
    bearer: Arc<str>,
    issued_at: u64,
}

/// Issues and caches ES256 provider-token JWTs for a single `(team_id, key_id)` pair.
///
/// The header is `{alg: ES256, typ: JWT, kid: <key-id>}` and the claims are
/// `{iss: <team-id>, iat: <seconds-since-epoch>}`; `jsonwebtoken`'s ES256 implementation
/// already produces the raw 64-byte R‖S signature the APNs wire format expects (not
/// ASN.1 DER), matching §4.2. The serialised bearer string is cached and only
/// regenerated once it is older than [`TOKEN_REFRESH_PERIOD_SECS`].
pub struct AuthTokenIssuer {
    signing_key: SigningKey,
    clock: Arc<dyn Clock>,
    cache: RwLock<Option<CachedToken>>,
}

impl AuthTokenIssuer {
    pub fn new(signing_key: SigningKey, clock: Arc<dyn Clock>) -> Self {
        Self {
            signing_key,
            clock,
            cache: RwLock::new(None),
        }
    }

    /// Returns `bearer <jwt>`, minting a fresh token if the cached one has aged past
    /// [`TOKEN_REFRESH_PERIOD_SECS`].
    pub fn bearer_token(&self) -> Result<Arc<str>> {
        let now = self.clock.now();
        if let Some(cached) = self.cache.read().unwrap().as_ref() {
            if now.saturating_sub(cached.issued_at) < TOKEN_REFRESH_PERIOD_SECS {
                return Ok(cached.bearer.clone());
            }
        }

        let bearer = self.mint(now)?;
        let mut cache = self.cache.write().unwrap();
        *cache = Some(CachedToken { bearer: bearer.clone(), issued_at: now });
        Ok(bearer)
    }

    fn mint(&self, iat: u64) -> Result<Arc<str>> {
        let header = Header { alg: Algorithm::ES256, kid: Some(self.signing_key.key_id.clone()), ..Default::default() };
        let claims = Claims { iss: &self.signing_key.team_id, iat };
        let jwt = jsonwebtoken::encode(&header, &claims, &self.signing_key.encoding_key)?;
        Ok(Arc::from(format!("bearer {jwt}")))
    }
}

/// An EC (P-256) public key identified by `(team_id, key_id)`, plus the set of topics
/// the mock server allows tokens signed by the matching private key to push to.
pub struct VerificationKey {
    team_id: String,
    key_id: String,
    decoding_key: DecodingKey,
    authorized_topics: std::collections::HashSet<String>,
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationKey")
            .field("team_id", &self.team_id)
            .field("key_id", &self.key_id)
            .field("authorized_topics", &self.authorized_topics)
            .finish_non_exhaustive()
    }
}

impl VerificationKey {
    pub fn from_ec_pem(
        team_id: impl Into<String>,
        key_id: impl Into<String>,
        pem: &[u8],
        authorized_topics: impl IntoIterator<Item = String>,
    ) -> Result<Self> {
        Ok(Self {
            team_id: team_id.into(),
            key_id: key_id.into(),
            decoding_key: DecodingKey::from_ec_pem(pem)?,
            authorized_topics: authorized_topics.into_iter().collect(),
        })
    }
}

/// Verifies provider-token JWTs against a table of registered [`VerificationKey`]s,
/// keyed by `kid` (§4.2, §4.7 step 9).
#[derive(Debug, Default)]
pub struct TokenVerifier {
    keys_by_kid: HashMap<String, VerificationKey>,
}

impl TokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: VerificationKey) -> &mut Self {
        self.keys_by_kid.insert(key.key_id.clone(), key);
        self
    }

    /// Verifies `bearer` (the full `bearer <jwt>` header value) was issued for `topic`.
    ///
    /// Ordered the way the mock server's validation state machine needs it (§4.7 step 9):
    /// missing/garbled prefix and unparseable tokens are caller errors raised before this
    /// is reached; this method only returns the three reasons specific to token
    /// verification.
    pub fn verify(&self, bearer: &str, topic: &str, now: u64) -> std::result::Result<(), RejectionReason> {
        let jwt = bearer.strip_prefix("bearer ").ok_or(RejectionReason::InvalidProviderToken)?;

        let header = jsonwebtoken::decode_header(jwt).map_err(|_| RejectionReason::InvalidProviderToken)?;
        let kid = header.kid.ok_or(RejectionReason::InvalidProviderToken)?;
        let key = self.keys_by_kid.get(&kid).ok_or(RejectionReason::InvalidProviderToken)?;

        let mut validation = Validation::new(Algorithm::ES256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        let data = jsonwebtoken::decode::<Claims>(jwt, &key.decoding_key, &validation)
            .map_err(|_| RejectionReason::InvalidProviderToken)?;

        if now.saturating_sub(data.claims.iat) > TOKEN_MAX_AGE_SECS {
            return Err(RejectionReason::ExpiredProviderToken);
        }
        if data.claims.iss != key.team_id {
            return Err(RejectionReason::InvalidProviderToken);
        }
        if !key.authorized_topics.contains(topic) {
            return Err(RejectionReason::InvalidProviderToken);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::FixedClock;

    const PRIVATE_KEY: &str = include_str!("../tests/fixtures/ec_private_key.pem");
    const PUBLIC_KEY: &str = include_str!("../tests/fixtures/ec_public_key.pem");
    const OTHER_PRIVATE_KEY: &str = include_str!("../tests/fixtures/ec_private_key_2.pem");
    const OTHER_PUBLIC_KEY: &str = include_str!("../tests/fixtures/ec_public_key_2.pem");

    fn issuer(clock: Arc<dyn Clock>) -> AuthTokenIssuer {
        let key = SigningKey::from_ec_pem("TEAMID1234", "KEYID1234", PRIVATE_KEY.as_bytes()).unwrap();
        AuthTokenIssuer::new(key, clock)
    }

    fn verifier() -> TokenVerifier {
        let mut verifier = TokenVerifier::new();
        verifier.register(
            VerificationKey::from_ec_pem(
                "TEAMID1234",
                "KEYID1234",
                PUBLIC_KEY.as_bytes(),
                ["com.example.app".to_string()],
            )
            .unwrap(),
        );
        verifier
    }

    #[test]
    fn a_freshly_signed_token_verifies() {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(1_700_000_000));
        let issuer = issuer(clock.clone());
        let bearer = issuer.bearer_token().unwrap();
        let verifier = verifier();
        assert_eq!(verifier.verify(&bearer, "com.example.app", clock.now()), Ok(()));
    }

    #[test]
    fn token_is_cached_until_the_refresh_period() {
        let clock = Arc::new(FixedClock::new(1_700_000_000));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let issuer = issuer(dyn_clock);
        let first = issuer.bearer_token().unwrap();
        clock.advance(TOKEN_REFRESH_PERIOD_SECS - 1);
        let second = issuer.bearer_token().unwrap();
        assert_eq!(first, second);

        clock.advance(2);
        let third = issuer.bearer_token().unwrap();
        assert_ne!(first, third);
    }

    #[test]
    fn a_token_signed_by_an_unregistered_key_rejects_with_invalid_provider_token() {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(1_700_000_000));
        let key = SigningKey::from_ec_pem("TEAMID1234", "KEYID1234", OTHER_PRIVATE_KEY.as_bytes()).unwrap();
        let issuer = AuthTokenIssuer::new(key, clock.clone());
        let bearer = issuer.bearer_token().unwrap();

        // `verifier()` only registers the public half of PRIVATE_KEY, so a token signed
        // with OTHER_PRIVATE_KEY under the same kid fails signature verification.
        let verifier = verifier();
        assert_eq!(
            verifier.verify(&bearer, "com.example.app", clock.now()),
            Err(RejectionReason::InvalidProviderToken)
        );

        // But it does verify against the matching key.
        let mut matching_verifier = TokenVerifier::new();
        matching_verifier.register(
            VerificationKey::from_ec_pem(
                "TEAMID1234",
                "KEYID1234",
                OTHER_PUBLIC_KEY.as_bytes(),
                ["com.example.app".to_string()],
            )
            .unwrap(),
        );
        assert_eq!(
            matching_verifier.verify(&bearer, "com.example.app", clock.now()),
            Ok(())
        );
    }

    #[test]
    fn stale_token_rejects_as_expired() {
        let clock = Arc::new(FixedClock::new(1_700_000_000));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let issuer = issuer(dyn_clock);
        let bearer = issuer.bearer_token().unwrap();
        clock.advance(TOKEN_MAX_AGE_SECS + 1);
        let verifier = verifier();
        assert_eq!(
            verifier.verify(&bearer, "com.example.app", clock.now()),
            Err(RejectionReason::ExpiredProviderToken)
        );
    }

    #[test]
    fn unauthorized_topic_rejects() {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(1_700_000_000));
        let issuer = issuer(clock.clone());
        let bearer = issuer.bearer_token().unwrap();
        let verifier = verifier();
        assert_eq!(
            verifier.verify(&bearer, "com.example.other", clock.now()),
            Err(RejectionReason::InvalidProviderToken)
        );
    }
}
