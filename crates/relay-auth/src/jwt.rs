//! JWT verification for handshake credentials.
//!
//! Tokens are HS256-signed with a shared secret. The payload carries the game
//! account claims (`userId`, `steamId`, `tier`). `exp` is honored when present
//! but not required, since game clients are issued long-lived session tokens.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{AuthError, AuthResult};

/// Minimum accepted HS256 secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Claims carried by a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    /// Account id.
    pub user_id: String,
    /// Platform account id.
    #[serde(default, rename = "steamId", skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Subscription tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    /// Expiration time (Unix timestamp).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Issued at time (Unix timestamp).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
}

impl SessionClaims {
    /// Creates claims for a user, issued now, without expiry.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            external_id: None,
            tier: None,
            exp: None,
            iat: Some(Utc::now().timestamp()),
        }
    }

    /// Sets the platform account id.
    #[must_use]
    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = Some(id.into());
        self
    }

    /// Sets the tier.
    #[must_use]
    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }

    /// Sets the expiration to a duration from now. Negative durations yield an
    /// already-expired token.
    #[must_use]
    pub fn with_expiry_duration(mut self, duration: Duration) -> Self {
        self.exp = Some((Utc::now() + duration).timestamp());
        self
    }
}

/// Identity bound to a connection for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    /// Account id; also the rate-limit key.
    pub user_id: String,
    /// Platform account id.
    pub external_id: Option<String>,
    /// Subscription tier.
    pub tier: Option<String>,
}

impl Identity {
    /// Creates an identity with only a user id.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            external_id: None,
            tier: None,
        }
    }

    /// Key under which this identity's rate-limit window is tracked.
    #[must_use]
    pub fn rate_limit_key(&self) -> &str {
        &self.user_id
    }
}

impl From<SessionClaims> for Identity {
    fn from(claims: SessionClaims) -> Self {
        Self {
            user_id: claims.user_id,
            external_id: claims.external_id,
            tier: claims.tier,
        }
    }
}

/// Configuration for JWT signing and validation.
#[derive(Clone)]
pub struct JwtConfig {
    secret: Zeroizing<Vec<u8>>,
    issuer: Option<String>,
    leeway_secs: u64,
}

impl JwtConfig {
    /// Creates an HS256 configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is shorter than [`MIN_SECRET_LEN`] bytes.
    pub fn new_hs256(secret: impl AsRef<[u8]>) -> AuthResult<Self> {
        let secret = secret.as_ref();
        if secret.len() < MIN_SECRET_LEN {
            return Err(AuthError::InvalidConfig {
                reason: format!("secret must be at least {MIN_SECRET_LEN} bytes for HS256"),
            });
        }
        Ok(Self {
            secret: Zeroizing::new(secret.to_vec()),
            issuer: None,
            leeway_secs: 0,
        })
    }

    /// Requires tokens to carry this `iss` claim.
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Sets the clock-skew allowance for `exp`.
    #[must_use]
    pub const fn with_leeway_secs(mut self, leeway_secs: u64) -> Self {
        self.leeway_secs = leeway_secs;
        self
    }

    /// Returns the required issuer, if any.
    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_secret(&self.secret)
    }

    fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_secret(&self.secret)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims::<&str>(&[]);
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.leeway = self.leeway_secs;
        if let Some(ref issuer) = self.issuer {
            validation.set_issuer(&[issuer]);
            validation.set_required_spec_claims(&["iss"]);
        }
        validation
    }
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("algorithm", &Algorithm::HS256)
            .field("issuer", &self.issuer)
            .field("leeway_secs", &self.leeway_secs)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Verifies (and issues) session tokens.
#[derive(Debug, Clone)]
pub struct JwtManager {
    config: JwtConfig,
}

impl JwtManager {
    /// Creates a new JWT manager with the given configuration.
    #[must_use]
    pub const fn new(config: JwtConfig) -> Self {
        Self { config }
    }

    /// Authenticates a handshake credential.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::AuthenticationRequired`] when `credential` is absent
    /// or blank and [`AuthError::AuthenticationFailed`] when it does not verify.
    pub fn authenticate(&self, credential: Option<&str>) -> AuthResult<Identity> {
        let token = credential
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::AuthenticationRequired)?;
        let claims = self.validate_token(token)?;
        Ok(Identity::from(claims))
    }

    /// Validates a token and returns its claims.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::AuthenticationFailed`] if the token is malformed,
    /// badly signed, expired, or has an empty `userId`.
    pub fn validate_token(&self, token: &str) -> AuthResult<SessionClaims> {
        let data = decode::<SessionClaims>(
            token,
            &self.config.decoding_key(),
            &self.config.validation(),
        )
        .map_err(|e| {
            tracing::debug!(error = %e, "token verification failed");
            AuthError::AuthenticationFailed {
                reason: format!("{:?}", e.kind()),
            }
        })?;

        if data.claims.user_id.trim().is_empty() {
            return Err(AuthError::AuthenticationFailed {
                reason: "empty userId claim".to_string(),
            });
        }
        Ok(data.claims)
    }

    /// Signs claims into a token.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn issue(&self, claims: &SessionClaims) -> AuthResult<String> {
        #[derive(Serialize)]
        struct WithIssuer<'a> {
            #[serde(flatten)]
            claims: &'a SessionClaims,
            #[serde(skip_serializing_if = "Option::is_none")]
            iss: Option<&'a str>,
        }

        let payload = WithIssuer {
            claims,
            iss: self.config.issuer(),
        };
        encode(&Header::new(Algorithm::HS256), &payload, &self.config.encoding_key()).map_err(
            |e| AuthError::Encoding {
                reason: e.to_string(),
            },
        )
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &JwtConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn manager() -> JwtManager {
        JwtManager::new(JwtConfig::new_hs256(SECRET).unwrap())
    }

    // ==================== JwtConfig Tests ====================

    #[test]
    fn jwt_config_rejects_short_secret() {
        let result = JwtConfig::new_hs256(b"test-secret-key");
        assert!(matches!(result, Err(AuthError::InvalidConfig { .. })));
    }

    #[test]
    fn jwt_config_debug_redacted() {
        let config = JwtConfig::new_hs256(SECRET).unwrap().with_issuer("relay");
        let debug = format!("{config:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("0123456789abcdef"));
        assert!(debug.contains("relay"));
    }

    // ==================== Authenticate Tests ====================

    #[test]
    fn authenticate_valid_token() {
        let jwt = manager();
        let token = jwt
            .issue(
                &SessionClaims::new("user-123")
                    .with_external_id("7656119")
                    .with_tier("starter"),
            )
            .unwrap();

        let identity = jwt.authenticate(Some(&token)).unwrap();
        assert_eq!(identity.user_id, "user-123");
        assert_eq!(identity.external_id.as_deref(), Some("7656119"));
        assert_eq!(identity.tier.as_deref(), Some("starter"));
        assert_eq!(identity.rate_limit_key(), "user-123");
    }

    #[test]
    fn authenticate_missing_credential() {
        let jwt = manager();
        assert!(matches!(
            jwt.authenticate(None),
            Err(AuthError::AuthenticationRequired)
        ));
        assert!(matches!(
            jwt.authenticate(Some("   ")),
            Err(AuthError::AuthenticationRequired)
        ));
    }

    #[test]
    fn authenticate_garbage_token() {
        let err = manager().authenticate(Some("not-a-jwt")).unwrap_err();
        assert_eq!(err.rejection_reason(), "Authentication failed");
    }

    #[test]
    fn authenticate_wrong_signature() {
        let other = JwtManager::new(
            JwtConfig::new_hs256(b"ffffffffffffffffffffffffffffffff").unwrap(),
        );
        let token = other.issue(&SessionClaims::new("user-1")).unwrap();
        assert!(matches!(
            manager().authenticate(Some(&token)),
            Err(AuthError::AuthenticationFailed { .. })
        ));
    }

    #[test]
    fn authenticate_expired_token() {
        let jwt = manager();
        let token = jwt
            .issue(&SessionClaims::new("user-1").with_expiry_duration(Duration::hours(-1)))
            .unwrap();
        let err = jwt.authenticate(Some(&token)).unwrap_err();
        assert!(matches!(err, AuthError::AuthenticationFailed { ref reason } if reason.contains("Expired")));
    }

    #[test]
    fn authenticate_unexpired_token() {
        let jwt = manager();
        let token = jwt
            .issue(&SessionClaims::new("user-1").with_expiry_duration(Duration::hours(1)))
            .unwrap();
        assert!(jwt.authenticate(Some(&token)).is_ok());
    }

    #[test]
    fn authenticate_empty_user_id() {
        let jwt = manager();
        let token = jwt.issue(&SessionClaims::new("")).unwrap();
        assert!(matches!(
            jwt.authenticate(Some(&token)),
            Err(AuthError::AuthenticationFailed { .. })
        ));
    }

    #[test]
    fn authenticate_missing_user_id_claim() {
        let token = encode(
            &Header::new(Algorithm::HS256),
            &serde_json::json!({"tier": "pro"}),
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        assert!(manager().authenticate(Some(&token)).is_err());
    }

    // ==================== Issuer Tests ====================

    #[test]
    fn issuer_is_enforced() {
        let config = JwtConfig::new_hs256(SECRET).unwrap().with_issuer("relay");
        let strict = JwtManager::new(config);
        let token = strict.issue(&SessionClaims::new("u")).unwrap();
        assert!(strict.authenticate(Some(&token)).is_ok());

        let unissued = manager().issue(&SessionClaims::new("u")).unwrap();
        assert!(strict.authenticate(Some(&unissued)).is_err());
    }
}
