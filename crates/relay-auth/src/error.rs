//! Error types for handshake authentication.

use thiserror::Error;

/// Errors raised while authenticating a connection or configuring the verifier.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential was presented.
    #[error("authentication required")]
    AuthenticationRequired,

    /// A credential was presented but did not verify.
    #[error("authentication failed: {reason}")]
    AuthenticationFailed {
        /// Why verification failed.
        reason: String,
    },

    /// The verifier configuration is unusable.
    #[error("invalid auth configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// Token signing failed.
    #[error("token encoding failed: {reason}")]
    Encoding {
        /// Underlying error.
        reason: String,
    },
}

impl AuthError {
    /// Returns the short reason string sent to a refused client.
    ///
    /// Verification details are never echoed to the peer.
    #[must_use]
    pub const fn rejection_reason(&self) -> &'static str {
        match self {
            Self::AuthenticationRequired => "Authentication required",
            _ => "Authentication failed",
        }
    }

    /// Returns true if the client supplied no credential at all.
    #[must_use]
    pub const fn is_missing_credential(&self) -> bool {
        matches!(self, Self::AuthenticationRequired)
    }
}

/// Result type for authentication operations.
pub type AuthResult<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_reasons() {
        assert_eq!(
            AuthError::AuthenticationRequired.rejection_reason(),
            "Authentication required"
        );
        let failed = AuthError::AuthenticationFailed {
            reason: "InvalidSignature".to_string(),
        };
        assert_eq!(failed.rejection_reason(), "Authentication failed");
        assert!(!failed.is_missing_credential());
        assert!(AuthError::AuthenticationRequired.is_missing_credential());
    }

    #[test]
    fn test_display_includes_reason() {
        let err = AuthError::AuthenticationFailed {
            reason: "ExpiredSignature".to_string(),
        };
        assert!(err.to_string().contains("ExpiredSignature"));
    }
}
