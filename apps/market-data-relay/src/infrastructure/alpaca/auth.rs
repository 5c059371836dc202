//! Alpaca WebSocket Authentication
//!
//! Credentials and error classification for Alpaca's market data stream.
//!
//! # Authentication Flow
//!
//! 1. Connect to WebSocket endpoint
//! 2. Receive `{"T":"success","msg":"connected"}` from server
//! 3. Send `{"action":"auth","key":"...","secret":"..."}`
//! 4. Receive `{"T":"success","msg":"authenticated"}` or error
//!
//! The relay sends the auth frame as soon as the transport opens rather than
//! waiting for step 2; Alpaca accepts either order.
//!
//! # Error Codes
//!
//! - 401: Not authenticated
//! - 402: Authentication failed (invalid credentials)
//! - 403: Already authenticated
//! - 404: Authentication timeout (>10 seconds)
//! - 406: Connection limit exceeded
//!
//! # References
//!
//! - [Stock Streaming Auth](https://docs.alpaca.markets/docs/streaming-market-data)

use thiserror::Error;

use super::messages::AuthRequest;

// =============================================================================
// Error Types
// =============================================================================

/// Errors reported by the upstream during or after authentication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Not authenticated (must authenticate before subscribing).
    #[error("not authenticated: must authenticate before making requests")]
    NotAuthenticated,

    /// Authentication failed (invalid credentials).
    #[error("authentication failed: invalid API key or secret")]
    InvalidCredentials,

    /// Already authenticated (connection was already authenticated).
    #[error("already authenticated: connection is already authenticated")]
    AlreadyAuthenticated,

    /// Authentication timeout (took longer than 10 seconds).
    #[error("authentication timeout: must authenticate within 10 seconds")]
    Timeout,

    /// Connection limit exceeded.
    #[error("connection limit exceeded: too many concurrent connections")]
    ConnectionLimitExceeded,

    /// Credentials were empty.
    #[error("invalid credentials: {0}")]
    InvalidInput(String),

    /// Any other error frame from the server.
    #[error("server error ({code}): {message}")]
    ServerError {
        /// Error code from server
        code: i32,
        /// Error message from server
        message: String,
    },
}

impl AuthError {
    /// Classify an error frame by its code.
    #[must_use]
    pub fn classify(code: i32, message: &str) -> Self {
        match code {
            401 => Self::NotAuthenticated,
            402 => Self::InvalidCredentials,
            403 => Self::AlreadyAuthenticated,
            404 => Self::Timeout,
            406 => Self::ConnectionLimitExceeded,
            code => Self::ServerError {
                code,
                message: message.to_string(),
            },
        }
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// Alpaca API credentials.
///
/// The `Debug` implementation redacts the secret for safe logging.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    key: String,
    secret: String,
}

impl Credentials {
    /// Create new credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if either key or secret is empty.
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Result<Self, AuthError> {
        let key = key.into();
        let secret = secret.into();

        if key.trim().is_empty() {
            return Err(AuthError::InvalidInput(
                "API key cannot be empty".to_string(),
            ));
        }
        if secret.trim().is_empty() {
            return Err(AuthError::InvalidInput(
                "API secret cannot be empty".to_string(),
            ));
        }

        Ok(Self { key, secret })
    }

    /// Get the API key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the API secret.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Create an authentication request for the market data stream.
    #[must_use]
    pub fn to_auth_request(&self) -> AuthRequest {
        AuthRequest::new(self.key.clone(), self.secret.clone())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &"[REDACTED]")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_new() {
        let creds = Credentials::new("my_key", "my_secret").unwrap();
        assert_eq!(creds.key(), "my_key");
        assert_eq!(creds.secret(), "my_secret");
    }

    #[test]
    fn test_credentials_empty_key_fails() {
        assert!(Credentials::new("", "secret").is_err());
        assert!(Credentials::new("   ", "secret").is_err());
    }

    #[test]
    fn test_credentials_empty_secret_fails() {
        assert!(Credentials::new("key", "").is_err());
    }

    #[test]
    fn test_credentials_debug_redacts() {
        let creds = Credentials::new("my_key", "super_secret").unwrap();
        let debug = format!("{creds:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("my_key"));
        assert!(!debug.contains("super_secret"));
    }

    #[test]
    fn test_auth_request_from_credentials() {
        let creds = Credentials::new("k", "s").unwrap();
        let json = serde_json::to_string(&creds.to_auth_request()).unwrap();
        assert_eq!(json, r#"{"action":"auth","key":"k","secret":"s"}"#);
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            AuthError::classify(401, "x"),
            AuthError::NotAuthenticated
        );
        assert_eq!(
            AuthError::classify(402, "auth failed"),
            AuthError::InvalidCredentials
        );
        assert_eq!(AuthError::classify(404, "x"), AuthError::Timeout);
        assert_eq!(
            AuthError::classify(406, "x"),
            AuthError::ConnectionLimitExceeded
        );
        assert_eq!(
            AuthError::classify(405, "symbol limit exceeded"),
            AuthError::ServerError {
                code: 405,
                message: "symbol limit exceeded".to_string()
            }
        );
    }
}
