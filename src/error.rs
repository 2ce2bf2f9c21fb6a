//! Error taxonomy shared by the session components
//!
//! Remote calls fail in three ways: no usable response at all, a response
//! missing required fields, or an explicit error code from the service. The
//! first two are [`GraphError`]; rejections travel as a [`RemoteError`] so the
//! state machine can route them by [`RejectionKind`].

use thiserror::Error;

/// Error code the presence endpoint returns for an expired or revoked token
pub const INVALID_AUTHENTICATION_TOKEN: &str = "InvalidAuthenticationToken";

/// Error code the token endpoint returns while the user has not finished login
pub const AUTHORIZATION_PENDING: &str = "authorization_pending";

/// Failure of a remote call before a trustworthy answer was obtained
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// No response, connection error or unexpected HTTP status. Always retryable.
    #[error("transport failure: {0}")]
    TransportFailure(String),
    /// A response arrived but required fields were absent or unparsable
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// How the session reacts to an explicit error code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// The user has not completed device login yet
    AuthorizationPending,
    /// The bearer credential was refused; a token refresh is needed
    AuthenticationExpiredOrInvalid,
    Other,
}

/// Explicit error code in an otherwise well-formed response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub code: String,
    pub description: Option<String>,
}

impl RemoteError {
    pub fn new(code: impl Into<String>, description: Option<String>) -> Self {
        Self {
            code: code.into(),
            description,
        }
    }

    pub fn kind(&self) -> RejectionKind {
        match self.code.as_str() {
            AUTHORIZATION_PENDING => RejectionKind::AuthorizationPending,
            INVALID_AUTHENTICATION_TOKEN => RejectionKind::AuthenticationExpiredOrInvalid,
            _ => RejectionKind::Other,
        }
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {}", self.code, description),
            None => write!(f, "{}", self.code),
        }
    }
}

/// Token lifecycle failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("transport failure: {0}")]
    TransportFailure(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("rejected by identity provider: {0}")]
    Rejected(RemoteError),
    #[error("no token available")]
    NoToken,
}

impl From<GraphError> for AuthError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::TransportFailure(reason) => AuthError::TransportFailure(reason),
            GraphError::MalformedResponse(reason) => AuthError::MalformedResponse(reason),
        }
    }
}

/// Persisted document failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Refused to write a credential set missing one of its three tokens
    #[error("credential set incomplete")]
    Incomplete,
    #[error("stored document unreadable: {0}")]
    Corrupt(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("client id must have at least 36 characters")]
    ClientId,
    #[error("tenant must have at least 10 characters")]
    Tenant,
    #[error("poll interval {0}s outside 10..=300")]
    PollInterval(u32),
    #[error("LED count {0} unsupported")]
    NumLeds(u16),
    #[error("settings document unreadable: {0}")]
    Parse(String),
}

/// Rejections of caller requests made through the control surface
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("device login already running")]
    LoginAlreadyRunning,
    #[error("network not connected")]
    NotConnected,
    #[error("client id or tenant not configured")]
    NotConfigured,
    #[error("device login could not start: {0}")]
    Login(#[from] AuthError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid settings: {0}")]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_kinds() {
        assert_eq!(
            RemoteError::new("authorization_pending", None).kind(),
            RejectionKind::AuthorizationPending
        );
        assert_eq!(
            RemoteError::new("InvalidAuthenticationToken", None).kind(),
            RejectionKind::AuthenticationExpiredOrInvalid
        );
        assert_eq!(
            RemoteError::new("expired_token", None).kind(),
            RejectionKind::Other
        );
    }

    #[test]
    fn test_remote_error_display() {
        let err = RemoteError::new("authorization_declined", Some("user said no".into()));
        assert_eq!(err.to_string(), "authorization_declined: user said no");
    }
}
