//! Token lifecycle
//!
//! [`AuthSession`] owns the device-login challenge and the token set. It
//! speaks to the identity provider through a borrowed [`GraphApiClient`] and
//! reports typed outcomes; when to call it, and what to do on failure, is
//! decided by the state machine.
//!
//! Expiry is always computed as `now + expires_in` at the moment a response is
//! accepted. Tokens restored from storage have no known expiry and are treated
//! as already expired.

use std::time::Duration;

use log::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::clock::{deadline_after, Instant};
use crate::config::MIN_LOGIN_POLL_INTERVAL;
use crate::error::{AuthError, GraphError, RejectionKind};
use crate::graph::{GraphApiClient, Grant, HttpTransport, Reply, TokenSet};
use crate::store::StoredCredentials;

/// Access, refresh and id token plus the instant the access token lapses
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Token {
    access_token: String,
    refresh_token: String,
    id_token: String,
    #[zeroize(skip)]
    expires_at: Instant,
}

impl Token {
    pub fn new(access_token: String, refresh_token: String, id_token: String, expires_at: Instant) -> Self {
        Self {
            access_token,
            refresh_token,
            id_token,
            expires_at,
        }
    }

    /// Rebuild a token from storage; the expiry is unknown, so it is due now
    pub fn from_stored(stored: &StoredCredentials, now: Instant) -> Self {
        Self::new(
            stored.access_token.clone(),
            stored.refresh_token.clone(),
            stored.id_token.clone(),
            now,
        )
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    pub fn id_token(&self) -> &str {
        &self.id_token
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// All three tokens are known
    pub fn is_complete(&self) -> bool {
        !self.access_token.is_empty() && !self.refresh_token.is_empty() && !self.id_token.is_empty()
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Whole seconds until the access token lapses; negative once expired
pub fn seconds_until_expiry(token: &Token, now: Instant) -> i64 {
    let remaining_ms = i128::from(token.expires_at) - i128::from(now);
    i64::try_from(remaining_ms.div_euclid(1000)).unwrap_or(i64::MAX)
}

/// A pending device login, shown to the user as a code and a URL
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DeviceLoginChallenge {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub message: String,
    #[zeroize(skip)]
    pub poll_interval: Duration,
    #[zeroize(skip)]
    pub expires_at: Instant,
}

impl std::fmt::Debug for DeviceLoginChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLoginChallenge")
            .field("user_code", &self.user_code)
            .field("verification_uri", &self.verification_uri)
            .field("poll_interval", &self.poll_interval)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Result of one token-endpoint poll during device login
#[derive(Debug)]
pub enum PollOutcome {
    /// The user has not finished yet; poll again after the interval
    Pending(String),
    Authorized(Token),
    /// Terminal; the challenge is gone
    Failed(String),
}

/// Owner of the challenge and the token set
#[derive(Debug, Default)]
pub struct AuthSession {
    token: Option<Token>,
    challenge: Option<DeviceLoginChallenge>,
}

impl AuthSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    pub fn challenge(&self) -> Option<&DeviceLoginChallenge> {
        self.challenge.as_ref()
    }

    /// Adopt a token accepted from the identity provider
    pub fn install(&mut self, token: Token) {
        self.token = Some(token);
    }

    /// Adopt credentials restored from storage
    pub fn restore(&mut self, stored: &StoredCredentials, now: Instant) {
        self.token = Some(Token::from_stored(stored, now));
    }

    /// Forget the token and any challenge
    pub fn clear(&mut self) {
        self.token = None;
        self.challenge = None;
    }

    /// Whole seconds until the held token lapses
    pub fn seconds_until_expiry(&self, now: Instant) -> Option<i64> {
        self.token.as_ref().map(|token| seconds_until_expiry(token, now))
    }

    /// Request a device code, replacing any earlier challenge
    pub fn start_device_login<T: HttpTransport>(
        &mut self,
        api: &mut GraphApiClient<T>,
        now: Instant,
    ) -> Result<DeviceLoginChallenge, AuthError> {
        let grant = match api.request_device_code()? {
            Reply::Success(grant) => grant,
            Reply::Rejected(err) => return Err(AuthError::Rejected(err)),
        };

        let challenge = DeviceLoginChallenge {
            device_code: grant.device_code.clone(),
            user_code: grant.user_code.clone(),
            verification_uri: grant.verification_uri.clone(),
            message: grant.message.clone(),
            poll_interval: Duration::from_secs(grant.interval_secs).max(MIN_LOGIN_POLL_INTERVAL),
            expires_at: deadline_after(now, Duration::from_secs(grant.expires_in_secs)),
        };
        info!(
            "Device login started: code {} at {}",
            challenge.user_code, challenge.verification_uri
        );
        self.challenge = Some(challenge.clone());
        Ok(challenge)
    }

    /// Ask once whether the user has completed the device login
    ///
    /// Only `authorization_pending` keeps the login alive; every other error
    /// code ends it. A connection failure is retried at the next interval
    /// until the challenge itself expires.
    pub fn poll_once<T: HttpTransport>(&mut self, api: &mut GraphApiClient<T>, now: Instant) -> PollOutcome {
        let Some(challenge) = self.challenge.as_ref() else {
            return PollOutcome::Failed("no device login in progress".into());
        };
        if now >= challenge.expires_at {
            self.challenge = None;
            return PollOutcome::Failed("device code expired".into());
        }

        let outcome = match api.request_token(Grant::DeviceCode(&challenge.device_code)) {
            Err(GraphError::TransportFailure(reason)) => {
                warn!("Device login poll failed, will retry: {}", reason);
                return PollOutcome::Pending(reason);
            }
            Err(GraphError::MalformedResponse(reason)) => PollOutcome::Failed(reason),
            Ok(Reply::Rejected(err)) => match err.kind() {
                RejectionKind::AuthorizationPending => {
                    debug!("Waiting for user authorization");
                    return PollOutcome::Pending(err.description.unwrap_or(err.code));
                }
                _ => PollOutcome::Failed(err.to_string()),
            },
            Ok(Reply::Success(mut set)) => match complete_token(&mut set, now) {
                Some(token) => PollOutcome::Authorized(token),
                None => PollOutcome::Failed("token response missing access, refresh or id token".into()),
            },
        };

        // Authorized or failed: the challenge is single-use
        self.challenge = None;
        outcome
    }

    /// Exchange the refresh token for a new token set
    ///
    /// Fields missing from the response keep their previous values (providers
    /// commonly omit `id_token` on refresh), but at least a new access or
    /// refresh token must arrive.
    pub fn refresh<T: HttpTransport>(&mut self, api: &mut GraphApiClient<T>, now: Instant) -> Result<&Token, AuthError> {
        let current = self.token.as_ref().ok_or(AuthError::NoToken)?;

        let mut set = match api.request_token(Grant::RefreshToken(current.refresh_token()))? {
            Reply::Success(set) => set,
            Reply::Rejected(err) => return Err(AuthError::Rejected(err)),
        };
        if set.access_token.is_none() && set.refresh_token.is_none() {
            return Err(AuthError::MalformedResponse(
                "refresh response carried no new token".into(),
            ));
        }

        let mut next = current.clone();
        if let Some(access_token) = set.access_token.take() {
            next.access_token = access_token;
        }
        if let Some(refresh_token) = set.refresh_token.take() {
            next.refresh_token = refresh_token;
        }
        if let Some(id_token) = set.id_token.take() {
            next.id_token = id_token;
        }
        if let Some(expires_in) = set.expires_in {
            next.expires_at = deadline_after(now, Duration::from_secs(expires_in));
        }

        info!("Token refreshed, valid for {}s", seconds_until_expiry(&next, now));
        Ok(&*self.token.insert(next))
    }
}

/// Accept a device-login token set only when all three tokens are present
fn complete_token(set: &mut TokenSet, now: Instant) -> Option<Token> {
    match (set.access_token.take(), set.refresh_token.take(), set.id_token.take()) {
        (Some(access_token), Some(refresh_token), Some(id_token)) => {
            let expires_in = set.expires_in.unwrap_or(0);
            let expires_at = deadline_after(now, Duration::from_secs(expires_in));
            Some(Token::new(access_token, refresh_token, id_token, expires_at))
        }
        _ => None,
    }
}
