//! Presence session state machine
//!
//! The control loop calls [`PresenceSessionStateMachine::tick`] as often as it
//! likes; the machine throttles itself with a single due time. A tick that
//! arrives early is a no-op, and a due tick performs at most one remote call:
//!
//! ```text
//! Initial -> WifiConnecting -> WifiConnected -> DeviceLoginStarted -> AuthReady -> PollPresence
//!                                   ^                 |                              |  ^
//!                                   +-- DeviceLoginFailed                            v  |
//!                                                          PresenceRequestError <-> RefreshToken
//! ```
//!
//! Retry and backoff policy lives only here: the auth session and API client
//! report typed outcomes and never retry on their own.

use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;

use crate::animator::{AnimationSink, PresenceAnimator, StatusLight};
use crate::auth::{seconds_until_expiry, AuthSession, PollOutcome};
use crate::clock::{deadline_after, Clock, Instant};
use crate::config::{
    Settings, ERROR_RETRY_INTERVAL_SECS, MAX_PRESENCE_RETRIES, MIN_LOGIN_POLL_INTERVAL, SETTINGS_KEY,
    TOKEN_REFRESH_MARGIN_SECS,
};
use crate::error::{AuthError, ControlError, RejectionKind, StoreError};
use crate::graph::{GraphApiClient, HttpTransport, Reply};
use crate::presence::{Activity, Availability, PresenceSample};
use crate::store::{CredentialStore, DocumentStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Initial,
    WifiConnecting,
    WifiConnected,
    DeviceLoginStarted,
    /// Shown for one tick, then back to `WifiConnected`
    DeviceLoginFailed,
    /// Token accepted; persisted on the next tick
    AuthReady,
    PollPresence,
    RefreshToken,
    PresenceRequestError,
}

impl SessionState {
    /// States that do their work only once the due time has passed
    fn is_scheduled(self) -> bool {
        matches!(
            self,
            SessionState::DeviceLoginStarted | SessionState::PollPresence | SessionState::RefreshToken
        )
    }

    fn is_connected(self) -> bool {
        !matches!(self, SessionState::Initial | SessionState::WifiConnecting)
    }

    fn in_poll_cycle(self) -> bool {
        matches!(self, SessionState::PollPresence | SessionState::PresenceRequestError)
    }
}

/// What the user needs to complete device login
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginPrompt {
    pub user_code: String,
    pub verification_uri: String,
    pub message: String,
}

/// Read-only snapshot for the status query
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub client_id: String,
    pub tenant: String,
    pub poll_interval: u32,
    pub num_leds: u16,
    pub state: SessionState,
    pub availability: Option<Availability>,
    pub activity: Option<Activity>,
    pub token_valid_secs: Option<i64>,
    pub presence_retries: u8,
    pub version: &'static str,
}

pub struct PresenceSessionStateMachine<T, S, A, C> {
    api: GraphApiClient<T>,
    auth: AuthSession,
    credentials: CredentialStore<S>,
    animator: PresenceAnimator<A>,
    clock: C,
    settings: Settings,
    state: SessionState,
    previous: SessionState,
    due_at: Instant,
    login_interval: Duration,
    retries: u8,
    presence: Option<PresenceSample>,
}

impl<T, S, A, C> PresenceSessionStateMachine<T, S, A, C>
where
    T: HttpTransport,
    S: DocumentStore,
    A: AnimationSink,
    C: Clock,
{
    /// Build the machine, reading stored settings; shows the boot light
    pub fn new(transport: T, mut documents: S, sink: A, clock: C) -> Self {
        let settings = Settings::load(&mut documents);
        let mut animator = PresenceAnimator::new(sink);
        animator.show_status(StatusLight::Boot);
        let due_at = clock.now_ms();

        Self {
            api: GraphApiClient::new(transport, &settings),
            auth: AuthSession::new(),
            credentials: CredentialStore::new(documents),
            animator,
            clock,
            settings,
            state: SessionState::Initial,
            previous: SessionState::Initial,
            due_at,
            login_interval: MIN_LOGIN_POLL_INTERVAL,
            retries: 0,
            presence: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn presence(&self) -> Option<PresenceSample> {
        self.presence
    }

    /// Consecutive failed presence polls
    pub fn retries(&self) -> u8 {
        self.retries
    }

    pub fn due_at(&self) -> Instant {
        self.due_at
    }

    /// The network is being joined
    pub fn on_wifi_connecting(&mut self) {
        let now = self.clock.now_ms();
        self.transition(SessionState::WifiConnecting, now);
    }

    /// The network is up; resumes a stored session if there is one
    pub fn on_wifi_connected(&mut self) {
        let now = self.clock.now_ms();
        self.transition(SessionState::WifiConnected, now);
    }

    /// Begin a device login on behalf of the caller
    ///
    /// Rejected while another login is pending, before the network is up, or
    /// without client id and tenant. If the device-code request fails the
    /// state does not change.
    pub fn start_device_login(&mut self) -> Result<LoginPrompt, ControlError> {
        if self.state == SessionState::DeviceLoginStarted {
            return Err(ControlError::LoginAlreadyRunning);
        }
        if !self.state.is_connected() {
            return Err(ControlError::NotConnected);
        }
        if !self.settings.is_configured() {
            return Err(ControlError::NotConfigured);
        }

        let now = self.clock.now_ms();
        let challenge = self.auth.start_device_login(&mut self.api, now).map_err(|e| {
            warn!("Device login could not start: {}", e);
            ControlError::Login(e)
        })?;

        self.login_interval = challenge.poll_interval;
        self.due_at = deadline_after(now, challenge.poll_interval);
        let prompt = LoginPrompt {
            user_code: challenge.user_code.clone(),
            verification_uri: challenge.verification_uri.clone(),
            message: challenge.message.clone(),
        };
        self.transition(SessionState::DeviceLoginStarted, now);
        Ok(prompt)
    }

    /// Advance the session; returns the state after this tick
    pub fn tick(&mut self) -> SessionState {
        let now = self.clock.now_ms();
        if self.state.is_scheduled() && now < self.due_at {
            return self.state;
        }

        let next = match self.state {
            SessionState::Initial | SessionState::WifiConnecting | SessionState::WifiConnected => self.state,
            SessionState::DeviceLoginStarted => self.poll_device_login(now),
            SessionState::DeviceLoginFailed => SessionState::WifiConnected,
            SessionState::AuthReady => {
                self.persist_token();
                self.due_at = now;
                SessionState::PollPresence
            }
            SessionState::PollPresence => self.poll_presence(now),
            SessionState::PresenceRequestError => {
                if self.retries >= MAX_PRESENCE_RETRIES {
                    SessionState::RefreshToken
                } else {
                    SessionState::PollPresence
                }
            }
            SessionState::RefreshToken => self.refresh_token(now),
        };

        self.transition(next, now);
        self.state
    }

    /// Settings and session snapshot
    pub fn status(&self) -> StatusReport {
        let now = self.clock.now_ms();
        StatusReport {
            client_id: self.settings.client_id.clone(),
            tenant: self.settings.tenant.clone(),
            poll_interval: self.settings.poll_interval_secs,
            num_leds: self.settings.num_leds,
            state: self.state,
            availability: self.presence.map(|p| p.availability),
            activity: self.presence.map(|p| p.activity),
            token_valid_secs: self.auth.seconds_until_expiry(now),
            presence_retries: self.retries,
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Validate, store and adopt new settings
    pub fn apply_settings(&mut self, settings: Settings) -> Result<(), ControlError> {
        settings.validate()?;
        settings.save(self.credentials.documents_mut())?;
        self.api.configure(&settings);
        info!("Settings updated, tenant {}", settings.tenant);
        self.settings = settings;
        Ok(())
    }

    /// Wipe stored credentials and settings and forget the session
    ///
    /// The in-memory session is always dropped; both documents are removed
    /// even if one removal fails, and the first failure is reported.
    pub fn clear_all(&mut self) -> Result<(), ControlError> {
        self.auth.clear();
        self.presence = None;
        self.retries = 0;
        self.settings = Settings::default();
        self.api.configure(&self.settings);

        let context = self.credentials.clear();
        let settings = self
            .credentials
            .documents_mut()
            .remove(SETTINGS_KEY)
            .map_err(|e| StoreError::Storage(format!("{:#}", e)));

        let now = self.clock.now_ms();
        if self.state.is_connected() {
            self.transition(SessionState::WifiConnected, now);
        }

        context.and(settings)?;
        info!("All stored state cleared");
        Ok(())
    }

    fn poll_device_login(&mut self, now: Instant) -> SessionState {
        match self.auth.poll_once(&mut self.api, now) {
            PollOutcome::Pending(description) => {
                debug!("Device login pending: {}", description);
                self.due_at = deadline_after(now, self.login_interval);
                SessionState::DeviceLoginStarted
            }
            PollOutcome::Authorized(token) => {
                self.auth.install(token);
                SessionState::AuthReady
            }
            PollOutcome::Failed(reason) => {
                warn!("Device login failed: {}", reason);
                SessionState::DeviceLoginFailed
            }
        }
    }

    fn poll_presence(&mut self, now: Instant) -> SessionState {
        let Some(token) = self.auth.token() else {
            warn!("No token for presence polling, waiting for device login");
            return SessionState::WifiConnected;
        };
        let result = self.api.fetch_presence(token.access_token());
        self.due_at = deadline_after(now, self.settings.poll_interval());

        let mut next = match result {
            Ok(Reply::Success(sample)) => {
                info!(
                    "Availability: {:?}, Activity: {:?}",
                    sample.availability, sample.activity
                );
                self.presence = Some(sample);
                self.retries = 0;
                self.animator.apply(sample.activity);
                SessionState::PollPresence
            }
            Ok(Reply::Rejected(err)) if err.kind() == RejectionKind::AuthenticationExpiredOrInvalid => {
                info!("Presence request unauthorized, refreshing token");
                SessionState::RefreshToken
            }
            Ok(Reply::Rejected(err)) => {
                warn!("Presence request rejected: {}", err);
                self.record_presence_failure()
            }
            Err(err) => {
                warn!("Presence request failed: {}", err);
                self.record_presence_failure()
            }
        };

        // Refresh preempts polling, whatever the poll returned
        if let Some(remaining) = self.auth.seconds_until_expiry(now) {
            if remaining < TOKEN_REFRESH_MARGIN_SECS {
                info!("Token needs refresh, valid for {}s", remaining);
                next = SessionState::RefreshToken;
            }
        }
        next
    }

    fn record_presence_failure(&mut self) -> SessionState {
        self.retries = self.retries.saturating_add(1).min(MAX_PRESENCE_RETRIES);
        SessionState::PresenceRequestError
    }

    fn refresh_token(&mut self, now: Instant) -> SessionState {
        let refreshed = self
            .auth
            .refresh(&mut self.api, now)
            .map(|token| seconds_until_expiry(token, now));

        match refreshed {
            Ok(valid_secs) => {
                debug!("New token valid for {}s", valid_secs);
                self.persist_token();
                self.due_at = now;
                SessionState::PollPresence
            }
            Err(AuthError::NoToken) => {
                warn!("Nothing to refresh, waiting for device login");
                SessionState::WifiConnected
            }
            Err(err) => {
                warn!(
                    "Token refresh failed, retrying in {}s: {}",
                    ERROR_RETRY_INTERVAL_SECS, err
                );
                self.due_at = deadline_after(now, Duration::from_secs(ERROR_RETRY_INTERVAL_SECS));
                SessionState::RefreshToken
            }
        }
    }

    fn persist_token(&mut self) {
        let Some(token) = self.auth.token() else {
            return;
        };
        if let Err(e) = self.credentials.save(token) {
            warn!("Saving context failed: {}", e);
        }
    }

    /// Try to resume from stored credentials; true if a refresh should follow
    fn restore_context(&mut self, now: Instant) -> bool {
        if !self.settings.is_configured() {
            debug!("No client id or tenant configured, not restoring context");
            return false;
        }
        match self.credentials.load() {
            Ok(Some(stored)) => {
                self.auth.restore(&stored, now);
                info!("Stored context found, refreshing token");
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Loading context failed: {}", e);
                false
            }
        }
    }

    fn transition(&mut self, mut next: SessionState, now: Instant) {
        while next != self.state {
            info!("State {:?} -> {:?}", self.state, next);
            self.previous = self.state;
            self.state = next;
            next = self.enter(now);
        }
    }

    /// Entry actions; returns a follow-up state, or the current one for none
    fn enter(&mut self, now: Instant) -> SessionState {
        match self.state {
            SessionState::WifiConnecting => self.animator.show_status(StatusLight::WifiConnecting),
            SessionState::WifiConnected => {
                self.animator.show_status(StatusLight::WifiConnected);
                if self.restore_context(now) {
                    return SessionState::RefreshToken;
                }
                info!("Waiting for device login request");
            }
            SessionState::DeviceLoginStarted => self.animator.show_status(StatusLight::DeviceLogin),
            SessionState::DeviceLoginFailed => warn!("Device login failed, returning to idle"),
            SessionState::PollPresence => {
                if !self.previous.in_poll_cycle() {
                    self.retries = 0;
                }
            }
            SessionState::RefreshToken => {
                self.animator.show_status(StatusLight::RefreshToken);
                self.retries = 0;
                self.due_at = now;
            }
            SessionState::PresenceRequestError => {
                warn!("Polling presence failed, retry #{}", self.retries)
            }
            SessionState::Initial | SessionState::AuthReady => {}
        }
        self.state
    }
}
