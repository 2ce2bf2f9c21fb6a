//! Device settings and fixed timing constants
//!
//! Settings are the handful of values a user configures for the light
//! (application id, tenant, poll cadence, strip length). They are stored as a
//! small JSON document next to the credentials so they survive power cycles.

use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::error::{ConfigError, StoreError};
use crate::render::MAX_LEDS;
use crate::store::DocumentStore;

/// Refresh the access token once it is valid for fewer seconds than this
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Backoff before retrying a failed token refresh
pub const ERROR_RETRY_INTERVAL_SECS: u64 = 30;

/// Consecutive presence failures before escalating to a token refresh
pub const MAX_PRESENCE_RETRIES: u8 = 5;

/// Shortest accepted device-login poll interval
pub const MIN_LOGIN_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Connect and response timeout applied by the transport to every remote call
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Permissions requested during device login
pub const OAUTH_SCOPE: &str = "offline_access openid Presence.Read";

pub const LOGIN_HOST: &str = "https://login.microsoftonline.com";
pub const PRESENCE_URL: &str = "https://graph.microsoft.com/v1.0/me/presence";

/// Generic public client registration usable with any tenant
pub const DEFAULT_CLIENT_ID: &str = "3837bbf0-30fb-47ad-bce8-f460ba9880c3";
pub const DEFAULT_POLL_INTERVAL_SECS: u32 = 30;
pub const DEFAULT_NUM_LEDS: u16 = 16;

/// Document key of the stored settings
pub const SETTINGS_KEY: &str = "settings";

pub const MIN_POLL_INTERVAL_SECS: u32 = 10;
pub const MAX_POLL_INTERVAL_SECS: u32 = 300;

/// User-configurable settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub client_id: String,
    pub tenant: String,
    pub poll_interval_secs: u32,
    pub num_leds: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            client_id: option_env!("PRESENCE_CLIENT_ID")
                .unwrap_or(DEFAULT_CLIENT_ID)
                .to_string(),
            tenant: option_env!("PRESENCE_TENANT").unwrap_or_default().to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            num_leds: DEFAULT_NUM_LEDS,
        }
    }
}

impl Settings {
    /// Both the application id and the tenant are known
    pub fn is_configured(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.tenant.trim().is_empty()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.poll_interval_secs))
    }

    pub fn device_code_url(&self) -> String {
        format!("{}/{}/oauth2/v2.0/devicecode", LOGIN_HOST, self.tenant)
    }

    pub fn token_url(&self) -> String {
        format!("{}/{}/oauth2/v2.0/token", LOGIN_HOST, self.tenant)
    }

    /// Check the values a user entered before they are stored
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.len() < 36 {
            return Err(ConfigError::ClientId);
        }
        if self.tenant.len() < 10 {
            return Err(ConfigError::Tenant);
        }
        if !(MIN_POLL_INTERVAL_SECS..=MAX_POLL_INTERVAL_SECS).contains(&self.poll_interval_secs) {
            return Err(ConfigError::PollInterval(self.poll_interval_secs));
        }
        if self.num_leds == 0 || usize::from(self.num_leds) > MAX_LEDS {
            return Err(ConfigError::NumLeds(self.num_leds));
        }
        Ok(())
    }

    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(document).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply a submitted settings form on top of these settings
    ///
    /// Recognised fields are `client_id`, `tenant`, `poll_interval` and
    /// `num_leds`; absent fields keep their current value. The result is not
    /// validated here.
    pub fn merge_form(&self, body: &[u8]) -> Result<Self, ConfigError> {
        let mut next = self.clone();
        for (field, value) in form_urlencoded::parse(body) {
            let value = value.trim();
            match field.as_ref() {
                "client_id" => next.client_id = value.to_string(),
                "tenant" => next.tenant = value.to_string(),
                "poll_interval" => {
                    next.poll_interval_secs = value
                        .parse()
                        .map_err(|_| ConfigError::Parse(format!("poll_interval '{}'", value)))?
                }
                "num_leds" => {
                    next.num_leds = value
                        .parse()
                        .map_err(|_| ConfigError::Parse(format!("num_leds '{}'", value)))?
                }
                _ => {}
            }
        }
        Ok(next)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Stored settings, or the defaults when none are stored or they are unusable
    pub fn load(documents: &mut impl DocumentStore) -> Self {
        let stored = match documents.load(SETTINGS_KEY) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Reading settings failed, using defaults: {:#}", e);
                None
            }
        };
        match stored.as_deref().map(Self::from_json) {
            Some(Ok(settings)) => settings,
            Some(Err(e)) => {
                warn!("Stored settings ignored: {}", e);
                Self::default()
            }
            None => Self::default(),
        }
    }

    pub fn save(&self, documents: &mut impl DocumentStore) -> Result<(), StoreError> {
        let document = self.to_json().map_err(|e| StoreError::Corrupt(e.to_string()))?;
        documents
            .save(SETTINGS_KEY, &document)
            .map_err(|e| StoreError::Storage(format!("{:#}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> Settings {
        Settings {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            tenant: "contoso.onmicrosoft.com".to_string(),
            poll_interval_secs: 30,
            num_leds: 16,
        }
    }

    #[test]
    fn test_defaults_validate_once_tenant_set() {
        let mut settings = Settings::default();
        settings.tenant = "contoso.onmicrosoft.com".to_string();
        assert!(settings.validate().is_ok());
        assert!(settings.is_configured());
    }

    #[test]
    fn test_validation_bounds() {
        let mut settings = configured();
        settings.poll_interval_secs = 5;
        assert_eq!(settings.validate(), Err(ConfigError::PollInterval(5)));

        let mut settings = configured();
        settings.num_leds = 0;
        assert_eq!(settings.validate(), Err(ConfigError::NumLeds(0)));

        let mut settings = configured();
        settings.tenant = "short".to_string();
        assert_eq!(settings.validate(), Err(ConfigError::Tenant));

        let mut settings = configured();
        settings.client_id = "abc".to_string();
        assert_eq!(settings.validate(), Err(ConfigError::ClientId));
    }

    #[test]
    fn test_endpoints_include_tenant() {
        let settings = configured();
        assert_eq!(
            settings.token_url(),
            "https://login.microsoftonline.com/contoso.onmicrosoft.com/oauth2/v2.0/token"
        );
        assert!(settings.device_code_url().ends_with("/oauth2/v2.0/devicecode"));
    }

    #[test]
    fn test_load_and_save() {
        let mut documents = crate::store::MemoryStore::default();
        assert_eq!(Settings::load(&mut documents), Settings::default());

        let settings = configured();
        settings.save(&mut documents).unwrap();
        assert_eq!(Settings::load(&mut documents), settings);

        documents.insert(SETTINGS_KEY, "{broken");
        assert_eq!(Settings::load(&mut documents), Settings::default());
    }

    #[test]
    fn test_merge_form() {
        let settings = Settings::default()
            .merge_form(b"tenant=contoso.onmicrosoft.com&poll_interval=60&ignored=1")
            .unwrap();
        assert_eq!(settings.tenant, "contoso.onmicrosoft.com");
        assert_eq!(settings.poll_interval_secs, 60);
        assert_eq!(settings.num_leds, DEFAULT_NUM_LEDS);

        assert!(matches!(
            Settings::default().merge_form(b"num_leds=many"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let settings = Settings::from_json(r#"{"tenant":"contoso.onmicrosoft.com"}"#).unwrap();
        assert_eq!(settings.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert_eq!(settings.tenant, "contoso.onmicrosoft.com");
    }
}
