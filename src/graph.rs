//! Remote identity and presence API
//!
//! Three calls, each returning a typed reply:
//! - device-code issuance (`/oauth2/v2.0/devicecode`)
//! - token exchange, shared by device-code completion and refresh (`/oauth2/v2.0/token`)
//! - presence fetch with a bearer token (`/v1.0/me/presence`)
//!
//! Request execution (TLS, timeouts) belongs to the [`HttpTransport`]. Response
//! bodies are deserialized into per-endpoint shapes that only name the
//! documented fields, so anything else the service sends is dropped unparsed.
//! Nothing here retries; retry policy lives in the state machine.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::form_urlencoded;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::{Settings, OAUTH_SCOPE, PRESENCE_URL};
use crate::error::{GraphError, RemoteError, INVALID_AUTHENTICATION_TOKEN};
use crate::presence::{Activity, Availability, PresenceSample};

/// Responses larger than this are refused rather than parsed
pub const MAX_RESPONSE_BYTES: usize = 16 * 1024;

const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Default device-code lifetime when the provider omits `expires_in`
const DEFAULT_DEVICE_CODE_LIFETIME_SECS: u64 = 900;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One outgoing request, as handed to the transport
#[derive(Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    /// `application/x-www-form-urlencoded` body
    pub form: Option<String>,
    /// Sent as `Authorization: Bearer ...`
    pub bearer: Option<String>,
}

// Bodies and bearer tokens carry secrets; keep them out of logs.
impl std::fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("authorized", &self.bearer.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Capability to perform a single bounded-time HTTPS request
///
/// An `Err` means no response was obtained at all (DNS, TLS, timeout).
pub trait HttpTransport {
    fn execute(&mut self, request: &HttpRequest) -> anyhow::Result<HttpResponse>;
}

/// A well-formed answer: either the payload or an explicit error code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply<T> {
    Success(T),
    Rejected(RemoteError),
}

/// Issued device code, ready to be shown to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCodeGrant {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub message: String,
    pub interval_secs: u64,
    pub expires_in_secs: u64,
}

/// Token endpoint success; any field may be absent on refresh
#[derive(Debug, Default, Zeroize, ZeroizeOnDrop)]
pub struct TokenSet {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_in: Option<u64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

/// Grant presented to the token endpoint
#[derive(Clone, Copy)]
pub enum Grant<'a> {
    DeviceCode(&'a str),
    RefreshToken(&'a str),
}

#[derive(Deserialize)]
struct DeviceCodeResponse {
    device_code: Option<String>,
    user_code: Option<String>,
    verification_uri: Option<String>,
    message: Option<String>,
    interval: Option<u64>,
    expires_in: Option<u64>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    id_token: Option<String>,
    expires_in: Option<u64>,
    token_type: Option<String>,
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct PresenceResponse {
    #[allow(dead_code)]
    id: Option<String>,
    availability: Option<Availability>,
    activity: Option<Activity>,
    error: Option<PresenceErrorBody>,
}

#[derive(Deserialize)]
struct PresenceErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// Client for the identity and presence endpoints
pub struct GraphApiClient<T> {
    transport: T,
    client_id: String,
    device_code_url: String,
    token_url: String,
}

impl<T: HttpTransport> GraphApiClient<T> {
    pub fn new(transport: T, settings: &Settings) -> Self {
        let mut client = Self {
            transport,
            client_id: String::new(),
            device_code_url: String::new(),
            token_url: String::new(),
        };
        client.configure(settings);
        client
    }

    /// Pick up changed client id or tenant
    pub fn configure(&mut self, settings: &Settings) {
        self.client_id = settings.client_id.clone();
        self.device_code_url = settings.device_code_url();
        self.token_url = settings.token_url();
    }

    /// Ask the identity provider for a new device code
    pub fn request_device_code(&mut self) -> Result<Reply<DeviceCodeGrant>, GraphError> {
        let form = form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", &self.client_id)
            .append_pair("scope", OAUTH_SCOPE)
            .finish();
        let request = HttpRequest {
            method: Method::Post,
            url: self.device_code_url.clone(),
            form: Some(form),
            bearer: None,
        };
        let response: DeviceCodeResponse = self.send(&request)?;

        if let Some(code) = response.error {
            return Ok(Reply::Rejected(RemoteError::new(code, response.error_description)));
        }

        match (
            response.device_code,
            response.user_code,
            response.verification_uri,
            response.message,
            response.interval,
        ) {
            (Some(device_code), Some(user_code), Some(verification_uri), Some(message), Some(interval)) => {
                Ok(Reply::Success(DeviceCodeGrant {
                    device_code,
                    user_code,
                    verification_uri,
                    message,
                    interval_secs: interval,
                    expires_in_secs: response.expires_in.unwrap_or(DEFAULT_DEVICE_CODE_LIFETIME_SECS),
                }))
            }
            _ => Err(GraphError::MalformedResponse(
                "device code response missing required fields".into(),
            )),
        }
    }

    /// Exchange a device code or refresh token for a token set
    ///
    /// The returned set is passed through untouched; deciding which fields
    /// are required is up to the caller.
    pub fn request_token(&mut self, grant: Grant<'_>) -> Result<Reply<TokenSet>, GraphError> {
        let mut form = form_urlencoded::Serializer::new(String::new());
        form.append_pair("client_id", &self.client_id);
        match grant {
            Grant::DeviceCode(device_code) => {
                form.append_pair("grant_type", DEVICE_CODE_GRANT_TYPE)
                    .append_pair("device_code", device_code);
            }
            Grant::RefreshToken(refresh_token) => {
                form.append_pair("grant_type", "refresh_token")
                    .append_pair("refresh_token", refresh_token);
            }
        }
        let request = HttpRequest {
            method: Method::Post,
            url: self.token_url.clone(),
            form: Some(form.finish()),
            bearer: None,
        };
        let response: TokenResponse = self.send(&request)?;

        if let Some(code) = response.error {
            return Ok(Reply::Rejected(RemoteError::new(code, response.error_description)));
        }

        Ok(Reply::Success(TokenSet {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            id_token: response.id_token,
            expires_in: response.expires_in,
            token_type: response.token_type,
            scope: response.scope,
        }))
    }

    /// Fetch the signed-in user's presence
    ///
    /// A refused bearer token comes back as a rejection with code
    /// `InvalidAuthenticationToken`, even when the 401 carries no body.
    pub fn fetch_presence(&mut self, access_token: &str) -> Result<Reply<PresenceSample>, GraphError> {
        let request = HttpRequest {
            method: Method::Get,
            url: PRESENCE_URL.to_string(),
            form: None,
            bearer: Some(access_token.to_string()),
        };
        let response = self.execute(&request)?;
        let parsed: Result<PresenceResponse, GraphError> = parse(&response.body);
        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(_) if response.status == 401 => {
                return Ok(Reply::Rejected(RemoteError::new(
                    INVALID_AUTHENTICATION_TOKEN,
                    Some("HTTP 401".into()),
                )));
            }
            Err(err) => return Err(err),
        };

        if let Some(error) = parsed.error {
            let code = error.code.unwrap_or_else(|| "unknown".into());
            return Ok(Reply::Rejected(RemoteError::new(code, error.message)));
        }

        match (parsed.availability, parsed.activity) {
            (Some(availability), Some(activity)) => Ok(Reply::Success(PresenceSample {
                availability,
                activity,
            })),
            _ => Err(GraphError::MalformedResponse(
                "presence response missing availability or activity".into(),
            )),
        }
    }

    fn send<R: DeserializeOwned>(&mut self, request: &HttpRequest) -> Result<R, GraphError> {
        let response = self.execute(request)?;
        parse(&response.body)
    }

    fn execute(&mut self, request: &HttpRequest) -> Result<HttpResponse, GraphError> {
        let response = self
            .transport
            .execute(request)
            .map_err(|e| GraphError::TransportFailure(format!("{:#}", e)))?;

        // Error payloads arrive with 4xx codes; anything else without a 2xx is unusable
        match response.status {
            200..=299 | 400 | 401 | 403 => {}
            status => {
                return Err(GraphError::TransportFailure(format!(
                    "unexpected HTTP status {}",
                    status
                )))
            }
        }
        if response.body.len() > MAX_RESPONSE_BYTES {
            return Err(GraphError::MalformedResponse(format!(
                "response of {} bytes exceeds limit",
                response.body.len()
            )));
        }
        Ok(response)
    }
}

fn parse<R: DeserializeOwned>(body: &[u8]) -> Result<R, GraphError> {
    serde_json::from_slice(body).map_err(|e| GraphError::MalformedResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RejectionKind;
    use crate::testing::ScriptedTransport;

    fn settings() -> Settings {
        Settings {
            tenant: "contoso.onmicrosoft.com".into(),
            ..Settings::default()
        }
    }

    fn client(transport: &ScriptedTransport) -> GraphApiClient<ScriptedTransport> {
        GraphApiClient::new(transport.clone(), &settings())
    }

    #[test]
    fn test_device_code_success() {
        let transport = ScriptedTransport::default();
        transport.reply(
            200,
            r#"{"device_code":"DC","user_code":"ABCD","verification_uri":"https://microsoft.com/devicelogin",
                "message":"Enter ABCD","interval":5,"expires_in":900,"extra":"ignored"}"#,
        );
        let mut api = client(&transport);

        let grant = match api.request_device_code().unwrap() {
            Reply::Success(grant) => grant,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(grant.user_code, "ABCD");
        assert_eq!(grant.interval_secs, 5);

        let requests = transport.requests();
        assert_eq!(requests[0].method, Method::Post);
        assert!(requests[0].url.ends_with("/contoso.onmicrosoft.com/oauth2/v2.0/devicecode"));
        let form = requests[0].form.as_deref().unwrap();
        assert!(form.contains("scope=offline_access+openid+Presence.Read"));
    }

    #[test]
    fn test_device_code_missing_interval_is_malformed() {
        let transport = ScriptedTransport::default();
        transport.reply(
            200,
            r#"{"device_code":"DC","user_code":"ABCD","verification_uri":"u","message":"m"}"#,
        );
        let err = client(&transport).request_device_code().unwrap_err();
        assert!(matches!(err, GraphError::MalformedResponse(_)));
    }

    #[test]
    fn test_token_error_is_rejection() {
        let transport = ScriptedTransport::default();
        transport.reply(
            400,
            r#"{"error":"authorization_pending","error_description":"waiting"}"#,
        );
        let reply = client(&transport).request_token(Grant::DeviceCode("DC")).unwrap();
        match reply {
            Reply::Rejected(err) => assert_eq!(err.kind(), RejectionKind::AuthorizationPending),
            Reply::Success(_) => panic!("expected rejection"),
        }
        let form = transport.requests()[0].form.clone().unwrap();
        assert!(form.contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Adevice_code"));
        assert!(form.contains("device_code=DC"));
    }

    #[test]
    fn test_refresh_grant_form() {
        let transport = ScriptedTransport::default();
        transport.reply(200, r#"{"access_token":"A2","expires_in":3600}"#);
        let reply = client(&transport)
            .request_token(Grant::RefreshToken("R+1/2"))
            .unwrap();
        match reply {
            Reply::Success(set) => {
                assert_eq!(set.access_token.as_deref(), Some("A2"));
                assert!(set.id_token.is_none());
            }
            Reply::Rejected(err) => panic!("unexpected {}", err),
        }
        let form = transport.requests()[0].form.clone().unwrap();
        assert!(form.contains("grant_type=refresh_token"));
        assert!(form.contains("refresh_token=R%2B1%2F2"));
    }

    #[test]
    fn test_presence_success_sends_bearer() {
        let transport = ScriptedTransport::default();
        transport.reply(200, r#"{"id":"u1","availability":"Busy","activity":"InAMeeting"}"#);
        let reply = client(&transport).fetch_presence("token-1").unwrap();
        assert_eq!(
            reply,
            Reply::Success(PresenceSample {
                availability: Availability::Busy,
                activity: Activity::InAMeeting,
            })
        );
        let request = &transport.requests()[0];
        assert_eq!(request.method, Method::Get);
        assert_eq!(request.bearer.as_deref(), Some("token-1"));
    }

    #[test]
    fn test_presence_auth_rejection() {
        let transport = ScriptedTransport::default();
        transport.reply(
            401,
            r#"{"error":{"code":"InvalidAuthenticationToken","message":"Access token has expired."}}"#,
        );
        transport.reply(401, "");
        let mut api = client(&transport);
        for _ in 0..2 {
            match api.fetch_presence("stale").unwrap() {
                Reply::Rejected(err) => {
                    assert_eq!(err.kind(), RejectionKind::AuthenticationExpiredOrInvalid)
                }
                Reply::Success(_) => panic!("expected rejection"),
            }
        }
    }

    #[test]
    fn test_presence_other_error_code() {
        let transport = ScriptedTransport::default();
        transport.reply(403, r#"{"error":{"code":"Forbidden","message":"nope"}}"#);
        match client(&transport).fetch_presence("t").unwrap() {
            Reply::Rejected(err) => {
                assert_eq!(err.code, "Forbidden");
                assert_eq!(err.kind(), RejectionKind::Other);
            }
            Reply::Success(_) => panic!("expected rejection"),
        }
    }

    #[test]
    fn test_transport_and_status_failures() {
        let transport = ScriptedTransport::default();
        transport.fail("connection reset");
        transport.reply(503, "Service Unavailable");
        transport.reply(301, r#"{"availability":"Busy","activity":"Busy"}"#);
        let mut api = client(&transport);
        for _ in 0..3 {
            assert!(matches!(
                api.fetch_presence("t"),
                Err(GraphError::TransportFailure(_))
            ));
        }
    }

    #[test]
    fn test_presence_missing_activity_is_malformed() {
        let transport = ScriptedTransport::default();
        transport.reply(200, r#"{"id":"u1","availability":"Busy"}"#);
        assert!(matches!(
            client(&transport).fetch_presence("t"),
            Err(GraphError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_oversized_response_refused() {
        let transport = ScriptedTransport::default();
        transport.reply(200, vec![b' '; MAX_RESPONSE_BYTES + 1]);
        assert!(matches!(
            client(&transport).fetch_presence("t"),
            Err(GraphError::MalformedResponse(_))
        ));
    }
}
