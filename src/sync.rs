//! API Sync Module
//!
//! Handles HTTP communication with the Eversense cloud API: the password/OTP
//! token grant, the user-details lookup and the glucose-events lookup.
//!
//! The glucose endpoint reasons in the server's civil calendar rather than
//! UTC. All of that translation lives here; callers only ever see UTC.

use std::time::Duration;

use chrono::{DateTime, LocalResult, NaiveDateTime, Offset, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::auth::{Credentials, Session, UserId, DEFAULT_TOKEN_TTL_SECS};

/// Civil timezone the deployed service computes day boundaries in
pub const SERVER_TIMEZONE: Tz = chrono_tz::Europe::Stockholm;

/// Upper bound for any single outbound request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// The service expects this literal suffix on the *DateStr fields regardless
// of the actual offset; the numeric TimeZoneOffset is computed separately.
const FIXED_OFFSET_FORMAT: &str = "%Y-%m-%dT%H:%M:%S+02:00";
const UTC_MILLIS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.000Z";

const CLIENT_ID: &str = "dms";
const CLIENT_SECRET: &str = "secret";

/// Remote endpoint URLs
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub token_url: String,
    pub user_details_url: String,
    pub glucose_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            token_url: "https://ousiamapialpha.eversensedms.com/connect/token".into(),
            user_details_url:
                "https://ousalphaapiservices.eversensedms.com/api/Users/GetUserDetails".into(),
            glucose_url:
                "https://ousalphaapiservices.eversensedms.com//TransmitterLog/GetSensorGlucoseEvents"
                    .into(),
        }
    }
}

impl Endpoints {
    /// All three endpoints under one base URL, mirroring the production paths
    pub fn with_base(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            token_url: format!("{}/connect/token", base),
            user_details_url: format!("{}/api/Users/GetUserDetails", base),
            glucose_url: format!("{}/TransmitterLog/GetSensorGlucoseEvents", base),
        }
    }
}

/// Session-owning client for the Eversense API
pub struct ApiClient {
    client: reqwest::Client,
    endpoints: Endpoints,
    credentials: Credentials,
    timezone: Tz,
    session: Session,
}

impl ApiClient {
    /// Create a new API client against the production endpoints
    pub fn new(credentials: Credentials, timezone: Tz, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoints: Endpoints::default(),
            credentials,
            timezone,
            session: Session::default(),
        })
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Replace the current session state
    pub fn set_session(&mut self, session: Session) {
        self.session = session;
    }

    /// Exchange the credentials for a bearer token.
    ///
    /// On failure the previous session is left exactly as it was.
    pub async fn login(&mut self) -> Result<(), ApiError> {
        debug!("Requesting token at: {}", self.endpoints.token_url);

        match self.request_token().await {
            Ok(grant) => {
                let ttl = grant.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS);
                self.session.grant(grant.access_token, ttl, Utc::now());
                info!("Login succeeded, token expires in {}s", ttl);
                Ok(())
            }
            Err(e) => {
                error!("Login failed: {}", e);
                Err(e)
            }
        }
    }

    /// Re-authenticate if the current token is missing or expired.
    ///
    /// A failed re-login surfaces as [`ApiError::Auth`]; callers abort the
    /// current cycle on it.
    pub async fn ensure_valid(&mut self) -> Result<(), ApiError> {
        if self.session.is_valid() {
            return Ok(());
        }

        debug!("Token expired or missing, re-login needed");
        self.login()
            .await
            .map_err(|e| ApiError::Auth(format!("cannot refresh token: {}", e)))
    }

    /// Look up the remote user identifier and remember it in the session.
    ///
    /// `Ok(None)` means the lookup failed and was logged.
    pub async fn fetch_identity(&mut self) -> Result<Option<UserId>, ApiError> {
        self.ensure_valid().await?;

        match self.request_identity().await {
            Ok(Some(user_id)) => {
                debug!("UserID fetched: {}", user_id);
                self.session.user_id = Some(user_id.clone());
                Ok(Some(user_id))
            }
            Ok(None) => {
                error!("User details response carried no UserID");
                Ok(None)
            }
            Err(e) => {
                error!("Failed to fetch UserID: {}", e);
                Ok(None)
            }
        }
    }

    /// Fetch glucose events between two UTC instants.
    ///
    /// `Ok(None)` means the fetch failed and was logged, as opposed to
    /// `Ok(Some(vec![]))` for a successful fetch with no data.
    pub async fn fetch_readings(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<Vec<GlucoseEvent>>, ApiError> {
        self.ensure_valid().await?;

        let query = GlucoseQuery::build(from, to, &self.timezone, self.session.user_id.clone());
        debug!("Fetching glucose data from {} to {}", from, to);

        match self.request_events(&query).await {
            Ok(events) => {
                debug!("Fetched {} glucose events", events.len());
                Ok(Some(events))
            }
            Err(e) => {
                error!("Glucose fetch failed: {}", e);
                Ok(None)
            }
        }
    }

    async fn request_token(&self) -> Result<TokenResponse, ApiError> {
        let form = TokenRequest {
            username: &self.credentials.username,
            password: &self.credentials.password,
            grant_type: "password",
            client_id: CLIENT_ID,
            client_secret: CLIENT_SECRET,
            otp_factor: &self.credentials.otp_factor,
            otp_mode: &self.credentials.otp_mode,
        };

        let response = self.client
            .post(&self.endpoints.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let response = check_status(response)?;

        response.json::<TokenResponse>().await
            .map_err(|e| ApiError::Parse(e.to_string()))
    }

    async fn request_identity(&self) -> Result<Option<UserId>, ApiError> {
        let token = self.bearer_token()?;
        let offset = offset_param(&Utc::now().with_timezone(&self.timezone));

        let response = self.client
            .get(&self.endpoints.user_details_url)
            .query(&[("TimeZoneOffset", offset)])
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let response = check_status(response)?;

        let details = response.json::<UserDetailsResponse>().await
            .map_err(|e| ApiError::Parse(e.to_string()))?;

        Ok(UserId::from_value(details.user_id))
    }

    async fn request_events(&self, query: &GlucoseQuery) -> Result<Vec<GlucoseEvent>, ApiError> {
        let token = self.bearer_token()?;

        let response = self.client
            .post(&self.endpoints.glucose_url)
            .header("Authorization", format!("Bearer {}", token))
            .json(query)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let response = check_status(response)?;

        let raw = response.json::<Vec<serde_json::Value>>().await
            .map_err(|e| ApiError::Parse(e.to_string()))?;

        Ok(raw
            .iter()
            .map(|event| GlucoseEvent::from_json(event, &self.timezone))
            .collect())
    }

    fn bearer_token(&self) -> Result<&str, ApiError> {
        self.session
            .access_token
            .as_deref()
            .ok_or_else(|| ApiError::Auth("no access token".into()))
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ApiError::Server(format!("Status: {}", status)))
    }
}

/// Offset parameter as the service wants it: minutes, sign inverted
/// (UTC+02:00 is sent as -120)
pub fn offset_param(at: &DateTime<Tz>) -> i32 {
    -(at.offset().fix().local_minus_utc() / 60)
}

/// 23:59:59.999999 of the civil day containing `to`
pub fn end_of_local_day(to: DateTime<Utc>, tz: &Tz) -> DateTime<Tz> {
    let local = to.with_timezone(tz);
    local
        .date_naive()
        .and_hms_micro_opt(23, 59, 59, 999_999)
        .and_then(|naive| tz.from_local_datetime(&naive).earliest())
        .unwrap_or(local)
}

/// Parse a remote event date into UTC at second precision.
///
/// Dates carrying an offset are converted directly; naive dates are read in
/// the server's civil timezone.
pub fn normalize_event_date(raw: &str, tz: &Tz) -> Option<DateTime<Utc>> {
    let utc = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .and_then(|naive| localize(&naive, tz))
        })?;

    utc.with_nanosecond(0)
}

fn localize(naive: &NaiveDateTime, tz: &Tz) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(naive) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => Some(dt.with_timezone(&Utc)),
        // Wall time skipped by a forward shift: keep the offset in force before it
        LocalResult::None => {
            let before = tz
                .offset_from_utc_datetime(&(*naive - chrono::Duration::days(1)))
                .fix();
            before
                .from_local_datetime(naive)
                .single()
                .map(|dt| dt.with_timezone(&Utc))
        }
    }
}

// Request/Response types

#[derive(Serialize)]
struct TokenRequest<'a> {
    username: &'a str,
    password: &'a str,
    grant_type: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    otp_factor: &'a str,
    otp_mode: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct UserDetailsResponse {
    #[serde(rename = "UserID", default)]
    user_id: serde_json::Value,
}

/// JSON body of the glucose-events lookup
#[derive(Debug, Clone, Serialize)]
pub struct GlucoseQuery {
    #[serde(rename = "FromDateStr")]
    pub from_date_str: String,
    #[serde(rename = "ToDateStr")]
    pub to_date_str: String,
    #[serde(rename = "TimeZoneOffset")]
    pub time_zone_offset: i32,
    #[serde(rename = "UserID")]
    pub user_id: Option<UserId>,
    #[serde(rename = "startDate")]
    pub start_date: String,
    #[serde(rename = "endDate")]
    pub end_date: String,
}

impl GlucoseQuery {
    pub fn build(
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        tz: &Tz,
        user_id: Option<UserId>,
    ) -> Self {
        let end_of_day = end_of_local_day(to, tz);

        Self {
            from_date_str: from.format(FIXED_OFFSET_FORMAT).to_string(),
            to_date_str: end_of_day.format(FIXED_OFFSET_FORMAT).to_string(),
            time_zone_offset: offset_param(&end_of_day),
            user_id,
            start_date: from.format(UTC_MILLIS_FORMAT).to_string(),
            end_date: to.format(UTC_MILLIS_FORMAT).to_string(),
        }
    }
}

/// One glucose event as returned by the service, timestamp already in UTC.
///
/// Fields are optional because the service does not guarantee them; the
/// acquisition loop decides what to do with incomplete events.
#[derive(Debug, Clone, PartialEq)]
pub struct GlucoseEvent {
    pub event_date: Option<DateTime<Utc>>,
    pub converted_value: Option<serde_json::Value>,
}

impl GlucoseEvent {
    fn from_json(raw: &serde_json::Value, tz: &Tz) -> Self {
        let event_date = match raw.get("EventDate") {
            Some(serde_json::Value::String(date)) => {
                let parsed = normalize_event_date(date, tz);
                if parsed.is_none() {
                    warn!("Unparseable EventDate: {}", date);
                }
                parsed
            }
            Some(serde_json::Value::Null) | None => None,
            Some(other) => {
                warn!("Unexpected EventDate value: {}", other);
                None
            }
        };

        Self {
            event_date,
            converted_value: raw.get("convertedValue").filter(|v| !v.is_null()).cloned(),
        }
    }
}

/// API errors
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Authentication error: {0}")]
    Auth(String),
}
