//! Google Sheets v4 REST adapter
//!
//! Authenticates as a service account with the OAuth2 JWT-bearer grant and
//! reads and writes plain values on one worksheet.

use crate::error::{SetupError, StoreError};
use crate::store::{CellUpdate, Column, TabularStore};
use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Default Sheets API root
pub const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com/v4";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for each signed assertion, in seconds
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Tokens are refreshed this long before they expire
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The fields of a service account key file this adapter uses
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self, SetupError> {
        if !path.exists() {
            return Err(SetupError::CredentialsNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| SetupError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|e| SetupError::InvalidCredentials {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// JWT claims of the assertion exchanged for an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssertionClaims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

impl AssertionClaims {
    pub fn new(key: &ServiceAccountKey, issued_at: i64) -> Self {
        Self {
            iss: key.client_email.clone(),
            scope: SHEETS_SCOPE.to_string(),
            aud: key.token_uri.clone(),
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME_SECS,
        }
    }
}

/// How requests are authorized
pub enum SheetsAuth {
    ServiceAccount {
        key: ServiceAccountKey,
        signing_key: EncodingKey,
    },
    /// A pre-issued bearer token
    AccessToken(String),
}

impl SheetsAuth {
    pub fn service_account(key: ServiceAccountKey, path: &Path) -> Result<Self, SetupError> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|e| {
            SetupError::InvalidCredentials {
                path: path.to_path_buf(),
                reason: format!("private_key is not an RSA PEM key: {}", e),
            }
        })?;
        Ok(SheetsAuth::ServiceAccount { key, signing_key })
    }
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Deserialize)]
struct SpreadsheetMeta {
    properties: SpreadsheetProperties,
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Deserialize)]
struct SpreadsheetProperties {
    title: String,
}

#[derive(Deserialize)]
struct SheetMeta {
    properties: SpreadsheetProperties,
}

/// One worksheet of one spreadsheet
pub struct GoogleSheetsStore {
    http: Client,
    api_base: String,
    spreadsheet_key: String,
    worksheet: String,
    auth: SheetsAuth,
    token: Mutex<Option<CachedToken>>,
}

impl GoogleSheetsStore {
    pub fn new(
        auth: SheetsAuth,
        spreadsheet_key: impl Into<String>,
        worksheet: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            api_base: DEFAULT_API_BASE.to_string(),
            spreadsheet_key: spreadsheet_key.into(),
            worksheet: worksheet.into(),
            auth,
            token: Mutex::new(None),
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Load a service account key, then open and verify the worksheet
    pub async fn connect(
        credentials: &Path,
        spreadsheet_key: &str,
        worksheet: &str,
    ) -> Result<Self, SetupError> {
        let key = ServiceAccountKey::from_file(credentials)?;
        let auth = SheetsAuth::service_account(key, credentials)?;
        let store = Self::new(auth, spreadsheet_key, worksheet)?;
        store.open().await?;
        Ok(store)
    }

    /// Check the spreadsheet is reachable and contains the worksheet
    ///
    /// Returns the spreadsheet title.
    pub async fn open(&self) -> Result<String, SetupError> {
        let mut url = self.url(&["spreadsheets", &self.spreadsheet_key])?;
        url.query_pairs_mut()
            .append_pair("fields", "properties.title,sheets.properties.title");

        let token = self.access_token().await?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(StoreError::from)?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                return Err(SetupError::SpreadsheetNotFound(self.spreadsheet_key.clone()))
            }
            StatusCode::FORBIDDEN => {
                return Err(SetupError::PermissionDenied(self.spreadsheet_key.clone()))
            }
            _ => {}
        }

        let meta: SpreadsheetMeta = parse_json(response).await?;
        let available: Vec<String> = meta.sheets.into_iter().map(|s| s.properties.title).collect();
        if !available.iter().any(|title| title == &self.worksheet) {
            return Err(SetupError::WorksheetNotFound {
                name: self.worksheet.clone(),
                available,
            });
        }

        info!(title = %meta.properties.title, worksheet = %self.worksheet, "connected to spreadsheet");
        Ok(meta.properties.title)
    }

    fn url(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| StoreError::Response(format!("invalid API base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Response("API base URL cannot have a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Worksheet-qualified A1 range
    fn sheet_range(&self, range: &str) -> String {
        format!("'{}'!{}", self.worksheet.replace('\'', "''"), range)
    }

    async fn access_token(&self) -> Result<String, StoreError> {
        let (key, signing_key) = match &self.auth {
            SheetsAuth::AccessToken(token) => return Ok(token.clone()),
            SheetsAuth::ServiceAccount { key, signing_key } => (key, signing_key),
        };

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at {
                return Ok(token.token.clone());
            }
        }

        let claims = AssertionClaims::new(key, chrono::Utc::now().timestamp());
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, signing_key)
            .map_err(|e| StoreError::Auth(format!("failed to sign assertion: {}", e)))?;

        debug!(token_uri = %key.token_uri, "requesting access token");
        let response = self
            .http
            .post(&key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Auth(format!("token endpoint returned {}: {}", status, body)));
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS as u64));
        *cached = Some(CachedToken {
            token: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>, StoreError> {
        let url = self.url(&["spreadsheets", &self.spreadsheet_key, "values", &self.sheet_range(range)])?;
        let token = self.access_token().await?;
        let response = self.http.get(url).bearer_auth(token).send().await?;
        let range: ValueRange = parse_json(response).await?;
        Ok(range.values)
    }
}

#[async_trait]
impl TabularStore for GoogleSheetsStore {
    async fn read_column(&self, column: Column, start_row: u32) -> Result<Vec<String>, StoreError> {
        let range = format!("{}:{}", column.cell(start_row), column);
        let rows = self.get_values(&range).await?;
        let values: Vec<String> = rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .collect();
        debug!(column = %column, start_row, count = values.len(), "read column");
        Ok(values)
    }

    async fn read_cell(&self, row: u32, column: Column) -> Result<Option<String>, StoreError> {
        let rows = self.get_values(&column.cell(row)).await?;
        Ok(rows.into_iter().next().and_then(|r| r.into_iter().next()))
    }

    async fn batch_write(&self, updates: &[CellUpdate]) -> Result<(), StoreError> {
        if updates.is_empty() {
            return Ok(());
        }
        let url = self.url(&["spreadsheets", &self.spreadsheet_key, "values:batchUpdate"])?;
        let data: Vec<_> = updates
            .iter()
            .map(|u| json!({ "range": self.sheet_range(&u.range()), "values": [[u.value]] }))
            .collect();
        let body = json!({ "valueInputOption": "RAW", "data": data });

        let token = self.access_token().await?;
        let response = self.http.post(url).bearer_auth(token).json(&body).send().await?;
        check_status(response).await?;
        debug!(cells = updates.len(), "batch update written");
        Ok(())
    }
}

async fn check_status(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or(body);
    Err(StoreError::Api {
        status: status.as_u16(),
        message,
    })
}

async fn parse_json<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, StoreError> {
    let response = check_status(response).await?;
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| StoreError::Response(e.to_string()))
}
