//! Error types for setup and persistence failures
//!
//! Probe failures are not errors: they are classified into
//! [`ProbeKind`](crate::proxy::ProbeKind) values and folded into the verdict.

use std::path::PathBuf;
use thiserror::Error;

/// Placeholder spreadsheet key written by `init-config`
pub const PLACEHOLDER_SPREADSHEET_KEY: &str = "your-spreadsheet-key-here";

/// Errors that stop a run before any proxy is checked
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("config file '{0}' not found")]
    ConfigNotFound(PathBuf),

    #[error("config file '{0}' already exists")]
    ConfigExists(PathBuf),

    #[error("config file '{path}' is not valid JSON: {source}")]
    InvalidConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to access '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no credentials file given")]
    MissingCredentials,

    #[error("credentials file '{0}' not found")]
    CredentialsNotFound(PathBuf),

    #[error("credentials file '{path}' is not a usable service account key: {reason}")]
    InvalidCredentials { path: PathBuf, reason: String },

    #[error("no spreadsheet key given")]
    MissingSpreadsheetKey,

    #[error("spreadsheet key is still the placeholder value")]
    PlaceholderSpreadsheetKey,

    #[error("spreadsheet '{0}' not found")]
    SpreadsheetNotFound(String),

    #[error("access to spreadsheet '{0}' was denied")]
    PermissionDenied(String),

    #[error("worksheet '{name}' not found")]
    WorksheetNotFound { name: String, available: Vec<String> },

    #[error("invalid column '{0}': expected a single letter A-Z")]
    InvalidColumn(String),

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SetupError {
    /// Remediation hint shown to the user under the error line
    pub fn hint(&self) -> Option<String> {
        let hint = match self {
            SetupError::ConfigNotFound(_) => {
                "run `proxy-sentinel init-config` to create config.json, then fill it in".to_string()
            }
            SetupError::ConfigExists(_) => {
                "edit the existing file or pass a different path".to_string()
            }
            SetupError::InvalidConfig { .. } => {
                "check the file for trailing commas or unquoted keys".to_string()
            }
            SetupError::Io { .. } => "check the path exists and is readable".to_string(),
            SetupError::MissingCredentials => {
                "pass --credentials or set credentials_file in the config file".to_string()
            }
            SetupError::CredentialsNotFound(_) => {
                "create a service account in Google Cloud Console and download its JSON key"
                    .to_string()
            }
            SetupError::InvalidCredentials { .. } => {
                "the key file must contain client_email and private_key".to_string()
            }
            SetupError::MissingSpreadsheetKey => {
                "pass --spreadsheet-key or set spreadsheet_key in the config file".to_string()
            }
            SetupError::PlaceholderSpreadsheetKey => {
                "copy the key from https://docs.google.com/spreadsheets/d/SPREADSHEET_KEY/edit"
                    .to_string()
            }
            SetupError::SpreadsheetNotFound(_) => {
                "check the spreadsheet key and that the sheet is shared with the service account"
                    .to_string()
            }
            SetupError::PermissionDenied(_) => {
                "share the spreadsheet with the service account's client_email as an editor"
                    .to_string()
            }
            SetupError::WorksheetNotFound { available, .. } => {
                if available.is_empty() {
                    "check the worksheet name".to_string()
                } else {
                    let names: Vec<String> =
                        available.iter().map(|n| format!("'{}'", n)).collect();
                    format!("available worksheets: {}", names.join(", "))
                }
            }
            SetupError::InvalidColumn(_) => {
                "columns are single letters such as A, B or C".to_string()
            }
            SetupError::InvalidSetting(_) => return None,
            SetupError::Store(e) => return e.hint(),
        };
        Some(hint)
    }
}

/// Errors raised by a [`TabularStore`](crate::store::TabularStore)
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Response(String),
}

impl StoreError {
    pub fn hint(&self) -> Option<String> {
        let hint = match self {
            StoreError::Http(_) => "check network access to the Google APIs",
            StoreError::Auth(_) => {
                "check the service account key and that the Sheets API is enabled for its project"
            }
            StoreError::Api { status: 403, .. } => {
                "share the spreadsheet with the service account's client_email as an editor"
            }
            StoreError::Api { status: 429, .. } => "quota exceeded; raise --delay or retry later",
            StoreError::Api { .. } | StoreError::Response(_) => return None,
        };
        Some(hint.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worksheet_hint_lists_available() {
        let err = SetupError::WorksheetNotFound {
            name: "Proxies".to_string(),
            available: vec!["Sheet1".to_string(), "Archive".to_string()],
        };
        assert_eq!(
            err.hint().as_deref(),
            Some("available worksheets: 'Sheet1', 'Archive'")
        );
    }

    #[test]
    fn test_store_error_wraps_transparently() {
        let err: SetupError = StoreError::Auth("bad key".to_string()).into();
        assert_eq!(err.to_string(), "authentication failed: bad key");
        assert!(err.hint().is_some());
    }

    #[test]
    fn test_invalid_setting_has_no_hint() {
        assert!(SetupError::InvalidSetting("x".to_string()).hint().is_none());
    }
}
