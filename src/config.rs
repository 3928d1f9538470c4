//! Run configuration
//!
//! Settings come from three places, highest precedence first: command-line
//! [`Overrides`], the JSON [`FileConfig`], and built-in defaults. They are
//! resolved and validated once into [`RunSettings`] before anything connects.

use crate::error::{SetupError, PLACEHOLDER_SPREADSHEET_KEY};
use crate::proxy::CheckerConfig;
use crate::report::SheetLayout;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Config file picked up from the working directory when none is given
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

const DEFAULT_CREDENTIALS_FILE: &str = "credentials.json";
const DEFAULT_WORKSHEET: &str = "Sheet1";
const DEFAULT_START_ROW: u32 = 2;
const DEFAULT_DELAY_SECS: f64 = 1.0;
const DEFAULT_TIMEOUT_SECS: f64 = 10.0;

/// Contents of the JSON config file; every key is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spreadsheet_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worksheet_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_status_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_row: Option<u32>,
    /// Pause between proxies, in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_changes: Option<bool>,
    /// Per-request timeout, in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_urls: Option<Vec<String>>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, SetupError> {
        if !path.exists() {
            return Err(SetupError::ConfigNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| SetupError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&content).map_err(|source| SetupError::InvalidConfig {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Load `explicit` if given, else `config.json` in the working directory
    /// if it exists, else an empty config
    pub fn discover(explicit: Option<&Path>) -> Result<Self, SetupError> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_PATH);
                if fallback.exists() {
                    Self::load(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Starter config with every key filled in
    pub fn template() -> Self {
        Self {
            credentials_file: Some(PathBuf::from(DEFAULT_CREDENTIALS_FILE)),
            spreadsheet_key: Some(PLACEHOLDER_SPREADSHEET_KEY.to_string()),
            worksheet_name: Some(DEFAULT_WORKSHEET.to_string()),
            proxy_column: Some("A".to_string()),
            status_column: Some("B".to_string()),
            message_column: Some("C".to_string()),
            date_column: Some("D".to_string()),
            previous_status_column: Some("E".to_string()),
            start_row: Some(DEFAULT_START_ROW),
            delay: Some(DEFAULT_DELAY_SECS),
            strict: Some(true),
            track_changes: Some(true),
            timeout: Some(DEFAULT_TIMEOUT_SECS),
            test_urls: None,
        }
    }

    /// Write the template to `path`, refusing to replace an existing file
    pub fn write_template(path: &Path) -> Result<(), SetupError> {
        let io_err = |source: std::io::Error| SetupError::Io {
            path: path.to_path_buf(),
            source,
        };
        let json = serde_json::to_string_pretty(&Self::template()).map_err(|source| {
            SetupError::InvalidConfig {
                path: path.to_path_buf(),
                source,
            }
        })?;

        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(SetupError::ConfigExists(path.to_path_buf()))
            }
            Err(e) => return Err(io_err(e)),
        };
        file.write_all(json.as_bytes()).map_err(io_err)?;
        file.write_all(b"\n").map_err(io_err)?;
        Ok(())
    }
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub credentials_file: Option<PathBuf>,
    pub spreadsheet_key: Option<String>,
    pub worksheet_name: Option<String>,
    pub proxy_column: Option<String>,
    pub status_column: Option<String>,
    pub message_column: Option<String>,
    pub date_column: Option<String>,
    pub previous_status_column: Option<String>,
    pub start_row: Option<u32>,
    pub delay: Option<f64>,
    pub strict: Option<bool>,
    pub track_changes: Option<bool>,
    pub timeout: Option<f64>,
    /// Empty means "not given"
    pub test_urls: Vec<String>,
}

/// Fully resolved settings for one run
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub credentials_file: PathBuf,
    pub spreadsheet_key: String,
    pub worksheet_name: String,
    pub layout: SheetLayout,
    pub checker: CheckerConfig,
    pub track_changes: bool,
}

impl RunSettings {
    pub fn resolve(file: &FileConfig, overrides: &Overrides) -> Result<Self, SetupError> {
        let credentials_file = overrides
            .credentials_file
            .clone()
            .or_else(|| file.credentials_file.clone())
            .ok_or(SetupError::MissingCredentials)?;
        if !credentials_file.exists() {
            return Err(SetupError::CredentialsNotFound(credentials_file));
        }

        let spreadsheet_key = pick(&overrides.spreadsheet_key, &file.spreadsheet_key)
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or(SetupError::MissingSpreadsheetKey)?;
        if spreadsheet_key == PLACEHOLDER_SPREADSHEET_KEY {
            return Err(SetupError::PlaceholderSpreadsheetKey);
        }

        let worksheet_name = pick(&overrides.worksheet_name, &file.worksheet_name)
            .unwrap_or_else(|| DEFAULT_WORKSHEET.to_string());

        let column = |flag: &Option<String>, key: &Option<String>, default: &str| {
            pick(flag, key).unwrap_or_else(|| default.to_string())
        };
        let layout = SheetLayout::from_letters(
            &column(&overrides.proxy_column, &file.proxy_column, "A"),
            &column(&overrides.status_column, &file.status_column, "B"),
            &column(&overrides.message_column, &file.message_column, "C"),
            &column(&overrides.date_column, &file.date_column, "D"),
            &column(
                &overrides.previous_status_column,
                &file.previous_status_column,
                "E",
            ),
            overrides
                .start_row
                .or(file.start_row)
                .unwrap_or(DEFAULT_START_ROW),
        )?;

        let delay = seconds(
            "delay",
            overrides.delay.or(file.delay).unwrap_or(DEFAULT_DELAY_SECS),
        )?;
        let timeout = seconds(
            "timeout",
            overrides
                .timeout
                .or(file.timeout)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        )?;

        let mut checker = CheckerConfig::new()
            .with_strict(overrides.strict.or(file.strict).unwrap_or(true))
            .with_timeout(timeout)
            .with_pacing_delay(delay);
        if !overrides.test_urls.is_empty() {
            checker = checker.with_test_urls(overrides.test_urls.clone());
        } else if let Some(urls) = &file.test_urls {
            checker = checker.with_test_urls(urls.clone());
        }
        if checker.strict && checker.test_urls.is_some() {
            warn!("test URLs only apply in lenient mode; strict mode uses the built-in endpoints");
        }
        checker.validate()?;

        Ok(Self {
            credentials_file,
            spreadsheet_key,
            worksheet_name,
            layout,
            checker,
            track_changes: overrides
                .track_changes
                .or(file.track_changes)
                .unwrap_or(true),
        })
    }
}

fn pick(flag: &Option<String>, key: &Option<String>) -> Option<String> {
    flag.clone().or_else(|| key.clone())
}

fn seconds(name: &str, value: f64) -> Result<Duration, SetupError> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        SetupError::InvalidSetting(format!(
            "{} must be a non-negative number of seconds, got {}",
            name, value
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::STRICT_TEST_URLS;
    use tempfile::TempDir;

    fn with_credentials() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "{}").unwrap();
        (dir, path)
    }

    fn base(credentials: &Path) -> FileConfig {
        FileConfig {
            credentials_file: Some(credentials.to_path_buf()),
            spreadsheet_key: Some("abc123".to_string()),
            ..FileConfig::default()
        }
    }

    #[test]
    fn test_defaults_apply() {
        let (_dir, creds) = with_credentials();
        let settings = RunSettings::resolve(&base(&creds), &Overrides::default()).unwrap();

        assert_eq!(settings.worksheet_name, "Sheet1");
        assert_eq!(settings.layout, SheetLayout::default());
        assert!(settings.track_changes);
        assert!(settings.checker.strict);
        assert_eq!(settings.checker.timeout, Duration::from_secs(10));
        assert_eq!(settings.checker.pacing_delay, Duration::from_secs(1));
        assert_eq!(settings.checker.endpoints().len(), 3);
    }

    #[test]
    fn test_flags_beat_file() {
        let (_dir, creds) = with_credentials();
        let file = FileConfig {
            worksheet_name: Some("FromFile".to_string()),
            delay: Some(5.0),
            strict: Some(true),
            track_changes: Some(true),
            test_urls: Some(vec!["http://file/ip".to_string()]),
            ..base(&creds)
        };
        let overrides = Overrides {
            worksheet_name: Some("FromFlag".to_string()),
            strict: Some(false),
            track_changes: Some(false),
            test_urls: vec!["http://flag/ip".to_string()],
            ..Overrides::default()
        };

        let settings = RunSettings::resolve(&file, &overrides).unwrap();
        assert_eq!(settings.worksheet_name, "FromFlag");
        assert_eq!(settings.checker.pacing_delay, Duration::from_secs(5));
        assert!(!settings.checker.strict);
        assert!(!settings.track_changes);
        assert_eq!(settings.checker.endpoints(), vec!["http://flag/ip"]);
    }

    #[test]
    fn test_strict_run_keeps_builtin_endpoints() {
        let (_dir, creds) = with_credentials();
        let file = FileConfig {
            test_urls: Some(vec!["http://file/ip".to_string()]),
            ..base(&creds)
        };

        let settings = RunSettings::resolve(&file, &Overrides::default()).unwrap();
        assert!(settings.checker.strict);
        assert_eq!(settings.checker.endpoints(), STRICT_TEST_URLS.map(String::from).to_vec());
    }

    #[test]
    fn test_placeholder_key_rejected() {
        let (_dir, creds) = with_credentials();
        let file = FileConfig {
            spreadsheet_key: Some(PLACEHOLDER_SPREADSHEET_KEY.to_string()),
            ..base(&creds)
        };
        assert!(matches!(
            RunSettings::resolve(&file, &Overrides::default()),
            Err(SetupError::PlaceholderSpreadsheetKey)
        ));
    }

    #[test]
    fn test_missing_key_and_credentials() {
        let (_dir, creds) = with_credentials();
        let file = FileConfig {
            spreadsheet_key: Some("  ".to_string()),
            ..base(&creds)
        };
        assert!(matches!(
            RunSettings::resolve(&file, &Overrides::default()),
            Err(SetupError::MissingSpreadsheetKey)
        ));
        assert!(matches!(
            RunSettings::resolve(&FileConfig::default(), &Overrides::default()),
            Err(SetupError::MissingCredentials)
        ));

        let missing = FileConfig {
            credentials_file: Some(PathBuf::from("/nonexistent/credentials.json")),
            ..base(&creds)
        };
        assert!(matches!(
            RunSettings::resolve(&missing, &Overrides::default()),
            Err(SetupError::CredentialsNotFound(_))
        ));
    }

    #[test]
    fn test_bad_column_and_delay() {
        let (_dir, creds) = with_credentials();
        let file = FileConfig {
            status_column: Some("AB".to_string()),
            ..base(&creds)
        };
        assert!(matches!(
            RunSettings::resolve(&file, &Overrides::default()),
            Err(SetupError::InvalidColumn(_))
        ));

        let overrides = Overrides {
            delay: Some(-1.0),
            ..Overrides::default()
        };
        assert!(matches!(
            RunSettings::resolve(&base(&creds), &overrides),
            Err(SetupError::InvalidSetting(_))
        ));
    }

    #[test]
    fn test_template_round_trips_and_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        FileConfig::write_template(&path).unwrap();
        let loaded = FileConfig::load(&path).unwrap();
        assert_eq!(loaded, FileConfig::template());
        assert!(!std::fs::read_to_string(&path).unwrap().contains("test_urls"));

        assert!(matches!(
            FileConfig::write_template(&path),
            Err(SetupError::ConfigExists(_))
        ));
    }

    #[test]
    fn test_load_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        assert!(matches!(FileConfig::load(&path), Err(SetupError::ConfigNotFound(_))));

        std::fs::write(&path, "{ \"delay\": 1.0, }").unwrap();
        assert!(matches!(
            FileConfig::load(&path),
            Err(SetupError::InvalidConfig { .. })
        ));
    }
}
