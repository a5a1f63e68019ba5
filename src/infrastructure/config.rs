use crate::domain::models::parse_weekday;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::task_sync_client::{DEFAULT_API_BASE_URL, DEFAULT_REQUEST_TIMEOUT_MS};
use chrono::Weekday;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

const CALENDAR_JSON: &str = "calendar.json";
const SUPPORTED_SCHEMA: u64 = 1;
const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 30;
const API_BASE_URL_KEYS: &[&str] = &["DOCUPLAN_API_BASE_URL"];
const API_TOKEN_KEYS: &[&str] = &["DOCUPLAN_API_TOKEN"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrySettings {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarConfigFile {
    schema: u64,
    #[serde(default = "default_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    request_timeout_ms: u64,
    #[serde(default = "default_poll_interval_seconds")]
    poll_interval_seconds: u64,
    #[serde(default = "default_week_start")]
    week_start: String,
    #[serde(default = "default_timezone")]
    timezone: String,
    #[serde(default)]
    retry: RetrySettings,
}

impl Default for CalendarConfigFile {
    fn default() -> Self {
        Self {
            schema: SUPPORTED_SCHEMA,
            api_base_url: default_api_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
            poll_interval_seconds: default_poll_interval_seconds(),
            week_start: default_week_start(),
            timezone: default_timezone(),
            retry: RetrySettings::default(),
        }
    }
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_poll_interval_seconds() -> u64 {
    DEFAULT_POLL_INTERVAL_SECONDS
}

fn default_week_start() -> String {
    "monday".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Validated calendar settings, after environment overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarConfig {
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub week_start: Weekday,
    pub time_zone: Tz,
    pub retry: RetrySettings,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_token: None,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECONDS),
            week_start: Weekday::Mon,
            time_zone: Tz::UTC,
            retry: RetrySettings::default(),
        }
    }
}

pub fn ensure_default_config(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(CALENDAR_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&CalendarConfigFile::default())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

pub fn load_config(config_dir: &Path) -> Result<CalendarConfig, InfraError> {
    load_config_with_lookup(config_dir, |key| std::env::var(key).ok())
}

pub fn load_config_with_lookup<F>(config_dir: &Path, lookup: F) -> Result<CalendarConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let file = read_config_file(&config_dir.join(CALENDAR_JSON))?;

    let time_zone = file.timezone.trim().parse::<Tz>().map_err(|_| {
        InfraError::InvalidConfig(format!("unknown timezone '{}'", file.timezone))
    })?;
    let week_start = parse_weekday(&file.week_start).ok_or_else(|| {
        InfraError::InvalidConfig(format!("unknown weekStart '{}'", file.week_start))
    })?;
    if file.poll_interval_seconds == 0 {
        return Err(InfraError::InvalidConfig(
            "pollIntervalSeconds must be positive".to_string(),
        ));
    }
    if file.request_timeout_ms == 0 {
        return Err(InfraError::InvalidConfig(
            "requestTimeoutMs must be positive".to_string(),
        ));
    }
    if file.retry.max_attempts == 0 {
        return Err(InfraError::InvalidConfig(
            "retry.maxAttempts must be at least 1".to_string(),
        ));
    }

    let api_base_url =
        optional_lookup_value(&lookup, API_BASE_URL_KEYS).unwrap_or(file.api_base_url);
    let api_token = optional_lookup_value(&lookup, API_TOKEN_KEYS);

    Ok(CalendarConfig {
        api_base_url,
        api_token,
        request_timeout: Duration::from_millis(file.request_timeout_ms),
        poll_interval: Duration::from_secs(file.poll_interval_seconds),
        week_start,
        time_zone,
        retry: file.retry,
    })
}

fn read_config_file(path: &Path) -> Result<CalendarConfigFile, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(serde_json::from_value(parsed)?)
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}
