// Watcher configuration loaded from a flat KEY=VALUE file

use lettre::message::Mailbox;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const API_KEY: &str = "AMADEUS_API_KEY";
pub const API_SECRET: &str = "AMADEUS_API_SECRET";
pub const SENDER_EMAIL: &str = "SENDER_EMAIL";
pub const RECEIVER_EMAIL: &str = "RECEIVER_EMAIL";
pub const EMAIL_APP_PASSWORD: &str = "EMAIL_APP_PASSWORD";

// Keys that must be present; credentials never fall back to defaults
pub const REQUIRED_KEYS: [&str; 5] = [
    API_KEY,
    API_SECRET,
    SENDER_EMAIL,
    RECEIVER_EMAIL,
    EMAIL_APP_PASSWORD,
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file {path} could not be read: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config line {line}: expected KEY=VALUE")]
    MalformedLine { line: usize },

    #[error("Missing required config key: {0}")]
    MissingKey(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

// Raw key/value pairs as they appear in the file
pub type RawConfig = HashMap<String, String>;

pub fn parse_key_values(contents: &str) -> Result<RawConfig, ConfigError> {
    let mut values = HashMap::new();

    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line
            .split_once('=')
            .ok_or(ConfigError::MalformedLine { line: index + 1 })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::MalformedLine { line: index + 1 });
        }
        values.insert(key.to_string(), value.trim().to_string());
    }

    Ok(values)
}

pub fn load_key_values(path: impl AsRef<Path>) -> Result<RawConfig, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
        path: path.display().to_string(),
        source,
    })?;
    parse_key_values(&contents)
}

#[derive(Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct EmailSettings {
    pub sender: Mailbox,
    pub receiver: Mailbox,
    pub app_password: String,
    pub smtp_host: String,
    pub smtp_port: u16,
}

impl std::fmt::Debug for EmailSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailSettings")
            .field("sender", &self.sender)
            .field("receiver", &self.receiver)
            .field("app_password", &"<redacted>")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub origin: String,
    pub destination: String,
}

impl Default for Route {
    fn default() -> Self {
        Self {
            origin: "AUS".to_string(),
            destination: "SFO".to_string(),
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.origin, self.destination)
    }
}

// Scan window and pacing for the poll loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSettings {
    pub search_within_days: u32,
    pub trip_duration_days: u32,
    pub max_offers: u32,
    pub check_interval: Duration,
    pub request_delay: Duration,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            search_within_days: 14,
            trip_duration_days: 14,
            max_offers: 5,
            check_interval: Duration::from_secs(3600),
            request_delay: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub credentials: ApiCredentials,
    pub email: EmailSettings,
    pub route: Route,
    pub search: SearchSettings,
    pub api_base_url: String,
}

pub const DEFAULT_API_BASE_URL: &str = "https://test.api.amadeus.com";
pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 465;

// Upper bounds on the scan shape. Amadeus only sells about 330 days out.
pub const MAX_SEARCH_WITHIN_DAYS: u32 = 330;
pub const MAX_TRIP_DURATION_DAYS: u32 = 365;
pub const MAX_OFFERS_LIMIT: u32 = 250;

impl WatchConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = load_key_values(path)?;
        Self::from_raw(&raw)
    }

    pub fn from_raw(raw: &RawConfig) -> Result<Self, ConfigError> {
        // Report the first missing key in declaration order
        for key in REQUIRED_KEYS {
            required(raw, key)?;
        }

        let credentials = ApiCredentials {
            api_key: required(raw, API_KEY)?,
            api_secret: required(raw, API_SECRET)?,
        };

        let email = EmailSettings {
            sender: mailbox(raw, SENDER_EMAIL)?,
            receiver: mailbox(raw, RECEIVER_EMAIL)?,
            app_password: required(raw, EMAIL_APP_PASSWORD)?,
            smtp_host: optional(raw, "SMTP_HOST").unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
            smtp_port: number(raw, "SMTP_PORT", DEFAULT_SMTP_PORT)?,
        };

        let defaults = Route::default();
        let route = Route {
            origin: airport(raw, "ORIGIN_CITY_CODE", &defaults.origin)?,
            destination: airport(raw, "DESTINATION_CITY_CODE", &defaults.destination)?,
        };
        if route.origin == route.destination {
            return Err(ConfigError::InvalidValue {
                key: "DESTINATION_CITY_CODE".to_string(),
                reason: "must differ from ORIGIN_CITY_CODE".to_string(),
            });
        }

        let defaults = SearchSettings::default();
        let search = SearchSettings {
            search_within_days: bounded(
                raw,
                "SEARCH_WITHIN_DAYS",
                defaults.search_within_days,
                MAX_SEARCH_WITHIN_DAYS,
            )?,
            trip_duration_days: bounded(
                raw,
                "TRIP_DURATION_DAYS",
                defaults.trip_duration_days,
                MAX_TRIP_DURATION_DAYS,
            )?,
            max_offers: bounded(raw, "MAX_OFFERS", defaults.max_offers, MAX_OFFERS_LIMIT)?,
            check_interval: Duration::from_secs(number(
                raw,
                "CHECK_INTERVAL_SECONDS",
                defaults.check_interval.as_secs(),
            )?),
            request_delay: Duration::from_millis(number(
                raw,
                "REQUEST_DELAY_MS",
                defaults.request_delay.as_millis() as u64,
            )?),
        };

        let api_base_url = optional(raw, "AMADEUS_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

        Ok(Self {
            credentials,
            email,
            route,
            search,
            api_base_url,
        })
    }
}

fn optional(raw: &RawConfig, key: &str) -> Option<String> {
    raw.get(key).filter(|value| !value.is_empty()).cloned()
}

fn required(raw: &RawConfig, key: &str) -> Result<String, ConfigError> {
    optional(raw, key).ok_or_else(|| ConfigError::MissingKey(key.to_string()))
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn mailbox(raw: &RawConfig, key: &str) -> Result<Mailbox, ConfigError> {
    required(raw, key)?
        .parse::<Mailbox>()
        .map_err(|e| invalid(key, e.to_string()))
}

fn number<T>(raw: &RawConfig, key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional(raw, key) {
        Some(value) => value.parse().map_err(|e: T::Err| invalid(key, e.to_string())),
        None => Ok(default),
    }
}

fn bounded(raw: &RawConfig, key: &str, default: u32, max: u32) -> Result<u32, ConfigError> {
    let value = number(raw, key, default)?;
    if !(1..=max).contains(&value) {
        return Err(invalid(key, format!("must be between 1 and {}", max)));
    }
    Ok(value)
}

fn airport(raw: &RawConfig, key: &str, default: &str) -> Result<String, ConfigError> {
    let code = optional(raw, key).unwrap_or_else(|| default.to_string());
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(invalid(key, format!("'{}' is not a three-letter IATA code", code)));
    }
    Ok(code.to_ascii_uppercase())
}
