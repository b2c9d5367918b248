//! Provider configuration.
//!
//! The host passes the provider block as JSON; unset values fall back to
//! environment variables and then to built-in defaults. Once built, a
//! [`Config`] is handed explicitly to every resource operation.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::api::ServiceClient;
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema, TIMEOUTS_BLOCK};
use crate::waiter::DEFAULT_MIN_POLL_INTERVAL;

/// Default endpoint of the dedicated servers API.
pub const DEFAULT_SERVERS_ENDPOINT: &str = "https://api.selectel.ru/servers/v2";

/// Default endpoint of the scheduled backup API.
pub const DEFAULT_BACKUP_ENDPOINT: &str = "https://ru-3.cloud.api.selcloud.ru/data-protect/v2";

/// Environment variable holding the API token.
/// Upper bound of a single API request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest duration [`parse_duration`] accepts, about 292 years.
pub const MAX_DURATION: Duration = Duration::from_nanos(i64::MAX as u64);

pub const ENV_TOKEN: &str = "SEL_TOKEN";
/// Environment variable holding the default project.
pub const ENV_PROJECT_ID: &str = "SEL_PROJECT_ID";
/// Environment variable overriding the servers endpoint.
pub const ENV_SERVERS_ENDPOINT: &str = "SEL_SERVERS_ENDPOINT";
/// Environment variable overriding the backup endpoint.
pub const ENV_BACKUP_ENDPOINT: &str = "SEL_BACKUP_ENDPOINT";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    auth_token: Option<String>,
    project_id: Option<String>,
    servers_endpoint: Option<String>,
    backup_endpoint: Option<String>,
    poll_interval: Option<String>,
}

/// Configuration shared by all operations of a configured provider.
#[derive(Debug, Clone)]
pub struct Config {
    /// API token sent as `X-Auth-Token`.
    pub auth_token: String,
    /// Project used when importing resources.
    pub project_id: Option<String>,
    /// Base URL of the dedicated servers API.
    pub servers_endpoint: String,
    /// Base URL of the scheduled backup API.
    pub backup_endpoint: String,
    /// Interval between two status polls.
    pub poll_interval: Duration,
    http: reqwest::Client,
}

impl Config {
    /// Build a configuration from the provider block, reading the process
    /// environment for unset values.
    pub fn from_value(value: &Value) -> Result<Self, ProviderError> {
        Self::from_value_with_env(value, |key| std::env::var(key).ok())
    }

    /// Build a configuration with an explicit environment lookup.
    pub fn from_value_with_env<F>(value: &Value, env: F) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = if value.is_null() {
            RawConfig::default()
        } else {
            serde_json::from_value(value.clone())?
        };

        let pick = |set: Option<String>, key: &str| {
            set.filter(|s| !s.is_empty())
                .or_else(|| env(key).filter(|s| !s.is_empty()))
        };

        let auth_token = pick(raw.auth_token, ENV_TOKEN).ok_or_else(|| {
            ProviderError::Configuration(format!(
                "auth_token must be set in the provider block or via {}",
                ENV_TOKEN
            ))
        })?;

        let poll_interval = match raw.poll_interval.as_deref() {
            Some(s) if !s.is_empty() => parse_duration(s)?,
            _ => DEFAULT_MIN_POLL_INTERVAL,
        };

        let http = reqwest::Client::builder()
            .user_agent(concat!("selectel-provider/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            auth_token,
            project_id: pick(raw.project_id, ENV_PROJECT_ID),
            servers_endpoint: pick(raw.servers_endpoint, ENV_SERVERS_ENDPOINT)
                .unwrap_or_else(|| DEFAULT_SERVERS_ENDPOINT.to_string()),
            backup_endpoint: pick(raw.backup_endpoint, ENV_BACKUP_ENDPOINT)
                .unwrap_or_else(|| DEFAULT_BACKUP_ENDPOINT.to_string()),
            poll_interval,
            http,
        })
    }

    /// Client for the dedicated servers API.
    pub fn servers_client(&self) -> ServiceClient {
        ServiceClient::new(self.http.clone(), &self.servers_endpoint, &self.auth_token)
    }

    /// Client for the scheduled backup API.
    pub fn backup_client(&self) -> ServiceClient {
        ServiceClient::new(self.http.clone(), &self.backup_endpoint, &self.auth_token)
    }

    /// Schema of the provider block.
    pub fn schema() -> Schema {
        Schema::v0()
            .with_description("Selectel dedicated servers and scheduled backups")
            .with_attribute(
                "auth_token",
                Attribute::optional_string()
                    .sensitive()
                    .with_description("API token; falls back to SEL_TOKEN"),
            )
            .with_attribute(
                "project_id",
                Attribute::optional_string()
                    .with_description("Project used for imports; falls back to SEL_PROJECT_ID"),
            )
            .with_attribute("servers_endpoint", Attribute::optional_string())
            .with_attribute("backup_endpoint", Attribute::optional_string())
            .with_attribute(
                "poll_interval",
                Attribute::optional_string()
                    .with_description("Interval between status polls, at least 10s"),
            )
    }
}

/// Per-operation deadlines of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Deadline of create.
    pub create: Duration,
    /// Deadline of update.
    pub update: Duration,
    /// Deadline of delete.
    pub delete: Duration,
}

impl Timeouts {
    /// The host's default deadline for every operation.
    pub const DEFAULT: Duration = Duration::from_secs(20 * 60);

    /// Same deadline for all operations.
    pub const fn uniform(timeout: Duration) -> Self {
        Self {
            create: timeout,
            update: timeout,
            delete: timeout,
        }
    }

    /// Override the defaults with the state's `timeouts` block, if any.
    pub fn from_state(state: &Value, defaults: Timeouts) -> Result<Self, ProviderError> {
        let block = match state.get(TIMEOUTS_BLOCK) {
            Some(Value::Array(items)) => items.first(),
            Some(v @ Value::Object(_)) => Some(v),
            _ => None,
        };
        let Some(block) = block else {
            return Ok(defaults);
        };

        let read = |key: &str, fallback: Duration| -> Result<Duration, ProviderError> {
            match block.get(key).and_then(Value::as_str) {
                Some(s) if !s.is_empty() => parse_duration(s),
                _ => Ok(fallback),
            }
        };

        Ok(Self {
            create: read("create", defaults.create)?,
            update: read("update", defaults.update)?,
            delete: read("delete", defaults.delete)?,
        })
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::uniform(Self::DEFAULT)
    }
}

/// Parse a duration such as `"45s"`, `"10m"`, `"1h30m"` or `"500ms"`.
pub fn parse_duration(input: &str) -> Result<Duration, ProviderError> {
    let invalid = || ProviderError::Validation(format!("invalid duration \"{}\"", input));

    let s = input.trim();
    if s.is_empty() {
        return Err(invalid());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let amount: f64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let seconds = match &rest[..unit_len] {
            "ms" => amount / 1000.0,
            "s" => amount,
            "m" => amount * 60.0,
            "h" => amount * 3600.0,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];
        let part = Duration::try_from_secs_f64(seconds).map_err(|_| invalid())?;
        total = total.checked_add(part).ok_or_else(invalid)?;
    }

    if total > MAX_DURATION {
        return Err(invalid());
    }
    Ok(total)
}
