//! Provider-level configuration.
//!
//! The orchestrator sends the provider block as a JSON object. Recognized
//! keys are described by [`ProviderConfig::schema`]; anything the block leaves
//! out falls back to the environment and then to built-in defaults.

use std::time::Duration;

use serde_json::{Map, Value};

use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};
use crate::validation::ensure_valid;

/// Timeout applied to every operation unless configured otherwise.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Environment variable consulted when `request_timeout` is not configured.
pub const REQUEST_TIMEOUT_ENV: &str = "TFE_REQUEST_TIMEOUT";

/// Settings of a configured provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Upper bound on the duration of one resource operation.
    pub request_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ProviderConfig {
    /// Schema of the provider configuration block.
    pub fn schema() -> Schema {
        Schema::v0()
            .with_description("Terraform Enterprise provider")
            .with_attribute(
                "request_timeout",
                Attribute::optional_int64().with_description(format!(
                    "Seconds one operation may take. Defaults to ${} or {}",
                    REQUEST_TIMEOUT_ENV,
                    DEFAULT_REQUEST_TIMEOUT.as_secs()
                )),
            )
    }

    /// Replace the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Parse a configuration block, consulting the process environment.
    pub fn from_value(value: &Value) -> Result<Self, ProviderError> {
        Self::from_value_with_env(value, |name| std::env::var(name).ok())
    }

    /// Parse a configuration block, looking environment variables up with `env`.
    pub fn from_value_with_env<F>(value: &Value, env: F) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = match value {
            Value::Null => Value::Object(Map::new()),
            other => other.clone(),
        };
        ensure_valid(&Self::schema(), &value).map_err(|err| match err {
            ProviderError::Validation(msg) => ProviderError::Configuration(msg),
            other => other,
        })?;

        let configured = value
            .get("request_timeout")
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)));
        let seconds = match configured {
            Some(seconds) => Some(seconds),
            None => env(REQUEST_TIMEOUT_ENV)
                .map(|raw| {
                    raw.trim().parse::<i64>().map_err(|_| {
                        ProviderError::Configuration(format!(
                            "{} must be a whole number of seconds, got \"{}\"",
                            REQUEST_TIMEOUT_ENV, raw
                        ))
                    })
                })
                .transpose()?,
        };

        match seconds {
            None => Ok(Self::default()),
            Some(seconds) if seconds > 0 => {
                Ok(Self::default().with_request_timeout(Duration::from_secs(seconds as u64)))
            },
            Some(seconds) => Err(ProviderError::Configuration(format!(
                "request_timeout must be a positive number of seconds, got {}",
                seconds
            ))),
        }
    }
}
