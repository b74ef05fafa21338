use crate::client::{self, ClientSettings, RetryPolicy, DEFAULT_PER_PAGE};
use crate::error::ConfigError;
use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Parameters of one collection run, shared by the CLI and the HTTP service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub gitlab_url: String,
    pub admin_token: String,
    pub days: u32,
    /// `0` picks a worker count from the machine's parallelism.
    pub threads: usize,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl RunRequest {
    pub fn new(gitlab_url: impl Into<String>, admin_token: impl Into<String>) -> Self {
        Self {
            gitlab_url: gitlab_url.into(),
            admin_token: admin_token.into(),
            days: 1,
            threads: 0,
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Rejects anything that would fail before the first network call.
    pub fn validate(&self) -> Result<(), ConfigError> {
        client::api_base(&self.gitlab_url)?;
        if self.admin_token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        if self.days == 0 {
            return Err(ConfigError::InvalidWindow(
                "days must be at least 1".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "max_retries".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidSetting {
                name: "timeout".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            timeout: self.timeout,
            retry: RetryPolicy {
                max_attempts: self.max_retries,
                ..RetryPolicy::default()
            },
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

/// Bind address and upstream defaults for `serve`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub gitlab_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            gitlab_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = value("API_HOST").unwrap_or(defaults.host);

        let port = match value("API_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .context("API_PORT must be a valid port number")?,
            None => defaults.port,
        };

        let gitlab_timeout = match value("GITLAB_HTTP_TIMEOUT") {
            Some(raw) => humantime::parse_duration(raw.trim())
                .context("GITLAB_HTTP_TIMEOUT must be a duration such as 30s or 2m")?,
            None => defaults.gitlab_timeout,
        };

        Ok(ServiceConfig {
            host,
            port,
            gitlab_timeout,
        })
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }
}
