//! Bot and session configuration
//!
//! Everything is passed explicitly at construction time; nothing is read
//! from globals after startup.

use crate::session::RequestMode;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_API_VERSION: &str = "20240101";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Hosted backend environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Production,
    Sandbox,
}

impl Environment {
    pub fn base_url(self) -> &'static str {
        match self {
            Environment::Production => "https://cdn.yextapis.com",
            Environment::Sandbox => "https://sbx-cdn.yextapis.com",
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Ok(Environment::Production),
            "sandbox" | "sbx" => Ok(Environment::Sandbox),
            _ => Err(ConfigError::InvalidValue {
                var: "PAGES_CHAT_ENV",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("PAGES_CHAT_BOT_ID is not set")]
    MissingBotId,
    #[error("PAGES_CHAT_API_KEY is not set")]
    MissingApiKey,
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
    #[error("Failed to create HTTP client: {0}")]
    HttpClient(String),
}

/// Full configuration for a chat client
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub api_key: Option<String>,
    pub bot_id: Option<String>,
    pub environment: Environment,
    /// Overrides the environment's base URL (e.g. a local proxy)
    pub endpoint: Option<String>,
    pub api_version: String,
    pub session: SessionConfig,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            bot_id: None,
            environment: Environment::default(),
            endpoint: None,
            api_version: DEFAULT_API_VERSION.to_string(),
            session: SessionConfig::default(),
        }
    }
}

/// Per-session policy
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fetch a greeting when the owning application bootstraps an empty session
    pub auto_greet: bool,
    /// Upper bound on a fetch, or on the gap between stream events
    pub response_timeout: Duration,
    /// Mode used for plain input and for the greeting
    pub default_mode: RequestMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_greet: true,
            response_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            default_mode: RequestMode::Fetch,
        }
    }
}

impl ChatConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = SessionConfig::default();

        let environment = match get("PAGES_CHAT_ENV") {
            Some(v) => v.parse()?,
            None => Environment::default(),
        };

        let response_timeout = match get("PAGES_CHAT_TIMEOUT_SECS") {
            Some(v) => match v.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: "PAGES_CHAT_TIMEOUT_SECS",
                        value: v,
                    })
                }
            },
            None => defaults.response_timeout,
        };

        let auto_greet = match get("PAGES_CHAT_AUTO_GREET") {
            Some(v) => parse_bool("PAGES_CHAT_AUTO_GREET", &v)?,
            None => defaults.auto_greet,
        };

        let stream = match get("PAGES_CHAT_STREAM") {
            Some(v) => parse_bool("PAGES_CHAT_STREAM", &v)?,
            None => false,
        };
        let default_mode = if stream {
            RequestMode::Stream
        } else {
            RequestMode::Fetch
        };

        Ok(Self {
            api_key: get("PAGES_CHAT_API_KEY"),
            bot_id: get("PAGES_CHAT_BOT_ID"),
            environment,
            endpoint: get("PAGES_CHAT_ENDPOINT"),
            api_version: get("PAGES_CHAT_API_VERSION")
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            session: SessionConfig {
                auto_greet,
                response_timeout,
                default_mode,
            },
        })
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> String {
        self.endpoint
            .as_deref()
            .unwrap_or(self.environment.base_url())
            .trim_end_matches('/')
            .to_string()
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: value.to_string(),
        }),
    }
}
