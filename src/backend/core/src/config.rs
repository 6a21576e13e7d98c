//! Configuration management.

use serde::Deserialize;
use std::time::Duration;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Outbound auth configuration
    #[serde(default)]
    pub security: SecurityConfig,

    /// Failure notification transport
    #[serde(default)]
    pub mailer: MailerConfig,

    /// Durable store configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub oauth2: Oauth2Config,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Oauth2Config {
    /// Token issuer; empty disables outbound authentication
    #[serde(default)]
    pub issuer: String,

    /// Required JWT `aud` claim
    #[serde(default = "default_audience")]
    pub audience: String,

    /// OAuth client credentials
    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    /// Password-grant identity
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Token endpoint
    #[serde(default)]
    pub token_url: String,
}

impl Default for Oauth2Config {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            audience: default_audience(),
            client_id: String::new(),
            client_secret: String::new(),
            username: String::new(),
            password: String::new(),
            token_url: String::new(),
        }
    }
}

impl Oauth2Config {
    /// Token acquisition needs an issuer, a client id and a token endpoint.
    pub fn is_configured(&self) -> bool {
        !self.issuer.is_empty() && !self.client_id.is_empty() && !self.token_url.is_empty()
    }

    /// The password grant additionally needs a username and password.
    pub fn has_password_identity(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailerConfig {
    /// SMTP host; empty disables mail delivery
    #[serde(default)]
    pub host: String,

    /// SMTP port; zero disables mail delivery
    #[serde(default)]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Sender address for failure notices
    #[serde(default)]
    pub from_address: String,

    /// When false, STARTTLS is mandatory
    #[serde(default = "default_skip_verify")]
    pub skip_verify: bool,
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 0,
            username: String::new(),
            password: String::new(),
            from_address: String::new(),
            skip_verify: default_skip_verify(),
        }
    }
}

impl MailerConfig {
    pub fn is_configured(&self) -> bool {
        !self.host.is_empty() && self.port != 0 && !self.from_address.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the embedded store
    #[serde(default = "default_storage_path")]
    pub path: String,

    /// Run records older than this are pruned by `clear_expired_runs`;
    /// unset keeps runs forever
    #[serde(default, with = "humantime_serde")]
    pub run_retention: Option<Duration>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            run_retention: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
        }
    }
}

// Default value functions
fn default_audience() -> String { "api://default".to_string() }
fn default_skip_verify() -> bool { false }
fn default_storage_path() -> String { "./tempus-data".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("TEMPUS").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("TEMPUS").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}
