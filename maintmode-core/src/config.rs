//! Configuration for maintmode
//!
//! Settings come from three layers, applied in order:
//! - an optional TOML file
//! - environment variable overrides (`PROXMOX_*`, `MAINTMODE_*`)
//! - command line overrides applied by the binary
//!
//! and are validated once all layers are in place.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::error::{MaintError, MaintResult};
use crate::mutator::PollConfig;

pub const ENV_HOST: &str = "PROXMOX_HOST";
pub const ENV_PORT: &str = "PROXMOX_PORT";
pub const ENV_USERNAME: &str = "PROXMOX_USERNAME";
pub const ENV_PASSWORD: &str = "PROXMOX_PASSWORD";
pub const ENV_VERIFY_TLS: &str = "PROXMOX_VERIFY_TLS";
pub const ENV_ANY_GROUP: &str = "MAINTMODE_ANY_GROUP";
pub const ENV_PRIMARY_TEMPLATE: &str = "MAINTMODE_PRIMARY_TEMPLATE";
pub const ENV_EXCLUSIVE_TEMPLATE: &str = "MAINTMODE_EXCLUSIVE_TEMPLATE";
pub const ENV_POLL_INTERVAL_MS: &str = "MAINTMODE_POLL_INTERVAL_MS";
pub const ENV_MAX_POLL_ATTEMPTS: &str = "MAINTMODE_MAX_POLL_ATTEMPTS";
pub const ENV_LOG_LEVEL: &str = "MAINTMODE_LOG_LEVEL";

/// Placeholder substituted with the node name in group templates
pub const NAME_PLACEHOLDER: &str = "{name}";

/// Complete configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Management API connection
    pub api: ApiConfig,

    /// Names of the managed HA groups
    pub groups: GroupNaming,

    /// Group update behaviour
    pub update: UpdateConfig,

    /// Log output
    pub logging: LoggingConfig,
}

/// Management API connection settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Verify the API's TLS certificate (clusters usually run self-signed)
    pub verify_tls: bool,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8006,
            username: String::new(),
            password: String::new(),
            verify_tls: false,
            timeout: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("verify_tls", &self.verify_tls)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ApiConfig {
    /// Base URL of the JSON API, `https://<host>:<port>/api2/json/`
    pub fn base_url(&self) -> MaintResult<Url> {
        Url::parse(&format!("https://{}:{}/api2/json/", self.host, self.port))
            .map_err(|e| MaintError::configuration("api.host", format!("invalid host '{}': {}", self.host, e)))
    }
}

/// Naming of the three managed group kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupNaming {
    /// Fixed name of the group containing every node
    pub any_name: String,
    /// Template for a node's primary group
    pub primary_template: String,
    /// Template for a node's exclusive group
    pub exclusive_template: String,
}

impl Default for GroupNaming {
    fn default() -> Self {
        Self {
            any_name: "test_any_node".to_string(),
            primary_template: "test_{name}_primary".to_string(),
            exclusive_template: "test_{name}_only".to_string(),
        }
    }
}

impl GroupNaming {
    pub fn primary_name(&self, node: &str) -> String {
        self.primary_template.replace(NAME_PLACEHOLDER, node)
    }

    pub fn exclusive_name(&self, node: &str) -> String {
        self.exclusive_template.replace(NAME_PLACEHOLDER, node)
    }
}

/// Group update behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Delay between checks while waiting for a group to drain
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Checks before giving up on a group that does not drain
    pub max_poll_attempts: u32,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_poll_attempts: 300,
        }
    }
}

impl UpdateConfig {
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: self.poll_interval,
            max_attempts: self.max_poll_attempts,
        }
    }
}

/// Log output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> MaintResult<Self> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| {
            MaintError::configuration(
                "file",
                format!("failed to read {}: {}", path.as_ref().display(), e),
            )
        })?;

        let mut settings: Settings = toml::from_str(&contents)
            .map_err(|e| MaintError::configuration("file", format!("failed to parse TOML: {}", e)))?;

        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut settings = Settings::default();
        settings.apply_env_overrides();
        settings
    }

    /// Load from `path` when given, otherwise from the environment alone
    pub fn load(path: Option<&Path>) -> MaintResult<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::from_env()),
        }
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST) {
            self.api.host = host;
        }
        if let Some(port) = lookup(ENV_PORT).and_then(|v| v.parse().ok()) {
            self.api.port = port;
        }
        if let Some(username) = lookup(ENV_USERNAME) {
            self.api.username = username;
        }
        if let Some(password) = lookup(ENV_PASSWORD) {
            self.api.password = password;
        }
        if let Some(verify) = lookup(ENV_VERIFY_TLS).and_then(|v| parse_bool(&v)) {
            self.api.verify_tls = verify;
        }

        if let Some(name) = lookup(ENV_ANY_GROUP) {
            self.groups.any_name = name;
        }
        if let Some(template) = lookup(ENV_PRIMARY_TEMPLATE) {
            self.groups.primary_template = template;
        }
        if let Some(template) = lookup(ENV_EXCLUSIVE_TEMPLATE) {
            self.groups.exclusive_template = template;
        }

        if let Some(ms) = lookup(ENV_POLL_INTERVAL_MS).and_then(|v| v.parse::<u64>().ok()) {
            self.update.poll_interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = lookup(ENV_MAX_POLL_ATTEMPTS).and_then(|v| v.parse().ok()) {
            self.update.max_poll_attempts = attempts;
        }

        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level.to_lowercase();
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> MaintResult<()> {
        if self.api.host.is_empty() {
            return Err(MaintError::configuration(
                "api.host",
                format!("management API host is required (set {})", ENV_HOST),
            ));
        }
        if self.api.username.is_empty() {
            return Err(MaintError::configuration(
                "api.username",
                format!("username is required (set {})", ENV_USERNAME),
            ));
        }
        if self.api.password.is_empty() {
            return Err(MaintError::configuration(
                "api.password",
                format!("password is required (set {})", ENV_PASSWORD),
            ));
        }
        self.api.base_url()?;

        if self.groups.any_name.is_empty() {
            return Err(MaintError::configuration("groups.any_name", "cannot be empty"));
        }
        for (field, template) in [
            ("groups.primary_template", &self.groups.primary_template),
            ("groups.exclusive_template", &self.groups.exclusive_template),
        ] {
            if !template.contains(NAME_PLACEHOLDER) {
                return Err(MaintError::configuration(
                    field,
                    format!("template '{}' must contain {}", template, NAME_PLACEHOLDER),
                ));
            }
        }
        if self.groups.primary_template == self.groups.exclusive_template {
            return Err(MaintError::configuration(
                "groups",
                "primary and exclusive templates must differ",
            ));
        }

        if self.update.max_poll_attempts == 0 {
            return Err(MaintError::configuration(
                "update.max_poll_attempts",
                "must be at least 1",
            ));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(MaintError::configuration(
                    "logging.level",
                    format!("invalid log level: {}", other),
                ))
            }
        }

        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
