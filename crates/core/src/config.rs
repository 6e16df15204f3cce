use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const HISTORY_FILE_NAME: &str = "history";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    #[default]
    Postgres,
    Mysql,
    Sqlite,
}

impl DriverKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
            Self::Sqlite => "sqlite",
        }
    }

    #[must_use]
    pub fn default_port(self) -> Option<u16> {
        match self {
            Self::Postgres => Some(5432),
            Self::Mysql => Some(3306),
            Self::Sqlite => None,
        }
    }

    #[must_use]
    pub fn dialect_name(self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::Mysql => "MySQL",
            Self::Sqlite => "SQLite",
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::Mysql),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            other => Err(ConfigError::UnknownDriver(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Openai,
    Claude,
    Gemini,
    Ollama,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Openai => "openai",
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
        }
    }

    /// Environment variable consulted for the API key when none is configured.
    #[must_use]
    pub fn default_api_key_env(self) -> Option<&'static str> {
        match self {
            Self::Openai => Some("OPENAI_API_KEY"),
            Self::Claude => Some("ANTHROPIC_API_KEY"),
            Self::Gemini => Some("GEMINI_API_KEY"),
            Self::Ollama => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::Openai),
            "claude" | "anthropic" => Ok(Self::Claude),
            "gemini" | "google" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

/// PostgreSQL transport security, named as libpq names it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    #[default]
    Disable,
    Allow,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disable => "disable",
            Self::Allow => "allow",
            Self::Prefer => "prefer",
            Self::Require => "require",
            Self::VerifyCa => "verify-ca",
            Self::VerifyFull => "verify-full",
        }
    }

    /// Whether the server certificate must chain to a trusted root.
    #[must_use]
    pub fn verifies_certificate(self) -> bool {
        matches!(self, Self::VerifyCa | Self::VerifyFull)
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SslMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disable" => Ok(Self::Disable),
            "allow" => Ok(Self::Allow),
            "prefer" => Ok(Self::Prefer),
            "require" => Ok(Self::Require),
            "verify-ca" => Ok(Self::VerifyCa),
            "verify-full" => Ok(Self::VerifyFull),
            other => Err(ConfigError::UnknownSslMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub driver: DriverKind,
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub file: Option<PathBuf>,
    pub sslmode: SslMode,
}

impl DatabaseConfig {
    #[must_use]
    pub fn new(driver: DriverKind) -> Self {
        Self {
            driver,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn url(&self) -> Option<&str> {
        non_empty(self.url.as_deref())
    }

    #[must_use]
    pub fn host_or_default(&self) -> &str {
        non_empty(self.host.as_deref()).unwrap_or("127.0.0.1")
    }

    #[must_use]
    pub fn port_or_default(&self) -> Option<u16> {
        self.port.or_else(|| self.driver.default_port())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.driver {
            DriverKind::Sqlite => {
                if self.file.is_none() && self.url().is_none() {
                    return Err(ConfigError::Invalid(
                        "sqlite requires a database file or url".to_string(),
                    ));
                }
            }
            DriverKind::Postgres | DriverKind::Mysql => {
                if self.url().is_none() && non_empty(self.user.as_deref()).is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "{} requires a connection url or a user name",
                        self.driver
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AiConfig {
    pub provider: ProviderKind,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl AiConfig {
    #[must_use]
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn model(&self) -> Option<&str> {
        non_empty(self.model.as_deref())
    }

    #[must_use]
    pub fn base_url(&self) -> Option<&str> {
        non_empty(self.base_url.as_deref())
    }

    /// Explicit key first, then the configured or provider default env var.
    #[must_use]
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = non_empty(self.api_key.as_deref()) {
            return Some(key.to_string());
        }

        let var_name = non_empty(self.api_key_env.as_deref())
            .or_else(|| self.provider.default_api_key_env())?;
        env::var(var_name)
            .ok()
            .filter(|value| !value.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_secs: u64,
    pub query_secs: u64,
    pub schema_secs: u64,
    pub ai_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            query_secs: 30,
            schema_secs: 30,
            ai_secs: 60,
        }
    }
}

impl TimeoutConfig {
    #[must_use]
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    #[must_use]
    pub fn query(&self) -> Duration {
        Duration::from_secs(self.query_secs)
    }

    #[must_use]
    pub fn schema(&self) -> Duration {
        Duration::from_secs(self.schema_secs)
    }

    #[must_use]
    pub fn ai(&self) -> Duration {
        Duration::from_secs(self.ai_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let named = [
            ("connect_secs", self.connect_secs),
            ("query_secs", self.query_secs),
            ("schema_secs", self.schema_secs),
            ("ai_secs", self.ai_secs),
        ];
        for (name, value) in named {
            if value == 0 {
                return Err(ConfigError::Invalid(format!(
                    "timeout `{name}` must be greater than 0"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UiConfig {
    pub max_column_width: usize,
    pub max_query_history: usize,
    pub history_file: Option<PathBuf>,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            max_column_width: 50,
            max_query_history: 5,
            history_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub ai: AiConfig,
    pub timeouts: TimeoutConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("unknown database driver `{0}`")]
    UnknownDriver(String),
    #[error("unknown AI provider `{0}`")]
    UnknownProvider(String),
    #[error("unknown sslmode `{0}`")]
    UnknownSslMode(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl AppConfig {
    /// A missing or blank file yields the defaults.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.timeouts.validate()?;
        if self.ui.max_column_width < 4 {
            return Err(ConfigError::Invalid(
                "ui.max_column_width must be at least 4".to_string(),
            ));
        }
        if self.ui.max_query_history == 0 {
            return Err(ConfigError::Invalid(
                "ui.max_query_history must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn history_path(&self, config_dir: &Path) -> PathBuf {
        self.ui
            .history_file
            .clone()
            .unwrap_or_else(|| config_dir.join(HISTORY_FILE_NAME))
    }
}

pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    if let Some(custom) = env::var_os("ASKQL_CONFIG_DIR") {
        return Ok(PathBuf::from(custom));
    }

    let base_dir = if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(ConfigError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(ConfigError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join("askql"))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
