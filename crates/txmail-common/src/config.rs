//! Configuration for txmail

use crate::types::{Headers, Subscriber, TemplateId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "TXMAIL_CONFIG";

/// Prefix for environment overrides, e.g. `TXMAIL__APP__FROM_EMAIL`
pub const ENV_PREFIX: &str = "TXMAIL";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Application defaults
    #[serde(default)]
    pub app: AppConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Internal send queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Outbound SMTP servers
    #[serde(default)]
    pub smtp: Vec<SmtpServerConfig>,

    /// Templates loaded into the in-memory template store
    #[serde(default)]
    pub templates: Vec<TemplateSeed>,

    /// Subscribers loaded into the in-memory subscriber store
    #[serde(default)]
    pub subscribers: Vec<Subscriber>,
}

/// Application defaults applied to incoming requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Sender used when a request carries no `from_email`
    #[serde(default = "default_from_email")]
    pub from_email: String,

    /// Messenger used when a request names none
    #[serde(default = "default_messenger")]
    pub default_messenger: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            from_email: default_from_email(),
            default_messenger: default_messenger(),
        }
    }
}

fn default_from_email() -> String {
    "txmail <noreply@localhost>".to_string()
}

fn default_messenger() -> String {
    "email".to_string()
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Bind address for the HTTP API
    #[serde(default = "default_api_bind")]
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_api_bind(),
        }
    }
}

fn default_api_bind() -> String {
    "0.0.0.0:9000".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Bounded queue used by asynchronous dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of messages waiting for a worker
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,

    /// Maximum concurrent pushes performed by the worker
    #[serde(default = "default_queue_concurrency")]
    pub concurrency: usize,

    /// How long an enqueue may wait for free capacity, in milliseconds
    #[serde(default = "default_queue_wait_timeout")]
    pub wait_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            concurrency: default_queue_concurrency(),
            wait_timeout_ms: default_queue_wait_timeout(),
        }
    }
}

impl QueueConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_queue_concurrency() -> usize {
    10
}

fn default_queue_wait_timeout() -> u64 {
    5000
}

/// SMTP authentication mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthProtocol {
    None,
    Plain,
    Login,
    CramMd5,
}

impl FromStr for AuthProtocol {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(AuthProtocol::None),
            "plain" => Ok(AuthProtocol::Plain),
            "login" => Ok(AuthProtocol::Login),
            "cram" | "cram-md5" => Ok(AuthProtocol::CramMd5),
            other => Err(crate::Error::Config(format!(
                "unknown SMTP auth type '{}'",
                other
            ))),
        }
    }
}

/// Transport security for an SMTP connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlsType {
    /// Plaintext for the whole session
    None,
    /// Plaintext connect, upgraded with STARTTLS
    StartTls,
    /// TLS from the first byte
    Tls,
}

impl FromStr for TlsType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(TlsType::None),
            "starttls" => Ok(TlsType::StartTls),
            "tls" | "ssl" => Ok(TlsType::Tls),
            other => Err(crate::Error::Config(format!("unknown TLS type '{}'", other))),
        }
    }
}

/// One outbound SMTP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpServerConfig {
    /// Name used in logs; defaults to `host:port`
    #[serde(default)]
    pub name: Option<String>,

    /// Disabled servers are skipped at startup
    #[serde(default = "default_true")]
    pub enabled: bool,

    pub host: String,

    #[serde(default = "default_smtp_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// none | plain | login | cram-md5
    #[serde(default = "default_auth_protocol")]
    pub auth_protocol: String,

    /// none | starttls | tls
    #[serde(default = "default_tls_type")]
    pub tls_type: String,

    /// Skip certificate verification (trusted/test deployments only)
    #[serde(default)]
    pub tls_skip_verify: bool,

    /// Exact addresses or bare domains this server may send for; empty allows all
    #[serde(default)]
    pub allowed_from_addresses: Vec<String>,

    /// Headers added to every message sent through this server
    #[serde(default)]
    pub email_headers: Headers,

    /// Hostname announced in EHLO/HELO
    #[serde(default = "default_hello_hostname")]
    pub hello_hostname: String,

    /// Maximum simultaneous connections
    #[serde(default = "default_max_conns")]
    pub max_conns: usize,

    /// How long a send may wait for a free connection, in milliseconds
    #[serde(default = "default_pool_wait_timeout")]
    pub wait_timeout_ms: u64,

    /// How long an unused connection is kept open, in milliseconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,

    /// TCP connect timeout, in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Timeout for each SMTP reply, in milliseconds
    #[serde(default = "default_io_timeout")]
    pub io_timeout_ms: u64,
}

impl SmtpServerConfig {
    /// Server with default settings for `host:port`
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            name: None,
            enabled: true,
            host: host.into(),
            port,
            username: String::new(),
            password: String::new(),
            auth_protocol: default_auth_protocol(),
            tls_type: default_tls_type(),
            tls_skip_verify: false,
            allowed_from_addresses: Vec::new(),
            email_headers: Headers::new(),
            hello_hostname: default_hello_hostname(),
            max_conns: default_max_conns(),
            wait_timeout_ms: default_pool_wait_timeout(),
            idle_timeout_ms: default_idle_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            io_timeout_ms: default_io_timeout(),
        }
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.host, self.port))
    }

    pub fn auth(&self) -> crate::Result<AuthProtocol> {
        self.auth_protocol.parse()
    }

    pub fn tls(&self) -> crate::Result<TlsType> {
        self.tls_type.parse()
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_smtp_port() -> u16 {
    25
}

fn default_auth_protocol() -> String {
    "none".to_string()
}

fn default_tls_type() -> String {
    "starttls".to_string()
}

fn default_hello_hostname() -> String {
    "localhost".to_string()
}

fn default_max_conns() -> usize {
    10
}

fn default_pool_wait_timeout() -> u64 {
    5000
}

fn default_idle_timeout() -> u64 {
    15000
}

fn default_connect_timeout() -> u64 {
    10000
}

fn default_io_timeout() -> u64 {
    30000
}

/// Template entry seeded into the in-memory template store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSeed {
    pub id: TemplateId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub subject: String,
    /// Inline body source
    #[serde(default)]
    pub body: Option<String>,
    /// Body source read from a file; takes precedence over `body`
    #[serde(default)]
    pub body_path: Option<PathBuf>,
    #[serde(default)]
    pub alt_body: Option<String>,
}

impl TemplateSeed {
    /// Resolve the body source, reading `body_path` when set
    pub fn load_body(&self) -> crate::Result<String> {
        match &self.body_path {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                crate::Error::Config(format!(
                    "Failed to read template {} body from {}: {}",
                    self.id,
                    path.display(),
                    e
                ))
            }),
            None => Ok(self.body.clone().unwrap_or_default()),
        }
    }
}

impl Config {
    /// Parse configuration from a TOML document
    pub fn parse(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from file, then apply `TXMAIL_*` environment overrides
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        tracing::debug!(path = %path.display(), "Loading configuration");

        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        settings
            .try_deserialize()
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from `TXMAIL_CONFIG` or the default locations
    pub fn load() -> crate::Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Self::from_file(Path::new(&path));
        }

        let paths = [
            PathBuf::from("./config.toml"),
            PathBuf::from("/etc/txmail/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }

    /// Servers that should be started
    pub fn enabled_servers(&self) -> impl Iterator<Item = &SmtpServerConfig> {
        self.smtp.iter().filter(|s| s.enabled)
    }
}
