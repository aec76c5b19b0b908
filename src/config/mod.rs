//! Configuration Module
//!
//! Configuration is read once at startup, layered as:
//! - Built-in defaults
//! - Optional TOML file (with `${VAR}` / `${VAR:-default}` substitution)
//! - `IOTC_BRIDGE__` environment overrides (double underscore for nesting)
//! - The IoT Edge runtime and IoT Central variables (`IOTEDGE_DEVICEID`,
//!   `IOTEDGE_MODULEID`, `IOTEDGE_GATEWAYHOSTNAME`, `IOTEDGE_IOTHUBHOSTNAME`,
//!   `ID_SCOPE`, `IOTC_KEY`)

use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

pub use edge::{EdgeConfig, DEFAULT_API_VERSION, DEFAULT_MAX_PACKET_SIZE};
pub use invoker::InvokerConfig;
pub use metrics::MetricsConfig;

mod edge;
mod invoker;
mod metrics;


/// Prefix for environment overrides (`IOTC_BRIDGE__ROUTER__INPUT_CHANNEL=...`)
pub const ENV_PREFIX: &str = "IOTC_BRIDGE";

/// Well-known variables set by the IoT Edge runtime or the deployment manifest,
/// mapped to their configuration keys
pub const MODULE_ENV: &[(&str, &str)] = &[
    ("IOTEDGE_DEVICEID", "edge.device_id"),
    ("IOTEDGE_MODULEID", "edge.module_id"),
    ("IOTEDGE_GATEWAYHOSTNAME", "edge.host"),
    ("IOTEDGE_IOTHUBHOSTNAME", "edge.hub_hostname"),
    ("EdgeModuleCACertificateFile", "edge.ca_file"),
    ("EDGE_SAS_TOKEN", "edge.sas_token"),
    ("ID_SCOPE", "iotc.id_scope"),
    ("IOTC_KEY", "iotc.key_locator"),
];

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").expect("static regex");
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Edge hub connection
    pub edge: EdgeConfig,
    /// IoT Central identity
    pub iotc: IotcConfig,
    /// Message routing
    pub router: RouterConfig,
    /// Bridge invoker selection
    pub invoker: InvokerConfig,
    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// IoT Central identity configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct IotcConfig {
    /// Device provisioning identity scope (ID_SCOPE)
    pub id_scope: String,
    /// Locator for the IoT Central primary key (IOTC_KEY).
    /// On the edge this is the key itself
    pub key_locator: String,
}

/// Message routing configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Input channel whose messages are forwarded to the bridge
    #[serde(default = "default_input_channel")]
    pub input_channel: String,
    /// Maximum concurrent routing calls (0 = unbounded)
    pub max_in_flight: usize,
    /// How long shutdown waits for in-flight routing calls
    #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

fn default_input_channel() -> String {
    "iotc".to_string()
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            input_channel: default_input_channel(),
            max_in_flight: 0,
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// A missing file is not an error; defaults and the environment are used.
    /// Overrides use the `IOTC_BRIDGE__` prefix with double underscores for nesting:
    /// - `IOTC_BRIDGE__ROUTER__INPUT_CHANNEL=telemetry` overrides `router.input_channel`
    /// - `IOTC_BRIDGE__INVOKER__KIND=http` overrides `invoker.kind`
    ///
    /// The IoT Edge runtime variables listed in [`MODULE_ENV`] take precedence.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with(path, |name| std::env::var(name).ok())
    }

    /// Like [`Config::load`], reading the module variables through `lookup`
    pub fn load_with<P, F>(path: P, lookup: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = config::Config::builder()
            // Start with defaults
            .set_default("log.level", "info")?
            .set_default("edge.host", "localhost")?
            .set_default("edge.port", 8883)?
            .set_default("edge.tls", true)?
            .set_default("edge.api_version", DEFAULT_API_VERSION)?
            .set_default("edge.keepalive", 60)?
            .set_default("edge.connect_timeout", "30s")?
            .set_default("router.input_channel", "iotc")?
            .set_default("router.max_in_flight", 0)?
            .set_default("router.shutdown_grace", "5s")?
            .set_default("metrics.enabled", false)?;

        // Load from file with env var substitution
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        for (var, key) in MODULE_ENV {
            let value = lookup(var).filter(|v| !v.trim().is_empty());
            builder = builder.set_override_option(*key, value)?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the environment only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.iotc.id_scope.trim().is_empty() {
            return Err(ConfigError::Validation(
                "iotc.id_scope is required (set ID_SCOPE)".to_string(),
            ));
        }
        if self.iotc.key_locator.trim().is_empty() {
            return Err(ConfigError::Validation(
                "iotc.key_locator is required (set IOTC_KEY)".to_string(),
            ));
        }

        // The MQTT client id is built from these and must not be blank
        if self.edge.device_id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "edge.device_id is required (set IOTEDGE_DEVICEID)".to_string(),
            ));
        }
        if self.edge.module_id.trim().is_empty() {
            return Err(ConfigError::Validation(
                "edge.module_id is required (set IOTEDGE_MODULEID)".to_string(),
            ));
        }
        for (name, id) in [
            ("edge.device_id", &self.edge.device_id),
            ("edge.module_id", &self.edge.module_id),
        ] {
            if id.trim() != id.as_str() {
                return Err(ConfigError::Validation(format!(
                    "{} must not have leading or trailing whitespace",
                    name
                )));
            }
        }
        if self.edge.host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "edge.host must not be empty".to_string(),
            ));
        }
        if self.edge.max_packet_size == 0 {
            return Err(ConfigError::Validation(
                "edge.max_packet_size must be at least 1".to_string(),
            ));
        }
        if self.edge.event_capacity == 0 {
            return Err(ConfigError::Validation(
                "edge.event_capacity must be at least 1".to_string(),
            ));
        }

        if self.router.input_channel.is_empty() {
            return Err(ConfigError::Validation(
                "router.input_channel must not be empty".to_string(),
            ));
        }

        if let InvokerConfig::Http { endpoint, .. } = &self.invoker {
            if endpoint.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "invoker.endpoint is required when invoker.kind = \"http\"".to_string(),
                ));
            }
        }

        Ok(())
    }
}
