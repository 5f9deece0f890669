//! Configuration for graphfeed-connect
//!
//! Every setting is looked up in its environment variable first, then under
//! `section.key` in an optional YAML file. The file itself may reference
//! environment variables as `${VAR}` or `${VAR:-default}`.

use crate::error::{ConnectError, Result};
use crate::types::SensitiveString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;
use validator::Validate;

/// Pre-compiled regex for environment variable expansion
/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Kind of connector registered with the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectorType {
    ExternalImport,
    InternalEnrichment,
    InternalImportFile,
    InternalExportFile,
}

impl ConnectorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExternalImport => "EXTERNAL_IMPORT",
            Self::InternalEnrichment => "INTERNAL_ENRICHMENT",
            Self::InternalImportFile => "INTERNAL_IMPORT_FILE",
            Self::InternalExportFile => "INTERNAL_EXPORT_FILE",
        }
    }
}

impl fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectorType {
    type Err = ConnectError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "EXTERNAL_IMPORT" => Ok(Self::ExternalImport),
            "INTERNAL_ENRICHMENT" => Ok(Self::InternalEnrichment),
            "INTERNAL_IMPORT_FILE" => Ok(Self::InternalImportFile),
            "INTERNAL_EXPORT_FILE" => Ok(Self::InternalExportFile),
            other => Err(ConnectError::config(format!(
                "unknown connector type '{}'",
                other
            ))),
        }
    }
}

/// Parse a log level name. `warning` is accepted as an alias of `warn`.
pub fn parse_log_level(raw: &str) -> Result<tracing::Level> {
    match raw.to_ascii_lowercase().as_str() {
        "trace" => Ok(tracing::Level::TRACE),
        "debug" => Ok(tracing::Level::DEBUG),
        "info" => Ok(tracing::Level::INFO),
        "warn" | "warning" => Ok(tracing::Level::WARN),
        "error" => Ok(tracing::Level::ERROR),
        other => Err(ConnectError::config(format!(
            "invalid log level '{}'",
            other
        ))),
    }
}

/// Parsed YAML configuration file
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    sections: serde_yaml::Mapping,
}

impl ConfigFile {
    /// Load a YAML file, expanding environment variables first
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConnectError::config(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&expand_env_vars(&content, |name| std::env::var(name).ok()))
    }

    /// Parse YAML text as is
    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let value: serde_yaml::Value = serde_yaml::from_str(content)
            .map_err(|e| ConnectError::config(format!("failed to parse config: {}", e)))?;
        match value {
            serde_yaml::Value::Mapping(sections) => Ok(Self { sections }),
            serde_yaml::Value::Null => Ok(Self::default()),
            _ => Err(ConnectError::config("config root must be a mapping")),
        }
    }

    /// Scalar at `section.key`, rendered as a string
    pub fn lookup(&self, section: &str, key: &str) -> Option<String> {
        let value = self.sections.get(section)?.get(key)?;
        scalar_to_string(value)
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Sequence(items) => {
            let parts: Option<Vec<String>> = items.iter().map(scalar_to_string).collect();
            parts.map(|parts| parts.join(","))
        }
        _ => None,
    }
}

/// Expand environment variables in the format ${VAR} or ${VAR:-default}
pub fn expand_env_vars(content: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    ENV_VAR_REGEX
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str());

            lookup(var_name).unwrap_or_else(|| default.unwrap_or("").to_string())
        })
        .to_string()
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Resolves settings from the environment, then the YAML file
pub struct ConfigResolver {
    file: ConfigFile,
    env: EnvLookup,
}

impl ConfigResolver {
    /// Resolver over the process environment
    pub fn new(file: ConfigFile) -> Self {
        Self {
            file,
            env: Box::new(|name| std::env::var(name).ok()),
        }
    }

    /// Resolver over a fixed set of variables instead of the process environment
    pub fn with_env(file: ConfigFile, vars: HashMap<String, String>) -> Self {
        Self {
            file,
            env: Box::new(move |name| vars.get(name).cloned()),
        }
    }

    /// Raw value of a setting, environment first
    pub fn raw(&self, env_var: &str, section: &str, key: &str) -> Option<String> {
        (self.env)(env_var).or_else(|| self.file.lookup(section, key))
    }

    /// String setting
    pub fn string(&self, env_var: &str, section: &str, key: &str) -> Option<String> {
        self.raw(env_var, section, key)
    }

    /// Required string setting
    pub fn required(&self, env_var: &str, section: &str, key: &str) -> Result<String> {
        self.string(env_var, section, key).ok_or_else(|| {
            ConnectError::config(format!(
                "missing setting {} ({}.{})",
                env_var, section, key
            ))
        })
    }

    /// Boolean setting: `yes`, `true`, `True` and `no`, `false`, `False`
    pub fn bool(&self, env_var: &str, section: &str, key: &str) -> Result<Option<bool>> {
        match self.raw(env_var, section, key) {
            None => Ok(None),
            Some(raw) => coerce_bool(&raw).map(Some).ok_or_else(|| {
                ConnectError::config(format!("{} is not a boolean: '{}'", env_var, raw))
            }),
        }
    }

    /// Numeric setting
    pub fn number<T: FromStr>(&self, env_var: &str, section: &str, key: &str) -> Result<Option<T>> {
        match self.raw(env_var, section, key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
                ConnectError::config(format!("{} is not a number: '{}'", env_var, raw))
            }),
        }
    }

    fn millis(&self, env_var: &str, key: &str) -> Result<Option<Duration>> {
        Ok(self
            .number::<u64>(env_var, "connector", key)?
            .map(Duration::from_millis))
    }
}

/// Boolean coercion of a raw setting value
pub fn coerce_bool(raw: &str) -> Option<bool> {
    match raw {
        "yes" | "true" | "True" => Some(true),
        "no" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Runtime tuning of the long-running loops
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Interval between two heartbeats
    pub heartbeat_interval: Duration,
    /// Delay before resubscribing after a connection loss
    pub reconnect_delay: Duration,
    /// Consecutive reconnect failures tolerated, `None` never gives up
    pub max_reconnect_attempts: Option<u32>,
    /// Maximum handler run time, `None` waits forever
    pub handler_timeout: Option<Duration>,
    /// Delay between two publish attempts of an unroutable message
    pub publish_retry_delay: Duration,
    /// Publish attempts per message, `None` retries forever
    pub max_publish_attempts: Option<u32>,
    /// Port of the health endpoint, disabled when unset
    pub health_port: Option<u16>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(40),
            reconnect_delay: Duration::from_secs(10),
            max_reconnect_attempts: None,
            handler_timeout: None,
            publish_retry_delay: Duration::from_secs(1),
            max_publish_attempts: None,
            health_port: None,
        }
    }
}

impl RuntimeSettings {
    fn resolve(resolver: &ConfigResolver) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            heartbeat_interval: resolver
                .millis("CONNECTOR_HEARTBEAT_INTERVAL_MS", "heartbeat_interval_ms")?
                .unwrap_or(defaults.heartbeat_interval),
            reconnect_delay: resolver
                .millis("CONNECTOR_RECONNECT_DELAY_MS", "reconnect_delay_ms")?
                .unwrap_or(defaults.reconnect_delay),
            max_reconnect_attempts: resolver.number(
                "CONNECTOR_MAX_RECONNECT_ATTEMPTS",
                "connector",
                "max_reconnect_attempts",
            )?,
            handler_timeout: resolver
                .millis("CONNECTOR_HANDLER_TIMEOUT_MS", "handler_timeout_ms")?,
            publish_retry_delay: resolver
                .millis("CONNECTOR_PUBLISH_RETRY_DELAY_MS", "publish_retry_delay_ms")?
                .unwrap_or(defaults.publish_retry_delay),
            max_publish_attempts: resolver.number(
                "CONNECTOR_MAX_PUBLISH_ATTEMPTS",
                "connector",
                "max_publish_attempts",
            )?,
            health_port: resolver.number("CONNECTOR_HEALTH_PORT", "connector", "health_port")?,
        })
    }
}

/// Fully resolved connector settings
#[derive(Debug, Clone, Validate)]
pub struct ConnectorSettings {
    /// Platform URL
    #[validate(url)]
    pub opencti_url: String,

    /// Platform API token
    pub opencti_token: SensitiveString,

    /// Connector id
    #[validate(length(min = 1))]
    pub id: String,

    pub connector_type: ConnectorType,

    #[validate(length(min = 1))]
    pub name: String,

    /// Entity types this connector handles
    pub scope: Vec<String>,

    #[validate(range(max = 100))]
    pub confidence_level: Option<u32>,

    pub log_level: tracing::Level,

    /// Ask ingestion workers to overwrite existing data by default
    pub update_existing_data: bool,

    pub runtime: RuntimeSettings,
}

impl ConnectorSettings {
    /// Resolve from the process environment and an optional YAML file
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => ConfigFile::from_file(path)?,
            None => ConfigFile::default(),
        };
        Self::resolve(&ConfigResolver::new(file))
    }

    /// Resolve and validate every setting
    pub fn resolve(resolver: &ConfigResolver) -> Result<Self> {
        let connector_type: ConnectorType = resolver
            .required("CONNECTOR_TYPE", "connector", "type")?
            .parse()?;
        let scope = resolver
            .string("CONNECTOR_SCOPE", "connector", "scope")
            .map(|raw| split_scope(&raw))
            .unwrap_or_default();
        let log_level = match resolver.string("CONNECTOR_LOG_LEVEL", "connector", "log_level") {
            Some(raw) => parse_log_level(&raw)?,
            None => tracing::Level::INFO,
        };

        let settings = Self {
            opencti_url: resolver.required("OPENCTI_URL", "opencti", "url")?,
            opencti_token: resolver
                .required("OPENCTI_TOKEN", "opencti", "token")?
                .into(),
            id: resolver.required("CONNECTOR_ID", "connector", "id")?,
            connector_type,
            name: resolver.required("CONNECTOR_NAME", "connector", "name")?,
            scope,
            confidence_level: resolver.number(
                "CONNECTOR_CONFIDENCE_LEVEL",
                "connector",
                "confidence_level",
            )?,
            log_level,
            update_existing_data: resolver
                .bool(
                    "CONNECTOR_UPDATE_EXISTING_DATA",
                    "connector",
                    "update_existing_data",
                )?
                .unwrap_or(false),
            runtime: RuntimeSettings::resolve(resolver)?,
        };

        settings
            .validate()
            .map_err(|e| ConnectError::config(format!("invalid settings: {}", e)))?;
        Ok(settings)
    }
}

fn split_scope(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
