use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::approvals::policy::{ExpiryPolicy, SequencingPolicy, WorkflowPolicy};

const MAX_CONFLICT_RETRIES: u32 = 20;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub workflow: WorkflowSettings,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Debug)]
pub struct WorkflowSettings {
    pub expiry_policy: ExpiryPolicy,
    pub sequencing: SequencingPolicy,
    pub default_timeout_hours: Option<u32>,
    pub max_conflict_retries: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub expiry_policy: Option<ExpiryPolicy>,
    pub sequencing: Option<SequencingPolicy>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://signoff.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            workflow: WorkflowSettings::from(&WorkflowPolicy::default()),
        }
    }
}

impl From<&WorkflowPolicy> for WorkflowSettings {
    fn from(policy: &WorkflowPolicy) -> Self {
        Self {
            expiry_policy: policy.expiry,
            sequencing: policy.sequencing,
            default_timeout_hours: policy.default_timeout_hours,
            max_conflict_retries: policy.max_conflict_retries,
        }
    }
}

impl WorkflowSettings {
    pub fn policy(&self) -> WorkflowPolicy {
        WorkflowPolicy {
            expiry: self.expiry_policy,
            sequencing: self.sequencing,
            default_timeout_hours: self.default_timeout_hours,
            max_conflict_retries: self.max_conflict_retries,
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let maybe_path = resolve_config_path(options.config_path.as_deref());
        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("signoff.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(expiry_policy) = workflow.expiry_policy {
                self.workflow.expiry_policy = expiry_policy;
            }
            if let Some(sequencing) = workflow.sequencing {
                self.workflow.sequencing = sequencing;
            }
            if let Some(hours) = workflow.default_timeout_hours {
                self.workflow.default_timeout_hours = Some(hours);
            }
            if let Some(retries) = workflow.max_conflict_retries {
                self.workflow.max_conflict_retries = retries;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(url) = read_env(&["SIGNOFF_DATABASE_URL"]) {
            self.database.url = url;
        }
        if let Some(max) = parse_env(&["SIGNOFF_DATABASE_MAX_CONNECTIONS"])? {
            self.database.max_connections = max;
        }
        if let Some(secs) = parse_env(&["SIGNOFF_DATABASE_TIMEOUT_SECS"])? {
            self.database.timeout_secs = secs;
        }
        if let Some(level) = read_env(&["SIGNOFF_LOGGING_LEVEL", "SIGNOFF_LOG_LEVEL"]) {
            self.logging.level = level;
        }
        if let Some(format) = parse_env(&["SIGNOFF_LOGGING_FORMAT", "SIGNOFF_LOG_FORMAT"])? {
            self.logging.format = format;
        }
        if let Some(expiry) = parse_env(&["SIGNOFF_WORKFLOW_EXPIRY_POLICY"])? {
            self.workflow.expiry_policy = expiry;
        }
        if let Some(sequencing) = parse_env(&["SIGNOFF_WORKFLOW_SEQUENCING"])? {
            self.workflow.sequencing = sequencing;
        }
        if let Some(hours) = parse_env(&["SIGNOFF_WORKFLOW_DEFAULT_TIMEOUT_HOURS"])? {
            self.workflow.default_timeout_hours = Some(hours);
        }
        if let Some(retries) = parse_env(&["SIGNOFF_WORKFLOW_MAX_CONFLICT_RETRIES"])? {
            self.workflow.max_conflict_retries = retries;
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(expiry_policy) = overrides.expiry_policy {
            self.workflow.expiry_policy = expiry_policy;
        }
        if let Some(sequencing) = overrides.sequencing {
            self.workflow.sequencing = sequencing;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.database.url.trim();
        let level = self.logging.level.trim().to_ascii_lowercase();
        let checks = [
            (
                url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:",
                "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)",
            ),
            (
                self.database.max_connections > 0,
                "database.max_connections must be greater than zero",
            ),
            (
                (1..=300).contains(&self.database.timeout_secs),
                "database.timeout_secs must be in range 1..=300",
            ),
            (
                matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error"),
                "logging.level must be one of trace|debug|info|warn|error",
            ),
            (
                self.workflow.default_timeout_hours != Some(0),
                "workflow.default_timeout_hours must be greater than zero when set",
            ),
            (
                self.workflow.max_conflict_retries <= MAX_CONFLICT_RETRIES,
                "workflow.max_conflict_retries must be in range 0..=20",
            ),
        ];

        match checks.into_iter().find(|(ok, _)| !ok) {
            Some((_, message)) => Err(ConfigError::Validation(message.to_string())),
            None => Ok(()),
        }
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("signoff.toml"), PathBuf::from("config/signoff.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Expands `${VAR}` references from the process environment.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let var = &after[..end];
        let value = env::var(var)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: var.to_string() })?;
        output.push_str(&value);
        rest = &after[end + 1..];
    }

    output.push_str(rest);
    Ok(output)
}

/// First non-blank value among `keys`, so aliases can share one setting.
fn read_env(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| env::var(key).ok().filter(|value| !value.trim().is_empty()))
}

fn parse_env<T: FromStr>(keys: &[&str]) -> Result<Option<T>, ConfigError> {
    let Some((key, value)) = keys.iter().find_map(|key| {
        env::var(key).ok().filter(|value| !value.trim().is_empty()).map(|value| (*key, value))
    }) else {
        return Ok(None);
    };

    value.trim().parse::<T>().map(Some).map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value,
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    logging: Option<LoggingPatch>,
    workflow: Option<WorkflowPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    expiry_policy: Option<ExpiryPolicy>,
    sequencing: Option<SequencingPolicy>,
    default_timeout_hours: Option<u32>,
    max_conflict_retries: Option<u32>,
}
