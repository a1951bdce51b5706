use std::env;
use std::fs;
use std::path::PathBuf;

use signoff_core::config::{AppConfig, LoadOptions};
use toml::Value;

/// One effective setting and the env keys that may have set it, first match wins.
struct Setting {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let file = ConfigFile::detect();
    let settings = [
        Setting {
            key: "database.url",
            value: config.database.url.clone(),
            env_keys: &["SIGNOFF_DATABASE_URL"],
        },
        Setting {
            key: "database.max_connections",
            value: config.database.max_connections.to_string(),
            env_keys: &["SIGNOFF_DATABASE_MAX_CONNECTIONS"],
        },
        Setting {
            key: "database.timeout_secs",
            value: config.database.timeout_secs.to_string(),
            env_keys: &["SIGNOFF_DATABASE_TIMEOUT_SECS"],
        },
        Setting {
            key: "logging.level",
            value: config.logging.level.clone(),
            env_keys: &["SIGNOFF_LOGGING_LEVEL", "SIGNOFF_LOG_LEVEL"],
        },
        Setting {
            key: "logging.format",
            value: format!("{:?}", config.logging.format).to_ascii_lowercase(),
            env_keys: &["SIGNOFF_LOGGING_FORMAT", "SIGNOFF_LOG_FORMAT"],
        },
        Setting {
            key: "workflow.expiry_policy",
            value: config.workflow.expiry_policy.as_str().to_string(),
            env_keys: &["SIGNOFF_WORKFLOW_EXPIRY_POLICY"],
        },
        Setting {
            key: "workflow.sequencing",
            value: config.workflow.sequencing.as_str().to_string(),
            env_keys: &["SIGNOFF_WORKFLOW_SEQUENCING"],
        },
        Setting {
            key: "workflow.default_timeout_hours",
            value: config
                .workflow
                .default_timeout_hours
                .map(|hours| hours.to_string())
                .unwrap_or_else(|| "<unset>".to_string()),
            env_keys: &["SIGNOFF_WORKFLOW_DEFAULT_TIMEOUT_HOURS"],
        },
        Setting {
            key: "workflow.max_conflict_retries",
            value: config.workflow.max_conflict_retries.to_string(),
            env_keys: &["SIGNOFF_WORKFLOW_MAX_CONFLICT_RETRIES"],
        },
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(settings.iter().map(|setting| {
        format!("- {} = {} (source: {})", setting.key, setting.value, file.source_of(setting))
    }));
    lines.join("\n")
}

struct ConfigFile {
    path: Option<PathBuf>,
    doc: Option<Value>,
}

impl ConfigFile {
    fn detect() -> Self {
        let path = [PathBuf::from("signoff.toml"), PathBuf::from("config/signoff.toml")]
            .into_iter()
            .find(|path| path.exists());
        let doc = path
            .as_ref()
            .and_then(|path| fs::read_to_string(path).ok())
            .and_then(|raw| raw.parse::<Value>().ok());
        Self { path, doc }
    }

    fn source_of(&self, setting: &Setting) -> String {
        if let Some(env_key) = setting.env_keys.iter().find(|key| env::var_os(key).is_some()) {
            return format!("env ({env_key})");
        }

        let in_file = self.doc.as_ref().is_some_and(|doc| {
            setting.key.split('.').try_fold(doc, |current, key| current.get(key)).is_some()
        });
        match (&self.path, in_file) {
            (Some(path), true) => format!("file ({})", path.display()),
            _ => "default".to_string(),
        }
    }
}
