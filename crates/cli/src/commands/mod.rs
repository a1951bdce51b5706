pub mod config;
pub mod create;
pub mod decide;
pub mod delegate;
pub mod migrate;
pub mod pending;
pub mod progress;
pub mod proposal;
pub mod sweep;

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use signoff_core::approvals::ApprovalManager;
use signoff_core::config::{AppConfig, LoadOptions};
use signoff_core::errors::{ApplicationError, InterfaceError};
use signoff_core::notify::TracingNotificationSink;
use signoff_db::{connect_with_settings, DbPool, SqlApprovalStore};
use tokio::runtime::Runtime;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// `(error_class, message, exit_code)` of a failed command.
pub(crate) type Failure = (&'static str, String, u8);

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None)
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Loads config and builds the single-threaded runtime every command runs on.
/// Exit codes: 2 config, 3 runtime.
pub(crate) fn prepare(command: &str) -> Result<(AppConfig, Runtime), CommandResult> {
    let config = AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            2,
        )
    })?;

    let runtime =
        tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
            CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            )
        })?;

    Ok((config, runtime))
}

pub(crate) async fn open_pool(config: &AppConfig) -> Result<DbPool, Failure> {
    connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| ("db_connectivity", error.to_string(), 4u8))
}

/// Opens the database and hands the caller an approval manager wired to the
/// SQL store, plus the store itself for proposal bookkeeping.
pub(crate) fn with_manager<F, Fut>(command: &'static str, action: F) -> CommandResult
where
    F: FnOnce(ApprovalManager, Arc<SqlApprovalStore>) -> Fut,
    Fut: Future<Output = Result<CommandResult, Failure>>,
{
    let (config, runtime) = match prepare(command) {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async move {
        let pool = open_pool(&config).await?;
        let store = Arc::new(SqlApprovalStore::new(pool.clone()));
        let manager = ApprovalManager::with_store(
            store.clone(),
            Arc::new(TracingNotificationSink),
            config.workflow.policy(),
        );
        let outcome = action(manager, store).await;
        pool.close().await;
        outcome
    });

    finish(command, result)
}

pub(crate) fn finish(command: &str, result: Result<CommandResult, Failure>) -> CommandResult {
    match result {
        Ok(result) => result,
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(command, error_class, message, exit_code)
        }
    }
}

/// Maps an engine error onto its stable class and an exit code per interface kind.
pub(crate) fn application_failure(error: ApplicationError) -> Failure {
    let error_class = error.error_class();
    let interface = error.into_interface(uuid::Uuid::new_v4().to_string());
    let exit_code = match interface {
        InterfaceError::NotFound { .. } => 6,
        InterfaceError::Forbidden { .. } => 7,
        InterfaceError::BadRequest { .. } => 8,
        InterfaceError::Internal { .. } => 9,
    };
    let message = format!(
        "{} {interface} (correlation_id: {})",
        interface.user_message(),
        interface.correlation_id()
    );
    (error_class, message, exit_code)
}

pub(crate) fn invalid_argument(message: impl Into<String>) -> Failure {
    ("invalid_argument", message.into(), 8)
}

pub(crate) fn to_data<T: Serialize>(value: &T) -> Result<Option<Value>, Failure> {
    serde_json::to_value(value)
        .map(Some)
        .map_err(|error| ("serialization", error.to_string(), 10))
}
