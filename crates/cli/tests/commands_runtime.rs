use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use serde_json::{json, Value};
use signoff_cli::commands::{
    config, create, decide, delegate, migrate, pending, progress, proposal, sweep,
};
use tempfile::TempDir;

const PROPOSAL: &str = "P-2026-0311";

#[test]
fn migrate_returns_success_with_valid_env() {
    with_database(|_dir| {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("SIGNOFF_DATABASE_URL", "postgres://localhost/signoff")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn config_reports_env_sources() {
    with_env(&[("SIGNOFF_WORKFLOW_EXPIRY_POLICY", "reject_workflow")], || {
        let output = config::run();
        assert!(output.contains(
            "- workflow.expiry_policy = reject_workflow (source: env (SIGNOFF_WORKFLOW_EXPIRY_POLICY))"
        ));
        assert!(output.contains("- workflow.sequencing = advisory (source: default)"));
    });
}

#[test]
fn decision_flow_finalizes_proposal() {
    with_database(|dir| {
        assert_eq!(migrate::run().exit_code, 0);
        let saved = proposal::run(PROPOSAL, "Regional fibre build", "pending_approval");
        assert_eq!(saved.exit_code, 0, "{}", saved.output);

        let config_path = write_config(
            dir,
            json!({
                "workflow_type": "parallel",
                "min_approvals": 2,
                "approvers": [
                    {"user_id": "u-1", "sequence": 1},
                    {"user_id": "u-2", "sequence": 1},
                    {"user_id": "u-3", "sequence": 2, "is_required": false}
                ]
            }),
        );
        let created = create::run(PROPOSAL, &config_path);
        assert_eq!(created.exit_code, 0, "{}", created.output);
        let tasks = parse_payload(&created.output)["data"].clone();
        assert_eq!(tasks.as_array().map(Vec::len), Some(3));

        let first = task_id_for(&tasks, "u-1");
        let second = task_id_for(&tasks, "u-2");

        let decided = decide::run(&first, "u-1", "approve", Some("fine".to_string()), false);
        assert_eq!(decided.exit_code, 0, "{}", decided.output);
        let payload = parse_payload(&decided.output);
        assert_eq!(payload["data"]["decision"], "approved");

        let midway = parse_payload(&progress::run(PROPOSAL).output);
        assert_eq!(midway["data"]["completed"], 1);
        assert_eq!(midway["data"]["is_complete"], false);

        let decided = decide::run(&second, "u-2", "approved", None, true);
        assert_eq!(decided.exit_code, 0, "{}", decided.output);

        let done = parse_payload(&progress::run(PROPOSAL).output);
        assert_eq!(done["data"]["is_complete"], true);
        assert_eq!(done["data"]["final_decision"], "approved");

        let again = decide::run(&second, "u-2", "reject", None, false);
        assert_eq!(again.exit_code, 8, "terminal tasks reject further decisions");
    });
}

#[test]
fn delegated_task_moves_between_inboxes() {
    with_database(|dir| {
        let task = single_approver_task(dir);

        let handed = delegate::run(&task, "u-1", "u-9", Some("on leave".to_string()));
        assert_eq!(handed.exit_code, 0, "{}", handed.output);

        let delegate_inbox = parse_payload(&pending::run("u-9", false).output);
        assert_eq!(delegate_inbox["data"].as_array().map(Vec::len), Some(1));

        let hijack = delegate::run_cancel(&task, "u-9");
        assert_eq!(hijack.exit_code, 7, "only the original approver may take the task back");

        let returned = delegate::run_cancel(&task, "u-1");
        assert_eq!(returned.exit_code, 0, "{}", returned.output);
        let delegate_inbox = parse_payload(&pending::run("u-9", false).output);
        assert_eq!(delegate_inbox["data"].as_array().map(Vec::len), Some(0));
    });
}

#[test]
fn decide_reports_forbidden_for_strangers_and_bad_input() {
    with_database(|dir| {
        let task = single_approver_task(dir);

        let stranger = decide::run(&task, "u-404", "approve", None, false);
        assert_eq!(stranger.exit_code, 7);
        let payload = parse_payload(&stranger.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "unauthorized");
        assert!(payload["message"].as_str().unwrap_or_default().contains("correlation_id"));

        let garbled = decide::run(&task, "u-1", "maybe", None, false);
        assert_eq!(garbled.exit_code, 8);
        assert_eq!(parse_payload(&garbled.output)["error_class"], "invalid_argument");

        let missing = decide::run("no-such-task", "u-1", "approve", None, false);
        assert_eq!(missing.exit_code, 6);
    });
}

#[test]
fn sweep_reports_nothing_to_expire_on_fresh_tasks() {
    with_database(|dir| {
        let _task = single_approver_task(dir);

        let result = sweep::run();
        assert_eq!(result.exit_code, 0, "{}", result.output);
        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "sweep");
        assert_eq!(payload["data"]["expired"], 0);
        assert_eq!(payload["data"]["finalized"], 0);
    });
}

#[test]
fn progress_for_unknown_proposal_is_empty() {
    with_database(|_dir| {
        assert_eq!(migrate::run().exit_code, 0);
        let result = progress::run("P-unknown");
        assert_eq!(result.exit_code, 0, "{}", result.output);
        let payload = parse_payload(&result.output);
        assert_eq!(payload["data"]["total"], 0);
        assert_eq!(payload["data"]["final_decision"], "pending");
    });
}

fn single_approver_task(dir: &Path) -> String {
    assert_eq!(migrate::run().exit_code, 0);
    assert_eq!(proposal::run(PROPOSAL, "Edge cache refresh", "pending_approval").exit_code, 0);
    let config_path = write_config(
        dir,
        json!({
            "workflow_type": "simple",
            "min_approvals": 1,
            "timeout_hours": 48,
            "approvers": [{"user_id": "u-1"}]
        }),
    );
    let created = create::run(PROPOSAL, &config_path);
    assert_eq!(created.exit_code, 0, "{}", created.output);
    task_id_for(&parse_payload(&created.output)["data"], "u-1")
}

fn write_config(dir: &Path, config: Value) -> std::path::PathBuf {
    let path = dir.join("workflow.json");
    fs::write(&path, config.to_string()).expect("workflow config should be writable");
    path
}

fn task_id_for(tasks: &Value, approver: &str) -> String {
    tasks
        .as_array()
        .and_then(|tasks| tasks.iter().find(|task| task["approver_id"] == approver))
        .and_then(|task| task["id"].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| panic!("no task for approver {approver}"))
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_database(test_fn: impl FnOnce(&Path)) {
    let dir = TempDir::new().expect("temp dir should be creatable");
    let url = format!("sqlite://{}", dir.path().join("signoff.db").display());
    with_env(&[("SIGNOFF_DATABASE_URL", url.as_str())], || test_fn(dir.path()));
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "SIGNOFF_DATABASE_URL",
        "SIGNOFF_DATABASE_MAX_CONNECTIONS",
        "SIGNOFF_DATABASE_TIMEOUT_SECS",
        "SIGNOFF_LOGGING_LEVEL",
        "SIGNOFF_LOGGING_FORMAT",
        "SIGNOFF_LOG_LEVEL",
        "SIGNOFF_LOG_FORMAT",
        "SIGNOFF_WORKFLOW_EXPIRY_POLICY",
        "SIGNOFF_WORKFLOW_SEQUENCING",
        "SIGNOFF_WORKFLOW_DEFAULT_TIMEOUT_HOURS",
        "SIGNOFF_WORKFLOW_MAX_CONFLICT_RETRIES",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
