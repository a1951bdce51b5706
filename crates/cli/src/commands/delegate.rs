use signoff_core::domain::task::TaskId;

use crate::commands::{application_failure, to_data, with_manager, CommandResult};

pub fn run(task: &str, from: &str, to: &str, reason: Option<String>) -> CommandResult {
    let task_id = TaskId(task.to_string());
    let from = from.to_string();
    let to = to.to_string();

    with_manager("delegate", |manager, _store| async move {
        let task = manager
            .delegate(&task_id, &from, &to, reason)
            .await
            .map_err(application_failure)?;
        Ok(CommandResult::success_with_data(
            "delegate",
            format!("task {} delegated from {from} to {to}", task.id.0),
            to_data(&task)?,
        ))
    })
}

pub fn run_cancel(task: &str, user: &str) -> CommandResult {
    let task_id = TaskId(task.to_string());
    let user = user.to_string();

    with_manager("undelegate", |manager, _store| async move {
        let task =
            manager.cancel_delegation(&task_id, &user).await.map_err(application_failure)?;
        Ok(CommandResult::success_with_data(
            "undelegate",
            format!("task {} returned to {}", task.id.0, task.approver_id),
            to_data(&task)?,
        ))
    })
}
