use crate::commands::{application_failure, to_data, with_manager, CommandResult};

pub fn run(user: &str, include_expired: bool) -> CommandResult {
    let user = user.to_string();

    with_manager("pending", |manager, _store| async move {
        let tasks = manager
            .pending_for_user(&user, include_expired)
            .await
            .map_err(application_failure)?;
        Ok(CommandResult::success_with_data(
            "pending",
            format!("{} task(s) awaiting {user}", tasks.len()),
            to_data(&tasks)?,
        ))
    })
}
