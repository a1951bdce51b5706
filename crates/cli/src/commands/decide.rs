use signoff_core::approvals::DecisionInput;
use signoff_core::domain::task::{Decision, TaskId};

use crate::commands::{
    application_failure, invalid_argument, to_data, with_manager, CommandResult,
};

pub fn run(
    task: &str,
    user: &str,
    decision: &str,
    comments: Option<String>,
    notify_next: bool,
) -> CommandResult {
    let Some(decision) = Decision::parse(decision) else {
        let (error_class, message, exit_code) =
            invalid_argument(format!("decision must be `approved` or `rejected`, got `{decision}`"));
        return CommandResult::failure("decide", error_class, message, exit_code);
    };

    let mut input = DecisionInput::new(decision);
    if let Some(comments) = comments {
        input = input.with_comments(comments);
    }
    if notify_next {
        input = input.notify_next();
    }
    let task_id = TaskId(task.to_string());
    let user = user.to_string();

    with_manager("decide", |manager, _store| async move {
        let task =
            manager.submit_decision(&task_id, &user, input).await.map_err(application_failure)?;
        Ok(CommandResult::success_with_data(
            "decide",
            format!("recorded {} on task {}", decision.as_str(), task.id.0),
            to_data(&task)?,
        ))
    })
}
