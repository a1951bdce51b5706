use crate::commands::{application_failure, to_data, with_manager, CommandResult};

pub fn run() -> CommandResult {
    with_manager("sweep", |manager, _store| async move {
        let report = manager.sweep_expired().await.map_err(application_failure)?;
        Ok(CommandResult::success_with_data(
            "sweep",
            format!(
                "expired {} task(s), finalized {} workflow(s)",
                report.expired, report.finalized
            ),
            to_data(&report)?,
        ))
    })
}
