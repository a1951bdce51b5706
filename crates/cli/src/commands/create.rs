use std::fs;
use std::path::Path;

use anyhow::Context;
use signoff_core::domain::proposal::ProposalId;
use signoff_core::domain::workflow::WorkflowConfig;

use crate::commands::{
    application_failure, invalid_argument, to_data, with_manager, CommandResult,
};

pub fn run(proposal: &str, config_path: &Path) -> CommandResult {
    let config = match read_config(config_path) {
        Ok(config) => config,
        Err(error) => {
            let (error_class, message, exit_code) = invalid_argument(format!("{error:#}"));
            return CommandResult::failure("create", error_class, message, exit_code);
        }
    };
    let proposal_id = ProposalId(proposal.to_string());

    with_manager("create", |manager, _store| async move {
        let tasks =
            manager.create_workflow(&proposal_id, config).await.map_err(application_failure)?;
        Ok(CommandResult::success_with_data(
            "create",
            format!("approval workflow for {} has {} task(s)", proposal_id.0, tasks.len()),
            to_data(&tasks)?,
        ))
    })
}

fn read_config(path: &Path) -> anyhow::Result<WorkflowConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read workflow config {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse workflow config {}", path.display()))
}
