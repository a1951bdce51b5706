use signoff_core::domain::proposal::ProposalId;

use crate::commands::{application_failure, to_data, with_manager, CommandResult};

pub fn run(proposal: &str) -> CommandResult {
    let proposal_id = ProposalId(proposal.to_string());

    with_manager("progress", |manager, _store| async move {
        let progress = manager.progress(&proposal_id).await.map_err(application_failure)?;
        let message = if progress.workflow_id.is_none() {
            format!("no approval workflow for {}", proposal_id.0)
        } else {
            format!(
                "{}/{} task(s) completed ({}%), decision {}",
                progress.completed,
                progress.total,
                progress.percent_complete,
                progress.final_decision.as_str()
            )
        };
        Ok(CommandResult::success_with_data("progress", message, to_data(&progress)?))
    })
}
