use signoff_core::domain::proposal::{Proposal, ProposalStatus};
use signoff_core::errors::ApplicationError;
use signoff_core::store::WorkflowStore;

use crate::commands::{
    application_failure, invalid_argument, to_data, with_manager, CommandResult,
};

/// Registers or updates the proposal record workflows attach to.
pub fn run(id: &str, title: &str, status: &str) -> CommandResult {
    let status = status.to_string();
    let proposal_id = id.to_string();
    let title = title.to_string();

    with_manager("proposal", |_manager, store| async move {
        let status = ProposalStatus::parse(&status)
            .ok_or_else(|| invalid_argument(format!("unknown proposal status `{status}`")))?;
        let proposal = Proposal::new(proposal_id, title, status);
        store
            .save_proposal(proposal.clone())
            .await
            .map_err(|error| application_failure(ApplicationError::from(error)))?;

        Ok(CommandResult::success_with_data(
            "proposal",
            format!("saved proposal {} as {}", proposal.id.0, proposal.status.as_str()),
            to_data(&proposal)?,
        ))
    })
}
