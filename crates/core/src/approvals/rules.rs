//! Pure decision rules over a workflow's task list.
//!
//! Nothing here reads a clock or a store, so the same inputs always give the
//! same answer regardless of the order in which decisions arrived.

use serde::{Deserialize, Serialize};

use crate::approvals::policy::ExpiryPolicy;
use crate::domain::task::{ApprovalTask, TaskStatus};
use crate::domain::workflow::FinalDecision;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionOutcome {
    pub is_complete: bool,
    pub final_decision: FinalDecision,
    pub approved: usize,
    pub rejected: usize,
}

pub fn evaluate_completion(
    tasks: &[ApprovalTask],
    min_approvals: u32,
    expiry: ExpiryPolicy,
) -> CompletionOutcome {
    let approved = tasks.iter().filter(|task| task.is_approved()).count();
    let rejected = tasks.iter().filter(|task| task.is_rejected()).count();

    if rejected > 0 || blocked_by_expiry(tasks, expiry) {
        return CompletionOutcome {
            is_complete: true,
            final_decision: FinalDecision::Rejected,
            approved,
            rejected,
        };
    }

    let required_done = tasks
        .iter()
        .filter(|task| task.is_required)
        .all(|task| task.status == TaskStatus::Completed);
    let quorum_met = approved >= min_approvals as usize;
    let is_complete = required_done && quorum_met;

    CompletionOutcome {
        is_complete,
        final_decision: if is_complete { FinalDecision::Approved } else { FinalDecision::Pending },
        approved,
        rejected,
    }
}

/// Decision written at finalization. `Pending` only if called on a workflow
/// that [`evaluate_completion`] would not have closed.
pub fn finalization_decision(
    tasks: &[ApprovalTask],
    min_approvals: u32,
    expiry: ExpiryPolicy,
) -> FinalDecision {
    let approved = tasks.iter().filter(|task| task.is_approved()).count();
    if tasks.iter().any(ApprovalTask::is_rejected) || blocked_by_expiry(tasks, expiry) {
        FinalDecision::Rejected
    } else if approved >= min_approvals as usize {
        FinalDecision::Approved
    } else {
        FinalDecision::Pending
    }
}

/// Lowest sequence among open tasks, with every open task at that sequence.
pub fn next_tier(tasks: &[ApprovalTask]) -> Vec<&ApprovalTask> {
    let Some(sequence) =
        tasks.iter().filter(|task| task.status.is_open()).map(|task| task.sequence).min()
    else {
        return Vec::new();
    };

    tasks.iter().filter(|task| task.status.is_open() && task.sequence == sequence).collect()
}

/// Lowest earlier sequence that still has an unfinished required task.
pub fn blocking_sequence(tasks: &[ApprovalTask], task: &ApprovalTask) -> Option<i32> {
    tasks
        .iter()
        .filter(|other| other.id != task.id)
        .filter(|other| other.is_required && other.sequence < task.sequence)
        .filter(|other| other.status != TaskStatus::Completed)
        .map(|other| other.sequence)
        .min()
}

fn blocked_by_expiry(tasks: &[ApprovalTask], expiry: ExpiryPolicy) -> bool {
    expiry == ExpiryPolicy::RejectWorkflow
        && tasks.iter().any(|task| task.is_required && task.status == TaskStatus::Expired)
}
