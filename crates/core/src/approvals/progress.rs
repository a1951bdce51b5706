use serde::{Deserialize, Serialize};

use crate::approvals::policy::ExpiryPolicy;
use crate::approvals::rules::{evaluate_completion, next_tier};
use crate::domain::task::{ApprovalTask, TaskStatus};
use crate::domain::workflow::{FinalDecision, Workflow, WorkflowId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextApprover {
    pub approver_id: String,
    pub role: Option<String>,
    pub acting_user_id: String,
    pub sequence: i32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalProgress {
    pub workflow_id: Option<WorkflowId>,
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    pub expired: usize,
    pub approved: usize,
    pub rejected: usize,
    pub percent_complete: u8,
    pub next_approvers: Vec<NextApprover>,
    pub is_complete: bool,
    pub final_decision: FinalDecision,
}

impl ApprovalProgress {
    /// Progress of a proposal that has no workflow yet.
    pub fn empty() -> Self {
        Self {
            workflow_id: None,
            total: 0,
            completed: 0,
            pending: 0,
            expired: 0,
            approved: 0,
            rejected: 0,
            percent_complete: 0,
            next_approvers: Vec::new(),
            is_complete: false,
            final_decision: FinalDecision::Pending,
        }
    }

    pub fn from_tasks(workflow: &Workflow, tasks: &[ApprovalTask], expiry: ExpiryPolicy) -> Self {
        let outcome = evaluate_completion(tasks, workflow.min_approvals, expiry);
        let total = tasks.len();
        let completed = count(tasks, TaskStatus::Completed);
        let pending = count(tasks, TaskStatus::Pending) + count(tasks, TaskStatus::InProgress);

        // A closed workflow keeps the decision it was finalized with.
        let (is_complete, final_decision) = match (workflow.is_active, workflow.final_decision) {
            (false, Some(decision)) => (true, decision),
            _ => (outcome.is_complete, outcome.final_decision),
        };

        Self {
            workflow_id: Some(workflow.id.clone()),
            total,
            completed,
            pending,
            expired: count(tasks, TaskStatus::Expired),
            approved: outcome.approved,
            rejected: outcome.rejected,
            percent_complete: percent(completed, total),
            next_approvers: if is_complete {
                Vec::new()
            } else {
                next_tier(tasks)
                    .into_iter()
                    .map(|task| NextApprover {
                        approver_id: task.approver_id.clone(),
                        role: task.role.clone(),
                        acting_user_id: task.acting_user_id().to_string(),
                        sequence: task.sequence,
                    })
                    .collect()
            },
            is_complete,
            final_decision,
        }
    }
}

fn count(tasks: &[ApprovalTask], status: TaskStatus) -> usize {
    tasks.iter().filter(|task| task.status == status).count()
}

fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((completed as f64 / total as f64) * 100.0).round().clamp(0.0, 100.0) as u8
}
