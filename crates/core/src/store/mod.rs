//! Persistence seams of the approval engine.
//!
//! The engine never holds a database handle; it is handed a [`WorkflowStore`]
//! and a [`TaskStore`] and relies on two conditional writes for correctness:
//! [`WorkflowStore::finalize_workflow`] closes a workflow only while it is
//! still active, and [`TaskStore::compare_and_swap_task`] writes a task only if
//! nobody changed it since it was read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::proposal::{Proposal, ProposalId};
use crate::domain::task::{ApprovalTask, TaskId, TaskStatus};
use crate::domain::workflow::{Workflow, WorkflowFinalization, WorkflowId};
use crate::errors::StoreError;

pub mod memory;

pub use memory::InMemoryApprovalStore;

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn find_proposal(&self, id: &ProposalId) -> Result<Option<Proposal>, StoreError>;

    async fn save_proposal(&self, proposal: Proposal) -> Result<(), StoreError>;

    async fn find_workflow(&self, id: &WorkflowId) -> Result<Option<Workflow>, StoreError>;

    /// The proposal's active workflow, else the most recently created one.
    async fn find_current_workflow(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<Option<Workflow>, StoreError>;

    /// Atomically reuses the proposal's active workflow (or inserts `workflow`
    /// when there is none) and inserts `tasks` under whichever workflow won.
    async fn open_workflow(
        &self,
        workflow: Workflow,
        tasks: Vec<ApprovalTask>,
    ) -> Result<(Workflow, Vec<ApprovalTask>), StoreError>;

    /// Closes the workflow and stamps its proposal iff the workflow is still
    /// active. Returns `true` only for the call that performed the transition.
    async fn finalize_workflow(&self, finalization: &WorkflowFinalization)
        -> Result<bool, StoreError>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn find_task(&self, id: &TaskId) -> Result<Option<ApprovalTask>, StoreError>;

    async fn list_tasks_for_workflow(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<ApprovalTask>, StoreError>;

    /// Tasks of active workflows where `user_id` is the approver or delegate.
    async fn list_tasks_for_actor(
        &self,
        user_id: &str,
        statuses: &[TaskStatus],
    ) -> Result<Vec<ApprovalTask>, StoreError>;

    /// Open tasks whose `due_at` lies before `now`.
    async fn list_overdue_tasks(&self, now: DateTime<Utc>)
        -> Result<Vec<ApprovalTask>, StoreError>;

    /// Writes `task` iff the stored row is still at `expected_version`.
    async fn compare_and_swap_task(
        &self,
        expected_version: u32,
        task: &ApprovalTask,
    ) -> Result<bool, StoreError>;
}
