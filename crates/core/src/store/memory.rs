use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::proposal::{Proposal, ProposalId};
use crate::domain::task::{ApprovalTask, TaskId, TaskStatus};
use crate::domain::workflow::{Workflow, WorkflowFinalization, WorkflowId};
use crate::errors::StoreError;

use super::{TaskStore, WorkflowStore};

#[derive(Default)]
struct StoreState {
    proposals: HashMap<String, Proposal>,
    workflows: HashMap<String, Workflow>,
    tasks: HashMap<String, ApprovalTask>,
}

impl StoreState {
    fn active_workflow(&self, proposal_id: &ProposalId) -> Option<&Workflow> {
        self.workflows
            .values()
            .find(|workflow| workflow.proposal_id == *proposal_id && workflow.is_active)
    }

    fn workflow_is_active(&self, workflow_id: &WorkflowId) -> bool {
        self.workflows.get(&workflow_id.0).is_some_and(|workflow| workflow.is_active)
    }
}

/// A single lock guards every table, so each trait call is atomic.
#[derive(Default)]
pub struct InMemoryApprovalStore {
    state: RwLock<StoreState>,
}

impl InMemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl WorkflowStore for InMemoryApprovalStore {
    async fn find_proposal(&self, id: &ProposalId) -> Result<Option<Proposal>, StoreError> {
        let state = self.state.read().await;
        Ok(state.proposals.get(&id.0).cloned())
    }

    async fn save_proposal(&self, proposal: Proposal) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.proposals.insert(proposal.id.0.clone(), proposal);
        Ok(())
    }

    async fn find_workflow(&self, id: &WorkflowId) -> Result<Option<Workflow>, StoreError> {
        let state = self.state.read().await;
        Ok(state.workflows.get(&id.0).cloned())
    }

    async fn find_current_workflow(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<Option<Workflow>, StoreError> {
        let state = self.state.read().await;
        if let Some(active) = state.active_workflow(proposal_id) {
            return Ok(Some(active.clone()));
        }

        Ok(state
            .workflows
            .values()
            .filter(|workflow| workflow.proposal_id == *proposal_id)
            .max_by(|left, right| left.created_at.cmp(&right.created_at))
            .cloned())
    }

    async fn open_workflow(
        &self,
        workflow: Workflow,
        tasks: Vec<ApprovalTask>,
    ) -> Result<(Workflow, Vec<ApprovalTask>), StoreError> {
        let mut state = self.state.write().await;

        let workflow = match state.active_workflow(&workflow.proposal_id).cloned() {
            Some(mut active) => {
                let holders: Vec<String> = state
                    .tasks
                    .values()
                    .filter(|task| task.workflow_id == active.id)
                    .map(|task| task.approver_id.clone())
                    .collect();
                active.absorb(&workflow.config, &holders).map_err(StoreError::Rejected)?;
                active
            }
            None => workflow,
        };

        let tasks: Vec<ApprovalTask> = tasks
            .into_iter()
            .map(|mut task| {
                task.workflow_id = workflow.id.clone();
                task
            })
            .collect();
        for task in &tasks {
            if state.tasks.contains_key(&task.id.0) {
                return Err(StoreError::Backend(format!("duplicate task id `{}`", task.id.0)));
            }
        }
        state.workflows.insert(workflow.id.0.clone(), workflow.clone());
        for task in &tasks {
            state.tasks.insert(task.id.0.clone(), task.clone());
        }

        Ok((workflow, tasks))
    }

    async fn finalize_workflow(
        &self,
        finalization: &WorkflowFinalization,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;

        let Some(workflow) = state.workflows.get_mut(&finalization.workflow_id.0) else {
            return Ok(false);
        };
        if !workflow.is_active {
            return Ok(false);
        }

        workflow.is_active = false;
        workflow.completed_at = Some(finalization.completed_at);
        workflow.final_decision = Some(finalization.decision);

        if let Some(proposal) = state.proposals.get_mut(&finalization.proposal_id.0) {
            proposal.status = finalization.proposal_status();
            proposal.approved_at = finalization.approved_at();
            proposal.updated_at = finalization.completed_at;
        }

        Ok(true)
    }
}

#[async_trait::async_trait]
impl TaskStore for InMemoryApprovalStore {
    async fn find_task(&self, id: &TaskId) -> Result<Option<ApprovalTask>, StoreError> {
        let state = self.state.read().await;
        Ok(state.tasks.get(&id.0).cloned())
    }

    async fn list_tasks_for_workflow(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<ApprovalTask>, StoreError> {
        let state = self.state.read().await;
        let mut tasks: Vec<ApprovalTask> =
            state.tasks.values().filter(|task| task.workflow_id == *workflow_id).cloned().collect();
        tasks.sort_by(|left, right| {
            left.sequence
                .cmp(&right.sequence)
                .then_with(|| left.created_at.cmp(&right.created_at))
                .then_with(|| left.approver_id.cmp(&right.approver_id))
        });
        Ok(tasks)
    }

    async fn list_tasks_for_actor(
        &self,
        user_id: &str,
        statuses: &[TaskStatus],
    ) -> Result<Vec<ApprovalTask>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .tasks
            .values()
            .filter(|task| task.can_decide(user_id))
            .filter(|task| statuses.contains(&task.status))
            .filter(|task| state.workflow_is_active(&task.workflow_id))
            .cloned()
            .collect())
    }

    async fn list_overdue_tasks(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ApprovalTask>, StoreError> {
        let state = self.state.read().await;
        Ok(state.tasks.values().filter(|task| task.is_overdue(now)).cloned().collect())
    }

    async fn compare_and_swap_task(
        &self,
        expected_version: u32,
        task: &ApprovalTask,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.tasks.get_mut(&task.id.0) {
            Some(stored) if stored.state_version == expected_version => {
                *stored = task.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::domain::proposal::{Proposal, ProposalId, ProposalStatus};
    use crate::domain::task::{ApprovalTask, Decision, TaskStatus};
    use crate::domain::workflow::{
        ApproverSpec, FinalDecision, Workflow, WorkflowConfig, WorkflowFinalization, WorkflowType,
    };
    use crate::errors::{DomainError, StoreError};
    use crate::store::{InMemoryApprovalStore, TaskStore, WorkflowStore};

    fn config(users: &[&str], min_approvals: u32) -> WorkflowConfig {
        WorkflowConfig {
            workflow_type: WorkflowType::Simple,
            approvers: users
                .iter()
                .map(|user_id| ApproverSpec {
                    user_id: user_id.to_string(),
                    role: None,
                    sequence: 1,
                    is_required: true,
                    due_hours: None,
                })
                .collect(),
            min_approvals,
            timeout_hours: None,
        }
    }

    fn draft_for(
        proposal_id: &ProposalId,
        config: WorkflowConfig,
    ) -> (Workflow, Vec<ApprovalTask>) {
        let now = Utc::now();
        let workflow = Workflow::from_config(proposal_id.clone(), config.clone(), now);
        let tasks = config
            .approvers
            .iter()
            .map(|spec| {
                ApprovalTask::new(workflow.id.clone(), proposal_id.clone(), spec, None, now)
            })
            .collect();
        (workflow, tasks)
    }

    fn draft(proposal_id: &ProposalId) -> (Workflow, Vec<ApprovalTask>) {
        draft_for(proposal_id, config(&["u-1"], 1))
    }

    #[tokio::test]
    async fn open_workflow_appends_new_approvers_to_the_active_workflow() {
        let store = InMemoryApprovalStore::new();
        let proposal_id = ProposalId("P-1".to_string());

        let (first, tasks) = draft(&proposal_id);
        let (opened, _) = store.open_workflow(first.clone(), tasks).await.expect("open first");
        assert_eq!(opened.id, first.id);

        let (second, tasks) = draft_for(&proposal_id, config(&["u-2"], 2));
        let (reused, appended) = store.open_workflow(second, tasks).await.expect("open second");
        assert_eq!(reused.id, first.id);
        assert!(appended.iter().all(|task| task.workflow_id == first.id));
        assert_eq!(reused.required_approvers, vec!["u-1".to_string(), "u-2".to_string()]);
        assert_eq!(reused.min_approvals, 2);

        let stored = store.find_workflow(&first.id).await.expect("find").expect("exists");
        assert_eq!(stored, reused);
        let all = store.list_tasks_for_workflow(&first.id).await.expect("list");
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn open_workflow_refuses_a_second_task_for_the_same_approver() {
        let store = InMemoryApprovalStore::new();
        let proposal_id = ProposalId("P-4".to_string());
        let (first, tasks) = draft(&proposal_id);
        store.open_workflow(first.clone(), tasks).await.expect("open first");

        let (second, tasks) = draft_for(&proposal_id, config(&["u-1", "u-2"], 2));
        let error = store.open_workflow(second, tasks).await.expect_err("u-1 already has a task");
        assert!(matches!(error, StoreError::Rejected(DomainError::InvalidConfiguration(_))));

        let all = store.list_tasks_for_workflow(&first.id).await.expect("list");
        assert_eq!(all.len(), 1, "nothing of the refused addition is stored");
        let stored = store.find_workflow(&first.id).await.expect("find").expect("exists");
        assert_eq!(stored.min_approvals, 1);
        assert_eq!(stored.required_approvers, vec!["u-1".to_string()]);
    }

    #[tokio::test]
    async fn finalize_applies_once() {
        let store = InMemoryApprovalStore::new();
        let proposal_id = ProposalId("P-2".to_string());
        store
            .save_proposal(Proposal::new("P-2", "Renewal", ProposalStatus::PendingApproval))
            .await
            .expect("save proposal");
        let (workflow, tasks) = draft(&proposal_id);
        store.open_workflow(workflow.clone(), tasks).await.expect("open");

        let finalization = WorkflowFinalization {
            workflow_id: workflow.id.clone(),
            proposal_id: proposal_id.clone(),
            decision: FinalDecision::Approved,
            completed_at: Utc::now(),
        };
        assert!(store.finalize_workflow(&finalization).await.expect("first finalize"));

        let mut later = finalization.clone();
        later.completed_at = finalization.completed_at + Duration::minutes(5);
        assert!(!store.finalize_workflow(&later).await.expect("second finalize"));

        let stored = store.find_workflow(&workflow.id).await.expect("find").expect("exists");
        assert_eq!(stored.completed_at, Some(finalization.completed_at));
        let proposal = store.find_proposal(&proposal_id).await.expect("find").expect("exists");
        assert_eq!(proposal.status, ProposalStatus::Approved);
        assert_eq!(proposal.approved_at, Some(finalization.completed_at));
    }

    #[tokio::test]
    async fn compare_and_swap_rejects_stale_versions() {
        let store = InMemoryApprovalStore::new();
        let (workflow, tasks) = draft(&ProposalId("P-3".to_string()));
        let (_, tasks) = store.open_workflow(workflow, tasks).await.expect("open");

        let original = tasks[0].clone();
        let mut first = original.clone();
        first.complete(Decision::Approved, None, Utc::now()).expect("complete");
        assert!(store.compare_and_swap_task(original.state_version, &first).await.expect("cas"));

        let mut stale = original.clone();
        stale.delegate("u-9", None, Utc::now()).expect("delegate");
        assert!(!store.compare_and_swap_task(original.state_version, &stale).await.expect("cas"));

        let stored = store.find_task(&original.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, TaskStatus::Completed);
    }
}
