//! Approval manager
//!
//! Orchestrates workflow creation, approver decisions, delegation, progress
//! reporting and the expiry sweep on top of the injected stores. Every task
//! write goes through a version compare-and-swap and every workflow close goes
//! through the store's "finalize iff active" update, so concurrent callers can
//! race without double transitions.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::approvals::policy::{ExpiryPolicy, SequencingPolicy, WorkflowPolicy};
use crate::approvals::progress::ApprovalProgress;
use crate::approvals::rules::{
    blocking_sequence, evaluate_completion, finalization_decision, next_tier,
};
use crate::domain::proposal::ProposalId;
use crate::domain::task::{ApprovalTask, Decision, TaskId, TaskStatus};
use crate::domain::workflow::{
    FinalDecision, Workflow, WorkflowConfig, WorkflowFinalization, WorkflowId,
};
use crate::errors::{ApplicationError, DomainError};
use crate::notify::{Notification, NotificationKind, NotificationSink};
use crate::store::{TaskStore, WorkflowStore};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionInput {
    pub decision: Decision,
    pub comments: Option<String>,
    pub notify_next: bool,
}

impl DecisionInput {
    pub fn new(decision: Decision) -> Self {
        Self { decision, comments: None, notify_next: false }
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }

    pub fn notify_next(mut self) -> Self {
        self.notify_next = true;
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub expired: usize,
    pub finalized: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub workflow: Workflow,
    pub tasks: Vec<ApprovalTask>,
}

pub struct ApprovalManager {
    workflows: Arc<dyn WorkflowStore>,
    tasks: Arc<dyn TaskStore>,
    notifier: Arc<dyn NotificationSink>,
    policy: WorkflowPolicy,
}

impl ApprovalManager {
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        tasks: Arc<dyn TaskStore>,
        notifier: Arc<dyn NotificationSink>,
        policy: WorkflowPolicy,
    ) -> Self {
        Self { workflows, tasks, notifier, policy }
    }

    /// Convenience for stores that implement both traits on one handle.
    pub fn with_store<S>(
        store: Arc<S>,
        notifier: Arc<dyn NotificationSink>,
        policy: WorkflowPolicy,
    ) -> Self
    where
        S: WorkflowStore + TaskStore + 'static,
    {
        Self::new(store.clone(), store, notifier, policy)
    }

    pub fn policy(&self) -> &WorkflowPolicy {
        &self.policy
    }

    pub async fn create_workflow(
        &self,
        proposal_id: &ProposalId,
        config: WorkflowConfig,
    ) -> Result<Vec<ApprovalTask>, ApplicationError> {
        config.validate()?;

        if self.workflows.find_proposal(proposal_id).await?.is_none() {
            return Err(ApplicationError::NotFound {
                entity: "proposal",
                id: proposal_id.0.clone(),
            });
        }

        let now = Utc::now();
        let draft = Workflow::from_config(proposal_id.clone(), config.clone(), now);
        let mut tasks: Vec<ApprovalTask> = config
            .approvers
            .iter()
            .map(|approver| {
                let due_at = config.due_at_for(approver, self.policy.default_timeout_hours, now);
                ApprovalTask::new(draft.id.clone(), proposal_id.clone(), approver, due_at, now)
            })
            .collect();
        tasks.sort_by(|left, right| {
            left.sequence.cmp(&right.sequence).then_with(|| left.approver_id.cmp(&right.approver_id))
        });

        let (workflow, tasks) = self.workflows.open_workflow(draft.clone(), tasks).await?;
        info!(
            event_name = "approval.workflow.created",
            proposal_id = %proposal_id.0,
            workflow_id = %workflow.id.0,
            reused = workflow.id != draft.id,
            task_count = tasks.len(),
            min_approvals = workflow.min_approvals,
            "approval tasks created"
        );

        for task in next_tier(&tasks) {
            self.notify(NotificationKind::TaskAssigned, task.acting_user_id(), task).await;
        }

        Ok(tasks)
    }

    pub async fn submit_decision(
        &self,
        task_id: &TaskId,
        acting_user_id: &str,
        input: DecisionInput,
    ) -> Result<ApprovalTask, ApplicationError> {
        let decision = input.decision;
        let strict = self.policy.sequencing == SequencingPolicy::Strict;

        let now = Utc::now();
        let comments = input.comments.clone();
        let task = self
            .mutate_task(task_id, strict, |task, siblings| {
                authorize_decider(task, acting_user_id)?;
                if strict {
                    ensure_in_sequence(task, siblings)?;
                }
                task.complete(decision, comments.clone(), now)?;
                Ok(())
            })
            .await?;
        info!(
            event_name = "approval.task.decided",
            task_id = %task.id.0,
            proposal_id = %task.proposal_id.0,
            acting_user_id,
            delegated = task.delegated_to.is_some(),
            decision = decision.as_str(),
            "approval decision recorded"
        );

        let workflow = self.load_workflow(&task.workflow_id).await?;
        let siblings = self.tasks.list_tasks_for_workflow(&workflow.id).await?;
        let finalized = self.finalize_if_complete(&workflow, &siblings, now).await?;

        let still_open = finalized.is_none() && workflow.is_active;
        if input.notify_next && still_open {
            for next in next_tier(&siblings) {
                self.notify(NotificationKind::NextTierReady, next.acting_user_id(), next).await;
            }
        }

        Ok(task)
    }

    pub async fn delegate(
        &self,
        task_id: &TaskId,
        from_user_id: &str,
        to_user_id: &str,
        reason: Option<String>,
    ) -> Result<ApprovalTask, ApplicationError> {
        let now = Utc::now();
        let task = self
            .mutate_task(task_id, false, |task, _| {
                authorize_approver(task, from_user_id)?;
                task.delegate(to_user_id, reason.clone(), now)?;
                Ok(())
            })
            .await?;
        info!(
            event_name = "approval.task.delegated",
            task_id = %task.id.0,
            approver_id = %task.approver_id,
            delegated_to = to_user_id,
            "approval task delegated"
        );

        self.notify(NotificationKind::TaskDelegated, task.acting_user_id(), &task).await;
        Ok(task)
    }

    pub async fn cancel_delegation(
        &self,
        task_id: &TaskId,
        user_id: &str,
    ) -> Result<ApprovalTask, ApplicationError> {
        let now = Utc::now();
        let task = self
            .mutate_task(task_id, false, |task, _| {
                authorize_approver(task, user_id)?;
                task.cancel_delegation(now)?;
                Ok(())
            })
            .await?;
        info!(
            event_name = "approval.task.delegation_cancelled",
            task_id = %task.id.0,
            approver_id = %task.approver_id,
            "approval task delegation cancelled"
        );
        Ok(task)
    }

    /// Open tasks the user may act on, soonest deadline first.
    pub async fn pending_for_user(
        &self,
        user_id: &str,
        include_expired: bool,
    ) -> Result<Vec<ApprovalTask>, ApplicationError> {
        let mut statuses = vec![TaskStatus::Pending, TaskStatus::InProgress];
        if include_expired {
            statuses.push(TaskStatus::Expired);
        }

        let mut tasks = self.tasks.list_tasks_for_actor(user_id, &statuses).await?;
        tasks.sort_by(|left, right| {
            let by_due = match (left.due_at, right.due_at) {
                (Some(left), Some(right)) => left.cmp(&right),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            };
            by_due
                .then_with(|| left.sequence.cmp(&right.sequence))
                .then_with(|| left.created_at.cmp(&right.created_at))
        });
        Ok(tasks)
    }

    pub async fn progress(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<ApprovalProgress, ApplicationError> {
        let Some(snapshot) = self.workflow_for_proposal(proposal_id).await? else {
            return Ok(ApprovalProgress::empty());
        };

        Ok(ApprovalProgress::from_tasks(&snapshot.workflow, &snapshot.tasks, self.policy.expiry))
    }

    pub async fn workflow_for_proposal(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<Option<WorkflowSnapshot>, ApplicationError> {
        let Some(workflow) = self.workflows.find_current_workflow(proposal_id).await? else {
            return Ok(None);
        };
        let tasks = self.tasks.list_tasks_for_workflow(&workflow.id).await?;
        Ok(Some(WorkflowSnapshot { workflow, tasks }))
    }

    /// Re-runs the completion check for one workflow, e.g. after an operator
    /// repaired a blocked one. A closed workflow is left untouched.
    pub async fn reevaluate_workflow(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<FinalDecision>, ApplicationError> {
        let workflow = self.load_workflow(workflow_id).await?;
        let tasks = self.tasks.list_tasks_for_workflow(workflow_id).await?;
        self.finalize_if_complete(&workflow, &tasks, Utc::now()).await
    }

    pub async fn sweep_expired(&self) -> Result<SweepReport, ApplicationError> {
        self.sweep_expired_at(Utc::now()).await
    }

    pub async fn sweep_expired_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SweepReport, ApplicationError> {
        let overdue = self.tasks.list_overdue_tasks(now).await?;
        let mut report = SweepReport::default();
        let mut touched = BTreeSet::new();

        for task in overdue {
            let expected_version = task.state_version;
            let mut expired = task;
            if expired.expire(now).is_err() {
                continue;
            }

            if self.tasks.compare_and_swap_task(expected_version, &expired).await? {
                report.expired += 1;
                touched.insert(expired.workflow_id.0.clone());
                debug!(
                    event_name = "approval.task.expired",
                    task_id = %expired.id.0,
                    approver_id = %expired.approver_id,
                    "approval task expired"
                );
            } else {
                debug!(
                    event_name = "approval.task.expiry_skipped",
                    task_id = %expired.id.0,
                    "task changed concurrently; leaving it to its new owner"
                );
            }
        }

        if self.policy.expiry == ExpiryPolicy::RejectWorkflow {
            for workflow_id in touched {
                let workflow = self.load_workflow(&WorkflowId(workflow_id)).await?;
                let tasks = self.tasks.list_tasks_for_workflow(&workflow.id).await?;
                if self.finalize_if_complete(&workflow, &tasks, now).await?.is_some() {
                    report.finalized += 1;
                }
            }
        }

        info!(
            event_name = "approval.sweep.completed",
            expired = report.expired,
            finalized = report.finalized,
            expiry_policy = self.policy.expiry.as_str(),
            "expiry sweep completed"
        );
        Ok(report)
    }

    async fn finalize_if_complete(
        &self,
        workflow: &Workflow,
        tasks: &[ApprovalTask],
        now: DateTime<Utc>,
    ) -> Result<Option<FinalDecision>, ApplicationError> {
        if !workflow.is_active {
            return Ok(None);
        }

        let outcome = evaluate_completion(tasks, workflow.min_approvals, self.policy.expiry);
        if !outcome.is_complete {
            return Ok(None);
        }

        let decision = finalization_decision(tasks, workflow.min_approvals, self.policy.expiry);
        let finalization = WorkflowFinalization {
            workflow_id: workflow.id.clone(),
            proposal_id: workflow.proposal_id.clone(),
            decision,
            completed_at: now,
        };

        if !self.workflows.finalize_workflow(&finalization).await? {
            debug!(
                event_name = "approval.workflow.finalize_skipped",
                workflow_id = %workflow.id.0,
                "workflow already finalized"
            );
            return Ok(None);
        }

        info!(
            event_name = "approval.workflow.finalized",
            workflow_id = %workflow.id.0,
            proposal_id = %workflow.proposal_id.0,
            decision = decision.as_str(),
            approved = outcome.approved,
            rejected = outcome.rejected,
            "approval workflow finalized"
        );
        Ok(Some(decision))
    }

    /// Read, check and write a task until the write lands on the version
    /// that was checked. With `with_siblings` the checks also see a snapshot
    /// of the workflow's tasks read after the task itself.
    async fn mutate_task<F>(
        &self,
        task_id: &TaskId,
        with_siblings: bool,
        mut apply: F,
    ) -> Result<ApprovalTask, ApplicationError>
    where
        F: FnMut(&mut ApprovalTask, &[ApprovalTask]) -> Result<(), ApplicationError> + Send,
    {
        for attempt in 0..=self.policy.max_conflict_retries {
            let mut task = self.load_task(task_id).await?;
            let expected_version = task.state_version;
            let siblings = if with_siblings {
                self.tasks.list_tasks_for_workflow(&task.workflow_id).await?
            } else {
                Vec::new()
            };
            apply(&mut task, &siblings)?;

            if self.tasks.compare_and_swap_task(expected_version, &task).await? {
                return Ok(task);
            }
            debug!(
                event_name = "approval.task.version_conflict",
                task_id = %task_id.0,
                attempt,
                "task changed since it was read; retrying"
            );
        }

        Err(ApplicationError::Conflict { task_id: task_id.0.clone() })
    }

    async fn load_task(&self, task_id: &TaskId) -> Result<ApprovalTask, ApplicationError> {
        self.tasks
            .find_task(task_id)
            .await?
            .ok_or_else(|| ApplicationError::NotFound { entity: "task", id: task_id.0.clone() })
    }

    async fn load_workflow(&self, workflow_id: &WorkflowId) -> Result<Workflow, ApplicationError> {
        self.workflows.find_workflow(workflow_id).await?.ok_or_else(|| ApplicationError::NotFound {
            entity: "workflow",
            id: workflow_id.0.clone(),
        })
    }

    async fn notify(&self, kind: NotificationKind, recipient: &str, task: &ApprovalTask) {
        let notification =
            Notification::new(kind, recipient, task.id.clone(), task.proposal_id.clone());
        if let Err(error) = self.notifier.notify(notification).await {
            warn!(
                event_name = "approval.notification.failed",
                kind = kind.as_str(),
                recipient,
                task_id = %task.id.0,
                error = %error,
                "approval notification failed; continuing"
            );
        }
    }
}

fn authorize_decider(task: &ApprovalTask, user_id: &str) -> Result<(), ApplicationError> {
    if task.can_decide(user_id) {
        return Ok(());
    }
    Err(ApplicationError::Unauthorized { user_id: user_id.to_string(), task_id: task.id.0.clone() })
}

/// Completed tasks never reopen, so a snapshot that no longer blocks stays
/// valid until the version-checked write lands. An approver appended at a
/// lower sequence in between is not seen.
fn ensure_in_sequence(
    task: &ApprovalTask,
    siblings: &[ApprovalTask],
) -> Result<(), ApplicationError> {
    if task.status.is_terminal() {
        return Ok(());
    }
    match blocking_sequence(siblings, task) {
        Some(blocking_sequence) => {
            Err(DomainError::OutOfSequence { sequence: task.sequence, blocking_sequence }.into())
        }
        None => Ok(()),
    }
}

fn authorize_approver(task: &ApprovalTask, user_id: &str) -> Result<(), ApplicationError> {
    if task.approver_id == user_id {
        return Ok(());
    }
    Err(ApplicationError::Unauthorized { user_id: user_id.to_string(), task_id: task.id.0.clone() })
}
