use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::proposal::ProposalId;
use crate::domain::workflow::{ApproverSpec, WorkflowId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Expired,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Pending or in progress: still waiting on a decision.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" | "approve" => Some(Self::Approved),
            "rejected" | "reject" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalTask {
    pub id: TaskId,
    pub workflow_id: WorkflowId,
    pub proposal_id: ProposalId,
    pub approver_id: String,
    pub role: Option<String>,
    pub sequence: i32,
    pub is_required: bool,
    pub due_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub decision: Option<Decision>,
    pub comments: Option<String>,
    pub delegated_to: Option<String>,
    pub delegated_at: Option<DateTime<Utc>>,
    pub delegation_reason: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub state_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalTask {
    pub fn new(
        workflow_id: WorkflowId,
        proposal_id: ProposalId,
        approver: &ApproverSpec,
        due_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TaskId::generate(),
            workflow_id,
            proposal_id,
            approver_id: approver.user_id.trim().to_string(),
            role: approver.role.clone(),
            sequence: approver.sequence,
            is_required: approver.is_required,
            due_at,
            status: TaskStatus::Pending,
            decision: None,
            comments: None,
            delegated_to: None,
            delegated_at: None,
            delegation_reason: None,
            completed_at: None,
            state_version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// The user currently expected to act: the delegate when one is set.
    pub fn acting_user_id(&self) -> &str {
        self.delegated_to.as_deref().unwrap_or(&self.approver_id)
    }

    pub fn can_decide(&self, user_id: &str) -> bool {
        self.approver_id == user_id || self.delegated_to.as_deref() == Some(user_id)
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status.is_open() && self.due_at.is_some_and(|due_at| due_at < now)
    }

    pub fn is_approved(&self) -> bool {
        self.status == TaskStatus::Completed && self.decision == Some(Decision::Approved)
    }

    pub fn is_rejected(&self) -> bool {
        self.status == TaskStatus::Completed && self.decision == Some(Decision::Rejected)
    }

    pub fn complete(
        &mut self,
        decision: Decision,
        comments: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.ensure_transition(TaskStatus::Completed)?;

        self.status = TaskStatus::Completed;
        self.decision = Some(decision);
        self.comments = comments;
        self.completed_at = Some(now);
        self.touch(now);
        Ok(())
    }

    pub fn delegate(
        &mut self,
        to_user_id: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let to_user_id = to_user_id.trim();
        if to_user_id.is_empty() {
            return Err(DomainError::InvalidDelegation("delegate user id must not be blank".into()));
        }
        if to_user_id == self.approver_id {
            return Err(DomainError::InvalidDelegation(format!(
                "approver `{to_user_id}` cannot delegate a task to themselves"
            )));
        }
        self.ensure_transition(TaskStatus::InProgress)?;

        self.status = TaskStatus::InProgress;
        self.delegated_to = Some(to_user_id.to_string());
        self.delegated_at = Some(now);
        self.delegation_reason = reason;
        self.touch(now);
        Ok(())
    }

    pub fn cancel_delegation(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.ensure_transition(TaskStatus::Pending)?;

        self.status = TaskStatus::Pending;
        self.delegated_to = None;
        self.delegated_at = None;
        self.delegation_reason = None;
        self.touch(now);
        Ok(())
    }

    /// Only the expiry sweep calls this; approvers have no path to `Expired`.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.ensure_transition(TaskStatus::Expired)?;

        self.status = TaskStatus::Expired;
        self.touch(now);
        Ok(())
    }

    fn ensure_transition(&self, to: TaskStatus) -> Result<(), DomainError> {
        let valid = matches!(
            (self.status, to),
            (TaskStatus::Pending, TaskStatus::InProgress)
                | (TaskStatus::InProgress, TaskStatus::InProgress)
                | (TaskStatus::InProgress, TaskStatus::Pending)
                | (TaskStatus::Pending, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Completed)
                | (TaskStatus::Pending, TaskStatus::Expired)
                | (TaskStatus::InProgress, TaskStatus::Expired)
        );

        if valid {
            Ok(())
        } else {
            Err(DomainError::InvalidTaskTransition { from: self.status, to })
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.state_version += 1;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{ApprovalTask, Decision, TaskStatus};
    use crate::domain::proposal::ProposalId;
    use crate::domain::workflow::{ApproverSpec, WorkflowId};
    use crate::errors::DomainError;

    fn task() -> ApprovalTask {
        let spec = ApproverSpec {
            user_id: "u-2".to_string(),
            role: Some("finance".to_string()),
            sequence: 1,
            is_required: true,
            due_hours: None,
        };
        ApprovalTask::new(
            WorkflowId("wf-1".to_string()),
            ProposalId("P-1".to_string()),
            &spec,
            None,
            Utc::now(),
        )
    }

    #[test]
    fn task_status_round_trips_from_storage_encoding() {
        for status in
            [TaskStatus::Pending, TaskStatus::InProgress, TaskStatus::Completed, TaskStatus::Expired]
        {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn completion_sets_decision_and_timestamp_together() {
        let mut task = task();
        task.complete(Decision::Approved, Some("looks good".to_string()), Utc::now())
            .expect("pending -> completed");

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.decision, Some(Decision::Approved));
        assert!(task.completed_at.is_some());
        assert_eq!(task.state_version, 2);
    }

    #[test]
    fn delegation_moves_to_in_progress_and_cancel_returns_to_pending() {
        let mut task = task();
        task.delegate("u-9", Some("travelling".to_string()), Utc::now()).expect("delegate");
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.acting_user_id(), "u-9");
        assert!(task.can_decide("u-2"));
        assert!(task.can_decide("u-9"));

        task.cancel_delegation(Utc::now()).expect("cancel");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.delegated_to, None);
        assert_eq!(task.delegation_reason, None);
        assert!(!task.can_decide("u-9"));
    }

    #[test]
    fn cancel_requires_an_active_delegation() {
        let mut task = task();
        let error = task.cancel_delegation(Utc::now()).expect_err("pending -> pending is invalid");
        assert_eq!(
            error,
            DomainError::InvalidTaskTransition { from: TaskStatus::Pending, to: TaskStatus::Pending }
        );
    }

    #[test]
    fn self_delegation_is_refused() {
        let mut task = task();
        let error = task.delegate("u-2", None, Utc::now()).expect_err("self delegation");
        assert!(matches!(error, DomainError::InvalidDelegation(_)));
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn terminal_states_admit_no_transition() {
        let mut completed = task();
        completed.complete(Decision::Rejected, None, Utc::now()).expect("complete");
        assert!(completed.expire(Utc::now()).is_err());
        assert!(completed.delegate("u-9", None, Utc::now()).is_err());
        assert!(completed.complete(Decision::Approved, None, Utc::now()).is_err());

        let mut expired = task();
        expired.expire(Utc::now()).expect("expire");
        assert!(expired.complete(Decision::Approved, None, Utc::now()).is_err());
        assert!(expired.expire(Utc::now()).is_err());
    }

    #[test]
    fn overdue_only_applies_to_open_tasks() {
        let now = Utc::now();
        let mut task = task();
        task.due_at = Some(now - Duration::hours(1));
        assert!(task.is_overdue(now));

        task.complete(Decision::Approved, None, now).expect("complete");
        assert!(!task.is_overdue(now));
    }
}
