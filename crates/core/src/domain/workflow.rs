use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::proposal::{ProposalId, ProposalStatus};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    Simple,
    Sequential,
    Parallel,
    Conditional,
}

impl WorkflowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Conditional => "conditional",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "simple" => Some(Self::Simple),
            "sequential" => Some(Self::Sequential),
            "parallel" => Some(Self::Parallel),
            "conditional" => Some(Self::Conditional),
            _ => None,
        }
    }
}

/// One approver slot in a workflow configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverSpec {
    pub user_id: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub sequence: i32,
    #[serde(default = "default_required")]
    pub is_required: bool,
    #[serde(default)]
    pub due_hours: Option<u32>,
}

fn default_required() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub workflow_type: WorkflowType,
    pub approvers: Vec<ApproverSpec>,
    pub min_approvals: u32,
    #[serde(default)]
    pub timeout_hours: Option<u32>,
}

impl WorkflowConfig {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.approvers.is_empty() {
            return Err(DomainError::InvalidConfiguration(
                "workflow must name at least one approver".to_string(),
            ));
        }

        if self.min_approvals == 0 {
            return Err(DomainError::InvalidConfiguration(
                "min_approvals must be at least 1".to_string(),
            ));
        }

        if self.min_approvals as usize > self.approvers.len() {
            return Err(DomainError::InvalidConfiguration(format!(
                "min_approvals {} exceeds the {} configured approvers",
                self.min_approvals,
                self.approvers.len()
            )));
        }

        let mut seen = HashSet::new();
        for approver in &self.approvers {
            let user_id = approver.user_id.trim();
            if user_id.is_empty() {
                return Err(DomainError::InvalidConfiguration(
                    "approver user_id must not be blank".to_string(),
                ));
            }
            if !seen.insert(user_id) {
                return Err(DomainError::InvalidConfiguration(format!(
                    "approver `{user_id}` is listed more than once"
                )));
            }
        }

        Ok(())
    }

    /// Deadline for one approver: its own hours win over the workflow timeout,
    /// which wins over the caller-supplied default.
    pub fn due_at_for(
        &self,
        approver: &ApproverSpec,
        default_timeout_hours: Option<u32>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        approver
            .due_hours
            .or(self.timeout_hours)
            .or(default_timeout_hours)
            .map(|hours| now + Duration::hours(i64::from(hours)))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalDecision {
    Approved,
    Rejected,
    Pending,
}

impl FinalDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Pending => "pending",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }

    pub fn proposal_status(&self) -> ProposalStatus {
        match self {
            Self::Approved => ProposalStatus::Approved,
            Self::Rejected => ProposalStatus::Rejected,
            Self::Pending => ProposalStatus::PendingApproval,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub proposal_id: ProposalId,
    pub workflow_type: WorkflowType,
    pub config: WorkflowConfig,
    pub required_approvers: Vec<String>,
    pub optional_approvers: Vec<String>,
    pub min_approvals: u32,
    pub is_active: bool,
    pub final_decision: Option<FinalDecision>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Workflow {
    pub fn from_config(proposal_id: ProposalId, config: WorkflowConfig, now: DateTime<Utc>) -> Self {
        let approvers_where = |required: bool| -> Vec<String> {
            config
                .approvers
                .iter()
                .filter(|approver| approver.is_required == required)
                .map(|approver| approver.user_id.clone())
                .collect()
        };
        let required_approvers = approvers_where(true);
        let optional_approvers = approvers_where(false);

        Self {
            id: WorkflowId::generate(),
            proposal_id,
            workflow_type: config.workflow_type,
            required_approvers,
            optional_approvers,
            min_approvals: config.min_approvals,
            config,
            is_active: true,
            final_decision: None,
            created_at: now,
            completed_at: None,
        }
    }
}

impl Workflow {
    /// Folds a further configuration into this active workflow.
    ///
    /// `holders` are the approvers that already own a task in the workflow.
    /// Any overlap refuses the whole addition. The quorum becomes the larger of
    /// the two and must still fit the combined approver count.
    pub fn absorb(
        &mut self,
        addition: &WorkflowConfig,
        holders: &[String],
    ) -> Result<(), DomainError> {
        let known: HashSet<&str> = holders
            .iter()
            .chain(&self.required_approvers)
            .chain(&self.optional_approvers)
            .map(|user_id| user_id.trim())
            .collect();
        if let Some(taken) =
            addition.approvers.iter().find(|approver| known.contains(approver.user_id.trim()))
        {
            return Err(DomainError::InvalidConfiguration(format!(
                "approver `{}` already has a task in the active workflow",
                taken.user_id.trim()
            )));
        }

        let total = known.len() + addition.approvers.len();
        let min_approvals = self.min_approvals.max(addition.min_approvals);
        if min_approvals as usize > total {
            return Err(DomainError::InvalidConfiguration(format!(
                "min_approvals {min_approvals} exceeds the {total} approvers of the workflow"
            )));
        }

        for approver in &addition.approvers {
            let user_id = approver.user_id.trim().to_string();
            if approver.is_required {
                self.required_approvers.push(user_id);
            } else {
                self.optional_approvers.push(user_id);
            }
        }
        self.config.approvers.extend(addition.approvers.iter().cloned());
        self.config.min_approvals = min_approvals;
        self.min_approvals = min_approvals;
        Ok(())
    }
}

/// Everything the store needs to close a workflow and stamp its proposal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowFinalization {
    pub workflow_id: WorkflowId,
    pub proposal_id: ProposalId,
    pub decision: FinalDecision,
    pub completed_at: DateTime<Utc>,
}

impl WorkflowFinalization {
    pub fn proposal_status(&self) -> ProposalStatus {
        self.decision.proposal_status()
    }

    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        (self.decision == FinalDecision::Approved).then_some(self.completed_at)
    }
}
