use serde::{Deserialize, Serialize};

/// What an expired required task means for its workflow.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryPolicy {
    /// The workflow stays open until someone intervenes.
    #[default]
    LeaveBlocked,
    /// An expired required task counts as a rejection and the sweep finalizes.
    RejectWorkflow,
}

/// Whether `sequence` gates decisions or only orders notifications.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequencingPolicy {
    #[default]
    Advisory,
    Strict,
}

impl ExpiryPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeaveBlocked => "leave_blocked",
            Self::RejectWorkflow => "reject_workflow",
        }
    }
}

impl SequencingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Advisory => "advisory",
            Self::Strict => "strict",
        }
    }
}

impl std::str::FromStr for ExpiryPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "leave_blocked" => Ok(Self::LeaveBlocked),
            "reject_workflow" => Ok(Self::RejectWorkflow),
            other => Err(format!(
                "unsupported expiry policy `{other}` (expected leave_blocked|reject_workflow)"
            )),
        }
    }
}

impl std::str::FromStr for SequencingPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "advisory" => Ok(Self::Advisory),
            "strict" => Ok(Self::Strict),
            other => Err(format!("unsupported sequencing policy `{other}` (expected advisory|strict)")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowPolicy {
    pub expiry: ExpiryPolicy,
    pub sequencing: SequencingPolicy,
    /// Used when neither the approver nor the workflow config sets a deadline.
    pub default_timeout_hours: Option<u32>,
    /// Extra read-check-write rounds after losing a task version race.
    pub max_conflict_retries: u32,
}

impl Default for WorkflowPolicy {
    fn default() -> Self {
        Self {
            expiry: ExpiryPolicy::LeaveBlocked,
            sequencing: SequencingPolicy::Advisory,
            default_timeout_hours: None,
            max_conflict_retries: 3,
        }
    }
}
