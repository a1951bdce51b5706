pub mod approvals;
pub mod config;
pub mod domain;
pub mod errors;
pub mod notify;
pub mod store;

pub use approvals::{
    ApprovalManager, ApprovalProgress, DecisionInput, ExpiryPolicy, SequencingPolicy, SweepReport,
    WorkflowPolicy, WorkflowSnapshot,
};
pub use domain::proposal::{Proposal, ProposalId, ProposalStatus};
pub use domain::task::{ApprovalTask, Decision, TaskId, TaskStatus};
pub use domain::workflow::{
    ApproverSpec, FinalDecision, Workflow, WorkflowConfig, WorkflowId, WorkflowType,
};
pub use errors::{ApplicationError, DomainError, InterfaceError, StoreError};
pub use notify::{
    InMemoryNotificationSink, Notification, NotificationKind, NotificationSink,
    TracingNotificationSink,
};
pub use store::{InMemoryApprovalStore, TaskStore, WorkflowStore};
