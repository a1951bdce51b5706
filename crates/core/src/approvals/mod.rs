//! Approval workflow engine: pure completion rules, progress reporting and
//! the [`ApprovalManager`] that drives them against the stores.

pub mod manager;
pub mod policy;
pub mod progress;
pub mod rules;

pub use manager::{ApprovalManager, DecisionInput, SweepReport, WorkflowSnapshot};
pub use policy::{ExpiryPolicy, SequencingPolicy, WorkflowPolicy};
pub use progress::{ApprovalProgress, NextApprover};
pub use rules::{evaluate_completion, CompletionOutcome};
