use thiserror::Error;

use crate::domain::task::TaskStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid task transition from {from:?} to {to:?}")]
    InvalidTaskTransition { from: TaskStatus, to: TaskStatus },
    #[error("invalid workflow configuration: {0}")]
    InvalidConfiguration(String),
    #[error("invalid delegation: {0}")]
    InvalidDelegation(String),
    #[error("task at sequence {sequence} is waiting on required approvals at sequence {blocking_sequence}")]
    OutOfSequence { sequence: i32, blocking_sequence: i32 },
}

/// Persistence failures surface through the engine unchanged.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),
    #[error("store decode failure: {0}")]
    Decode(String),
    /// The store refused a write that would break a domain rule.
    #[error(transparent)]
    Rejected(DomainError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("user `{user_id}` is not the assigned approver or delegate for task `{task_id}`")]
    Unauthorized { user_id: String, task_id: String },
    #[error("task `{task_id}` kept changing concurrently; retry the operation")]
    Conflict { task_id: String },
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ApplicationError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Rejected(domain) => Self::Domain(domain),
            other => Self::Store(other),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "This resource does not exist.",
            Self::Forbidden { .. } => "This action is not permitted.",
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::NotFound { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::BadRequest { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    /// Short stable tag for logs and CLI output.
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Domain(DomainError::InvalidTaskTransition { .. }) => "invalid_transition",
            Self::Domain(DomainError::InvalidConfiguration(_)) => "invalid_configuration",
            Self::Domain(DomainError::InvalidDelegation(_)) => "invalid_delegation",
            Self::Domain(DomainError::OutOfSequence { .. }) => "out_of_sequence",
            Self::NotFound { .. } => "not_found",
            Self::Unauthorized { .. } => "unauthorized",
            Self::Conflict { .. } => "conflict",
            Self::Store(_) => "store_failure",
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let message = value.to_string();
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::NotFound { .. } => Self::NotFound { message, correlation_id },
            ApplicationError::Unauthorized { .. } => Self::Forbidden { message, correlation_id },
            ApplicationError::Domain(_) => Self::BadRequest { message, correlation_id },
            ApplicationError::Conflict { .. } | ApplicationError::Store(_) => {
                Self::Internal { message, correlation_id }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, DomainError, InterfaceError, StoreError};

    #[test]
    fn not_found_maps_to_resource_missing_message() {
        let interface = ApplicationError::NotFound { entity: "task", id: "T-1".to_owned() }
            .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::NotFound { ref correlation_id, .. } if correlation_id == "req-1"
        ));
        assert_eq!(interface.user_message(), "This resource does not exist.");
    }

    #[test]
    fn unauthorized_maps_to_not_permitted_message() {
        let interface = ApplicationError::Unauthorized {
            user_id: "u-7".to_owned(),
            task_id: "T-1".to_owned(),
        }
        .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::Forbidden { .. }));
        assert_eq!(interface.user_message(), "This action is not permitted.");
    }

    #[test]
    fn domain_validation_maps_to_bad_request() {
        let interface = ApplicationError::from(DomainError::InvalidConfiguration(
            "workflow must name at least one approver".to_owned(),
        ))
        .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::BadRequest { .. }));
        assert_eq!(interface.correlation_id(), "req-3");
    }

    #[test]
    fn store_failure_maps_to_internal_and_keeps_message() {
        let error = ApplicationError::from(StoreError::Backend("database is locked".to_owned()));
        assert_eq!(error.error_class(), "store_failure");
        assert_eq!(error.to_string(), "store backend failure: database is locked");

        let interface = error.into_interface("req-4");
        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }

    #[test]
    fn store_rejection_surfaces_as_the_domain_error() {
        let rule = DomainError::InvalidConfiguration("approver `u-1` already has a task".to_owned());
        let error = ApplicationError::from(StoreError::Rejected(rule.clone()));
        assert_eq!(error, ApplicationError::Domain(rule));
        assert_eq!(error.error_class(), "invalid_configuration");
    }
}
