use thiserror::Error;

use crate::domain::request::RequestStatus;
use crate::flows::{FlowTransitionError, WorkflowOperation};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("cannot {} a request in status {}", operation.as_str(), from.as_str())]
    InvalidStateTransition { from: RequestStatus, operation: WorkflowOperation },
    #[error("`{actor}` is not allowed to {}", operation.as_str())]
    Unauthorized { actor: String, operation: WorkflowOperation },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("restricted privilege cannot raise fulfilled quantity from {current} to {requested}")]
    PrivilegeViolation { current: u32, requested: u32 },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

impl From<FlowTransitionError> for DomainError {
    fn from(value: FlowTransitionError) -> Self {
        match value {
            FlowTransitionError::InvalidTransition { state, operation } => {
                Self::InvalidStateTransition { from: state, operation }
            }
            FlowTransitionError::Unauthorized { caller, operation } => {
                Self::Unauthorized { actor: caller.0, operation }
            }
            FlowTransitionError::MissingRejectionReason => {
                Self::Validation("a rejection reason is required".to_owned())
            }
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    /// Stable machine-readable classification exposed to API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Domain(DomainError::InvalidStateTransition { .. }) => "invalid_state_transition",
            Self::Domain(DomainError::Unauthorized { .. }) => "unauthorized",
            Self::Domain(DomainError::Validation(_)) => "validation_error",
            Self::Domain(DomainError::PrivilegeViolation { .. }) => "privilege_violation",
            Self::Domain(DomainError::InvariantViolation(_)) => "invariant_violation",
            Self::NotFound { .. } => "not_found",
            Self::Persistence(_) => "persistence",
            Self::Configuration(_) => "configuration",
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Unprocessable { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("unprocessable: {message}")]
    Unprocessable { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Unprocessable { .. } => "The requested quantity exceeds what your role may set.",
            Self::Forbidden { .. } => "You are not allowed to perform this operation.",
            Self::NotFound { .. } => "The requested resource does not exist.",
            Self::Conflict { .. } => "The request is not in a state that allows this operation.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Unprocessable { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::Unprocessable { message, .. }
            | Self::Forbidden { message, .. }
            | Self::NotFound { message, .. }
            | Self::Conflict { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let message = value.to_string();
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::Validation(_))
            | ApplicationError::Domain(DomainError::InvariantViolation(_)) => {
                Self::BadRequest { message, correlation_id }
            }
            ApplicationError::Domain(DomainError::PrivilegeViolation { .. }) => {
                Self::Unprocessable { message, correlation_id }
            }
            ApplicationError::Domain(DomainError::Unauthorized { .. }) => {
                Self::Forbidden { message, correlation_id }
            }
            ApplicationError::Domain(DomainError::InvalidStateTransition { .. }) => {
                Self::Conflict { message, correlation_id }
            }
            ApplicationError::NotFound { .. } => Self::NotFound { message, correlation_id },
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(message) => Self::Internal { message, correlation_id },
        }
    }
}
