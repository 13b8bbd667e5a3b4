use serde::{Deserialize, Serialize};

use crate::access::CapabilitySet;
use crate::domain::principal::UserId;
use crate::domain::request::RequestStatus;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowType {
    MaterialRequest,
}

/// Operations a caller can attempt against a request. Used for transition events as well as
/// error reporting for the non-transition operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowOperation {
    Create,
    Approve,
    Reject,
    Cancel,
    Fulfill,
    AdjustQuantity,
}

impl WorkflowOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Cancel => "cancel",
            Self::Fulfill => "fulfill",
            Self::AdjustQuantity => "adjust_quantity",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    Approve,
    Reject { reason: Option<String> },
    Cancel,
    Fulfill,
}

impl FlowEvent {
    pub fn operation(&self) -> WorkflowOperation {
        match self {
            Self::Approve => WorkflowOperation::Approve,
            Self::Reject { .. } => WorkflowOperation::Reject,
            Self::Cancel => WorkflowOperation::Cancel,
            Self::Fulfill => WorkflowOperation::Fulfill,
        }
    }
}

/// Everything the transition guards need to know about the caller and the request owner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowContext {
    pub caller_id: UserId,
    pub capabilities: CapabilitySet,
    pub requester_id: UserId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    StampApproval,
    DefaultFulfilledQuantities,
    RecordRejection { reason: String },
    StampFulfillment,
    ApplyFulfilledQuantities,
    NotifyApproved,
    NotifyRejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: RequestStatus,
    pub to: RequestStatus,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}
