pub mod access;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod notifications;
pub mod quantities;

pub use access::{capabilities_for, Caller, Capability, CapabilitySet, QuantityPrivilege};
pub use domain::material::{Material, MaterialId};
pub use domain::principal::{Principal, Role, UserId};
pub use domain::request::{
    MaterialRequest, NewLineItem, RequestFilter, RequestId, RequestItemId, RequestLineItem,
    RequestPage, RequestStatus, UnitId,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{FlowEngine, FlowEvent, MaterialRequestFlow, WorkflowOperation};
pub use notifications::{NotificationDispatcher, NotificationSender, RequestNotification};
pub use quantities::FulfilledQuantity;
