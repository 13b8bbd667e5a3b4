//! The material-request workflow service.
//!
//! [`RequestWorkflowService`] is built once at startup from repository, directory and
//! notification handles and then shared by reference with every interface that drives it.

pub mod service;

pub use service::{AdjustmentReceipt, FulfillmentInput, RequestWorkflowService, ReviewDecision};
