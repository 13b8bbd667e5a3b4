pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, MaterialRequestFlow};
pub use states::{
    FlowAction, FlowContext, FlowEvent, FlowType, TransitionOutcome, WorkflowOperation,
};
