use thiserror::Error;

use crate::access::Capability;
use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::principal::UserId;
use crate::domain::request::RequestStatus;
use crate::flows::states::{
    FlowAction, FlowContext, FlowEvent, FlowType, TransitionOutcome, WorkflowOperation,
};

pub trait FlowDefinition {
    fn flow_type(&self) -> FlowType;
    fn initial_state(&self) -> RequestStatus;
    fn transition(
        &self,
        current: &RequestStatus,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

#[derive(Clone, Debug, Default)]
pub struct MaterialRequestFlow;

impl FlowDefinition for MaterialRequestFlow {
    fn flow_type(&self) -> FlowType {
        FlowType::MaterialRequest
    }

    fn initial_state(&self) -> RequestStatus {
        RequestStatus::Pending
    }

    fn transition(
        &self,
        current: &RequestStatus,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_material_request(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn flow_type(&self) -> FlowType {
        self.flow.flow_type()
    }

    pub fn initial_state(&self) -> RequestStatus {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &RequestStatus,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    /// Runs the guards and audits a refusal. A successful outcome is not audited here: the
    /// caller records it with [`FlowEngine::record_applied`] once the new state is persisted.
    pub fn apply_with_audit<S>(
        &self,
        current: &RequestStatus,
        event: &FlowEvent,
        context: &FlowContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        if let Err(error) = &result {
            self.record_rejected(event.operation(), &error.to_string(), sink, audit);
        }
        result
    }

    pub fn record_applied<S>(&self, outcome: &TransitionOutcome, sink: &S, audit: &AuditContext)
    where
        S: AuditSink + ?Sized,
    {
        sink.emit(
            AuditEvent::new(
                audit.request_id.clone(),
                audit.correlation_id.clone(),
                "workflow.transition_applied",
                AuditCategory::Workflow,
                audit.actor.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("from", outcome.from.as_str())
            .with_metadata("to", outcome.to.as_str())
            .with_metadata("operation", outcome.event.operation().as_str()),
        );
    }

    pub fn record_rejected<S>(
        &self,
        operation: WorkflowOperation,
        reason: &str,
        sink: &S,
        audit: &AuditContext,
    ) where
        S: AuditSink + ?Sized,
    {
        sink.emit(
            AuditEvent::new(
                audit.request_id.clone(),
                audit.correlation_id.clone(),
                "workflow.transition_rejected",
                AuditCategory::Workflow,
                audit.actor.clone(),
                AuditOutcome::Rejected,
            )
            .with_metadata("operation", operation.as_str())
            .with_metadata("error", reason),
        );
    }
}

impl Default for FlowEngine<MaterialRequestFlow> {
    fn default() -> Self {
        Self::new(MaterialRequestFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state:?} using {operation:?}")]
    InvalidTransition { state: RequestStatus, operation: WorkflowOperation },
    #[error("caller `{}` may not {operation:?} this request", caller.0)]
    Unauthorized { caller: UserId, operation: WorkflowOperation },
    #[error("a rejection reason is required")]
    MissingRejectionReason,
}

/// Guards run in a fixed order: source state, then caller capability, then event payload.
fn transition_material_request(
    current: &RequestStatus,
    event: &FlowEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use FlowAction::{
        ApplyFulfilledQuantities, DefaultFulfilledQuantities, NotifyApproved, NotifyRejected,
        RecordRejection, StampApproval, StampFulfillment,
    };
    use RequestStatus::{Approved, Cancelled, Fulfilled, Pending, Rejected};

    let operation = event.operation();
    let invalid = || FlowTransitionError::InvalidTransition { state: *current, operation };
    let unauthorized =
        || FlowTransitionError::Unauthorized { caller: context.caller_id.clone(), operation };

    let (to, actions) = match (current, event) {
        (Pending, FlowEvent::Approve) => {
            if !context.capabilities.contains(Capability::ReviewRequests) {
                return Err(unauthorized());
            }
            (Approved, vec![StampApproval, DefaultFulfilledQuantities, NotifyApproved])
        }
        (Pending, FlowEvent::Reject { reason }) => {
            if !context.capabilities.contains(Capability::ReviewRequests) {
                return Err(unauthorized());
            }
            let reason = reason
                .as_deref()
                .map(str::trim)
                .filter(|reason| !reason.is_empty())
                .ok_or(FlowTransitionError::MissingRejectionReason)?;
            (
                Rejected,
                vec![
                    StampApproval,
                    RecordRejection { reason: reason.to_string() },
                    NotifyRejected,
                ],
            )
        }
        (Pending, FlowEvent::Cancel) => {
            if context.caller_id != context.requester_id {
                return Err(unauthorized());
            }
            (Cancelled, Vec::new())
        }
        (Approved, FlowEvent::Fulfill) => {
            if !context.capabilities.contains(Capability::FulfillRequests) {
                return Err(unauthorized());
            }
            (Fulfilled, vec![StampFulfillment, ApplyFulfilledQuantities])
        }
        _ => return Err(invalid()),
    };

    Ok(TransitionOutcome { from: *current, to, event: event.clone(), actions })
}

#[cfg(test)]
mod tests {
    use crate::access::capabilities_for;
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::principal::{Role, UserId};
    use crate::domain::request::{RequestId, RequestStatus};
    use crate::flows::engine::{
        FlowDefinition, FlowEngine, FlowTransitionError, MaterialRequestFlow,
    };
    use crate::flows::states::{FlowAction, FlowContext, FlowEvent, FlowType, WorkflowOperation};

    const ALL_STATES: [RequestStatus; 5] = [
        RequestStatus::Pending,
        RequestStatus::Approved,
        RequestStatus::Rejected,
        RequestStatus::Fulfilled,
        RequestStatus::Cancelled,
    ];

    fn context(caller: &str, roles: &[Role]) -> FlowContext {
        FlowContext {
            caller_id: UserId(caller.to_string()),
            capabilities: capabilities_for(roles),
            requester_id: UserId("u-requester".to_string()),
        }
    }

    fn reject(reason: Option<&str>) -> FlowEvent {
        FlowEvent::Reject { reason: reason.map(str::to_string) }
    }

    #[test]
    fn approve_path_stamps_defaults_and_notifies() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(
                &RequestStatus::Pending,
                &FlowEvent::Approve,
                &context("u-ap", &[Role::Approver]),
            )
            .expect("pending -> approved");

        assert_eq!(outcome.to, RequestStatus::Approved);
        assert_eq!(
            outcome.actions,
            vec![
                FlowAction::StampApproval,
                FlowAction::DefaultFulfilledQuantities,
                FlowAction::NotifyApproved
            ]
        );

        let fulfilled = engine
            .apply(&outcome.to, &FlowEvent::Fulfill, &context("u-mgr", &[Role::FulfillmentManager]))
            .expect("approved -> fulfilled");
        assert_eq!(fulfilled.to, RequestStatus::Fulfilled);
        assert!(fulfilled.actions.contains(&FlowAction::ApplyFulfilledQuantities));
    }

    #[test]
    fn reject_requires_a_non_blank_reason() {
        let engine = FlowEngine::default();
        let admin = context("u-admin", &[Role::Admin]);

        for reason in [None, Some(""), Some("   ")] {
            let error = engine
                .apply(&RequestStatus::Pending, &reject(reason), &admin)
                .expect_err("blank reason must fail");
            assert_eq!(error, FlowTransitionError::MissingRejectionReason);
        }

        let outcome = engine
            .apply(&RequestStatus::Pending, &reject(Some(" out of budget ")), &admin)
            .expect("pending -> rejected");
        assert_eq!(outcome.to, RequestStatus::Rejected);
        assert!(outcome
            .actions
            .contains(&FlowAction::RecordRejection { reason: "out of budget".to_string() }));
    }

    #[test]
    fn review_requires_review_capability() {
        let engine = FlowEngine::default();
        for roles in [&[Role::FulfillmentManager][..], &[Role::Requester][..], &[][..]] {
            let error = engine
                .apply(&RequestStatus::Pending, &FlowEvent::Approve, &context("u-x", roles))
                .expect_err("only approvers and admins review");
            assert!(matches!(
                error,
                FlowTransitionError::Unauthorized { operation: WorkflowOperation::Approve, .. }
            ));
        }
    }

    #[test]
    fn cancel_is_reserved_for_the_requester() {
        let engine = FlowEngine::default();

        let outcome = engine
            .apply(&RequestStatus::Pending, &FlowEvent::Cancel, &context("u-requester", &[]))
            .expect("requester cancels own request");
        assert_eq!(outcome.to, RequestStatus::Cancelled);
        assert!(outcome.actions.is_empty());

        let error = engine
            .apply(&RequestStatus::Pending, &FlowEvent::Cancel, &context("u-admin", &[Role::Admin]))
            .expect_err("admins cannot cancel on behalf of requester");
        assert!(matches!(error, FlowTransitionError::Unauthorized { .. }));
    }

    #[test]
    fn source_state_is_checked_before_capability_and_reason() {
        let engine = FlowEngine::default();
        let nobody = context("u-nobody", &[]);

        let error = engine
            .apply(&RequestStatus::Approved, &reject(None), &nobody)
            .expect_err("approved requests cannot be rejected");
        assert_eq!(
            error,
            FlowTransitionError::InvalidTransition {
                state: RequestStatus::Approved,
                operation: WorkflowOperation::Reject
            }
        );
    }

    #[test]
    fn only_the_documented_transitions_exist() {
        let engine = FlowEngine::default();
        let admin = FlowContext {
            caller_id: UserId("u-requester".to_string()),
            ..context("u-requester", &[Role::Admin])
        };
        let events =
            [FlowEvent::Approve, reject(Some("no stock")), FlowEvent::Cancel, FlowEvent::Fulfill];

        let mut allowed = Vec::new();
        for state in ALL_STATES {
            for event in &events {
                if let Ok(outcome) = engine.apply(&state, event, &admin) {
                    allowed.push((state, event.operation(), outcome.to));
                }
            }
        }

        assert_eq!(
            allowed,
            vec![
                (RequestStatus::Pending, WorkflowOperation::Approve, RequestStatus::Approved),
                (RequestStatus::Pending, WorkflowOperation::Reject, RequestStatus::Rejected),
                (RequestStatus::Pending, WorkflowOperation::Cancel, RequestStatus::Cancelled),
                (RequestStatus::Approved, WorkflowOperation::Fulfill, RequestStatus::Fulfilled),
            ]
        );
        assert_eq!(engine.initial_state(), RequestStatus::Pending);
        assert_eq!(engine.flow_type(), FlowType::MaterialRequest);
        assert_eq!(MaterialRequestFlow.flow_type(), FlowType::MaterialRequest);
    }

    #[test]
    fn guard_refusals_are_audited_and_successes_wait_for_the_caller() {
        let engine = FlowEngine::default();
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(Some(RequestId("REQ-9".to_owned())), "req-42", "u-ap");

        let outcome = engine
            .apply_with_audit(
                &RequestStatus::Pending,
                &FlowEvent::Approve,
                &context("u-ap", &[Role::Approver]),
                &sink,
                &audit,
            )
            .expect("transition should succeed");
        assert!(sink.events().is_empty(), "nothing is recorded before the caller persists");

        let _ = engine.apply_with_audit(
            &RequestStatus::Fulfilled,
            &FlowEvent::Approve,
            &context("u-ap", &[Role::Approver]),
            &sink,
            &audit,
        );
        engine.record_applied(&outcome, &sink, &audit);

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "workflow.transition_rejected");
        assert_eq!(events[0].metadata.get("operation").map(String::as_str), Some("approve"));
        assert_eq!(events[1].correlation_id, "req-42");
        assert_eq!(events[1].event_type, "workflow.transition_applied");
        assert_eq!(events[1].metadata.get("to").map(String::as_str), Some("approved"));
    }
}
