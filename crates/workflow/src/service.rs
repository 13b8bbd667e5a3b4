use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use almox_core::access::{capabilities_for, Caller, Capability};
use almox_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink,
};
use almox_core::domain::principal::{Role, UserId};
use almox_core::domain::request::{
    MaterialRequest, NewLineItem, RequestFilter, RequestId, RequestItemId, RequestLineItem,
    RequestPage, RequestStatus, UnitId,
};
use almox_core::errors::{ApplicationError, DomainError};
use almox_core::flows::{
    FlowAction, FlowContext, FlowEngine, FlowEvent, MaterialRequestFlow, WorkflowOperation,
};
use almox_core::notifications::{NotificationDispatcher, NotificationKind, RequestNotification};
use almox_core::quantities::{self, FulfilledQuantity};
use almox_db::repositories::{
    MaterialRepository, PrincipalDirectory, RepositoryError, RequestRepository,
};

/// Outcome of a review: exactly one of `Approved` or `Rejected`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub status: RequestStatus,
    #[serde(default)]
    pub rejection_reason: Option<String>,
}

impl ReviewDecision {
    pub fn approve() -> Self {
        Self { status: RequestStatus::Approved, rejection_reason: None }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self { status: RequestStatus::Rejected, rejection_reason: Some(reason.into()) }
    }

    fn into_event(self) -> Result<FlowEvent, DomainError> {
        match self.status {
            RequestStatus::Approved => Ok(FlowEvent::Approve),
            RequestStatus::Rejected => Ok(FlowEvent::Reject { reason: self.rejection_reason }),
            other => Err(DomainError::Validation(format!(
                "review decision must be approved or rejected, got {}",
                other.as_str()
            ))),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentInput {
    pub items: Vec<FulfilledQuantity>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentReceipt {
    pub success: bool,
    pub item: RequestLineItem,
}

/// Orchestrates the request lifecycle: loads the aggregate, asks the flow engine whether the
/// operation is allowed, applies the resulting actions, persists with a status-conditioned
/// write and only then hands notifications to the dispatcher.
pub struct RequestWorkflowService {
    requests: Arc<dyn RequestRepository>,
    materials: Arc<dyn MaterialRepository>,
    principals: Arc<dyn PrincipalDirectory>,
    notifications: NotificationDispatcher,
    audit: Arc<dyn AuditSink>,
    engine: FlowEngine<MaterialRequestFlow>,
}

impl RequestWorkflowService {
    pub fn new(
        requests: Arc<dyn RequestRepository>,
        materials: Arc<dyn MaterialRepository>,
        principals: Arc<dyn PrincipalDirectory>,
        notifications: NotificationDispatcher,
    ) -> Self {
        Self {
            requests,
            materials,
            principals,
            notifications,
            audit: Arc::new(TracingAuditSink),
            engine: FlowEngine::default(),
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn notifications(&self) -> &NotificationDispatcher {
        &self.notifications
    }

    pub async fn create_request(
        &self,
        requester_id: &UserId,
        unit_id: UnitId,
        items: Vec<NewLineItem>,
        notes: Option<String>,
    ) -> Result<MaterialRequest, ApplicationError> {
        let correlation_id = new_correlation_id();

        let caller = self.resolve_caller(requester_id).await?;
        if !caller.can(Capability::CreateRequests) {
            return Err(DomainError::Unauthorized {
                actor: requester_id.0.clone(),
                operation: WorkflowOperation::Create,
            }
            .into());
        }

        let request =
            MaterialRequest::new(requester_id.clone(), unit_id, notes, items, Utc::now())?;

        for item in &request.items {
            let material = self
                .materials
                .find_by_id(&item.material_id)
                .await
                .map_err(|error| persistence(error, WorkflowOperation::Create))?;
            match material {
                Some(material) if material.active => {}
                Some(_) => {
                    return Err(DomainError::Validation(format!(
                        "material `{}` is inactive",
                        item.material_id.0
                    ))
                    .into())
                }
                None => {
                    return Err(DomainError::Validation(format!(
                        "material `{}` does not exist",
                        item.material_id.0
                    ))
                    .into())
                }
            }
        }

        self.requests
            .insert(request.clone())
            .await
            .map_err(|error| persistence(error, WorkflowOperation::Create))?;

        self.audit.emit(
            AuditEvent::new(
                Some(request.id.clone()),
                correlation_id.clone(),
                "workflow.request_created",
                AuditCategory::Workflow,
                requester_id.0.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("unit_id", request.unit_id.0.clone())
            .with_metadata("items", request.items.len().to_string()),
        );
        info!(
            event_name = "workflow.request.created",
            correlation_id = %correlation_id,
            request_id = %request.id.0,
            requester_id = %requester_id.0,
            unit_id = %request.unit_id.0,
            items = request.items.len(),
            "material request created"
        );

        self.notify(NotificationKind::Created, &request, &correlation_id);
        Ok(request)
    }

    pub async fn list_requests(
        &self,
        filter: RequestFilter,
    ) -> Result<RequestPage, ApplicationError> {
        let (items, total) = self.requests.list(&filter).await.map_err(|error| {
            ApplicationError::Persistence(format!("failed to list requests: {error}"))
        })?;

        Ok(RequestPage { items, total, page: filter.page(), page_size: filter.page_size() })
    }

    pub async fn get_request(&self, id: &RequestId) -> Result<MaterialRequest, ApplicationError> {
        self.requests
            .find_by_id(id)
            .await
            .map_err(|error| {
                ApplicationError::Persistence(format!("failed to load request `{}`: {error}", id.0))
            })?
            .ok_or_else(|| ApplicationError::not_found("request", id.0.clone()))
    }

    pub async fn approve_or_reject(
        &self,
        id: &RequestId,
        decision: ReviewDecision,
        caller_id: &UserId,
    ) -> Result<MaterialRequest, ApplicationError> {
        let request = self.get_request(id).await?;
        let event = decision.into_event()?;
        self.transition(request, event, caller_id, &[]).await
    }

    pub async fn cancel(
        &self,
        id: &RequestId,
        caller_id: &UserId,
    ) -> Result<MaterialRequest, ApplicationError> {
        let request = self.get_request(id).await?;
        self.transition(request, FlowEvent::Cancel, caller_id, &[]).await
    }

    pub async fn fulfill(
        &self,
        id: &RequestId,
        input: FulfillmentInput,
        caller_id: &UserId,
    ) -> Result<MaterialRequest, ApplicationError> {
        let request = self.get_request(id).await?;
        self.transition(request, FlowEvent::Fulfill, caller_id, &input.items).await
    }

    /// Changes one line's fulfilled quantity while the request is still pending or approved.
    ///
    /// Unrestricted callers may go above the requested quantity; that is recorded as a
    /// `quantity.over_fulfilled` audit event rather than refused.
    pub async fn adjust_fulfilled_quantity(
        &self,
        item_id: &RequestItemId,
        new_quantity: u32,
        caller_role: Role,
    ) -> Result<AdjustmentReceipt, ApplicationError> {
        let operation = WorkflowOperation::AdjustQuantity;
        let correlation_id = new_correlation_id();

        let request = self
            .requests
            .find_by_item_id(item_id)
            .await
            .map_err(|error| persistence(error, operation))?
            .ok_or_else(|| ApplicationError::not_found("request item", item_id.0.clone()))?;

        if !request.status.allows_quantity_edits() {
            return Err(
                DomainError::InvalidStateTransition { from: request.status, operation }.into()
            );
        }

        let Some(privilege) = capabilities_for(&[caller_role]).quantity_privilege() else {
            return Err(DomainError::Unauthorized {
                actor: caller_role.as_str().to_owned(),
                operation,
            }
            .into());
        };

        let mut item = request
            .item(item_id)
            .cloned()
            .ok_or_else(|| ApplicationError::not_found("request item", item_id.0.clone()))?;
        let check = quantities::check_adjustment(&item, new_quantity, privilege)?;
        item.fulfilled_quantity = Some(check.new_quantity);
        item.updated_at = Utc::now();

        // Only this line is written.
        let request_id = request.id.clone();
        self.requests
            .update_item_quantity(&request_id, &item, request.status)
            .await
            .map_err(|error| persistence(error, operation))?;

        self.audit.emit(
            AuditEvent::new(
                Some(request_id.clone()),
                correlation_id.clone(),
                "quantity.adjusted",
                AuditCategory::Quantity,
                caller_role.as_str(),
                AuditOutcome::Success,
            )
            .with_metadata("item_id", item.id.0.clone())
            .with_metadata(
                "previous",
                check.previous.map(|value| value.to_string()).unwrap_or_else(|| "unset".to_owned()),
            )
            .with_metadata("new", check.new_quantity.to_string()),
        );

        if check.over_fulfilled {
            self.audit.emit(
                AuditEvent::new(
                    Some(request_id.clone()),
                    correlation_id.clone(),
                    "quantity.over_fulfilled",
                    AuditCategory::Quantity,
                    caller_role.as_str(),
                    AuditOutcome::Success,
                )
                .with_metadata("item_id", item.id.0.clone())
                .with_metadata("requested", item.requested_quantity.to_string())
                .with_metadata("fulfilled", check.new_quantity.to_string()),
            );
            warn!(
                event_name = "workflow.quantity.over_fulfilled",
                correlation_id = %correlation_id,
                request_id = %request_id.0,
                item_id = %item.id.0,
                requested = item.requested_quantity,
                fulfilled = check.new_quantity,
                role = caller_role.as_str(),
                "fulfilled quantity exceeds requested quantity"
            );
        }

        info!(
            event_name = "workflow.quantity.adjusted",
            correlation_id = %correlation_id,
            request_id = %request_id.0,
            item_id = %item.id.0,
            new_quantity = check.new_quantity,
            role = caller_role.as_str(),
            "fulfilled quantity adjusted"
        );

        Ok(AdjustmentReceipt { success: true, item })
    }

    /// The single most authoritative role of an active principal.
    pub async fn effective_role(&self, user_id: &UserId) -> Result<Role, ApplicationError> {
        let principal = self
            .principals
            .find_by_id(user_id)
            .await
            .map_err(|error| persistence(error, WorkflowOperation::AdjustQuantity))?;

        principal.and_then(|principal| principal.effective_role()).ok_or_else(|| {
            DomainError::Unauthorized {
                actor: user_id.0.clone(),
                operation: WorkflowOperation::AdjustQuantity,
            }
            .into()
        })
    }

    async fn transition(
        &self,
        request: MaterialRequest,
        event: FlowEvent,
        caller_id: &UserId,
        fulfillment: &[FulfilledQuantity],
    ) -> Result<MaterialRequest, ApplicationError> {
        let operation = event.operation();
        let correlation_id = new_correlation_id();
        let caller = self.resolve_caller(caller_id).await?;

        let context = FlowContext {
            caller_id: caller.id.clone(),
            capabilities: caller.capabilities.clone(),
            requester_id: request.requester_id.clone(),
        };
        let audit =
            AuditContext::new(Some(request.id.clone()), correlation_id.clone(), &caller_id.0);

        let outcome = self
            .engine
            .apply_with_audit(&request.status, &event, &context, self.audit.as_ref(), &audit)
            .map_err(|error| {
                warn!(
                    event_name = "workflow.transition.rejected",
                    correlation_id = %correlation_id,
                    request_id = %request.id.0,
                    operation = operation.as_str(),
                    caller_id = %caller_id.0,
                    error = %error,
                    "transition refused"
                );
                DomainError::from(error)
            })?;

        let mut updated = request.clone();
        let now = Utc::now();
        let persisted = match updated.apply_transition(&outcome, caller_id, fulfillment, now) {
            Ok(()) => self
                .requests
                .update(updated.clone(), outcome.from)
                .await
                .map_err(|error| persistence(error, operation)),
            Err(error) => Err(error.into()),
        };
        if let Err(error) = persisted {
            let reason = error.to_string();
            self.engine.record_rejected(operation, &reason, self.audit.as_ref(), &audit);
            warn!(
                event_name = "workflow.transition.rejected",
                correlation_id = %correlation_id,
                request_id = %request.id.0,
                operation = operation.as_str(),
                caller_id = %caller_id.0,
                error = %error,
                "transition not persisted"
            );
            return Err(error);
        }
        self.engine.record_applied(&outcome, self.audit.as_ref(), &audit);

        info!(
            event_name = transition_event_name(outcome.to),
            correlation_id = %correlation_id,
            request_id = %updated.id.0,
            caller_id = %caller_id.0,
            from = outcome.from.as_str(),
            to = outcome.to.as_str(),
            "request transitioned"
        );

        for action in &outcome.actions {
            match action {
                FlowAction::NotifyApproved => {
                    self.notify(NotificationKind::Approved, &updated, &correlation_id)
                }
                FlowAction::NotifyRejected => {
                    self.notify(NotificationKind::Rejected, &updated, &correlation_id)
                }
                _ => {}
            }
        }

        Ok(updated)
    }

    /// Unknown principals resolve to a caller without capabilities so that the guards, not
    /// the lookup, decide the error.
    async fn resolve_caller(&self, user_id: &UserId) -> Result<Caller, ApplicationError> {
        let principal = self.principals.find_by_id(user_id).await.map_err(|error| {
            ApplicationError::Persistence(format!(
                "failed to resolve principal `{}`: {error}",
                user_id.0
            ))
        })?;

        Ok(match principal {
            Some(principal) => Caller::from_principal(&principal),
            None => Caller { id: user_id.clone(), capabilities: Default::default() },
        })
    }

    fn notify(&self, kind: NotificationKind, request: &MaterialRequest, correlation_id: &str) {
        let notification = RequestNotification::new(kind, request.clone(), correlation_id);
        let outcome = self.notifications.submit(notification);
        info!(
            event_name = "workflow.notification.submitted",
            correlation_id = %correlation_id,
            request_id = %request.id.0,
            kind = kind.as_str(),
            outcome = ?outcome,
            "notification handed to dispatcher"
        );
    }
}

fn transition_event_name(to: RequestStatus) -> &'static str {
    match to {
        RequestStatus::Approved => "workflow.request.approved",
        RequestStatus::Rejected => "workflow.request.rejected",
        RequestStatus::Fulfilled => "workflow.request.fulfilled",
        RequestStatus::Cancelled => "workflow.request.cancelled",
        RequestStatus::Pending => "workflow.request.pending",
    }
}

/// A lost status race is reported the same way as any other transition from the wrong state.
fn persistence(error: RepositoryError, operation: WorkflowOperation) -> ApplicationError {
    match error {
        RepositoryError::StaleState { expected, .. } => {
            DomainError::InvalidStateTransition { from: expected, operation }.into()
        }
        other => ApplicationError::Persistence(other.to_string()),
    }
}

fn new_correlation_id() -> String {
    format!("wf-{}", Uuid::new_v4())
}
