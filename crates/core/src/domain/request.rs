use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::material::MaterialId;
use crate::domain::principal::UserId;
use crate::errors::DomainError;
use crate::flows::states::{FlowAction, TransitionOutcome};
use crate::quantities::{self, FulfilledQuantity};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestItemId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Fulfilled,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Fulfilled => "fulfilled",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" | "pendente" => Some(Self::Pending),
            "approved" | "aprovada" => Some(Self::Approved),
            "rejected" | "rejeitada" => Some(Self::Rejected),
            "fulfilled" | "atendida" => Some(Self::Fulfilled),
            "cancelled" | "canceled" | "cancelada" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Fulfilled | Self::Cancelled)
    }

    /// Fulfilled quantities stay editable until the request leaves the review/fulfillment path.
    pub fn allows_quantity_edits(&self) -> bool {
        matches!(self, Self::Pending | Self::Approved)
    }

    fn is_reviewed(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Fulfilled)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLineItem {
    pub material_id: MaterialId,
    pub quantity: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLineItem {
    pub id: RequestItemId,
    pub request_id: RequestId,
    pub material_id: MaterialId,
    pub requested_quantity: u32,
    pub fulfilled_quantity: Option<u32>,
    pub updated_at: DateTime<Utc>,
}

impl RequestLineItem {
    /// Quantity that will leave the stockroom if nobody edits the line again.
    pub fn effective_fulfilled(&self) -> u32 {
        self.fulfilled_quantity.unwrap_or(self.requested_quantity)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialRequest {
    pub id: RequestId,
    pub requester_id: UserId,
    pub unit_id: UnitId,
    pub status: RequestStatus,
    pub notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub approver_id: Option<UserId>,
    pub fulfiller_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub fulfilled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<RequestLineItem>,
}

impl MaterialRequest {
    pub fn new(
        requester_id: UserId,
        unit_id: UnitId,
        notes: Option<String>,
        lines: Vec<NewLineItem>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if unit_id.0.trim().is_empty() {
            return Err(DomainError::Validation("unit id is required".to_string()));
        }
        if lines.is_empty() {
            return Err(DomainError::Validation(
                "a request needs at least one line item".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for line in &lines {
            if line.quantity == 0 {
                return Err(DomainError::Validation(format!(
                    "requested quantity for material `{}` must be positive",
                    line.material_id.0
                )));
            }
            if !seen.insert(&line.material_id) {
                return Err(DomainError::Validation(format!(
                    "material `{}` appears more than once in the request",
                    line.material_id.0
                )));
            }
        }

        let id = RequestId(format!("REQ-{}", Uuid::new_v4()));
        let items = lines
            .into_iter()
            .map(|line| RequestLineItem {
                id: RequestItemId(format!("ITM-{}", Uuid::new_v4())),
                request_id: id.clone(),
                material_id: line.material_id,
                requested_quantity: line.quantity,
                fulfilled_quantity: None,
                updated_at: now,
            })
            .collect();

        Ok(Self {
            id,
            requester_id,
            unit_id,
            status: RequestStatus::Pending,
            notes: notes.map(|value| value.trim().to_string()).filter(|value| !value.is_empty()),
            rejection_reason: None,
            approver_id: None,
            fulfiller_id: None,
            created_at: now,
            approved_at: None,
            fulfilled_at: None,
            updated_at: now,
            items,
        })
    }

    pub fn item(&self, id: &RequestItemId) -> Option<&RequestLineItem> {
        self.items.iter().find(|item| &item.id == id)
    }

    pub fn item_mut(&mut self, id: &RequestItemId) -> Option<&mut RequestLineItem> {
        self.items.iter_mut().find(|item| &item.id == id)
    }

    /// Applies a validated transition outcome to the aggregate.
    ///
    /// Callers work on a copy and only persist it when this returns `Ok`, so a failure here
    /// never leaves a half-applied request behind.
    pub fn apply_transition(
        &mut self,
        outcome: &TransitionOutcome,
        caller: &UserId,
        fulfillment: &[FulfilledQuantity],
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if outcome.from != self.status {
            return Err(DomainError::InvariantViolation(format!(
                "transition computed from {:?} but request {} is {:?}",
                outcome.from, self.id.0, self.status
            )));
        }

        for action in &outcome.actions {
            match action {
                FlowAction::StampApproval => {
                    self.approved_at = Some(now);
                    self.approver_id = Some(caller.clone());
                }
                FlowAction::DefaultFulfilledQuantities => {
                    quantities::default_fulfilled_to_requested(&mut self.items, now);
                }
                FlowAction::RecordRejection { reason } => {
                    self.rejection_reason = Some(reason.clone());
                }
                FlowAction::StampFulfillment => {
                    self.fulfilled_at = Some(now);
                    self.fulfiller_id = Some(caller.clone());
                }
                FlowAction::ApplyFulfilledQuantities => {
                    quantities::apply_fulfillment(self, fulfillment, now)?;
                }
                FlowAction::NotifyApproved | FlowAction::NotifyRejected => {}
            }
        }

        self.status = outcome.to;
        self.updated_at = now;
        self.check_invariants()
    }

    pub fn check_invariants(&self) -> Result<(), DomainError> {
        if self.approved_at.is_some() != self.status.is_reviewed() {
            return Err(DomainError::InvariantViolation(format!(
                "approval timestamp does not match status {:?} on request {}",
                self.status, self.id.0
            )));
        }

        if self.fulfilled_at.is_some() != (self.status == RequestStatus::Fulfilled) {
            return Err(DomainError::InvariantViolation(format!(
                "fulfillment timestamp does not match status {:?} on request {}",
                self.status, self.id.0
            )));
        }

        let has_reason =
            self.rejection_reason.as_deref().is_some_and(|reason| !reason.trim().is_empty());
        if has_reason != (self.status == RequestStatus::Rejected) {
            return Err(DomainError::InvariantViolation(format!(
                "rejection reason does not match status {:?} on request {}",
                self.status, self.id.0
            )));
        }

        if self.items.is_empty() {
            return Err(DomainError::InvariantViolation(format!(
                "request {} has no line items",
                self.id.0
            )));
        }

        Ok(())
    }
}

/// Listing criteria. `created_from`/`created_to` are both inclusive.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub unit_id: Option<UnitId>,
    pub requester_id: Option<UserId>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub page: u32,
    pub page_size: u32,
}

impl RequestFilter {
    pub fn page(&self) -> u32 {
        self.page.max(1)
    }

    pub fn page_size(&self) -> u32 {
        match self.page_size {
            0 => DEFAULT_PAGE_SIZE,
            size => size.min(MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.page_size())
    }

    pub fn matches(&self, request: &MaterialRequest) -> bool {
        if self.status.is_some_and(|status| status != request.status) {
            return false;
        }
        if self.unit_id.as_ref().is_some_and(|unit_id| unit_id != &request.unit_id) {
            return false;
        }
        if self.requester_id.as_ref().is_some_and(|requester| requester != &request.requester_id)
        {
            return false;
        }
        if self.created_from.is_some_and(|from| request.created_at < from) {
            return false;
        }
        if self.created_to.is_some_and(|to| request.created_at > to) {
            return false;
        }
        true
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPage {
    pub items: Vec<MaterialRequest>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{
        MaterialRequest, NewLineItem, RequestFilter, RequestStatus, UnitId, MAX_PAGE_SIZE,
    };
    use crate::domain::material::MaterialId;
    use crate::domain::principal::UserId;
    use crate::errors::DomainError;

    fn line(material: &str, quantity: u32) -> NewLineItem {
        NewLineItem { material_id: MaterialId(material.to_string()), quantity }
    }

    fn pending() -> MaterialRequest {
        MaterialRequest::new(
            UserId("u-requester".to_string()),
            UnitId("unit-north".to_string()),
            Some("  for the night shift ".to_string()),
            vec![line("7", 3), line("9", 1)],
            Utc::now(),
        )
        .expect("valid request")
    }

    #[test]
    fn new_request_starts_pending_with_unset_fulfillment() {
        let request = pending();

        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.notes.as_deref(), Some("for the night shift"));
        assert_eq!(request.items.len(), 2);
        assert!(request.items.iter().all(|item| item.fulfilled_quantity.is_none()));
        assert!(request.items.iter().all(|item| item.request_id == request.id));
        request.check_invariants().expect("fresh request satisfies invariants");
    }

    #[test]
    fn new_request_rejects_empty_zero_and_duplicate_lines() {
        let build = |lines| {
            MaterialRequest::new(
                UserId("u".to_string()),
                UnitId("unit".to_string()),
                None,
                lines,
                Utc::now(),
            )
        };

        assert!(matches!(build(vec![]), Err(DomainError::Validation(_))));
        assert!(matches!(build(vec![line("7", 0)]), Err(DomainError::Validation(_))));
        assert!(matches!(build(vec![line("7", 1), line("7", 2)]), Err(DomainError::Validation(_))));
    }

    #[test]
    fn invariants_catch_timestamp_drift() {
        let mut request = pending();
        request.approved_at = Some(Utc::now());

        assert!(matches!(request.check_invariants(), Err(DomainError::InvariantViolation(_))));
    }

    #[test]
    fn filter_clamps_paging_and_matches_date_range() {
        let request = pending();
        let filter = RequestFilter { page: 0, page_size: 500, ..RequestFilter::default() };
        assert_eq!(filter.page(), 1);
        assert_eq!(filter.page_size(), MAX_PAGE_SIZE);
        assert_eq!(filter.offset(), 0);

        let window = RequestFilter {
            created_from: Some(request.created_at - Duration::minutes(1)),
            created_to: Some(request.created_at),
            status: Some(RequestStatus::Pending),
            ..RequestFilter::default()
        };
        assert!(window.matches(&request));

        let later = RequestFilter {
            created_from: Some(request.created_at + Duration::seconds(1)),
            ..RequestFilter::default()
        };
        assert!(!later.matches(&request));
    }

    #[test]
    fn status_parse_accepts_portuguese_labels() {
        assert_eq!(RequestStatus::parse("ATENDIDA"), Some(RequestStatus::Fulfilled));
        assert_eq!(RequestStatus::parse("pending"), Some(RequestStatus::Pending));
        assert!(RequestStatus::Cancelled.is_terminal());
        assert!(RequestStatus::Approved.allows_quantity_edits());
        assert!(!RequestStatus::Fulfilled.allows_quantity_edits());
    }
}
