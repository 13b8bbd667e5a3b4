//! Fulfilled-quantity reconciliation for request line items.
//!
//! Approval fills in quantities nobody touched yet, fulfillment overwrites them with what was
//! actually handed out, and individual adjustments are bounded by the caller's
//! [`QuantityPrivilege`].

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::access::QuantityPrivilege;
use crate::domain::request::{MaterialRequest, RequestItemId, RequestLineItem};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfilledQuantity {
    pub item_id: RequestItemId,
    pub fulfilled_quantity: u32,
}

/// Result of a quantity check, computed before anything is written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentCheck {
    pub previous: Option<u32>,
    pub new_quantity: u32,
    pub over_fulfilled: bool,
}

/// Items with an unset fulfilled quantity take the requested quantity; set ones are left alone.
pub fn default_fulfilled_to_requested(items: &mut [RequestLineItem], now: DateTime<Utc>) {
    for item in items.iter_mut().filter(|item| item.fulfilled_quantity.is_none()) {
        item.fulfilled_quantity = Some(item.requested_quantity);
        item.updated_at = now;
    }
}

pub fn validate_fulfillment(
    request: &MaterialRequest,
    fulfillment: &[FulfilledQuantity],
) -> Result<(), DomainError> {
    let mut seen = HashSet::new();
    for entry in fulfillment {
        if request.item(&entry.item_id).is_none() {
            return Err(DomainError::Validation(format!(
                "item `{}` does not belong to request `{}`",
                entry.item_id.0, request.id.0
            )));
        }
        if !seen.insert(&entry.item_id) {
            return Err(DomainError::Validation(format!(
                "item `{}` is listed more than once",
                entry.item_id.0
            )));
        }
    }
    Ok(())
}

/// Overwrites the supplied lines unconditionally. Validates the whole batch first so a bad
/// entry leaves every line untouched.
pub fn apply_fulfillment(
    request: &mut MaterialRequest,
    fulfillment: &[FulfilledQuantity],
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    validate_fulfillment(request, fulfillment)?;
    for entry in fulfillment {
        if let Some(item) = request.item_mut(&entry.item_id) {
            item.fulfilled_quantity = Some(entry.fulfilled_quantity);
            item.updated_at = now;
        }
    }
    Ok(())
}

pub fn check_adjustment(
    item: &RequestLineItem,
    new_quantity: u32,
    privilege: QuantityPrivilege,
) -> Result<AdjustmentCheck, DomainError> {
    if privilege == QuantityPrivilege::Restricted {
        let ceiling = item.effective_fulfilled();
        if new_quantity > ceiling {
            return Err(DomainError::PrivilegeViolation {
                current: ceiling,
                requested: new_quantity,
            });
        }
    }

    Ok(AdjustmentCheck {
        previous: item.fulfilled_quantity,
        new_quantity,
        over_fulfilled: new_quantity > item.requested_quantity,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{
        apply_fulfillment, check_adjustment, default_fulfilled_to_requested, FulfilledQuantity,
    };
    use crate::access::QuantityPrivilege;
    use crate::domain::material::MaterialId;
    use crate::domain::principal::UserId;
    use crate::domain::request::{
        MaterialRequest, NewLineItem, RequestItemId, RequestLineItem, UnitId,
    };
    use crate::errors::DomainError;

    fn request() -> MaterialRequest {
        MaterialRequest::new(
            UserId("u-requester".to_string()),
            UnitId("unit-a".to_string()),
            None,
            vec![
                NewLineItem { material_id: MaterialId("7".to_string()), quantity: 3 },
                NewLineItem { material_id: MaterialId("8".to_string()), quantity: 10 },
            ],
            Utc::now(),
        )
        .expect("valid request")
    }

    fn item(requested: u32, fulfilled: Option<u32>) -> RequestLineItem {
        let mut item = request().items.remove(0);
        item.requested_quantity = requested;
        item.fulfilled_quantity = fulfilled;
        item
    }

    #[test]
    fn defaulting_only_fills_unset_quantities() {
        let mut request = request();
        request.items[1].fulfilled_quantity = Some(4);

        default_fulfilled_to_requested(&mut request.items, Utc::now());

        assert_eq!(request.items[0].fulfilled_quantity, Some(3));
        assert_eq!(request.items[1].fulfilled_quantity, Some(4));
    }

    #[test]
    fn restricted_adjustment_cannot_raise_quantity() {
        let line = item(3, Some(3));

        let error = check_adjustment(&line, 5, QuantityPrivilege::Restricted)
            .expect_err("raising above current must fail");
        assert_eq!(error, DomainError::PrivilegeViolation { current: 3, requested: 5 });

        let lowered = check_adjustment(&line, 2, QuantityPrivilege::Restricted)
            .expect("lowering is allowed");
        assert_eq!(lowered.new_quantity, 2);
        assert_eq!(lowered.previous, Some(3));
        assert!(!lowered.over_fulfilled);
    }

    #[test]
    fn restricted_ceiling_falls_back_to_requested_when_unset() {
        let line = item(4, None);

        assert!(check_adjustment(&line, 4, QuantityPrivilege::Restricted).is_ok());
        assert!(matches!(
            check_adjustment(&line, 5, QuantityPrivilege::Restricted),
            Err(DomainError::PrivilegeViolation { current: 4, requested: 5 })
        ));
    }

    #[test]
    fn unrestricted_adjustment_flags_over_fulfillment() {
        let line = item(3, Some(3));

        let check = check_adjustment(&line, 9, QuantityPrivilege::Unrestricted)
            .expect("unrestricted accepts any value");
        assert!(check.over_fulfilled);

        let zero = check_adjustment(&line, 0, QuantityPrivilege::Unrestricted).expect("zero ok");
        assert!(!zero.over_fulfilled);
    }

    #[test]
    fn fulfillment_rejects_foreign_and_duplicate_items_without_mutation() {
        let mut request = request();
        let first = request.items[0].id.clone();

        let foreign = [FulfilledQuantity {
            item_id: RequestItemId("ITM-other".to_string()),
            fulfilled_quantity: 1,
        }];
        assert!(matches!(
            apply_fulfillment(&mut request, &foreign, Utc::now()),
            Err(DomainError::Validation(_))
        ));

        let duplicate = [
            FulfilledQuantity { item_id: first.clone(), fulfilled_quantity: 1 },
            FulfilledQuantity { item_id: first.clone(), fulfilled_quantity: 2 },
        ];
        assert!(matches!(
            apply_fulfillment(&mut request, &duplicate, Utc::now()),
            Err(DomainError::Validation(_))
        ));
        assert!(request.items.iter().all(|item| item.fulfilled_quantity.is_none()));

        let over = [FulfilledQuantity { item_id: first.clone(), fulfilled_quantity: 12 }];
        apply_fulfillment(&mut request, &over, Utc::now()).expect("no ceiling on fulfill");
        assert_eq!(request.item(&first).and_then(|item| item.fulfilled_quantity), Some(12));
    }
}
