//! Capability resolution for workflow callers.
//!
//! Every guard in the workflow asks a [`CapabilitySet`] a question instead of comparing role
//! names, so the role-to-permission table lives in exactly one place.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::principal::{Principal, Role, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    CreateRequests,
    ReviewRequests,
    FulfillRequests,
    AdjustQuantitiesUnrestricted,
    AdjustQuantitiesRestricted,
}

/// How far a caller may move a line's fulfilled quantity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityPrivilege {
    /// Any non-negative value, including above the requested quantity.
    Unrestricted,
    /// May only lower the current fulfilled quantity.
    Restricted,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    pub fn quantity_privilege(&self) -> Option<QuantityPrivilege> {
        if self.contains(Capability::AdjustQuantitiesUnrestricted) {
            Some(QuantityPrivilege::Unrestricted)
        } else if self.contains(Capability::AdjustQuantitiesRestricted) {
            Some(QuantityPrivilege::Restricted)
        } else {
            None
        }
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

pub fn role_capabilities(role: Role) -> &'static [Capability] {
    use Capability::{
        AdjustQuantitiesRestricted, AdjustQuantitiesUnrestricted, CreateRequests,
        FulfillRequests, ReviewRequests,
    };

    match role {
        Role::Admin | Role::Approver => {
            &[CreateRequests, ReviewRequests, FulfillRequests, AdjustQuantitiesUnrestricted]
        }
        Role::FulfillmentManager => &[CreateRequests, FulfillRequests, AdjustQuantitiesRestricted],
        Role::Requester => &[CreateRequests],
    }
}

pub fn capabilities_for(roles: &[Role]) -> CapabilitySet {
    roles.iter().flat_map(|role| role_capabilities(*role).iter().copied()).collect()
}

/// A resolved workflow caller: who is acting and what they may do.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub id: UserId,
    pub capabilities: CapabilitySet,
}

impl Caller {
    /// Inactive principals keep their identity but lose every capability.
    pub fn from_principal(principal: &Principal) -> Self {
        let capabilities = if principal.active {
            capabilities_for(&principal.roles)
        } else {
            CapabilitySet::default()
        };
        Self { id: principal.id.clone(), capabilities }
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }
}
