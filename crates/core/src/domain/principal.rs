use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Approver,
    FulfillmentManager,
    Requester,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Approver => "approver",
            Self::FulfillmentManager => "fulfillment_manager",
            Self::Requester => "requester",
        }
    }

    /// Accepts the canonical names plus the labels used by the warehouse staff.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" | "administrator" => Some(Self::Admin),
            "approver" | "aprovador" => Some(Self::Approver),
            "fulfillment_manager" | "manager" | "gerente" => Some(Self::FulfillmentManager),
            "requester" | "solicitante" => Some(Self::Requester),
            _ => None,
        }
    }

    /// Lower rank means broader authority.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Admin => 0,
            Self::Approver => 1,
            Self::FulfillmentManager => 2,
            Self::Requester => 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: UserId,
    pub display_name: String,
    pub roles: Vec<Role>,
    pub active: bool,
}

impl Principal {
    /// The single role that carries the most authority, used where an operation is
    /// parameterized by one role rather than a full capability set.
    pub fn effective_role(&self) -> Option<Role> {
        if !self.active {
            return None;
        }
        self.roles.iter().copied().min_by_key(Role::rank)
    }
}

#[cfg(test)]
mod tests {
    use super::{Principal, Role, UserId};

    #[test]
    fn role_parse_accepts_staff_aliases() {
        assert_eq!(Role::parse("Gerente"), Some(Role::FulfillmentManager));
        assert_eq!(Role::parse(" approver "), Some(Role::Approver));
        assert_eq!(Role::parse("solicitante"), Some(Role::Requester));
        assert_eq!(Role::parse("auditor"), None);
    }

    #[test]
    fn effective_role_prefers_broadest_authority() {
        let principal = Principal {
            id: UserId("u-1".to_string()),
            display_name: "Ana".to_string(),
            roles: vec![Role::Requester, Role::FulfillmentManager, Role::Approver],
            active: true,
        };
        assert_eq!(principal.effective_role(), Some(Role::Approver));

        let inactive = Principal { active: false, ..principal };
        assert_eq!(inactive.effective_role(), None);
    }
}
