use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::branch::BranchId;

/// Stable identifier issued by the external identity provider.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    BranchHead,
    ItUnit,
    Officer,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::BranchHead => "branch_head",
            Self::ItUnit => "it_unit",
            Self::Officer => "officer",
            Self::User => "user",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "branch_head" => Some(Self::BranchHead),
            "it_unit" => Some(Self::ItUnit),
            "officer" => Some(Self::Officer),
            "user" => Some(Self::User),
            _ => None,
        }
    }
}

/// One row of the role directory. A user's effective role is their most
/// recent grant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub user_id: UserId,
    pub role: Role,
    pub branch_id: Option<BranchId>,
    pub granted_by: Option<UserId>,
    pub granted_at: DateTime<Utc>,
}

/// Picks the effective grant out of everything the directory holds for a user.
pub fn effective_grant(grants: &[RoleGrant]) -> Option<&RoleGrant> {
    grants.iter().max_by_key(|grant| grant.granted_at)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{effective_grant, Role, RoleGrant, UserId};
    use crate::domain::branch::BranchId;

    #[test]
    fn role_storage_encoding_is_stable() {
        for role in [Role::Admin, Role::BranchHead, Role::ItUnit, Role::Officer, Role::User] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse(" Branch_Head "), Some(Role::BranchHead));
        assert_eq!(Role::parse("superuser"), None);
    }

    #[test]
    fn most_recent_grant_wins() {
        let now = Utc::now();
        let grant = |role, at| RoleGrant {
            user_id: UserId("u-1".to_owned()),
            role,
            branch_id: Some(BranchId("B1".to_owned())),
            granted_by: None,
            granted_at: at,
        };
        let grants =
            vec![grant(Role::Officer, now - Duration::hours(2)), grant(Role::BranchHead, now)];

        assert_eq!(effective_grant(&grants).map(|g| g.role), Some(Role::BranchHead));
        assert!(effective_grant(&[]).is_none());
    }
}
