//! Central authorization and branch-scoping rules.
//!
//! Every workflow operation resolves the caller once and asks [`AccessPolicy`]
//! whether the action is allowed. Role and branch are explicit inputs; nothing
//! here reads a global "current user".

use serde::{Deserialize, Serialize};

use crate::domain::assignment::UserBranchAssignment;
use crate::domain::branch::BranchId;
use crate::domain::repair::RepairRequest;
use crate::domain::role::{effective_grant, Role, RoleGrant, UserId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: UserId,
    pub role: Option<Role>,
    pub branch_id: Option<BranchId>,
}

impl Caller {
    pub fn anonymous_role(user_id: UserId) -> Self {
        Self { user_id, role: None, branch_id: None }
    }

    /// Builds the caller from whatever the role directory holds for the user.
    pub fn from_grants(user_id: UserId, grants: &[RoleGrant]) -> Self {
        match effective_grant(grants) {
            Some(grant) => {
                Self { user_id, role: Some(grant.role), branch_id: grant.branch_id.clone() }
            }
            None => Self::anonymous_role(user_id),
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.role == Some(role)
    }

    fn in_branch(&self, branch_id: &BranchId) -> bool {
        self.branch_id.as_ref() == Some(branch_id)
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Action<'a> {
    CreateRequest,
    DecideRequest(&'a RepairRequest),
    UpdateJob(&'a RepairRequest),
    ViewRequest(&'a RepairRequest),
    FileAssignment,
    DecideAssignment(&'a UserBranchAssignment),
    ViewAssignment(&'a UserBranchAssignment),
}

impl Action<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateRequest => "create_request",
            Self::DecideRequest(_) => "decide_request",
            Self::UpdateJob(_) => "update_job",
            Self::ViewRequest(_) => "view_request",
            Self::FileAssignment => "file_assignment",
            Self::DecideAssignment(_) => "decide_assignment",
            Self::ViewAssignment(_) => "view_assignment",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccessDenial {
    Unauthenticated,
    MissingRole { required: Vec<Role>, actual: Option<Role> },
    BranchMismatch { required: BranchId, actual: Option<BranchId> },
    NotVisible { user_id: UserId },
}

impl AccessDenial {
    fn reason(&self) -> String {
        match self {
            Self::Unauthenticated => "caller is not authenticated".to_owned(),
            Self::MissingRole { required, actual } => {
                let required =
                    required.iter().map(|role| role.as_str()).collect::<Vec<_>>().join(" or ");
                let actual = actual.map(|role| role.as_str()).unwrap_or("no role");
                format!("requires role {required}, caller has {actual}")
            }
            Self::BranchMismatch { required, actual } => {
                let actual = actual.as_ref().map(|branch| branch.0.as_str()).unwrap_or("none");
                format!("caller branch `{actual}` does not match branch `{}`", required.0)
            }
            Self::NotVisible { user_id } => {
                format!("record is not visible to `{}`", user_id.0)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: String,
    pub denial: Option<AccessDenial>,
}

impl AccessDecision {
    fn allow(reason: impl Into<String>) -> Self {
        Self { allowed: true, reason: reason.into(), denial: None }
    }

    fn deny(denial: AccessDenial) -> Self {
        Self { allowed: false, reason: denial.reason(), denial: Some(denial) }
    }

    pub fn into_result(self) -> Result<(), DomainError> {
        if self.allowed {
            Ok(())
        } else {
            Err(DomainError::Authorization(self.reason))
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    /// When set, IT-unit callers only service requests of their own branch.
    pub it_unit_branch_scoped: bool,
}

impl AccessPolicy {
    pub fn authorize(&self, caller: &Caller, action: Action<'_>) -> AccessDecision {
        if caller.user_id.is_blank() {
            return AccessDecision::deny(AccessDenial::Unauthenticated);
        }

        match action {
            Action::CreateRequest | Action::FileAssignment => {
                AccessDecision::allow("any authenticated caller")
            }
            Action::DecideRequest(request) => {
                if caller.has_role(Role::Admin) {
                    return AccessDecision::allow("admin decides across branches");
                }
                if !caller.has_role(Role::BranchHead) {
                    return missing_role(caller, &[Role::BranchHead, Role::Admin]);
                }
                if !caller.in_branch(&request.branch_id) {
                    return branch_mismatch(caller, &request.branch_id);
                }
                AccessDecision::allow("branch head of the request branch")
            }
            Action::UpdateJob(request) => {
                if caller.has_role(Role::Admin) {
                    return AccessDecision::allow("admin services any request");
                }
                if !caller.has_role(Role::ItUnit) {
                    return missing_role(caller, &[Role::ItUnit, Role::Admin]);
                }
                if self.it_unit_branch_scoped && !caller.in_branch(&request.branch_id) {
                    return branch_mismatch(caller, &request.branch_id);
                }
                AccessDecision::allow("it unit")
            }
            Action::ViewRequest(request) => self.view_request(caller, request),
            Action::DecideAssignment(_) => {
                if caller.has_role(Role::Admin) {
                    AccessDecision::allow("admin")
                } else {
                    missing_role(caller, &[Role::Admin])
                }
            }
            Action::ViewAssignment(assignment) => {
                if caller.has_role(Role::Admin) || caller.user_id == assignment.user_id {
                    AccessDecision::allow("admin or assignment owner")
                } else {
                    AccessDecision::deny(AccessDenial::NotVisible {
                        user_id: caller.user_id.clone(),
                    })
                }
            }
        }
    }

    /// Read visibility. Creators always see their own requests.
    fn view_request(&self, caller: &Caller, request: &RepairRequest) -> AccessDecision {
        if caller.user_id == request.requested_by {
            return AccessDecision::allow("requester");
        }

        let visible = match caller.role {
            Some(Role::Admin) => true,
            Some(Role::BranchHead) => caller.in_branch(&request.branch_id),
            Some(Role::ItUnit) => {
                request.status.kind().is_past_approval()
                    && (!self.it_unit_branch_scoped || caller.in_branch(&request.branch_id))
            }
            Some(Role::Officer) | Some(Role::User) | None => false,
        };

        if visible {
            AccessDecision::allow("role visibility")
        } else {
            AccessDecision::deny(AccessDenial::NotVisible { user_id: caller.user_id.clone() })
        }
    }

    pub fn can_view(&self, caller: &Caller, request: &RepairRequest) -> bool {
        self.authorize(caller, Action::ViewRequest(request)).allowed
    }
}

fn missing_role(caller: &Caller, required: &[Role]) -> AccessDecision {
    AccessDecision::deny(AccessDenial::MissingRole {
        required: required.to_vec(),
        actual: caller.role,
    })
}

fn branch_mismatch(caller: &Caller, required: &BranchId) -> AccessDecision {
    AccessDecision::deny(AccessDenial::BranchMismatch {
        required: required.clone(),
        actual: caller.branch_id.clone(),
    })
}
