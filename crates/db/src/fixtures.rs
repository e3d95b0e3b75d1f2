use chrono::Utc;
use serde::Serialize;

use fixtrack_core::domain::branch::{Branch, BranchId};
use fixtrack_core::domain::equipment::{Equipment, EquipmentCondition, EquipmentId};
use fixtrack_core::domain::role::{Role, RoleGrant, UserId};

use crate::repositories::{Repositories, RepositoryError};

struct SeedBranch {
    id: &'static str,
    code: &'static str,
    name: &'static str,
}

struct SeedEquipment {
    id: &'static str,
    serial: &'static str,
    name: &'static str,
    category: &'static str,
    brand: &'static str,
    branch: &'static str,
}

struct SeedUser {
    user_id: &'static str,
    role: Role,
    branch: Option<&'static str>,
}

const SEED_BRANCHES: &[SeedBranch] = &[
    SeedBranch { id: "branch-hq", code: "HQ", name: "Head Office" },
    SeedBranch { id: "branch-north", code: "NORTH", name: "North Regional Office" },
];

const SEED_EQUIPMENT: &[SeedEquipment] = &[
    SeedEquipment {
        id: "eq-hq-laptop-001",
        serial: "HQ-LT-0001",
        name: "ThinkPad T14",
        category: "laptop",
        brand: "Lenovo",
        branch: "branch-hq",
    },
    SeedEquipment {
        id: "eq-hq-printer-001",
        serial: "HQ-PR-0001",
        name: "LaserJet M404",
        category: "printer",
        brand: "HP",
        branch: "branch-hq",
    },
    SeedEquipment {
        id: "eq-north-desktop-001",
        serial: "NO-DT-0001",
        name: "OptiPlex 7010",
        category: "desktop",
        brand: "Dell",
        branch: "branch-north",
    },
];

const SEED_USERS: &[SeedUser] = &[
    SeedUser { user_id: "admin", role: Role::Admin, branch: None },
    SeedUser { user_id: "head-hq", role: Role::BranchHead, branch: Some("branch-hq") },
    SeedUser { user_id: "head-north", role: Role::BranchHead, branch: Some("branch-north") },
    SeedUser { user_id: "it-hq", role: Role::ItUnit, branch: Some("branch-hq") },
    SeedUser { user_id: "officer-hq", role: Role::Officer, branch: Some("branch-hq") },
];

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SeedResult {
    pub branches: usize,
    pub equipment: usize,
    pub users: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub ok: bool,
    pub missing: Vec<String>,
}

/// Demo reference data: two branches, a few assets, and one user per role.
/// Loading is idempotent.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub async fn load(repositories: &Repositories) -> Result<SeedResult, RepositoryError> {
        let now = Utc::now();
        let mut result = SeedResult::default();

        for seed in SEED_BRANCHES {
            let id = BranchId(seed.id.to_owned());
            let created_at =
                repositories.branches.find_by_id(&id).await?.map_or(now, |b| b.created_at);
            repositories
                .branches
                .save(Branch {
                    id,
                    code: seed.code.to_owned(),
                    name: seed.name.to_owned(),
                    created_at,
                })
                .await?;
            result.branches += 1;
        }

        for seed in SEED_EQUIPMENT {
            let id = EquipmentId(seed.id.to_owned());
            let created_at =
                repositories.equipment.find_by_id(&id).await?.map_or(now, |e| e.created_at);
            repositories
                .equipment
                .save(Equipment {
                    id,
                    serial_number: seed.serial.to_owned(),
                    name: seed.name.to_owned(),
                    category: seed.category.to_owned(),
                    brand: Some(seed.brand.to_owned()),
                    model: None,
                    condition: EquipmentCondition::Good,
                    branch_id: BranchId(seed.branch.to_owned()),
                    created_at,
                    updated_at: now,
                })
                .await?;
            result.equipment += 1;
        }

        for seed in SEED_USERS {
            repositories
                .roles
                .set_role(&RoleGrant {
                    user_id: UserId(seed.user_id.to_owned()),
                    role: seed.role,
                    branch_id: seed.branch.map(|branch| BranchId(branch.to_owned())),
                    granted_by: None,
                    granted_at: now,
                })
                .await?;
            result.users += 1;
        }

        tracing::info!(
            event_name = "system.seed.loaded",
            branches = result.branches,
            equipment = result.equipment,
            users = result.users,
            "demo seed data loaded"
        );
        Ok(result)
    }

    /// Reports seed records that are absent or whose user lost the seeded role.
    pub async fn verify(repositories: &Repositories) -> Result<VerificationResult, RepositoryError> {
        let mut missing = Vec::new();

        for seed in SEED_BRANCHES {
            if repositories.branches.find_by_id(&BranchId(seed.id.to_owned())).await?.is_none() {
                missing.push(format!("branch:{}", seed.id));
            }
        }
        for seed in SEED_EQUIPMENT {
            if repositories.equipment.find_by_serial(seed.serial).await?.is_none() {
                missing.push(format!("equipment:{}", seed.serial));
            }
        }
        for seed in SEED_USERS {
            let grants = repositories.roles.grants_for(&UserId(seed.user_id.to_owned())).await?;
            if !grants.iter().any(|grant| grant.role == seed.role) {
                missing.push(format!("role:{}:{}", seed.user_id, seed.role.as_str()));
            }
        }

        Ok(VerificationResult { ok: missing.is_empty(), missing })
    }
}
