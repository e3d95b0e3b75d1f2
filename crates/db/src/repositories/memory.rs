use std::collections::HashMap;

use tokio::sync::RwLock;

use fixtrack_core::domain::assignment::{AssignmentId, AssignmentStatus, UserBranchAssignment};
use fixtrack_core::domain::branch::{Branch, BranchId};
use fixtrack_core::domain::equipment::{Equipment, EquipmentId};
use fixtrack_core::domain::repair::{RepairRequest, RepairRequestId};
use fixtrack_core::domain::role::{RoleGrant, UserId};
use fixtrack_core::domain::transition::{TransitionRecord, TransitionSubject};

use super::{
    AssignmentRepository, BranchRepository, EquipmentRepository, ExpectedState,
    RepairRequestRepository, RepositoryError, RequestFilter, RoleDirectory, TransitionLog,
};

#[derive(Default)]
struct StoreState {
    branches: HashMap<String, Branch>,
    equipment: HashMap<String, Equipment>,
    requests: HashMap<String, RepairRequest>,
    roles: HashMap<String, Vec<RoleGrant>>,
    assignments: HashMap<String, UserBranchAssignment>,
    transitions: Vec<TransitionRecord>,
}

impl StoreState {
    fn require_branch(&self, id: &BranchId) -> Result<(), RepositoryError> {
        if self.branches.contains_key(&id.0) {
            Ok(())
        } else {
            Err(RepositoryError::MissingReference(format!("branch `{}`", id.0)))
        }
    }
}

/// Process-local backend for tests and dry runs. One lock guards every
/// table, so multi-row writes are as atomic as their SQL counterparts.
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    state: RwLock<StoreState>,
}

#[async_trait::async_trait]
impl BranchRepository for InMemoryWorkflowStore {
    async fn find_by_id(&self, id: &BranchId) -> Result<Option<Branch>, RepositoryError> {
        Ok(self.state.read().await.branches.get(&id.0).cloned())
    }

    async fn list(&self) -> Result<Vec<Branch>, RepositoryError> {
        let mut branches: Vec<Branch> =
            self.state.read().await.branches.values().cloned().collect();
        branches.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(branches)
    }

    async fn save(&self, branch: Branch) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if state.branches.values().any(|other| other.code == branch.code && other.id != branch.id)
        {
            return Err(RepositoryError::Duplicate(format!("branch code `{}`", branch.code)));
        }
        state.branches.insert(branch.id.0.clone(), branch);
        Ok(())
    }
}

#[async_trait::async_trait]
impl EquipmentRepository for InMemoryWorkflowStore {
    async fn find_by_id(&self, id: &EquipmentId) -> Result<Option<Equipment>, RepositoryError> {
        Ok(self.state.read().await.equipment.get(&id.0).cloned())
    }

    async fn find_by_serial(&self, serial: &str) -> Result<Option<Equipment>, RepositoryError> {
        let serial = serial.trim();
        let state = self.state.read().await;
        Ok(state.equipment.values().find(|item| item.serial_number == serial).cloned())
    }

    async fn list_by_branch(
        &self,
        branch_id: &BranchId,
    ) -> Result<Vec<Equipment>, RepositoryError> {
        let state = self.state.read().await;
        let mut items: Vec<Equipment> =
            state.equipment.values().filter(|item| &item.branch_id == branch_id).cloned().collect();
        items.sort_by(|a, b| a.serial_number.cmp(&b.serial_number));
        Ok(items)
    }

    async fn save(&self, mut equipment: Equipment) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.require_branch(&equipment.branch_id)?;
        equipment.serial_number = equipment.serial_number.trim().to_owned();
        if state
            .equipment
            .values()
            .any(|other| other.serial_number == equipment.serial_number && other.id != equipment.id)
        {
            return Err(RepositoryError::Duplicate(format!(
                "serial number `{}`",
                equipment.serial_number
            )));
        }
        state.equipment.insert(equipment.id.0.clone(), equipment);
        Ok(())
    }
}

#[async_trait::async_trait]
impl RepairRequestRepository for InMemoryWorkflowStore {
    async fn find_by_id(
        &self,
        id: &RepairRequestId,
    ) -> Result<Option<RepairRequest>, RepositoryError> {
        Ok(self.state.read().await.requests.get(&id.0).cloned())
    }

    async fn list(&self, filter: &RequestFilter) -> Result<Vec<RepairRequest>, RepositoryError> {
        let state = self.state.read().await;
        let mut requests: Vec<RepairRequest> =
            state.requests.values().filter(|request| filter.matches(request)).cloned().collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.0.cmp(&a.id.0)));
        Ok(requests)
    }

    async fn insert(
        &self,
        request: &RepairRequest,
        record: &TransitionRecord,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.require_branch(&request.branch_id)?;
        if !state.equipment.contains_key(&request.equipment_id.0) {
            return Err(RepositoryError::MissingReference(format!(
                "equipment `{}`",
                request.equipment_id.0
            )));
        }
        if state.requests.contains_key(&request.id.0) {
            return Err(RepositoryError::Duplicate(format!("repair request `{}`", request.id.0)));
        }
        state.requests.insert(request.id.0.clone(), request.clone());
        state.transitions.push(record.clone());
        Ok(())
    }

    async fn update_if_current(
        &self,
        expected: ExpectedState,
        updated: &RepairRequest,
        record: &TransitionRecord,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let Some(stored) = state.requests.get_mut(&updated.id.0) else {
            return Ok(false);
        };
        if ExpectedState::of(stored) != expected {
            return Ok(false);
        }
        *stored = updated.clone();
        state.transitions.push(record.clone());
        Ok(true)
    }
}

#[async_trait::async_trait]
impl RoleDirectory for InMemoryWorkflowStore {
    async fn grants_for(&self, user_id: &UserId) -> Result<Vec<RoleGrant>, RepositoryError> {
        Ok(self.state.read().await.roles.get(&user_id.0).cloned().unwrap_or_default())
    }

    async fn set_role(&self, grant: &RoleGrant) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if let Some(branch_id) = &grant.branch_id {
            state.require_branch(branch_id)?;
        }
        state.roles.insert(grant.user_id.0.clone(), vec![grant.clone()]);
        Ok(())
    }
}

#[async_trait::async_trait]
impl AssignmentRepository for InMemoryWorkflowStore {
    async fn find_by_id(
        &self,
        id: &AssignmentId,
    ) -> Result<Option<UserBranchAssignment>, RepositoryError> {
        Ok(self.state.read().await.assignments.get(&id.0).cloned())
    }

    async fn list(
        &self,
        user_id: Option<&UserId>,
        status: Option<AssignmentStatus>,
    ) -> Result<Vec<UserBranchAssignment>, RepositoryError> {
        let state = self.state.read().await;
        let mut assignments: Vec<UserBranchAssignment> = state
            .assignments
            .values()
            .filter(|a| user_id.map_or(true, |user| &a.user_id == user))
            .filter(|a| status.map_or(true, |status| a.status == status))
            .cloned()
            .collect();
        assignments
            .sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.0.cmp(&a.id.0)));
        Ok(assignments)
    }

    async fn insert(
        &self,
        assignment: &UserBranchAssignment,
        record: &TransitionRecord,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.require_branch(&assignment.branch_id)?;
        if assignment.status == AssignmentStatus::Pending
            && state.assignments.values().any(|other| {
                other.user_id == assignment.user_id && other.status == AssignmentStatus::Pending
            })
        {
            return Err(RepositoryError::Duplicate(format!(
                "pending assignment for `{}`",
                assignment.user_id.0
            )));
        }
        state.assignments.insert(assignment.id.0.clone(), assignment.clone());
        state.transitions.push(record.clone());
        Ok(())
    }

    async fn decide_if_pending(
        &self,
        expected_version: u32,
        decided: &UserBranchAssignment,
        grant: Option<&RoleGrant>,
        record: &TransitionRecord,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let Some(stored) = state.assignments.get_mut(&decided.id.0) else {
            return Ok(false);
        };
        if stored.status != AssignmentStatus::Pending || stored.state_version != expected_version {
            return Ok(false);
        }
        *stored = decided.clone();
        if let Some(grant) = grant {
            state.roles.insert(grant.user_id.0.clone(), vec![grant.clone()]);
        }
        state.transitions.push(record.clone());
        Ok(true)
    }
}

#[async_trait::async_trait]
impl TransitionLog for InMemoryWorkflowStore {
    async fn list_for_subject(
        &self,
        subject: TransitionSubject,
        subject_id: &str,
    ) -> Result<Vec<TransitionRecord>, RepositoryError> {
        let state = self.state.read().await;
        let mut records: Vec<TransitionRecord> = state
            .transitions
            .iter()
            .filter(|record| record.subject == subject && record.subject_id == subject_id)
            .cloned()
            .collect();
        records.sort_by_key(|record| record.state_version);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use fixtrack_core::domain::branch::{Branch, BranchId};
    use fixtrack_core::domain::equipment::{Equipment, EquipmentCondition, EquipmentId};
    use fixtrack_core::domain::repair::{
        NewRepairRequest, RepairRequestId, RequestStatus, RequestType, Verdict,
    };
    use fixtrack_core::domain::role::UserId;
    use fixtrack_core::domain::transition::TransitionSubject;
    use fixtrack_core::workflow::{apply_decision, open_request, DecisionInput};

    use super::InMemoryWorkflowStore;
    use crate::repositories::{
        BranchRepository, EquipmentRepository, ExpectedState, RepairRequestRepository,
        RepositoryError, TransitionLog,
    };

    async fn seeded() -> InMemoryWorkflowStore {
        let store = InMemoryWorkflowStore::default();
        let now = Utc::now();
        BranchRepository::save(
            &store,
            Branch {
                id: BranchId("br-1".to_owned()),
                code: "NORTH".to_owned(),
                name: "North".to_owned(),
                created_at: now,
            },
        )
        .await
        .expect("branch");
        EquipmentRepository::save(
            &store,
            Equipment {
                id: EquipmentId("eq-1".to_owned()),
                serial_number: "SN-1".to_owned(),
                name: "Scanner".to_owned(),
                category: "scanner".to_owned(),
                brand: None,
                model: None,
                condition: EquipmentCondition::Good,
                branch_id: BranchId("br-1".to_owned()),
                created_at: now,
                updated_at: now,
            },
        )
        .await
        .expect("equipment");
        store
    }

    #[tokio::test]
    async fn conditional_update_applies_once() {
        let store = seeded().await;
        let created = open_request(
            RepairRequestId::generate(),
            UserId("officer-1".to_owned()),
            NewRepairRequest {
                equipment_id: EquipmentId("eq-1".to_owned()),
                branch_id: BranchId("br-1".to_owned()),
                request_type: RequestType::Damage,
                description: "Glass panel cracked in transit".to_owned(),
            },
            Utc::now(),
        )
        .expect("open");
        store.insert(&created.request, &created.record).await.expect("insert");

        let decided = apply_decision(
            &created.request,
            &DecisionInput { verdict: Verdict::Approved, notes: None },
            &UserId("head-1".to_owned()),
            Utc::now(),
        )
        .expect("decide");
        let expected = ExpectedState::of(&created.request);

        assert!(store.update_if_current(expected, &decided.request, &decided.record).await.expect("first"));
        assert!(!store.update_if_current(expected, &decided.request, &decided.record).await.expect("second"));

        let stored = RepairRequestRepository::find_by_id(&store, &created.request.id)
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(stored.status, RequestStatus::Approved { job: None });
        let history = store
            .list_for_subject(TransitionSubject::RepairRequest, &created.request.id.0)
            .await
            .expect("history");
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn equipment_requires_a_known_branch() {
        let store = InMemoryWorkflowStore::default();
        let now = Utc::now();
        let error = EquipmentRepository::save(
            &store,
            Equipment {
                id: EquipmentId("eq-9".to_owned()),
                serial_number: "SN-9".to_owned(),
                name: "Router".to_owned(),
                category: "network".to_owned(),
                brand: None,
                model: None,
                condition: EquipmentCondition::Poor,
                branch_id: BranchId("br-404".to_owned()),
                created_at: now,
                updated_at: now,
            },
        )
        .await
        .expect_err("missing branch");

        assert!(matches!(error, RepositoryError::MissingReference(_)));
    }
}
