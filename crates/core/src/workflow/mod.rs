pub mod engine;
pub mod states;

pub use engine::{
    apply_assignment_decision, apply_decision, apply_job_update, file_assignment, open_request,
};
pub use states::{
    AssignmentDecisionInput, AssignmentTransition, DecisionInput, JobUpdate, ListScope,
    RequestTransition,
};
