pub mod assignment;
pub mod branch;
pub mod equipment;
pub mod repair;
pub mod role;
pub mod transition;
