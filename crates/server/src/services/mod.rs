//! Transactional operations shared by several endpoints.

pub mod payroll;
pub mod workflow;
