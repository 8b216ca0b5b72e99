//! vGPU allocation.
//!
//! - [`request`]: the requirement a VM declares (types from tags, devices from args)
//! - [`engine`]: recording a device/type assignment in a descriptor

pub mod engine;
pub mod request;

pub use engine::{assign, check_offer, plan_assignment, AssignOutcome, AssignPlan};
pub use request::AllocationRequest;
