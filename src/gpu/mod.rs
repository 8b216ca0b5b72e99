//! NVIDIA vGPU device access.
//!
//! - [`device`]: bus addresses, type ids, control-file reads and writes
//! - [`inventory`]: device tree scan into free/occupied maps and the type catalog

pub mod device;
pub mod inventory;
