//! vgpu-allocator: NVIDIA vGPU assignment for Proxmox VMs.
//!
//! Reads vGPU capability and occupancy from the PCI device tree, records
//! device/type assignments in VM descriptors, and, as the VM's hookscript,
//! configures the devices before the VM starts and releases them after it
//! stops. All state lives in the host filesystem.

pub mod allocation;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod gpu;
pub mod hook;
pub mod report;
pub mod session;

pub use error::AllocatorError;
pub use session::Session;
