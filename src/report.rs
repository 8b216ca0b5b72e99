//! Read-only view of the host for selection front-ends: device inventory plus
//! every VM with its declared vGPU requirement.

use serde::Serialize;

use crate::allocation::AllocationRequest;
use crate::error::AllocatorError;
use crate::gpu::inventory::Inventory;
use crate::session::Session;

#[derive(Debug, Clone, Serialize)]
pub struct VmSummary {
    pub vm_id: String,
    pub node: Option<String>,
    pub name: Option<String>,
    pub request: AllocationRequest,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostReport {
    pub devices: Inventory,
    pub vms: Vec<VmSummary>,
}

pub async fn build_report(session: &mut Session) -> Result<HostReport, AllocatorError> {
    let devices = session.inventory().await?.clone();
    let vms = session
        .vms()
        .await?
        .iter()
        .map(|vm| VmSummary {
            vm_id: vm.vm_id().to_string(),
            node: vm.node().map(str::to_string),
            name: vm.name().map(str::to_string),
            request: AllocationRequest::from_descriptor(vm),
        })
        .collect();
    Ok(HostReport { devices, vms })
}
