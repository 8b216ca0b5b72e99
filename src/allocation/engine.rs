//! Allocation engine: records a device/type assignment in a VM descriptor.
//!
//! An assignment adds the vfio-pci device to `args` (with a `-uuid` taken from
//! `smbios1` so the mediated device gets a stable identity), registers the
//! lifecycle hook if none is set, and tags the VM with `nvidia-<type>`. The
//! devices themselves are only touched later, by the hook at VM start.

use tracing::info;

use crate::descriptor::file::KEY_HOOKSCRIPT;
use crate::descriptor::VmDescriptor;
use crate::error::AllocatorError;
use crate::gpu::device::{BusAddress, VgpuTypeId};
use crate::gpu::inventory::Inventory;
use crate::session::Session;

const UUID_FLAG: &str = "uuid";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOutcome {
    Assigned,
    /// The device was already in `args`; nothing was written.
    AlreadyAssigned,
}

/// The descriptor an assignment would produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignPlan {
    AlreadyAssigned,
    Updated(VmDescriptor),
}

/// Apply an assignment to a copy of `descriptor`.
pub fn plan_assignment(
    descriptor: &VmDescriptor,
    device: &BusAddress,
    vgpu_type: &VgpuTypeId,
    hookscript: &str,
) -> Result<AssignPlan, AllocatorError> {
    let mut args = descriptor.args();
    if args.has_vfio_device(device) {
        return Ok(AssignPlan::AlreadyAssigned);
    }
    args.push_vfio_device(device);

    if !args.has_flag(UUID_FLAG) {
        let uuid = descriptor
            .smbios_uuid()
            .ok_or_else(|| AllocatorError::MissingUuid {
                vm_id: descriptor.vm_id().to_string(),
            })?;
        args.push_flag(UUID_FLAG, &uuid);
    }

    let mut updated = descriptor.clone();
    updated.set_args(&args);

    if updated.hookscript().is_none() {
        updated.set(KEY_HOOKSCRIPT, hookscript);
    }

    let mut tags = updated.tags();
    tags.insert_vgpu_type(vgpu_type);
    updated.set_tags(&tags);

    Ok(AssignPlan::Updated(updated))
}

/// Fail unless `device` is free and can be configured as `vgpu_type`.
pub fn check_offer(
    inventory: &Inventory,
    device: &BusAddress,
    vgpu_type: &VgpuTypeId,
) -> Result<(), AllocatorError> {
    if inventory.offers(device, vgpu_type) {
        Ok(())
    } else {
        Err(AllocatorError::NoMatchingDevice {
            vgpu_type: vgpu_type.to_string(),
        })
    }
}

/// Assign `device` as `vgpu_type` to the VM's descriptor on `node`.
///
/// A device already in `args` short-circuits before the host is consulted.
/// Otherwise the device must be free and offer the type. The file is written
/// once, at the end, and only when something changed.
pub async fn assign(
    session: &mut Session,
    vm_id: &str,
    node: &str,
    device: &BusAddress,
    vgpu_type: &VgpuTypeId,
) -> Result<AssignOutcome, AllocatorError> {
    let descriptor = session.store().load_on_node(vm_id, node).await?;
    let hookscript = session.config().hook.hookscript.clone();

    match plan_assignment(&descriptor, device, vgpu_type, &hookscript)? {
        AssignPlan::AlreadyAssigned => {
            info!(vm_id, device = %device, "This GPU is already assigned to this VM");
            Ok(AssignOutcome::AlreadyAssigned)
        }
        AssignPlan::Updated(updated) => {
            check_offer(session.inventory().await?, device, vgpu_type)?;
            session.store().save(&updated).await?;
            session.invalidate();
            info!(vm_id, node, device = %device, vgpu_type = %vgpu_type, "Assigned vGPU");
            Ok(AssignOutcome::Assigned)
        }
    }
}
