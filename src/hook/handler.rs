//! Lifecycle hook: activates a VM's vGPUs before start, releases them after stop.
//!
//! Pre-start checks every requested device first and only then writes, so a
//! typo in the second device does not leave the first one configured. Once
//! writing has started there is no rollback: a failed activation surfaces the
//! error and leaves earlier devices as they are.

use tracing::{debug, info};

use crate::allocation::AllocationRequest;
use crate::error::AllocatorError;
use crate::gpu::device::{Deactivation, DeviceTree};
use crate::hook::Phase;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// The VM declares no vGPU types or no devices.
    NoRequirement,
    /// Number of devices configured.
    Activated(usize),
    /// Number of devices released; paths already gone are not counted.
    Deactivated(usize),
    /// Phase this handler does not act on.
    Ignored,
}

/// Handle a hook call for `vm_id`.
///
/// `override_node` is the node the VM is migrating from; its descriptor is
/// read there instead of locally.
pub async fn run_hook(
    session: &Session,
    vm_id: &str,
    phase: &Phase,
    override_node: Option<&str>,
) -> Result<HookOutcome, AllocatorError> {
    let descriptor = session.store().load(vm_id, override_node).await?;
    let request = AllocationRequest::from_descriptor(&descriptor);
    if request.is_empty() {
        info!(vm_id, "VM does not require a vGPU");
        return Ok(HookOutcome::NoRequirement);
    }

    match phase {
        Phase::PreStart => pre_start(session.devices(), vm_id, &request).await,
        Phase::PostStop => post_stop(session.devices(), vm_id, &request).await,
        Phase::Other(name) => {
            debug!(vm_id, phase = %name, "Nothing to do for phase");
            Ok(HookOutcome::Ignored)
        }
    }
}

async fn pre_start(
    devices: &DeviceTree,
    vm_id: &str,
    request: &AllocationRequest,
) -> Result<HookOutcome, AllocatorError> {
    for device in &request.devices {
        if !devices.exists(device).await {
            return Err(AllocatorError::DeviceMissing {
                path: devices.device_path(device),
            });
        }
    }

    // Clear anything left behind by an unclean stop.
    for device in &request.devices {
        devices.deactivate(device).await?;
    }

    let mut activated = 0;
    for (device, vgpu_type) in request.pairs() {
        devices.activate(device, vgpu_type).await?;
        activated += 1;
    }

    info!(vm_id, devices = activated, "vGPUs ready");
    Ok(HookOutcome::Activated(activated))
}

async fn post_stop(
    devices: &DeviceTree,
    vm_id: &str,
    request: &AllocationRequest,
) -> Result<HookOutcome, AllocatorError> {
    let mut released = 0;
    for device in &request.devices {
        if devices.deactivate(device).await? == Deactivation::Deactivated {
            released += 1;
        }
    }
    info!(vm_id, devices = released, "vGPUs released");
    Ok(HookOutcome::Deactivated(released))
}
