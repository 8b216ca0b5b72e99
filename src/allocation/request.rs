//! The vGPU requirement a VM declares in its descriptor.

use serde::Serialize;

use crate::descriptor::VmDescriptor;
use crate::gpu::device::{BusAddress, VgpuTypeId};

/// Requested types (from `nvidia-<id>` tags) and devices (from vfio-pci `args`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AllocationRequest {
    /// Sorted type ids.
    pub types: Vec<VgpuTypeId>,
    /// Device bus addresses in `args` order.
    pub devices: Vec<BusAddress>,
}

impl AllocationRequest {
    pub fn from_descriptor(descriptor: &VmDescriptor) -> Self {
        Self {
            types: descriptor.tags().requested_types(),
            devices: descriptor.args().vfio_devices(),
        }
    }

    /// A VM without types or without devices asks for nothing.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty() || self.devices.is_empty()
    }

    /// Each device with its type; types repeat round-robin when there are fewer of them.
    pub fn pairs(&self) -> impl Iterator<Item = (&BusAddress, &VgpuTypeId)> {
        self.devices
            .iter()
            .enumerate()
            .filter_map(move |(i, device)| {
                let ty = self.types.get(i.checked_rem(self.types.len())?)?;
                Some((device, ty))
            })
    }
}
