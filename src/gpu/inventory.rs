//! Device inventory scanner.
//!
//! Walks the PCI device tree and classifies every NVIDIA-bound device as free
//! (with the types it could be configured into) or occupied (with its current
//! type). The result is a snapshot; nothing is kept between processes.

use std::collections::BTreeMap;

use serde::Serialize;
use tokio::fs;
use tracing::{debug, info};

use crate::error::AllocatorError;
use crate::gpu::device::{BusAddress, DeviceTree, Occupancy, VgpuTypeId};

/// Every vGPU type seen on the host, with its driver description when known.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct VgpuTypeCatalog(BTreeMap<VgpuTypeId, String>);

impl VgpuTypeCatalog {
    fn observe(&mut self, id: VgpuTypeId, description: &str) {
        let entry = self.0.entry(id).or_default();
        if entry.is_empty() {
            *entry = description.to_string();
        }
    }

    pub fn contains(&self, id: &VgpuTypeId) -> bool {
        self.0.contains_key(id)
    }

    pub fn description(&self, id: &VgpuTypeId) -> Option<&str> {
        self.0.get(id).map(String::as_str)
    }

    /// Type ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &VgpuTypeId> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Snapshot of vGPU devices on this host. Maps are ordered by bus address.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Inventory {
    /// Free devices and the types each can be configured into, in driver order.
    pub free: BTreeMap<BusAddress, Vec<VgpuTypeId>>,

    /// Occupied devices and their current type.
    pub occupied: BTreeMap<BusAddress, VgpuTypeId>,

    /// All types seen across the host.
    pub catalog: VgpuTypeCatalog,
}

impl Inventory {
    /// First free device (bus-address order) that can take the given type.
    pub fn first_free_offering(&self, vgpu_type: &VgpuTypeId) -> Option<&BusAddress> {
        self.free
            .iter()
            .find(|(_, types)| types.contains(vgpu_type))
            .map(|(bus, _)| bus)
    }

    /// Whether `bus` is free and offers `vgpu_type`.
    pub fn offers(&self, bus: &BusAddress, vgpu_type: &VgpuTypeId) -> bool {
        self.free
            .get(bus)
            .is_some_and(|types| types.contains(vgpu_type))
    }

    pub fn device_count(&self) -> usize {
        self.free.len() + self.occupied.len()
    }
}

/// Scan the device tree.
///
/// An unreadable control file fails the whole scan: a device the driver
/// cannot describe is a driver fault, not a device to skip.
pub async fn scan(tree: &DeviceTree) -> Result<Inventory, AllocatorError> {
    let root = tree.root();
    let mut entries = fs::read_dir(root)
        .await
        .map_err(|source| AllocatorError::Io {
            path: root.to_path_buf(),
            source,
        })?;

    let mut inventory = Inventory::default();
    loop {
        let entry = entries
            .next_entry()
            .await
            .map_err(|source| AllocatorError::Io {
                path: root.to_path_buf(),
                source,
            })?;
        let Some(entry) = entry else { break };

        let name = entry.file_name();
        let Some(bus) = name.to_str().and_then(BusAddress::parse) else {
            continue;
        };
        if !tree.has_vendor_binding(&bus).await {
            continue;
        }

        match tree.read_occupancy(&bus).await? {
            Occupancy::Occupied(vgpu_type) => {
                debug!(device = %bus, vgpu_type = %vgpu_type, "Device occupied");
                inventory.catalog.observe(vgpu_type.clone(), "");
                inventory.occupied.insert(bus, vgpu_type);
            }
            Occupancy::Free => {
                let creatable = tree.read_creatable(&bus).await?;
                debug!(device = %bus, types = creatable.len(), "Device free");
                let mut ids = Vec::with_capacity(creatable.len());
                for ty in creatable {
                    inventory.catalog.observe(ty.id.clone(), &ty.description);
                    if !ids.contains(&ty.id) {
                        ids.push(ty.id);
                    }
                }
                inventory.free.insert(bus, ids);
            }
        }
    }

    info!(
        free = inventory.free.len(),
        occupied = inventory.occupied.len(),
        types = inventory.catalog.len(),
        "Scanned vGPU devices"
    );
    Ok(inventory)
}
