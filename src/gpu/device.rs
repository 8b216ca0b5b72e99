//! PCI device tree access.
//!
//! Each vGPU-capable device exposes two control files under
//! `<root>/<bus>/nvidia/`: `current_vgpu_type` (read/write occupancy) and
//! `creatable_vgpu_types` (read-only list of types the device can take).

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::AllocatorError;

/// Path the hypervisor uses to hand a device to QEMU.
pub const SYSFS_PCI_DEVICES: &str = "/sys/bus/pci/devices";

/// Occupancy value of a device with no vGPU type configured.
pub const UNOCCUPIED: &str = "0";

const VENDOR_DIR: &str = "nvidia";
const CURRENT_TYPE_FILE: &str = "current_vgpu_type";
const CREATABLE_TYPES_FILE: &str = "creatable_vgpu_types";

/// PCI bus address, e.g. `0000:01:00.4`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusAddress(String);

impl BusAddress {
    /// Accepts hex digits, `:` and `.` only.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && raw
                .chars()
                .all(|c| c.is_ascii_hexdigit() || c == ':' || c == '.');
        valid.then(|| Self(raw.to_string()))
    }

    /// Extract the bus address from a canonical `/sys/bus/pci/devices/<bus>` path.
    pub fn from_sysfs_path(path: &str) -> Option<Self> {
        path.strip_prefix(SYSFS_PCI_DEVICES)
            .and_then(|rest| rest.strip_prefix('/'))
            .map(|rest| rest.trim_end_matches('/'))
            .and_then(Self::parse)
    }

    /// The canonical sysfs path of this device.
    pub fn sysfs_path(&self) -> String {
        format!("{SYSFS_PCI_DEVICES}/{}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Numeric vGPU type id as used by the NVIDIA driver, e.g. `63`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VgpuTypeId(String);

impl VgpuTypeId {
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit());
        valid.then(|| Self(raw.to_string()))
    }

    /// Occupancy values are taken as-is; the driver is the authority on them.
    pub(crate) fn from_occupancy(raw: &str) -> Self {
        Self(raw.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VgpuTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current occupancy of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Occupancy {
    Free,
    Occupied(VgpuTypeId),
}

/// Result of writing the unoccupied sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deactivation {
    Deactivated,
    /// The device path is gone or not writable; nothing left to release.
    AlreadyDeallocated,
}

/// A creatable type line: `<id> : <description>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatableType {
    pub id: VgpuTypeId,
    pub description: String,
}

/// Handle on the host PCI device tree.
#[derive(Debug, Clone)]
pub struct DeviceTree {
    root: PathBuf,
}

impl DeviceTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of the device on this host.
    pub fn device_path(&self, bus: &BusAddress) -> PathBuf {
        self.root.join(bus.as_str())
    }

    fn occupancy_path(&self, bus: &BusAddress) -> PathBuf {
        self.device_path(bus).join(VENDOR_DIR).join(CURRENT_TYPE_FILE)
    }

    fn creatable_path(&self, bus: &BusAddress) -> PathBuf {
        self.device_path(bus).join(VENDOR_DIR).join(CREATABLE_TYPES_FILE)
    }

    pub async fn exists(&self, bus: &BusAddress) -> bool {
        fs::try_exists(self.device_path(bus)).await.unwrap_or(false)
    }

    /// Whether the device is bound to the NVIDIA driver.
    pub async fn has_vendor_binding(&self, bus: &BusAddress) -> bool {
        fs::metadata(self.device_path(bus).join(VENDOR_DIR))
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
    }

    pub async fn read_occupancy(&self, bus: &BusAddress) -> Result<Occupancy, AllocatorError> {
        let path = self.occupancy_path(bus);
        let raw = fs::read_to_string(&path)
            .await
            .map_err(|source| AllocatorError::DeviceRead { path, source })?;
        Ok(parse_occupancy(&raw))
    }

    pub async fn read_creatable(
        &self,
        bus: &BusAddress,
    ) -> Result<Vec<CreatableType>, AllocatorError> {
        let path = self.creatable_path(bus);
        let raw = fs::read_to_string(&path)
            .await
            .map_err(|source| AllocatorError::DeviceRead { path, source })?;
        Ok(parse_creatable(&raw))
    }

    /// Configure the device as the given vGPU type.
    pub async fn activate(
        &self,
        bus: &BusAddress,
        vgpu_type: &VgpuTypeId,
    ) -> Result<(), AllocatorError> {
        let path = self.occupancy_path(bus);
        write_control(&path, vgpu_type.as_str())
            .await
            .map_err(|source| AllocatorError::DeviceWrite {
                path: path.clone(),
                source,
            })?;
        info!(device = %bus, vgpu_type = %vgpu_type, "Activated vGPU");
        Ok(())
    }

    /// Release the device. A missing or forbidden path counts as already released.
    pub async fn deactivate(&self, bus: &BusAddress) -> Result<Deactivation, AllocatorError> {
        let path = self.occupancy_path(bus);
        match write_control(&path, UNOCCUPIED).await {
            Ok(()) => {
                debug!(device = %bus, "Deactivated vGPU");
                Ok(Deactivation::Deactivated)
            }
            Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
                info!(device = %bus, "vGPU already de-allocated");
                Ok(Deactivation::AlreadyDeallocated)
            }
            Err(source) => Err(AllocatorError::DeviceWrite { path, source }),
        }
    }
}

/// Control files take a single write of the whole value; the file is never created.
async fn write_control(path: &Path, value: &str) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .await?;
    file.write_all(value.as_bytes()).await?;
    file.flush().await
}

pub(crate) fn parse_occupancy(raw: &str) -> Occupancy {
    let value = raw.trim_end_matches(['\n', '\r']);
    if value == UNOCCUPIED {
        Occupancy::Free
    } else {
        Occupancy::Occupied(VgpuTypeId::from_occupancy(value))
    }
}

/// Parse `creatable_vgpu_types`, skipping blank lines and the `ID` header.
pub(crate) fn parse_creatable(raw: &str) -> Vec<CreatableType> {
    raw.lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with("ID"))
        .filter_map(|line| {
            let (id, description) = line.split_once(" : ").unwrap_or((line, ""));
            let id = VgpuTypeId::parse(id.trim())?;
            Some(CreatableType {
                id,
                description: description.trim().to_string(),
            })
        })
        .collect()
}
