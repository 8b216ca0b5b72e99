//! Error taxonomy for the allocator.
//!
//! Every fatal condition ends the process with a non-zero exit code and a
//! human-readable message. Recoverable conditions (already assigned, already
//! de-allocated, no vGPU requirement) are outcome variants, not errors.

use std::path::PathBuf;

use thiserror::Error;

/// Exit code used when no free device offers the requested vGPU type.
pub const EXIT_NO_MATCHING_DEVICE: i32 = 404;

#[derive(Error, Debug)]
pub enum AllocatorError {
    #[error("{0}")]
    Usage(String),

    #[error("VM {vm_id} not found ({})", path.display())]
    DescriptorNotFound { vm_id: String, path: PathBuf },

    #[error("Malformed descriptor {}:{line_no}: expected `key: value`, got {line:?}", path.display())]
    MalformedDescriptor {
        path: PathBuf,
        line_no: usize,
        line: String,
    },

    #[error("VM {vm_id} has no smbios1 uuid to pass to the vGPU")]
    MissingUuid { vm_id: String },

    #[error("Specified vGPU not found, rerun the allocator or check the drivers: {}", path.display())]
    DeviceMissing { path: PathBuf },

    #[error("Failed to read {}: {source}", path.display())]
    DeviceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    DeviceWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No available NVIDIA vGPU offering type {vgpu_type}, are virtual functions enabled? (systemctl start nvidia-sriov)")]
    NoMatchingDevice { vgpu_type: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AllocatorError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            AllocatorError::NoMatchingDevice { .. } => EXIT_NO_MATCHING_DEVICE,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let err = AllocatorError::NoMatchingDevice {
            vgpu_type: "63".to_string(),
        };
        assert_eq!(err.exit_code(), 404);

        let err = AllocatorError::DescriptorNotFound {
            vm_id: "101".to_string(),
            path: PathBuf::from("/etc/pve/qemu-server/101.conf"),
        };
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("VM 101 not found"));
    }
}
