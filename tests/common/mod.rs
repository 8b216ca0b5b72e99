//! Fake host: a PCI device tree and a Proxmox descriptor tree under a temp dir.

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use vgpu_allocator::config::Config;
use vgpu_allocator::Session;

pub const P40_TYPES: &str = "ID    : vGPU Name\n63    : GRID P40-1Q\n64    : GRID P40-2Q\n";

pub struct Host {
    pub tmp: TempDir,
    pub config: Arc<Config>,
}

impl Host {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let config = Config::rooted_at(tmp.path());
        fs::create_dir_all(&config.host.pci_devices).unwrap();
        fs::create_dir_all(&config.host.nodes_root).unwrap();
        fs::create_dir_all(&config.host.local_descriptors).unwrap();
        Self {
            tmp,
            config: Arc::new(config),
        }
    }

    pub fn session(&self) -> Session {
        Session::new(self.config.clone())
    }

    fn control_dir(&self, bus: &str) -> PathBuf {
        self.config.host.pci_devices.join(bus).join("nvidia")
    }

    /// Add an NVIDIA-bound device with the given occupancy and creatable types.
    pub fn add_device(&self, bus: &str, current: &str, creatable: &str) {
        let dir = self.control_dir(bus);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("current_vgpu_type"), current).unwrap();
        fs::write(dir.join("creatable_vgpu_types"), creatable).unwrap();
    }

    pub fn occupancy(&self, bus: &str) -> String {
        fs::read_to_string(self.control_dir(bus).join("current_vgpu_type")).unwrap()
    }

    fn descriptor_path(&self, vm_id: &str, node: Option<&str>) -> PathBuf {
        let file = format!("{vm_id}.conf");
        match node {
            Some(node) => self
                .config
                .host
                .nodes_root
                .join(node)
                .join("qemu-server")
                .join(file),
            None => self.config.host.local_descriptors.join(file),
        }
    }

    pub fn write_descriptor(&self, vm_id: &str, node: Option<&str>, text: &str) {
        let path = self.descriptor_path(vm_id, node);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    pub fn read_descriptor(&self, vm_id: &str, node: Option<&str>) -> String {
        fs::read_to_string(self.descriptor_path(vm_id, node)).unwrap()
    }
}

/// `args` value attaching the given devices.
pub fn vfio_args(buses: &[&str]) -> String {
    buses
        .iter()
        .map(|bus| format!("-device vfio-pci,sysfsdev=/sys/bus/pci/devices/{bus}"))
        .collect::<Vec<_>>()
        .join(" ")
}
