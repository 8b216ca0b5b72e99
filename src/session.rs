//! Per-invocation context.
//!
//! Holds the configuration and the host handles, and memoizes the device scan
//! and the VM list for the life of one process. Caches are dropped with
//! [`Session::invalidate`].

use std::sync::Arc;

use crate::config::Config;
use crate::descriptor::{DescriptorStore, VmDescriptor};
use crate::error::AllocatorError;
use crate::gpu::device::DeviceTree;
use crate::gpu::inventory::{self, Inventory};

pub struct Session {
    config: Arc<Config>,
    devices: DeviceTree,
    store: DescriptorStore,
    inventory: Option<Inventory>,
    vms: Option<Vec<VmDescriptor>>,
}

impl Session {
    pub fn new(config: Arc<Config>) -> Self {
        let devices = DeviceTree::new(config.host.pci_devices.clone());
        let store = DescriptorStore::new(&config.host);
        Self {
            config,
            devices,
            store,
            inventory: None,
            vms: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn devices(&self) -> &DeviceTree {
        &self.devices
    }

    pub fn store(&self) -> &DescriptorStore {
        &self.store
    }

    /// Device inventory, scanned on first use.
    pub async fn inventory(&mut self) -> Result<&Inventory, AllocatorError> {
        let scanned = match self.inventory.take() {
            Some(inventory) => inventory,
            None => inventory::scan(&self.devices).await?,
        };
        Ok(&*self.inventory.insert(scanned))
    }

    /// All VM descriptors in the cluster, listed on first use.
    pub async fn vms(&mut self) -> Result<&[VmDescriptor], AllocatorError> {
        let listed = match self.vms.take() {
            Some(vms) => vms,
            None => self.store.list_all().await?,
        };
        Ok(self.vms.insert(listed).as_slice())
    }

    pub fn invalidate(&mut self) {
        self.inventory = None;
        self.vms = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::fs;

    #[tokio::test]
    async fn test_inventory_is_memoized_until_invalidated() {
        let tmp = TempDir::new().unwrap();
        let config = Arc::new(Config::rooted_at(tmp.path()));
        let dev = config.host.pci_devices.join("0000:01:00.4/nvidia");
        fs::create_dir_all(&dev).await.unwrap();
        fs::write(dev.join("current_vgpu_type"), "0\n").await.unwrap();
        fs::write(dev.join("creatable_vgpu_types"), "63 : GRID P40-1Q\n")
            .await
            .unwrap();

        let mut session = Session::new(config);
        assert_eq!(session.inventory().await.unwrap().free.len(), 1);

        fs::write(dev.join("current_vgpu_type"), "63\n").await.unwrap();
        assert_eq!(session.inventory().await.unwrap().free.len(), 1);

        session.invalidate();
        let inv = session.inventory().await.unwrap();
        assert!(inv.free.is_empty());
        assert_eq!(inv.occupied.len(), 1);
    }
}
