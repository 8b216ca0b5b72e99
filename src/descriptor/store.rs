//! Descriptor files on the host.
//!
//! Layout: `<nodes_root>/<node>/qemu-server/<vmid>.conf` for every node of the
//! cluster, and `<local_descriptors>/<vmid>.conf` for the node we run on.
//! Writes replace the whole file; there is no locking, the last writer wins.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::config::HostConfig;
use crate::descriptor::file::VmDescriptor;
use crate::error::AllocatorError;

const NODE_DESCRIPTOR_DIR: &str = "qemu-server";
const DESCRIPTOR_EXT: &str = "conf";

#[derive(Debug, Clone)]
pub struct DescriptorStore {
    nodes_root: PathBuf,
    local_dir: PathBuf,
}

impl DescriptorStore {
    pub fn new(host: &HostConfig) -> Self {
        Self {
            nodes_root: host.nodes_root.clone(),
            local_dir: host.local_descriptors.clone(),
        }
    }

    /// Descriptor path for `vm_id`, on `node` or on the local node.
    pub fn path_for(&self, vm_id: &str, node: Option<&str>) -> PathBuf {
        let file = format!("{vm_id}.{DESCRIPTOR_EXT}");
        match node {
            Some(node) => self.node_dir(node).join(file),
            None => self.local_dir.join(file),
        }
    }

    fn node_dir(&self, node: &str) -> PathBuf {
        self.nodes_root.join(node).join(NODE_DESCRIPTOR_DIR)
    }

    /// Load from the local node, or from `override_node` when the VM is migrating.
    pub async fn load(
        &self,
        vm_id: &str,
        override_node: Option<&str>,
    ) -> Result<VmDescriptor, AllocatorError> {
        let path = self.path_for(vm_id, override_node);
        read_descriptor(vm_id, override_node.map(str::to_string), path).await
    }

    /// Load from an explicit node directory.
    pub async fn load_on_node(
        &self,
        vm_id: &str,
        node: &str,
    ) -> Result<VmDescriptor, AllocatorError> {
        self.load(vm_id, Some(node)).await
    }

    /// Overwrite the file the descriptor was read from.
    pub async fn save(&self, descriptor: &VmDescriptor) -> Result<(), AllocatorError> {
        let path = descriptor.path();
        fs::write(path, descriptor.serialize())
            .await
            .map_err(|source| AllocatorError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(vm_id = descriptor.vm_id(), path = %path.display(), "Saved descriptor");
        Ok(())
    }

    /// Every descriptor on every node, sorted by VM id (numerically where possible) then node.
    pub async fn list_all(&self) -> Result<Vec<VmDescriptor>, AllocatorError> {
        let mut found = Vec::new();
        for node in list_dir(&self.nodes_root).await? {
            let dir = self.node_dir(&node);
            if !fs::metadata(&dir).await.is_ok_and(|m| m.is_dir()) {
                continue;
            }
            for file in list_dir(&dir).await? {
                let Some(stem) = file.strip_suffix(&format!(".{DESCRIPTOR_EXT}")) else {
                    continue;
                };
                let vm_id = stem.split('.').next().unwrap_or(stem);
                found.push(self.load_on_node(vm_id, &node).await?);
            }
        }

        // Numeric ids first, in numeric order; anything else after them.
        found.sort_by(|a, b| {
            let key = |d: &VmDescriptor| {
                let numeric = d.vm_id().parse::<u64>().ok();
                (
                    numeric.is_none(),
                    numeric,
                    d.vm_id().to_string(),
                    d.node().unwrap_or_default().to_string(),
                )
            };
            key(a).cmp(&key(b))
        });
        Ok(found)
    }
}

async fn read_descriptor(
    vm_id: &str,
    node: Option<String>,
    path: PathBuf,
) -> Result<VmDescriptor, AllocatorError> {
    let text = match fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(AllocatorError::DescriptorNotFound {
                vm_id: vm_id.to_string(),
                path,
            })
        }
        Err(source) => return Err(AllocatorError::Io { path, source }),
    };
    VmDescriptor::parse(vm_id, node, path, &text)
}

/// Entry names of a directory.
async fn list_dir(dir: &Path) -> Result<Vec<String>, AllocatorError> {
    let io_err = |source| AllocatorError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = fs::read_dir(dir).await.map_err(io_err)?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}
