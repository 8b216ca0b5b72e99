//! Runtime configuration for vgpu-allocator.
//!
//! Configuration is loaded from a JSON file; every field has a default so the
//! binary works unconfigured on a stock Proxmox host. The command line is a
//! positional word list because the hypervisor invokes the hook as
//! `<vmid> <phase>`.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::AllocatorError;
use crate::gpu::device::{BusAddress, VgpuTypeId};
use crate::hook::Phase;

pub const USAGE: &str = "\
Usage: vgpu-allocator <vmid> <phase>
       vgpu-allocator <vmid> get-command <vgpu_type>
       vgpu-allocator assign <vmid> <node> <bus_address> <vgpu_type>
       vgpu-allocator list";

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "vgpu-allocator",
    about = "NVIDIA vGPU allocator and lifecycle hook for Proxmox VMs",
    override_usage = USAGE
)]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "/etc/vgpu-allocator.json")]
    pub config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Invocation words, e.g. `101 pre-start`.
    pub words: Vec<String>,
}

/// What the process was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Lifecycle hook call from the hypervisor.
    Hook { vm_id: String, phase: Phase },
    /// Print the manual commands that would assign a device of this type.
    GetCommand { vm_id: String, vgpu_type: VgpuTypeId },
    /// Record a device/type assignment in the VM descriptor.
    Assign {
        vm_id: String,
        node: String,
        device: BusAddress,
        vgpu_type: VgpuTypeId,
    },
    /// Dump the device inventory and VM list as JSON.
    List,
}

impl Cli {
    /// Interpret the positional words.
    pub fn invocation(&self) -> Result<Invocation, AllocatorError> {
        let words: Vec<&str> = self.words.iter().map(String::as_str).collect();
        match words.as_slice() {
            ["menu", ..] => Err(AllocatorError::Usage(format!(
                "The interactive menu is not part of this build, use `list` and `assign`.\n{USAGE}"
            ))),
            ["list"] => Ok(Invocation::List),
            ["assign", vm_id, node, device, vgpu_type] => Ok(Invocation::Assign {
                vm_id: vm_id.to_string(),
                node: node.to_string(),
                device: parse_bus(device)?,
                vgpu_type: parse_type(vgpu_type)?,
            }),
            ["list" | "assign", ..] => Err(AllocatorError::Usage(USAGE.to_string())),
            [vm_id, "get-command" | "get_command", vgpu_type] => Ok(Invocation::GetCommand {
                vm_id: vm_id.to_string(),
                vgpu_type: parse_type(vgpu_type)?,
            }),
            [vm_id, phase] if *phase != "get-command" && *phase != "get_command" => {
                Ok(Invocation::Hook {
                    vm_id: vm_id.to_string(),
                    phase: Phase::from(*phase),
                })
            }
            _ => Err(AllocatorError::Usage(USAGE.to_string())),
        }
    }

    /// Default log filter for this invocation.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "vgpu_allocator=debug"
        } else {
            "vgpu_allocator=info"
        }
    }
}

fn parse_bus(raw: &str) -> Result<BusAddress, AllocatorError> {
    BusAddress::parse(raw)
        .ok_or_else(|| AllocatorError::Usage(format!("invalid PCI bus address: {raw}\n{USAGE}")))
}

fn parse_type(raw: &str) -> Result<VgpuTypeId, AllocatorError> {
    VgpuTypeId::parse(raw)
        .ok_or_else(|| AllocatorError::Usage(format!("invalid vGPU type id: {raw}\n{USAGE}")))
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host filesystem layout.
    pub host: HostConfig,

    /// Hook registration settings.
    pub hook: HookConfig,
}

/// Where the device tree and descriptor files live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Root of the PCI device tree.
    pub pci_devices: PathBuf,

    /// Root of the cluster-wide per-node descriptor tree.
    pub nodes_root: PathBuf,

    /// Descriptor directory of the local node.
    pub local_descriptors: PathBuf,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            pci_devices: PathBuf::from("/sys/bus/pci/devices"),
            nodes_root: PathBuf::from("/etc/pve/nodes"),
            local_descriptors: PathBuf::from("/etc/pve/qemu-server"),
        }
    }
}

/// Hook self-registration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    /// Value written to `hookscript` on first assignment.
    pub hookscript: String,

    /// Environment variable naming the node a VM just migrated from.
    pub migrated_from_env: String,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            hookscript: "local:snippets/vgpu-allocator".to_string(),
            migrated_from_env: "PVE_MIGRATED_FROM".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Config rooted at a scratch directory, laid out like a host.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            host: HostConfig {
                pci_devices: root.join("sys/bus/pci/devices"),
                nodes_root: root.join("etc/pve/nodes"),
                local_descriptors: root.join("etc/pve/qemu-server"),
            },
            hook: HookConfig::default(),
        }
    }

    /// The node named by the migrated-from environment variable, if set.
    pub fn migrated_from(&self) -> Option<String> {
        std::env::var(&self.hook.migrated_from_env)
            .ok()
            .filter(|node| !node.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(words: &[&str]) -> Cli {
        let mut argv = vec!["vgpu-allocator"];
        argv.extend_from_slice(words);
        Cli::parse_from(argv)
    }

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.host.pci_devices, PathBuf::from("/sys/bus/pci/devices"));
        assert_eq!(cfg.hook.migrated_from_env, "PVE_MIGRATED_FROM");
    }

    #[test]
    fn test_partial_config_file() {
        let cfg: Config =
            serde_json::from_str(r#"{"hook": {"hookscript": "shared:snippets/alloc"}}"#).unwrap();
        assert_eq!(cfg.hook.hookscript, "shared:snippets/alloc");
        assert_eq!(cfg.hook.migrated_from_env, "PVE_MIGRATED_FROM");
        assert_eq!(cfg.host.nodes_root, PathBuf::from("/etc/pve/nodes"));
    }

    #[test]
    fn test_migrated_from_env() {
        let var = "VGPU_ALLOCATOR_TEST_MIGRATED_FROM";
        let mut cfg = Config::default();
        cfg.hook.migrated_from_env = var.to_string();

        std::env::set_var(var, "pve2");
        assert_eq!(cfg.migrated_from().as_deref(), Some("pve2"));

        std::env::set_var(var, "");
        assert_eq!(cfg.migrated_from(), None);

        std::env::remove_var(var);
        assert_eq!(cfg.migrated_from(), None);
    }

    #[test]
    fn test_hook_invocations() {
        assert_eq!(
            cli(&["101", "pre-start"]).invocation().unwrap(),
            Invocation::Hook {
                vm_id: "101".to_string(),
                phase: Phase::PreStart
            }
        );
        assert_eq!(
            cli(&["101", "post-start"]).invocation().unwrap(),
            Invocation::Hook {
                vm_id: "101".to_string(),
                phase: Phase::Other("post-start".to_string())
            }
        );
    }

    #[test]
    fn test_get_command_invocation() {
        let inv = cli(&["101", "get_command", "63"]).invocation().unwrap();
        assert!(
            matches!(inv, Invocation::GetCommand { ref vgpu_type, .. } if vgpu_type.as_str() == "63")
        );
    }

    #[test]
    fn test_usage_errors() {
        assert!(cli(&[]).invocation().is_err());
        assert!(cli(&["101"]).invocation().is_err());
        assert!(cli(&["101", "get-command"]).invocation().is_err());
        assert!(cli(&["menu"]).invocation().is_err());
        assert!(cli(&["assign", "101"]).invocation().is_err());
        assert!(cli(&["assign", "101", "pve1", "not/a/bus", "63"])
            .invocation()
            .is_err());
    }

    #[test]
    fn test_assign_invocation() {
        let inv = cli(&["assign", "101", "pve1", "0000:02:00.0", "64"])
            .invocation()
            .unwrap();
        match inv {
            Invocation::Assign {
                vm_id,
                node,
                device,
                vgpu_type,
            } => {
                assert_eq!(vm_id, "101");
                assert_eq!(node, "pve1");
                assert_eq!(device.as_str(), "0000:02:00.0");
                assert_eq!(vgpu_type.as_str(), "64");
            }
            other => panic!("unexpected invocation {other:?}"),
        }
    }
}
