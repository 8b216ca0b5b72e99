//! Grammars for the structured descriptor values.
//!
//! - `args`: QEMU command-line words, e.g.
//!   `-device vfio-pci,sysfsdev=/sys/bus/pci/devices/0000:02:00.0 -uuid 1234`
//! - `tags`: `;`-separated labels; `nvidia-<id>` requests a vGPU type
//! - `smbios1` and device options: `,`-separated `key=value` pairs

use std::collections::BTreeSet;
use std::fmt;

use tracing::warn;

use crate::gpu::device::{BusAddress, VgpuTypeId};

const VFIO_DRIVER: &str = "vfio-pci";
const VGPU_TAG_PREFIX: &str = "nvidia-";

/// One argument of the QEMU command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgToken {
    /// `-name` with the word that follows it, if that word is not itself a flag.
    Flag { name: String, value: Option<String> },
    /// A word that does not belong to a flag.
    Word(String),
}

/// Parsed `args` value. The text is kept as read; pushes only append to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QemuArgs {
    raw: String,
    tokens: Vec<ArgToken>,
}

impl QemuArgs {
    pub fn parse(raw: &str) -> Self {
        let mut tokens = Vec::new();
        let mut words = raw.split_whitespace().peekable();
        while let Some(word) = words.next() {
            match word.strip_prefix('-') {
                Some(name) if !name.is_empty() => {
                    let value = words
                        .next_if(|next| !next.starts_with('-'))
                        .map(str::to_string);
                    tokens.push(ArgToken::Flag {
                        name: name.to_string(),
                        value,
                    });
                }
                _ => tokens.push(ArgToken::Word(word.to_string())),
            }
        }
        Self {
            raw: raw.to_string(),
            tokens,
        }
    }

    pub fn tokens(&self) -> &[ArgToken] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.tokens
            .iter()
            .any(|t| matches!(t, ArgToken::Flag { name, .. } if name == flag))
    }

    pub fn push_flag(&mut self, name: &str, value: &str) {
        if !self.raw.is_empty() {
            self.raw.push(' ');
        }
        self.raw.push_str(&format!("-{name} {value}"));
        self.tokens.push(ArgToken::Flag {
            name: name.to_string(),
            value: Some(value.to_string()),
        });
    }

    /// Bus addresses of the mediated devices attached via `vfio-pci,sysfsdev=...`, in order.
    pub fn vfio_devices(&self) -> Vec<BusAddress> {
        self.tokens
            .iter()
            .filter_map(|t| match t {
                ArgToken::Flag {
                    name,
                    value: Some(value),
                } if name == "device" => vfio_sysfs_device(value),
                _ => None,
            })
            .collect()
    }

    pub fn has_vfio_device(&self, bus: &BusAddress) -> bool {
        self.vfio_devices().iter().any(|d| d == bus)
    }

    pub fn push_vfio_device(&mut self, bus: &BusAddress) {
        self.push_flag("device", &vfio_device_value(bus));
    }
}

impl fmt::Display for QemuArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// `-device` value attaching a device through vfio-pci.
pub fn vfio_device_value(bus: &BusAddress) -> String {
    format!("{VFIO_DRIVER},sysfsdev={}", bus.sysfs_path())
}

fn vfio_sysfs_device(value: &str) -> Option<BusAddress> {
    let (driver, options) = value.split_once(',')?;
    if driver != VFIO_DRIVER {
        return None;
    }
    let sysfsdev = Subfields::parse(options).get("sysfsdev")?.to_string();
    let bus = BusAddress::from_sysfs_path(&sysfsdev);
    if bus.is_none() {
        warn!(sysfsdev = %sysfsdev, "Ignoring vfio-pci device outside the PCI device tree");
    }
    bus
}

/// Parsed `tags` value. Always kept sorted and deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags(BTreeSet<String>);

impl Tags {
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.trim()
                .split(';')
                .map(str::trim)
                .filter(|label| !label.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn insert(&mut self, label: impl Into<String>) -> bool {
        self.0.insert(label.into())
    }

    pub fn insert_vgpu_type(&mut self, vgpu_type: &VgpuTypeId) -> bool {
        self.insert(vgpu_tag(vgpu_type))
    }

    pub fn contains(&self, label: &str) -> bool {
        self.0.contains(label)
    }

    /// Type ids requested through `nvidia-<digits>` labels, sorted.
    pub fn requested_types(&self) -> Vec<VgpuTypeId> {
        let mut types: Vec<VgpuTypeId> = self
            .0
            .iter()
            .filter_map(|label| label.strip_prefix(VGPU_TAG_PREFIX))
            .filter_map(VgpuTypeId::parse)
            .collect();
        types.sort();
        types
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, label) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            f.write_str(label)?;
        }
        Ok(())
    }
}

/// The tag that requests a vGPU type.
pub fn vgpu_tag(vgpu_type: &VgpuTypeId) -> String {
    format!("{VGPU_TAG_PREFIX}{vgpu_type}")
}

/// Comma-separated `key=value` pairs, in order. A pair without `=` reads as an empty value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subfields(Vec<(String, Option<String>)>);

impl Subfields {
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.split(',')
                .filter(|pair| !pair.is_empty())
                .map(|pair| match pair.split_once('=') {
                    Some((key, value)) => (key.to_string(), Some(value.to_string())),
                    None => (pair.to_string(), None),
                })
                .collect(),
        )
    }

    /// Last value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_deref().unwrap_or(""))
    }
}

impl fmt::Display for Subfields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match value {
                Some(value) => write!(f, "{key}={value}")?,
                None => f.write_str(key)?,
            }
        }
        Ok(())
    }
}

/// Split a `key=value,...` value into pairs.
pub fn parse_subfields(raw: &str) -> Subfields {
    Subfields::parse(raw)
}
