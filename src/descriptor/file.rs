//! VM descriptor file model.
//!
//! A descriptor is a list of `key: value` lines. Blank lines and `#` comments
//! are kept verbatim. Everything from the first `[section]` header on belongs
//! to snapshots; it is shape-checked but stored untouched, and lookups only see
//! the current configuration above it. Serializing an unmodified descriptor
//! reproduces the file.

use std::path::{Path, PathBuf};

use crate::descriptor::fields::{parse_subfields, QemuArgs, Tags};
use crate::error::AllocatorError;

pub const KEY_ARGS: &str = "args";
pub const KEY_TAGS: &str = "tags";
pub const KEY_SMBIOS: &str = "smbios1";
pub const KEY_HOOKSCRIPT: &str = "hookscript";
pub const KEY_NAME: &str = "name";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Entry { key: String, value: String },
    Verbatim(String),
}

/// A VM's configuration as read from one node's descriptor file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmDescriptor {
    vm_id: String,
    node: Option<String>,
    path: PathBuf,
    lines: Vec<Line>,
    /// Snapshot sections, verbatim.
    trailer: Vec<String>,
    /// `"\r\n"` when the file was written with CRLF line endings.
    line_ending: &'static str,
    /// Whether the last line ended with a line break.
    final_newline: bool,
}

impl VmDescriptor {
    /// Parse descriptor text read from `path`.
    pub fn parse(
        vm_id: impl Into<String>,
        node: Option<String>,
        path: impl Into<PathBuf>,
        text: &str,
    ) -> Result<Self, AllocatorError> {
        let path = path.into();
        let mut lines: Vec<Line> = Vec::new();
        let mut trailer: Vec<String> = Vec::new();

        let line_ending = match text.split_once('\n') {
            Some((first, _)) if first.ends_with('\r') => "\r\n",
            _ => "\n",
        };
        let final_newline = text.is_empty() || text.ends_with('\n');
        let raw_lines = text
            .split_inclusive('\n')
            .map(|l| l.strip_suffix('\n').unwrap_or(l))
            .map(|l| l.strip_suffix('\r').unwrap_or(l));

        for (idx, line) in raw_lines.enumerate() {
            let ignored = line.is_empty() || line.starts_with('#');
            if !trailer.is_empty() || line.starts_with('[') {
                if !ignored && !line.starts_with('[') {
                    split_entry(line).ok_or_else(|| malformed(&path, idx, line))?;
                }
                trailer.push(line.to_string());
                continue;
            }
            if ignored {
                lines.push(Line::Verbatim(line.to_string()));
                continue;
            }

            let (key, value) = split_entry(line).ok_or_else(|| malformed(&path, idx, line))?;
            let existing = lines.iter_mut().find_map(|l| match l {
                Line::Entry { key: k, value: v } if *k == key => Some(v),
                _ => None,
            });
            match existing {
                Some(v) => *v = value.to_string(),
                None => lines.push(Line::Entry {
                    key: key.to_string(),
                    value: value.to_string(),
                }),
            }
        }

        Ok(Self {
            vm_id: vm_id.into(),
            node,
            path,
            lines,
            trailer,
            line_ending,
            final_newline,
        })
    }

    /// Render the file contents.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Entry { key, value } => {
                    out.push_str(key);
                    out.push_str(": ");
                    out.push_str(value);
                }
                Line::Verbatim(raw) => out.push_str(raw),
            }
            out.push_str(self.line_ending);
        }
        for raw in &self.trailer {
            out.push_str(raw);
            out.push_str(self.line_ending);
        }
        if !self.final_newline {
            out.truncate(out.len().saturating_sub(self.line_ending.len()));
        }
        out
    }

    pub fn vm_id(&self) -> &str {
        &self.vm_id
    }

    /// Node whose directory the file was read from, when loaded by node.
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|l| match l {
            Line::Entry { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Set `key`, keeping its position; new keys go after the last entry.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        for line in &mut self.lines {
            if let Line::Entry { key: k, value: v } = line {
                if *k == key {
                    *v = value;
                    return;
                }
            }
        }
        let at = self
            .lines
            .iter()
            .rposition(|l| matches!(l, Line::Entry { .. }))
            .map_or(self.lines.len(), |i| i + 1);
        self.lines.insert(
            at,
            Line::Entry {
                key: key.to_string(),
                value,
            },
        );
    }

    pub fn name(&self) -> Option<&str> {
        self.get(KEY_NAME)
    }

    pub fn args(&self) -> QemuArgs {
        QemuArgs::parse(self.get(KEY_ARGS).unwrap_or_default())
    }

    pub fn set_args(&mut self, args: &QemuArgs) {
        self.set(KEY_ARGS, args.to_string());
    }

    pub fn tags(&self) -> Tags {
        Tags::parse(self.get(KEY_TAGS).unwrap_or_default())
    }

    pub fn set_tags(&mut self, tags: &Tags) {
        self.set(KEY_TAGS, tags.to_string());
    }

    /// The VM's SMBIOS uuid, from `smbios1: uuid=...`.
    pub fn smbios_uuid(&self) -> Option<String> {
        let smbios = parse_subfields(self.get(KEY_SMBIOS)?);
        smbios
            .get("uuid")
            .filter(|uuid| !uuid.is_empty())
            .map(str::to_string)
    }

    /// Registered hook, if any and non-empty.
    pub fn hookscript(&self) -> Option<&str> {
        self.get(KEY_HOOKSCRIPT).filter(|hook| !hook.is_empty())
    }
}

/// Split `key: value`; the separator must occur exactly once.
fn split_entry(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(": ")?;
    if key.is_empty() || value.contains(": ") {
        return None;
    }
    Some((key, value))
}

fn malformed(path: &Path, idx: usize, line: &str) -> AllocatorError {
    AllocatorError::MalformedDescriptor {
        path: path.to_path_buf(),
        line_no: idx + 1,
        line: line.to_string(),
    }
}
