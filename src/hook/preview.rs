//! Dry-run of an assignment: the `qm set` commands an operator can apply by hand.

use crate::allocation::{plan_assignment, AssignOutcome, AssignPlan};
use crate::descriptor::file::{KEY_ARGS, KEY_TAGS};
use crate::error::AllocatorError;
use crate::gpu::device::{BusAddress, VgpuTypeId};
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPreview {
    pub device: BusAddress,
    pub outcome: AssignOutcome,
    /// Empty when the device is already assigned.
    pub commands: Vec<String>,
}

/// Pick the first free device offering `vgpu_type` and render the commands that
/// would assign it. Touches neither devices nor descriptor files.
pub async fn preview_command(
    session: &mut Session,
    vm_id: &str,
    vgpu_type: &VgpuTypeId,
    override_node: Option<&str>,
) -> Result<CommandPreview, AllocatorError> {
    let descriptor = session.store().load(vm_id, override_node).await?;
    let hookscript = session.config().hook.hookscript.clone();

    let device = session
        .inventory()
        .await?
        .first_free_offering(vgpu_type)
        .cloned()
        .ok_or_else(|| AllocatorError::NoMatchingDevice {
            vgpu_type: vgpu_type.to_string(),
        })?;

    let preview = match plan_assignment(&descriptor, &device, vgpu_type, &hookscript)? {
        AssignPlan::AlreadyAssigned => CommandPreview {
            device,
            outcome: AssignOutcome::AlreadyAssigned,
            commands: Vec::new(),
        },
        AssignPlan::Updated(planned) => {
            let commands = vec![
                format!(
                    "qm set {vm_id} --hookscript {}",
                    shell_quote(planned.hookscript().unwrap_or(&hookscript))
                ),
                format!(
                    "qm set {vm_id} --args {}",
                    shell_quote(planned.get(KEY_ARGS).unwrap_or_default())
                ),
                format!(
                    "qm set {vm_id} --tags {}",
                    shell_quote(planned.get(KEY_TAGS).unwrap_or_default())
                ),
            ];
            CommandPreview {
                device,
                outcome: AssignOutcome::Assigned,
                commands,
            }
        }
    };
    Ok(preview)
}

/// Quote `value` as a single POSIX shell word. Words made only of safe characters
/// are left bare.
fn shell_quote(value: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "-_./:,=@%+".contains(c);
    if !value.is_empty() && value.chars().all(safe) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}
