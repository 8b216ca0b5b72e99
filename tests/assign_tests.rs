//! Integration tests for recording assignments in descriptors.

mod common;

use common::{vfio_args, Host, P40_TYPES};
use vgpu_allocator::allocation::{assign, AssignOutcome};
use vgpu_allocator::gpu::device::{BusAddress, VgpuTypeId};
use vgpu_allocator::hook::{run_hook, HookOutcome, Phase};
use vgpu_allocator::AllocatorError;

fn bus(raw: &str) -> BusAddress {
    BusAddress::parse(raw).unwrap()
}

fn ty(raw: &str) -> VgpuTypeId {
    VgpuTypeId::parse(raw).unwrap()
}

#[tokio::test]
async fn test_assign_writes_args_tags_and_hook() {
    let host = Host::new();
    host.add_device("0000:02:00.0", "0\n", P40_TYPES);
    host.write_descriptor("101", Some("pve1"), "name: desktop\nsmbios1: uuid=1234\n");

    let mut session = host.session();
    let outcome = assign(&mut session, "101", "pve1", &bus("0000:02:00.0"), &ty("64"))
        .await
        .unwrap();

    assert_eq!(outcome, AssignOutcome::Assigned);
    assert_eq!(
        host.read_descriptor("101", Some("pve1")),
        "name: desktop\n\
         smbios1: uuid=1234\n\
         args: -device vfio-pci,sysfsdev=/sys/bus/pci/devices/0000:02:00.0 -uuid 1234\n\
         hookscript: local:snippets/vgpu-allocator\n\
         tags: nvidia-64\n"
    );
    // Assignment never touches the device itself.
    assert_eq!(host.occupancy("0000:02:00.0"), "0\n");
}

#[tokio::test]
async fn test_assign_twice_is_idempotent() {
    let host = Host::new();
    host.add_device("0000:02:00.0", "0\n", P40_TYPES);
    host.write_descriptor("101", Some("pve1"), "smbios1: uuid=1234\ntags: web\n");

    let mut session = host.session();
    let first = assign(&mut session, "101", "pve1", &bus("0000:02:00.0"), &ty("64"))
        .await
        .unwrap();
    let after_first = host.read_descriptor("101", Some("pve1"));

    let second = assign(&mut session, "101", "pve1", &bus("0000:02:00.0"), &ty("64"))
        .await
        .unwrap();

    assert_eq!(first, AssignOutcome::Assigned);
    assert_eq!(second, AssignOutcome::AlreadyAssigned);
    assert_eq!(host.read_descriptor("101", Some("pve1")), after_first);
}

#[tokio::test]
async fn test_assign_keeps_existing_uuid_and_hook() {
    let host = Host::new();
    host.add_device("0000:02:00.0", "0\n", P40_TYPES);
    host.add_device("0000:03:00.0", "0\n", P40_TYPES);
    let text = format!(
        "#GPU workstation\nargs: {} -uuid 1234\nhookscript: shared:snippets/custom\nsmbios1: uuid=1234\ntags: nvidia-64\n",
        vfio_args(&["0000:02:00.0"])
    );
    host.write_descriptor("101", Some("pve1"), &text);

    let mut session = host.session();
    assign(&mut session, "101", "pve1", &bus("0000:03:00.0"), &ty("63"))
        .await
        .unwrap();

    assert_eq!(
        host.read_descriptor("101", Some("pve1")),
        format!(
            "#GPU workstation\nargs: {} -uuid 1234 {}\nhookscript: shared:snippets/custom\nsmbios1: uuid=1234\ntags: nvidia-63;nvidia-64\n",
            vfio_args(&["0000:02:00.0"]),
            vfio_args(&["0000:03:00.0"])
        )
    );
}

#[tokio::test]
async fn test_assign_refuses_occupied_device() {
    let host = Host::new();
    host.add_device("0000:02:00.0", "63\n", P40_TYPES);
    let text = "smbios1: uuid=1234\n";
    host.write_descriptor("101", Some("pve1"), text);

    let mut session = host.session();
    let err = assign(&mut session, "101", "pve1", &bus("0000:02:00.0"), &ty("64"))
        .await
        .unwrap_err();

    assert!(matches!(err, AllocatorError::NoMatchingDevice { .. }));
    assert_eq!(err.exit_code(), 404);
    assert_eq!(host.read_descriptor("101", Some("pve1")), text);
}

#[tokio::test]
async fn test_assign_failure_leaves_file_untouched() {
    let host = Host::new();
    host.add_device("0000:02:00.0", "0\n", P40_TYPES);
    let text = "name: no-smbios\n";
    host.write_descriptor("101", Some("pve1"), text);

    let mut session = host.session();
    let err = assign(&mut session, "101", "pve1", &bus("0000:02:00.0"), &ty("64"))
        .await
        .unwrap_err();

    assert!(matches!(err, AllocatorError::MissingUuid { .. }));
    assert_eq!(host.read_descriptor("101", Some("pve1")), text);
}

#[tokio::test]
async fn test_assign_unknown_vm() {
    let host = Host::new();
    let mut session = host.session();
    let err = assign(&mut session, "404", "pve1", &bus("0000:02:00.0"), &ty("64"))
        .await
        .unwrap_err();
    assert!(matches!(err, AllocatorError::DescriptorNotFound { .. }));
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn test_assignment_then_start_and_stop() {
    let host = Host::new();
    host.add_device("0000:02:00.0", "0\n", P40_TYPES);
    host.write_descriptor("120", Some("pve1"), "smbios1: uuid=1234\n");

    let mut session = host.session();
    assign(&mut session, "120", "pve1", &bus("0000:02:00.0"), &ty("64"))
        .await
        .unwrap();

    // The hook reads the same file through the migration override.
    let started = run_hook(&session, "120", &Phase::PreStart, Some("pve1"))
        .await
        .unwrap();
    assert_eq!(started, HookOutcome::Activated(1));
    assert_eq!(host.occupancy("0000:02:00.0"), "64");

    let stopped = run_hook(&session, "120", &Phase::PostStop, Some("pve1"))
        .await
        .unwrap();
    assert_eq!(stopped, HookOutcome::Deactivated(1));
    assert_eq!(host.occupancy("0000:02:00.0"), "0");
}

#[tokio::test]
async fn test_assign_keeps_existing_args_text() {
    let host = Host::new();
    host.add_device("0000:02:00.0", "0\n", P40_TYPES);
    host.write_descriptor(
        "101",
        Some("pve1"),
        "args: -fw_cfg name=opt/x,string=a  b\nsmbios1: uuid=1234\n",
    );

    let mut session = host.session();
    assign(&mut session, "101", "pve1", &bus("0000:02:00.0"), &ty("64"))
        .await
        .unwrap();

    let text = host.read_descriptor("101", Some("pve1"));
    assert!(text.starts_with(&format!(
        "args: -fw_cfg name=opt/x,string=a  b {} -uuid 1234\n",
        vfio_args(&["0000:02:00.0"])
    )));
}
