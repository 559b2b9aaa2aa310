//! Contract Test: Dependency Unwind Ordering
//!
//! Constraints verified:
//! - Every dependent is detached before the owner's destructive call
//! - `always_on` is disabled before the allocation is terminated
//! - The allocation is terminated before the machine is deleted
//! - A single failed detach keeps the fan-out going but blocks the delete
//! - Deleting a network interface detaches its public IPs first
//!
//! If this test fails, deletes can race against live attachments.

mod common;

use common::*;
use eci_core::error::RemoteError;
use eci_core::plane::PlaneOp;
use eci_core::{MemoryControlPlane, ResourceKind};
use serde_json::json;

#[tokio::test]
async fn machine_delete_detaches_all_dependents_first() {
    let plane = MemoryControlPlane::new();
    seed_machine_with_attachments(&plane, "idle").await;

    let outcome = controller(&plane).delete(ResourceKind::VirtualMachine, "vm-1").await;

    assert!(outcome.is_success(), "{:?}", outcome.diagnostics);
    assert!(outcome.state.is_absent());

    let calls = plane.calls().await;
    let delete = position(&calls, PlaneOp::Delete, ResourceKind::VirtualMachine, "vm-1")
        .expect("machine deleted");
    for (kind, id) in [
        (ResourceKind::BlockStorage, "vol-1"),
        (ResourceKind::BlockStorage, "vol-2"),
        (ResourceKind::NetworkInterface, "nic-1"),
    ] {
        let detach = position(&calls, PlaneOp::Patch, kind, id).expect("dependent detached");
        assert!(detach < delete, "{} detached after machine delete", id);
    }

    // Volumes and interface survive, just unattached
    let vol = plane.snapshot(ResourceKind::BlockStorage, "vol-1").await.unwrap();
    assert_eq!(vol.relation("attached_machine_id"), None);
    let nic = plane
        .snapshot(ResourceKind::NetworkInterface, "nic-1")
        .await
        .unwrap();
    assert_eq!(nic.relation("attached_machine_id"), None);
    assert_eq!(nic.relation("attached_subnet_id"), Some("subnet-1"));
}

#[tokio::test]
async fn running_machine_is_stopped_before_delete() {
    let plane = MemoryControlPlane::new();
    plane
        .insert(
            ResourceKind::VirtualMachine,
            "vm-1",
            "running",
            json!({ "always_on": true }),
        )
        .await;
    plane
        .insert(
            ResourceKind::VirtualMachineAllocation,
            "alloc-1",
            "running",
            json!({ "machine_id": "vm-1" }),
        )
        .await;

    let outcome = controller(&plane).delete(ResourceKind::VirtualMachine, "vm-1").await;
    assert!(outcome.is_success(), "{:?}", outcome.diagnostics);

    let calls = plane.calls().await;
    let disable = position(&calls, PlaneOp::Patch, ResourceKind::VirtualMachine, "vm-1")
        .expect("always_on disabled");
    let terminate = position(
        &calls,
        PlaneOp::Delete,
        ResourceKind::VirtualMachineAllocation,
        "alloc-1",
    )
    .expect("allocation terminated");
    let delete = position(&calls, PlaneOp::Delete, ResourceKind::VirtualMachine, "vm-1")
        .expect("machine deleted");

    assert!(disable < terminate);
    assert!(terminate < delete);
    assert_eq!(
        calls[disable].patch.as_ref().and_then(|p| p.get("always_on").cloned()),
        Some(json!(false))
    );
}

#[tokio::test]
async fn failed_detach_blocks_delete_but_not_other_detaches() {
    let plane = MemoryControlPlane::new();
    seed_machine_with_attachments(&plane, "idle").await;
    plane
        .fail_always(
            PlaneOp::Patch,
            ResourceKind::BlockStorage,
            Some("vol-2"),
            RemoteError::transport("connection reset"),
        )
        .await;

    let outcome = controller(&plane).delete(ResourceKind::VirtualMachine, "vm-1").await;

    assert!(!outcome.is_success());
    assert!(outcome.state.is_present());

    let errors: Vec<_> = outcome.diagnostics.errors().cloned().collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].summary, "failed to detach block_storage");
    assert!(errors[0].detail.contains("(resource id: vol-2)"));

    let calls = plane.calls().await;
    assert!(position(&calls, PlaneOp::Patch, ResourceKind::BlockStorage, "vol-1").is_some());
    assert!(position(&calls, PlaneOp::Patch, ResourceKind::NetworkInterface, "nic-1").is_some());
    assert!(plane.calls_of(PlaneOp::Delete).await.is_empty());
}

#[tokio::test]
async fn interface_delete_detaches_public_ips_first() {
    let plane = MemoryControlPlane::new();
    plane
        .insert(ResourceKind::VirtualMachine, "vm-1", "idle", json!({}))
        .await;
    plane
        .insert(
            ResourceKind::NetworkInterface,
            "nic-1",
            "active",
            json!({ "attached_machine_id": "vm-1", "attached_subnet_id": "subnet-1" }),
        )
        .await;
    plane
        .insert(
            ResourceKind::PublicIp,
            "pip-1",
            "active",
            json!({ "attached_network_interface_id": "nic-1" }),
        )
        .await;

    let outcome = controller(&plane)
        .delete(ResourceKind::NetworkInterface, "nic-1")
        .await;
    assert!(outcome.is_success(), "{:?}", outcome.diagnostics);

    let calls = plane.calls().await;
    let own = position(&calls, PlaneOp::Patch, ResourceKind::NetworkInterface, "nic-1")
        .expect("own machine edge cleared");
    let pip = position(&calls, PlaneOp::Patch, ResourceKind::PublicIp, "pip-1")
        .expect("public ip detached");
    let delete = position(&calls, PlaneOp::Delete, ResourceKind::NetworkInterface, "nic-1")
        .expect("interface deleted");
    assert!(own < pip);
    assert!(pip < delete);

    let ip = plane.snapshot(ResourceKind::PublicIp, "pip-1").await.unwrap();
    assert_eq!(ip.relation("attached_network_interface_id"), None);
}
