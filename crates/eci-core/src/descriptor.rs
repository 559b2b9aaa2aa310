//! Per-kind resource descriptors
//!
//! The lifecycle controller is generic; everything that differs between
//! resource kinds lives in the static table below: API path, classifier key,
//! ready and deleted statuses, relation edges, creation-time checks and the
//! ordered unwind steps run before a delete.

use crate::model::ResourceKind;

/// Status every gated owner must be in before attachments may change
pub const IDLE: &str = "idle";

/// A relation edge held by a resource (dependent → owner)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationSpec {
    /// Attribute holding the related id
    pub field: &'static str,
    /// Kind of the related resource
    pub target: ResourceKind,
    /// Whether the edge can be moved or cleared after creation
    pub movable: bool,
}

/// Read the owner of a relation and require a status before touching the edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusGate {
    pub owner: ResourceKind,
    pub required_status: &'static str,
    /// Summary of the fatal diagnostic when the gate is closed
    pub summary: &'static str,
    /// Operator-facing instruction
    pub message: &'static str,
}

/// Check run before the create call is issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateCheck {
    /// The owner named by `relation` must be in the gate's status
    OwnerStatus {
        relation: &'static str,
        gate: StatusGate,
    },
    /// The owner named by `relation` must not have `flag` set
    OwnerFlagUnset {
        relation: &'static str,
        owner: ResourceKind,
        flag: &'static str,
        summary: &'static str,
        message: &'static str,
    },
}

/// One step of the pre-delete choreography
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwindStep {
    /// Clear `relation` on every `dependent` pointing at this resource
    DetachDependents {
        dependent: ResourceKind,
        relation: &'static str,
    },
    /// Clear this resource's own `relation`, optionally gated on the owner's status
    ClearOwnRelation {
        relation: &'static str,
        gate: Option<StatusGate>,
    },
    /// Patch a boolean attribute to false if it is set
    DisableFlag { field: &'static str },
    /// Delete an active `dependent` record and await its terminal status
    TerminateDependents {
        dependent: ResourceKind,
        relation: &'static str,
    },
    /// Wait until this resource reaches one of `targets`
    AwaitSettled { targets: &'static [&'static str] },
}

/// How the destructive call is issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// One call, classified once
    Once,
    /// Repeated with the delete-retry policy until classified satisfied
    Retry,
}

/// Static description of one resource kind
#[derive(Debug)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    /// Path below the API prefix
    pub api_path: &'static str,
    /// Key used by the control plane in conflict detail payloads
    pub detail_key: &'static str,
    /// Statuses that end the post-create wait; empty means no wait
    pub ready_statuses: &'static [&'static str],
    pub deleted_status: &'static str,
    pub relations: &'static [RelationSpec],
    /// Fields sent in a follow-up patch after the create call
    pub post_create_fields: &'static [&'static str],
    pub create_checks: &'static [CreateCheck],
    /// Fields that can only change by replacing the resource
    pub immutable_fields: &'static [&'static str],
    pub updatable: bool,
    pub unwind: &'static [UnwindStep],
    pub delete_mode: DeleteMode,
    /// Poll for the deleted status when the delete response did not report it
    pub confirm_delete: bool,
}

impl ResourceDescriptor {
    pub fn relation(&self, field: &str) -> Option<&RelationSpec> {
        self.relations.iter().find(|rel| rel.field == field)
    }

    pub fn is_immutable(&self, field: &str) -> bool {
        self.immutable_fields.contains(&field)
            || self.relation(field).is_some_and(|rel| !rel.movable)
    }

    pub fn is_ready(&self, status: &str) -> bool {
        self.ready_statuses.is_empty() || self.ready_statuses.contains(&status)
    }
}

const MACHINE_NOT_IDLE: StatusGate = StatusGate {
    owner: ResourceKind::VirtualMachine,
    required_status: IDLE,
    summary: "virtual machine is not idle",
    message: "block storage is attached to a non-idle virtual machine. \
              For safety, the practitioner has to kill the virtual machine allocation",
};

const ATTACH_REQUIRES_IDLE_MACHINE: StatusGate = StatusGate {
    owner: ResourceKind::VirtualMachine,
    required_status: IDLE,
    summary: "virtual machine is not idle",
    message: "virtual machine is not idle (tip: remove the virtual machine allocation)",
};

static VIRTUAL_MACHINE: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::VirtualMachine,
    api_path: "resource/compute/virtual_machine",
    detail_key: "resource_virtual_machine",
    ready_statuses: &[],
    deleted_status: "deleted",
    relations: &[],
    post_create_fields: &[],
    create_checks: &[],
    immutable_fields: &["dr", "username", "password"],
    updatable: true,
    unwind: &[
        UnwindStep::DetachDependents {
            dependent: ResourceKind::BlockStorage,
            relation: "attached_machine_id",
        },
        UnwindStep::DetachDependents {
            dependent: ResourceKind::NetworkInterface,
            relation: "attached_machine_id",
        },
        UnwindStep::DisableFlag { field: "always_on" },
        UnwindStep::TerminateDependents {
            dependent: ResourceKind::VirtualMachineAllocation,
            relation: "machine_id",
        },
        UnwindStep::AwaitSettled {
            targets: &["deleted", IDLE],
        },
    ],
    delete_mode: DeleteMode::Once,
    confirm_delete: false,
};

static VIRTUAL_MACHINE_ALLOCATION: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::VirtualMachineAllocation,
    api_path: "resource/compute/virtual_machine_allocation",
    detail_key: "resource_allocation",
    ready_statuses: &[],
    deleted_status: "terminated",
    relations: &[RelationSpec {
        field: "machine_id",
        target: ResourceKind::VirtualMachine,
        movable: false,
    }],
    post_create_fields: &[],
    create_checks: &[CreateCheck::OwnerFlagUnset {
        relation: "machine_id",
        owner: ResourceKind::VirtualMachine,
        flag: "always_on",
        summary: "Virtual machine has invalid configuration",
        message: "VM allocation cannot be managed for VM with `always_on` enabled",
    }],
    immutable_fields: &["tags"],
    updatable: false,
    unwind: &[],
    delete_mode: DeleteMode::Once,
    confirm_delete: true,
};

static BLOCK_STORAGE: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::BlockStorage,
    api_path: "resource/storage/block_storage",
    detail_key: "resource_block_storage",
    ready_statuses: &["prepared"],
    deleted_status: "deleted",
    relations: &[RelationSpec {
        field: "attached_machine_id",
        target: ResourceKind::VirtualMachine,
        movable: true,
    }],
    post_create_fields: &["attached_machine_id"],
    create_checks: &[],
    immutable_fields: &["dr", "image_id", "size_gib", "snapshot_id"],
    updatable: true,
    unwind: &[UnwindStep::ClearOwnRelation {
        relation: "attached_machine_id",
        gate: Some(MACHINE_NOT_IDLE),
    }],
    delete_mode: DeleteMode::Once,
    confirm_delete: false,
};

static BLOCK_STORAGE_SNAPSHOT: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::BlockStorageSnapshot,
    api_path: "user/resource/storage/block_storage/snapshot",
    detail_key: "resource_block_storage_snapshot",
    ready_statuses: &["prepared"],
    deleted_status: "deleted",
    relations: &[RelationSpec {
        field: "block_storage_id",
        target: ResourceKind::BlockStorage,
        movable: false,
    }],
    post_create_fields: &[],
    create_checks: &[],
    immutable_fields: &["dr", "image_id", "size_gib"],
    updatable: true,
    unwind: &[],
    delete_mode: DeleteMode::Once,
    confirm_delete: false,
};

static NETWORK_INTERFACE: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::NetworkInterface,
    api_path: "resource/network/network_interface",
    detail_key: "resource_network_interface",
    ready_statuses: &["active"],
    deleted_status: "deleted",
    relations: &[
        RelationSpec {
            field: "attached_machine_id",
            target: ResourceKind::VirtualMachine,
            movable: true,
        },
        RelationSpec {
            field: "attached_subnet_id",
            target: ResourceKind::Subnet,
            movable: false,
        },
    ],
    post_create_fields: &["attached_machine_id"],
    create_checks: &[CreateCheck::OwnerStatus {
        relation: "attached_machine_id",
        gate: ATTACH_REQUIRES_IDLE_MACHINE,
    }],
    immutable_fields: &["dr", "ip", "mac"],
    updatable: true,
    unwind: &[
        UnwindStep::ClearOwnRelation {
            relation: "attached_machine_id",
            gate: None,
        },
        UnwindStep::DetachDependents {
            dependent: ResourceKind::PublicIp,
            relation: "attached_network_interface_id",
        },
    ],
    delete_mode: DeleteMode::Once,
    confirm_delete: false,
};

static PUBLIC_IP: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::PublicIp,
    api_path: "resource/network/public_ip",
    detail_key: "resource_public_ip",
    ready_statuses: &["active"],
    deleted_status: "deleted",
    relations: &[RelationSpec {
        field: "attached_network_interface_id",
        target: ResourceKind::NetworkInterface,
        movable: true,
    }],
    post_create_fields: &["attached_network_interface_id"],
    create_checks: &[],
    immutable_fields: &["dr"],
    updatable: true,
    unwind: &[UnwindStep::ClearOwnRelation {
        relation: "attached_network_interface_id",
        gate: None,
    }],
    delete_mode: DeleteMode::Once,
    confirm_delete: false,
};

static SUBNET: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::Subnet,
    api_path: "resource/network/subnet",
    detail_key: "resource_subnet",
    ready_statuses: &[],
    deleted_status: "deleted",
    relations: &[RelationSpec {
        field: "attached_network_id",
        target: ResourceKind::VirtualNetwork,
        movable: false,
    }],
    post_create_fields: &[],
    create_checks: &[],
    immutable_fields: &["network_gw", "purpose"],
    updatable: true,
    unwind: &[],
    delete_mode: DeleteMode::Retry,
    confirm_delete: false,
};

static VIRTUAL_NETWORK: ResourceDescriptor = ResourceDescriptor {
    kind: ResourceKind::VirtualNetwork,
    api_path: "user/resource/network/virtual_network",
    detail_key: "resource_virtual_network",
    ready_statuses: &[],
    deleted_status: "deleted",
    relations: &[],
    post_create_fields: &["firewall_rules"],
    create_checks: &[],
    immutable_fields: &["network_cidr"],
    updatable: true,
    unwind: &[],
    delete_mode: DeleteMode::Once,
    confirm_delete: false,
};

/// Descriptor for a kind
pub fn descriptor_for(kind: ResourceKind) -> &'static ResourceDescriptor {
    match kind {
        ResourceKind::VirtualMachine => &VIRTUAL_MACHINE,
        ResourceKind::VirtualMachineAllocation => &VIRTUAL_MACHINE_ALLOCATION,
        ResourceKind::BlockStorage => &BLOCK_STORAGE,
        ResourceKind::BlockStorageSnapshot => &BLOCK_STORAGE_SNAPSHOT,
        ResourceKind::NetworkInterface => &NETWORK_INTERFACE,
        ResourceKind::PublicIp => &PUBLIC_IP,
        ResourceKind::Subnet => &SUBNET,
        ResourceKind::VirtualNetwork => &VIRTUAL_NETWORK,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_maps_to_its_own_descriptor() {
        for kind in ResourceKind::ALL {
            assert_eq!(descriptor_for(kind).kind, kind);
        }
    }

    #[test]
    fn detail_keys_are_unique() {
        let mut keys: Vec<_> = ResourceKind::ALL
            .iter()
            .map(|kind| descriptor_for(*kind).detail_key)
            .collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), ResourceKind::ALL.len());
    }

    #[test]
    fn machine_unwinds_dependents_before_settling() {
        let steps = descriptor_for(ResourceKind::VirtualMachine).unwind;
        assert!(matches!(
            steps.last(),
            Some(UnwindStep::AwaitSettled { .. })
        ));
        assert!(matches!(steps[0], UnwindStep::DetachDependents { .. }));
    }

    #[test]
    fn fixed_relations_count_as_immutable() {
        let nic = descriptor_for(ResourceKind::NetworkInterface);
        assert!(nic.is_immutable("attached_subnet_id"));
        assert!(!nic.is_immutable("attached_machine_id"));
        assert!(nic.is_immutable("mac"));
        assert!(!nic.is_immutable("name"));
    }

    #[test]
    fn kinds_without_ready_status_are_ready_immediately() {
        assert!(descriptor_for(ResourceKind::Subnet).is_ready("creating"));
        assert!(!descriptor_for(ResourceKind::BlockStorage).is_ready("assigned"));
        assert!(descriptor_for(ResourceKind::BlockStorage).is_ready("prepared"));
    }

    #[test]
    fn post_create_fields_are_relations_or_follow_up_attributes() {
        for kind in ResourceKind::ALL {
            let desc = descriptor_for(kind);
            for field in desc.post_create_fields {
                let is_relation = desc.relation(field).is_some_and(|rel| rel.movable);
                assert!(is_relation || *field == "firewall_rules", "{kind}: {field}");
            }
        }
    }
}
