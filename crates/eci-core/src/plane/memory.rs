// # Memory Control Plane
//
// In-process implementation of ControlPlane.
//
// ## Purpose
//
// Reproduces the observable rules of the remote control plane without a
// network: asynchronous status progressions, 404 for unknown ids, conflicts
// for deleting attached or already-deleted resources. Used by the contract
// tests and by the `memory` backend of the command-line front end.
//
// ## Status progressions
//
// Every record carries a queue of upcoming statuses. A `get` returns the
// current status and then advances to the next queued one, so a caller
// polling the record sees it converge one read at a time.
//
// ## Fault injection and journal
//
// Faults registered with `fail_next`/`fail_always` are returned instead of
// executing the call. Every call is appended to a journal that tests use to
// assert ordering.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::classifier::UNEXPECTED_STATUS;
use crate::config::ControlPlaneConfig;
use crate::descriptor::{IDLE, descriptor_for};
use crate::error::{ApiError, RemoteError, RemoteResult};
use crate::model::{
    Attributes, DataSourceKind, DeleteResponse, InfraRecord, ListFilter, Patch, RemoteResource,
    ResourceKind,
};
use crate::traits::{ControlPlane, ControlPlaneFactory};

/// Code returned when a delete is blocked by a live attachment
pub const RESOURCE_ATTACHED: &str = "resource_attached";

/// Operation recorded in the journal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaneOp {
    Create,
    Get,
    Patch,
    Delete,
    List,
}

/// One journaled call
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneCall {
    pub op: PlaneOp,
    pub kind: ResourceKind,
    /// Target id; `None` for create and list
    pub id: Option<String>,
    /// Body of a patch
    pub patch: Option<Patch>,
}

impl PlaneCall {
    pub fn is(&self, op: PlaneOp, kind: ResourceKind, id: &str) -> bool {
        self.op == op && self.kind == kind && self.id.as_deref() == Some(id)
    }
}

#[derive(Debug, Clone)]
struct Fault {
    op: PlaneOp,
    kind: ResourceKind,
    id: Option<String>,
    error: RemoteError,
    remaining: Option<usize>,
}

impl Fault {
    fn matches(&self, op: PlaneOp, kind: ResourceKind, id: Option<&str>) -> bool {
        self.op == op
            && self.kind == kind
            && self.remaining != Some(0)
            && self.id.as_deref().is_none_or(|wanted| Some(wanted) == id)
    }
}

#[derive(Debug, Clone)]
struct Record {
    status: String,
    attributes: Attributes,
    upcoming: VecDeque<String>,
}

impl Record {
    fn to_resource(&self, id: &str) -> RemoteResource {
        RemoteResource {
            id: id.to_string(),
            status: self.status.clone(),
            attributes: self.attributes.clone(),
        }
    }

    fn advance(&mut self) {
        if let Some(next) = self.upcoming.pop_front() {
            self.status = next;
        }
    }
}

#[derive(Debug, Default)]
struct PlaneState {
    records: HashMap<(ResourceKind, String), Record>,
    next_id: HashMap<ResourceKind, u64>,
    progressions: HashMap<ResourceKind, Vec<String>>,
    deletion_progressions: HashMap<ResourceKind, Vec<String>>,
    faults: Vec<Fault>,
    journal: Vec<PlaneCall>,
    catalogue: HashMap<DataSourceKind, Vec<InfraRecord>>,
    lookup_faults: Vec<(DataSourceKind, RemoteError)>,
    lookups: Vec<(DataSourceKind, ListFilter)>,
}

impl PlaneState {
    fn take_fault(&mut self, op: PlaneOp, kind: ResourceKind, id: Option<&str>) -> Option<RemoteError> {
        let fault = self.faults.iter_mut().find(|f| f.matches(op, kind, id))?;
        if let Some(remaining) = fault.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(fault.error.clone())
    }

    fn record(&mut self, op: PlaneOp, kind: ResourceKind, id: Option<&str>, patch: Option<&Patch>) {
        self.journal.push(PlaneCall {
            op,
            kind,
            id: id.map(str::to_string),
            patch: patch.cloned(),
        });
    }

    fn is_live(&self, kind: ResourceKind, record: &Record) -> bool {
        record.status != descriptor_for(kind).deleted_status
    }

    /// Live dependents of `kind` whose `field` points at `id`
    fn dependents(&self, kind: ResourceKind, field: &str, id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .records
            .iter()
            .filter(|((k, _), record)| *k == kind && self.is_live(kind, record))
            .filter(|(_, record)| record.attributes.get(field).and_then(Value::as_str) == Some(id))
            .map(|((_, dep_id), _)| dep_id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn set_status(&mut self, kind: ResourceKind, id: &str, status: &str) {
        if let Some(record) = self.records.get_mut(&(kind, id.to_string())) {
            record.status = status.to_string();
            record.upcoming.clear();
        }
    }

    /// Reason a delete must be refused, if any
    fn delete_blocker(&self, kind: ResourceKind, id: &str, record: &Record) -> Option<ApiError> {
        let attached = |what: &str, other: &str| {
            Some(
                ApiError::new(409)
                    .with_code(RESOURCE_ATTACHED)
                    .with_message(format!("{} {} is still attached to {}", kind, id, what))
                    .with_detail(object(json!({ descriptor_for(kind).detail_key: { "attached": other } }))),
            )
        };

        for rel in descriptor_for(kind).relations.iter().filter(|rel| rel.movable) {
            if let Some(owner) = record.attributes.get(rel.field).and_then(Value::as_str) {
                return attached(rel.target.as_str(), owner);
            }
        }

        if kind == ResourceKind::VirtualMachine {
            for dependent in [ResourceKind::BlockStorage, ResourceKind::NetworkInterface] {
                if let Some(dep) = self.dependents(dependent, "attached_machine_id", id).first() {
                    return attached(dependent.as_str(), dep.as_str());
                }
            }
            if record.status != IDLE {
                return Some(
                    ApiError::new(409)
                        .with_code(UNEXPECTED_STATUS)
                        .with_message("virtual machine is not idle")
                        .with_detail(object(json!({
                            descriptor_for(kind).detail_key: { "status": record.status }
                        }))),
                );
            }
        }

        None
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn not_found(kind: ResourceKind, id: &str) -> RemoteError {
    ApiError::new(404)
        .with_code("not_found")
        .with_message(format!("{} {} does not exist", kind, id))
        .into()
}

fn id_prefix(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::VirtualMachine => "vm",
        ResourceKind::VirtualMachineAllocation => "alloc",
        ResourceKind::BlockStorage => "vol",
        ResourceKind::BlockStorageSnapshot => "snap",
        ResourceKind::NetworkInterface => "nic",
        ResourceKind::PublicIp => "pip",
        ResourceKind::Subnet => "subnet",
        ResourceKind::VirtualNetwork => "vnet",
    }
}

fn default_progression(kind: ResourceKind) -> &'static [&'static str] {
    match kind {
        ResourceKind::VirtualMachine => &[IDLE],
        ResourceKind::VirtualMachineAllocation => &["running"],
        ResourceKind::BlockStorage | ResourceKind::BlockStorageSnapshot => &["assigned", "prepared"],
        ResourceKind::NetworkInterface | ResourceKind::PublicIp => &["assigned", "active"],
        ResourceKind::Subnet | ResourceKind::VirtualNetwork => &["active"],
    }
}

/// In-process control plane
///
/// Cloning yields another handle to the same state, so a test can keep one
/// handle for assertions while the controller owns another.
///
/// # Example
///
/// ```rust,no_run
/// use eci_core::plane::MemoryControlPlane;
/// use eci_core::{ControlPlane, ResourceKind};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let plane = MemoryControlPlane::new();
///     let id = plane.create(ResourceKind::Subnet, &Default::default()).await?;
///     let subnet = plane.get(ResourceKind::Subnet, &id).await?;
///     assert_eq!(subnet.status, "active");
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryControlPlane {
    inner: Arc<RwLock<PlaneState>>,
}

impl MemoryControlPlane {
    /// Create an empty control plane
    pub fn new() -> Self {
        Self::default()
    }

    /// Statuses a newly created resource of `kind` walks through
    pub async fn set_progression(&self, kind: ResourceKind, statuses: &[&str]) {
        let mut guard = self.inner.write().await;
        guard
            .progressions
            .insert(kind, statuses.iter().map(|s| s.to_string()).collect());
    }

    /// Statuses a deleted resource of `kind` walks through instead of vanishing
    pub async fn set_deletion_progression(&self, kind: ResourceKind, statuses: &[&str]) {
        let mut guard = self.inner.write().await;
        guard
            .deletion_progressions
            .insert(kind, statuses.iter().map(|s| s.to_string()).collect());
    }

    /// Seed a record directly, bypassing the journal
    pub async fn insert(&self, kind: ResourceKind, id: &str, status: &str, attributes: Value) {
        let mut guard = self.inner.write().await;
        guard.records.insert(
            (kind, id.to_string()),
            Record {
                status: status.to_string(),
                attributes: object(attributes),
                upcoming: VecDeque::new(),
            },
        );
    }

    /// Force a status, dropping any queued progression
    pub async fn set_status(&self, kind: ResourceKind, id: &str, status: &str) {
        self.inner.write().await.set_status(kind, id, status);
    }

    /// Queue statuses served by subsequent reads of one record
    pub async fn script_statuses(&self, kind: ResourceKind, id: &str, statuses: &[&str]) {
        let mut guard = self.inner.write().await;
        if let Some(record) = guard.records.get_mut(&(kind, id.to_string())) {
            record.upcoming = statuses.iter().map(|s| s.to_string()).collect();
        }
    }

    /// Fail the next matching call with `error`
    pub async fn fail_next(&self, op: PlaneOp, kind: ResourceKind, id: Option<&str>, error: RemoteError) {
        self.add_fault(op, kind, id, error, Some(1)).await;
    }

    /// Fail every matching call with `error`
    pub async fn fail_always(&self, op: PlaneOp, kind: ResourceKind, id: Option<&str>, error: RemoteError) {
        self.add_fault(op, kind, id, error, None).await;
    }

    async fn add_fault(
        &self,
        op: PlaneOp,
        kind: ResourceKind,
        id: Option<&str>,
        error: RemoteError,
        remaining: Option<usize>,
    ) {
        let mut guard = self.inner.write().await;
        guard.faults.push(Fault {
            op,
            kind,
            id: id.map(str::to_string),
            error,
            remaining,
        });
    }

    /// Add a catalogue entry; `entry` must carry a string `id`
    pub async fn insert_catalogue(&self, source: DataSourceKind, entry: Value) {
        if let Ok(record) = InfraRecord::from_json(entry) {
            let mut guard = self.inner.write().await;
            guard.catalogue.entry(source).or_default().push(record);
        }
    }

    /// Fail the next lookup of `source` with `error`
    pub async fn fail_next_lookup(&self, source: DataSourceKind, error: RemoteError) {
        self.inner.write().await.lookup_faults.push((source, error));
    }

    /// Every lookup made so far, in order
    pub async fn lookups(&self) -> Vec<(DataSourceKind, ListFilter)> {
        self.inner.read().await.lookups.clone()
    }

    /// Peek at a record without journaling or advancing it
    pub async fn snapshot(&self, kind: ResourceKind, id: &str) -> Option<RemoteResource> {
        let guard = self.inner.read().await;
        guard
            .records
            .get(&(kind, id.to_string()))
            .map(|record| record.to_resource(id))
    }

    /// Every call made so far, in order
    pub async fn calls(&self) -> Vec<PlaneCall> {
        self.inner.read().await.journal.clone()
    }

    /// Journaled calls of one operation type
    pub async fn calls_of(&self, op: PlaneOp) -> Vec<PlaneCall> {
        let guard = self.inner.read().await;
        guard.journal.iter().filter(|c| c.op == op).cloned().collect()
    }

    /// Forget the journal (e.g. after seeding through the trait)
    pub async fn clear_calls(&self) {
        self.inner.write().await.journal.clear();
    }

    /// Number of live records
    pub async fn len(&self) -> usize {
        let guard = self.inner.read().await;
        guard
            .records
            .iter()
            .filter(|((kind, _), record)| guard.is_live(*kind, record))
            .count()
    }

    /// Check if no live records exist
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ControlPlane for MemoryControlPlane {
    async fn create(&self, kind: ResourceKind, spec: &Attributes) -> RemoteResult<String> {
        let mut guard = self.inner.write().await;
        guard.record(PlaneOp::Create, kind, None, None);
        if let Some(err) = guard.take_fault(PlaneOp::Create, kind, None) {
            return Err(err);
        }

        let counter = guard.next_id.entry(kind).or_insert(0);
        *counter += 1;
        let id = format!("{}-{}", id_prefix(kind), counter);

        let mut progression: VecDeque<String> = guard
            .progressions
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| default_progression(kind).iter().map(|s| s.to_string()).collect())
            .into();
        let status = progression.pop_front().unwrap_or_else(|| "active".to_string());

        if kind == ResourceKind::VirtualMachineAllocation
            && let Some(machine) = spec.get("machine_id").and_then(Value::as_str)
        {
            let machine = machine.to_string();
            guard.set_status(ResourceKind::VirtualMachine, &machine, "running");
        }

        guard.records.insert(
            (kind, id.clone()),
            Record {
                status,
                attributes: spec.clone(),
                upcoming: progression,
            },
        );
        Ok(id)
    }

    async fn get(&self, kind: ResourceKind, id: &str) -> RemoteResult<RemoteResource> {
        let mut guard = self.inner.write().await;
        guard.record(PlaneOp::Get, kind, Some(id), None);
        if let Some(err) = guard.take_fault(PlaneOp::Get, kind, Some(id)) {
            return Err(err);
        }

        let record = guard
            .records
            .get_mut(&(kind, id.to_string()))
            .ok_or_else(|| not_found(kind, id))?;
        let resource = record.to_resource(id);
        record.advance();
        Ok(resource)
    }

    async fn patch(&self, kind: ResourceKind, id: &str, patch: &Patch) -> RemoteResult<()> {
        let mut guard = self.inner.write().await;
        guard.record(PlaneOp::Patch, kind, Some(id), Some(patch));
        if let Some(err) = guard.take_fault(PlaneOp::Patch, kind, Some(id)) {
            return Err(err);
        }

        let record = guard
            .records
            .get_mut(&(kind, id.to_string()))
            .ok_or_else(|| not_found(kind, id))?;
        for (field, value) in patch.fields() {
            record.attributes.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn delete(&self, kind: ResourceKind, id: &str) -> RemoteResult<DeleteResponse> {
        let mut guard = self.inner.write().await;
        guard.record(PlaneOp::Delete, kind, Some(id), None);
        if let Some(err) = guard.take_fault(PlaneOp::Delete, kind, Some(id)) {
            return Err(err);
        }

        let desc = descriptor_for(kind);
        let key = (kind, id.to_string());
        let record = guard.records.get(&key).cloned().ok_or_else(|| not_found(kind, id))?;

        if record.status == desc.deleted_status {
            return Err(ApiError::new(409)
                .with_code(UNEXPECTED_STATUS)
                .with_message("resource is not in a deletable status")
                .with_detail(object(json!({ desc.detail_key: { "status": record.status } })))
                .into());
        }

        if let Some(err) = guard.delete_blocker(kind, id, &record) {
            return Err(err.into());
        }

        if kind == ResourceKind::VirtualMachineAllocation
            && let Some(machine) = record.attributes.get("machine_id").and_then(Value::as_str)
        {
            let machine = machine.to_string();
            guard.set_status(ResourceKind::VirtualMachine, &machine, IDLE);
        }

        let deletion = guard.deletion_progressions.get(&kind).cloned();
        let status = match deletion {
            Some(statuses) if !statuses.is_empty() => {
                let mut upcoming: VecDeque<String> = statuses.into();
                let first = upcoming.pop_front().unwrap_or_else(|| desc.deleted_status.to_string());
                if let Some(record) = guard.records.get_mut(&key) {
                    record.status = first.clone();
                    record.upcoming = upcoming;
                }
                first
            }
            _ => {
                guard.records.remove(&key);
                desc.deleted_status.to_string()
            }
        };

        Ok(DeleteResponse {
            id: id.to_string(),
            status,
        })
    }

    async fn list(&self, kind: ResourceKind, filter: &ListFilter) -> RemoteResult<Vec<RemoteResource>> {
        let mut guard = self.inner.write().await;
        guard.record(PlaneOp::List, kind, None, None);
        if let Some(err) = guard.take_fault(PlaneOp::List, kind, None) {
            return Err(err);
        }

        let mut resources: Vec<RemoteResource> = guard
            .records
            .iter()
            .filter(|((k, _), record)| *k == kind && guard.is_live(kind, record))
            .map(|((_, id), record)| record.to_resource(id))
            .filter(|resource| filter.matches(resource))
            .collect();
        resources.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(resources)
    }

    async fn lookup(
        &self,
        source: DataSourceKind,
        filter: &ListFilter,
        count: usize,
    ) -> RemoteResult<Vec<InfraRecord>> {
        let mut guard = self.inner.write().await;
        guard.lookups.push((source, filter.clone()));

        if let Some(pos) = guard.lookup_faults.iter().position(|(s, _)| *s == source) {
            let (_, error) = guard.lookup_faults.remove(pos);
            return Err(error);
        }

        let entries = guard.catalogue.get(&source).map(Vec::as_slice).unwrap_or_default();
        Ok(entries
            .iter()
            .filter(|entry| {
                filter
                    .criteria()
                    .chain(source.fixed_filters().iter().copied())
                    .all(|(field, value)| entry.matches(field, value))
            })
            .take(count)
            .cloned()
            .collect())
    }

    fn plane_name(&self) -> &'static str {
        "memory"
    }
}

/// Factory for the `memory` control plane
pub struct MemoryControlPlaneFactory;

#[async_trait]
impl ControlPlaneFactory for MemoryControlPlaneFactory {
    async fn create(&self, config: &ControlPlaneConfig) -> crate::Result<Arc<dyn ControlPlane>> {
        match config {
            ControlPlaneConfig::Memory => Ok(Arc::new(MemoryControlPlane::new())),
            _ => Err(crate::Error::config("Invalid config for memory control plane")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn created_resources_follow_their_progression() {
        let plane = MemoryControlPlane::new();
        let id = plane
            .create(ResourceKind::BlockStorage, &object(json!({ "size_gib": 10 })))
            .await
            .unwrap();

        assert_eq!(id, "vol-1");
        let first = plane.get(ResourceKind::BlockStorage, &id).await.unwrap();
        let second = plane.get(ResourceKind::BlockStorage, &id).await.unwrap();
        assert_eq!(first.status, "assigned");
        assert_eq!(second.status, "prepared");
        assert_eq!(second.attributes["size_gib"], 10);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let plane = MemoryControlPlane::new();
        let err = plane.get(ResourceKind::Subnet, "missing").await.unwrap_err();
        assert!(err.is_not_found());
        let err = plane.delete(ResourceKind::Subnet, "missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn deleting_attached_volume_is_rejected() {
        let plane = MemoryControlPlane::new();
        plane
            .insert(ResourceKind::BlockStorage, "vol-1", "prepared", json!({ "attached_machine_id": "vm-1" }))
            .await;

        let err = plane.delete(ResourceKind::BlockStorage, "vol-1").await.unwrap_err();
        assert!(err.api().is_some_and(|api| api.is_code(RESOURCE_ATTACHED)));
    }

    #[tokio::test]
    async fn deleting_deleted_record_reports_its_status() {
        let plane = MemoryControlPlane::new();
        plane.insert(ResourceKind::Subnet, "subnet-1", "deleted", json!({})).await;

        let err = plane.delete(ResourceKind::Subnet, "subnet-1").await.unwrap_err();
        let api = err.api().cloned().unwrap();
        assert!(api.is_code(UNEXPECTED_STATUS));
        assert_eq!(api.detail_status("resource_subnet"), Some("deleted"));
    }

    #[tokio::test]
    async fn machine_with_volume_cannot_be_deleted() {
        let plane = MemoryControlPlane::new();
        plane.insert(ResourceKind::VirtualMachine, "vm-1", "idle", json!({})).await;
        plane
            .insert(ResourceKind::BlockStorage, "vol-1", "prepared", json!({ "attached_machine_id": "vm-1" }))
            .await;

        let err = plane.delete(ResourceKind::VirtualMachine, "vm-1").await.unwrap_err();
        assert!(err.api().is_some_and(|api| api.is_code(RESOURCE_ATTACHED)));
    }

    #[tokio::test]
    async fn allocation_lifecycle_drives_machine_status() {
        let plane = MemoryControlPlane::new();
        plane.insert(ResourceKind::VirtualMachine, "vm-1", "idle", json!({})).await;

        let alloc = plane
            .create(ResourceKind::VirtualMachineAllocation, &object(json!({ "machine_id": "vm-1" })))
            .await
            .unwrap();
        assert_eq!(plane.snapshot(ResourceKind::VirtualMachine, "vm-1").await.unwrap().status, "running");

        plane.delete(ResourceKind::VirtualMachineAllocation, &alloc).await.unwrap();
        assert_eq!(plane.snapshot(ResourceKind::VirtualMachine, "vm-1").await.unwrap().status, "idle");
    }

    #[tokio::test]
    async fn faults_fire_once_then_clear() {
        let plane = MemoryControlPlane::new();
        plane.insert(ResourceKind::Subnet, "subnet-1", "active", json!({})).await;
        plane
            .fail_next(PlaneOp::Get, ResourceKind::Subnet, Some("subnet-1"), RemoteError::transport("reset"))
            .await;

        assert!(plane.get(ResourceKind::Subnet, "subnet-1").await.is_err());
        assert!(plane.get(ResourceKind::Subnet, "subnet-1").await.is_ok());
        assert_eq!(plane.calls_of(PlaneOp::Get).await.len(), 2);
    }

    #[tokio::test]
    async fn list_filters_by_relation_and_skips_deleted() {
        let plane = MemoryControlPlane::new();
        plane
            .insert(ResourceKind::PublicIp, "pip-1", "active", json!({ "attached_network_interface_id": "nic-1" }))
            .await;
        plane
            .insert(ResourceKind::PublicIp, "pip-2", "deleted", json!({ "attached_network_interface_id": "nic-1" }))
            .await;
        plane
            .insert(ResourceKind::PublicIp, "pip-3", "active", json!({ "attached_network_interface_id": "nic-2" }))
            .await;

        let found = plane
            .list(
                ResourceKind::PublicIp,
                &ListFilter::new().with("attached_network_interface_id", "nic-1"),
            )
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["pip-1"]);
    }
}
