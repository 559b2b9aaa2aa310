//! Test doubles and common utilities for reconciliation contract tests
//!
//! Most tests drive the in-process control plane, which journals every call.
//! The helpers here seed typical topologies and inspect that journal.

#![allow(dead_code)]

use eci_core::error::{RemoteError, RemoteResult};
use eci_core::plane::{MemoryControlPlane, PlaneCall, PlaneOp};
use eci_core::{
    Attributes, LifecycleController, PollingConfig, ResourceKind, RetryPolicy, StatusObservation,
};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Retry budget with no real waiting
pub fn fast_polling(max_attempts: u32) -> PollingConfig {
    PollingConfig::uniform(RetryPolicy::new(max_attempts, 0.0, 0.0))
}

/// Controller sharing state with `plane`
pub fn controller(plane: &MemoryControlPlane) -> LifecycleController {
    LifecycleController::new(Arc::new(plane.clone()), fast_polling(5))
}

/// Turn a JSON object literal into attributes
pub fn attrs(value: Value) -> Attributes {
    value.as_object().cloned().unwrap_or_default()
}

/// Seed a machine with two volumes and one network interface attached
pub async fn seed_machine_with_attachments(plane: &MemoryControlPlane, machine_status: &str) {
    plane
        .insert(ResourceKind::VirtualMachine, "vm-1", machine_status, json!({}))
        .await;
    for vol in ["vol-1", "vol-2"] {
        plane
            .insert(
                ResourceKind::BlockStorage,
                vol,
                "prepared",
                json!({ "attached_machine_id": "vm-1", "size_gib": 10 }),
            )
            .await;
    }
    plane
        .insert(
            ResourceKind::NetworkInterface,
            "nic-1",
            "active",
            json!({ "attached_machine_id": "vm-1", "attached_subnet_id": "subnet-1" }),
        )
        .await;
}

/// Index of the first journaled call matching `op`, `kind` and `id`
pub fn position(calls: &[PlaneCall], op: PlaneOp, kind: ResourceKind, id: &str) -> Option<usize> {
    calls.iter().position(|call| call.is(op, kind, id))
}

/// A status accessor that serves a scripted sequence and counts its calls
///
/// Once the script runs out the last entry repeats.
#[derive(Clone)]
pub struct ScriptedAccessor {
    script: Arc<Mutex<VecDeque<RemoteResult<String>>>>,
    last: Arc<Mutex<Option<RemoteResult<String>>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedAccessor {
    pub fn new(script: Vec<RemoteResult<String>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            last: Arc::new(Mutex::new(None)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Serve the given statuses in order
    pub fn statuses(statuses: &[&str]) -> Self {
        Self::new(statuses.iter().map(|s| Ok(s.to_string())).collect())
    }

    /// Fail every call
    pub fn failing(err: RemoteError) -> Self {
        Self::new(vec![Err(err)])
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn observe(&self) -> RemoteResult<StatusObservation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let current = match next {
            Some(entry) => {
                *self.last.lock().unwrap() = Some(entry.clone());
                entry
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Err(RemoteError::transport("empty script"))),
        };
        current.map(StatusObservation::now)
    }
}
