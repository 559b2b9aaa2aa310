// # eci-core
//
// Reconciliation core for an asynchronous cloud control plane.
//
// Every mutating call against the control plane returns immediately while
// the real work happens in the background, so the core has to poll, order
// its calls around dependency edges, and treat "already gone" as success.
//
// ## Architecture Overview
//
// - **ControlPlane**: Trait for the remote API (create/get/patch/delete/list)
// - **Status Poller**: Bounded exponential-backoff wait for a target status
// - **Error Classifier**: Decides whether a failed delete still means "gone"
// - **Dependency Unwinder**: Detaches and terminates dependents before a delete
// - **LifecycleController**: Generic CRUD driven by per-kind descriptors
// - **ControlPlaneRegistry**: Plugin-based registry of control-plane backends
//
// ## Design Principles
//
// 1. **Descriptor-Driven**: Kind-specific behavior is data, not branches
// 2. **Idempotent Teardown**: Deleting an absent resource succeeds
// 3. **Diagnostics, not Panics**: Every operation reports an ordered diagnostic list
// 4. **Library-First**: The CLI is a thin shell over this crate

pub mod classifier;
pub mod config;
pub mod controller;
pub mod descriptor;
pub mod diagnostics;
pub mod error;
pub mod model;
pub mod plane;
pub mod poller;
pub mod registry;
pub mod traits;
pub mod unwinder;

// Re-export core types for convenience
pub use classifier::{ClassifiedOutcome, Satisfied, classify_delete_outcome};
pub use config::{ControlPlaneConfig, EciConfig, PollingConfig};
pub use controller::{LifecycleController, LookupOutcome, Observed, Outcome};
pub use descriptor::{ResourceDescriptor, descriptor_for};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{ApiError, Error, RemoteError, RemoteResult, Result};
pub use model::{
    Attributes, DataSourceKind, DeleteResponse, FieldDelta, FieldDeltas, InfraRecord, ListFilter,
    NAME_ILIKE, Patch, RemoteResource, ResourceKind,
};
pub use plane::MemoryControlPlane;
pub use poller::{RetryPolicy, StatusObservation, await_status};
pub use registry::ControlPlaneRegistry;
pub use traits::{ControlPlane, ControlPlaneFactory};
pub use unwinder::{UnwindOutcome, Unwinder};
