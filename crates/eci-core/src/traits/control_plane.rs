// # Control Plane Trait
//
// Defines the interface to the remote control plane that owns durable
// resource records.
//
// ## Implementations
//
// - HTTP: `eci-control-plane-http` crate
// - In-process: `MemoryControlPlane` in this crate
//
// ## Usage
//
// ```rust,ignore
// use eci_core::{ControlPlane, ResourceKind};
//
// let resource = plane.get(ResourceKind::BlockStorage, "vol-1").await?;
// println!("{} is {}", resource.id, resource.status);
// ```

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::RemoteResult;
use crate::model::{
    Attributes, DataSourceKind, DeleteResponse, InfraRecord, ListFilter, Patch, RemoteResource,
    ResourceKind,
};

/// Trait for control-plane implementations
///
/// Every method performs exactly one remote call and reports the raw
/// outcome. Retrying, backoff, ordering and interpretation of failures are
/// owned by the lifecycle controller.
///
/// # Errors
///
/// Failures are always a [`RemoteError`](crate::RemoteError): either the
/// structured payload the control plane returned, or a transport error when
/// no structured answer could be obtained.
///
/// # Thread Safety
///
/// Implementations must be usable across async tasks.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Create a resource and return its id
    ///
    /// The resource enters an initial, non-terminal status.
    async fn create(&self, kind: ResourceKind, spec: &Attributes) -> RemoteResult<String>;

    /// Read a resource
    async fn get(&self, kind: ResourceKind, id: &str) -> RemoteResult<RemoteResource>;

    /// Partially update a resource; `null` clears an optional field
    async fn patch(&self, kind: ResourceKind, id: &str, patch: &Patch) -> RemoteResult<()>;

    /// Issue the destructive call
    async fn delete(&self, kind: ResourceKind, id: &str) -> RemoteResult<DeleteResponse>;

    /// Enumerate resources of a kind matching `filter`
    async fn list(&self, kind: ResourceKind, filter: &ListFilter)
    -> RemoteResult<Vec<RemoteResource>>;

    /// Search a read-only catalogue, returning at most `count` entries
    ///
    /// Implementations add the source's fixed filters and, for zone-scoped
    /// sources, their own zone.
    async fn lookup(
        &self,
        source: DataSourceKind,
        filter: &ListFilter,
        count: usize,
    ) -> RemoteResult<Vec<InfraRecord>>;

    /// Name of this implementation (for logging)
    fn plane_name(&self) -> &'static str;
}

/// Helper trait for constructing control planes from configuration
#[async_trait]
pub trait ControlPlaneFactory: Send + Sync {
    /// Create a control plane instance
    ///
    /// Construction may involve remote calls (e.g. resolving the
    /// organisation the credentials belong to).
    async fn create(
        &self,
        config: &crate::config::ControlPlaneConfig,
    ) -> Result<Arc<dyn ControlPlane>, crate::Error>;
}
