// # Control Plane Implementations
//
// In-process implementations of the ControlPlane trait. The HTTP
// implementation lives in its own crate.

pub mod memory;

pub use memory::{MemoryControlPlane, MemoryControlPlaneFactory, PlaneCall, PlaneOp, RESOURCE_ATTACHED};
