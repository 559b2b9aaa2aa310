//! Core traits
//!
//! - [`ControlPlane`]: the remote collaborator every lifecycle operation talks to
//! - [`ControlPlaneFactory`]: builds a control plane from configuration

pub mod control_plane;

pub use control_plane::{ControlPlane, ControlPlaneFactory};
