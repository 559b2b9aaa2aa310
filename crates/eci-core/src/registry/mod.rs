//! Plugin-based control-plane registry
//!
//! Control-plane implementations register a factory under a type name, and
//! the front end turns a [`ControlPlaneConfig`] into a live instance without
//! hardcoding the available backends.
//!
//! ```rust,ignore
//! use eci_core::registry::ControlPlaneRegistry;
//!
//! let registry = ControlPlaneRegistry::with_builtin();
//! eci_control_plane_http::register(&registry);
//! let plane = registry.create_control_plane(&config.control_plane).await?;
//! ```

use crate::config::ControlPlaneConfig;
use crate::error::{Error, Result};
use crate::plane::MemoryControlPlaneFactory;
use crate::traits::{ControlPlane, ControlPlaneFactory};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Registry of control-plane factories keyed by type name
#[derive(Default)]
pub struct ControlPlaneRegistry {
    factories: RwLock<HashMap<String, Arc<dyn ControlPlaneFactory>>>,
}

impl ControlPlaneRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the in-process `memory` backend registered
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.register_control_plane("memory", Box::new(MemoryControlPlaneFactory));
        registry
    }

    /// Register a factory under `name`, replacing any previous one
    pub fn register_control_plane(
        &self,
        name: impl Into<String>,
        factory: Box<dyn ControlPlaneFactory>,
    ) {
        let mut factories = self
            .factories
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        factories.insert(name.into(), Arc::from(factory));
    }

    /// Create a control plane from configuration
    ///
    /// # Errors
    ///
    /// - the configured type is not registered
    /// - the factory fails (bad config, unreachable endpoint, ...)
    pub async fn create_control_plane(
        &self,
        config: &ControlPlaneConfig,
    ) -> Result<Arc<dyn ControlPlane>> {
        let plane_type = config.type_name();

        let factory = {
            let factories = self
                .factories
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            factories
                .get(plane_type)
                .cloned()
                .ok_or_else(|| Error::config(format!("Unknown control plane type: {}", plane_type)))?
        };

        factory.create(config).await
    }

    /// List all registered control-plane types
    pub fn list_control_planes(&self) -> Vec<String> {
        let factories = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a control-plane type is registered
    pub fn has_control_plane(&self, name: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RefusingFactory;

    #[async_trait::async_trait]
    impl ControlPlaneFactory for RefusingFactory {
        async fn create(&self, _config: &ControlPlaneConfig) -> Result<Arc<dyn ControlPlane>> {
            Err(Error::config("refusing factory"))
        }
    }

    #[test]
    fn test_registry_registration() {
        let registry = ControlPlaneRegistry::new();
        assert!(!registry.has_control_plane("refusing"));

        registry.register_control_plane("refusing", Box::new(RefusingFactory));

        assert!(registry.has_control_plane("refusing"));
        assert_eq!(registry.list_control_planes(), vec!["refusing".to_string()]);
    }

    #[tokio::test]
    async fn unknown_type_is_a_config_error() {
        let registry = ControlPlaneRegistry::new();
        let err = registry
            .create_control_plane(&ControlPlaneConfig::Memory)
            .await
            .err();
        assert!(matches!(err, Some(Error::Config(_))));
    }

    #[tokio::test]
    async fn builtin_registry_creates_memory_plane() {
        let registry = ControlPlaneRegistry::with_builtin();
        let plane = registry
            .create_control_plane(&ControlPlaneConfig::Memory)
            .await
            .unwrap();
        assert_eq!(plane.plane_name(), "memory");
    }

    #[tokio::test]
    async fn custom_config_dispatches_on_factory_name() {
        let registry = ControlPlaneRegistry::new();
        registry.register_control_plane("refusing", Box::new(RefusingFactory));

        let config = ControlPlaneConfig::Custom {
            factory: "refusing".to_string(),
            config: serde_json::json!({}),
        };
        let err = registry.create_control_plane(&config).await.err();
        assert!(matches!(err, Some(Error::Config(msg)) if msg == "refusing factory"));
    }
}
