//! Configuration types
//!
//! Configuration is an explicit value handed to the registry and the
//! controller; nothing in the core reads ambient state.

use crate::poller::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EciConfig {
    /// Which control plane to talk to
    pub control_plane: ControlPlaneConfig,

    /// Retry budgets for the different kinds of waits
    #[serde(default)]
    pub polling: PollingConfig,
}

impl EciConfig {
    pub fn new(control_plane: ControlPlaneConfig) -> Self {
        Self {
            control_plane,
            polling: PollingConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.control_plane.validate()?;
        self.polling.validate()?;
        Ok(())
    }
}

/// Control-plane configuration
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlPlaneConfig {
    /// REST control plane
    Http {
        /// Base URL, e.g. `https://portal.example.com`
        api_endpoint: String,
        /// Bearer token
        api_access_token: String,
        /// Path prefix prepended to every resource path
        #[serde(default = "default_path_prefix")]
        path_prefix: String,
        /// Zone every created resource is placed in
        zone_id: String,
    },

    /// In-process control plane (tests, dry runs)
    #[default]
    Memory,

    /// Externally registered control plane
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl ControlPlaneConfig {
    /// Validate the control-plane configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            ControlPlaneConfig::Http {
                api_endpoint,
                api_access_token,
                zone_id,
                ..
            } => {
                if api_endpoint.is_empty() {
                    return Err(crate::Error::config("API endpoint cannot be empty"));
                }
                if !api_endpoint.starts_with("https://") && !api_endpoint.starts_with("http://") {
                    return Err(crate::Error::config(format!(
                        "API endpoint must use HTTP or HTTPS scheme. Got: {}",
                        api_endpoint
                    )));
                }
                if api_access_token.is_empty() {
                    return Err(crate::Error::config("API access token cannot be empty"));
                }
                if zone_id.is_empty() {
                    return Err(crate::Error::config("Zone id cannot be empty"));
                }
                Ok(())
            }
            ControlPlaneConfig::Memory => Ok(()),
            ControlPlaneConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom control plane factory cannot be empty",
                    ));
                }
                if config.is_null() {
                    return Err(crate::Error::config(
                        "Custom control plane config cannot be null",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Registry name of this control plane
    pub fn type_name(&self) -> &str {
        match self {
            ControlPlaneConfig::Http { .. } => "http",
            ControlPlaneConfig::Memory => "memory",
            ControlPlaneConfig::Custom { factory, .. } => factory,
        }
    }
}

// Keeps the token out of logs
impl fmt::Debug for ControlPlaneConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlPlaneConfig::Http {
                api_endpoint,
                path_prefix,
                zone_id,
                ..
            } => f
                .debug_struct("Http")
                .field("api_endpoint", api_endpoint)
                .field("api_access_token", &"<REDACTED>")
                .field("path_prefix", path_prefix)
                .field("zone_id", zone_id)
                .finish(),
            ControlPlaneConfig::Memory => f.write_str("Memory"),
            ControlPlaneConfig::Custom { factory, config } => f
                .debug_struct("Custom")
                .field("factory", factory)
                .field("config", config)
                .finish(),
        }
    }
}

fn default_path_prefix() -> String {
    "/api".to_string()
}

/// Retry budgets per kind of wait
///
/// Post-create and teardown waits share the 15 second cap; the repeated
/// subnet delete uses a tighter 10 second cap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Waiting for a freshly created resource to become ready
    #[serde(default = "default_wait_policy")]
    pub ready: RetryPolicy,

    /// Waiting for dependents and the resource itself to settle before delete
    #[serde(default = "default_wait_policy")]
    pub teardown: RetryPolicy,

    /// Repeating a destructive call the control plane keeps rejecting
    #[serde(default = "default_delete_retry_policy")]
    pub delete_retry: RetryPolicy,
}

impl PollingConfig {
    /// Same policy everywhere (handy in tests)
    pub fn uniform(policy: RetryPolicy) -> Self {
        Self {
            ready: policy,
            teardown: policy,
            delete_retry: policy,
        }
    }

    pub fn validate(&self) -> Result<(), crate::Error> {
        self.ready.validate()?;
        self.teardown.validate()?;
        self.delete_retry.validate()?;
        Ok(())
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            ready: default_wait_policy(),
            teardown: default_wait_policy(),
            delete_retry: default_delete_retry_policy(),
        }
    }
}

fn default_wait_policy() -> RetryPolicy {
    RetryPolicy::new(10, 0.5, 15.0)
}

fn default_delete_retry_policy() -> RetryPolicy {
    RetryPolicy::new(10, 0.5, 10.0)
}
