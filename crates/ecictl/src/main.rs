// # ecictl - ECI reconciliation CLI
//
// Thin front end over eci-core. Every lifecycle rule lives in the core
// crate; this binary only reads configuration, wires a control plane and
// prints the outcome of a single operation as JSON.
//
// ## Configuration
//
// Connection settings come from environment variables:
//
// ### Control plane
// - `ECI_BACKEND`: Control plane type (http, memory). Defaults to http.
// - `ECI_API_ENDPOINT`: Base URL of the control plane (for http)
// - `ECI_API_ACCESS_TOKEN`: Bearer token (for http)
// - `ECI_API_PATH_PREFIX`: Path prefix of the API, default `/api`
// - `ECI_ZONE_ID`: Zone new resources are created in (for http)
//
// ### Polling
// - `ECI_POLL_MAX_ATTEMPTS`: Attempts for every status wait
// - `ECI_POLL_CAP_SECS`: Upper bound of a single backoff delay
//
// ### Logging
// - `ECI_LOG_LEVEL`: trace, debug, info, warn, error (logs go to stderr)
//
// ## Example
//
// ```bash
// export ECI_API_ENDPOINT=https://portal.example.com
// export ECI_API_ACCESS_TOKEN=...
// export ECI_ZONE_ID=zone-1
//
// ecictl create block_storage '{"name":"data","size_gib":20}'
// ecictl update block_storage vol-1 '{"attached_machine_id":"vm-1"}'
// ecictl delete virtual_machine vm-1
// ecictl lookup zone kr-central-a --region-id region-1
// ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use eci_core::{
    Attributes, ControlPlaneConfig, ControlPlaneRegistry, DataSourceKind, Diagnostics, EciConfig,
    FieldDeltas, LifecycleController, ListFilter, PollingConfig, ResourceKind, Severity,
};
use serde::Serialize;
use std::env;
use std::process::ExitCode;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Exit codes
///
/// - 0: Operation succeeded
/// - 1: Configuration or usage error
/// - 2: Operation failed (error diagnostics or unreachable control plane)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EciExitCode {
    Success = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<EciExitCode> for ExitCode {
    fn from(code: EciExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

#[derive(Parser)]
#[command(name = "ecictl", version, about = "Reconcile ECI resources against the control plane")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a resource and wait until it is ready
    Create {
        /// Resource kind, e.g. block_storage
        kind: ResourceKind,
        /// Desired attributes as a JSON object
        spec: String,
    },
    /// Read the current state of a resource
    Read {
        kind: ResourceKind,
        id: String,
    },
    /// Converge a resource towards the given attributes
    Update {
        kind: ResourceKind,
        id: String,
        /// Desired attributes as a JSON object; omitted fields are left alone
        spec: String,
    },
    /// Delete a resource after unwinding its dependencies
    Delete {
        kind: ResourceKind,
        id: String,
    },
    /// Resolve a zone, region, instance type or image name to its entry
    Lookup {
        /// Catalogue, e.g. instance_type
        source: DataSourceKind,
        name: String,
        /// Region the zone belongs to (required for zone lookups)
        #[arg(long)]
        region_id: Option<String>,
    },
    /// List the supported resource kinds and catalogues
    Kinds,
}

/// Application configuration
struct Config {
    backend: String,
    api_endpoint: Option<String>,
    api_access_token: Option<String>,
    path_prefix: String,
    zone_id: Option<String>,
    poll_max_attempts: Option<u32>,
    poll_cap_secs: Option<f64>,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let poll_max_attempts = lookup("ECI_POLL_MAX_ATTEMPTS")
            .map(|s| s.parse::<u32>())
            .transpose()
            .context("ECI_POLL_MAX_ATTEMPTS must be a non-negative integer")?;
        let poll_cap_secs = lookup("ECI_POLL_CAP_SECS")
            .map(|s| s.parse::<f64>())
            .transpose()
            .context("ECI_POLL_CAP_SECS must be a number of seconds")?;

        Ok(Self {
            backend: lookup("ECI_BACKEND").unwrap_or_else(|| "http".to_string()),
            api_endpoint: lookup("ECI_API_ENDPOINT"),
            api_access_token: lookup("ECI_API_ACCESS_TOKEN"),
            path_prefix: lookup("ECI_API_PATH_PREFIX").unwrap_or_else(|| "/api".to_string()),
            zone_id: lookup("ECI_ZONE_ID"),
            poll_max_attempts,
            poll_cap_secs,
            log_level: lookup("ECI_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    fn validate(&self) -> Result<()> {
        match self.backend.as_str() {
            "http" => {
                if self.api_endpoint.as_ref().is_none_or(|e| e.is_empty()) {
                    anyhow::bail!(
                        "ECI_API_ENDPOINT is required when ECI_BACKEND=http. \
                        Set it via: export ECI_API_ENDPOINT=https://portal.example.com"
                    );
                }
                if self.api_access_token.as_ref().is_none_or(|t| t.is_empty()) {
                    anyhow::bail!("ECI_API_ACCESS_TOKEN is required when ECI_BACKEND=http");
                }
                if self.zone_id.as_ref().is_none_or(|z| z.is_empty()) {
                    anyhow::bail!("ECI_ZONE_ID is required when ECI_BACKEND=http");
                }
                if !cfg!(feature = "http") {
                    anyhow::bail!("ecictl was built without the http control plane");
                }
            }
            "memory" => {}
            other => anyhow::bail!(
                "ECI_BACKEND '{}' is not supported. Supported backends: http, memory",
                other
            ),
        }

        if let Some(attempts) = self.poll_max_attempts
            && attempts == 0
        {
            anyhow::bail!("ECI_POLL_MAX_ATTEMPTS must be at least 1");
        }

        if let Some(cap) = self.poll_cap_secs
            && !(cap > 0.0 && cap.is_finite())
        {
            anyhow::bail!("ECI_POLL_CAP_SECS must be positive. Got: {}", cap);
        }

        parse_level(&self.log_level)?;
        Ok(())
    }

    /// Build the core configuration, applying polling overrides
    fn to_eci_config(&self) -> Result<EciConfig> {
        let control_plane = match self.backend.as_str() {
            "http" => ControlPlaneConfig::Http {
                api_endpoint: self.api_endpoint.clone().unwrap_or_default(),
                api_access_token: self.api_access_token.clone().unwrap_or_default(),
                path_prefix: self.path_prefix.clone(),
                zone_id: self.zone_id.clone().unwrap_or_default(),
            },
            _ => ControlPlaneConfig::Memory,
        };

        let mut polling = PollingConfig::default();
        if let Some(attempts) = self.poll_max_attempts {
            polling.ready.max_attempts = attempts;
            polling.teardown.max_attempts = attempts;
            polling.delete_retry.max_attempts = attempts;
        }
        if let Some(cap) = self.poll_cap_secs {
            polling.ready.cap_secs = cap;
            polling.teardown.cap_secs = cap;
        }

        let config = EciConfig {
            control_plane,
            polling,
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!(
            "ECI_LOG_LEVEL '{}' is not valid. \
            Valid levels: trace, debug, info, warn, error",
            level
        ),
    }
}

/// Parse a JSON object argument into attributes
fn parse_attributes(raw: &str) -> Result<Attributes> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("attributes must be valid JSON")?;
    match value {
        serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
        _ => anyhow::bail!("attributes must be a JSON object"),
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                EciExitCode::ConfigError.into()
            } else {
                EciExitCode::Success.into()
            };
        }
    };

    if let Command::Kinds = cli.command {
        for kind in ResourceKind::ALL {
            println!("{}", kind);
        }
        for source in DataSourceKind::ALL {
            println!("{} (lookup)", source);
        }
        return EciExitCode::Success.into();
    }

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return EciExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return EciExitCode::ConfigError.into();
    }

    let eci_config = match config.to_eci_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration validation error: {:#}", e);
            return EciExitCode::ConfigError.into();
        }
    };

    let log_level = parse_level(&config.log_level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return EciExitCode::ConfigError.into();
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return EciExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        match run(cli.command, &eci_config).await {
            Ok(code) => code,
            Err(e) => {
                error!("{:#}", e);
                EciExitCode::RuntimeError
            }
        }
    })
    .into()
}

async fn run(command: Command, config: &EciConfig) -> Result<EciExitCode> {
    let registry = ControlPlaneRegistry::with_builtin();

    #[cfg(feature = "http")]
    eci_control_plane_http::register(&registry);

    info!(backend = %config.control_plane.type_name(), "Connecting to control plane");
    let plane = registry.create_control_plane(&config.control_plane).await?;
    let controller = LifecycleController::from_config(plane, config)?;

    let outcome = match command {
        Command::Create { kind, spec } => {
            let spec = parse_attributes(&spec)?;
            controller.create(kind, &spec).await
        }
        Command::Read { kind, id } => controller.read(kind, &id).await,
        Command::Update { kind, id, spec } => {
            let desired = parse_attributes(&spec)?;
            let current = controller.read(kind, &id).await;
            if !current.is_success() {
                current
            } else if let Some(observed) = current.state.resource() {
                let deltas = FieldDeltas::between(&observed.attributes, &desired);
                controller.update(kind, &id, &deltas).await
            } else {
                anyhow::bail!("{} {} does not exist", kind, id);
            }
        }
        Command::Delete { kind, id } => controller.delete(kind, &id).await,
        Command::Lookup {
            source,
            name,
            region_id,
        } => {
            let mut scope = ListFilter::new();
            if let Some(region_id) = region_id {
                scope = scope.with("region_id", region_id);
            }
            let found = controller.lookup(source, &name, &scope).await;
            return report(&found, &found.diagnostics);
        }
        Command::Kinds => return Ok(EciExitCode::Success),
    };

    report(&outcome, &outcome.diagnostics)
}

/// Log diagnostics, print `value` as JSON and pick the exit code
fn report(value: &impl Serialize, diagnostics: &Diagnostics) -> Result<EciExitCode> {
    for diagnostic in diagnostics.iter() {
        match diagnostic.severity {
            Severity::Warning => warn!("{}", diagnostic),
            Severity::Error => error!("{}", diagnostic),
        }
    }

    println!("{}", serde_json::to_string_pretty(value)?);

    Ok(if !diagnostics.has_error() {
        EciExitCode::Success
    } else {
        EciExitCode::RuntimeError
    })
}
