//! Initialization system for Cadence
//!
//! Loads configuration, installs the tracing subscriber and builds the
//! process-wide [`ScriptRuntime`]. Embedders that manage their own runtime can
//! skip this and use [`ScriptRuntime::builder`] directly.
//!
//! # Example
//!
//! ```rust,no_run
//! use cadence_core::init::InitBuilder;
//!
//! let runtime = InitBuilder::new()
//!     .config_path("cadence.toml")
//!     .init()?;
//! let ok = runtime.evaluate_condition("1 < 2", &Default::default())?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Context, Result};
use std::sync::OnceLock;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, CONFIG_PATH_ENV};
use crate::script::ScriptRuntime;

/// Global initialization state
static INIT_STATE: OnceLock<InitState> = OnceLock::new();

#[derive(Debug)]
struct InitState {
    config: Config,
    runtime: ScriptRuntime,
}

/// Options for initializing Cadence
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Config file path (overrides default search)
    pub config_path: Option<String>,

    /// Log filter used when `RUST_LOG` is unset (overrides `log.filter`)
    pub log_filter: Option<String>,

    /// Whether to install the global tracing subscriber
    pub install_tracing: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            config_path: None,
            log_filter: None,
            install_tracing: true,
        }
    }
}

/// Builder for constructing InitOptions
pub struct InitBuilder {
    options: InitOptions,
}

impl InitBuilder {
    pub fn new() -> Self {
        Self {
            options: InitOptions::default(),
        }
    }

    pub fn config_path(mut self, path: impl Into<String>) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.options.log_filter = Some(filter.into());
        self
    }

    pub fn install_tracing(mut self, install: bool) -> Self {
        self.options.install_tracing = install;
        self
    }

    pub fn init(self) -> Result<&'static ScriptRuntime> {
        initialize(self.options)
    }
}

impl Default for InitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize Cadence with the given options
///
/// Calling this more than once is safe: later calls return the runtime built
/// by the first one and ignore their options.
pub fn initialize(options: InitOptions) -> Result<&'static ScriptRuntime> {
    if let Some(state) = INIT_STATE.get() {
        return Ok(&state.runtime);
    }

    if let Some(path) = &options.config_path {
        std::env::set_var(CONFIG_PATH_ENV, path);
    }

    let config = Config::load().context("Failed to load configuration")?;

    if options.install_tracing {
        let filter = options.log_filter.as_deref().unwrap_or(&config.log.filter);
        install_tracing(filter);
    }

    let runtime = ScriptRuntime::new(&config).context("Failed to build script runtime")?;
    info!(
        max_idle = config.pool.max_idle,
        prewarm = config.pool.prewarm,
        "Script runtime ready"
    );

    // Another thread may have won the race; its runtime is the global one
    let _ = INIT_STATE.set(InitState { config, runtime });
    INIT_STATE
        .get()
        .map(|state| &state.runtime)
        .ok_or_else(|| anyhow!("Initialization state missing"))
}

/// Install a stderr `fmt` subscriber; `RUST_LOG` takes precedence over `default_filter`
///
/// Does nothing when a global subscriber is already set.
pub fn install_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn is_initialized() -> bool {
    INIT_STATE.get().is_some()
}

/// The global runtime, once [`initialize`] has run
pub fn runtime() -> Result<&'static ScriptRuntime> {
    INIT_STATE
        .get()
        .map(|state| &state.runtime)
        .ok_or_else(|| anyhow!("Cadence not initialized - call initialize() first"))
}

/// The configuration the global runtime was built from
pub fn get_config() -> Result<&'static Config> {
    INIT_STATE
        .get()
        .map(|state| &state.config)
        .ok_or_else(|| anyhow!("Cadence not initialized - call initialize() first"))
}
