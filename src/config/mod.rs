//! Configuration Module
//!
//! Loop thresholds loaded from TOML, so operators tune detection, simulation
//! and acceptance without a rebuild.
//!
//! ## Loading Order
//!
//! 1. `NEXUS_CONFIG` environment variable (path to TOML file)
//! 2. `nexus.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! ```ignore
//! // In main():
//! config::init(NexusConfig::load());
//!
//! // Anywhere else:
//! let trials = config::current().simulation.trials;
//! ```

mod nexus_config;
pub mod defaults;
pub mod validation;

pub use nexus_config::*;

use std::sync::OnceLock;

/// Global configuration, initialized once at startup.
static NEXUS_CONFIG: OnceLock<NexusConfig> = OnceLock::new();

/// Initialize the global configuration. Later calls are ignored.
pub fn init(config: NexusConfig) {
    if NEXUS_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// The global configuration, if `init()` has been called.
pub fn get() -> Option<&'static NexusConfig> {
    NEXUS_CONFIG.get()
}

/// Check whether the config has been initialized.
pub fn is_initialized() -> bool {
    NEXUS_CONFIG.get().is_some()
}

/// A copy of the global configuration, or the built-in defaults before `init()`.
pub fn current() -> NexusConfig {
    get().cloned().unwrap_or_default()
}
