//! Process-wide worker runtime settings
//!
//! Configured at most once, before the first pool starts. The first call to
//! [`runtime_settings`] freezes whatever is set at that moment (or the
//! defaults), after which [`configure_runtime`] always fails.

use std::sync::OnceLock;

use crate::error::PoolError;

static RUNTIME: OnceLock<RuntimeSettings> = OnceLock::new();

/// How worker threads are spawned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Worker threads are named `<prefix>-<n>`
    pub thread_name_prefix: String,
    /// `None` keeps the platform default
    pub stack_size: Option<usize>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            thread_name_prefix: "ddload-worker".to_string(),
            stack_size: None,
        }
    }
}

/// Set the runtime settings for this process
pub fn configure_runtime(settings: RuntimeSettings) -> Result<(), PoolError> {
    RUNTIME
        .set(settings)
        .map_err(|_| PoolError::RuntimeAlreadyConfigured)
}

/// Active settings; freezes the defaults if nothing was configured
pub fn runtime_settings() -> &'static RuntimeSettings {
    RUNTIME.get_or_init(RuntimeSettings::default)
}
