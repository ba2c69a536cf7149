//! Process-wide backend handle
//!
//! The first successful [`init`] wins; later calls hand back the same handle
//! regardless of the configuration they pass.

use std::sync::{Arc, OnceLock};

use super::{connect, BackendResult, SharedBackend};
use crate::config::BackendConfig;

static BACKEND: OnceLock<SharedBackend> = OnceLock::new();

/// Build the shared backend on first call, return it on every call
pub fn init(config: &BackendConfig) -> BackendResult<SharedBackend> {
    if let Some(backend) = BACKEND.get() {
        return Ok(Arc::clone(backend));
    }

    let backend = connect(config)?;
    // Another thread may have won the race; keep whichever landed first
    Ok(Arc::clone(BACKEND.get_or_init(|| backend)))
}

/// The shared backend, if [`init`] has run
pub fn get() -> Option<SharedBackend> {
    BACKEND.get().map(Arc::clone)
}
