//! Null callback plugin.
//!
//! Produces no output at all. Used by library callers that only want the
//! returned report, and by the CLI when a structured format is requested.

use async_trait::async_trait;

use crate::callback::RunCallback;

/// Callback that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCallback;

impl NullCallback {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RunCallback for NullCallback {}
