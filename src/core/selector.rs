use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

/// Errors related to origin selection
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SelectorError {
    /// Error when a service is configured without origins
    #[error("origin list is empty")]
    EmptyOrigins,
}

/// Round-robin selector over a service's origin list.
///
/// Uses an atomic counter cycling through the slice index space. The atomic
/// fetch-add means no two concurrent selections observe the same counter
/// value, which distributes load uniformly across origins independent of
/// request duration.
pub struct OriginSelector {
    origins: Vec<String>,
    counter: AtomicU64,
}

impl OriginSelector {
    /// Create a selector. An empty origin list is a startup error.
    pub fn new(origins: Vec<String>) -> Result<Self, SelectorError> {
        if origins.is_empty() {
            return Err(SelectorError::EmptyOrigins);
        }
        let origins = origins
            .into_iter()
            .map(|o| o.trim_end_matches('/').to_string())
            .collect();
        Ok(Self {
            origins,
            counter: AtomicU64::new(0),
        })
    }

    /// Select the next origin.
    pub fn select(&self) -> &str {
        let count = self.counter.fetch_add(1, Ordering::SeqCst);
        &self.origins[(count % self.origins.len() as u64) as usize]
    }

    /// Number of configured origins.
    pub fn origin_count(&self) -> usize {
        self.origins.len()
    }
}
