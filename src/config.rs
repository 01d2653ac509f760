//! Engine configuration

use serde::{Deserialize, Serialize};

/// Largest accepted commit chunk
///
/// Keeps a commit at no more than 50 tracked aggregates.
pub const MAX_CHUNK_SIZE: usize = 25;

/// Tunables of the import pipeline
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Staging rows applied per chunk during commit
    ///
    /// Each row touches at most two aggregates (document and customer), so a
    /// commit never tracks more than `2 * chunk_size` aggregates at once.
    pub chunk_size: usize,
    /// Upper bound on the page size preview will serve
    pub max_page_size: usize,
    /// Commits the CLI runs at the same time
    pub max_concurrent_commits: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 20,
            max_page_size: 500,
            max_concurrent_commits: num_cpus::get(),
        }
    }
}

impl EngineConfig {
    /// Create a config, replacing zero values with the defaults
    ///
    /// `chunk_size` is capped at [`MAX_CHUNK_SIZE`].
    pub fn new(chunk_size: usize, max_page_size: usize, max_concurrent_commits: usize) -> Self {
        let default = Self::default();
        let chunk_size = non_zero("chunk_size", chunk_size, default.chunk_size);

        Self {
            chunk_size: at_most("chunk_size", chunk_size, MAX_CHUNK_SIZE),
            max_page_size: non_zero("max_page_size", max_page_size, default.max_page_size),
            max_concurrent_commits: non_zero(
                "max_concurrent_commits",
                max_concurrent_commits,
                default.max_concurrent_commits,
            ),
        }
    }
}

fn non_zero(name: &str, value: usize, default: usize) -> usize {
    if value == 0 {
        tracing::warn!("Invalid {} ({}), using default ({})", name, value, default);
        default
    } else {
        value
    }
}

fn at_most(name: &str, value: usize, max: usize) -> usize {
    if value > max {
        tracing::warn!("{} ({}) exceeds the maximum, using {}", name, value, max);
        max
    } else {
        value
    }
}
