//! Bus configuration.
//!
//! Every field has a default, so a partial document (or none at all) yields a
//! working bus.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub pool: PoolConfig,
    pub fan_out: FanOutConfig,
}

/// Sizing of the execution context pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Contexts kept for reuse. Extra contexts are freed on release.
    pub max_idle: usize,
    /// Contexts allocated when the bus is created, capped by `max_idle`.
    pub prewarm: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: 64,
            prewarm: 0,
        }
    }
}

/// Worker threads spawned by [`query_async`](crate::query_async).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanOutConfig {
    /// Name prefix; each worker is suffixed with its index in the batch.
    pub thread_name: String,
    /// Stack size in bytes. The platform default when unset.
    pub stack_size: Option<usize>,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            thread_name: "switchyard-fanout".to_string(),
            stack_size: None,
        }
    }
}
