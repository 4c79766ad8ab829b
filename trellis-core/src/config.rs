//! Engine configuration.

/// Configuration for a [`Root`](crate::root::Root).
#[derive(Debug, Clone)]
pub struct RootConfig {
    /// Upper bound on how many times one block may run within a single
    /// scheduler resolve.
    ///
    /// A graph whose functions keep re-triggering each other would otherwise
    /// spin forever; a block past the bound is dropped from the current
    /// resolve and runs again the next time it is queued.
    pub max_passes: usize,
    /// Pool capacity used by fan-out functions whose `poolSize` property is
    /// unset. `None` means such functions get an unbounded pool.
    pub default_pool_size: Option<usize>,
    /// Per-key timeout applied by fan-out functions whose `timeout` property
    /// is unset. `None` means no timeout.
    pub default_worker_timeout_ms: Option<u64>,
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            max_passes: 32,
            default_pool_size: None,
            default_worker_timeout_ms: None,
        }
    }
}

impl RootConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `TRELLIS_MAX_PASSES`: Per-block run cap within one resolve
    /// - `TRELLIS_DEFAULT_POOL_SIZE`: Default worker pool capacity
    /// - `TRELLIS_WORKER_TIMEOUT_MS`: Default per-key worker timeout
    ///
    /// Unset or unparsable variables fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_passes: std::env::var("TRELLIS_MAX_PASSES")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .filter(|&n| n > 0)
                .unwrap_or(defaults.max_passes),
            default_pool_size: std::env::var("TRELLIS_DEFAULT_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .filter(|&n| n > 0)
                .or(defaults.default_pool_size),
            default_worker_timeout_ms: std::env::var("TRELLIS_WORKER_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .or(defaults.default_worker_timeout_ms),
        }
    }

    /// Set the scheduler pass bound. Clamped to at least one pass.
    pub fn with_max_passes(mut self, max: usize) -> Self {
        self.max_passes = max.max(1);
        self
    }

    /// Set the fallback worker pool capacity.
    pub fn with_default_pool_size(mut self, size: usize) -> Self {
        self.default_pool_size = Some(size);
        self
    }

    /// Set the fallback per-key worker timeout.
    pub fn with_worker_timeout_ms(mut self, millis: u64) -> Self {
        self.default_worker_timeout_ms = Some(millis);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = RootConfig::default();
        assert_eq!(config.max_passes, 32);
        assert!(config.default_pool_size.is_none());
        assert!(config.default_worker_timeout_ms.is_none());
    }

    #[test]
    fn builders_override_defaults() {
        let config = RootConfig::new()
            .with_max_passes(4)
            .with_default_pool_size(8)
            .with_worker_timeout_ms(2_000);
        assert_eq!(config.max_passes, 4);
        assert_eq!(config.default_pool_size, Some(8));
        assert_eq!(config.default_worker_timeout_ms, Some(2_000));
    }

    #[test]
    fn max_passes_cannot_be_zero() {
        let config = RootConfig::new().with_max_passes(0);
        assert_eq!(config.max_passes, 1);
    }
}
