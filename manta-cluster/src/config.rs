//! Pool and cluster configuration.

use std::time::Duration;

use tracing::info;

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of idle connections retained.
    pub max_pool_size: usize,
    /// Idle connections older than this are closed.
    pub max_idle_time: Duration,
    /// Upper bound on a single acquire, including authentication.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 100,
            max_idle_time: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum idle pool size.
    pub fn max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = size;
        self
    }

    /// Set the maximum idle time.
    pub fn max_idle_time(mut self, idle: Duration) -> Self {
        self.max_idle_time = idle;
        self
    }

    /// Set the acquire timeout.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// A small pool with short timeouts for development and testing.
    pub fn development() -> Self {
        info!(max_pool_size = 5, "PoolConfig::development() initialized");
        Self {
            max_pool_size: 5,
            max_idle_time: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(5),
        }
    }

    /// A large pool for high-throughput workloads.
    pub fn high_throughput() -> Self {
        info!(max_pool_size = 200, "PoolConfig::high_throughput() initialized");
        Self {
            max_pool_size: 200,
            max_idle_time: Duration::from_secs(300),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Cluster monitoring and selection configuration.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Steady-state interval between heartbeats per server.
    pub heartbeat_interval: Duration,
    /// Accelerated interval after a failed heartbeat, so a flapping server
    /// is rediscovered quickly.
    pub rapid_heartbeat_interval: Duration,
    /// How long server selection waits for a qualifying server.
    pub selection_timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            rapid_heartbeat_interval: Duration::from_millis(500),
            selection_timeout: Duration::from_secs(30),
        }
    }
}

impl ClusterConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the steady-state heartbeat interval.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the post-failure heartbeat interval.
    pub fn rapid_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.rapid_heartbeat_interval = interval;
        self
    }

    /// Set the selection timeout.
    pub fn selection_timeout(mut self, timeout: Duration) -> Self {
        self.selection_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_builder() {
        let config = PoolConfig::new()
            .max_pool_size(10)
            .max_idle_time(Duration::from_secs(30))
            .acquire_timeout(Duration::from_secs(2));
        assert_eq!(config.max_pool_size, 10);
        assert_eq!(config.max_idle_time, Duration::from_secs(30));
        assert_eq!(config.acquire_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_rapid_interval_shorter_than_steady_state() {
        let config = ClusterConfig::default();
        assert!(config.rapid_heartbeat_interval < config.heartbeat_interval);
    }
}
