//! Sandbox pool configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sandbox pool configuration
///
/// Immutable once the pool is initialised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of sandboxes kept warm and available
    #[serde(default = "default_target_size")]
    pub target_size: usize,
    /// Hard cap on sandboxes owned by this instance
    #[serde(default = "default_max_total")]
    pub max_total: usize,
    /// Sandboxes tolerated above `target_size` before releases start destroying
    #[serde(default = "default_overflow_slack")]
    pub overflow_slack: usize,
    /// Idle time after which a surplus available sandbox is evicted
    #[serde(with = "humantime_serde", default = "default_idle_timeout")]
    pub idle_timeout: Duration,
    /// Period of the background reaper
    #[serde(with = "humantime_serde", default = "default_reap_interval")]
    pub reap_interval: Duration,
    /// Wait budget for a single acquire attempt
    #[serde(with = "humantime_serde", default = "default_acquire_timeout")]
    pub acquire_timeout: Duration,
    /// Bound on creating and starting one sandbox on an acquire miss
    #[serde(with = "humantime_serde", default = "default_provision_timeout")]
    pub provision_timeout: Duration,
    /// Wipe and probe a sandbox before lending it out
    #[serde(default = "default_true")]
    pub pre_use_validation: bool,
    /// Wipe a sandbox's workspace before it re-enters the pool
    #[serde(default = "default_true")]
    pub post_use_cleanup: bool,
    /// Bound on the pre-use probe
    #[serde(with = "humantime_serde", default = "default_validation_timeout")]
    pub validation_timeout: Duration,
    /// Bound on a workspace wipe
    #[serde(with = "humantime_serde", default = "default_cleanup_timeout")]
    pub cleanup_timeout: Duration,
    /// Acquire attempts before giving up when candidates keep failing validation
    #[serde(default = "default_acquire_attempts")]
    pub acquire_attempts: u32,
    /// Prefix shared by every sandbox name this service creates
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    /// Identifier of this pool instance; generated when unset
    #[serde(default)]
    pub instance_id: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            target_size: default_target_size(),
            max_total: default_max_total(),
            overflow_slack: default_overflow_slack(),
            idle_timeout: default_idle_timeout(),
            reap_interval: default_reap_interval(),
            acquire_timeout: default_acquire_timeout(),
            provision_timeout: default_provision_timeout(),
            pre_use_validation: true,
            post_use_cleanup: true,
            validation_timeout: default_validation_timeout(),
            cleanup_timeout: default_cleanup_timeout(),
            acquire_attempts: default_acquire_attempts(),
            name_prefix: default_name_prefix(),
            instance_id: None,
        }
    }
}

impl PoolConfig {
    /// The configured instance id, or a freshly generated one
    pub fn resolve_instance_id(&self) -> String {
        match self.instance_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => generate_instance_id(),
        }
    }
}

/// Generate an instance id so several pool processes never share sandbox names
pub fn generate_instance_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("worker-{}", &id[..8])
}

fn default_target_size() -> usize {
    3
}

fn default_max_total() -> usize {
    5
}

fn default_overflow_slack() -> usize {
    2
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_reap_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_provision_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_validation_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_cleanup_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_acquire_attempts() -> u32 {
    2
}

fn default_name_prefix() -> String {
    "judge-pool".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_default() {
        let config = PoolConfig::default();
        assert_eq!(config.target_size, 3);
        assert_eq!(config.max_total, 5);
        assert_eq!(config.idle_timeout, Duration::from_secs(900));
        assert!(config.pre_use_validation);
    }

    #[test]
    fn test_instance_id_resolution() {
        let mut config = PoolConfig::default();
        config.instance_id = Some("  node-a ".to_string());
        assert_eq!(config.resolve_instance_id(), "node-a");

        config.instance_id = Some("   ".to_string());
        let generated = config.resolve_instance_id();
        assert!(generated.starts_with("worker-"));
        assert_eq!(generated.len(), "worker-".len() + 8);
    }

    #[test]
    fn test_humantime_durations() {
        let config: PoolConfig =
            serde_json::from_str(r#"{ "idle_timeout": "2m", "acquire_timeout": "750ms" }"#)
                .unwrap();
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.acquire_timeout, Duration::from_millis(750));
        assert_eq!(config.reap_interval, Duration::from_secs(300));
    }
}
