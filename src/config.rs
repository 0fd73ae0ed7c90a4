//! Process configuration: CLI-provided settings plus pod identity from the
//! environment.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Deadline for the explicit flush issued after each parsed update.
const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct Config {
    pub metric_file: PathBuf,
    pub endpoint: String,
    pub push_interval: Duration,
    pub flush_timeout: Duration,
    /// Kubernetes pod identity, attached as resource attributes when present.
    pub pod_name: Option<String>,
    pub pod_namespace: Option<String>,
}

impl Config {
    pub fn new(metric_file: PathBuf, endpoint: String, interval_secs: u64) -> Self {
        Self {
            metric_file,
            endpoint,
            push_interval: Duration::from_secs(interval_secs),
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            pod_name: non_empty_env("POD_NAME"),
            pod_namespace: non_empty_env("POD_NAMESPACE"),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_env_is_none() {
        assert_eq!(non_empty_env("FL_SIDECAR_TEST_UNSET_VAR"), None);
    }

    #[test]
    fn empty_env_is_none() {
        // Unique key so parallel tests cannot race on it.
        unsafe { env::set_var("FL_SIDECAR_TEST_EMPTY_VAR", "") };
        assert_eq!(non_empty_env("FL_SIDECAR_TEST_EMPTY_VAR"), None);
    }

    #[test]
    fn populated_env_is_some() {
        unsafe { env::set_var("FL_SIDECAR_TEST_SET_VAR", "trainer-0") };
        assert_eq!(
            non_empty_env("FL_SIDECAR_TEST_SET_VAR"),
            Some("trainer-0".to_string())
        );
    }

    #[test]
    fn defaults() {
        let config = Config::new(PathBuf::from("/tmp/progress"), "http://collector:4317".into(), 60);
        assert_eq!(config.push_interval, Duration::from_secs(60));
        assert_eq!(config.flush_timeout, Duration::from_secs(10));
    }
}
