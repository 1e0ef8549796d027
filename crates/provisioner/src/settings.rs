use std::path::Path;
use std::time::Duration;

use fuxi_core::{Error, Result};
use fuxi_kubehub::{ControllerConfig, ReflectorConfig};
use serde::{Deserialize, Serialize};

use crate::RetryPolicy;

/// Runtime settings. Every field has a default, so a YAML file only needs the
/// keys it changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub watch_timeout_secs: u32,
    pub create_pv_retry_count: u32,
    pub create_pv_retry_interval_secs: u64,
    pub relist_backoff_secs: u64,
    /// 0 disables periodic relists.
    pub resync_period_secs: u64,
    pub poll_interval_ms: u64,
    /// Registry name of the Cinder plugin; StorageClasses select it via `provisioner`.
    pub plugin_name: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            watch_timeout_secs: 60,
            create_pv_retry_count: 3,
            create_pv_retry_interval_secs: 2,
            relist_backoff_secs: 10,
            resync_period_secs: 300,
            poll_interval_ms: 1000,
            plugin_name: "cinder".to_string(),
        }
    }
}

impl Settings {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        serde_yaml::from_str(s).map_err(|e| Error::invalid(format!("settings: {e}")))
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::invalid(format!("reading settings {}: {e}", path.display())))?;
        Self::from_yaml_str(&raw)
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            reflector: ReflectorConfig {
                watch_timeout_secs: self.watch_timeout_secs,
                backoff: Duration::from_secs(self.relist_backoff_secs),
                resync_period: (self.resync_period_secs > 0).then(|| Duration::from_secs(self.resync_period_secs)),
            },
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.create_pv_retry_count, Duration::from_secs(self.create_pv_retry_interval_secs))
    }
}
