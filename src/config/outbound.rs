// ABOUTME: Settings for the bastion's own connections to targets.
// ABOUTME: Keepalive cadence and the client inactivity limit.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutboundConfig {
    #[serde(default = "default_keepalive_interval", with = "humantime_serde")]
    pub keepalive_interval: Duration,

    /// Unanswered keepalives before the target is considered gone.
    #[serde(default = "default_keepalive_max")]
    pub keepalive_max: usize,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: default_keepalive_interval(),
            keepalive_max: default_keepalive_max(),
        }
    }
}

fn default_keepalive_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_keepalive_max() -> usize {
    3
}
