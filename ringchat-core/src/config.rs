use std::time::Duration;

use serde::Deserialize;

/// Timing defaults for ring maintenance and connection liveness, overridable
/// at runtime through environment variables prefixed `RINGCHAT_` (e.g.
/// `RINGCHAT_RING_REPAIR_TIMEOUT_SECONDS=5`), the way the teacher crate
/// layers `config::Environment` over struct defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    pub ring_repair_timeout_seconds: u64,
    pub send_message_timeout_seconds: u64,
    pub leader_election_timeout_seconds: u64,
    pub leader_election_minimum_wait_seconds: u64,
    pub leader_election_maximum_wait_seconds: u64,
    pub connection_timeout_seconds: u64,
    pub connection_timeout_grace_seconds: u64,
}

impl Default for RingConfig {
    fn default() -> RingConfig {
        RingConfig {
            ring_repair_timeout_seconds: 3,
            send_message_timeout_seconds: 3,
            leader_election_timeout_seconds: 5,
            leader_election_minimum_wait_seconds: 3,
            leader_election_maximum_wait_seconds: 15,
            connection_timeout_seconds: 20,
            connection_timeout_grace_seconds: 5,
        }
    }
}

impl RingConfig {
    /// Loads defaults, then overlays any `RINGCHAT_*` environment variables.
    pub fn from_env() -> Result<RingConfig, config::ConfigError> {
        let defaults = RingConfig::default();
        let built = config::Config::builder()
            .add_source(config::Config::try_from(&defaults)?)
            .add_source(config::Environment::with_prefix("RINGCHAT"))
            .build()?;
        built.try_deserialize()
    }

    pub fn ring_repair_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_repair_timeout_seconds)
    }

    pub fn send_message_timeout(&self) -> Duration {
        Duration::from_secs(self.send_message_timeout_seconds)
    }

    pub fn leader_election_timeout(&self) -> Duration {
        Duration::from_secs(self.leader_election_timeout_seconds)
    }

    pub fn leader_election_wait_range(&self) -> (Duration, Duration) {
        (
            Duration::from_secs(self.leader_election_minimum_wait_seconds),
            Duration::from_secs(self.leader_election_maximum_wait_seconds),
        )
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_seconds)
    }

    pub fn connection_timeout_grace(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_grace_seconds)
    }

    /// Read deadline applied to every inbound line: keep-alive interval plus
    /// grace.
    pub fn read_deadline(&self) -> Duration {
        self.connection_timeout() + self.connection_timeout_grace()
    }

    /// The keep-alive ping fires three times per read-deadline window so it
    /// has two retries' worth of slack before the peer is reaped.
    pub fn keepalive_interval(&self) -> Duration {
        self.connection_timeout() / 3
    }
}
