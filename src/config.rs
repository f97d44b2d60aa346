//! Client configuration: where to connect and how the connection loop behaves.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use crate::protocol::UserId;

/// Default capacity of each subscriber's event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default timeout for opening the socket.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_LOCAL_HOST: &str = "localhost";
const DEFAULT_LOCAL_PORT: u16 = 4001;

// ── Deployment ──────────────────────────────────────────────────────

/// Where the realtime backend lives.
///
/// ```
/// use pong_realtime_client::config::Deployment;
///
/// let local = Deployment::default();
/// assert_eq!(local.endpoint_url(7), "ws://localhost:4001/ws?id=7");
///
/// let prod = Deployment::production("pong.example.org");
/// assert_eq!(prod.endpoint_url(7), "wss://pong.example.org/ws?id=7");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Deployment {
    /// Plain-text socket to a development server.
    Local {
        #[serde(default = "default_local_host")]
        host: String,
        #[serde(default = "default_local_port")]
        port: u16,
    },
    /// TLS socket behind the production reverse proxy.
    Production {
        host: String,
        #[serde(default)]
        port: Option<u16>,
    },
}

fn default_local_host() -> String {
    DEFAULT_LOCAL_HOST.to_owned()
}

fn default_local_port() -> u16 {
    DEFAULT_LOCAL_PORT
}

impl Default for Deployment {
    fn default() -> Self {
        Self::Local {
            host: default_local_host(),
            port: DEFAULT_LOCAL_PORT,
        }
    }
}

impl Deployment {
    pub fn production(host: impl Into<String>) -> Self {
        Self::Production {
            host: host.into(),
            port: None,
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Local { .. } => "ws",
            Self::Production { .. } => "wss",
        }
    }

    /// `scheme://host[:port]/ws?id=<identity>`
    pub fn endpoint_url(&self, identity: UserId) -> String {
        let scheme = self.scheme();
        match self {
            Self::Local { host, port }
            | Self::Production {
                host,
                port: Some(port),
            } => format!("{scheme}://{host}:{port}/ws?id={identity}"),
            Self::Production { host, port: None } => {
                format!("{scheme}://{host}/ws?id={identity}")
            }
        }
    }
}

// ── Reconnect policy ────────────────────────────────────────────────

/// What the connection loop does after the socket drops unexpectedly.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum ReconnectPolicy {
    /// Stay closed. The caller decides when to connect again.
    #[default]
    Disabled,
    /// Retry with exponentially growing delays.
    ExponentialBackoff {
        initial_delay: Duration,
        max_delay: Duration,
        /// Attempts before giving up. `0` means unbounded.
        max_attempts: u32,
        /// Fraction of each delay (0.0..=1.0) randomised away.
        jitter: f64,
    },
}

impl ReconnectPolicy {
    /// Backoff starting at 500 ms, capped at 30 s, ten attempts, 20% jitter.
    pub fn backoff() -> Self {
        Self::ExponentialBackoff {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
            jitter: 0.2,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    /// Delay before the 1-based `attempt`, or `None` when no retry should happen.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        let Self::ExponentialBackoff {
            initial_delay,
            max_delay,
            max_attempts,
            jitter,
        } = *self
        else {
            return None;
        };
        if attempt == 0 || (max_attempts != 0 && attempt > max_attempts) {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(31));
        let base = initial_delay.saturating_mul(factor).min(max_delay);
        // NaN would make the sample range empty.
        if jitter.is_nan() || jitter <= 0.0 {
            return Some(base);
        }
        let keep = 1.0 - rand::rng().random_range(0.0..=jitter.min(1.0));
        Some(base.mul_f64(keep))
    }
}

// ── Client config ───────────────────────────────────────────────────

/// Configuration for a [`PongClient`](crate::client::PongClient).
///
/// ```
/// use pong_realtime_client::config::{ClientConfig, Deployment, ReconnectPolicy};
/// use std::time::Duration;
///
/// let config = ClientConfig::new(Deployment::production("pong.example.org"))
///     .with_event_channel_capacity(512)
///     .with_reconnect(ReconnectPolicy::backoff())
///     .with_connect_timeout(Duration::from_secs(3));
/// assert!(config.reconnect.is_enabled());
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub deployment: Deployment,
    /// Capacity of each subscriber channel.
    ///
    /// When a subscriber cannot keep up, events are dropped (with a warning)
    /// rather than blocking the connection loop. `Disconnected` is always
    /// delivered.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Time the connection loop gets to close the socket on `disconnect`
    /// before it is aborted. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Time allowed for opening the socket. Defaults to **10 seconds**.
    pub connect_timeout: Duration,
    /// Defaults to [`ReconnectPolicy::Disabled`].
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(Deployment::default())
    }
}

impl ClientConfig {
    pub fn new(deployment: Deployment) -> Self {
        Self {
            deployment,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::Disabled,
        }
    }

    /// Defaults to **256**. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn local_and_production_urls() {
        let local = Deployment::Local {
            host: "127.0.0.1".into(),
            port: 9000,
        };
        assert_eq!(local.endpoint_url(3), "ws://127.0.0.1:9000/ws?id=3");

        let prod = Deployment::Production {
            host: "pong.example.org".into(),
            port: Some(8443),
        };
        assert_eq!(prod.endpoint_url(3), "wss://pong.example.org:8443/ws?id=3");
    }

    #[test]
    fn deployment_deserializes_with_defaults() {
        let local: Deployment = serde_json::from_str(r#"{"mode":"local"}"#).unwrap();
        assert_eq!(local, Deployment::default());

        let prod: Deployment =
            serde_json::from_str(r#"{"mode":"production","host":"pong.example.org"}"#).unwrap();
        assert_eq!(prod, Deployment::production("pong.example.org"));
    }

    #[test]
    fn disabled_policy_never_retries() {
        assert_eq!(ReconnectPolicy::Disabled.delay_for(1), None);
        assert!(!ClientConfig::default().reconnect.is_enabled());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = ReconnectPolicy::ExponentialBackoff {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            max_attempts: 4,
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_millis(350)));
        assert_eq!(policy.delay_for(5), None);
    }

    #[test]
    fn jitter_only_shortens_delay() {
        let policy = ReconnectPolicy::ExponentialBackoff {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            max_attempts: 0,
            jitter: 0.5,
        };
        for _ in 0..32 {
            let delay = policy.delay_for(1).unwrap();
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1000));
        }
        assert!(policy.delay_for(100).is_some());
    }

    #[test]
    fn non_finite_or_negative_jitter_falls_back_to_base_delay() {
        for jitter in [f64::NAN, -0.5] {
            let policy = ReconnectPolicy::ExponentialBackoff {
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
                max_attempts: 3,
                jitter,
            };
            assert_eq!(policy.delay_for(2), Some(Duration::from_millis(200)));
        }
    }

    #[test]
    fn capacity_is_clamped() {
        let config = ClientConfig::default().with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }
}
