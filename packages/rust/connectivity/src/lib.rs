//! Network reachability check and blocking wait.
//!
//! Both the fetcher and the publisher call [`ConnectivityGuard::wait_until_online`]
//! before touching the network. The guard only pauses the worker; it never
//! turns an outage into a failure unless a maximum attempt count is set.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use quizharvest_shared::{ConnectivityConfig, HarvestError, Result};

// ---------------------------------------------------------------------------
// Probe
// ---------------------------------------------------------------------------

/// Answers "is the network reachable right now?".
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

/// Opens a TCP connection to a well-known address.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: SocketAddr,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    /// Build from the `[connectivity]` config section.
    pub fn from_config(config: &ConnectivityConfig) -> Result<Self> {
        let addr = config.probe_addr.parse::<SocketAddr>().map_err(|e| {
            HarvestError::config(format!("invalid probe_addr {:?}: {e}", config.probe_addr))
        })?;
        Ok(Self::new(addr, Duration::from_secs(config.probe_timeout_secs)))
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn is_reachable(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(self.addr)).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                debug!(addr = %self.addr, error = %e, "probe connect failed");
                false
            }
            Err(_) => {
                debug!(addr = %self.addr, "probe timed out");
                false
            }
        }
    }
}

/// A probe that always reports the network as reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

#[async_trait]
impl ReachabilityProbe for AlwaysOnline {
    async fn is_reachable(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Guard
// ---------------------------------------------------------------------------

/// Blocks until the probe reports the network reachable.
#[derive(Clone)]
pub struct ConnectivityGuard {
    probe: Arc<dyn ReachabilityProbe>,
    backoff: Duration,
    max_attempts: Option<u32>,
}

impl ConnectivityGuard {
    pub fn new(probe: Arc<dyn ReachabilityProbe>, backoff: Duration) -> Self {
        Self {
            probe,
            backoff,
            max_attempts: None,
        }
    }

    /// Stop waiting after `attempts` offline probes.
    pub fn with_max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// A guard that never blocks.
    pub fn disabled() -> Self {
        Self::new(Arc::new(AlwaysOnline), Duration::ZERO)
    }

    /// Probe once without waiting.
    pub async fn check(&self) -> bool {
        self.probe.is_reachable().await
    }

    /// Wait until the probe succeeds.
    ///
    /// Returns how many offline probes were seen before coming back online
    /// (0 when the network was already reachable). With a maximum set, an
    /// outage longer than that many probes yields a `Network` error.
    pub async fn wait_until_online(&self) -> Result<u32> {
        let mut offline = 0u32;

        while !self.probe.is_reachable().await {
            offline += 1;
            if let Some(max) = self.max_attempts {
                if offline >= max {
                    return Err(HarvestError::Network(format!(
                        "network unreachable after {offline} attempts"
                    )));
                }
            }
            warn!(
                attempt = offline,
                retry_in_secs = self.backoff.as_secs(),
                "network unreachable, waiting"
            );
            tokio::time::sleep(self.backoff).await;
        }

        if offline > 0 {
            info!(offline_probes = offline, "network reachable again");
        }
        Ok(offline)
    }
}

impl std::fmt::Debug for ConnectivityGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityGuard")
            .field("backoff", &self.backoff)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Offline for the first `offline_for` probes, then online.
    struct FlakyProbe {
        offline_for: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ReachabilityProbe for FlakyProbe {
        async fn is_reachable(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst) >= self.offline_for
        }
    }

    #[tokio::test]
    async fn online_returns_immediately() {
        let guard = ConnectivityGuard::disabled();
        assert_eq!(guard.wait_until_online().await.unwrap(), 0);
        assert!(guard.check().await);
    }

    #[tokio::test]
    async fn waits_through_outage() {
        let probe = Arc::new(FlakyProbe {
            offline_for: 3,
            calls: AtomicU32::new(0),
        });
        let guard = ConnectivityGuard::new(probe.clone(), Duration::from_millis(1));
        assert_eq!(guard.wait_until_online().await.unwrap(), 3);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn bounded_wait_gives_up() {
        let probe = Arc::new(FlakyProbe {
            offline_for: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let guard = ConnectivityGuard::new(probe, Duration::from_millis(1))
            .with_max_attempts(Some(2));
        let err = guard.wait_until_online().await.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("2 attempts"));
    }

    #[tokio::test]
    async fn tcp_probe_against_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let probe = TcpProbe::new(addr, Duration::from_secs(1));
        assert!(probe.is_reachable().await);

        drop(listener);
        assert!(!probe.is_reachable().await);
    }

    #[test]
    fn probe_from_config_rejects_bad_address() {
        let config = ConnectivityConfig {
            probe_addr: "not-an-address".into(),
            ..ConnectivityConfig::default()
        };
        assert!(TcpProbe::from_config(&config).is_err());
        assert!(TcpProbe::from_config(&ConnectivityConfig::default()).is_ok());
    }
}
