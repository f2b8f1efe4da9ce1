//! Daemon configuration.

use std::net::SocketAddr;
use std::time::Duration;

use worksync_core::TrivialityPolicy;

use crate::error::{ServerError, ServerResult};

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    pub bind_addr: SocketAddr,

    /// Public URL the change source delivers notifications to. Renewal
    /// cannot run without it.
    pub callback_url: Option<String>,

    /// Fallback principal when a notification's resource id does not
    /// resolve to a known channel.
    pub admin_principal: String,

    /// Retention window for exact-duplicate notification suppression.
    pub dedup_ttl: Duration,

    /// Retention window for trivial-change suppression.
    pub trivial_ttl: Duration,

    /// How often the cache eviction sweep runs.
    pub eviction_interval: Duration,

    /// How often the renewal scheduler fires. Must stay under the source's
    /// 7-day channel expiry.
    pub renew_interval: Duration,

    /// Pause between consecutive watch registrations during renewal.
    pub renew_pause: Duration,

    /// Deadline on each change source network call.
    pub source_timeout: Duration,

    /// Capacity of the reconcile job queue.
    pub queue_capacity: usize,

    /// Triviality heuristics applied to file changes.
    pub triviality: TrivialityPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: ([127, 0, 0, 1], 8080).into(),
            callback_url: None,
            admin_principal: "admin@localhost".to_string(),
            dedup_ttl: Duration::from_secs(10 * 60),
            trivial_ttl: Duration::from_secs(60 * 60),
            eviction_interval: Duration::from_secs(60),
            renew_interval: Duration::from_secs(6 * 24 * 60 * 60),
            renew_pause: Duration::from_secs(1),
            source_timeout: Duration::from_secs(30),
            queue_capacity: 256,
            triviality: TrivialityPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Builder: set the bind address.
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Builder: set the webhook callback URL.
    pub fn with_callback_url(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    /// Builder: set the fallback administrative principal.
    pub fn with_admin_principal(mut self, principal: impl Into<String>) -> Self {
        self.admin_principal = principal.into();
        self
    }

    /// Builder: set the dedup cache TTL.
    pub fn with_dedup_ttl(mut self, ttl: Duration) -> Self {
        self.dedup_ttl = ttl;
        self
    }

    /// Builder: set the trivial suppression cache TTL.
    pub fn with_trivial_ttl(mut self, ttl: Duration) -> Self {
        self.trivial_ttl = ttl;
        self
    }

    /// Builder: set the renewal interval.
    pub fn with_renew_interval(mut self, interval: Duration) -> Self {
        self.renew_interval = interval;
        self
    }

    /// Builder: set the source call deadline.
    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    /// Reads overrides from `WORKSYNC_*` environment variables.
    pub fn from_env() -> ServerResult<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("WORKSYNC_BIND") {
            config.bind_addr = addr
                .parse()
                .map_err(|_| ServerError::config(format!("invalid WORKSYNC_BIND: {addr}")))?;
        }
        if let Ok(url) = std::env::var("WORKSYNC_CALLBACK_URL") {
            config.callback_url = Some(url);
        }
        if let Ok(principal) = std::env::var("WORKSYNC_ADMIN_PRINCIPAL") {
            config.admin_principal = principal;
        }
        if let Ok(secs) = std::env::var("WORKSYNC_RENEW_INTERVAL_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                ServerError::config(format!("invalid WORKSYNC_RENEW_INTERVAL_SECS: {secs}"))
            })?;
            config.renew_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }
}
