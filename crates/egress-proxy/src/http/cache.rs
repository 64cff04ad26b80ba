//! Egress IP cache

use std::net::IpAddr;
use std::time::Duration;
use tokio::time::Instant;

/// Single-value cache for the last observed egress IP.
///
/// Uses tokio's clock so paused-time tests can expire entries.
#[derive(Debug, Clone)]
pub struct IpCache {
    ttl: Duration,
    entry: Option<(IpAddr, Instant)>,
}

impl IpCache {
    /// Empty cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entry: None }
    }

    /// Cached address, if present and not expired
    pub fn get(&self) -> Option<IpAddr> {
        match self.entry {
            Some((ip, expires_at)) if Instant::now() < expires_at => Some(ip),
            _ => None,
        }
    }

    /// Store `ip` with a fresh expiry.
    pub fn put(&mut self, ip: IpAddr) {
        self.entry = Some((ip, Instant::now() + self.ttl));
    }

    /// Drop the cached value.
    pub fn clear(&mut self) {
        self.entry = None;
    }

    /// Time until the cached value expires
    pub fn remaining(&self) -> Option<Duration> {
        self.entry
            .map(|(_, expires_at)| expires_at.saturating_duration_since(Instant::now()))
            .filter(|d| !d.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IP: IpAddr = IpAddr::V4(std::net::Ipv4Addr::new(203, 0, 113, 9));

    #[tokio::test(start_paused = true)]
    async fn test_expiry() {
        let mut cache = IpCache::new(Duration::from_secs(300));
        assert_eq!(cache.get(), None);

        cache.put(IP);
        assert_eq!(cache.get(), Some(IP));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.get(), Some(IP));
        assert_eq!(cache.remaining(), Some(Duration::from_secs(1)));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get(), None);
        assert_eq!(cache.remaining(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear() {
        let mut cache = IpCache::new(Duration::from_secs(300));
        cache.put(IP);
        cache.clear();
        assert_eq!(cache.get(), None);
    }
}
