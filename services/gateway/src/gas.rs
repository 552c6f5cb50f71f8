//! Gas price caching.
//!
//! Gas prices on the monitored networks move slowly relative to the
//! detector's cadence, so each gateway keeps the last fetched price behind a
//! short TTL instead of hitting `eth_gasPrice` on every candidate trade.

use parking_lot::RwLock;
use types::time;

/// Cache duration for gas prices.
const DEFAULT_TTL_SECS: u64 = 30;

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    price_wei: u128,
    fetched_at_ns: u64,
}

/// TTL cache for one network's gas price.
#[derive(Debug)]
pub struct GasPriceCache {
    ttl_ns: u64,
    cached: RwLock<Option<CachedPrice>>,
}

impl Default for GasPriceCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL_SECS)
    }
}

impl GasPriceCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self { ttl_ns: time::secs_to_ns(ttl_secs), cached: RwLock::new(None) }
    }

    /// The cached price, if still fresh at `now_ns`.
    pub fn get(&self, now_ns: u64) -> Option<u128> {
        let cached = (*self.cached.read())?;
        if now_ns.saturating_sub(cached.fetched_at_ns) <= self.ttl_ns {
            Some(cached.price_wei)
        } else {
            None
        }
    }

    pub fn store(&self, price_wei: u128, now_ns: u64) {
        *self.cached.write() = Some(CachedPrice { price_wei, fetched_at_ns: now_ns });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_price_is_served() {
        let cache = GasPriceCache::new(30);
        cache.store(30_000_000_000, 1_000_000_000);
        assert_eq!(cache.get(2_000_000_000), Some(30_000_000_000));
    }

    #[test]
    fn expired_price_is_dropped() {
        let cache = GasPriceCache::new(30);
        cache.store(30_000_000_000, 0);
        let after_ttl = time::secs_to_ns(31);
        assert_eq!(cache.get(after_ttl), None);
    }

    #[test]
    fn empty_cache_misses() {
        let cache = GasPriceCache::default();
        assert_eq!(cache.get(0), None);
    }
}
