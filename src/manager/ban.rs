use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, SystemTime};

use crate::message::ReasonCode;

struct BanRecord {
    banned_until: SystemTime,
    offense_count: u32,
    offenses_by_reason: HashMap<ReasonCode, u32>,
}

/// Tracks graduated bans per IP: each new punishable offense doubles the
/// ban duration from the last one, capped at `max_duration`, mirroring the
/// ban-on-repeated-offense policy named for the channel manager. A
/// whitelist overrides any ban lookup unconditionally.
pub struct BanStore {
    records: HashMap<IpAddr, BanRecord>,
    whitelist: std::collections::HashSet<IpAddr>,
    base_duration: Duration,
    max_duration: Duration,
}

impl BanStore {
    pub fn new(base_duration: Duration, max_duration: Duration) -> Self {
        Self {
            records: HashMap::new(),
            whitelist: std::collections::HashSet::new(),
            base_duration,
            max_duration,
        }
    }

    pub fn whitelist(&mut self, ip: IpAddr) {
        self.whitelist.insert(ip);
    }

    pub fn unwhitelist(&mut self, ip: IpAddr) {
        self.whitelist.remove(&ip);
    }

    /// Administrative ban driven by the manager's public `ban_node` API.
    /// Shares the same per-IP offense counter and doubling schedule as
    /// [`Self::record_offense`], with `base_duration` standing in for the
    /// store's own default: three calls with `base_duration = 5min` yield
    /// 5/10/20-minute bans, exactly as three automatic protocol-violation
    /// offenses would with that same base.
    pub fn ban(&mut self, ip: IpAddr, base_duration: Duration, reason: ReasonCode) {
        self.bump(ip, base_duration, reason);
    }

    pub fn unban(&mut self, ip: IpAddr) {
        self.records.remove(&ip);
    }

    pub fn is_banned(&self, ip: &IpAddr) -> bool {
        if self.whitelist.contains(ip) {
            return false;
        }
        self.records
            .get(ip)
            .is_some_and(|record| record.banned_until > SystemTime::now())
    }

    /// Records an offense. Offenses that aren't punishable per
    /// [`ReasonCode::is_punishable`] never reach this, so only protocol
    /// violations and identity mismatches build ban history.
    pub fn record_offense(&mut self, ip: IpAddr, reason: ReasonCode) {
        if !reason.is_punishable() {
            return;
        }
        self.bump(ip, self.base_duration, reason);
    }

    fn bump(&mut self, ip: IpAddr, base_duration: Duration, reason: ReasonCode) {
        if self.whitelist.contains(&ip) {
            return;
        }
        let record = self.records.entry(ip).or_insert_with(|| BanRecord {
            banned_until: SystemTime::now(),
            offense_count: 0,
            offenses_by_reason: HashMap::new(),
        });
        record.offense_count += 1;
        *record.offenses_by_reason.entry(reason).or_insert(0) += 1;
        let duration = base_duration
            .saturating_mul(1u32.checked_shl(record.offense_count.saturating_sub(1)).unwrap_or(u32::MAX))
            .min(self.max_duration);
        record.banned_until = SystemTime::now() + duration;
    }

    pub fn offense_count(&self, ip: &IpAddr) -> u32 {
        self.records.get(ip).map(|r| r.offense_count).unwrap_or(0)
    }

    /// Offenses recorded against `ip`, broken down by [`ReasonCode`], for
    /// diagnostics and the matching metrics histogram.
    pub fn offense_counts_by_reason(&self, ip: &IpAddr) -> HashMap<ReasonCode, u32> {
        self.records
            .get(ip)
            .map(|r| r.offenses_by_reason.clone())
            .unwrap_or_default()
    }

    /// Evicts expired ban records so the table does not grow without bound
    /// across a long-lived process.
    pub fn sweep_expired(&mut self) {
        let now = SystemTime::now();
        self.records
            .retain(|_, record| record.banned_until > now || record.offense_count == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip() -> IpAddr {
        "10.0.0.1".parse().unwrap()
    }

    #[test]
    fn first_offense_bans_for_base_duration() {
        let mut store = BanStore::new(Duration::from_secs(60), Duration::from_secs(3600));
        assert!(!store.is_banned(&ip()));
        store.record_offense(ip(), ReasonCode::ProtocolError);
        assert!(store.is_banned(&ip()));
    }

    #[test]
    fn repeated_offenses_double_then_cap_duration() {
        let mut store = BanStore::new(Duration::from_secs(1), Duration::from_secs(2));
        for _ in 0..10 {
            store.record_offense(ip(), ReasonCode::ProtocolError);
        }
        assert_eq!(store.offense_count(&ip()), 10);
        assert!(store.is_banned(&ip()));
    }

    #[test]
    fn non_punishable_reason_is_ignored() {
        let mut store = BanStore::new(Duration::from_secs(60), Duration::from_secs(3600));
        store.record_offense(ip(), ReasonCode::ClientQuitting);
        assert!(!store.is_banned(&ip()));
    }

    #[test]
    fn whitelisted_ip_is_never_banned() {
        let mut store = BanStore::new(Duration::from_secs(60), Duration::from_secs(3600));
        store.whitelist(ip());
        store.record_offense(ip(), ReasonCode::ProtocolError);
        assert!(!store.is_banned(&ip()));
    }

    #[test]
    fn manual_ban_follows_the_same_graduated_schedule_as_offenses() {
        let mut store = BanStore::new(Duration::from_secs(60), Duration::from_secs(60 * 60 * 24 * 30));
        let base = Duration::from_secs(5 * 60);

        let now = SystemTime::now();
        store.ban(ip(), base, ReasonCode::InvalidIdentity);
        let first = store.records.get(&ip()).unwrap().banned_until;
        assert!(first.duration_since(now).unwrap().as_secs() >= 300 - 1);

        store.ban(ip(), base, ReasonCode::InvalidIdentity);
        let second = store.records.get(&ip()).unwrap().banned_until;
        assert!(second.duration_since(now).unwrap().as_secs() >= 600 - 1);

        store.ban(ip(), base, ReasonCode::InvalidIdentity);
        let third = store.records.get(&ip()).unwrap().banned_until;
        assert!(third.duration_since(now).unwrap().as_secs() >= 1200 - 1);

        assert_eq!(store.offense_count(&ip()), 3);
    }

    #[test]
    fn offense_counts_are_tracked_per_reason() {
        let mut store = BanStore::new(Duration::from_secs(60), Duration::from_secs(3600));
        store.record_offense(ip(), ReasonCode::ProtocolError);
        store.record_offense(ip(), ReasonCode::ProtocolError);
        store.record_offense(ip(), ReasonCode::BadNetwork);

        let counts = store.offense_counts_by_reason(&ip());
        assert_eq!(counts.get(&ReasonCode::ProtocolError), Some(&2));
        assert_eq!(counts.get(&ReasonCode::BadNetwork), Some(&1));
        assert_eq!(store.offense_count(&ip()), 3);
    }

    #[test]
    fn unban_clears_a_record_immediately() {
        let mut store = BanStore::new(Duration::from_secs(60), Duration::from_secs(3600));
        store.record_offense(ip(), ReasonCode::ProtocolError);
        assert!(store.is_banned(&ip()));
        store.unban(ip());
        assert!(!store.is_banned(&ip()));
    }
}
