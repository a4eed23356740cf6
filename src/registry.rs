use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

use log::{debug, info};
use mac_address::{MacAddress, MacParseError};
use tokio::time::Instant;

use crate::classifier::UNKNOWN;

/// Hardware address of a beacon. Always rendered as uppercase, colon separated hex.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceIdentity(MacAddress);

impl DeviceIdentity {
    pub fn new(bytes: [u8; 6]) -> Self {
        DeviceIdentity(MacAddress::new(bytes))
    }
}

impl From<MacAddress> for DeviceIdentity {
    fn from(address: MacAddress) -> Self {
        DeviceIdentity(address)
    }
}

impl FromStr for DeviceIdentity {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<MacAddress>().map(DeviceIdentity)
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0.bytes();
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// One classified sighting, as handed to [`Registry::upsert`].
#[derive(Clone, Debug)]
pub struct Observation {
    pub identity: DeviceIdentity,
    pub name: Option<String>,
    pub rssi: i16,
    pub device_type: &'static str,
    pub manufacturer: &'static str,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ObservationRecord {
    pub identity: DeviceIdentity,
    /// `None` until some advertisement carries a name.
    pub name: Option<String>,
    pub rssi: i16,
    pub device_type: &'static str,
    pub manufacturer: &'static str,
    pub last_seen: Instant,
}

impl ObservationRecord {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN)
    }
}

#[derive(Debug, PartialEq)]
pub enum Upserted {
    Updated,
    Inserted,
    /// Inserted after dropping the least recently seen record.
    Evicted(ObservationRecord),
}

/// Bounded, insertion-ordered set of observation records keyed by identity.
///
/// Capacity is small, so lookups are linear scans over a `Vec`. All mutation
/// goes through `&mut self`, which keeps the registry on a single writer.
#[derive(Debug)]
pub struct Registry {
    records: Vec<ObservationRecord>,
    capacity: NonZeroUsize,
}

impl Registry {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Registry {
            records: Vec::with_capacity(capacity.get()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ObservationRecord> {
        self.records.iter()
    }

    pub fn upsert(&mut self, mut observation: Observation, now: Instant) -> Upserted {
        // A literal "Unknown" carries no more information than no name at all
        observation.name = observation.name.filter(|name| name != UNKNOWN);

        if let Some(existing) = self
            .records
            .iter_mut()
            .find(|r| r.identity == observation.identity)
        {
            existing.rssi = observation.rssi;
            existing.last_seen = existing.last_seen.max(now);
            // Device type and manufacturer keep their first-observation values
            if existing.name.is_none() && observation.name.is_some() {
                existing.name = observation.name;
            }
            return Upserted::Updated;
        }

        let evicted = if self.records.len() >= self.capacity.get() {
            self.oldest_index().map(|idx| self.records.remove(idx))
        } else {
            None
        };

        let record = ObservationRecord {
            identity: observation.identity,
            name: observation.name,
            rssi: observation.rssi,
            device_type: observation.device_type,
            manufacturer: observation.manufacturer,
            last_seen: now,
        };
        info!(
            "NEW: {} ({}) RSSI: {}",
            record.display_name(),
            record.identity,
            record.rssi
        );
        self.records.push(record);

        match evicted {
            Some(old) => Upserted::Evicted(old),
            None => Upserted::Inserted,
        }
    }

    /// Drops every record silent for longer than `timeout`, keeping survivor order.
    /// Returns how many were removed.
    pub fn prune(&mut self, now: Instant, timeout: Duration) -> usize {
        let before = self.records.len();
        self.records
            .retain(|r| now.saturating_duration_since(r.last_seen) <= timeout);
        let removed = before - self.records.len();
        if removed > 0 {
            debug!("Pruned {} stale devices", removed);
        }
        removed
    }

    // First record wins on ties
    fn oldest_index(&self) -> Option<usize> {
        self.records
            .iter()
            .enumerate()
            .min_by_key(|(_, r)| r.last_seen)
            .map(|(idx, _)| idx)
    }
}

#[cfg(test)]
impl Registry {
    pub fn get(&self, identity: &DeviceIdentity) -> Option<&ObservationRecord> {
        self.records.iter().find(|r| r.identity == *identity)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn identity(n: u8) -> DeviceIdentity {
        DeviceIdentity::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, n])
    }

    pub(crate) fn observation(n: u8, name: Option<&str>, rssi: i16) -> Observation {
        Observation {
            identity: identity(n),
            name: name.map(str::to_string),
            rssi,
            device_type: "Apple",
            manufacturer: "Apple",
        }
    }

    fn registry(capacity: usize) -> Registry {
        Registry::new(NonZeroUsize::new(capacity).unwrap())
    }

    fn identities(registry: &Registry) -> Vec<DeviceIdentity> {
        registry.iter().map(|r| r.identity).collect()
    }

    #[test]
    fn test_identity_display_is_uppercase() {
        let id: DeviceIdentity = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(id.to_string(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(id, "AA:BB:CC:DD:EE:FF".parse().unwrap());
    }

    #[test]
    fn test_repeat_observation_merges() {
        let start = Instant::now();
        let mut reg = registry(30);
        assert_eq!(reg.upsert(observation(1, None, -70), start), Upserted::Inserted);
        assert_eq!(
            reg.upsert(observation(1, None, -50), start + Duration::from_millis(5)),
            Upserted::Updated
        );
        assert_eq!(reg.len(), 1);
        let record = reg.get(&identity(1)).unwrap();
        assert_eq!(record.rssi, -50);
        assert_eq!(record.last_seen, start + Duration::from_millis(5));
    }

    #[test]
    fn test_name_fills_in_then_sticks() {
        let start = Instant::now();
        let id: DeviceIdentity = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        let mut reg = registry(30);
        let mut obs = observation(0, None, -70);
        obs.identity = id;
        reg.upsert(obs.clone(), start);

        obs.name = Some("Phone".to_string());
        obs.rssi = -60;
        reg.upsert(obs.clone(), start + Duration::from_secs(1));
        let record = reg.get(&id).unwrap();
        assert_eq!(record.display_name(), "Phone");
        assert_eq!(record.rssi, -60);

        obs.name = None;
        reg.upsert(obs.clone(), start + Duration::from_secs(2));
        obs.name = Some("Other".to_string());
        reg.upsert(obs, start + Duration::from_secs(3));
        assert_eq!(reg.get(&id).unwrap().display_name(), "Phone");
    }

    #[test]
    fn test_literal_unknown_name_can_be_replaced() {
        let start = Instant::now();
        let mut reg = registry(30);
        reg.upsert(observation(1, Some("Unknown"), -70), start);
        assert!(reg.get(&identity(1)).unwrap().name.is_none());

        reg.upsert(observation(1, Some("Phone"), -60), start + Duration::from_secs(1));
        assert_eq!(reg.get(&identity(1)).unwrap().display_name(), "Phone");

        reg.upsert(observation(1, Some("Unknown"), -65), start + Duration::from_secs(2));
        assert_eq!(reg.get(&identity(1)).unwrap().display_name(), "Phone");
    }

    #[test]
    fn test_labels_keep_first_observation() {
        let start = Instant::now();
        let mut reg = registry(30);
        reg.upsert(observation(1, None, -70), start);
        let mut obs = observation(1, None, -70);
        obs.device_type = "Google";
        obs.manufacturer = "Google";
        reg.upsert(obs, start + Duration::from_secs(1));
        let record = reg.get(&identity(1)).unwrap();
        assert_eq!(record.manufacturer, "Apple");
        assert_eq!(record.device_type, "Apple");
    }

    #[test]
    fn test_last_seen_never_moves_backwards() {
        let start = Instant::now();
        let mut reg = registry(4);
        reg.upsert(observation(1, None, -70), start + Duration::from_secs(10));
        reg.upsert(observation(1, None, -70), start);
        assert_eq!(
            reg.get(&identity(1)).unwrap().last_seen,
            start + Duration::from_secs(10)
        );
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let start = Instant::now();
        let mut reg = registry(30);
        for n in 0..31u8 {
            reg.upsert(observation(n, None, -70), start + Duration::from_millis(n as u64));
            assert!(reg.len() <= 30);
        }
        assert_eq!(reg.len(), 30);
        assert!(reg.get(&identity(0)).is_none());
        assert!(reg.get(&identity(30)).is_some());
    }

    #[test]
    fn test_eviction_picks_least_recent_not_first_inserted() {
        let start = Instant::now();
        let mut reg = registry(3);
        reg.upsert(observation(1, None, -70), start);
        reg.upsert(observation(2, None, -70), start + Duration::from_secs(1));
        reg.upsert(observation(3, None, -70), start + Duration::from_secs(2));
        // Refresh 1 so 2 becomes the oldest
        reg.upsert(observation(1, None, -70), start + Duration::from_secs(3));

        let outcome = reg.upsert(observation(4, None, -70), start + Duration::from_secs(4));
        match outcome {
            Upserted::Evicted(old) => assert_eq!(old.identity, identity(2)),
            other => panic!("expected eviction, got {:?}", other),
        }
        assert_eq!(identities(&reg), vec![identity(1), identity(3), identity(4)]);
    }

    #[test]
    fn test_eviction_tie_removes_first() {
        let start = Instant::now();
        let mut reg = registry(3);
        for n in 1..=3 {
            reg.upsert(observation(n, None, -70), start);
        }
        reg.upsert(observation(4, None, -70), start);
        assert_eq!(identities(&reg), vec![identity(2), identity(3), identity(4)]);
    }

    #[test]
    fn test_unique_identities_under_churn() {
        let start = Instant::now();
        let mut reg = registry(5);
        for step in 0..200u64 {
            let n = (step * 7 % 11) as u8;
            reg.upsert(observation(n, None, -70), start + Duration::from_millis(step));
            let mut ids = identities(&reg);
            ids.sort_by_key(|id| id.to_string());
            ids.dedup();
            assert_eq!(ids.len(), reg.len());
            assert!(reg.len() <= reg.capacity());
        }
    }

    #[test]
    fn test_prune_removes_only_stale() {
        let start = Instant::now();
        let timeout = Duration::from_millis(120_000);
        let mut reg = registry(30);
        reg.upsert(observation(1, None, -70), start);
        reg.upsert(observation(2, None, -70), start + Duration::from_millis(1));
        reg.upsert(observation(3, None, -70), start + Duration::from_millis(50_000));
        reg.upsert(observation(4, None, -70), start + Duration::from_millis(2));

        // Exactly at the timeout survives, one past it does not
        let now = start + Duration::from_millis(120_001);
        assert_eq!(reg.prune(now, timeout), 1);
        assert_eq!(identities(&reg), vec![identity(2), identity(3), identity(4)]);
        for record in reg.iter() {
            assert!(now.saturating_duration_since(record.last_seen) <= timeout);
        }
    }

    #[test]
    fn test_prune_is_idempotent() {
        let start = Instant::now();
        let timeout = Duration::from_secs(10);
        let mut reg = registry(30);
        for n in 0..6u8 {
            reg.upsert(observation(n, None, -70), start + Duration::from_secs(n as u64 * 3));
        }
        let now = start + Duration::from_secs(20);
        assert_eq!(reg.prune(now, timeout), 4);
        let after_first = identities(&reg);
        assert_eq!(reg.prune(now, timeout), 0);
        assert_eq!(identities(&reg), after_first);
    }
}
