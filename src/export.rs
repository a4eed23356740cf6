use serde_derive::Serialize;

use crate::registry::{ObservationRecord, Registry};

#[derive(Debug, Serialize)]
pub struct ExportPayload<'a> {
    scanner_id: &'a str,
    devices: Vec<ExportedDevice<'a>>,
}

#[derive(Debug, Serialize)]
struct ExportedDevice<'a> {
    mac: String,
    name: &'a str,
    rssi: i16,
    device_type: &'a str,
    manufacturer: &'a str,
}

/// Most recently seen records first, at most `max_count` of them.
///
/// The sort is stable, so records sharing a `last_seen` keep their registry order.
pub fn select_for_export(registry: &Registry, max_count: usize) -> Vec<&ObservationRecord> {
    let mut selected: Vec<&ObservationRecord> = registry.iter().collect();
    selected.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
    selected.truncate(max_count);
    selected
}

impl<'a> ExportPayload<'a> {
    pub fn new(scanner_id: &'a str, snapshot: &[&'a ObservationRecord]) -> Self {
        ExportPayload {
            scanner_id,
            devices: snapshot
                .iter()
                .map(|record| ExportedDevice {
                    mac: record.identity.to_string(),
                    name: record.display_name(),
                    rssi: record.rssi,
                    device_type: record.device_type,
                    manufacturer: record.manufacturer,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
