use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central as _, CentralEvent, Peripheral as _, PeripheralProperties, ScanFilter};
use btleplug::platform::Adapter;
use futures::{Stream, StreamExt as _};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::messages::Discovery;
use crate::registry::DeviceIdentity;

/// Starts fixed-length scan windows. Results arrive out of band as [`Discovery`] messages.
#[async_trait]
pub trait ScanDriver: Send {
    async fn start_scan(&mut self, duration: Duration) -> bool;
}

pub struct BtleScanner {
    adapter: Adapter,
    tx: mpsc::Sender<Discovery>,
}

impl BtleScanner {
    pub fn new(adapter: Adapter, tx: mpsc::Sender<Discovery>) -> Self {
        BtleScanner { adapter, tx }
    }
}

#[async_trait]
impl ScanDriver for BtleScanner {
    async fn start_scan(&mut self, duration: Duration) -> bool {
        // Subscribe before scanning so early advertisements are not missed
        let events = match self.adapter.events().await {
            Ok(events) => events,
            Err(err) => {
                error!("Error subscribing to BLE events: {:?}", err);
                return false;
            }
        };

        if let Err(err) = self.adapter.start_scan(ScanFilter::default()).await {
            error!("Error starting BLE scan: {:?}", err);
            return false;
        }

        let adapter = self.adapter.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            forward_discoveries(&adapter, events, &tx, duration).await;
            if let Err(err) = adapter.stop_scan().await {
                warn!("Error stopping BLE scan: {:?}", err);
            }
            debug!("Scan window closed");
        });

        true
    }
}

async fn forward_discoveries(
    adapter: &Adapter,
    mut events: Pin<Box<dyn Stream<Item = CentralEvent> + Send>>,
    tx: &mpsc::Sender<Discovery>,
    duration: Duration,
) {
    let window = tokio::time::sleep(duration);
    tokio::pin!(window);

    loop {
        tokio::select! {
            _ = &mut window => break,
            event = events.next() => {
                match event {
                    Some(CentralEvent::DeviceDiscovered(id)) | Some(CentralEvent::DeviceUpdated(id)) => {
                        let properties = match adapter.peripheral(&id).await {
                            Ok(peripheral) => peripheral.properties().await,
                            Err(err) => Err(err),
                        };
                        match properties {
                            Ok(Some(properties)) => {
                                if let Some(discovery) = discovery_from(properties) {
                                    if tx.send(discovery).await.is_err() {
                                        info!("Discovery receiver closed");
                                        break;
                                    }
                                }
                            }
                            Ok(None) => {}
                            Err(err) => debug!("Error reading peripheral {:?}: {:?}", id, err),
                        }
                    }
                    Some(_) => {}
                    None => {
                        debug!("No more events");
                        break;
                    }
                }
            }
        }
    }
}

/// Advertisements without an RSSI reading carry no observation and are dropped.
fn discovery_from(properties: PeripheralProperties) -> Option<Discovery> {
    let Some(rssi) = properties.rssi else {
        debug!("Skipping {} advertisement without RSSI", properties.address);
        return None;
    };
    Some(Discovery {
        identity: DeviceIdentity::new(properties.address.into_inner()),
        name: properties.local_name.filter(|name| !name.is_empty()),
        rssi,
        vendor_data: vendor_blob(&properties.manufacturer_data),
    })
}

/// btleplug splits the company id off manufacturer data; put it back in front,
/// little-endian, as it appears on air. The lowest company id wins when several are present.
fn vendor_blob(manufacturer_data: &HashMap<u16, Vec<u8>>) -> Option<Vec<u8>> {
    manufacturer_data
        .iter()
        .min_by_key(|(company_id, _)| **company_id)
        .map(|(company_id, payload)| {
            let mut blob = company_id.to_le_bytes().to_vec();
            blob.extend_from_slice(payload);
            blob
        })
}

#[cfg(test)]
mod tests {
    use btleplug::api::BDAddr;

    use super::*;
    use crate::classifier;

    #[test]
    fn test_vendor_blob() {
        let mut data = HashMap::new();
        data.insert(0x00E0, vec![0x01]);
        data.insert(0x004C, vec![0x02, 0x15]);
        assert_eq!(vendor_blob(&data), Some(vec![0x4C, 0x00, 0x02, 0x15]));
        assert_eq!(vendor_blob(&HashMap::new()), None);
    }

    #[test]
    fn test_discovery_from_properties() {
        let mut manufacturer_data = HashMap::new();
        manufacturer_data.insert(0x0075, vec![0x42]);
        let properties = PeripheralProperties {
            address: BDAddr::from([0x0A, 0x1B, 0x2C, 0x3D, 0x4E, 0x5F]),
            local_name: Some("Galaxy Buds".to_string()),
            rssi: Some(-63),
            manufacturer_data,
            ..Default::default()
        };

        let discovery = discovery_from(properties).unwrap();
        assert_eq!(discovery.identity.to_string(), "0A:1B:2C:3D:4E:5F");
        assert_eq!(discovery.name.as_deref(), Some("Galaxy Buds"));
        assert_eq!(discovery.rssi, -63);
        assert_eq!(
            classifier::classify(discovery.vendor_data.as_deref()).manufacturer,
            "Samsung"
        );
    }

    #[test]
    fn test_missing_rssi_or_name() {
        let properties = PeripheralProperties {
            local_name: Some(String::new()),
            rssi: Some(-90),
            ..Default::default()
        };
        let discovery = discovery_from(properties).unwrap();
        assert!(discovery.name.is_none());
        assert!(discovery.vendor_data.is_none());

        assert!(discovery_from(PeripheralProperties::default()).is_none());
    }
}
