use crate::registry::DeviceIdentity;

/// One advertisement delivered by the scan driver during a scan window.
#[derive(Clone, Debug)]
pub struct Discovery {
    pub identity: DeviceIdentity,
    pub name: Option<String>,
    pub rssi: i16,
    /// Raw vendor-specific data: little-endian company id followed by payload.
    pub vendor_data: Option<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    Up(/* endpoint description */ String),
    Down,
}

impl LinkStatus {
    pub fn is_up(&self) -> bool {
        matches!(self, LinkStatus::Up(_))
    }

    pub fn describe(&self) -> String {
        match self {
            LinkStatus::Up(endpoint) => format!("Link: {}", endpoint),
            LinkStatus::Down => "Link: Disconnected".to_string(),
        }
    }
}
