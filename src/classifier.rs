pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Manufacturer {
    Apple,
    Samsung,
    Google,
    Microsoft,
}

impl Manufacturer {
    /// https://bitbucket.org/bluetooth-SIG/public/src/main/assigned_numbers/company_identifiers/company_identifiers.yaml
    pub fn from_company_id(company_id: u16) -> Option<Self> {
        match company_id {
            0x004C => Some(Manufacturer::Apple),
            0x0075 => Some(Manufacturer::Samsung),
            0x00E0 => Some(Manufacturer::Google),
            0x0006 => Some(Manufacturer::Microsoft),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Manufacturer::Apple => "Apple",
            Manufacturer::Samsung => "Samsung",
            Manufacturer::Google => "Google",
            Manufacturer::Microsoft => "Microsoft",
        }
    }

    /// Coarse device type. Shares the manufacturer table, but Microsoft
    /// advertisements cover too many device kinds to label.
    pub fn device_type(&self) -> Option<&'static str> {
        match self {
            Manufacturer::Microsoft => None,
            other => Some(other.name()),
        }
    }
}

/// Labels derived from one advertisement's vendor data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub device_type: &'static str,
    pub manufacturer: &'static str,
}

/// First two bytes of vendor-specific data, read as a little-endian company identifier.
pub fn company_id(vendor_data: Option<&[u8]>) -> Option<u16> {
    match vendor_data {
        Some([lo, hi, ..]) => Some(u16::from_le_bytes([*lo, *hi])),
        _ => None,
    }
}

pub fn classify(vendor_data: Option<&[u8]>) -> Classification {
    let manufacturer = company_id(vendor_data).and_then(Manufacturer::from_company_id);

    Classification {
        device_type: manufacturer
            .and_then(|m| m.device_type())
            .unwrap_or(UNKNOWN),
        manufacturer: manufacturer.map(|m| m.name()).unwrap_or(UNKNOWN),
    }
}
