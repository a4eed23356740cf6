use log::info;

use crate::messages::LinkStatus;
use crate::registry::ObservationRecord;

const NAME_WIDTH: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub free_kib: u64,
    pub available_kib: u64,
}

impl MemoryStats {
    /// Best effort; `None` where `/proc/meminfo` is missing or unreadable.
    pub fn sample() -> Option<Self> {
        std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|contents| parse_meminfo(&contents))
    }
}

fn parse_meminfo(contents: &str) -> Option<MemoryStats> {
    let field = |name: &str| {
        contents.lines().find_map(|line| {
            let rest = line.strip_prefix(name)?.strip_prefix(':')?;
            rest.split_whitespace().next()?.parse::<u64>().ok()
        })
    };

    Some(MemoryStats {
        free_kib: field("MemFree")?,
        available_kib: field("MemAvailable")?,
    })
}

/// Everything the status panel shows after a scan window.
#[derive(Debug)]
pub struct StatusReport<'a> {
    pub device_count: usize,
    pub link: LinkStatus,
    pub post_success: u64,
    pub post_fail: u64,
    pub memory: Option<MemoryStats>,
    pub top_records: Vec<&'a ObservationRecord>,
}

pub trait StatusDisplay {
    fn render(&mut self, status: &StatusReport<'_>);
}

/// Renders the status panel into the log.
#[derive(Debug, Default)]
pub struct LogDisplay;

impl StatusDisplay for LogDisplay {
    fn render(&mut self, status: &StatusReport<'_>) {
        for line in panel_lines(status) {
            info!("{}", line);
        }
    }
}

pub fn panel_lines(status: &StatusReport<'_>) -> Vec<String> {
    let mut lines = vec![
        format!("BLE Scanner [{}]", status.device_count),
        status.link.describe(),
        format!("POST: {} OK, {} fail", status.post_success, status.post_fail),
    ];

    lines.push(match status.memory {
        Some(mem) => format!(
            "Mem: {}K free/{}K avail",
            mem.free_kib, mem.available_kib
        ),
        None => "Mem: n/a".to_string(),
    });

    lines.push("--- Devices ---".to_string());
    for record in &status.top_records {
        let name: String = record.display_name().chars().take(NAME_WIDTH).collect();
        lines.push(format!("{} {}", name, record.rssi));
    }
    lines
}
