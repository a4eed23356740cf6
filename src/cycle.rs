use std::collections::HashMap;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::classifier;
use crate::config::{CycleSettings, ServerConfig};
use crate::display::{MemoryStats, StatusDisplay, StatusReport};
use crate::export::{ExportPayload, select_for_export};
use crate::messages::{Discovery, LinkStatus};
use crate::registry::{DeviceIdentity, Observation, Registry, Upserted};
use crate::scanner::ScanDriver;
use crate::transport::{SubmitRequest, Transport};

/// Slack after the nominal scan window before results are considered complete.
const SCAN_GRACE: Duration = Duration::from_millis(500);
const TICK: Duration = Duration::from_millis(10);
const STATUS_TOP_RECORDS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Scanning { started_at: Instant },
    ScanComplete,
    Reporting,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PostCounters {
    pub success: u64,
    pub fail: u64,
}

/// Where exports go: collector settings plus the transport that reaches it.
pub struct Uplink<T> {
    pub server: ServerConfig,
    pub transport: T,
}

pub struct ReportingCycle<S, T, D> {
    settings: CycleSettings,
    scanner_id: String,
    registry: Registry,
    state: CycleState,
    last_scan_start: Option<Instant>,
    counters: PostCounters,
    known_names: HashMap<String, String>,
    scanner: S,
    uplink: Option<Uplink<T>>,
    display: D,
}

impl<S, T, D> ReportingCycle<S, T, D>
where
    S: ScanDriver,
    T: Transport,
    D: StatusDisplay,
{
    pub fn new(
        settings: CycleSettings,
        scanner_id: String,
        scanner: S,
        uplink: Option<Uplink<T>>,
        display: D,
    ) -> Self {
        ReportingCycle {
            settings,
            scanner_id,
            registry: Registry::new(settings.max_tracked_devices),
            state: CycleState::Idle,
            last_scan_start: None,
            counters: PostCounters::default(),
            known_names: HashMap::new(),
            scanner,
            uplink,
            display,
        }
    }

    /// Names to fall back on for devices that advertise without one.
    pub fn with_known_names<I>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = (DeviceIdentity, String)>,
    {
        self.known_names = names
            .into_iter()
            .map(|(identity, name)| (identity.to_string(), name))
            .collect();
        self
    }

    pub fn counters(&self) -> PostCounters {
        self.counters
    }

    pub fn link_status(&self) -> LinkStatus {
        self.uplink
            .as_ref()
            .map(|uplink| uplink.transport.link_status())
            .unwrap_or(LinkStatus::Down)
    }

    /// Classifies one discovery and merges it into the registry.
    pub fn observe(&mut self, discovery: Discovery, now: Instant) {
        let labels = classifier::classify(discovery.vendor_data.as_deref());
        let name = discovery
            .name
            .filter(|name| name != classifier::UNKNOWN)
            .or_else(|| self.known_names.get(&discovery.identity.to_string()).cloned());

        let upserted = self.registry.upsert(
            Observation {
                identity: discovery.identity,
                name,
                rssi: discovery.rssi,
                device_type: labels.device_type,
                manufacturer: labels.manufacturer,
            },
            now,
        );
        if let Upserted::Evicted(old) = upserted {
            debug!(
                "Registry full, dropped {} ({})",
                old.display_name(),
                old.identity
            );
        }
    }

    /// Evaluates at most one state transition.
    pub async fn tick(&mut self, now: Instant) {
        match self.state {
            CycleState::Idle => {
                let due = self
                    .last_scan_start
                    .is_none_or(|start| now.saturating_duration_since(start) >= self.settings.scan_interval);
                if due {
                    self.start_scan(now).await;
                }
            }
            CycleState::Scanning { started_at } => {
                if now.saturating_duration_since(started_at) >= self.settings.scan_duration + SCAN_GRACE {
                    self.complete_scan(now);
                }
            }
            CycleState::ScanComplete => {
                self.state = if self.link_status().is_up() && !self.registry.is_empty() {
                    CycleState::Reporting
                } else {
                    self.log_summary();
                    CycleState::Idle
                };
            }
            CycleState::Reporting => {
                self.report().await;
                self.log_summary();
                self.state = CycleState::Idle;
            }
        }
    }

    async fn start_scan(&mut self, now: Instant) {
        info!(
            "Starting BLE scan ({}/{} devices tracked)",
            self.registry.len(),
            self.registry.capacity()
        );
        self.last_scan_start = Some(now);
        self.state = CycleState::Scanning { started_at: now };

        // A window that failed to start still runs its course; the next interval retries
        let started = self.scanner.start_scan(self.settings.scan_duration).await;
        info!("  Scan started: {}", started);
    }

    fn complete_scan(&mut self, now: Instant) {
        self.registry.prune(now, self.settings.device_timeout);

        let status = StatusReport {
            device_count: self.registry.len(),
            link: self.link_status(),
            post_success: self.counters.success,
            post_fail: self.counters.fail,
            memory: MemoryStats::sample(),
            top_records: self.registry.iter().take(STATUS_TOP_RECORDS).collect(),
        };
        self.display.render(&status);

        self.state = CycleState::ScanComplete;
    }

    async fn report(&mut self) {
        let Some(uplink) = self.uplink.as_ref() else {
            return;
        };
        if let Err(reason) = uplink.server.readiness() {
            warn!("Skipping export: {}", reason);
            return;
        }

        let snapshot = select_for_export(&self.registry, self.settings.export_limit.get());
        let payload = ExportPayload::new(&self.scanner_id, &snapshot);
        let body = match payload.to_bytes() {
            Ok(body) => body,
            Err(err) => {
                error!("Error serializing export: {:?}", err);
                self.counters.fail += 1;
                return;
            }
        };
        info!("Posting {} devices ({} bytes)", payload.len(), body.len());

        let result = uplink
            .transport
            .submit(SubmitRequest {
                url: &uplink.server.url,
                api_key: &uplink.server.api_key,
                body,
                timeout: uplink.server.timeout(),
            })
            .await;

        match result {
            Ok(200) => {
                info!("  SUCCESS! HTTP 200");
                self.counters.success += 1;
            }
            Ok(status) => {
                warn!("  HTTP Error: {}", status);
                self.counters.fail += 1;
            }
            Err(err) => {
                error!("  Connection Error: {}", err);
                self.counters.fail += 1;
            }
        }
    }

    fn log_summary(&self) {
        info!(
            "Scan complete. Tracking {} devices. Posts: {} OK, {} fail",
            self.registry.len(),
            self.counters.success,
            self.counters.fail
        );
    }

    /// Drives the cycle until `shutdown` resolves. Discoveries and ticks are handled
    /// on this task only, so the registry never sees concurrent writers.
    pub async fn run_loop<F>(
        &mut self,
        mut discoveries: mpsc::Receiver<Discovery>,
        shutdown: F,
    ) -> anyhow::Result<()>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                Some(discovery) = discoveries.recv() => {
                    self.observe(discovery, Instant::now());
                }
                _ = ticker.tick() => {
                    self.tick(Instant::now()).await;
                }
                result = &mut shutdown => {
                    result?;
                    debug!("Shutdown requested");
                    break;
                }
            }
        }

        let counters = self.counters();
        info!(
            "Exiting reporting loop. Posts: {} OK, {} fail",
            counters.success, counters.fail
        );
        Ok(())
    }
}

#[cfg(test)]
impl<S, T, D> ReportingCycle<S, T, D> {
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn state(&self) -> CycleState {
        self.state
    }
}
