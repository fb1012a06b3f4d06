//! DeviceRegistry: keeps one proxy running per device the daemon reports.
//!
//! # Reconciliation cycle
//!
//! Every `poll_interval` the registry runs one cycle:
//!
//! 1. Fetch the device list (bounded by `call_timeout`).
//! 2. Compute a [`ReconciliationPlan`] against the live proxy table.
//! 3. **Removed** devices: stop the proxy and drop the entry.
//! 4. **Added** devices: query properties, launch a proxy on an ephemeral
//!    port, register it.
//! 5. **Retained** devices: refresh status, and properties if still unknown.
//! 6. If anything changed (or this is the first cycle), hand the full device
//!    list to the [`DeviceInformer`].
//!
//! Cycles never overlap: each holds `cycle_lock` for its whole duration, and
//! interval ticks missed while a cycle runs are skipped rather than queued.
//!
//! # Failure isolation
//!
//! A failure while handling one device (property query, proxy launch) is
//! logged and the cycle moves on to the next device.  A device whose proxy
//! failed to launch is simply absent from the table, so the next cycle sees
//! it as "added" again and retries.  Only a failed device-list fetch aborts a
//! cycle, and even then the table is left untouched.
//!
//! # Why inject the table? (for beginners)
//!
//! The live-proxy table is a [`ProxyTable`] (a shared `DashMap`) created by
//! the caller and passed in.  Nothing in the process reaches it through a
//! global, so tests can build a registry, run cycles, and inspect exactly the
//! table they handed over.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use devgate_core::{Device, DeviceId, DeviceProperties};

use super::reconcile::ReconciliationPlan;

/// Error type for a reconciliation cycle as a whole.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("device list query failed: {0:#}")]
    ListDevices(anyhow::Error),

    #[error("device list query timed out after {0:?}")]
    Timeout(Duration),
}

// ── Collaborator traits ───────────────────────────────────────────────────────

/// Where the registry learns which devices exist.
///
/// Implemented by `HostClient`; tests substitute a mock.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceSource: Send + Sync {
    async fn list_devices(&self) -> anyhow::Result<Vec<Device>>;

    async fn device_properties(&self, id: &DeviceId) -> anyhow::Result<DeviceProperties>;
}

/// A running per-device proxy, as far as the registry is concerned.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceProxy: Send + Sync {
    fn device_id(&self) -> DeviceId;

    /// OS-assigned listening port.
    fn port(&self) -> u16;

    /// `host:port` for clients.
    fn url(&self) -> String;

    /// Stops accepting and tears down every relay.  Idempotent.
    async fn stop(&self);
}

/// Starts proxies for newly seen devices.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProxyLauncher: Send + Sync {
    async fn launch(&self, device: &Device) -> anyhow::Result<Arc<dyn DeviceProxy>>;
}

/// External consumer of device-list changes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceInformer: Send + Sync {
    /// Receives every device the daemon reported, sorted by id, after a
    /// change.  A device whose proxy failed to launch is included without a
    /// `port` or `url`.
    async fn devices_changed(&self, devices: &[Device]) -> anyhow::Result<()>;
}

// ── Live-proxy table ──────────────────────────────────────────────────────────

/// One live device and the proxy serving it.
#[derive(Clone)]
pub struct RegistryEntry {
    pub device: Device,
    pub proxy: Arc<dyn DeviceProxy>,
}

/// Concurrency-safe map of live devices, shared by handle.
///
/// Cloning the table clones the handle, not the contents.
#[derive(Clone, Default)]
pub struct ProxyTable {
    entries: Arc<DashMap<DeviceId, RegistryEntry>>,
}

impl ProxyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.entries.contains_key(id)
    }

    /// The device record for `id`, if it has a live proxy.
    pub fn device(&self, id: &DeviceId) -> Option<Device> {
        self.entries.get(id).map(|e| e.device.clone())
    }

    /// Ids with a live proxy.
    pub fn ids(&self) -> Vec<DeviceId> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// All live devices, sorted by id.
    pub fn snapshot(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.entries.iter().map(|e| e.device.clone()).collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    fn remove(&self, id: &DeviceId) -> Option<RegistryEntry> {
        self.entries.remove(id).map(|(_, entry)| entry)
    }

    /// Registers `entry` unless its id is already present.
    ///
    /// Returns the rejected entry when the id was taken.
    fn insert_new(&self, entry: RegistryEntry) -> Result<(), RegistryEntry> {
        match self.entries.entry(entry.device.id.clone()) {
            Entry::Occupied(_) => Err(entry),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    fn update<F>(&self, id: &DeviceId, f: F) -> bool
    where
        F: FnOnce(&mut Device) -> bool,
    {
        self.entries
            .get_mut(id)
            .map_or(false, |mut e| f(&mut e.device))
    }

    fn drain(&self) -> Vec<RegistryEntry> {
        let ids = self.ids();
        ids.iter().filter_map(|id| self.remove(id)).collect()
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Outcome of one reconciliation cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Devices that got a new proxy this cycle.
    pub started: Vec<DeviceId>,
    /// Devices whose proxy was stopped this cycle.
    pub stopped: Vec<DeviceId>,
    /// Whether the device list the informer sees differs from last time.
    pub changed: bool,
    /// Whether the informer was called and accepted the list.
    pub informed: bool,
}

/// Timing knobs for the registry loop.
#[derive(Debug, Clone, Copy)]
pub struct RegistrySettings {
    pub poll_interval: Duration,
    pub call_timeout: Duration,
}

/// The periodic discovery-and-diff loop.
pub struct DeviceRegistry {
    source: Arc<dyn DeviceSource>,
    launcher: Arc<dyn ProxyLauncher>,
    informer: Arc<dyn DeviceInformer>,
    table: ProxyTable,
    settings: RegistrySettings,
    cycle_lock: Mutex<()>,
    first_cycle: AtomicBool,
}

impl DeviceRegistry {
    pub fn new(
        source: Arc<dyn DeviceSource>,
        launcher: Arc<dyn ProxyLauncher>,
        informer: Arc<dyn DeviceInformer>,
        table: ProxyTable,
        settings: RegistrySettings,
    ) -> Self {
        Self {
            source,
            launcher,
            informer,
            table,
            settings,
            cycle_lock: Mutex::new(()),
            first_cycle: AtomicBool::new(true),
        }
    }

    /// Current live devices, sorted by id.
    pub fn devices(&self) -> Vec<Device> {
        self.table.snapshot()
    }

    pub fn table(&self) -> &ProxyTable {
        &self.table
    }

    /// Runs cycles every `poll_interval` until `token` is cancelled, then
    /// stops every proxy.
    ///
    /// The first cycle starts immediately.
    pub async fn run(&self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "device registry running (poll every {:?})",
            self.settings.poll_interval
        );
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.reconcile_once().await {
                Ok(report) if report.changed => info!(
                    "cycle: {} started, {} stopped, {} live",
                    report.started.len(),
                    report.stopped.len(),
                    self.table.len()
                ),
                Ok(_) => debug!("cycle: no changes"),
                Err(e) => warn!("cycle aborted: {e}"),
            }
        }

        self.shutdown().await;
    }

    /// Stops every live proxy and empties the table.
    pub async fn shutdown(&self) {
        let _cycle = self.cycle_lock.lock().await;
        let entries = self.table.drain();
        for entry in &entries {
            entry.proxy.stop().await;
            debug!("device {}: proxy stopped on shutdown", entry.proxy.device_id());
        }
        info!("device registry stopped ({} proxies closed)", entries.len());
    }

    /// Runs one reconciliation cycle.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] only when the device list cannot be fetched;
    /// per-device failures are logged and skipped.
    pub async fn reconcile_once(&self) -> Result<CycleReport, RegistryError> {
        let _cycle = self.cycle_lock.lock().await;

        let listed = tokio::time::timeout(self.settings.call_timeout, self.source.list_devices())
            .await
            .map_err(|_| RegistryError::Timeout(self.settings.call_timeout))?
            .map_err(RegistryError::ListDevices)?;

        // Last report wins if the daemon lists an id twice.
        let observed: BTreeMap<DeviceId, Device> =
            listed.into_iter().map(|d| (d.id.clone(), d)).collect();
        let live = self.table.ids();
        let plan = ReconciliationPlan::compute(observed.keys(), &live);
        if !plan.is_steady() {
            debug!(
                "plan: {} added, {} removed, {} retained",
                plan.added.len(),
                plan.removed.len(),
                plan.retained.len()
            );
        }

        let mut report = CycleReport::default();

        for id in &plan.removed {
            if let Some(entry) = self.table.remove(id) {
                entry.proxy.stop().await;
                info!("device {id}: gone, proxy on port {} stopped", entry.proxy.port());
                report.stopped.push(id.clone());
            }
        }

        for (id, device) in observed.iter().filter(|(id, _)| plan.added.contains(*id)) {
            match self.start_device(device.clone()).await {
                Ok(()) => report.started.push(id.clone()),
                Err(e) => warn!("device {id}: proxy launch failed, retrying next cycle: {e:#}"),
            }
        }

        for (id, device) in observed.iter().filter(|(id, _)| plan.retained.contains(*id)) {
            if self.refresh_device(device).await {
                debug!("device {id}: updated in place");
                report.changed = true;
            }
        }

        report.changed |= !report.started.is_empty() || !report.stopped.is_empty();

        let first = self.first_cycle.swap(false, Ordering::SeqCst);
        if report.changed || first {
            let snapshot = Self::informer_view(observed, &self.table);
            match self.informer.devices_changed(&snapshot).await {
                Ok(()) => report.informed = true,
                Err(e) => warn!("device informer failed (ignored): {e:#}"),
            }
        }

        Ok(report)
    }

    /// Every observed device, sorted by id, with live table entries (status,
    /// properties, proxy endpoint) taking precedence over the raw listing.
    fn informer_view(observed: BTreeMap<DeviceId, Device>, table: &ProxyTable) -> Vec<Device> {
        observed
            .into_values()
            .map(|device| table.device(&device.id).unwrap_or(device))
            .collect()
    }

    async fn start_device(&self, mut device: Device) -> anyhow::Result<()> {
        if device.is_online() {
            if let Some(props) = self.query_properties(&device.id).await {
                device.apply_properties(&props);
            }
        }

        let proxy = self.launcher.launch(&device).await?;
        device.attach_proxy(proxy.port(), proxy.url());

        info!(
            "device {}: {} ({}), proxy at {}",
            device.id,
            device.status,
            device.version.as_deref().unwrap_or("version unknown"),
            proxy.url()
        );

        if let Err(rejected) = self.table.insert_new(RegistryEntry { device, proxy }) {
            // Unreachable while cycles hold the lock; keep the table consistent anyway.
            rejected.proxy.stop().await;
            anyhow::bail!("device {} already has a live proxy", rejected.device.id);
        }
        Ok(())
    }

    /// Applies the daemon's latest view of a retained device.
    ///
    /// Returns `true` when something the informer reports has changed.
    async fn refresh_device(&self, observed: &Device) -> bool {
        let id = &observed.id;
        let mut changed = self.table.update(id, |device| {
            if device.status == observed.status {
                return false;
            }
            info!("device {id}: status {} -> {}", device.status, observed.status);
            device.status = observed.status.clone();
            true
        });

        // Only a device in `device` state can answer getprop.
        let unknown = self
            .table
            .device(id)
            .map_or(false, |d| d.is_online() && d.properties_unknown());
        if unknown {
            if let Some(props) = self.query_properties(id).await {
                if !props.is_empty() {
                    changed |= self.table.update(id, |device| {
                        device.apply_properties(&props);
                        true
                    });
                }
            }
        }
        changed
    }

    async fn query_properties(&self, id: &DeviceId) -> Option<DeviceProperties> {
        let timeout = self.settings.call_timeout;
        match tokio::time::timeout(timeout, self.source.device_properties(id)).await {
            Ok(Ok(props)) => Some(props),
            Ok(Err(e)) => {
                debug!("device {id}: properties unavailable: {e:#}");
                None
            }
            Err(_) => {
                warn!("device {id}: property query timed out after {timeout:?}");
                None
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
