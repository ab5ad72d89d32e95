//! Live tracking of which track is loaded on each player.
//!
//! [`MetadataTracker`] subscribes to the discovery and status collaborators,
//! watches for track changes, fetches metadata for them, and keeps a cache
//! readers can snapshot at any time. Status delivery is never blocked:
//! updates land on a bounded queue drained by one consumer task, and all
//! network I/O happens on short-lived tasks spawned per event.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{MetadataEvent, SharedBus};
use crate::config::Config;
use crate::dbserver::PortCache;
use crate::error::MetadataError;
use crate::fetch::MetadataFetcher;
use crate::metadata::TrackMetadata;
use crate::sources::{DeviceEvent, DeviceRegistry, StatusSource};
use crate::status::{DeviceRecord, PlayerStatus, TrackSlot};

struct TrackerInner {
    devices: Arc<dyn DeviceRegistry>,
    statuses: Arc<dyn StatusSource>,
    ports: Arc<PortCache>,
    fetcher: MetadataFetcher,
    bus: SharedBus,
    config: Config,
    running: AtomicBool,
    /// Latest metadata per reporting device number.
    metadata: RwLock<HashMap<u8, TrackMetadata>>,
    /// Last status seen per source address, the comparison key for change
    /// detection.
    last_status: RwLock<HashMap<IpAddr, PlayerStatus>>,
    /// Target players with a fetch currently in flight.
    in_flight: Mutex<HashSet<u8>>,
}

struct RunState {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// The always-on metadata tracking service.
pub struct MetadataTracker {
    inner: Arc<TrackerInner>,
    run: Mutex<Option<RunState>>,
}

impl MetadataTracker {
    pub fn new(
        devices: Arc<dyn DeviceRegistry>,
        statuses: Arc<dyn StatusSource>,
        bus: SharedBus,
        config: Config,
    ) -> Self {
        let ports = Arc::new(PortCache::with_query_port(
            config.connect_timeout(),
            config.read_timeout(),
            config.port_query_port,
        ));
        let fetcher = MetadataFetcher::new(
            devices.clone(),
            statuses.clone(),
            ports.clone(),
            config.clone(),
        );
        Self {
            inner: Arc::new(TrackerInner {
                devices,
                statuses,
                ports,
                fetcher,
                bus,
                config,
                running: AtomicBool::new(false),
                metadata: RwLock::new(HashMap::new()),
                last_status: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashSet::new()),
            }),
            run: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Start tracking. Starts the collaborators if they are not already
    /// running, resolves db-service ports for every device currently on the
    /// network, and launches the forwarder and consumer tasks. Idempotent.
    pub async fn start(&self) -> Result<()> {
        let mut run = self.run.lock().await;
        if run.is_some() {
            return Ok(());
        }

        self.inner.devices.ensure_started().await?;
        self.inner.statuses.ensure_started().await?;

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        for device in self.inner.devices.current_devices().await {
            tokio::spawn(resolve_port(self.inner.clone(), device, cancel.clone()));
        }

        let (queue_tx, queue_rx) = mpsc::channel(self.inner.config.status_queue_capacity);
        tasks.push(tokio::spawn(forward_statuses(
            self.inner.statuses.subscribe(),
            queue_tx,
            cancel.clone(),
        )));
        tasks.push(tokio::spawn(watch_devices(
            self.inner.clone(),
            self.inner.devices.subscribe(),
            cancel.clone(),
        )));
        tasks.push(tokio::spawn(consume_statuses(
            self.inner.clone(),
            queue_rx,
            cancel.clone(),
        )));

        self.inner.running.store(true, Ordering::SeqCst);
        *run = Some(RunState { cancel, tasks });
        info!("metadata tracking started");
        Ok(())
    }

    /// Stop tracking: signal the consumer and forwarders to exit, discard
    /// queued work, and clear all cached state. Fetches already in flight
    /// finish in the background but will not touch the cleared cache.
    pub async fn stop(&self) {
        let Some(state) = self.run.lock().await.take() else {
            return;
        };
        self.inner.running.store(false, Ordering::SeqCst);
        state.cancel.cancel();
        for task in state.tasks {
            task.abort();
        }

        self.inner.metadata.write().await.clear();
        self.inner.last_status.write().await.clear();
        self.inner.in_flight.lock().await.clear();
        self.inner.ports.clear().await;
        info!("metadata tracking stopped");
    }

    /// Point-in-time copy of all currently known metadata, ordered by
    /// device number.
    pub async fn latest_metadata(&self) -> BTreeMap<u8, TrackMetadata> {
        let cache = self.inner.metadata.read().await;
        cache.iter().map(|(k, v)| (*k, v.clone())).collect()
    }

    /// Metadata for the track loaded on one device, if known.
    pub async fn latest_metadata_for(&self, device_number: u8) -> Option<TrackMetadata> {
        self.inner.metadata.read().await.get(&device_number).cloned()
    }

    /// One-shot fetch for the track a status update describes, bypassing
    /// the cache and the consumer. Blocks for the duration of the exchange.
    pub async fn fetch_for_status(
        &self,
        status: &PlayerStatus,
    ) -> crate::error::Result<Option<TrackMetadata>> {
        self.inner.fetcher.fetch_for_status(status).await
    }

    /// One-shot fetch by player, slot and track id.
    pub async fn fetch_track(
        &self,
        player: u8,
        slot: TrackSlot,
        track_id: u32,
    ) -> crate::error::Result<Option<TrackMetadata>> {
        self.inner.fetcher.fetch_one(player, slot, track_id).await
    }

    /// Enumerate all tracks in a player's media slot.
    pub async fn fetch_slot(
        &self,
        player: u8,
        slot: TrackSlot,
    ) -> crate::error::Result<BTreeMap<u32, TrackMetadata>> {
        self.inner.fetcher.fetch_all_in_slot(player, slot).await
    }
}

/// Moves status updates from the broadcast feed onto the bounded queue.
/// When the queue is backed up the update is shed; the next one carries the
/// same information soon enough, and the delivery path must never block.
async fn forward_statuses(
    mut feed: broadcast::Receiver<PlayerStatus>,
    queue: mpsc::Sender<PlayerStatus>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = feed.recv() => match received {
                Ok(status) => {
                    if queue.try_send(status).is_err() {
                        warn!("discarding status update because the queue is backed up");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "status feed lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Resolve a device's db-service port unless the run ends first. A
/// resolution landing after shutdown is rolled back, so a cleared port
/// cache stays cleared; the next start resolves afresh.
async fn resolve_port(inner: Arc<TrackerInner>, device: DeviceRecord, cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = inner.ports.resolve(&device) => {
            if cancel.is_cancelled() {
                inner.ports.evict(device.number).await;
            }
        }
    }
}

/// Reacts to roster changes: new devices get their db-service port resolved
/// on a task of their own; departed devices lose every cache entry.
async fn watch_devices(
    inner: Arc<TrackerInner>,
    mut events: broadcast::Receiver<DeviceEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            received = events.recv() => match received {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };
        match event {
            DeviceEvent::Found(device) => {
                debug!(player = device.number, address = %device.address, "device found");
                tokio::spawn(resolve_port(inner.clone(), device, cancel.clone()));
            }
            DeviceEvent::Lost(device) => {
                debug!(player = device.number, "device lost");
                inner.ports.evict(device.number).await;
                clear_device(&inner, device.number, Some(device.address)).await;
            }
        }
    }
}

/// The single consumer of the status queue and the decision point for when
/// a lookup is warranted.
async fn consume_statuses(
    inner: Arc<TrackerInner>,
    mut queue: mpsc::Receiver<PlayerStatus>,
    cancel: CancellationToken,
) {
    loop {
        let update = tokio::select! {
            _ = cancel.cancelled() => break,
            received = queue.recv() => match received {
                Some(update) => update,
                None => break,
            },
        };
        handle_update(&inner, update).await;
    }
}

async fn handle_update(inner: &Arc<TrackerInner>, update: PlayerStatus) {
    if !update.has_queryable_track() {
        clear_device(inner, update.device_number, Some(update.address)).await;
        return;
    }

    let changed = {
        let last = inner.last_status.read().await;
        match last.get(&update.address) {
            Some(previous) => !previous.same_track(&update),
            None => true,
        }
    };
    if !changed {
        return;
    }

    // One fetch per target player at a time; the claim is released when the
    // fetch finishes, success or not.
    let target = update.track_source_player;
    if !inner.in_flight.lock().await.insert(target) {
        debug!(target, "fetch already in flight, skipping");
        return;
    }

    let inner = inner.clone();
    tokio::spawn(async move {
        match inner.fetcher.fetch_for_status(&update).await {
            Ok(Some(data)) => install_metadata(&inner, update, data).await,
            Ok(None) => debug!(
                player = update.track_source_player,
                track = update.track_id,
                "no metadata available for track"
            ),
            Err(MetadataError::NoPosingIdentity { player }) => {
                warn!(player, "cannot query player: no posing identity available");
            }
            Err(e) => {
                warn!(
                    player = update.track_source_player,
                    track = update.track_id,
                    error = %e,
                    "problem requesting track metadata"
                );
            }
        }
        inner.in_flight.lock().await.remove(&target);
    });
}

/// Install fetched metadata, keyed by the device that reported the status.
/// A no-op once the engine has stopped, so a late completion can never
/// repopulate a cleared cache.
async fn install_metadata(inner: &Arc<TrackerInner>, update: PlayerStatus, data: TrackMetadata) {
    if !inner.running.load(Ordering::SeqCst) {
        debug!("engine stopped, dropping fetched metadata");
        return;
    }
    inner
        .metadata
        .write()
        .await
        .insert(update.device_number, data.clone());
    inner
        .last_status
        .write()
        .await
        .insert(update.address, update.clone());
    inner.bus.publish(MetadataEvent::Updated {
        device_number: update.device_number,
        metadata: Box::new(data),
    });
}

async fn clear_device(inner: &Arc<TrackerInner>, device_number: u8, address: Option<IpAddr>) {
    let removed = inner.metadata.write().await.remove(&device_number).is_some();
    if let Some(address) = address {
        inner.last_status.write().await.remove(&address);
    }
    if removed {
        inner.bus.publish(MetadataEvent::Cleared { device_number });
    }
}
