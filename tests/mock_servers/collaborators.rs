#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! In-memory fakes for the discovery and status collaborators.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{broadcast, Notify, RwLock};

use prolink_metadata::sources::{DeviceEvent, DeviceRegistry, StatusSource};
use prolink_metadata::status::{DeviceRecord, PlayerStatus, TrackSlot, TrackType};

/// Scriptable device roster. Lookups are counted so tests can observe how
/// many fetches the engine actually launched, and an optional gate lets a
/// test hold a fetch in flight at the lookup step.
pub struct FakeRegistry {
    devices: RwLock<HashMap<u8, DeviceRecord>>,
    events: broadcast::Sender<DeviceEvent>,
    lookups: AtomicUsize,
    gate: RwLock<Option<Arc<Notify>>>,
}

impl FakeRegistry {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            devices: RwLock::new(HashMap::new()),
            events,
            lookups: AtomicUsize::new(0),
            gate: RwLock::new(None),
        })
    }

    pub async fn add_device(&self, record: DeviceRecord) {
        self.devices.write().await.insert(record.number, record.clone());
        let _ = self.events.send(DeviceEvent::Found(record));
    }

    pub async fn remove_device(&self, number: u8) {
        if let Some(record) = self.devices.write().await.remove(&number) {
            let _ = self.events.send(DeviceEvent::Lost(record));
        }
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Make every subsequent lookup block until the notify is signalled.
    pub async fn install_gate(&self, gate: Arc<Notify>) {
        *self.gate.write().await = Some(gate);
    }
}

#[async_trait]
impl DeviceRegistry for FakeRegistry {
    async fn ensure_started(&self) -> Result<()> {
        Ok(())
    }

    async fn current_devices(&self) -> Vec<DeviceRecord> {
        self.devices.read().await.values().cloned().collect()
    }

    async fn device_by_number(&self, number: u8) -> Option<DeviceRecord> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.read().await.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.devices.read().await.get(&number).cloned()
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }
}

/// Scriptable status feed. The virtual device number decides whether
/// metadata queries can pose as ourselves (1 through 4) or must borrow
/// another player's number.
pub struct FakeStatusSource {
    virtual_number: u8,
    latest: RwLock<HashMap<u8, PlayerStatus>>,
    feed: broadcast::Sender<PlayerStatus>,
}

impl FakeStatusSource {
    pub fn new(virtual_number: u8) -> Arc<Self> {
        let (feed, _) = broadcast::channel(256);
        Arc::new(Self {
            virtual_number,
            latest: RwLock::new(HashMap::new()),
            feed,
        })
    }

    /// Record a status as the latest for its reporting device and push it
    /// onto the feed.
    pub async fn emit(&self, status: PlayerStatus) {
        self.latest
            .write()
            .await
            .insert(status.device_number, status.clone());
        let _ = self.feed.send(status);
    }

    /// Record a latest status without pushing it onto the feed.
    pub async fn record(&self, status: PlayerStatus) {
        self.latest
            .write()
            .await
            .insert(status.device_number, status);
    }
}

#[async_trait]
impl StatusSource for FakeStatusSource {
    async fn ensure_started(&self) -> Result<()> {
        Ok(())
    }

    fn virtual_device_number(&self) -> u8 {
        self.virtual_number
    }

    async fn latest_status_for(&self, device_number: u8) -> Option<PlayerStatus> {
        self.latest.read().await.get(&device_number).cloned()
    }

    fn subscribe(&self) -> broadcast::Receiver<PlayerStatus> {
        self.feed.subscribe()
    }
}

pub fn device(number: u8, address: IpAddr) -> DeviceRecord {
    DeviceRecord {
        number,
        name: format!("CDJ-{number}"),
        address,
    }
}

/// A status reporting a rekordbox track loaded from the player's own USB.
pub fn playing_status(device_number: u8, address: IpAddr, track_id: u32) -> PlayerStatus {
    PlayerStatus {
        device_number,
        address,
        track_source_player: device_number,
        track_source_slot: TrackSlot::Usb,
        track_type: TrackType::Rekordbox,
        track_id,
    }
}

/// A status reporting nothing loaded.
pub fn idle_status(device_number: u8, address: IpAddr) -> PlayerStatus {
    PlayerStatus {
        device_number,
        address,
        track_source_player: 0,
        track_source_slot: TrackSlot::NoTrack,
        track_type: TrackType::NoTrack,
        track_id: 0,
    }
}
