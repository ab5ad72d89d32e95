//! Boundary to the external discovery and status collaborators.
//!
//! The engine never listens to the network for announcements or status
//! packets itself; it consumes typed events pushed onto broadcast channels
//! by whatever maintains the device roster and the status feed. Tests plug
//! in fakes; a real deployment wires these to the device-discovery and
//! virtual-player components.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::status::{DeviceRecord, PlayerStatus};

/// Roster change announced by the discovery collaborator.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    Found(DeviceRecord),
    Lost(DeviceRecord),
}

/// The roster of devices currently visible on the network.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Start the underlying discovery listener if it is not already
    /// running. Idempotent.
    async fn ensure_started(&self) -> Result<()>;

    async fn current_devices(&self) -> Vec<DeviceRecord>;

    async fn device_by_number(&self, number: u8) -> Option<DeviceRecord>;

    /// Subscribe to roster changes. Events arriving before subscription
    /// are not replayed; pair this with [`Self::current_devices`].
    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent>;
}

/// The component broadcasting live player status, including our own
/// presence on the network as a virtual device.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Start the underlying status listener if it is not already running.
    /// Idempotent.
    async fn ensure_started(&self) -> Result<()>;

    /// Device number our virtual presence announces itself with.
    fn virtual_device_number(&self) -> u8;

    /// Most recent status seen from the given device, if any.
    async fn latest_status_for(&self, device_number: u8) -> Option<PlayerStatus>;

    /// Subscribe to the live status feed.
    fn subscribe(&self) -> broadcast::Receiver<PlayerStatus>;
}
