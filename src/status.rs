//! Status snapshots broadcast by players, and the enums describing where a
//! loaded track came from.
//!
//! A [`PlayerStatus`] is an immutable record of one status packet. The
//! tracking engine keeps only the most recent snapshot per source address
//! and uses it purely as a comparison key to detect track changes.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Media bay a track was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackSlot {
    /// Nothing is loaded.
    NoTrack,
    Cd,
    SdCard,
    Usb,
    /// The virtual rekordbox collection slot (not physical media).
    Collection,
    /// A slot code this library does not recognize.
    Unknown,
}

impl TrackSlot {
    /// Wire code carried in status packets and db-server requests.
    pub fn protocol_value(self) -> u8 {
        match self {
            TrackSlot::NoTrack => 0,
            TrackSlot::Cd => 1,
            TrackSlot::SdCard => 2,
            TrackSlot::Usb => 3,
            TrackSlot::Collection => 4,
            TrackSlot::Unknown => 0,
        }
    }

    pub fn from_protocol_value(value: u8) -> Self {
        match value {
            0 => TrackSlot::NoTrack,
            1 => TrackSlot::Cd,
            2 => TrackSlot::SdCard,
            3 => TrackSlot::Usb,
            4 => TrackSlot::Collection,
            _ => TrackSlot::Unknown,
        }
    }
}

/// Kind of track a player reports having loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackType {
    NoTrack,
    /// An analyzed track from a rekordbox database; the only kind the
    /// db-server can serve metadata for.
    Rekordbox,
    Unanalyzed,
    CdAudio,
    Unknown,
}

impl TrackType {
    pub fn from_protocol_value(value: u8) -> Self {
        match value {
            0 => TrackType::NoTrack,
            1 => TrackType::Rekordbox,
            2 => TrackType::Unanalyzed,
            5 => TrackType::CdAudio,
            _ => TrackType::Unknown,
        }
    }
}

/// One status broadcast observed from a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStatus {
    /// Device number of the player that sent the status.
    pub device_number: u8,
    /// Address the status packet came from.
    pub address: IpAddr,
    /// Player whose media the loaded track came from (may differ from
    /// `device_number` when playing over Link).
    pub track_source_player: u8,
    /// Slot the track was loaded from.
    pub track_source_slot: TrackSlot,
    pub track_type: TrackType,
    /// Rekordbox id of the loaded track; 0 means none.
    pub track_id: u32,
}

impl PlayerStatus {
    /// Whether this status describes a track the db-server can be asked
    /// about at all.
    pub fn has_queryable_track(&self) -> bool {
        self.track_type == TrackType::Rekordbox
            && self.track_source_slot != TrackSlot::NoTrack
            && self.track_source_slot != TrackSlot::Unknown
            && self.track_id != 0
    }

    /// Whether `other` refers to the same loaded track as this status.
    pub fn same_track(&self, other: &PlayerStatus) -> bool {
        self.track_source_slot == other.track_source_slot
            && self.track_source_player == other.track_source_player
            && self.track_id == other.track_id
    }
}

/// Address and identity of a device seen on the network, as reported by the
/// discovery collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub number: u8,
    pub name: String,
    pub address: IpAddr,
}
