//! Retrieval of track metadata over a db-server session.
//!
//! [`MetadataFetcher`] ties the port cache, the collaborator roster and the
//! session client together: one call fetches one track's metadata (plus
//! artwork when the track has any), and a bulk variant enumerates every
//! track a media slot holds.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dbserver::{Client, PortCache, PortResolution};
use crate::error::{MetadataError, Result};
use crate::metadata::{Artwork, TrackMetadata};
use crate::protocol::{Field, KnownType, MenuIdentifier, NO_MENU_RESULTS_AVAILABLE};
use crate::sources::{DeviceRegistry, StatusSource};
use crate::status::{PlayerStatus, TrackSlot};

/// Fixed-shape payload asking how many tracks a media slot holds. The
/// posing device number goes at offset 23 and the slot code at offset 25.
const TRACK_COUNT_REQUEST: [u8; 32] = [
    0x10, 0x10, 0x04, 0x0f, 0x02, 0x14, 0x00, 0x00, //
    0x00, 0x0c, 0x06, 0x06, 0x00, 0x00, 0x00, 0x00, //
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x11, 0x00, //
    0x02, 0x00, 0x01, 0x11, 0x00, 0x00, 0x00, 0x00,
];
const TRACK_COUNT_POSING_OFFSET: usize = 23;
const TRACK_COUNT_SLOT_OFFSET: usize = 25;

/// Expected size of the track-count response; the count itself sits in the
/// last two bytes.
const TRACK_COUNT_RESPONSE_LEN: usize = 42;

pub struct MetadataFetcher {
    devices: Arc<dyn DeviceRegistry>,
    statuses: Arc<dyn StatusSource>,
    ports: Arc<PortCache>,
    config: Config,
}

impl MetadataFetcher {
    pub fn new(
        devices: Arc<dyn DeviceRegistry>,
        statuses: Arc<dyn StatusSource>,
        ports: Arc<PortCache>,
        config: Config,
    ) -> Self {
        Self {
            devices,
            statuses,
            ports,
            config,
        }
    }

    /// Fetch metadata for whatever track a status update says is loaded.
    /// Statuses describing no queryable track resolve to `None` without
    /// touching the network.
    pub async fn fetch_for_status(&self, status: &PlayerStatus) -> Result<Option<TrackMetadata>> {
        if !status.has_queryable_track() {
            return Ok(None);
        }
        self.fetch_one(
            status.track_source_player,
            status.track_source_slot,
            status.track_id,
        )
        .await
    }

    /// Fetch metadata for one track by id. Returns `None` when the device
    /// or its db-service port is unknown, or when the player has no track
    /// with that id.
    pub async fn fetch_one(
        &self,
        player: u8,
        slot: TrackSlot,
        track_id: u32,
    ) -> Result<Option<TrackMetadata>> {
        let Some((device, port)) = self.locate(player).await else {
            return Ok(None);
        };
        let posing_as = self.choose_posing_number(player, slot).await?;

        let mut client = Client::connect(
            device.address,
            port,
            player,
            posing_as,
            self.config.connect_timeout(),
            self.config.read_timeout(),
        )
        .await?;
        let result = fetch_with_client(&mut client, slot, track_id).await;
        client.close().await;
        result
    }

    /// Enumerate all tracks in a media slot, reusing one session for the
    /// whole walk. Track ids are not contiguous, so misses are tolerated up
    /// to the configured gap bound; exceeding it yields the partial result
    /// gathered so far.
    pub async fn fetch_all_in_slot(
        &self,
        player: u8,
        slot: TrackSlot,
    ) -> Result<BTreeMap<u32, TrackMetadata>> {
        let Some((device, port)) = self.locate(player).await else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("player {player} is unknown or exposes no db service"),
            )
            .into());
        };
        let posing_as = self.choose_posing_number(player, slot).await?;

        let mut client = Client::connect(
            device.address,
            port,
            player,
            posing_as,
            self.config.connect_timeout(),
            self.config.read_timeout(),
        )
        .await?;
        let result = self.scan_slot(&mut client, player, slot, posing_as).await;
        client.close().await;
        result
    }

    async fn scan_slot(
        &self,
        client: &mut Client,
        player: u8,
        slot: TrackSlot,
        posing_as: u8,
    ) -> Result<BTreeMap<u32, TrackMetadata>> {
        let mut payload = TRACK_COUNT_REQUEST;
        payload[TRACK_COUNT_POSING_OFFSET] = posing_as;
        payload[TRACK_COUNT_SLOT_OFFSET] = slot.protocol_value();
        let response = client
            .raw_request(&payload, TRACK_COUNT_RESPONSE_LEN, "track count message")
            .await?;
        if response.len() < TRACK_COUNT_RESPONSE_LEN {
            return Err(MetadataError::NoMedia { player });
        }
        let total_tracks = u16::from_be_bytes([response[40], response[41]]) as usize;
        info!(player, total_tracks, "enumerating tracks in slot");

        let mut result = BTreeMap::new();
        let mut gap = 0u32;
        let mut max_gap = 0u32;
        let mut current_id = 1u32;

        while result.len() < total_tracks {
            match fetch_with_client(client, slot, current_id).await? {
                Some(found) => {
                    gap = 0;
                    result.insert(current_id, found);
                }
                None => {
                    gap += 1;
                    if gap > self.config.max_id_gap {
                        warn!(
                            misses = gap,
                            loaded = result.len(),
                            total_tracks,
                            "repeated track-id misses, giving up the slot scan"
                        );
                        return Ok(result);
                    }
                    if gap > max_gap {
                        max_gap = gap;
                    }
                }
            }
            current_id += 1;
        }

        info!(player, total_tracks, max_gap, "finished enumerating slot");
        Ok(result)
    }

    /// Device address plus cached db-service port, if both are known.
    async fn locate(&self, player: u8) -> Option<(crate::status::DeviceRecord, u16)> {
        let device = self.devices.device_by_number(player).await?;
        match self.ports.get(player).await {
            Some(PortResolution::Resolved(port)) => Some((device, port)),
            _ => {
                debug!(player, "no resolved db-service port, skipping fetch");
                None
            }
        }
    }

    /// Pick a device number to pose as when querying `player`. Our own
    /// virtual number is always safe when it is a legal player number, and
    /// anything goes for the virtual collection slot. Otherwise borrow the
    /// number of another player that is not using the target's media; a
    /// query posing as such a player would be rejected.
    async fn choose_posing_number(&self, player: u8, slot: TrackSlot) -> Result<u8> {
        let own_number = self.statuses.virtual_device_number();
        if slot == TrackSlot::Collection || (1..=4).contains(&own_number) {
            return Ok(own_number);
        }

        for candidate in self.devices.current_devices().await {
            if candidate.number == player || !(1..=4).contains(&candidate.number) {
                continue;
            }
            if let Some(last) = self.statuses.latest_status_for(candidate.number).await {
                if last.track_source_player != player {
                    return Ok(candidate.number);
                }
            }
        }
        Err(MetadataError::NoPosingIdentity { player })
    }
}

/// One metadata lookup over an already-open session. Public so diagnostic
/// tools can drive a session directly, and split out so the bulk scan can
/// reuse its session across the whole id walk.
pub async fn fetch_with_client(
    client: &mut Client,
    slot: TrackSlot,
    track_id: u32,
) -> Result<Option<TrackMetadata>> {
    let response = client
        .menu_request(
            KnownType::MetadataRequest,
            MenuIdentifier::MainMenu,
            slot,
            vec![Field::U32(track_id)],
        )
        .await?;
    match response.menu_results_count() {
        None | Some(NO_MENU_RESULTS_AVAILABLE) => return Ok(None),
        Some(_) => {}
    }

    let items = client
        .render_menu_items(MenuIdentifier::MainMenu, slot, &response)
        .await?;
    let Some(metadata) = TrackMetadata::from_menu_items(&items) else {
        return Ok(None);
    };

    if metadata.artwork_id == 0 {
        return Ok(Some(metadata));
    }
    let artwork = request_artwork(client, slot, metadata.artwork_id).await?;
    Ok(Some(metadata.with_artwork(artwork)))
}

/// Position of the image blob within an album-art response.
const ALBUM_ART_BLOB_ARG: usize = 3;

async fn request_artwork(
    client: &mut Client,
    slot: TrackSlot,
    artwork_id: u32,
) -> Result<Option<Artwork>> {
    let rms1 = client.build_rms1(MenuIdentifier::Data, slot);
    let response = client
        .simple_request(
            KnownType::AlbumArtRequest,
            KnownType::AlbumArt,
            vec![rms1, Field::U32(artwork_id)],
        )
        .await?;
    let Some(blob) = response.binary_arg(ALBUM_ART_BLOB_ARG) else {
        return Err(MetadataError::protocol(
            "album-art response carried no image blob",
        ));
    };
    Ok(Artwork::from_bytes(blob.to_vec()))
}
