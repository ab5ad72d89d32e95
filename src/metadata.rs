//! Track metadata assembled from a rendered menu response.
//!
//! A metadata menu renders as a sequence of item messages, one per field of
//! the track. [`TrackMetadata`] is built once from that sequence and never
//! mutated afterwards; cache updates replace the whole value.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::protocol::Message;

/// Positions of the interesting arguments within a menu item message.
const ARG_NUMERIC_VALUE: usize = 1;
const ARG_PRIMARY_LABEL: usize = 3;
const ARG_ITEM_TYPE: usize = 6;
const ARG_ARTWORK_ID: usize = 8;

/// What a single menu item describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemKind {
    Album,
    Title,
    Genre,
    Artist,
    Rating,
    Duration,
    Tempo,
    Label,
    Key,
    /// Colors occupy a contiguous range of item types; the offset within
    /// the range is the color id.
    Color(u8),
    Comment,
    OriginalArtist,
    Remixer,
    DateAdded,
}

impl ItemKind {
    fn from_value(value: u32) -> Option<Self> {
        match value {
            0x02 => Some(ItemKind::Album),
            0x04 => Some(ItemKind::Title),
            0x06 => Some(ItemKind::Genre),
            0x07 => Some(ItemKind::Artist),
            0x0a => Some(ItemKind::Rating),
            0x0b => Some(ItemKind::Duration),
            0x0d => Some(ItemKind::Tempo),
            0x0e => Some(ItemKind::Label),
            0x0f => Some(ItemKind::Key),
            0x13..=0x1a => Some(ItemKind::Color((value - 0x13) as u8)),
            0x23 => Some(ItemKind::Comment),
            0x28 => Some(ItemKind::OriginalArtist),
            0x29 => Some(ItemKind::Remixer),
            0x2e => Some(ItemKind::DateAdded),
            _ => None,
        }
    }
}

/// Album art attached to a track, kept as the raw encoded bytes plus the
/// dimensions probed while validating them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artwork {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Artwork {
    /// Validate and measure an image blob returned by an album-art request.
    /// Returns `None` (with a warning) when the bytes do not decode; a bad
    /// image never fails the metadata fetch that triggered it.
    pub fn from_bytes(data: Vec<u8>) -> Option<Artwork> {
        match image::load_from_memory(&data) {
            Ok(decoded) => Some(Artwork {
                width: decoded.width(),
                height: decoded.height(),
                data,
            }),
            Err(e) => {
                warn!(error = %e, bytes = data.len(), "artwork blob did not decode as an image");
                None
            }
        }
    }
}

/// Immutable metadata for one track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub comment: Option<String>,
    pub key: Option<String>,
    pub label: Option<String>,
    pub original_artist: Option<String>,
    pub remixer: Option<String>,
    pub date_added: Option<String>,
    pub duration_seconds: u32,
    /// Tempo in hundredths of a BPM, as reported on the wire.
    pub tempo: u32,
    pub rating: u32,
    pub color_id: u8,
    pub artwork_id: u32,
    pub artwork: Option<Artwork>,
}

impl TrackMetadata {
    /// Build metadata from the item messages of a rendered metadata menu.
    /// Returns `None` when the sequence contains no title item, which is
    /// how the players answer a query for a track id that does not exist.
    pub fn from_menu_items(items: &[Message]) -> Option<TrackMetadata> {
        let mut result = TrackMetadata {
            title: String::new(),
            artist: None,
            album: None,
            genre: None,
            comment: None,
            key: None,
            label: None,
            original_artist: None,
            remixer: None,
            date_added: None,
            duration_seconds: 0,
            tempo: 0,
            rating: 0,
            color_id: 0,
            artwork_id: 0,
            artwork: None,
        };
        let mut saw_title = false;

        for item in items {
            let Some(kind) = item.number_arg(ARG_ITEM_TYPE).and_then(ItemKind::from_value)
            else {
                continue;
            };
            let label = || item.string_arg(ARG_PRIMARY_LABEL).map(str::to_owned);
            let value = item.number_arg(ARG_NUMERIC_VALUE).unwrap_or(0);
            match kind {
                ItemKind::Title => {
                    result.title = label().unwrap_or_default();
                    result.artwork_id = item.number_arg(ARG_ARTWORK_ID).unwrap_or(0);
                    saw_title = true;
                }
                ItemKind::Artist => result.artist = label(),
                ItemKind::Album => result.album = label(),
                ItemKind::Genre => result.genre = label(),
                ItemKind::Comment => result.comment = label(),
                ItemKind::Key => result.key = label(),
                ItemKind::Label => result.label = label(),
                ItemKind::OriginalArtist => result.original_artist = label(),
                ItemKind::Remixer => result.remixer = label(),
                ItemKind::DateAdded => result.date_added = label(),
                ItemKind::Duration => result.duration_seconds = value,
                ItemKind::Tempo => result.tempo = value,
                ItemKind::Rating => result.rating = value,
                ItemKind::Color(id) => result.color_id = id,
            }
        }

        saw_title.then_some(result)
    }

    /// Copy of this metadata with artwork attached.
    pub fn with_artwork(self, artwork: Option<Artwork>) -> TrackMetadata {
        TrackMetadata { artwork, ..self }
    }
}
