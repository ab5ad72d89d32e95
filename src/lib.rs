//! Track metadata acquisition for Pro DJ Link players.
//!
//! Professional DJ players announce themselves on a dedicated LAN and serve
//! track metadata over a private binary database-query service. This
//! library provides:
//! - The framed wire codec for that service (typed fields, menu responses)
//! - A session client speaking the request/response protocol
//! - Resolution and caching of each player's dynamic service port
//! - Single-track and whole-slot metadata retrieval, artwork included
//! - An always-on tracking engine that watches live status updates and
//!   keeps a concurrently readable cache of what is loaded where

pub mod bus;
pub mod config;
pub mod dbserver;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod metadata;
pub mod protocol;
pub mod sources;
pub mod status;

pub use engine::MetadataTracker;
pub use error::MetadataError;
pub use metadata::{Artwork, TrackMetadata};
pub use status::{DeviceRecord, PlayerStatus, TrackSlot, TrackType};
