//! Framed db-server messages.
//!
//! Every frame starts with a fixed six-byte sentinel, followed by a
//! big-endian transaction id, a two-byte message type, an argument count,
//! and the arguments themselves as tagged fields.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{MetadataError, Result};
use crate::protocol::field::Field;
use crate::status::TrackSlot;

/// Sentinel delimiting messages in the TCP stream.
pub const MESSAGE_START: [u8; 6] = [0x11, 0x87, 0x23, 0x49, 0xae, 0x11];

/// Results-count value a menu response uses to say "nothing found".
pub const NO_MENU_RESULTS_AVAILABLE: u32 = 0xffff_ffff;

/// Number of menu items requested per render-menu exchange.
pub const MENU_PAGE_SIZE: u32 = 64;

/// Message types this library knows how to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownType {
    /// First request of a session, identifying the device we pose as.
    Setup,
    Invalid,
    RootMenuRequest,
    MetadataRequest,
    AlbumArtRequest,
    RenderMenuRequest,
    /// Menu response header carrying the results count.
    MenuAvailable,
    MenuHeader,
    AlbumArt,
    Unavailable,
    MenuItem,
    MenuFooter,
}

impl KnownType {
    pub fn value(self) -> u16 {
        match self {
            KnownType::Setup => 0x0000,
            KnownType::Invalid => 0x0001,
            KnownType::RootMenuRequest => 0x1000,
            KnownType::MetadataRequest => 0x2002,
            KnownType::AlbumArtRequest => 0x2003,
            KnownType::RenderMenuRequest => 0x3000,
            KnownType::MenuAvailable => 0x4000,
            KnownType::MenuHeader => 0x4001,
            KnownType::AlbumArt => 0x4002,
            KnownType::Unavailable => 0x4003,
            KnownType::MenuItem => 0x4101,
            KnownType::MenuFooter => 0x4201,
        }
    }

    pub fn from_value(value: u16) -> Option<Self> {
        match value {
            0x0000 => Some(KnownType::Setup),
            0x0001 => Some(KnownType::Invalid),
            0x1000 => Some(KnownType::RootMenuRequest),
            0x2002 => Some(KnownType::MetadataRequest),
            0x2003 => Some(KnownType::AlbumArtRequest),
            0x3000 => Some(KnownType::RenderMenuRequest),
            0x4000 => Some(KnownType::MenuAvailable),
            0x4001 => Some(KnownType::MenuHeader),
            0x4002 => Some(KnownType::AlbumArt),
            0x4003 => Some(KnownType::Unavailable),
            0x4101 => Some(KnownType::MenuItem),
            0x4201 => Some(KnownType::MenuFooter),
            _ => None,
        }
    }
}

/// Type tag of a decoded message; unrecognized values are preserved so the
/// caller can still inspect and log them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Known(KnownType),
    Unknown(u16),
}

impl MessageType {
    pub fn value(self) -> u16 {
        match self {
            MessageType::Known(k) => k.value(),
            MessageType::Unknown(v) => v,
        }
    }

    pub fn is(self, expected: KnownType) -> bool {
        self == MessageType::Known(expected)
    }
}

/// Logical menu a menu-shaped request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuIdentifier {
    MainMenu,
    SubMenu,
    TrackInfo,
    /// Non-menu data requests such as album art.
    Data,
}

impl MenuIdentifier {
    pub fn protocol_value(self) -> u8 {
        match self {
            MenuIdentifier::MainMenu => 1,
            MenuIdentifier::SubMenu => 2,
            MenuIdentifier::TrackInfo => 3,
            MenuIdentifier::Data => 8,
        }
    }
}

/// One decoded protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub transaction: u32,
    pub message_type: MessageType,
    pub arguments: Vec<Field>,
}

impl Message {
    pub fn new(transaction: u32, message_type: KnownType, arguments: Vec<Field>) -> Self {
        Self {
            transaction,
            message_type: MessageType::Known(message_type),
            arguments,
        }
    }

    /// Serialize this message into one wire frame.
    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(
            self.arguments.len() <= u8::MAX as usize,
            "argument count {} does not fit the one-byte count field",
            self.arguments.len()
        );
        let mut out = Vec::with_capacity(32);
        out.extend_from_slice(&MESSAGE_START);
        out.extend_from_slice(&self.transaction.to_be_bytes());
        Field::U16(self.message_type.value()).encode(&mut out);
        Field::U8(self.arguments.len() as u8).encode(&mut out);
        for argument in &self.arguments {
            argument.encode(&mut out);
        }
        out
    }

    /// Read one frame from the stream.
    pub async fn read<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Message> {
        let mut start = [0u8; 6];
        stream.read_exact(&mut start).await?;
        if start != MESSAGE_START {
            return Err(MetadataError::protocol(format!(
                "expected message sentinel, got {start:02x?}"
            )));
        }
        let transaction = stream.read_u32().await?;

        let type_value = match Field::read(stream).await? {
            Field::U16(v) => v,
            other => {
                return Err(MetadataError::protocol(format!(
                    "expected message type field, got {other:?}"
                )))
            }
        };
        let message_type = match KnownType::from_value(type_value) {
            Some(known) => MessageType::Known(known),
            None => MessageType::Unknown(type_value),
        };

        let argument_count = match Field::read(stream).await? {
            Field::U8(n) => n as usize,
            other => {
                return Err(MetadataError::protocol(format!(
                    "expected argument count field, got {other:?}"
                )))
            }
        };

        let mut arguments = Vec::with_capacity(argument_count);
        for _ in 0..argument_count {
            arguments.push(Field::read(stream).await?);
        }

        tracing::trace!(
            transaction,
            message_type = format!("{message_type:?}"),
            arguments = arguments.len(),
            "decoded message"
        );
        Ok(Message {
            transaction,
            message_type,
            arguments,
        })
    }

    pub fn number_arg(&self, index: usize) -> Option<u32> {
        self.arguments.get(index).and_then(Field::number)
    }

    pub fn string_arg(&self, index: usize) -> Option<&str> {
        self.arguments.get(index).and_then(Field::as_str)
    }

    pub fn binary_arg(&self, index: usize) -> Option<&[u8]> {
        self.arguments.get(index).and_then(Field::as_binary)
    }

    /// Results count of a MenuAvailable response (argument 1).
    pub fn menu_results_count(&self) -> Option<u32> {
        self.number_arg(1)
    }
}

/// The sub-header identifying who is asking, which menu, which slot and
/// which track type a menu-shaped request targets.
pub fn requesting_party(posing_as: u8, menu: MenuIdentifier, slot: TrackSlot) -> Field {
    const TRACK_TYPE_REKORDBOX: u8 = 1;
    Field::U32(
        (posing_as as u32) << 24
            | (menu.protocol_value() as u32) << 16
            | (slot.protocol_value() as u32) << 8
            | TRACK_TYPE_REKORDBOX as u32,
    )
}
