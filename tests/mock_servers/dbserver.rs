#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Mock player for testing
//!
//! Simulates both services a real player exposes: the well-known port-query
//! listener and the db-server session protocol, with a scriptable track
//! table.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use prolink_metadata::protocol::{
    Field, KnownType, Message, MessageType, MESSAGE_START, NO_MENU_RESULTS_AVAILABLE,
};

/// A pre-encoded valid 1x1 PNG, small enough to embed as artwork.
pub const TINY_PNG: [u8; 70] = [
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f,
    0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0xda, 0x63, 0x64,
    0x60, 0xf8, 0x5f, 0x0f, 0x00, 0x02, 0x87, 0x01, 0x80, 0xeb, 0x47, 0xba, 0x92, 0x00, 0x00,
    0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

/// One track the mock player can serve.
#[derive(Debug, Clone)]
pub struct MockTrack {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration_seconds: u32,
    pub artwork_id: u32,
    pub artwork: Option<Vec<u8>>,
}

impl MockTrack {
    pub fn simple(title: &str) -> Self {
        Self {
            title: title.into(),
            artist: "Test Artist".into(),
            album: "Test Album".into(),
            duration_seconds: 300,
            artwork_id: 0,
            artwork: None,
        }
    }

    pub fn with_art(title: &str, artwork_id: u32) -> Self {
        Self {
            artwork_id,
            artwork: Some(TINY_PNG.to_vec()),
            ..Self::simple(title)
        }
    }
}

/// Scriptable player state.
#[derive(Debug, Clone, Default)]
pub struct MockPlayerState {
    pub tracks: BTreeMap<u32, MockTrack>,
    /// Count reported by the track-count query; may disagree with the
    /// table to exercise gap handling.
    pub total_tracks: u16,
    /// When false the track-count query answers with a short response.
    pub has_media: bool,
    /// Artificial delay before answering a metadata request.
    pub response_delay: Duration,
    /// Artificial delay before answering a port query.
    pub query_delay: Duration,
}

/// Mock player: a port-query listener plus a db-server listener, both on
/// random ports.
pub struct MockPlayer {
    query_addr: SocketAddr,
    db_addr: SocketAddr,
    pub state: Arc<RwLock<MockPlayerState>>,
    query_handle: JoinHandle<()>,
    db_handle: JoinHandle<()>,
}

impl MockPlayer {
    pub async fn start(initial: MockPlayerState) -> Self {
        let state = Arc::new(RwLock::new(initial));

        let db_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let db_addr = db_listener.local_addr().unwrap();
        let db_state = state.clone();
        let db_handle = tokio::spawn(async move {
            loop {
                match db_listener.accept().await {
                    Ok((stream, _)) => {
                        let state = db_state.clone();
                        tokio::spawn(async move {
                            let _ = handle_session(stream, state).await;
                        });
                    }
                    Err(_) => break,
                }
            }
        });

        let query_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let query_addr = query_listener.local_addr().unwrap();
        let db_port = db_addr.port();
        let query_state = state.clone();
        let query_handle = tokio::spawn(async move {
            loop {
                match query_listener.accept().await {
                    Ok((stream, _)) => {
                        let state = query_state.clone();
                        tokio::spawn(async move {
                            let _ = handle_port_query(stream, db_port, state).await;
                        });
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            query_addr,
            db_addr,
            state,
            query_handle,
            db_handle,
        }
    }

    pub fn query_port(&self) -> u16 {
        self.query_addr.port()
    }

    pub fn db_port(&self) -> u16 {
        self.db_addr.port()
    }

    pub async fn set_delay(&self, delay: Duration) {
        self.state.write().await.response_delay = delay;
    }
}

impl Drop for MockPlayer {
    fn drop(&mut self) {
        self.query_handle.abort();
        self.db_handle.abort();
    }
}

async fn handle_port_query(
    mut stream: TcpStream,
    db_port: u16,
    state: Arc<RwLock<MockPlayerState>>,
) -> std::io::Result<()> {
    let mut request = [0u8; 19];
    stream.read_exact(&mut request).await?;
    assert_eq!(&request[4..18], b"RemoteDBServer");
    let delay = state.read().await.query_delay;
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    stream.write_all(&db_port.to_be_bytes()).await?;
    Ok(())
}

async fn handle_session(
    mut stream: TcpStream,
    state: Arc<RwLock<MockPlayerState>>,
) -> std::io::Result<()> {
    // Greeting exchange.
    let mut greeting = [0u8; 5];
    stream.read_exact(&mut greeting).await?;
    stream.write_all(&[0x11, 0x00, 0x00, 0x00, 0x01]).await?;

    // Track id of the last metadata request, so render requests know which
    // item sequence to produce.
    let mut pending_track: Option<u32> = None;

    loop {
        let mut start = [0u8; 6];
        if stream.read_exact(&mut start).await.is_err() {
            return Ok(()); // client closed
        }
        assert_eq!(start, MESSAGE_START, "client sent bytes off frame boundary");
        let transaction = stream.read_u32().await?;

        let tag = stream.read_u8().await?;
        assert_eq!(tag, 0x10, "expected a u16 type field");
        let message_type = stream.read_u16().await?;

        match message_type {
            // Track-count query: a fixed 32-byte payload, of which we have
            // consumed the first three bytes.
            0x1004 => {
                let mut rest = [0u8; 29];
                stream.read_exact(&mut rest).await?;
                let slot_code = rest[25 - 3];
                let snapshot = state.read().await.clone();
                if !snapshot.has_media || slot_code == 0 {
                    stream.write_all(&[0u8; 10]).await?;
                    continue;
                }
                let mut response = [0u8; 42];
                response[..6].copy_from_slice(&MESSAGE_START);
                response[6..10].copy_from_slice(&transaction.to_be_bytes());
                response[40..42].copy_from_slice(&snapshot.total_tracks.to_be_bytes());
                stream.write_all(&response).await?;
            }
            other => {
                let arguments = read_arguments(&mut stream).await?;
                let known = KnownType::from_value(other)
                    .unwrap_or_else(|| panic!("mock received unknown request type {other:#06x}"));
                respond(
                    &mut stream,
                    &state,
                    known,
                    transaction,
                    arguments,
                    &mut pending_track,
                )
                .await?;
            }
        }
    }
}

async fn read_arguments(stream: &mut TcpStream) -> std::io::Result<Vec<Field>> {
    let count = match Field::read(stream).await {
        Ok(Field::U8(n)) => n as usize,
        other => panic!("expected argument count, got {other:?}"),
    };
    let mut arguments = Vec::with_capacity(count);
    for _ in 0..count {
        arguments.push(Field::read(stream).await.expect("argument field"));
    }
    Ok(arguments)
}

async fn respond(
    stream: &mut TcpStream,
    state: &Arc<RwLock<MockPlayerState>>,
    request: KnownType,
    transaction: u32,
    arguments: Vec<Field>,
    pending_track: &mut Option<u32>,
) -> std::io::Result<()> {
    match request {
        KnownType::Setup => {
            send(
                stream,
                Message::new(
                    transaction,
                    KnownType::MenuAvailable,
                    vec![Field::U32(0), Field::U32(0)],
                ),
            )
            .await
        }
        KnownType::MetadataRequest => {
            let track_id = arguments[1].number().expect("track id argument");
            let snapshot = state.read().await.clone();
            if !snapshot.response_delay.is_zero() {
                tokio::time::sleep(snapshot.response_delay).await;
            }
            let count = match snapshot.tracks.get(&track_id) {
                Some(track) => {
                    *pending_track = Some(track_id);
                    menu_items_for(track).len() as u32
                }
                None => NO_MENU_RESULTS_AVAILABLE,
            };
            send(
                stream,
                Message::new(
                    transaction,
                    KnownType::MenuAvailable,
                    vec![Field::U32(0), Field::U32(count)],
                ),
            )
            .await
        }
        KnownType::RenderMenuRequest => {
            let offset = arguments[1].number().unwrap() as usize;
            let limit = arguments[2].number().unwrap() as usize;
            let track_id = pending_track.expect("render before metadata request");
            let snapshot = state.read().await.clone();
            let items = menu_items_for(&snapshot.tracks[&track_id]);

            send(
                stream,
                Message::new(transaction, KnownType::MenuHeader, vec![Field::U32(0)]),
            )
            .await?;
            let end = (offset + limit).min(items.len());
            for item in &items[offset..end] {
                let mut message = item.clone();
                message.transaction = transaction;
                send(stream, message).await?;
            }
            if end >= items.len() {
                send(
                    stream,
                    Message::new(transaction, KnownType::MenuFooter, vec![Field::U32(0)]),
                )
                .await?;
            }
            Ok(())
        }
        KnownType::AlbumArtRequest => {
            let artwork_id = arguments[1].number().unwrap();
            let snapshot = state.read().await.clone();
            let blob = snapshot
                .tracks
                .values()
                .find(|t| t.artwork_id == artwork_id)
                .and_then(|t| t.artwork.clone())
                .unwrap_or_default();
            send(
                stream,
                Message::new(
                    transaction,
                    KnownType::AlbumArt,
                    vec![
                        Field::U32(0),
                        Field::U32(0),
                        Field::U32(0),
                        Field::Binary(blob),
                    ],
                ),
            )
            .await
        }
        other => panic!("mock received unexpected request {other:?}"),
    }
}

async fn send(stream: &mut TcpStream, message: Message) -> std::io::Result<()> {
    assert!(matches!(message.message_type, MessageType::Known(_)));
    stream.write_all(&message.encode()).await
}

/// Lay a track's fields out as the players do in a metadata menu: item type
/// at argument 6, label at 3, numeric value at 1, artwork id at 8.
fn menu_items_for(track: &MockTrack) -> Vec<Message> {
    fn item(kind: u32, value: u32, label: &str, artwork_id: u32) -> Message {
        Message::new(
            0,
            KnownType::MenuItem,
            vec![
                Field::U32(0),
                Field::U32(value),
                Field::U32(0),
                Field::String(label.into()),
                Field::U32(0),
                Field::String(String::new()),
                Field::U32(kind),
                Field::U32(0),
                Field::U32(artwork_id),
            ],
        )
    }
    vec![
        item(0x04, 0, &track.title, track.artwork_id),
        item(0x07, 0, &track.artist, 0),
        item(0x02, 0, &track.album, 0),
        item(0x0b, track.duration_seconds, "", 0),
    ]
}
