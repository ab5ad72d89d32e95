//! One TCP session with a player's database-query service.
//!
//! A [`Client`] is bound to a single socket for its whole life: connect,
//! greet, issue request/response exchanges, close. There is no reconnect
//! logic; any socket failure tears the session down and surfaces to the
//! caller.

use std::net::IpAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{MetadataError, Result};
use crate::protocol::{
    requesting_party, Field, KnownType, MenuIdentifier, Message, MENU_PAGE_SIZE,
    MESSAGE_START, NO_MENU_RESULTS_AVAILABLE,
};
use crate::status::TrackSlot;

/// Greeting both ends exchange when a session opens: a 4-byte number field
/// holding the value 1.
const GREETING: [u8; 5] = [0x11, 0x00, 0x00, 0x00, 0x01];

/// Largest raw response we will accept in a single read.
const RAW_RESPONSE_LIMIT: usize = 8192;

pub struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    target_player: u8,
    posing_as: u8,
    next_transaction: u32,
    read_timeout: Duration,
}

impl Client {
    /// Open a session to the db service of `target_player` at
    /// `address:port`, posing as device `posing_as`, and perform the
    /// greeting and setup handshake.
    pub async fn connect(
        address: IpAddr,
        port: u16,
        target_player: u8,
        posing_as: u8,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Client> {
        let addr = format!("{address}:{port}");
        let stream = timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| MetadataError::Timeout {
                operation: "connect",
                timeout: connect_timeout,
            })?
            .map_err(|source| MetadataError::Connect {
                addr: addr.clone(),
                source,
            })?;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let mut client = Client {
            reader: BufReader::new(read_half),
            writer: write_half,
            target_player,
            posing_as,
            next_transaction: 1,
            read_timeout,
        };

        client.handshake().await?;
        debug!(
            player = target_player,
            posing_as,
            %addr,
            "db-server session established"
        );
        Ok(client)
    }

    /// Greeting exchange followed by the setup request that tells the
    /// player which device number our queries will pose as.
    async fn handshake(&mut self) -> Result<()> {
        self.writer.write_all(&GREETING).await?;
        let mut reply = [0u8; 5];
        timeout(self.read_timeout, self.reader.read_exact(&mut reply))
            .await
            .map_err(|_| MetadataError::Timeout {
                operation: "greeting",
                timeout: self.read_timeout,
            })??;
        if reply[0] != GREETING[0] {
            return Err(MetadataError::protocol(format!(
                "unexpected greeting reply {reply:02x?}"
            )));
        }

        let setup = Message::new(
            self.take_transaction(),
            KnownType::Setup,
            vec![Field::U32(self.posing_as as u32)],
        );
        self.writer.write_all(&setup.encode()).await?;
        let response = self.read_message().await?;
        debug!(response_type = ?response.message_type, "setup acknowledged");
        Ok(())
    }

    fn take_transaction(&mut self) -> u32 {
        let id = self.next_transaction;
        self.next_transaction = self.next_transaction.wrapping_add(1);
        id
    }

    async fn read_message(&mut self) -> Result<Message> {
        timeout(self.read_timeout, Message::read(&mut self.reader))
            .await
            .map_err(|_| MetadataError::Timeout {
                operation: "read response",
                timeout: self.read_timeout,
            })?
    }

    /// Send one request and read exactly one response, which must carry the
    /// expected type tag.
    pub async fn simple_request(
        &mut self,
        request_type: KnownType,
        expected_response: KnownType,
        arguments: Vec<Field>,
    ) -> Result<Message> {
        let request = Message::new(self.take_transaction(), request_type, arguments);
        self.writer.write_all(&request.encode()).await?;
        let response = self.read_message().await?;
        if !response.message_type.is(expected_response) {
            return Err(MetadataError::protocol(format!(
                "expected {expected_response:?} response to {request_type:?}, got {:?}",
                response.message_type
            )));
        }
        Ok(response)
    }

    /// Send a menu-shaped request; the response's results count tells the
    /// caller whether (and how much) there is to render.
    pub async fn menu_request(
        &mut self,
        request_type: KnownType,
        menu: MenuIdentifier,
        slot: TrackSlot,
        extra_arguments: Vec<Field>,
    ) -> Result<Message> {
        let mut arguments = vec![self.build_rms1(menu, slot)];
        arguments.extend(extra_arguments);
        self.simple_request(request_type, KnownType::MenuAvailable, arguments)
            .await
    }

    /// The sub-header every menu-shaped request starts with.
    pub fn build_rms1(&self, menu: MenuIdentifier, slot: TrackSlot) -> Field {
        requesting_party(self.posing_as, menu, slot)
    }

    /// Render the full result set announced by `count_response`, paging
    /// through render requests until the declared count is reached or a
    /// footer message arrives, whichever comes first.
    pub async fn render_menu_items(
        &mut self,
        menu: MenuIdentifier,
        slot: TrackSlot,
        count_response: &Message,
    ) -> Result<Vec<Message>> {
        let count = match count_response.menu_results_count() {
            None | Some(NO_MENU_RESULTS_AVAILABLE) | Some(0) => return Ok(Vec::new()),
            Some(count) => count,
        };

        let mut items: Vec<Message> = Vec::with_capacity(count as usize);
        'pages: while (items.len() as u32) < count {
            let offset = items.len() as u32;
            let limit = MENU_PAGE_SIZE.min(count - offset);
            // The final page is terminated by a footer message, which must
            // be consumed to keep the stream on a frame boundary.
            let final_page = offset + limit >= count;
            let request = Message::new(
                self.take_transaction(),
                KnownType::RenderMenuRequest,
                vec![
                    self.build_rms1(menu, slot),
                    Field::U32(offset),
                    Field::U32(limit),
                    Field::U32(0),
                    Field::U32(count),
                    Field::U32(0),
                ],
            );
            self.writer.write_all(&request.encode()).await?;

            let mut received_this_page = 0u32;
            loop {
                let message = self.read_message().await?;
                match message.message_type {
                    t if t.is(KnownType::MenuHeader) => continue,
                    t if t.is(KnownType::MenuFooter) => break 'pages,
                    t if t.is(KnownType::MenuItem) => {
                        items.push(message);
                        received_this_page += 1;
                        // Non-final pages end after exactly `limit` items.
                        // The final page keeps reading until its footer.
                        if received_this_page >= limit && !final_page {
                            break;
                        }
                    }
                    other => {
                        debug!(message_type = ?other, "skipping unexpected message in menu render");
                    }
                }
            }
        }

        if (items.len() as u32) != count {
            debug!(
                declared = count,
                received = items.len(),
                player = self.target_player,
                "menu render finished short of the declared count"
            );
        }
        Ok(items)
    }

    /// Write a pre-built payload inside a normal frame and read one raw
    /// response, warning if its size differs from what the protocol
    /// documents. Used for the handful of fixed-shape exchanges that do not
    /// follow the typed-field layout.
    pub async fn raw_request(
        &mut self,
        payload: &[u8],
        expected_len: usize,
        description: &str,
    ) -> Result<Vec<u8>> {
        let mut frame = Vec::with_capacity(MESSAGE_START.len() + 4 + payload.len());
        frame.extend_from_slice(&MESSAGE_START);
        frame.extend_from_slice(&self.take_transaction().to_be_bytes());
        frame.extend_from_slice(payload);
        self.writer.write_all(&frame).await?;

        let mut buffer = vec![0u8; RAW_RESPONSE_LIMIT];
        let len = timeout(self.read_timeout, self.reader.read(&mut buffer))
            .await
            .map_err(|_| MetadataError::Timeout {
                operation: "read raw response",
                timeout: self.read_timeout,
            })??;
        if len == 0 {
            return Err(MetadataError::protocol(format!(
                "connection closed while reading {description} response"
            )));
        }
        if len != expected_len {
            warn!(
                expected = expected_len,
                received = len,
                "unexpected size reading {description} response"
            );
        }
        buffer.truncate(len);
        Ok(buffer)
    }

    /// Tear the session down. Close failures are logged and swallowed so
    /// they never mask a primary error on the calling path.
    pub async fn close(mut self) {
        if let Err(e) = self.writer.shutdown().await {
            warn!(
                player = self.target_player,
                error = %e,
                "problem closing db-server session"
            );
        }
    }
}
