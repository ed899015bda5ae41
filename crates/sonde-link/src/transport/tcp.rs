//! TCP client transport with a persistent reassembly buffer, since frame
//! boundaries do not survive the stream.

use std::sync::atomic::{AtomicU8, Ordering};

use mavlink::common;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::trace;

use super::wire::{decode_frame, serialize_message, FrameParser, Inbound};
use super::{Transport, TransportError, TransportSettings};

const READ_CHUNK_LEN: usize = 4096;

pub struct TcpTransport {
    reader: Mutex<ReadState>,
    writer: Mutex<OwnedWriteHalf>,
    sequence: AtomicU8,
    settings: TransportSettings,
}

struct ReadState {
    half: OwnedReadHalf,
    parser: FrameParser,
}

impl TcpTransport {
    pub async fn connect(
        host: &str,
        port: u16,
        settings: TransportSettings,
    ) -> Result<Self, TransportError> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: Mutex::new(ReadState {
                half: read_half,
                parser: FrameParser::new(),
            }),
            writer: Mutex::new(write_half),
            sequence: AtomicU8::new(0),
            settings,
        })
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn recv(&self) -> Result<Inbound, TransportError> {
        let mut state = self.reader.lock().await;
        loop {
            while let Some(raw) = state.parser.next_frame() {
                match decode_frame(&raw, self.settings.cass_extra_crc) {
                    Some(inbound) => return Ok(inbound),
                    None => trace!(message_id = raw.message_id, "dropped undecodable frame"),
                }
            }
            let mut chunk = [0u8; READ_CHUNK_LEN];
            let n = state.half.read(&mut chunk).await?;
            if n == 0 {
                return Err(TransportError::Closed);
            }
            state.parser.extend(&chunk[..n]);
        }
    }

    async fn send(&self, message: &common::MavMessage) -> Result<(), TransportError> {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let bytes = serialize_message(
            seq,
            self.settings.system_id,
            self.settings.component_id,
            message,
        );
        let mut writer = self.writer.lock().await;
        writer.write_all(&bytes).await?;
        Ok(())
    }
}
