//! UDP transports: passive listen (vehicle or router pushes to us) and
//! active send-to.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Mutex as StdMutex;

use mavlink::common;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::trace;

use super::wire::{decode_frame, serialize_message, FrameParser, Inbound};
use super::{Transport, TransportError, TransportSettings};

const RECV_BUF_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Peer learned from the first inbound datagram; sends before that
    /// are dropped.
    Listen,
    /// Fixed peer configured up front.
    Connected,
}

pub struct UdpTransport {
    socket: UdpSocket,
    mode: Mode,
    peer: StdMutex<Option<SocketAddr>>,
    pending: Mutex<VecDeque<Inbound>>,
    sequence: AtomicU8,
    settings: TransportSettings,
}

impl UdpTransport {
    pub async fn listen(
        bind: &str,
        port: u16,
        settings: TransportSettings,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind((bind, port)).await?;
        trace!(local = %socket.local_addr()?, "UDP listen socket bound");
        Ok(Self {
            socket,
            mode: Mode::Listen,
            peer: StdMutex::new(None),
            pending: Mutex::new(VecDeque::new()),
            sequence: AtomicU8::new(0),
            settings,
        })
    }

    pub async fn send_to(
        host: &str,
        port: u16,
        settings: TransportSettings,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        socket.connect((host, port)).await?;
        let peer = socket.peer_addr()?;
        Ok(Self {
            socket,
            mode: Mode::Connected,
            peer: StdMutex::new(Some(peer)),
            pending: Mutex::new(VecDeque::new()),
            sequence: AtomicU8::new(0),
            settings,
        })
    }

    fn decode_datagram(&self, bytes: &[u8], queue: &mut VecDeque<Inbound>) {
        // Datagrams carry whole frames, possibly several per packet.
        let mut parser = FrameParser::new();
        parser.extend(bytes);
        while let Some(raw) = parser.next_frame() {
            match decode_frame(&raw, self.settings.cass_extra_crc) {
                Some(inbound) => queue.push_back(inbound),
                None => trace!(message_id = raw.message_id, "dropped undecodable frame"),
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    async fn recv(&self) -> Result<Inbound, TransportError> {
        let mut pending = self.pending.lock().await;
        loop {
            if let Some(inbound) = pending.pop_front() {
                return Ok(inbound);
            }
            let mut buf = vec![0u8; RECV_BUF_LEN];
            let (n, from) = self.socket.recv_from(&mut buf).await?;
            if self.mode == Mode::Listen {
                *self.peer.lock().expect("peer lock poisoned") = Some(from);
            }
            self.decode_datagram(&buf[..n], &mut pending);
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
        match self.mode {
            Mode::Connected => {
                self.socket.send(&bytes).await?;
            }
            Mode::Listen => {
                let peer = *self.peer.lock().expect("peer lock poisoned");
                let Some(peer) = peer else {
                    // Nowhere to send before the first inbound packet;
                    // heartbeats resume once a peer is known.
                    trace!("no UDP peer yet, dropping outbound message");
                    return Ok(());
                };
                self.socket.send_to(&bytes, peer).await?;
            }
        }
        Ok(())
    }
}
