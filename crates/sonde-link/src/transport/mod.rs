//! Transport seam between the IO loop and the network.
//!
//! The loop only ever talks to a `Box<dyn Transport>`, so tests can
//! substitute a scripted implementation and the production UDP/TCP
//! transports stay swappable behind one trait.

pub mod tcp;
pub mod udp;
pub mod wire;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use mavlink::common;
use serde::{Deserialize, Serialize};

pub use wire::Inbound;

/// Default MAVLink GCS listen port.
pub const DEFAULT_PORT: u16 = 14550;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("link closed by peer")]
    Closed,
}

/// Identity stamped on outbound frames plus the vendor-dialect seed.
#[derive(Debug, Clone, Copy)]
pub struct TransportSettings {
    pub system_id: u8,
    pub component_id: u8,
    pub cass_extra_crc: Option<u8>,
}

/// Bidirectional MAVLink byte transport. Sequence numbering is owned by
/// the implementation; `recv` yields only frames that decoded cleanly.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn recv(&self) -> Result<Inbound, TransportError>;
    async fn send(&self, message: &common::MavMessage) -> Result<(), TransportError>;
}

/// Connection descriptor, `{kind}:{address}:{port}` in text form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum LinkEndpoint {
    /// Bind and wait for the vehicle (or a router) to send to us.
    UdpListen { bind: String, port: u16 },
    /// Actively send to a known vehicle address.
    UdpSendTo { host: String, port: u16 },
    /// TCP client to an autopilot bridge.
    TcpClient { host: String, port: u16 },
}

impl Default for LinkEndpoint {
    fn default() -> Self {
        LinkEndpoint::UdpListen {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl fmt::Display for LinkEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEndpoint::UdpListen { bind, port } => write!(f, "udp-listen:{bind}:{port}"),
            LinkEndpoint::UdpSendTo { host, port } => write!(f, "udp-send-to:{host}:{port}"),
            LinkEndpoint::TcpClient { host, port } => write!(f, "tcp-client:{host}:{port}"),
        }
    }
}

impl FromStr for LinkEndpoint {
    type Err = crate::error::ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || crate::error::ClientError::InvalidEndpoint(s.to_string());
        let (kind, rest) = s.split_once(':').ok_or_else(bad)?;
        let (addr, port) = rest.rsplit_once(':').ok_or_else(bad)?;
        let port: u16 = port.parse().map_err(|_| bad())?;
        if addr.is_empty() {
            return Err(bad());
        }
        match kind {
            "udp-listen" => Ok(LinkEndpoint::UdpListen {
                bind: addr.to_string(),
                port,
            }),
            "udp-send-to" => Ok(LinkEndpoint::UdpSendTo {
                host: addr.to_string(),
                port,
            }),
            "tcp-client" => Ok(LinkEndpoint::TcpClient {
                host: addr.to_string(),
                port,
            }),
            _ => Err(bad()),
        }
    }
}

/// Open the transport described by `endpoint`. Failures surface here,
/// synchronously, before any background work starts.
pub async fn connect(
    endpoint: &LinkEndpoint,
    settings: TransportSettings,
) -> Result<Box<dyn Transport>, TransportError> {
    match endpoint {
        LinkEndpoint::UdpListen { bind, port } => {
            Ok(Box::new(udp::UdpTransport::listen(bind, *port, settings).await?))
        }
        LinkEndpoint::UdpSendTo { host, port } => {
            Ok(Box::new(udp::UdpTransport::send_to(host, *port, settings).await?))
        }
        LinkEndpoint::TcpClient { host, port } => {
            Ok(Box::new(tcp::TcpTransport::connect(host, *port, settings).await?))
        }
    }
}
