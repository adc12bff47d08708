//! Coordinator transports.
//!
//! A [`Connector`] opens fresh [`CoordinatorChannel`]s. The runner uses one
//! channel per session plus a separate one for the anonymous submission.
//!
//! Two transports:
//! - [`TcpConnector`]: newline-delimited JSON over TCP
//! - [`MemoryConnector`]: in-process pairs for embedded coordinators and tests

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use shroud_privacy::ErrorClass;

use crate::messages::{
    Inbound, MAX_FRAME_LEN, Outbound, ProtocolError, decode_inbound, decode_outbound,
    encode_inbound, encode_outbound,
};

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("connect timed out")]
    Timeout,

    #[error("channel closed")]
    Closed,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ChannelError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ChannelError::Protocol(_) => ErrorClass::Protocol,
            _ => ErrorClass::Connection,
        }
    }
}

impl From<LinesCodecError> for ChannelError {
    fn from(e: LinesCodecError) -> Self {
        match e {
            LinesCodecError::MaxLineLengthExceeded => {
                ChannelError::Protocol(ProtocolError::FrameTooLarge(MAX_FRAME_LEN))
            }
            LinesCodecError::Io(e) => ChannelError::Io(e),
        }
    }
}

/// One duplex message stream to the coordinator.
#[async_trait]
pub trait CoordinatorChannel: Send {
    async fn send(&mut self, msg: &Outbound) -> Result<(), ChannelError>;

    /// Next validated message, `Ok(None)` once the coordinator hung up.
    async fn recv(&mut self) -> Result<Option<Inbound>, ChannelError>;

    async fn close(&mut self) -> Result<(), ChannelError>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    type Channel: CoordinatorChannel + 'static;

    async fn connect(&self) -> Result<Self::Channel, ChannelError>;
}

// ---------------------------------------------------------------------------
// TCP
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Channel = TcpChannel;

    async fn connect(&self) -> Result<TcpChannel, ChannelError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| ChannelError::Timeout)?
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        stream.set_nodelay(true)?;
        Ok(TcpChannel::new(stream))
    }
}

pub struct TcpChannel {
    framed: Framed<TcpStream, LinesCodec>,
}

impl TcpChannel {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            framed: Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LEN)),
        }
    }
}

#[async_trait]
impl CoordinatorChannel for TcpChannel {
    async fn send(&mut self, msg: &Outbound) -> Result<(), ChannelError> {
        let line = encode_outbound(msg)?;
        self.framed.send(line).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Inbound>, ChannelError> {
        match self.framed.next().await {
            None => Ok(None),
            Some(Ok(line)) => Ok(Some(decode_inbound(&line)?)),
            Some(Err(e)) => Err(e.into()),
        }
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        SinkExt::<String>::close(&mut self.framed).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-process
// ---------------------------------------------------------------------------

/// Client end of an in-process channel. Frames travel as JSON text so the
/// same decoding and validation apply as over TCP.
pub struct MemoryChannel {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

/// Coordinator end of an in-process channel.
pub struct MemoryPeer {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryChannel {
    pub fn pair() -> (MemoryChannel, MemoryPeer) {
        let (client_tx, peer_rx) = mpsc::unbounded_channel();
        let (peer_tx, client_rx) = mpsc::unbounded_channel();
        (
            MemoryChannel {
                tx: Some(client_tx),
                rx: client_rx,
            },
            MemoryPeer {
                tx: peer_tx,
                rx: peer_rx,
            },
        )
    }
}

#[async_trait]
impl CoordinatorChannel for MemoryChannel {
    async fn send(&mut self, msg: &Outbound) -> Result<(), ChannelError> {
        let tx = self.tx.as_ref().ok_or(ChannelError::Closed)?;
        tx.send(encode_outbound(msg)?)
            .map_err(|_| ChannelError::Closed)
    }

    async fn recv(&mut self) -> Result<Option<Inbound>, ChannelError> {
        match self.rx.recv().await {
            None => Ok(None),
            Some(line) => Ok(Some(decode_inbound(&line)?)),
        }
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.tx = None;
        self.rx.close();
        Ok(())
    }
}

impl MemoryPeer {
    pub fn send(&self, msg: &Inbound) -> Result<(), ChannelError> {
        self.send_raw(encode_inbound(msg)?)
    }

    /// Push an arbitrary frame, e.g. a malformed one.
    pub fn send_raw(&self, frame: impl Into<String>) -> Result<(), ChannelError> {
        self.tx
            .send(frame.into())
            .map_err(|_| ChannelError::Closed)
    }

    /// Next message from the client, `Ok(None)` once it closed its end.
    pub async fn recv(&mut self) -> Result<Option<Outbound>, ChannelError> {
        match self.rx.recv().await {
            None => Ok(None),
            Some(line) => Ok(Some(decode_outbound(&line)?)),
        }
    }
}

/// Hands the coordinator end of every new connection to a listener.
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    refuse: AtomicU32,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, listener) = mpsc::unbounded_channel();
        (
            Self {
                peers,
                refuse: AtomicU32::new(0),
            },
            listener,
        )
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_next(&self, n: u32) {
        self.refuse.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Channel = MemoryChannel;

    async fn connect(&self) -> Result<MemoryChannel, ChannelError> {
        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ChannelError::Connect("connection refused".into()));
        }

        let (channel, peer) = MemoryChannel::pair();
        self.peers
            .send(peer)
            .map_err(|_| ChannelError::Connect("no listener".into()))?;
        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_memory_pair_round_trip() {
        let (mut client, mut peer) = MemoryChannel::pair();

        client
            .send(&Outbound::Join {
                denomination: 100_000_000,
            })
            .await
            .unwrap();
        assert_eq!(
            peer.recv().await.unwrap(),
            Some(Outbound::Join {
                denomination: 100_000_000
            })
        );

        peer.send(&Inbound::RequestInputAddress).unwrap();
        assert_eq!(
            client.recv().await.unwrap(),
            Some(Inbound::RequestInputAddress)
        );
    }

    #[tokio::test]
    async fn test_memory_channel_rejects_malformed_frames() {
        let (mut client, peer) = MemoryChannel::pair();
        peer.send_raw(r#"{"type":"NOPE"}"#).unwrap();
        assert!(matches!(
            client.recv().await,
            Err(ChannelError::Protocol(ProtocolError::Malformed(_)))
        ));
    }

    #[tokio::test]
    async fn test_memory_channel_reports_hangup() {
        let (mut client, peer) = MemoryChannel::pair();
        drop(peer);
        assert!(client.recv().await.unwrap().is_none());
        assert!(matches!(
            client
                .send(&Outbound::Join { denomination: 1 })
                .await,
            Err(ChannelError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_memory_connector_refusals() {
        let (connector, mut listener) = MemoryConnector::new();
        connector.refuse_next(2);
        assert!(connector.connect().await.is_err());
        assert!(connector.connect().await.is_err());
        assert!(connector.connect().await.is_ok());
        assert!(listener.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_tcp_channel_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            let first = lines.next_line().await.unwrap().unwrap();
            write
                .write_all(b"{\"type\":\"PARTICIPANT_COUNT\",\"count\":2,\"required\":5}\n")
                .await
                .unwrap();
            first
        });

        let mut channel = TcpConnector::new(addr.to_string()).connect().await.unwrap();
        channel
            .send(&Outbound::Ready {
                session_id: "s9".into(),
            })
            .await
            .unwrap();
        assert_eq!(
            channel.recv().await.unwrap(),
            Some(Inbound::ParticipantCount {
                count: 2,
                required: 5
            })
        );

        let sent = server.await.unwrap();
        assert_eq!(sent, r#"{"type":"READY","sessionId":"s9"}"#);
    }
}
