use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use super::crypto::SharedCrypto;
use super::packet::{OutgoingFrame, MAX_PACKET_SIZE};
use super::registry::{PacketSet, ServerPacket};
use super::stats::PacketLogger;

/// Length prefix of a frame on the stream transport
const TCP_LENGTH_PREFIX: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Decoded packets buffered between the I/O task and the update thread
    pub inbound_capacity: usize,
    /// Frames buffered for sending; further frames are dropped and counted
    pub outbound_capacity: usize,
    pub connect_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: 1024,
            outbound_capacity: 256,
            connect_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    dropped_outbound: AtomicU64,
    decode_errors: AtomicU64,
    closed: AtomicBool,
}

/// Update-thread side of a running connection.
///
/// Dropping the handle stops the I/O task.
#[derive(Debug)]
pub struct NetworkHandle {
    inbound: mpsc::Receiver<ServerPacket>,
    outbound: mpsc::Sender<OutgoingFrame>,
    counters: Arc<Counters>,
    task: Option<JoinHandle<()>>,
    remote_addr: SocketAddr,
}

impl NetworkHandle {
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Next decoded packet without waiting
    pub fn try_recv(&mut self) -> Option<ServerPacket> {
        match self.inbound.try_recv() {
            Ok(packet) => Some(packet),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.counters.closed.store(true, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn recv(&mut self) -> Option<ServerPacket> {
        let packet = self.inbound.recv().await;
        if packet.is_none() {
            self.counters.closed.store(true, Ordering::Relaxed);
        }
        packet
    }

    /// Queue a frame for sending. Returns `false` if it was dropped.
    pub fn send(&self, frame: OutgoingFrame) -> bool {
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                let dropped = self.counters.dropped_outbound.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(packet_id = frame.packet_id, dropped, "outbound queue full, dropping frame");
                false
            }
            Err(TrySendError::Closed(frame)) => {
                debug!(packet_id = frame.packet_id, "connection closed, frame not sent");
                false
            }
        }
    }

    pub fn dropped_outbound(&self) -> u64 {
        self.counters.dropped_outbound.load(Ordering::Relaxed)
    }

    /// Frames that failed to decode and were skipped
    pub fn decode_errors(&self) -> u64 {
        self.counters.decode_errors.load(Ordering::Relaxed)
    }

    /// The I/O task has stopped and every packet it delivered has been
    /// received. Only set once a receive observes the drained, closed queue.
    pub fn is_closed(&self) -> bool {
        self.counters.closed.load(Ordering::Relaxed)
    }

    pub fn shutdown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.counters.closed.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
impl NetworkHandle {
    /// Handle over bare channels, with no I/O task behind it.
    pub(crate) fn from_channels(
        inbound: mpsc::Receiver<ServerPacket>,
        outbound: mpsc::Sender<OutgoingFrame>,
    ) -> Self {
        Self {
            inbound,
            outbound,
            counters: Arc::new(Counters::default()),
            task: None,
            remote_addr: SocketAddr::from(([127, 0, 0, 1], 1)),
        }
    }
}

impl Drop for NetworkHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Open the TCP and UDP sockets to `addr` and start the I/O task.
pub async fn connect(
    addr: SocketAddr,
    config: &TransportConfig,
    crypto: SharedCrypto,
    logger: PacketLogger,
) -> Result<NetworkHandle> {
    let timeout = Duration::from_millis(config.connect_timeout_ms);
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(stream) => stream?,
        Err(_) => return Err(Error::ConnectionTimeout),
    };
    stream.set_nodelay(true)?;

    let bind_addr = match addr {
        SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
        SocketAddr::V6(_) => SocketAddr::from(([0, 0, 0, 0, 0, 0, 0, 0], 0)),
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(addr).await?;

    info!(%addr, local = ?socket.local_addr().ok(), "transport connected");

    let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
    let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
    let counters = Arc::new(Counters::default());

    let (read_half, write_half) = stream.into_split();
    let pump = Pump {
        tcp_read: read_half,
        tcp_write: write_half,
        udp: socket,
        inbound: inbound_tx,
        outbound: outbound_rx,
        crypto,
        logger,
        counters: Arc::clone(&counters),
    };
    let task = tokio::spawn(pump.run());

    Ok(NetworkHandle {
        inbound: inbound_rx,
        outbound: outbound_tx,
        counters,
        task: Some(task),
        remote_addr: addr,
    })
}

/// Append a length-prefixed frame for the stream transport.
pub fn write_stream_frame(buf: &mut BytesMut, frame: &[u8]) {
    buf.reserve(TCP_LENGTH_PREFIX + frame.len());
    buf.put_u32(frame.len() as u32);
    buf.put_slice(frame);
}

/// Split one complete frame off the front of `buf`, if there is one.
pub fn read_stream_frame(buf: &mut BytesMut) -> Result<Option<Bytes>> {
    if buf.len() < TCP_LENGTH_PREFIX {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_PACKET_SIZE {
        return Err(Error::PacketTooLarge { size: len, max: MAX_PACKET_SIZE });
    }
    if buf.len() < TCP_LENGTH_PREFIX + len {
        return Ok(None);
    }
    buf.advance(TCP_LENGTH_PREFIX);
    Ok(Some(buf.split_to(len).freeze()))
}

struct Pump {
    tcp_read: OwnedReadHalf,
    tcp_write: OwnedWriteHalf,
    udp: UdpSocket,
    inbound: mpsc::Sender<ServerPacket>,
    outbound: mpsc::Receiver<OutgoingFrame>,
    crypto: SharedCrypto,
    logger: PacketLogger,
    counters: Arc<Counters>,
}

impl Pump {
    async fn run(mut self) {
        if let Err(e) = self.run_inner().await {
            warn!(error = %e, "transport stopped");
        } else {
            debug!("transport stopped");
        }
        // dropping `self` closes the inbound queue behind any queued packets
    }

    async fn run_inner(&mut self) -> Result<()> {
        let mut tcp_buf = BytesMut::with_capacity(MAX_PACKET_SIZE);
        let mut udp_buf = vec![0u8; MAX_PACKET_SIZE];
        let mut write_buf = BytesMut::new();

        loop {
            tokio::select! {
                read = self.tcp_read.read_buf(&mut tcp_buf) => {
                    if read? == 0 {
                        info!("server closed the stream");
                        return Ok(());
                    }
                    while let Some(frame) = read_stream_frame(&mut tcp_buf)? {
                        if !self.deliver(&frame).await {
                            return Ok(());
                        }
                    }
                }
                received = self.udp.recv(&mut udp_buf) => {
                    let len = received?;
                    if !self.deliver(&udp_buf[..len]).await {
                        return Ok(());
                    }
                }
                frame = self.outbound.recv() => {
                    let Some(frame) = frame else {
                        return Ok(());
                    };
                    self.logger.record_frame(&frame.bytes, true);
                    if frame.reliable {
                        write_buf.clear();
                        write_stream_frame(&mut write_buf, &frame.bytes);
                        self.tcp_write.write_all(&write_buf).await?;
                    } else {
                        self.udp.send(&frame.bytes).await?;
                    }
                }
            }
        }
    }

    /// Decode and hand one frame to the update thread. Returns `false` once
    /// the receiving side is gone.
    async fn deliver(&self, frame: &[u8]) -> bool {
        self.logger.record_frame(frame, false);

        let decoded = self
            .crypto
            .with(|crypto| ServerPacket::registry().decode_frame(frame, crypto));

        match decoded {
            Ok(packet) => {
                debug!(packet = packet.name(), len = frame.len(), "received");
                // waits while the update thread is behind
                self.inbound.send(packet).await.is_ok()
            }
            Err(e) => {
                self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, len = frame.len(), "dropping undecodable frame");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{DisconnectPacket, KeepalivePacket, KeepaliveResponsePacket, ServerNoticePacket};
    use crate::protocol::packet::encode_packet;
    use crate::protocol::registry::ClientPacket;
    use tokio::net::TcpListener;

    async fn fake_server() -> (TcpListener, UdpSocket, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let udp = UdpSocket::bind(addr).await.unwrap();
        (listener, udp, addr)
    }

    async fn recv_timeout(handle: &mut NetworkHandle) -> ServerPacket {
        tokio::time::timeout(Duration::from_secs(5), handle.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
    }

    #[test]
    fn test_stream_framing() {
        let mut buf = BytesMut::new();
        write_stream_frame(&mut buf, &[1, 2, 3]);
        write_stream_frame(&mut buf, &[4]);
        assert_eq!(&buf[..4], &[0, 0, 0, 3]);

        let mut partial = BytesMut::from(&buf[..5]);
        assert!(read_stream_frame(&mut partial).unwrap().is_none());

        assert_eq!(read_stream_frame(&mut buf).unwrap().unwrap().as_ref(), &[1, 2, 3]);
        assert_eq!(read_stream_frame(&mut buf).unwrap().unwrap().as_ref(), &[4]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_oversized_stream_frame_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_PACKET_SIZE as u32 + 1);
        assert!(matches!(read_stream_frame(&mut buf), Err(Error::PacketTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_reliable_and_unreliable_paths() {
        let (listener, udp, addr) = fake_server().await;
        let logger = PacketLogger::new();
        let mut handle = connect(addr, &TransportConfig::default(), SharedCrypto::new(), logger.clone())
            .await
            .unwrap();
        let (mut stream, _) = listener.accept().await.unwrap();

        // server -> client over the stream, with a garbage frame first
        let mut out = BytesMut::new();
        write_stream_frame(&mut out, &[0xFF, 0xFF, 0x00]);
        let notice = ServerPacket::from(ServerNoticePacket { message: "hello".into() });
        write_stream_frame(&mut out, &notice.to_frame(None).unwrap().bytes);
        stream.write_all(&out).await.unwrap();

        assert_eq!(recv_timeout(&mut handle).await, notice);
        assert_eq!(handle.decode_errors(), 1);

        // client -> server over both transports
        assert!(handle.send(encode_packet(&DisconnectPacket, None).unwrap()));
        assert!(handle.send(encode_packet(&KeepalivePacket, None).unwrap()));

        let mut len = [0u8; 4];
        stream.read_exact(&mut len).await.unwrap();
        let mut frame = vec![0u8; u32::from_be_bytes(len) as usize];
        stream.read_exact(&mut frame).await.unwrap();
        let registry = ClientPacket::registry();
        assert_eq!(registry.decode_frame(&frame, None).unwrap(), ClientPacket::from(DisconnectPacket));

        let mut datagram = [0u8; 64];
        let (n, client_addr) = udp.recv_from(&mut datagram).await.unwrap();
        assert_eq!(registry.decode_frame(&datagram[..n], None).unwrap(), ClientPacket::from(KeepalivePacket));

        // server -> client datagram
        let response = ServerPacket::from(KeepaliveResponsePacket { player_count: 3 });
        udp.send_to(&response.to_frame(None).unwrap().bytes, client_addr).await.unwrap();
        assert_eq!(recv_timeout(&mut handle).await, response);

        let summary = logger.summary();
        assert_eq!(summary.total_out, 2);
        assert_eq!(summary.total_in, 3);
    }

    #[tokio::test]
    async fn test_peer_close_marks_handle_closed() {
        let (listener, _udp, addr) = fake_server().await;
        let mut handle = connect(addr, &TransportConfig::default(), SharedCrypto::new(), PacketLogger::new())
            .await
            .unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);

        assert!(tokio::time::timeout(Duration::from_secs(5), handle.recv())
            .await
            .unwrap()
            .is_none());
        assert!(handle.is_closed());
        assert!(!handle.send(encode_packet(&KeepalivePacket, None).unwrap()));
    }

    #[test]
    fn test_full_outbound_queue_counts_drops() {
        let (_inbound_tx, inbound_rx) = mpsc::channel(1);
        let (outbound_tx, _outbound_rx) = mpsc::channel(1);
        let handle = NetworkHandle::from_channels(inbound_rx, outbound_tx);

        let frame = encode_packet(&KeepalivePacket, None).unwrap();
        assert!(handle.send(frame.clone()));
        assert!(!handle.send(frame.clone()));
        assert!(!handle.send(frame));
        assert_eq!(handle.dropped_outbound(), 2);
        assert!(!handle.is_closed());
    }

    #[test]
    fn test_recv_waits_for_packets() {
        let (inbound_tx, inbound_rx) = mpsc::channel(4);
        let (outbound_tx, _outbound_rx) = mpsc::channel(4);
        let mut handle = NetworkHandle::from_channels(inbound_rx, outbound_tx);
        assert!(handle.try_recv().is_none());

        let packet = ServerPacket::from(KeepaliveResponsePacket { player_count: 8 });
        {
            let mut recv = tokio_test::task::spawn(handle.recv());
            tokio_test::assert_pending!(recv.poll());

            inbound_tx.try_send(packet.clone()).unwrap();
            assert!(recv.is_woken());
            assert_eq!(tokio_test::assert_ready!(recv.poll()), Some(packet));
        }

        drop(inbound_tx);
        assert!(handle.try_recv().is_none());
        assert!(handle.is_closed());
    }

    #[test]
    fn test_closed_only_after_queue_drained() {
        let (inbound_tx, inbound_rx) = mpsc::channel(4);
        let (outbound_tx, outbound_rx) = mpsc::channel(4);
        let mut handle = NetworkHandle::from_channels(inbound_rx, outbound_tx);

        let notice = ServerPacket::from(ServerNoticePacket { message: "last words".into() });
        inbound_tx.try_send(notice.clone()).unwrap();
        drop(inbound_tx);
        drop(outbound_rx);

        // a failed send does not hide packets still queued
        assert!(!handle.send(encode_packet(&KeepalivePacket, None).unwrap()));
        assert!(!handle.is_closed());

        assert_eq!(handle.try_recv(), Some(notice));
        assert!(!handle.is_closed());
        assert!(handle.try_recv().is_none());
        assert!(handle.is_closed());
    }
}
