//! UDP Adapter
//!
//! Carries mesh frames over UDP/IP in place of the radio link. One socket
//! serves all peers; transport addresses are "ip:port" strings. Received
//! frames go to the packet channel from a receive loop, and a single writer
//! loop drains the outbound channel.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::{OutboundRx, PacketTx, ReceivedPacket, TransportAddr, TransportError, TransportState};
use crate::config::UdpConfig;

/// Writer task handle plus its shutdown trigger.
struct SendTask {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<OutboundRx>,
}

/// UDP adapter.
///
/// Provides connectionless, unreliable frame delivery over UDP/IP.
pub struct UdpAdapter {
    /// Configuration.
    config: UdpConfig,
    /// Current state.
    state: TransportState,
    /// Bound socket (None until started).
    socket: Option<Arc<UdpSocket>>,
    /// Channel for delivering received frames to the mesh.
    packet_tx: PacketTx,
    /// Outbound queue, held here while the writer is not running.
    outbound_rx: Option<OutboundRx>,
    /// Receive loop task handle.
    recv_task: Option<JoinHandle<()>>,
    /// Writer loop task.
    send_task: Option<SendTask>,
    /// Local bound address (after start).
    local_addr: Option<SocketAddr>,
}

impl UdpAdapter {
    /// Create a new UDP adapter.
    pub fn new(config: UdpConfig, packet_tx: PacketTx, outbound_rx: OutboundRx) -> Self {
        Self {
            config,
            state: TransportState::Configured,
            socket: None,
            packet_tx,
            outbound_rx: Some(outbound_rx),
            recv_task: None,
            send_task: None,
            local_addr: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Configured MTU.
    pub fn mtu(&self) -> u16 {
        self.config.mtu()
    }

    /// Get the local bound address (only valid after start).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Local bound address as a transport address (only valid after start).
    pub fn local_transport_addr(&self) -> Option<TransportAddr> {
        self.local_addr()
            .map(|addr| TransportAddr::from_string(&addr.to_string()))
    }

    /// Start the adapter.
    ///
    /// Binds the UDP socket and spawns the receive and writer loops.
    pub async fn start_async(&mut self) -> Result<(), TransportError> {
        if !self.state.can_start() {
            return Err(TransportError::AlreadyStarted);
        }
        // The writer loop owns the outbound queue while running
        let outbound_rx = self
            .outbound_rx
            .take()
            .ok_or_else(|| TransportError::StartFailed("outbound queue unavailable".into()))?;

        self.state = TransportState::Starting;

        // Parse bind address and bind socket
        let (socket, local_addr) = match bind_socket(self.config.bind_addr()).await {
            Ok(bound) => bound,
            Err(e) => {
                // Hand the queue back so a later start can retry
                self.outbound_rx = Some(outbound_rx);
                self.state = TransportState::Failed;
                return Err(e);
            }
        };
        self.local_addr = Some(local_addr);

        let socket = Arc::new(socket);
        self.socket = Some(socket.clone());
        let mtu = self.config.mtu();

        // Spawn receive loop
        let packet_tx = self.packet_tx.clone();
        let recv_socket = socket.clone();
        self.recv_task = Some(tokio::spawn(async move {
            udp_receive_loop(recv_socket, packet_tx, mtu).await;
        }));

        // Spawn writer loop
        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(udp_send_loop(socket, outbound_rx, shutdown_rx, mtu));
        self.send_task = Some(SendTask { shutdown, handle });

        self.state = TransportState::Up;
        info!(local_addr = %local_addr, mtu, "UDP adapter started");

        Ok(())
    }

    /// Stop the adapter.
    ///
    /// The outbound queue is kept, so the adapter can be started again.
    pub async fn stop_async(&mut self) -> Result<(), TransportError> {
        if !self.state.is_operational() {
            return Err(TransportError::NotStarted);
        }

        // Abort receive task
        if let Some(task) = self.recv_task.take() {
            task.abort();
            let _ = task.await; // Ignore JoinError from abort
        }

        // Stop the writer and take the queue back
        if let Some(task) = self.send_task.take() {
            let _ = task.shutdown.send(());
            match task.handle.await {
                Ok(rx) => self.outbound_rx = Some(rx),
                Err(e) => warn!(error = %e, "UDP writer task failed"),
            }
        }

        // Drop socket
        self.socket.take();
        self.local_addr = None;
        self.state = TransportState::Down;

        debug!("UDP adapter stopped");

        Ok(())
    }

    /// Send one frame immediately, bypassing the outbound queue.
    pub async fn send_async(
        &self,
        addr: &TransportAddr,
        data: &[u8],
    ) -> Result<usize, TransportError> {
        if !self.state.is_operational() {
            return Err(TransportError::NotStarted);
        }
        let socket = self.socket.as_ref().ok_or(TransportError::NotStarted)?;
        send_frame(socket, addr, data, self.config.mtu()).await
    }
}

async fn bind_socket(bind_addr: &str) -> Result<(UdpSocket, SocketAddr), TransportError> {
    let bind_addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| TransportError::StartFailed(format!("invalid bind address: {}", e)))?;
    let socket = UdpSocket::bind(bind_addr)
        .await
        .map_err(|e| TransportError::StartFailed(format!("bind failed: {}", e)))?;
    let local_addr = socket
        .local_addr()
        .map_err(|e| TransportError::StartFailed(format!("get local addr: {}", e)))?;
    Ok((socket, local_addr))
}

/// Parse a TransportAddr as SocketAddr.
fn parse_socket_addr(addr: &TransportAddr) -> Result<SocketAddr, TransportError> {
    addr.as_str()
        .ok_or_else(|| TransportError::InvalidAddress("not valid UTF-8".into()))?
        .parse()
        .map_err(|e| TransportError::InvalidAddress(format!("{}", e)))
}

async fn send_frame(
    socket: &UdpSocket,
    addr: &TransportAddr,
    data: &[u8],
    mtu: u16,
) -> Result<usize, TransportError> {
    // Check MTU
    if data.len() > mtu as usize {
        return Err(TransportError::MtuExceeded {
            packet_size: data.len(),
            mtu,
        });
    }
    let socket_addr = parse_socket_addr(addr)?;
    let bytes_sent = socket
        .send_to(data, socket_addr)
        .await
        .map_err(|e| TransportError::SendFailed(format!("{}", e)))?;

    trace!(remote_addr = %socket_addr, bytes = bytes_sent, "UDP frame sent");
    Ok(bytes_sent)
}

/// UDP receive loop - runs as a spawned task.
async fn udp_receive_loop(socket: Arc<UdpSocket>, packet_tx: PacketTx, mtu: u16) {
    // Buffer with headroom so oversized frames are seen and rejected whole
    let mut buf = vec![0u8; mtu as usize + 100];

    debug!("UDP receive loop starting");

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, remote_addr)) => {
                if len > mtu as usize {
                    debug!(remote_addr = %remote_addr, bytes = len, mtu, "Dropping oversized UDP frame");
                    continue;
                }
                let addr = TransportAddr::from_string(&remote_addr.to_string());
                let packet = ReceivedPacket::new(addr, buf[..len].to_vec());

                trace!(remote_addr = %remote_addr, bytes = len, "UDP frame received");

                if packet_tx.send(packet).await.is_err() {
                    // Receiver dropped, exit loop
                    info!("Packet channel closed, stopping receive loop");
                    break;
                }
            }
            Err(e) => {
                // Transient errors (e.g. ICMP port unreachable) are expected
                warn!(error = %e, "UDP receive error");
            }
        }
    }

    debug!("UDP receive loop stopped");
}

/// UDP writer loop - the single consumer of the outbound queue.
///
/// Returns the queue on shutdown so a restart can reuse it.
async fn udp_send_loop(
    socket: Arc<UdpSocket>,
    mut outbound_rx: OutboundRx,
    mut shutdown: oneshot::Receiver<()>,
    mtu: u16,
) -> OutboundRx {
    debug!("UDP writer loop starting");

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            packet = outbound_rx.recv() => match packet {
                Some(packet) => {
                    // Frames are dropped on error; no retransmission here
                    if let Err(e) = send_frame(&socket, &packet.remote_addr, &packet.data, mtu).await {
                        debug!(remote_addr = %packet.remote_addr, error = %e, "Dropping outbound frame");
                    }
                }
                // All senders gone
                None => break,
            },
        }
    }

    debug!("UDP writer loop stopped");
    outbound_rx
}

// ============================================================================
// Tests
// ============================================================================
