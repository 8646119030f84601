//! Relay network layer: UDP ingestion, state ownership, and snapshot fan-out

use crate::registry::Registry;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{MinimapConfig, Packet, CLIENT_VERSION, PEER_TIMEOUT_SECS};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

/// Messages sent from background tasks to the owning event loop
#[derive(Debug)]
pub enum RelayMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    PeerTimeout {
        peer_id: u32,
    },
    #[allow(dead_code)]
    Shutdown,
}

/// Messages sent from the event loop to the network sender task
#[derive(Debug)]
pub enum OutboundMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
    },
}

/// The relay hub: single source of truth for who is where.
///
/// All state mutation happens on one event loop; background tasks only move
/// datagrams in and out, so connect, disconnect, and position updates appear
/// atomic with respect to the registry.
pub struct Relay {
    socket: Arc<UdpSocket>,
    registry: Arc<RwLock<Registry>>,
    /// Last broadcast calibration region, sent to late joiners.
    config: Option<MinimapConfig>,
    peer_timeout: Duration,

    relay_tx: mpsc::UnboundedSender<RelayMessage>,
    relay_rx: mpsc::UnboundedReceiver<RelayMessage>,
    out_tx: mpsc::UnboundedSender<OutboundMessage>,
    out_rx: mpsc::UnboundedReceiver<OutboundMessage>,
}

impl Relay {
    pub async fn new(addr: &str, max_peers: usize) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Relay listening on {}", addr);

        let (relay_tx, relay_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        Ok(Relay {
            socket,
            registry: Arc::new(RwLock::new(Registry::new(max_peers))),
            config: None,
            peer_timeout: Duration::from_secs(PEER_TIMEOUT_SECS),
            relay_tx,
            relay_rx,
            out_tx,
            out_rx,
        })
    }

    /// Spawns the task that continuously listens for incoming datagrams
    fn spawn_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let relay_tx = self.relay_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                relay_tx.send(RelayMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to forward packet to event loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns the task that drains the outbound queue, so the event loop
    /// never holds the registry lock across a socket send.
    fn spawn_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let registry = Arc::clone(&self.registry);
        let mut out_rx = std::mem::replace(&mut self.out_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                match message {
                    OutboundMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    OutboundMessage::BroadcastPacket { packet } => {
                        let peer_addrs = {
                            let registry_guard = registry.read().await;
                            registry_guard.peer_addrs()
                        };

                        for (peer_id, addr) in peer_addrs {
                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to peer {}: {}", peer_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns the task that prunes silent peers
    fn spawn_timeout_checker(&self) {
        let registry = Arc::clone(&self.registry);
        let relay_tx = self.relay_tx.clone();
        let timeout = self.peer_timeout;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut registry_guard = registry.write().await;
                    registry_guard.check_timeouts(timeout)
                };

                for peer_id in timed_out {
                    if let Err(e) = relay_tx.send(RelayMessage::PeerTimeout { peer_id }) {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.out_tx.send(OutboundMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet) {
        if let Err(e) = self.out_tx.send(OutboundMessage::BroadcastPacket { packet }) {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    /// Broadcasts the full current position store to every registered peer,
    /// including whoever caused the change. Full snapshots trade bandwidth
    /// for client simplicity: each delivery is a complete valid state and
    /// needs no ordering reconciliation.
    async fn broadcast_snapshot(&self) {
        let positions = {
            let registry = self.registry.read().await;
            if registry.is_empty() {
                return;
            }
            registry.snapshot()
        };

        self.broadcast_packet(Packet::PositionSnapshot { positions });
    }

    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => {
                info!("Peer connecting from {} (version: {})", addr, client_version);

                if client_version != CLIENT_VERSION {
                    self.send_packet(
                        Packet::Disconnected {
                            reason: "Protocol version mismatch".to_string(),
                        },
                        addr,
                    );
                    return;
                }

                // A reconnect from a known address replaces the old
                // registration so its stale position is pruned.
                let (existing, peer_id) = {
                    let mut registry = self.registry.write().await;
                    let existing = registry.find_peer_by_addr(addr);
                    if let Some(old_id) = existing {
                        info!("Replacing existing peer {} from {}", old_id, addr);
                        registry.remove_peer(&old_id);
                    }
                    (existing, registry.add_peer(addr))
                };

                if let Some(peer_id) = peer_id {
                    self.send_packet(Packet::Connected { peer_id }, addr);

                    // Late joiners see all existing peers immediately
                    let positions = {
                        let registry = self.registry.read().await;
                        registry.snapshot()
                    };
                    if !positions.is_empty() {
                        self.send_packet(Packet::PositionSnapshot { positions }, addr);
                    }

                    if let Some(config) = self.config {
                        self.send_packet(Packet::ConfigUpdate { config }, addr);
                    }

                    if existing.is_some() {
                        // The replaced registration's position must vanish
                        // from everyone else's view too.
                        self.broadcast_snapshot().await;
                    }
                } else {
                    self.send_packet(
                        Packet::Disconnected {
                            reason: "Relay full".to_string(),
                        },
                        addr,
                    );
                }
            }

            Packet::PositionUpdate { pos } => {
                if !pos.is_finite() {
                    warn!("Dropping malformed position from {}", addr);
                    return;
                }

                let updated = {
                    let mut registry = self.registry.write().await;
                    match registry.find_peer_by_addr(addr) {
                        Some(peer_id) => registry.update_position(peer_id, pos),
                        None => false,
                    }
                };

                if updated {
                    self.broadcast_snapshot().await;
                } else {
                    debug!("Position update from unregistered {}", addr);
                }
            }

            Packet::ConfigBroadcast { config } => {
                let known = {
                    let mut registry = self.registry.write().await;
                    match registry.find_peer_by_addr(addr) {
                        Some(peer_id) => {
                            registry.touch(peer_id);
                            true
                        }
                        None => false,
                    }
                };

                if known {
                    info!("Storing and fanning out minimap config from {}", addr);
                    self.config = Some(config);
                    self.broadcast_packet(Packet::ConfigUpdate { config });
                }
            }

            Packet::Disconnect => {
                let removed = {
                    let mut registry = self.registry.write().await;
                    match registry.find_peer_by_addr(addr) {
                        Some(peer_id) => registry.remove_peer(&peer_id),
                        None => false,
                    }
                };

                // Idempotent: a second Disconnect finds no peer and is a no-op
                if removed {
                    self.broadcast_snapshot().await;
                }
            }

            _ => {
                warn!("Unexpected packet type from {}", addr);
            }
        }
    }

    /// Main event loop coordinating registration, upserts, and fan-out
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_receiver();
        self.spawn_sender();
        self.spawn_timeout_checker();

        info!("Relay started successfully");

        loop {
            match self.relay_rx.recv().await {
                Some(RelayMessage::PacketReceived { packet, addr }) => {
                    self.handle_packet(packet, addr).await;
                }
                Some(RelayMessage::PeerTimeout { peer_id }) => {
                    info!("Peer {} timed out", peer_id);
                    // Registry entry is already pruned; tell the remainder
                    self.broadcast_snapshot().await;
                }
                Some(RelayMessage::Shutdown) | None => {
                    info!("Relay shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}
