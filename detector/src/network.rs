//! UDP client for the position relay.
//!
//! One task owns the socket and the connection state. Incoming datagrams,
//! the detection timer, the reconnect timer, and commands from the control
//! surface all feed the same select loop, so state transitions never race.

use crate::capture::PositionDetector;
use crate::config::ConfigStore;
use crate::proximity::PeerView;
use log::{error, info, warn};
use shared::{
    Packet, CLIENT_VERSION, DETECTION_INTERVAL_MS, PEER_TIMEOUT_SECS, RECONNECT_INTERVAL_SECS,
};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Commands other tasks can hand to the relay client.
#[derive(Debug)]
pub enum ClientCommand {
    /// Push a freshly calibrated minimap region to every connected peer.
    BroadcastConfig(shared::MinimapConfig),
}

pub struct RelayClient {
    socket: UdpSocket,
    server_addr: String,
    connected: bool,
    /// Last time any datagram arrived from the relay.
    last_received: Instant,
    view: PeerView,
    config: ConfigStore,
    detector: Arc<dyn PositionDetector>,
    cmd_rx: mpsc::UnboundedReceiver<ClientCommand>,
}

impl RelayClient {
    pub async fn new(
        server_addr: &str,
        view: PeerView,
        config: ConfigStore,
        detector: Arc<dyn PositionDetector>,
        cmd_rx: mpsc::UnboundedReceiver<ClientCommand>,
    ) -> Result<Self, io::Error> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        info!("Relay client bound to {}", socket.local_addr()?);

        Ok(Self {
            socket,
            server_addr: server_addr.to_string(),
            connected: false,
            last_received: Instant::now(),
            view,
            config,
            detector,
            cmd_rx,
        })
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.try_connect().await;

        let mut buf = vec![0u8; 4096];
        let mut detect_interval =
            tokio::time::interval(Duration::from_millis(DETECTION_INTERVAL_MS));
        let mut reconnect_interval =
            tokio::time::interval(Duration::from_secs(RECONNECT_INTERVAL_SECS));
        let mut liveness_interval = tokio::time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, _addr)) => {
                            match bincode::deserialize::<Packet>(&buf[..len]) {
                                Ok(packet) => self.handle_packet(packet).await,
                                Err(e) => warn!("Dropping malformed datagram: {}", e),
                            }
                        }
                        Err(e) => {
                            error!("Socket receive error: {}", e);
                            self.mark_disconnected().await;
                        }
                    }
                }
                _ = detect_interval.tick() => {
                    self.detection_tick().await;
                }
                _ = reconnect_interval.tick() => {
                    if !self.connected {
                        self.try_connect().await;
                    }
                }
                _ = liveness_interval.tick() => {
                    self.check_liveness(Instant::now()).await;
                }
                Some(cmd) = self.cmd_rx.recv() => {
                    self.handle_command(cmd).await;
                }
            }
        }
    }

    async fn try_connect(&mut self) {
        let packet = Packet::Connect {
            client_version: CLIENT_VERSION,
        };
        if let Err(e) = self.send(&packet).await {
            warn!("Handshake send to {} failed: {}", self.server_addr, e);
        }
    }

    /// One capture cycle: sample the minimap, cache the position locally,
    /// and push it to the relay. Skipped quietly when no region is
    /// calibrated yet or the character marker is not visible.
    async fn detection_tick(&mut self) {
        let config = match self.config.get().await {
            Some(config) => config,
            None => return,
        };
        let pos = match self.detector.detect(&config) {
            Some(pos) => pos,
            None => return,
        };

        self.view.set_my_position(pos).await;

        if self.connected {
            if let Err(e) = self.send(&Packet::PositionUpdate { pos }).await {
                warn!("Position update failed: {}", e);
                self.mark_disconnected().await;
            }
        }
    }

    async fn handle_command(&mut self, cmd: ClientCommand) {
        match cmd {
            ClientCommand::BroadcastConfig(config) => {
                if !self.connected {
                    warn!("Not connected, config broadcast skipped");
                    return;
                }
                if let Err(e) = self.send(&Packet::ConfigBroadcast { config }).await {
                    warn!("Config broadcast failed: {}", e);
                    self.mark_disconnected().await;
                }
            }
        }
    }

    /// Over unconnected UDP a send to a dead relay still succeeds, so a
    /// relay that vanished without a `Disconnected` is only visible as
    /// silence. Mirrors the relay's own peer timeout.
    async fn check_liveness(&mut self, now: Instant) {
        if self.connected
            && now.duration_since(self.last_received) > Duration::from_secs(PEER_TIMEOUT_SECS)
        {
            warn!("No relay traffic for {}s, assuming it is gone", PEER_TIMEOUT_SECS);
            self.mark_disconnected().await;
        }
    }

    async fn handle_packet(&mut self, packet: Packet) {
        self.last_received = Instant::now();
        match packet {
            Packet::Connected { peer_id } => {
                info!("Connected to relay as peer {}", peer_id);
                self.connected = true;
                self.view.set_my_id(peer_id).await;
            }
            Packet::PositionSnapshot { positions } => {
                self.view.replace_peers(positions).await;
            }
            Packet::ConfigUpdate { config } => {
                info!("Received minimap region from relay: {:?}", config);
                if let Err(e) = self.config.set(config).await {
                    error!("Could not persist received config: {}", e);
                }
            }
            Packet::Disconnected { reason } => {
                warn!("Relay dropped us: {}", reason);
                self.mark_disconnected().await;
            }
            other => {
                warn!("Unexpected packet from relay: {:?}", other);
            }
        }
    }

    /// Stale peer positions must not keep triggering buffs while we are
    /// out of contact, so the cached view is dropped with the connection.
    async fn mark_disconnected(&mut self) {
        if self.connected {
            info!("Disconnected from relay, will retry");
        }
        self.connected = false;
        self.view.clear_peers().await;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    async fn send(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        let data = bincode::serialize(packet)?;
        self.socket.send_to(&data, &self.server_addr).await?;
        Ok(())
    }
}
