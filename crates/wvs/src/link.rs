//! The worker end of the Center connection.
//!
//! A worker process (login, game or shop) keeps exactly one
//! [`CenterLink`]. The link allocates itself on connect, answers Center's
//! pings, keeps a [`GuildMirror`] current and hands every other message
//! to the worker.
//!
//! Losing the link is bimodal. When Center has told the worker to move
//! (`ChangeCenterServer`), or the worker called
//! [`CenterLink::expect_disconnect`] before a planned restart, the link
//! reconnects and allocates again. Any other loss is fatal:
//! [`WvsError::CenterLost`] comes back and the worker should shut down.

use std::net::{Ipv4Addr, SocketAddr};

use wvs_protocol::{ClientMessage, Handshake, Packet, PacketReader, ServerMessage};
use wvs_sync::GuildMirror;
use wvs_transport::{Connection, DisconnectKind, TcpConnection};

use crate::WvsError;

/// How a worker introduces itself to Center.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    pub center: SocketAddr,
    /// Must match a configured server definition.
    pub name: String,
    pub auth_key: String,
    /// Address players are sent to when they move to this worker.
    pub public_ip: Ipv4Addr,
    pub port: u16,
    /// World ID and name; game and shop workers only.
    pub world: Option<(u8, String)>,
}

/// What Center answered to the allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    /// Another process is still serving this slot; wait for hand-over.
    pub in_maintenance: bool,
    pub channel: Option<u8>,
}

pub struct CenterLink {
    config: LinkConfig,
    conn: TcpConnection,
    handshake: Handshake,
    disconnect: DisconnectKind,
    mirror: GuildMirror,
    assignment: Option<Assignment>,
}

impl CenterLink {
    /// Connects, reads the greeting and requests allocation. The
    /// assignment arrives later through [`next_message`](Self::next_message).
    pub async fn connect(config: LinkConfig) -> Result<Self, WvsError> {
        let (conn, handshake) = open(&config).await?;
        Ok(Self {
            config,
            conn,
            handshake,
            disconnect: DisconnectKind::Fatal,
            mirror: GuildMirror::new(),
            assignment: None,
        })
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    pub fn center(&self) -> SocketAddr {
        self.config.center
    }

    pub fn mirror(&self) -> &GuildMirror {
        &self.mirror
    }

    pub fn assignment(&self) -> Option<Assignment> {
        self.assignment
    }

    /// The next loss of the link reconnects instead of failing.
    pub fn expect_disconnect(&mut self) {
        self.disconnect = DisconnectKind::Expected;
    }

    pub async fn send(&self, packet: &Packet) -> Result<(), WvsError> {
        self.conn.send(packet.as_bytes()).await?;
        Ok(())
    }

    /// Waits for the next message for the worker.
    ///
    /// Pings are answered here and never returned. Guild broadcasts are
    /// applied to the mirror first and then returned like anything else.
    pub async fn next_message(&mut self) -> Result<(ServerMessage, Vec<u8>), WvsError> {
        loop {
            let frame = match self.conn.recv().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.on_lost("center closed the link".to_string()).await?;
                    continue;
                }
                Err(e) => {
                    self.on_lost(e.to_string()).await?;
                    continue;
                }
            };

            let mut r = PacketReader::new(&frame);
            let op: ServerMessage = r.read_opcode()?;
            match op {
                ServerMessage::Ping => {
                    self.send(&Packet::new(ClientMessage::Pong)).await?;
                    continue;
                }
                ServerMessage::Pong => continue,
                ServerMessage::ServerAssignmentResult => {
                    let assignment = Assignment {
                        in_maintenance: r.read_bool()?,
                        channel: if r.remaining() > 0 { Some(r.read_u8()?) } else { None },
                    };
                    tracing::info!(
                        server = %self.config.name,
                        maintenance = assignment.in_maintenance,
                        channel = ?assignment.channel,
                        "allocated by center"
                    );
                    self.assignment = Some(assignment);
                }
                ServerMessage::ChangeCenterServer => {
                    let ip: [u8; 4] = r.read_array()?;
                    let port = r.read_u16()?;
                    self.move_to(SocketAddr::from((Ipv4Addr::from(ip), port))).await?;
                    continue;
                }
                op if GuildMirror::handles(op) => {
                    if let Err(e) = self.mirror.apply(&frame) {
                        tracing::warn!(%op, error = %e, "guild broadcast not applied");
                    }
                }
                _ => {}
            }
            return Ok((op, frame));
        }
    }

    /// Feeds every message to `on_message` until the link is lost for
    /// good. Only ever returns an error.
    pub async fn run<F>(&mut self, mut on_message: F) -> Result<(), WvsError>
    where
        F: FnMut(ServerMessage, &[u8]),
    {
        loop {
            let (op, frame) = self.next_message().await?;
            on_message(op, &frame);
        }
    }

    async fn move_to(&mut self, center: SocketAddr) -> Result<(), WvsError> {
        tracing::info!(from = %self.config.center, to = %center, "center asked us to move");
        self.config.center = center;
        self.disconnect = DisconnectKind::Expected;
        if let Err(e) = self.conn.close().await {
            tracing::debug!(error = %e, "closing old center link failed");
        }
        self.on_lost("moving to another center".to_string()).await
    }

    async fn on_lost(&mut self, reason: String) -> Result<(), WvsError> {
        match self.disconnect {
            DisconnectKind::Fatal => {
                tracing::error!(server = %self.config.name, %reason, "lost center link");
                Err(WvsError::CenterLost(reason))
            }
            DisconnectKind::Expected => {
                tracing::info!(server = %self.config.name, center = %self.config.center, %reason, "reconnecting to center");
                self.disconnect = DisconnectKind::Fatal;
                self.assignment = None;
                let (conn, handshake) = open(&self.config).await?;
                self.conn = conn;
                self.handshake = handshake;
                Ok(())
            }
        }
    }
}

async fn open(config: &LinkConfig) -> Result<(TcpConnection, Handshake), WvsError> {
    let conn = TcpConnection::connect(config.center).await?;
    let greeting = conn
        .recv()
        .await?
        .ok_or_else(|| WvsError::CenterLost("closed before the handshake".to_string()))?;
    let handshake = Handshake::decode(&greeting)?;
    if handshake.version != Handshake::VERSION {
        tracing::warn!(version = handshake.version, "center runs another game version");
    }

    conn.send(allocation_request(config).as_bytes()).await?;
    tracing::debug!(center = %config.center, server = %config.name, "allocation requested");
    Ok((conn, handshake))
}

fn allocation_request(config: &LinkConfig) -> Packet {
    let mut p = Packet::new(ClientMessage::ServerRequestAllocation);
    p.write_string(&config.name)
        .write_string(&config.auth_key)
        .write_string(&config.public_ip.to_string())
        .write_u16(config.port);
    if let Some((id, name)) = &config.world {
        p.write_u8(*id).write_string(name);
    }
    p
}
