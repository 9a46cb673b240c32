//! Opcode → handler table for worker→Center traffic.
//!
//! The table is built once at startup by [`Router::center`] and shared
//! read-only by every connection. Dispatch always runs inside a
//! scheduler action, so handlers get `&mut CenterContext` directly.
//!
//! Before any handler runs, dispatch enforces two rules:
//!
//! - `Ping`/`Pong` are answered on any link, allocated or not.
//! - Everything else except `ServerRequestAllocation` is dropped until
//!   the link has passed allocation.
//!
//! Undecodable messages are counted per link; see
//! [`CenterContext::decode_failed`].

use std::collections::HashMap;

use wvs_protocol::{ClientMessage, Packet, PacketReader, ServerMessage};
use wvs_sync::Outbox;
use wvs_transport::ConnectionId;

use crate::{handlers, CenterContext, WvsError};

/// One decoded message on its way through a handler.
pub struct Request<'a> {
    /// The link the message arrived on.
    pub connection: ConnectionId,
    /// Positioned just after the opcode.
    pub reader: PacketReader<'a>,
    /// Packets to deliver once the handler returns, whatever its result.
    pub out: Outbox,
}

pub type Handler = fn(&mut CenterContext, &mut Request<'_>) -> Result<(), WvsError>;

#[derive(Default)]
pub struct Router {
    handlers: HashMap<ClientMessage, Handler>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// The full Center table.
    pub fn center() -> Result<Self, WvsError> {
        let mut router = Self::new();
        handlers::register_all(&mut router)?;
        Ok(router)
    }

    /// Adds a handler. Each opcode may have exactly one.
    pub fn register(&mut self, op: ClientMessage, handler: Handler) -> Result<(), WvsError> {
        if self.handlers.contains_key(&op) {
            return Err(WvsError::DuplicateHandler(op));
        }
        self.handlers.insert(op, handler);
        Ok(())
    }

    pub fn handles(&self, op: ClientMessage) -> bool {
        self.handlers.contains_key(&op)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Decodes one frame from `connection` and runs its handler.
    ///
    /// Errors never leave this function; they are logged with the opcode
    /// and the connection. Decode failures also mark the link suspect,
    /// and a link that sends too many in a row is closed.
    pub fn dispatch(&self, ctx: &mut CenterContext, connection: ConnectionId, frame: &[u8]) {
        let mut reader = PacketReader::new(frame);
        let op: ClientMessage = match reader.read_opcode() {
            Ok(op) => op,
            Err(e) => {
                tracing::warn!(%connection, error = %e, "undecodable message");
                ctx.decode_failed(connection);
                return;
            }
        };

        match op {
            ClientMessage::Ping => {
                ctx.send(connection, &Packet::new(ServerMessage::Pong));
                return;
            }
            ClientMessage::Pong => {
                ctx.on_pong(connection);
                return;
            }
            _ => {}
        }

        let allocated = ctx.registry.is_allocated(connection);
        if allocated == (op == ClientMessage::ServerRequestAllocation) {
            tracing::warn!(%connection, %op, allocated, "message not allowed in this link state, dropped");
            return;
        }

        let Some(handler) = self.handlers.get(&op) else {
            tracing::warn!(%connection, %op, "no handler registered");
            return;
        };

        let mut req = Request {
            connection,
            reader,
            out: Outbox::new(),
        };
        match handler(ctx, &mut req) {
            Ok(()) => ctx.decoded(connection),
            Err(WvsError::Protocol(e)) => {
                tracing::warn!(%connection, %op, error = %e, "malformed message");
                ctx.decode_failed(connection);
            }
            Err(e) => tracing::warn!(%connection, %op, error = %e, "handler failed"),
        }
        if req.reader.remaining() > 0 {
            tracing::trace!(%connection, %op, left = req.reader.remaining(), "unread bytes after handler");
        }
        ctx.flush(req.out);
    }
}
