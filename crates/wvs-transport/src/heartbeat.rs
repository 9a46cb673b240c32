//! Ping/pong liveness bookkeeping.
//!
//! The side that pings owns one [`Heartbeat`] per link. Every round it
//! calls [`Heartbeat::tick`] and acts on the answer; whenever a `Pong`
//! arrives it calls [`Heartbeat::on_pong`]. The struct holds no timers
//! of its own so the caller decides where the rounds come from.

/// Unanswered pings after which a link is considered dead.
pub const MAX_LOST_PINGS: u32 = 3;

/// What the pinger should do with a link this round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    SendPing,
    Disconnect,
}

#[derive(Debug, Clone, Default)]
pub struct Heartbeat {
    lost: u32,
    got_pong: bool,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that the peer answered.
    pub fn on_pong(&mut self) {
        self.got_pong = true;
    }

    /// Advances one ping round.
    pub fn tick(&mut self) -> HeartbeatAction {
        if self.got_pong {
            self.got_pong = false;
            self.lost = 0;
        }
        if self.lost >= MAX_LOST_PINGS {
            return HeartbeatAction::Disconnect;
        }
        self.lost += 1;
        HeartbeatAction::SendPing
    }

    /// Pings sent since the last answer.
    pub fn lost(&self) -> u32 {
        self.lost
    }
}

/// Why a link went down, as seen by the side that owns it.
///
/// Workers treat the Center link bimodally: an expected disconnect
/// (Center told them to move) reconnects, anything else is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectKind {
    Expected,
    Fatal,
}
