//! Shared entities that span several worker processes, kept consistent
//! by Center.
//!
//! - [`GuildTable`]: persistent guilds, replicated to every Game and Shop
//!   worker by broadcast. Workers hold a [`GuildMirror`].
//! - [`MessengerRooms`]: three-seat chat rooms that exist only while
//!   someone is in them.
//! - [`PartyTable`]: parties of up to six, surviving member logouts.
//!
//! None of these talk to the network. Every operation takes the
//! [`Directory`](wvs_world::Directory) it needs to resolve characters and
//! an [`Outbox`] to queue packets in; the caller delivers the outbox once
//! the operation returns. All of it runs on the Center scheduler, so
//! nothing here is `Sync` or locked.

mod error;
pub mod guild;
pub mod messenger;
mod outbox;
pub mod party;

pub use error::SyncError;
pub use guild::{Founder, GuildChange, GuildMirror, GuildStore, GuildTable, MemoryGuildStore};
pub use messenger::{MessengerRoom, MessengerRooms};
pub use outbox::{Outbox, Target};
pub use party::{Party, PartyMember, PartyTable};
