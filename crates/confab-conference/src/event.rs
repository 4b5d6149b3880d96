//! Typed domain events emitted by the engine.
//!
//! The engine queues events while handling a call, packet, or tick; the
//! host drains them afterwards with [`Conference::drain_events`] and reacts
//! (UI updates, side-table cleanup, answering invites). Events reference
//! members by their stable peer number, never by list index.
//!
//! [`Conference::drain_events`]: crate::Conference::drain_events

use confab_link::ConnectionId;

use crate::types::{ConferenceKind, MessageKind};

/// Something the host should know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConferenceEvent {
    /// A friend invited us to a conference. `cookie` is handed back to
    /// [`Conference::join`] to accept.
    ///
    /// [`Conference::join`]: crate::Conference::join
    InviteReceived {
        link: ConnectionId,
        kind: ConferenceKind,
        cookie: Vec<u8>,
    },

    /// Our own membership was confirmed by the network; the conference is
    /// now fully joined.
    Connected { group: u16 },

    /// A chat message or action from a member.
    Message {
        group: u16,
        peer: u16,
        kind: MessageKind,
        payload: Vec<u8>,
    },

    /// A member's nickname changed (or became known).
    PeerName {
        group: u16,
        peer: u16,
        name: Vec<u8>,
    },

    /// Membership changed in a way that invalidates cached peer lists.
    PeerListChanged { group: u16 },

    /// A member joined or was thawed back to active.
    PeerJoined { group: u16, peer: u16 },

    /// A member left, was killed, or was frozen.
    PeerLeft { group: u16, peer: u16 },

    /// The conference title changed. `peer` is `None` when the title came
    /// from a direct sync rather than an attributed broadcast.
    TitleChanged {
        group: u16,
        peer: Option<u16>,
        title: Vec<u8>,
    },

    /// A host-registered custom lossy packet arrived.
    LossyPacket {
        group: u16,
        peer: u16,
        id: u8,
        payload: Vec<u8>,
    },

    /// The conference was deleted locally.
    Deleted { group: u16 },
}
