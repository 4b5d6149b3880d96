use crate::{ConnectionId, LinkStatus, PublicKey};

/// Capability set the conference engine consumes from the host's pairwise
/// transport.
///
/// The engine is sans-I/O: every operation that needs the network takes a
/// `&mut impl PairwiseTransport` and calls into it synchronously. Sends are
/// non-blocking enqueues; `false` means the packet was not accepted
/// (link down or transport backpressure) and the caller may retry the whole
/// operation later.
///
/// Inbound traffic flows the other way: the host routes received conference
/// packets and link status changes into the engine's `handle_*` entry
/// points, identified by the [`ConnectionId`] they arrived on.
pub trait PairwiseTransport {
    /// Our long-term identity key.
    fn self_public_key(&self) -> PublicKey;

    /// Our current ephemeral session key.
    fn self_session_key(&self) -> PublicKey;

    /// Our display name, as announced to conferences.
    fn self_name(&self) -> &[u8];

    /// Enqueue a packet on the reliable (lossless, ordered) channel.
    fn send_reliable(&mut self, link: ConnectionId, packet: &[u8]) -> bool;

    /// Enqueue a packet on the best-effort channel.
    fn send_lossy(&mut self, link: ConnectionId, packet: &[u8]) -> bool;

    /// Find an existing link to the given identity, if any.
    fn link_to(&self, key: &PublicKey) -> Option<ConnectionId>;

    /// Open a new link to the given identity. The returned link starts in
    /// [`LinkStatus::Connecting`] and is already owned by the caller (one
    /// reference held, no extra [`acquire`](Self::acquire) needed).
    fn open_link(&mut self, key: &PublicKey) -> Option<ConnectionId>;

    /// Tell the transport which session key to expect on this link, learned
    /// out-of-band from conference peer exchange.
    fn expect_session_key(&mut self, link: ConnectionId, session_key: &PublicKey);

    /// Take a reference on a link someone else opened, keeping it alive.
    fn acquire(&mut self, link: ConnectionId);

    /// Drop one reference. The transport tears the link down when the last
    /// reference is released.
    fn release(&mut self, link: ConnectionId);

    /// Current connectivity of a link.
    fn status(&self, link: ConnectionId) -> LinkStatus;

    /// Long-term and session keys of the remote endpoint.
    fn link_keys(&self, link: ConnectionId) -> Option<(PublicKey, PublicKey)>;
}
