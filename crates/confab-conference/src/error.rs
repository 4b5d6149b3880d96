/// Error taxonomy for the conference engine.
///
/// Every public operation returns an explicit `Result`; nothing in this
/// crate panics on untrusted input. Malformed network packets surface as
/// [`WireError`] internally and are dropped by the dispatch layer, never
/// partially applied.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConferenceError {
    #[error("no conference with number {0}")]
    InvalidGroup(u16),

    #[error("no such peer in conference")]
    InvalidPeer,

    #[error("not connected to the conference")]
    NotConnected,

    #[error("message delivery failed on every online link")]
    AllSendsFailed,

    #[error("payload of {len} bytes exceeds maximum {max}")]
    TooLong { len: usize, max: usize },

    #[error("title must be 1..=128 bytes")]
    InvalidTitle,

    #[error("no title has been set")]
    NoTitle,

    #[error("no free close-connection slot")]
    LinkSlotsFull,

    #[error("packet was not accepted by the transport")]
    SendFailed,

    #[error("already in a conference with this id")]
    DuplicateGroup,

    #[error("invite payload is malformed or of the wrong kind")]
    InvalidInvite,

    #[error("lossy packet id must be in 192..=254, got {0}")]
    InvalidLossyId(u8),

    #[error("malformed conference save section")]
    CorruptSave,
}

/// Decode failure for an inbound conference packet.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("packet shorter than its minimum length")]
    Truncated,

    #[error("unknown packet discriminant {0}")]
    BadDiscriminant(u8),

    #[error("unknown conference kind byte {0}")]
    BadKind(u8),

    #[error("length field inconsistent with packet size")]
    BadLength,
}
