//! Pairwise encrypted-link abstraction for confab.
//!
//! The conference engine never touches sockets or crypto. It talks to the
//! host's pairwise transport (encrypted friend links) through the
//! [`PairwiseTransport`] trait defined here, and identifies endpoints by
//! their long-term [`PublicKey`].
//!
//! [`memory::MemoryLink`] is an in-memory implementation used by the test
//! suites and by embedders that want a loopback harness.

pub mod memory;
mod transport;

pub use memory::MemoryLink;
pub use transport::PairwiseTransport;

use std::fmt;
use std::str::FromStr;

/// Length of a long-term or session public key in bytes.
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Long-term network identity, a 32-byte public key.
///
/// Displayed and parsed as a hex string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; PUBLIC_KEY_LENGTH]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 hex chars are enough to tell keys apart in logs
        write!(f, "PublicKey({}…)", hex::encode(&self.0[..4]))
    }
}

impl FromStr for PublicKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s).map_err(|_| KeyParseError::InvalidHex)?;
        let bytes: [u8; PUBLIC_KEY_LENGTH] = raw
            .try_into()
            .map_err(|_| KeyParseError::InvalidLength)?;
        Ok(Self(bytes))
    }
}

/// Error parsing a [`PublicKey`] from its hex form.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeyParseError {
    #[error("public key is not valid hex")]
    InvalidHex,

    #[error("public key must be 32 bytes")]
    InvalidLength,
}

/// Opaque handle to one pairwise connection owned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Connectivity of one pairwise link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// Handle is unknown or the link has been torn down.
    None,
    /// Handshake in progress, sends will fail.
    Connecting,
    /// Link is up, sends are accepted.
    Connected,
}
