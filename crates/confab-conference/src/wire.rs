//! Binary codec for conference packets.
//!
//! Pure encode/decode, no I/O and no engine state. Every wire layout is a
//! flat byte sequence with a leading one-byte discriminant and network
//! byte order (big-endian) integers. Decoding is strict: a packet shorter
//! than its minimum, an unknown discriminant, or an embedded length that
//! runs past the buffer is a [`WireError`], never a partial parse.

use bytes::{Buf, BufMut};
use confab_link::PublicKey;

use crate::error::WireError;
use crate::types::{ConferenceKind, GroupId, GROUP_ID_LENGTH, MAX_NAME_LEN};

// ── Discriminants ───────────────────────────────────────────────────────

/// Invite family, carried over the friend channel before the group exists.
pub const PACKET_INVITE: u8 = 96;
/// Announces that a link now carries a particular conference.
pub const PACKET_ONLINE: u8 = 97;
/// Point-to-point control messages within a conference.
pub const PACKET_DIRECT: u8 = 98;
/// Flood-relayed reliable conference message.
pub const PACKET_MESSAGE: u8 = 99;
/// Request to resume a frozen membership.
pub const PACKET_REJOIN: u8 = 100;
/// Best-effort conference message.
pub const PACKET_LOSSY: u8 = 199;

/// Invite sub-ids.
pub const INVITE_ID: u8 = 0;
pub const INVITE_RESPONSE_ID: u8 = 1;

/// Direct sub-ids.
pub const PEER_INTRODUCED_ID: u8 = 1;
pub const PEER_QUERY_ID: u8 = 8;
pub const PEER_RESPONSE_ID: u8 = 9;
pub const PEER_TITLE_ID: u8 = 10;

/// Reliable message sub-ids.
pub const MESSAGE_PING: u8 = 0;
pub const MESSAGE_NEW_PEER: u8 = 16;
pub const MESSAGE_KILL_PEER: u8 = 17;
pub const MESSAGE_FREEZE_PEER: u8 = 18;
pub const MESSAGE_NAME: u8 = 48;
pub const MESSAGE_TITLE: u8 = 49;
pub const MESSAGE_CHAT: u8 = 64;
pub const MESSAGE_ACTION: u8 = 65;

/// Full size of an invite packet: discriminant, sub-id, group number,
/// kind, conference id.
pub const INVITE_PACKET_SIZE: usize = 1 + 1 + 2 + 1 + GROUP_ID_LENGTH;
const INVITE_RESPONSE_PACKET_SIZE: usize = INVITE_PACKET_SIZE + 2;
const ONLINE_PACKET_SIZE: usize = 1 + 2 + 1 + GROUP_ID_LENGTH;
const REJOIN_PACKET_MIN: usize = 1 + 1 + GROUP_ID_LENGTH;
const MESSAGE_PACKET_MIN: usize = 1 + 2 + 2 + 4 + 1;
const LOSSY_PACKET_MIN: usize = 1 + 2 + 2 + 2 + 1;
/// Fixed part of one peer record in a peer-response: number + both keys +
/// nick length byte.
pub const PEER_RECORD_MIN: usize = 2 + 32 + 32 + 1;

// ── Parsed packets ──────────────────────────────────────────────────────

/// Invitation to a conference, sent over the friend channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invite {
    /// The inviter's number for the conference.
    pub group: u16,
    pub kind: ConferenceKind,
    pub id: GroupId,
}

/// Acceptance of an [`Invite`], echoing it with the joiner's own number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteResponse {
    /// The joiner's number for the conference.
    pub joiner_group: u16,
    /// The inviter's number, echoed from the invite.
    pub inviter_group: u16,
    pub kind: ConferenceKind,
    pub id: GroupId,
}

/// "This link carries conference `id`, numbered `group` on my side."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Online {
    pub group: u16,
    pub kind: ConferenceKind,
    pub id: GroupId,
}

/// "I was frozen in conference `id`, let me back in."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejoin {
    pub kind: ConferenceKind,
    pub id: GroupId,
}

/// One member entry in a peer-response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub number: u16,
    pub key: PublicKey,
    pub session_key: PublicKey,
    pub nick: Vec<u8>,
}

/// Body of a direct packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectPayload {
    /// "Your introduction has served its purpose, I am connected."
    Introduced,
    /// Request for the full member list.
    Query,
    /// A chunk of the member list.
    Response(Vec<PeerRecord>),
    /// Title sync for a freshly introduced peer.
    Title(Vec<u8>),
}

/// Inner frame of a reliable conference message, without the group number.
///
/// Relayed verbatim, so re-encoding a decoded frame must be byte-exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFrame {
    /// Originating member's peer number.
    pub peer: u16,
    /// Originator's monotonic message number.
    pub number: u32,
    /// One of the `MESSAGE_*` sub-ids.
    pub id: u8,
    pub payload: Vec<u8>,
}

/// A best-effort conference packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LossyFrame {
    pub group: u16,
    pub peer: u16,
    /// Originator's rolling 16-bit lossy sequence number.
    pub number: u16,
    /// Custom sub-id in 192..=254.
    pub id: u8,
    pub payload: Vec<u8>,
}

/// Any packet of the reliable conference families.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Invite(Invite),
    InviteResponse(InviteResponse),
    Online(Online),
    Rejoin(Rejoin),
    Direct { group: u16, payload: DirectPayload },
    Message { group: u16, frame: MessageFrame },
}

// ── Decoding ────────────────────────────────────────────────────────────

fn get_kind(buf: &mut &[u8]) -> Result<ConferenceKind, WireError> {
    let byte = buf.get_u8();
    ConferenceKind::from_byte(byte).ok_or(WireError::BadKind(byte))
}

fn get_group_id(buf: &mut &[u8]) -> GroupId {
    let mut bytes = [0u8; GROUP_ID_LENGTH];
    buf.copy_to_slice(&mut bytes);
    GroupId::from_bytes(bytes)
}

fn get_public_key(buf: &mut &[u8]) -> PublicKey {
    let mut bytes = [0u8; 32];
    buf.copy_to_slice(&mut bytes);
    PublicKey::from_bytes(bytes)
}

impl Packet {
    /// Decode a reliable-channel conference packet, discriminant included.
    pub fn decode(data: &[u8]) -> Result<Packet, WireError> {
        let mut buf = data;
        if buf.remaining() < 2 {
            return Err(WireError::Truncated);
        }
        match buf.get_u8() {
            PACKET_INVITE => Self::decode_invite(buf, data.len()),
            PACKET_ONLINE => {
                if data.len() != ONLINE_PACKET_SIZE {
                    return Err(WireError::BadLength);
                }
                let group = buf.get_u16();
                let kind = get_kind(&mut buf)?;
                let id = get_group_id(&mut buf);
                Ok(Packet::Online(Online { group, kind, id }))
            }
            PACKET_REJOIN => {
                if data.len() < REJOIN_PACKET_MIN {
                    return Err(WireError::Truncated);
                }
                let kind = get_kind(&mut buf)?;
                let id = get_group_id(&mut buf);
                Ok(Packet::Rejoin(Rejoin { kind, id }))
            }
            PACKET_DIRECT => {
                if data.len() < 1 + 2 + 1 {
                    return Err(WireError::Truncated);
                }
                let group = buf.get_u16();
                let payload = decode_direct(buf)?;
                Ok(Packet::Direct { group, payload })
            }
            PACKET_MESSAGE => {
                if data.len() < MESSAGE_PACKET_MIN {
                    return Err(WireError::Truncated);
                }
                let group = buf.get_u16();
                let frame = MessageFrame {
                    peer: buf.get_u16(),
                    number: buf.get_u32(),
                    id: buf.get_u8(),
                    payload: buf.to_vec(),
                };
                Ok(Packet::Message { group, frame })
            }
            other => Err(WireError::BadDiscriminant(other)),
        }
    }

    fn decode_invite(mut buf: &[u8], total: usize) -> Result<Packet, WireError> {
        match buf.get_u8() {
            INVITE_ID => {
                if total != INVITE_PACKET_SIZE {
                    return Err(WireError::BadLength);
                }
                let group = buf.get_u16();
                let kind = get_kind(&mut buf)?;
                let id = get_group_id(&mut buf);
                Ok(Packet::Invite(Invite { group, kind, id }))
            }
            INVITE_RESPONSE_ID => {
                if total != INVITE_RESPONSE_PACKET_SIZE {
                    return Err(WireError::BadLength);
                }
                let joiner_group = buf.get_u16();
                let inviter_group = buf.get_u16();
                let kind = get_kind(&mut buf)?;
                let id = get_group_id(&mut buf);
                Ok(Packet::InviteResponse(InviteResponse {
                    joiner_group,
                    inviter_group,
                    kind,
                    id,
                }))
            }
            other => Err(WireError::BadDiscriminant(other)),
        }
    }

    /// Encode to the wire layout, discriminant included.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Packet::Invite(p) => {
                out.put_u8(PACKET_INVITE);
                out.put_u8(INVITE_ID);
                out.put_u16(p.group);
                out.put_u8(p.kind.as_byte());
                out.put_slice(p.id.as_bytes());
            }
            Packet::InviteResponse(p) => {
                out.put_u8(PACKET_INVITE);
                out.put_u8(INVITE_RESPONSE_ID);
                out.put_u16(p.joiner_group);
                out.put_u16(p.inviter_group);
                out.put_u8(p.kind.as_byte());
                out.put_slice(p.id.as_bytes());
            }
            Packet::Online(p) => {
                out.put_u8(PACKET_ONLINE);
                out.put_u16(p.group);
                out.put_u8(p.kind.as_byte());
                out.put_slice(p.id.as_bytes());
            }
            Packet::Rejoin(p) => {
                out.put_u8(PACKET_REJOIN);
                out.put_u8(p.kind.as_byte());
                out.put_slice(p.id.as_bytes());
            }
            Packet::Direct { group, payload } => {
                out.put_u8(PACKET_DIRECT);
                out.put_u16(*group);
                encode_direct(&mut out, payload);
            }
            Packet::Message { group, frame } => {
                out.put_u8(PACKET_MESSAGE);
                out.put_u16(*group);
                frame.encode_into(&mut out);
            }
        }
        out
    }
}

fn decode_direct(mut buf: &[u8]) -> Result<DirectPayload, WireError> {
    match buf.get_u8() {
        PEER_INTRODUCED_ID => Ok(DirectPayload::Introduced),
        PEER_QUERY_ID => Ok(DirectPayload::Query),
        PEER_RESPONSE_ID => {
            let mut records = Vec::new();
            while buf.remaining() >= PEER_RECORD_MIN {
                let number = buf.get_u16();
                let key = get_public_key(&mut buf);
                let session_key = get_public_key(&mut buf);
                let nick_len = buf.get_u8() as usize;
                if nick_len > MAX_NAME_LEN || nick_len > buf.remaining() {
                    return Err(WireError::BadLength);
                }
                let nick = buf[..nick_len].to_vec();
                buf.advance(nick_len);
                records.push(PeerRecord {
                    number,
                    key,
                    session_key,
                    nick,
                });
            }
            // A trailing fragment shorter than one record is ignored
            Ok(DirectPayload::Response(records))
        }
        PEER_TITLE_ID => Ok(DirectPayload::Title(buf.to_vec())),
        other => Err(WireError::BadDiscriminant(other)),
    }
}

fn encode_direct(out: &mut Vec<u8>, payload: &DirectPayload) {
    match payload {
        DirectPayload::Introduced => out.put_u8(PEER_INTRODUCED_ID),
        DirectPayload::Query => out.put_u8(PEER_QUERY_ID),
        DirectPayload::Response(records) => {
            out.put_u8(PEER_RESPONSE_ID);
            for record in records {
                record.encode_into(out);
            }
        }
        DirectPayload::Title(title) => {
            out.put_u8(PEER_TITLE_ID);
            out.put_slice(title);
        }
    }
}

impl PeerRecord {
    /// Encoded size of this record.
    pub fn encoded_len(&self) -> usize {
        PEER_RECORD_MIN + self.nick.len()
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.put_u16(self.number);
        out.put_slice(self.key.as_bytes());
        out.put_slice(self.session_key.as_bytes());
        out.put_u8(self.nick.len() as u8);
        out.put_slice(&self.nick);
    }
}

impl MessageFrame {
    /// Append the frame (peer, number, id, payload) without any framing.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.put_u16(self.peer);
        out.put_u32(self.number);
        out.put_u8(self.id);
        out.put_slice(&self.payload);
    }
}

impl LossyFrame {
    pub fn decode(data: &[u8]) -> Result<LossyFrame, WireError> {
        if data.len() < LOSSY_PACKET_MIN {
            return Err(WireError::Truncated);
        }
        let mut buf = data;
        if buf.get_u8() != PACKET_LOSSY {
            return Err(WireError::BadDiscriminant(data[0]));
        }
        Ok(LossyFrame {
            group: buf.get_u16(),
            peer: buf.get_u16(),
            number: buf.get_u16(),
            id: buf.get_u8(),
            payload: buf.to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(LOSSY_PACKET_MIN + self.payload.len());
        out.put_u8(PACKET_LOSSY);
        out.put_u16(self.group);
        out.put_u16(self.peer);
        out.put_u16(self.number);
        out.put_u8(self.id);
        out.put_slice(&self.payload);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> PublicKey {
        PublicKey::from_bytes([seed; 32])
    }

    fn gid(seed: u8) -> GroupId {
        GroupId::from_bytes([seed; 32])
    }

    #[test]
    fn invite_roundtrip() {
        let packet = Packet::Invite(Invite {
            group: 3,
            kind: ConferenceKind::Text,
            id: gid(7),
        });
        let bytes = packet.encode();
        assert_eq!(bytes.len(), 37);
        assert_eq!(bytes[0], PACKET_INVITE);
        assert_eq!(Packet::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn invite_response_roundtrip() {
        let packet = Packet::InviteResponse(InviteResponse {
            joiner_group: 1,
            inviter_group: 9,
            kind: ConferenceKind::Text,
            id: gid(7),
        });
        let bytes = packet.encode();
        assert_eq!(bytes.len(), 39);
        assert_eq!(Packet::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn online_requires_exact_length() {
        let packet = Packet::Online(Online {
            group: 0,
            kind: ConferenceKind::Text,
            id: gid(1),
        });
        let mut bytes = packet.encode();
        assert_eq!(Packet::decode(&bytes).unwrap(), packet);

        bytes.push(0);
        assert_eq!(Packet::decode(&bytes), Err(WireError::BadLength));
    }

    #[test]
    fn message_frame_roundtrip_with_payload() {
        let packet = Packet::Message {
            group: 2,
            frame: MessageFrame {
                peer: 5,
                number: 0xDEADBEEF,
                id: MESSAGE_CHAT,
                payload: b"hello mesh".to_vec(),
            },
        };
        assert_eq!(Packet::decode(&packet.encode()).unwrap(), packet);
    }

    #[test]
    fn ping_has_empty_payload() {
        let packet = Packet::Message {
            group: 0,
            frame: MessageFrame {
                peer: 1,
                number: 42,
                id: MESSAGE_PING,
                payload: Vec::new(),
            },
        };
        let bytes = packet.encode();
        assert_eq!(bytes.len(), 10);
        assert_eq!(Packet::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn peer_response_roundtrip() {
        let packet = Packet::Direct {
            group: 4,
            payload: DirectPayload::Response(vec![
                PeerRecord {
                    number: 0,
                    key: key(1),
                    session_key: key(2),
                    nick: b"alice".to_vec(),
                },
                PeerRecord {
                    number: 7,
                    key: key(3),
                    session_key: key(4),
                    nick: Vec::new(),
                },
            ]),
        };
        assert_eq!(Packet::decode(&packet.encode()).unwrap(), packet);
    }

    #[test]
    fn peer_response_rejects_overlong_nick_field() {
        let mut bytes = Packet::Direct {
            group: 4,
            payload: DirectPayload::Response(vec![PeerRecord {
                number: 0,
                key: key(1),
                session_key: key(2),
                nick: Vec::new(),
            }]),
        }
        .encode();
        // Claim a 5-byte nick with no bytes behind it
        let last = bytes.len() - 1;
        bytes[last] = 5;
        assert_eq!(Packet::decode(&bytes), Err(WireError::BadLength));
    }

    #[test]
    fn lossy_roundtrip() {
        let frame = LossyFrame {
            group: 1,
            peer: 2,
            number: 300,
            id: 200,
            payload: vec![1, 2, 3],
        };
        assert_eq!(LossyFrame::decode(&frame.encode()).unwrap(), frame);
    }

    #[test]
    fn truncated_packets_fail() {
        assert_eq!(Packet::decode(&[]), Err(WireError::Truncated));
        assert_eq!(Packet::decode(&[PACKET_MESSAGE]), Err(WireError::Truncated));
        assert_eq!(
            Packet::decode(&[PACKET_MESSAGE, 0, 0, 0, 0]),
            Err(WireError::Truncated)
        );
        assert_eq!(LossyFrame::decode(&[PACKET_LOSSY, 0, 0]), Err(WireError::Truncated));
    }

    #[test]
    fn unknown_discriminant_fails() {
        assert_eq!(Packet::decode(&[42, 0, 0, 0]), Err(WireError::BadDiscriminant(42)));
    }

    #[test]
    fn bad_kind_byte_fails() {
        let mut bytes = Packet::Online(Online {
            group: 0,
            kind: ConferenceKind::Text,
            id: gid(1),
        })
        .encode();
        bytes[3] = 9;
        assert_eq!(Packet::decode(&bytes), Err(WireError::BadKind(9)));
    }
}
