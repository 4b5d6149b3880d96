//! Conference save/restore.
//!
//! Serializes every connected conference into one state section so a host
//! can resume its memberships after a restart. Unlike the wire codec the
//! on-disk layout is little-endian, and it is framed with the host save
//! file's section header: a payload length, a magic cookie and a section
//! type, all `u32` little-endian.
//!
//! Restored members all start out frozen; they thaw through the normal
//! rejoin flow once their links come back.

use bytes::{Buf, BufMut};
use confab_link::PairwiseTransport;

use crate::engine::{AddPeer, Conference};
use crate::error::ConferenceError;
use crate::peer::Peer;
use crate::session::{Session, SessionStatus};
use crate::types::{ConferenceKind, GroupId, GROUP_ID_LENGTH, MAX_NAME_LEN, MAX_TITLE_LEN};

/// Magic cookie in the upper half of a section header.
pub const SECTION_COOKIE: u16 = 0x01CE;

/// Section type assigned to conference state.
pub const SECTION_TYPE: u16 = 20;

/// Fixed part of one conference blob: kind, id, message number, lossy
/// number, our peer number, record count, title length.
const BLOB_HEADER_LEN: usize = 1 + GROUP_ID_LENGTH + 4 + 2 + 2 + 4 + 1;

/// Fixed part of one member record: both keys, number, last-active stamp,
/// nick length.
const RECORD_FIXED_LEN: usize = 32 + 32 + 2 + 8 + 1;

/// Members worth saving: every active peer except ourselves, then the
/// frozen list.
fn saved_peers(session: &Session) -> impl Iterator<Item = &Peer> {
    session
        .peers
        .iter()
        .filter(move |p| p.number != session.self_number)
        .chain(session.frozen.iter())
}

impl Conference {
    /// Exact size of [`save`](Self::save) output, header included.
    pub fn save_size(&self) -> usize {
        8 + self.payload_size()
    }

    fn payload_size(&self) -> usize {
        self.sessions
            .iter()
            .flatten()
            .filter(|s| s.status == SessionStatus::Connected)
            .map(|s| {
                let records: usize = saved_peers(s)
                    .map(|p| RECORD_FIXED_LEN + p.nick.len())
                    .sum();
                BLOB_HEADER_LEN + s.title.len() + records
            })
            .sum()
    }

    /// Serialize every connected conference as one framed state section.
    pub fn save(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.save_size());
        out.put_u32_le(self.payload_size() as u32);
        out.put_u32_le((u32::from(SECTION_COOKIE) << 16) | u32::from(SECTION_TYPE));

        for session in self.sessions.iter().flatten() {
            if session.status != SessionStatus::Connected {
                continue;
            }
            out.put_u8(session.kind.as_byte());
            out.put_slice(session.id.as_bytes());
            out.put_u32_le(session.message_number);
            out.put_u16_le(session.lossy_number);
            out.put_u16_le(session.self_number);
            out.put_u32_le(saved_peers(session).count() as u32);
            out.put_u8(session.title.len() as u8);
            out.put_slice(&session.title);

            for peer in saved_peers(session) {
                out.put_slice(peer.key.as_bytes());
                out.put_slice(peer.session_key.as_bytes());
                out.put_u16_le(peer.number);
                out.put_u64_le(peer.last_active);
                out.put_u8(peer.nick.len() as u8);
                out.put_slice(&peer.nick);
            }
        }
        out
    }

    /// Restore conferences from a section payload (header already
    /// stripped by the host's save-file walker).
    ///
    /// Returns `Ok(false)` when `section_type` belongs to someone else,
    /// leaving state untouched. A malformed payload is rejected as a
    /// whole; conferences parsed before the error stay loaded.
    pub fn load_section<T: PairwiseTransport>(
        &mut self,
        t: &mut T,
        data: &[u8],
        section_type: u16,
    ) -> Result<bool, ConferenceError> {
        if section_type != SECTION_TYPE {
            return Ok(false);
        }

        let mut buf = data;
        while buf.remaining() >= BLOB_HEADER_LEN {
            let kind = ConferenceKind::from_byte(buf.get_u8())
                .ok_or(ConferenceError::CorruptSave)?;
            let mut id_bytes = [0u8; GROUP_ID_LENGTH];
            buf.copy_to_slice(&mut id_bytes);
            let id = GroupId::from_bytes(id_bytes);
            let message_number = buf.get_u32_le();
            let lossy_number = buf.get_u16_le();
            let self_number = buf.get_u16_le();
            let count = buf.get_u32_le() as usize;

            let title_len = buf.get_u8() as usize;
            if title_len > MAX_TITLE_LEN || title_len > buf.remaining() {
                return Err(ConferenceError::CorruptSave);
            }
            let title = buf[..title_len].to_vec();
            buf.advance(title_len);

            if count.saturating_mul(RECORD_FIXED_LEN) > buf.remaining() {
                return Err(ConferenceError::CorruptSave);
            }
            let mut frozen = Vec::with_capacity(count);
            for _ in 0..count {
                if buf.remaining() < RECORD_FIXED_LEN {
                    return Err(ConferenceError::CorruptSave);
                }
                let mut key = [0u8; 32];
                buf.copy_to_slice(&mut key);
                let mut session_key = [0u8; 32];
                buf.copy_to_slice(&mut session_key);
                let number = buf.get_u16_le();
                let last_active = buf.get_u64_le();
                let nick_len = buf.get_u8() as usize;
                if nick_len > MAX_NAME_LEN || nick_len > buf.remaining() {
                    return Err(ConferenceError::CorruptSave);
                }
                let mut peer = Peer::new(
                    confab_link::PublicKey::from_bytes(key),
                    confab_link::PublicKey::from_bytes(session_key),
                    number,
                    last_active,
                );
                peer.nick = buf[..nick_len].to_vec();
                buf.advance(nick_len);
                peer.nick_known = true;
                // The session key predates the restart
                peer.session_key_current = false;
                frozen.push(peer);
            }

            if self.find_by_id(&id).is_some() {
                continue;
            }

            let group = self.allocate_slot()?;
            let mut session = Session::new(kind, id);
            session.status = SessionStatus::Connected;
            session.self_number = self_number;
            session.message_number = message_number;
            session.lossy_number = lossy_number;
            session.title = title;
            session.frozen = frozen;
            self.sessions[group as usize] = Some(session);

            let key = t.self_public_key();
            let session_key = t.self_session_key();
            if let AddPeer::Active(index) =
                self.add_peer(group, &key, key, session_key, self_number, true, false)
            {
                let name = t.self_name().to_vec();
                let _ = self.set_nick(group, index, &name, false);
            }
        }

        if buf.has_remaining() {
            return Err(ConferenceError::CorruptSave);
        }
        Ok(true)
    }
}
