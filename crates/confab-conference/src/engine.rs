//! The conference engine.
//!
//! [`Conference`] owns every group's state and is a pure decision engine:
//! it performs no I/O of its own. The host feeds it inbound packets and
//! link status changes, calls its API, and drives [`Conference::tick`]
//! from its event loop; outbound traffic goes through the
//! [`PairwiseTransport`] passed into each operation, and everything the
//! host should react to is queued as [`ConferenceEvent`]s.
//!
//! All handlers and the tick are serialized by the caller; nothing here
//! blocks or retries internally.

use confab_link::{ConnectionId, LinkStatus, PairwiseTransport, PublicKey};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace, warn};

use crate::error::ConferenceError;
use crate::event::ConferenceEvent;
use crate::links::{LinkReasons, LinkState};
use crate::peer::Peer;
use crate::session::{Session, SessionStatus};
use crate::topology::{distance, ClosestChange};
use crate::types::{
    ConferenceKind, GroupId, MessageKind, FREEZE_TIMEOUT, GROUP_ID_LENGTH, LOSSY_ID_MAX,
    LOSSY_ID_MIN, MAX_MESSAGE_DATA_LEN, MAX_NAME_LEN, MAX_TITLE_LEN, MAX_TRANSPORT_PAYLOAD,
    PING_INTERVAL,
};
use crate::wire::{
    DirectPayload, Invite, InviteResponse, LossyFrame, MessageFrame, Online, Packet, PeerRecord,
    Rejoin, INVITE_PACKET_SIZE, MESSAGE_ACTION, MESSAGE_CHAT, MESSAGE_FREEZE_PEER,
    MESSAGE_KILL_PEER, MESSAGE_NAME, MESSAGE_NEW_PEER, MESSAGE_PING, MESSAGE_TITLE,
    PACKET_DIRECT, PEER_RESPONSE_ID,
};

/// Cookie handed to [`Conference::join`]: invite packet minus discriminant
/// and sub-id.
const INVITE_COOKIE_SIZE: usize = INVITE_PACKET_SIZE - 2;

/// Attempts at drawing an unused random peer number for a joiner.
const PEER_NUMBER_TRIES: u32 = 32;

/// Outcome of the add-or-update membership operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddPeer {
    /// Peer is active at this index.
    Active(usize),
    /// Known frozen peer; only its session key was refreshed.
    FrozenUpdated,
    /// The peer number is bound to a different identity.
    Collision,
    NoGroup,
}

/// Engine owning all conference state for one node.
pub struct Conference {
    pub(crate) sessions: Vec<Option<Session>>,
    events: Vec<ConferenceEvent>,
    lossy_registered: [bool; 256],
    rng: StdRng,
    now: u64,
}

impl Conference {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_os_rng())
    }

    /// Deterministic engine for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            sessions: Vec::new(),
            events: Vec::new(),
            lossy_registered: [false; 256],
            rng,
            now: 0,
        }
    }

    /// Take every event queued since the last drain.
    pub fn drain_events(&mut self) -> Vec<ConferenceEvent> {
        std::mem::take(&mut self.events)
    }

    // ── Queries ─────────────────────────────────────────────────────────

    fn session(&self, group: u16) -> Result<&Session, ConferenceError> {
        self.sessions
            .get(group as usize)
            .and_then(|s| s.as_ref())
            .ok_or(ConferenceError::InvalidGroup(group))
    }

    fn session_mut(&mut self, group: u16) -> Result<&mut Session, ConferenceError> {
        self.sessions
            .get_mut(group as usize)
            .and_then(|s| s.as_mut())
            .ok_or(ConferenceError::InvalidGroup(group))
    }

    /// Number of allocated conference slots, including trailing gaps.
    pub fn chat_count(&self) -> usize {
        self.sessions.iter().filter(|s| s.is_some()).count()
    }

    /// Numbers of every live conference.
    pub fn chat_list(&self) -> Vec<u16> {
        self.sessions
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i as u16))
            .collect()
    }

    /// Conference number currently holding `id`, if any.
    pub fn find_by_id(&self, id: &GroupId) -> Option<u16> {
        self.sessions
            .iter()
            .enumerate()
            .find(|(_, s)| s.as_ref().map(|s| s.id == *id).unwrap_or(false))
            .map(|(i, _)| i as u16)
    }

    pub fn kind(&self, group: u16) -> Result<ConferenceKind, ConferenceError> {
        Ok(self.session(group)?.kind)
    }

    pub fn group_id(&self, group: u16) -> Result<GroupId, ConferenceError> {
        Ok(self.session(group)?.id)
    }

    /// True once our own membership has been confirmed.
    pub fn is_connected(&self, group: u16) -> Result<bool, ConferenceError> {
        Ok(self.session(group)?.status == SessionStatus::Connected)
    }

    pub fn peer_count(&self, group: u16) -> Result<usize, ConferenceError> {
        Ok(self.session(group)?.peers.len())
    }

    pub fn frozen_count(&self, group: u16) -> Result<usize, ConferenceError> {
        Ok(self.session(group)?.frozen.len())
    }

    fn peer_at(&self, group: u16, index: usize, frozen: bool) -> Result<&Peer, ConferenceError> {
        let s = self.session(group)?;
        let list = if frozen { &s.frozen } else { &s.peers };
        list.get(index).ok_or(ConferenceError::InvalidPeer)
    }

    pub fn peer_name(&self, group: u16, index: usize) -> Result<&[u8], ConferenceError> {
        Ok(&self.peer_at(group, index, false)?.nick)
    }

    pub fn peer_key(&self, group: u16, index: usize) -> Result<PublicKey, ConferenceError> {
        Ok(self.peer_at(group, index, false)?.key)
    }

    pub fn peer_number(&self, group: u16, index: usize) -> Result<u16, ConferenceError> {
        Ok(self.peer_at(group, index, false)?.number)
    }

    /// True if the active peer at `index` is this node.
    pub fn is_own_peer(&self, group: u16, index: usize) -> Result<bool, ConferenceError> {
        let number = self.peer_at(group, index, false)?.number;
        let s = self.session(group)?;
        Ok(s.status == SessionStatus::Connected && number == s.self_number)
    }

    pub fn frozen_name(&self, group: u16, index: usize) -> Result<&[u8], ConferenceError> {
        Ok(&self.peer_at(group, index, true)?.nick)
    }

    pub fn frozen_key(&self, group: u16, index: usize) -> Result<PublicKey, ConferenceError> {
        Ok(self.peer_at(group, index, true)?.key)
    }

    pub fn frozen_number(&self, group: u16, index: usize) -> Result<u16, ConferenceError> {
        Ok(self.peer_at(group, index, true)?.number)
    }

    pub fn frozen_last_active(&self, group: u16, index: usize) -> Result<u64, ConferenceError> {
        Ok(self.peer_at(group, index, true)?.last_active)
    }

    pub fn title(&self, group: u16) -> Result<&[u8], ConferenceError> {
        let s = self.session(group)?;
        if s.title.is_empty() {
            return Err(ConferenceError::NoTitle);
        }
        Ok(&s.title)
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Create a conference; we are its founder and peer 0.
    pub fn create<T: PairwiseTransport>(
        &mut self,
        t: &mut T,
        kind: ConferenceKind,
    ) -> Result<u16, ConferenceError> {
        let group = self.allocate_slot()?;
        let id = GroupId::random(&mut self.rng);
        let mut session = Session::new(kind, id);
        session.status = SessionStatus::Connected;
        session.self_number = 0;
        self.sessions[group as usize] = Some(session);
        debug!(group, %id, "created conference");

        let key = t.self_public_key();
        let session_key = t.self_session_key();
        if let AddPeer::Active(index) = self.add_peer(group, &key, key, session_key, 0, true, false)
        {
            let name = t.self_name().to_vec();
            let _ = self.set_nick(group, index, &name, false);
        }
        Ok(group)
    }

    /// Leave and delete a conference.
    ///
    /// `permanent` announces a kill (drop us entirely); otherwise peers
    /// freeze our membership so we can rejoin later.
    pub fn delete<T: PairwiseTransport>(
        &mut self,
        t: &mut T,
        group: u16,
        permanent: bool,
    ) -> Result<(), ConferenceError> {
        let self_number = self.session(group)?.self_number;
        let leave_id = if permanent {
            MESSAGE_KILL_PEER
        } else {
            MESSAGE_FREEZE_PEER
        };
        // Best effort; an isolated group simply leaves silently
        let _ = self.broadcast(t, group, leave_id, &self_number.to_be_bytes());

        let s = self.session_mut(group)?;
        let mut to_release = Vec::new();
        for (i, link) in s.links.iter() {
            to_release.push((i, link.connection));
        }
        for (i, connection) in to_release {
            s.links.clear(i);
            t.release(connection);
        }

        let peer_numbers: Vec<u16> = s.peers.iter().map(|p| p.number).collect();
        for peer in peer_numbers {
            self.events.push(ConferenceEvent::PeerLeft { group, peer });
        }
        self.events.push(ConferenceEvent::Deleted { group });

        self.sessions[group as usize] = None;
        while matches!(self.sessions.last(), Some(None)) {
            self.sessions.pop();
        }
        debug!(group, "deleted conference");
        Ok(())
    }

    /// Invite the friend reachable over `link` to a conference.
    pub fn invite<T: PairwiseTransport>(
        &mut self,
        t: &mut T,
        group: u16,
        link: ConnectionId,
    ) -> Result<(), ConferenceError> {
        let s = self.session(group)?;
        let packet = Packet::Invite(Invite {
            group,
            kind: s.kind,
            id: s.id,
        });
        if !t.send_reliable(link, &packet.encode()) {
            return Err(ConferenceError::SendFailed);
        }
        Ok(())
    }

    /// Accept an invite received over `link`.
    ///
    /// `cookie` is the bytes from [`ConferenceEvent::InviteReceived`].
    pub fn join<T: PairwiseTransport>(
        &mut self,
        t: &mut T,
        link: ConnectionId,
        kind: ConferenceKind,
        cookie: &[u8],
    ) -> Result<u16, ConferenceError> {
        if cookie.len() != INVITE_COOKIE_SIZE {
            return Err(ConferenceError::InvalidInvite);
        }
        let inviter_group = u16::from_be_bytes([cookie[0], cookie[1]]);
        if cookie[2] != kind.as_byte() {
            return Err(ConferenceError::InvalidInvite);
        }
        let mut id_bytes = [0u8; GROUP_ID_LENGTH];
        id_bytes.copy_from_slice(&cookie[3..]);
        let id = GroupId::from_bytes(id_bytes);

        if self.find_by_id(&id).is_some() {
            return Err(ConferenceError::DuplicateGroup);
        }

        let group = self.allocate_slot()?;
        self.sessions[group as usize] = Some(Session::new(kind, id));

        let response = Packet::InviteResponse(InviteResponse {
            joiner_group: group,
            inviter_group,
            kind,
            id,
        });
        if !t.send_reliable(link, &response.encode()) {
            self.sessions[group as usize] = None;
            while matches!(self.sessions.last(), Some(None)) {
                self.sessions.pop();
            }
            return Err(ConferenceError::SendFailed);
        }

        if let Some(slot) = self.add_link(t, group, link, LinkReasons::INTRODUCER, true) {
            if let Ok(s) = self.session_mut(group) {
                if let Some(l) = s.links.get_mut(slot) {
                    l.remote_group = Some(inviter_group);
                    l.state = LinkState::Online;
                }
            }
        }
        self.send_peer_query(t, link, inviter_group);
        debug!(group, %id, "joined conference, waiting for peer sync");
        Ok(group)
    }

    // ── Messaging API ───────────────────────────────────────────────────

    /// Broadcast a chat message. Returns the number of links it left on.
    pub fn send_message<T: PairwiseTransport>(
        &mut self,
        t: &mut T,
        group: u16,
        payload: &[u8],
    ) -> Result<usize, ConferenceError> {
        self.broadcast(t, group, MESSAGE_CHAT, payload)
    }

    /// Broadcast a `/me` action.
    pub fn send_action<T: PairwiseTransport>(
        &mut self,
        t: &mut T,
        group: u16,
        payload: &[u8],
    ) -> Result<usize, ConferenceError> {
        self.broadcast(t, group, MESSAGE_ACTION, payload)
    }

    /// Broadcast a custom lossy packet with a registered sub-id.
    pub fn send_lossy<T: PairwiseTransport>(
        &mut self,
        t: &mut T,
        group: u16,
        id: u8,
        payload: &[u8],
    ) -> Result<usize, ConferenceError> {
        if !(LOSSY_ID_MIN..=LOSSY_ID_MAX).contains(&id) {
            return Err(ConferenceError::InvalidLossyId(id));
        }
        let s = self.session(group)?;
        if s.status != SessionStatus::Connected || s.links.online_count() == 0 {
            return Err(ConferenceError::NotConnected);
        }
        let frame = LossyFrame {
            group: 0, // rewritten per target
            peer: s.self_number,
            number: s.lossy_number,
            id,
            payload: payload.to_vec(),
        };
        let sent = self.send_lossy_all_links(t, group, &frame, None);
        if sent == 0 {
            return Err(ConferenceError::AllSendsFailed);
        }
        let s = self.session_mut(group)?;
        s.lossy_number = s.lossy_number.wrapping_add(1);
        Ok(sent)
    }

    /// Declare interest in a custom lossy sub-id. Unregistered ids are
    /// dropped without relay.
    pub fn register_lossy(&mut self, id: u8) -> Result<(), ConferenceError> {
        if !(LOSSY_ID_MIN..=LOSSY_ID_MAX).contains(&id) {
            return Err(ConferenceError::InvalidLossyId(id));
        }
        self.lossy_registered[id as usize] = true;
        Ok(())
    }

    /// Set and broadcast the conference title.
    pub fn set_title<T: PairwiseTransport>(
        &mut self,
        t: &mut T,
        group: u16,
        title: &[u8],
    ) -> Result<(), ConferenceError> {
        if title.is_empty() || title.len() > MAX_TITLE_LEN {
            return Err(ConferenceError::InvalidTitle);
        }
        let s = self.session_mut(group)?;
        if s.title == title {
            return Ok(());
        }
        s.title = title.to_vec();
        if s.peers.len() <= 1 {
            // Alone; the title travels with the next peer sync
            return Ok(());
        }
        self.broadcast(t, group, MESSAGE_TITLE, title).map(|_| ())
    }

    /// Our name changed; re-announce it to every conference on the next
    /// tick.
    pub fn announce_name_change(&mut self) {
        for session in self.sessions.iter_mut().flatten() {
            if session.status == SessionStatus::Connected {
                session.announce_name = true;
            }
        }
    }

    // ── Inbound dispatch ────────────────────────────────────────────────

    /// Handle a reliable-channel conference packet received on `link`.
    pub fn handle_reliable<T: PairwiseTransport>(
        &mut self,
        t: &mut T,
        link: ConnectionId,
        data: &[u8],
    ) {
        let packet = match Packet::decode(data) {
            Ok(packet) => packet,
            Err(err) => {
                trace!(%link, %err, "dropping malformed packet");
                return;
            }
        };
        match packet {
            Packet::Invite(invite) => self.handle_invite(link, &invite, data),
            Packet::InviteResponse(response) => self.handle_invite_response(t, link, &response),
            Packet::Online(online) => self.handle_online(t, link, &online),
            Packet::Rejoin(rejoin) => self.handle_rejoin(t, link, &rejoin),
            Packet::Direct { group, payload } => self.handle_direct(t, link, group, payload),
            Packet::Message { group, frame } => self.handle_message(t, link, group, frame),
        }
    }

    fn handle_invite(&mut self, link: ConnectionId, invite: &Invite, raw: &[u8]) {
        if let Some(existing) = self.find_by_id(&invite.id) {
            trace!(group = existing, "already in invited conference");
            return;
        }
        self.events.push(ConferenceEvent::InviteReceived {
            link,
            kind: invite.kind,
            cookie: raw[2..].to_vec(),
        });
    }

    fn handle_invite_response<T: PairwiseTransport>(
        &mut self,
        t: &mut T,
        link: ConnectionId,
        response: &InviteResponse,
    ) {
        let group = response.inviter_group;
        let Ok(s) = self.session(group) else { return };
        if s.kind != response.kind || s.id != response.id {
            return;
        }
        let Some((key, session_key)) = t.link_keys(link) else {
            return;
        };

        // Draw a peer number nobody holds
        let mut number = self.rng.random::<u16>();
        let mut tries = 0;
        loop {
            let Ok(s) = self.session(group) else { return };
            if !s.number_in_use(number) {
                break;
            }
            number = self.rng.random::<u16>();
            tries += 1;
            if tries > PEER_NUMBER_TRIES {
                warn!(group, "could not find a free peer number");
                return;
            }
        }

        let self_key = t.self_public_key();
        let AddPeer::Active(_) =
            self.add_peer(group, &self_key, key, session_key, number, true, true)
        else {
            return;
        };

        if let Some(slot) = self.add_link(t, group, link, LinkReasons::INTRODUCING, true) {
            if let Ok(s) = self.session_mut(group) {
                if let Some(l) = s.links.get_mut(slot) {
                    l.remote_group = Some(response.joiner_group);
                    l.state = LinkState::Online;
                }
            }
        }
        self.announce_new_peer(t, group, number, &key, &session_key);
    }

    fn handle_online<T: PairwiseTransport>(
        &mut self,
        t: &mut T,
        link: ConnectionId,
        online: &Online,
    ) {
        let Some(group) = self.find_by_kind_id(online.kind, &online.id) else {
            return;
        };
        let Ok(s) = self.session(group) else { return };
        let Some(slot) = s.links.find(link) else { return };
        let Some(l) = s.links.get(slot) else { return };
        if l.state == LinkState::Online {
            return;
        }
        let first_online = s.links.online_count() == 0;
        let introducer = l.reasons.contains(LinkReasons::INTRODUCER);
        let introducing = l.reasons.contains(LinkReasons::INTRODUCING);

        if first_online || introducer {
            self.send_peer_query(t, link, online.group);
        }

        if let Ok(s) = self.session_mut(group) {
            if let Some(l) = s.links.get_mut(slot) {
                l.remote_group = Some(online.group);
                l.state = LinkState::Online;
            }
        }
        self.send_online(t, group, link);

        if introducing {
            // Vouch for the freshly joined peer again now that the link
            // carries the conference
            if let Some((key, _)) = t.link_keys(link) {
                let peer = self
                    .session(group)
                    .ok()
                    .and_then(|s| s.peer_index_by_key(&key).map(|i| s.peers[i].clone()));
                if let Some(peer) = peer {
                    self.announce_new_peer(t, group, peer.number, &peer.key, &peer.session_key);
                    if let Ok(s) = self.session_mut(group) {
                        s.announce_name = true;
                    }
                }
            }
        }
        self.try_ping(t, group);
    }

    fn handle_rejoin<T: PairwiseTransport>(
        &mut self,
        t: &mut T,
        link: ConnectionId,
        rejoin: &Rejoin,
    ) {
        let Some(group) = self.find_by_kind_id(rejoin.kind, &rejoin.id) else {
            return;
        };
        let Some((key, session_key)) = t.link_keys(link) else {
            return;
        };
        let Some(number) = self.session(group).ok().and_then(|s| s.number_by_key(&key)) else {
            return;
        };
        let self_key = t.self_public_key();
        let AddPeer::Active(_) =
            self.add_peer(group, &self_key, key, session_key, number, true, true)
        else {
            return;
        };
        self.add_link(t, group, link, LinkReasons::INTRODUCING, true);
        self.send_online(t, group, link);
    }

    fn handle_direct<T: PairwiseTransport>(
        &mut self,
        t: &mut T,
        link: ConnectionId,
        group: u16,
        payload: DirectPayload,
    ) {
        let Ok(s) = self.session(group) else { return };
        let Some(slot) = s.links.find(link) else { return };
        match payload {
            DirectPayload::Introduced => {
                self.remove_link_reason(t, group, slot, LinkReasons::INTRODUCING);
            }
            DirectPayload::Query => {
                let Some(l) = s.links.get(slot) else { return };
                if l.state != LinkState::Online {
                    return;
                }
                let Some(remote_group) = l.remote_group else { return };
                self.send_peers(t, group, link, remote_group);
            }
            DirectPayload::Response(records) => {
                self.handle_peer_response(t, group, &records);
            }
            DirectPayload::Title(title) => {
                let Ok(s) = self.session(group) else { return };
                if s.title_fresh {
                    return;
                }
                let _ = self.apply_title(group, None, &title);
            }
        }
    }

    fn handle_peer_response<T: PairwiseTransport>(
        &mut self,
        t: &mut T,
        group: u16,
        records: &[PeerRecord],
    ) {
        let self_key = t.self_public_key();
        for record in records {
            let confirmed_us = {
                let Ok(s) = self.session(group) else { return };
                s.status == SessionStatus::Valid && record.key == self_key
            };
            if confirmed_us {
                let Ok(s) = self.session_mut(group) else { return };
                s.self_number = record.number;
                s.status = SessionStatus::Connected;
                s.announce_name = true;
                // Members learned before our own record now compete for
                // the closest set
                let known: Vec<(PublicKey, PublicKey)> =
                    s.peers.iter().map(|p| (p.key, p.session_key)).collect();
                for (key, session_key) in known {
                    s.closest.offer(&self_key, key, session_key);
                }
                self.events.push(ConferenceEvent::Connected { group });
                debug!(group, "membership confirmed");
            }

            match self.add_peer(
                group,
                &self_key,
                record.key,
                record.session_key,
                record.number,
                false,
                true,
            ) {
                AddPeer::Active(index) => {
                    let known = {
                        let Ok(s) = self.session(group) else { return };
                        s.peers[index].nick_known
                    };
                    if !known {
                        let _ = self.set_nick(group, index, &record.nick, false);
                    }
                }
                // A record colliding with known state ends the sync chunk
                AddPeer::FrozenUpdated | AddPeer::Collision | AddPeer::NoGroup => return,
            }
        }
    }

    fn handle_message<T: PairwiseTransport>(
        &mut self,
        t: &mut T,
        link: ConnectionId,
        group: u16,
        frame: MessageFrame,
    ) {
        let Ok(s) = self.session(group) else { return };
        let Some(origin) = s.links.find(link) else { return };

        // Freeze announcements must not thaw the peer they describe
        let ignore_frozen = frame.id == MESSAGE_FREEZE_PEER;
        let index = if ignore_frozen {
            s.peer_index_by_number(frame.peer)
        } else {
            let self_key = t.self_public_key();
            self.note_peer_active(group, &self_key, frame.peer)
        };
        let Some(index) = index else {
            if ignore_frozen {
                return;
            }
            // Unknown sender; ask the relayer who it is
            let Ok(s) = self.session(group) else { return };
            if let Some(l) = s.links.get(origin) {
                if l.state == LinkState::Online {
                    if let Some(remote_group) = l.remote_group {
                        self.send_peer_query(t, link, remote_group);
                    }
                }
            }
            return;
        };

        self.prune_introducers(t, group, origin, index);

        let latest_wins = frame.id == MESSAGE_NAME || frame.id == MESSAGE_TITLE;
        {
            let Ok(s) = self.session_mut(group) else { return };
            let Some(peer) = s.peers.get_mut(index) else { return };
            if !peer.messages.check_and_insert(frame.number, frame.id, latest_wins) {
                return;
            }
        }

        let handled = self.dispatch_message(t, group, index, &frame);
        if !handled {
            return;
        }

        // Flood relay to everyone else keeps the mesh consistent without
        // a spanning tree
        self.send_message_all_links(t, group, &frame, Some(origin));
    }

    /// Apply a deduplicated reliable message. Returns `false` when it must
    /// not be relayed.
    fn dispatch_message<T: PairwiseTransport>(
        &mut self,
        t: &mut T,
        group: u16,
        index: usize,
        frame: &MessageFrame,
    ) -> bool {
        let sender_number = frame.peer;
        match frame.id {
            MESSAGE_PING => true,
            MESSAGE_NEW_PEER => {
                if frame.payload.len() != 2 + 32 + 32 {
                    return false;
                }
                let number = u16::from_be_bytes([frame.payload[0], frame.payload[1]]);
                let mut key = [0u8; 32];
                key.copy_from_slice(&frame.payload[2..34]);
                let mut session_key = [0u8; 32];
                session_key.copy_from_slice(&frame.payload[34..66]);
                let self_key = t.self_public_key();
                matches!(
                    self.add_peer(
                        group,
                        &self_key,
                        PublicKey::from_bytes(key),
                        PublicKey::from_bytes(session_key),
                        number,
                        true,
                        true,
                    ),
                    AddPeer::Active(_)
                )
            }
            MESSAGE_KILL_PEER | MESSAGE_FREEZE_PEER => {
                if frame.payload.len() != 2 {
                    return false;
                }
                let target = u16::from_be_bytes([frame.payload[0], frame.payload[1]]);
                // Only announcements about the sender itself are honored
                if target != sender_number {
                    return false;
                }
                if frame.id == MESSAGE_KILL_PEER {
                    self.del_peer(t, group, index, false);
                } else {
                    self.freeze_peer(t, group, index);
                }
                true
            }
            MESSAGE_NAME => self.set_nick(group, index, &frame.payload, true).is_ok(),
            MESSAGE_TITLE => self
                .apply_title(group, Some(sender_number), &frame.payload)
                .is_ok(),
            MESSAGE_CHAT | MESSAGE_ACTION => {
                if frame.payload.is_empty() {
                    return false;
                }
                let kind = if frame.id == MESSAGE_CHAT {
                    MessageKind::Normal
                } else {
                    MessageKind::Action
                };
                self.events.push(ConferenceEvent::Message {
                    group,
                    peer: sender_number,
                    kind,
                    payload: frame.payload.clone(),
                });
                true
            }
            other => {
                warn!(group, id = other, "unknown conference message id");
                false
            }
        }
    }

    /// Handle a lossy-channel conference packet received on `link`.
    pub fn handle_lossy<T: PairwiseTransport>(
        &mut self,
        t: &mut T,
        link: ConnectionId,
        data: &[u8],
    ) {
        let frame = match LossyFrame::decode(data) {
            Ok(frame) => frame,
            Err(err) => {
                trace!(%link, %err, "dropping malformed lossy packet");
                return;
            }
        };
        let group = frame.group;
        let Ok(s) = self.session(group) else { return };
        let Some(origin) = s.links.find(link) else { return };
        if s.status == SessionStatus::Connected && frame.peer == s.self_number {
            return;
        }
        let Some(index) = s.peer_index_by_number(frame.peer) else {
            return;
        };
        {
            let Ok(s) = self.session_mut(group) else { return };
            let Some(peer) = s.peers.get_mut(index) else { return };
            if !peer.lossy.mark(frame.number) {
                return;
            }
        }
        if !self.lossy_registered[frame.id as usize] {
            return;
        }
        self.events.push(ConferenceEvent::LossyPacket {
            group,
            peer: frame.peer,
            id: frame.id,
            payload: frame.payload.clone(),
        });
        self.send_lossy_all_links(t, group, &frame, Some(origin));
    }

    /// Handle a pairwise link changing connectivity.
    pub fn handle_link_status<T: PairwiseTransport>(
        &mut self,
        t: &mut T,
        link: ConnectionId,
        online: bool,
    ) {
        if online {
            // Frozen memberships reachable over this link get a rejoin
            if let Some((key, _)) = t.link_keys(link) {
                for group in 0..self.sessions.len() as u16 {
                    let frozen = self
                        .session(group)
                        .map(|s| s.frozen_index_by_key(&key).is_some())
                        .unwrap_or(false);
                    if frozen {
                        self.try_send_rejoin(t, group, &key);
                    }
                }
            }
            for group in 0..self.sessions.len() as u16 {
                let has_slot = self
                    .session(group)
                    .map(|s| s.links.find(link).is_some())
                    .unwrap_or(false);
                if has_slot {
                    self.send_online(t, group, link);
                }
            }
        } else {
            for group in 0..self.sessions.len() as u16 {
                let Ok(s) = self.session_mut(group) else { continue };
                let Some(slot) = s.links.find(link) else { continue };
                if let Some(l) = s.links.get_mut(slot) {
                    l.state = LinkState::Connecting;
                }
                if s.links.online_count() == 0 {
                    self.freeze_all_peers(t, group);
                }
            }
        }
    }

    // ── Maintenance ─────────────────────────────────────────────────────

    /// Periodic maintenance, driven from the host's event loop.
    ///
    /// `now` is a monotonic clock in seconds; packet handlers stamp peer
    /// activity with the value from the latest tick.
    pub fn tick<T: PairwiseTransport>(&mut self, t: &mut T, now: u64) {
        self.now = now;
        for group in 0..self.sessions.len() as u16 {
            let connected = self
                .session(group)
                .map(|s| s.status == SessionStatus::Connected)
                .unwrap_or(false);
            if !connected {
                continue;
            }

            self.connect_to_closest(t, group);
            self.try_ping(t, group);
            self.freeze_timed_out(t, group);

            let Ok(s) = self.session_mut(group) else { continue };
            if s.peers.len() <= 1 {
                s.title_fresh = false;
            }
            if s.announce_name {
                s.announce_name = false;
                let name = t.self_name().to_vec();
                let _ = self.broadcast(t, group, MESSAGE_NAME, &name);
            }
        }
    }

    fn try_ping<T: PairwiseTransport>(&mut self, t: &mut T, group: u16) {
        let due = self
            .session(group)
            .map(|s| s.last_ping + PING_INTERVAL <= self.now)
            .unwrap_or(false);
        if !due {
            return;
        }
        if self.broadcast(t, group, MESSAGE_PING, &[]).is_ok() {
            let now = self.now;
            if let Ok(s) = self.session_mut(group) {
                s.last_ping = now;
            }
        }
    }

    fn freeze_timed_out<T: PairwiseTransport>(&mut self, t: &mut T, group: u16) {
        let self_key = t.self_public_key();
        let mut index = 0;
        loop {
            let stale = {
                let Ok(s) = self.session(group) else { return };
                let Some(peer) = s.peers.get(index) else { return };
                peer.key != self_key && peer.last_active + FREEZE_TIMEOUT < self.now
            };
            if stale {
                // Swap-remove keeps the index valid for the next peer
                self.freeze_peer(t, group, index);
            } else {
                index += 1;
            }
        }
    }

    /// Reconcile the closest set with the link table.
    fn connect_to_closest<T: PairwiseTransport>(&mut self, t: &mut T, group: u16) {
        let changed = match self.session(group) {
            Ok(s) => s.closest.changed(),
            Err(_) => return,
        };
        if changed == ClosestChange::None {
            return;
        }

        let self_key = t.self_public_key();
        if changed == ClosestChange::Removed {
            // The set shrank; let the whole membership compete again
            let candidates: Vec<(PublicKey, PublicKey)> = match self.session(group) {
                Ok(s) => s.peers.iter().map(|p| (p.key, p.session_key)).collect(),
                Err(_) => return,
            };
            if let Ok(s) = self.session_mut(group) {
                for (key, session_key) in candidates {
                    s.closest.offer(&self_key, key, session_key);
                }
            }
        }

        // Strip the CLOSEST reason from links whose peer fell out of the set
        let mut stale = Vec::new();
        if let Ok(s) = self.session(group) {
            for (i, l) in s.links.iter() {
                if !l.reasons.contains(LinkReasons::CLOSEST) {
                    continue;
                }
                match t.link_keys(l.connection) {
                    Some((key, _)) if s.closest.contains(&key) => {}
                    _ => stale.push(i),
                }
            }
        }
        for slot in stale {
            self.remove_link_reason(t, group, slot, LinkReasons::CLOSEST);
        }

        // Make sure every closest peer has a live, tagged link
        let entries: Vec<(PublicKey, PublicKey)> = match self.session(group) {
            Ok(s) => s.closest.iter().map(|e| (e.key, e.session_key)).collect(),
            Err(_) => return,
        };
        for (key, session_key) in entries {
            let (link, lock) = match t.link_to(&key) {
                Some(link) => (link, true),
                None => {
                    let Some(link) = t.open_link(&key) else { continue };
                    t.expect_session_key(link, &session_key);
                    (link, false)
                }
            };
            if self.add_link(t, group, link, LinkReasons::CLOSEST, lock).is_some()
                && t.status(link) == LinkStatus::Connected
            {
                self.send_online(t, group, link);
            }
        }

        if let Ok(s) = self.session_mut(group) {
            s.closest.mark_reconciled();
        }
    }

    // ── Membership internals ────────────────────────────────────────────

    pub(crate) fn allocate_slot(&mut self) -> Result<u16, ConferenceError> {
        if let Some(index) = self.sessions.iter().position(|s| s.is_none()) {
            return Ok(index as u16);
        }
        if self.sessions.len() >= u16::MAX as usize {
            return Err(ConferenceError::LinkSlotsFull);
        }
        self.sessions.push(None);
        Ok((self.sessions.len() - 1) as u16)
    }

    fn find_by_kind_id(&self, kind: ConferenceKind, id: &GroupId) -> Option<u16> {
        self.sessions.iter().enumerate().find_map(|(i, s)| {
            s.as_ref()
                .filter(|s| s.kind == kind && s.id == *id)
                .map(|_| i as u16)
        })
    }

    /// Add or update a member.
    ///
    /// `fresh` means the information proves the peer is alive right now:
    /// activity is stamped and a frozen peer thaws. Without it, peer-list
    /// sync from a relay updates membership only. `notify` gates the
    /// peer-list-changed event for a genuinely new entry.
    pub(crate) fn add_peer(
        &mut self,
        group: u16,
        self_key: &PublicKey,
        key: PublicKey,
        session_key: PublicKey,
        number: u16,
        fresh: bool,
        notify: bool,
    ) -> AddPeer {
        let existing = if fresh {
            self.note_peer_active(group, self_key, number)
        } else {
            match self.session(group) {
                Ok(s) => s.peer_index_by_number(number),
                Err(_) => return AddPeer::NoGroup,
            }
        };

        let Ok(s) = self.session_mut(group) else {
            return AddPeer::NoGroup;
        };

        if let Some(index) = existing {
            let peer = &mut s.peers[index];
            if peer.key != key {
                return AddPeer::Collision;
            }
            if fresh || !peer.session_key_current {
                peer.session_key = session_key;
                peer.session_key_current = true;
            }
            return AddPeer::Active(index);
        }

        if !fresh {
            if let Some(frozen_index) = s.frozen_index_by_number(number) {
                let peer = &mut s.frozen[frozen_index];
                if peer.key != key {
                    return AddPeer::Collision;
                }
                peer.session_key = session_key;
                return AddPeer::FrozenUpdated;
            }
        }

        // Identity is canonical: purge any stale binding of this key
        self.purge_key(group, &key);

        let now = self.now;
        let Ok(s) = self.session_mut(group) else {
            return AddPeer::NoGroup;
        };
        s.peers.push(Peer::new(key, session_key, number, now));
        let index = s.peers.len() - 1;
        s.closest.offer(self_key, key, session_key);
        if notify {
            self.events.push(ConferenceEvent::PeerListChanged { group });
        }
        self.events.push(ConferenceEvent::PeerJoined {
            group,
            peer: number,
        });
        AddPeer::Active(index)
    }

    /// Stamp activity on the peer holding `number`, thawing it if frozen.
    fn note_peer_active(&mut self, group: u16, self_key: &PublicKey, number: u16) -> Option<usize> {
        let now = self.now;
        let Ok(s) = self.session_mut(group) else {
            return None;
        };
        if let Some(index) = s.peer_index_by_number(number) {
            s.peers[index].last_active = now;
            return Some(index);
        }

        let frozen_index = s.frozen_index_by_number(number)?;
        let mut peer = s.frozen.swap_remove(frozen_index);
        peer.last_active = now;
        peer.session_key_current = false;
        s.peers.push(peer);
        let index = s.peers.len() - 1;
        let (key, session_key) = (s.peers[index].key, s.peers[index].session_key);
        s.announce_name = true;
        s.closest.offer(self_key, key, session_key);
        self.events.push(ConferenceEvent::PeerListChanged { group });
        self.events.push(ConferenceEvent::PeerJoined {
            group,
            peer: number,
        });
        debug!(group, peer = number, "thawed peer");
        Some(index)
    }

    /// Remove an active peer. With `keep_connection` the underlying link
    /// survives (used when freezing).
    fn del_peer<T: PairwiseTransport>(
        &mut self,
        t: &mut T,
        group: u16,
        index: usize,
        keep_connection: bool,
    ) {
        let (key, number) = {
            let Ok(s) = self.session(group) else { return };
            let Some(peer) = s.peers.get(index) else { return };
            (peer.key, peer.number)
        };

        if let Ok(s) = self.session_mut(group) {
            s.closest.remove(&key);
        }

        if !keep_connection {
            if let Some(link) = t.link_to(&key) {
                let slot = self.session(group).ok().and_then(|s| s.links.find(link));
                if let Some(slot) = slot {
                    if let Ok(s) = self.session_mut(group) {
                        s.links.clear(slot);
                    }
                    t.release(link);
                }
            }
        }

        if let Ok(s) = self.session_mut(group) {
            s.peers.swap_remove(index);
        }
        self.events.push(ConferenceEvent::PeerListChanged { group });
        self.events.push(ConferenceEvent::PeerLeft {
            group,
            peer: number,
        });
    }

    /// Move an active peer to the frozen list, trying a rejoin first so
    /// the peer can find its way back.
    fn freeze_peer<T: PairwiseTransport>(&mut self, t: &mut T, group: u16, index: usize) {
        let peer = {
            let Ok(s) = self.session(group) else { return };
            let Some(peer) = s.peers.get(index) else { return };
            peer.clone()
        };
        self.try_send_rejoin(t, group, &peer.key);
        if let Ok(s) = self.session_mut(group) {
            s.frozen.push(peer);
        }
        self.del_peer(t, group, index, true);
    }

    /// The whole conference went silent; freeze everyone but us.
    fn freeze_all_peers<T: PairwiseTransport>(&mut self, t: &mut T, group: u16) {
        let self_key = t.self_public_key();
        loop {
            let target = {
                let Ok(s) = self.session(group) else { return };
                s.peers.iter().position(|p| p.key != self_key)
            };
            match target {
                Some(index) => self.freeze_peer(t, group, index),
                None => return,
            }
        }
    }

    /// Drop every entry bound to `key` from both lists.
    fn purge_key(&mut self, group: u16, key: &PublicKey) {
        let active = self.session(group).ok().and_then(|s| s.peer_index_by_key(key));
        if let Some(index) = active {
            // No transport here: the new binding immediately replaces the
            // old one, links stay as they are
            let number = self.session(group).map(|s| s.peers[index].number).ok();
            if let Ok(s) = self.session_mut(group) {
                s.closest.remove(key);
                s.peers.swap_remove(index);
            }
            if let Some(number) = number {
                self.events.push(ConferenceEvent::PeerListChanged { group });
                self.events.push(ConferenceEvent::PeerLeft {
                    group,
                    peer: number,
                });
            }
        }
        if let Ok(s) = self.session_mut(group) {
            if let Some(frozen) = s.frozen_index_by_key(key) {
                s.frozen.swap_remove(frozen);
            }
        }
    }

    pub(crate) fn set_nick(
        &mut self,
        group: u16,
        index: usize,
        nick: &[u8],
        notify: bool,
    ) -> Result<(), ConferenceError> {
        if nick.len() > MAX_NAME_LEN {
            return Err(ConferenceError::TooLong {
                len: nick.len(),
                max: MAX_NAME_LEN,
            });
        }
        let number = {
            let s = self.session_mut(group)?;
            let peer = s.peers.get_mut(index).ok_or(ConferenceError::InvalidPeer)?;
            peer.nick_known = true;
            if peer.nick == nick {
                return Ok(());
            }
            peer.nick = nick.to_vec();
            peer.number
        };
        if notify {
            self.events.push(ConferenceEvent::PeerName {
                group,
                peer: number,
                name: nick.to_vec(),
            });
        }
        Ok(())
    }

    fn apply_title(
        &mut self,
        group: u16,
        peer: Option<u16>,
        title: &[u8],
    ) -> Result<(), ConferenceError> {
        if title.is_empty() || title.len() > MAX_TITLE_LEN {
            return Err(ConferenceError::InvalidTitle);
        }
        let s = self.session_mut(group)?;
        if s.title == title {
            return Ok(());
        }
        s.title = title.to_vec();
        s.title_fresh = true;
        self.events.push(ConferenceEvent::TitleChanged {
            group,
            peer,
            title: title.to_vec(),
        });
        Ok(())
    }

    // ── Link internals ──────────────────────────────────────────────────

    /// Bind `link` to the conference with `reason`, locking a pre-existing
    /// connection so the transport keeps it alive for us.
    fn add_link<T: PairwiseTransport>(
        &mut self,
        t: &mut T,
        group: u16,
        link: ConnectionId,
        reason: LinkReasons,
        lock: bool,
    ) -> Option<usize> {
        let Ok(s) = self.session_mut(group) else {
            return None;
        };
        let Some((slot, fresh)) = s.links.ensure(link) else {
            warn!(group, %link, "close-slot table full");
            return None;
        };
        if fresh && lock {
            t.acquire(link);
        }
        if let Ok(s) = self.session_mut(group) {
            s.links.add_reason(slot, reason);
        }
        Some(slot)
    }

    /// Drop one reason from a slot, notifying and tearing down as needed.
    fn remove_link_reason<T: PairwiseTransport>(
        &mut self,
        t: &mut T,
        group: u16,
        slot: usize,
        reason: LinkReasons,
    ) {
        let (connection, notify_introduced) = {
            let Ok(s) = self.session(group) else { return };
            let Some(l) = s.links.get(slot) else { return };
            if !l.reasons.contains(reason) {
                return;
            }
            let notify = reason.contains(LinkReasons::INTRODUCER)
                && l.state == LinkState::Online
                && l.remote_group.is_some();
            (l.connection, notify.then(|| l.remote_group).flatten())
        };

        if let Some(remote_group) = notify_introduced {
            // Tell the peer its introduction served its purpose
            let packet = Packet::Direct {
                group: remote_group,
                payload: DirectPayload::Introduced,
            };
            t.send_reliable(connection, &packet.encode());
        }

        let teardown = {
            let Ok(s) = self.session_mut(group) else { return };
            s.links.remove_reason(slot, reason)
        };
        if teardown {
            if let Ok(s) = self.session_mut(group) {
                s.links.clear(slot);
            }
            t.release(connection);
        }
    }

    fn prune_introducers<T: PairwiseTransport>(
        &mut self,
        t: &mut T,
        group: u16,
        origin: usize,
        sender_index: usize,
    ) {
        let sender_key = {
            let Ok(s) = self.session(group) else { return };
            if s.links.introducers() == 0 || s.links.online_count() <= crate::types::DESIRED_CLOSEST
            {
                return;
            }
            match s.peers.get(sender_index) {
                Some(peer) => peer.key,
                None => return,
            }
        };
        // Hearing from the peer over the mesh proves the introduction took
        let mut prune = Vec::new();
        if let Ok(s) = self.session(group) {
            for (i, l) in s.links.iter() {
                if i == origin || !l.reasons.contains(LinkReasons::INTRODUCER) {
                    continue;
                }
                if let Some((key, _)) = t.link_keys(l.connection) {
                    if key == sender_key {
                        prune.push(i);
                    }
                }
            }
        }
        for slot in prune {
            self.remove_link_reason(t, group, slot, LinkReasons::INTRODUCER);
        }
    }

    // ── Sending internals ───────────────────────────────────────────────

    fn send_online<T: PairwiseTransport>(&self, t: &mut T, group: u16, link: ConnectionId) {
        let Ok(s) = self.session(group) else { return };
        let packet = Packet::Online(Online {
            group,
            kind: s.kind,
            id: s.id,
        });
        t.send_reliable(link, &packet.encode());
    }

    fn send_peer_query<T: PairwiseTransport>(
        &self,
        t: &mut T,
        link: ConnectionId,
        remote_group: u16,
    ) {
        let packet = Packet::Direct {
            group: remote_group,
            payload: DirectPayload::Query,
        };
        t.send_reliable(link, &packet.encode());
    }

    /// Answer a peer query: the member list, chunked to the transport
    /// MTU, followed by the title.
    fn send_peers<T: PairwiseTransport>(
        &self,
        t: &mut T,
        group: u16,
        link: ConnectionId,
        remote_group: u16,
    ) {
        let Ok(s) = self.session(group) else { return };

        let header = |out: &mut Vec<u8>| {
            out.push(PACKET_DIRECT);
            out.extend_from_slice(&remote_group.to_be_bytes());
            out.push(PEER_RESPONSE_ID);
        };

        let mut out = Vec::new();
        header(&mut out);
        for peer in &s.peers {
            let record = PeerRecord {
                number: peer.number,
                key: peer.key,
                session_key: peer.session_key,
                nick: peer.nick.clone(),
            };
            if out.len() + record.encoded_len() > MAX_TRANSPORT_PAYLOAD {
                t.send_reliable(link, &out);
                out = Vec::new();
                header(&mut out);
            }
            record.encode_into(&mut out);
        }
        if out.len() > 4 {
            t.send_reliable(link, &out);
        }

        if !s.title.is_empty() {
            let packet = Packet::Direct {
                group: remote_group,
                payload: DirectPayload::Title(s.title.clone()),
            };
            t.send_reliable(link, &packet.encode());
        }
    }

    fn try_send_rejoin<T: PairwiseTransport>(
        &mut self,
        t: &mut T,
        group: u16,
        key: &PublicKey,
    ) -> bool {
        let Some(link) = t.link_to(key) else {
            return false;
        };
        let (kind, id) = {
            let Ok(s) = self.session(group) else { return false };
            (s.kind, s.id)
        };
        let packet = Packet::Rejoin(Rejoin { kind, id });
        if !t.send_reliable(link, &packet.encode()) {
            return false;
        }
        self.add_link(t, group, link, LinkReasons::INTRODUCER, true);
        true
    }

    fn announce_new_peer<T: PairwiseTransport>(
        &mut self,
        t: &mut T,
        group: u16,
        number: u16,
        key: &PublicKey,
        session_key: &PublicKey,
    ) {
        let mut payload = Vec::with_capacity(2 + 32 + 32);
        payload.extend_from_slice(&number.to_be_bytes());
        payload.extend_from_slice(key.as_bytes());
        payload.extend_from_slice(session_key.as_bytes());
        let _ = self.broadcast(t, group, MESSAGE_NEW_PEER, &payload);
    }

    /// Reliable broadcast of `(id, payload)` under our own peer number.
    fn broadcast<T: PairwiseTransport>(
        &mut self,
        t: &mut T,
        group: u16,
        id: u8,
        payload: &[u8],
    ) -> Result<usize, ConferenceError> {
        if payload.len() > MAX_MESSAGE_DATA_LEN {
            return Err(ConferenceError::TooLong {
                len: payload.len(),
                max: MAX_MESSAGE_DATA_LEN,
            });
        }
        let frame = {
            let s = self.session_mut(group)?;
            if s.status != SessionStatus::Connected || s.links.online_count() == 0 {
                return Err(ConferenceError::NotConnected);
            }
            s.message_number = s.message_number.wrapping_add(1);
            if s.message_number == 0 {
                s.message_number = 1;
            }
            MessageFrame {
                peer: s.self_number,
                number: s.message_number,
                id,
                payload: payload.to_vec(),
            }
        };
        let sent = self.send_message_all_links(t, group, &frame, None);
        if sent == 0 {
            return Err(ConferenceError::AllSendsFailed);
        }
        Ok(sent)
    }

    /// Fan a reliable frame out to every online slot except `except`.
    fn send_message_all_links<T: PairwiseTransport>(
        &self,
        t: &mut T,
        group: u16,
        frame: &MessageFrame,
        except: Option<usize>,
    ) -> usize {
        let Ok(s) = self.session(group) else { return 0 };
        let mut sent = 0;
        for (i, l) in s.links.iter_online() {
            if Some(i) == except {
                continue;
            }
            let Some(remote_group) = l.remote_group else {
                continue;
            };
            let packet = Packet::Message {
                group: remote_group,
                frame: frame.clone(),
            };
            if t.send_reliable(l.connection, &packet.encode()) {
                sent += 1;
            }
        }
        sent
    }

    /// Lossy fan-out: every non-closest online slot gets a copy; the
    /// closest-tagged backbone is covered by at most two representatives,
    /// the nearest neighbor on each side of us.
    fn send_lossy_all_links<T: PairwiseTransport>(
        &self,
        t: &mut T,
        group: u16,
        frame: &LossyFrame,
        except: Option<usize>,
    ) -> usize {
        let Ok(s) = self.session(group) else { return 0 };
        let self_key = t.self_public_key();

        let mut below: Option<(usize, u64)> = None;
        let mut above: Option<(usize, u64)> = None;
        let mut direct = Vec::new();

        for (i, l) in s.links.iter_online() {
            if Some(i) == except || l.remote_group.is_none() {
                continue;
            }
            if l.reasons.contains(LinkReasons::CLOSEST) {
                if let Some((key, _)) = t.link_keys(l.connection) {
                    let d_below = distance(&self_key, &key);
                    if below.map(|(_, d)| d_below < d).unwrap_or(true) {
                        below = Some((i, d_below));
                    }
                    let d_above = distance(&key, &self_key);
                    if above.map(|(_, d)| d_above < d).unwrap_or(true) {
                        above = Some((i, d_above));
                    }
                }
                continue;
            }
            direct.push(i);
        }

        let mut targets = direct;
        if let Some((i, _)) = below {
            targets.push(i);
        }
        if let Some((i, _)) = above {
            if below.map(|(b, _)| b != i).unwrap_or(true) {
                targets.push(i);
            }
        }

        let mut sent = 0;
        for i in targets {
            let Some(l) = s.links.get(i) else { continue };
            let Some(remote_group) = l.remote_group else {
                continue;
            };
            let mut out = frame.clone();
            out.group = remote_group;
            if t.send_lossy(l.connection, &out.encode()) {
                sent += 1;
            }
        }
        sent
    }
}

impl Default for Conference {
    fn default() -> Self {
        Self::new()
    }
}
