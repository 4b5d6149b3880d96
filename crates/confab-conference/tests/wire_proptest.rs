use proptest::prelude::*;

use confab_conference::wire::{
    DirectPayload, Invite, InviteResponse, LossyFrame, Online, Packet, PeerRecord, Rejoin,
};
use confab_conference::{ConferenceKind, GroupId, MessageFrame};
use confab_link::PublicKey;

fn arb_kind() -> impl Strategy<Value = ConferenceKind> {
    prop_oneof![Just(ConferenceKind::Text), Just(ConferenceKind::Av)]
}

fn arb_key() -> impl Strategy<Value = PublicKey> {
    any::<[u8; 32]>().prop_map(PublicKey::from_bytes)
}

fn arb_group_id() -> impl Strategy<Value = GroupId> {
    any::<[u8; 32]>().prop_map(GroupId::from_bytes)
}

fn arb_record() -> impl Strategy<Value = PeerRecord> {
    (
        any::<u16>(),
        arb_key(),
        arb_key(),
        prop::collection::vec(any::<u8>(), 0..=128),
    )
        .prop_map(|(number, key, session_key, nick)| PeerRecord {
            number,
            key,
            session_key,
            nick,
        })
}

fn arb_packet() -> impl Strategy<Value = Packet> {
    prop_oneof![
        (any::<u16>(), arb_kind(), arb_group_id())
            .prop_map(|(group, kind, id)| Packet::Invite(Invite { group, kind, id })),
        (any::<u16>(), any::<u16>(), arb_kind(), arb_group_id()).prop_map(
            |(joiner_group, inviter_group, kind, id)| {
                Packet::InviteResponse(InviteResponse {
                    joiner_group,
                    inviter_group,
                    kind,
                    id,
                })
            }
        ),
        (any::<u16>(), arb_kind(), arb_group_id())
            .prop_map(|(group, kind, id)| Packet::Online(Online { group, kind, id })),
        (arb_kind(), arb_group_id()).prop_map(|(kind, id)| Packet::Rejoin(Rejoin { kind, id })),
        any::<u16>().prop_map(|group| Packet::Direct {
            group,
            payload: DirectPayload::Introduced,
        }),
        any::<u16>().prop_map(|group| Packet::Direct {
            group,
            payload: DirectPayload::Query,
        }),
        (any::<u16>(), prop::collection::vec(any::<u8>(), 1..=128)).prop_map(|(group, title)| {
            Packet::Direct {
                group,
                payload: DirectPayload::Title(title),
            }
        }),
        (any::<u16>(), prop::collection::vec(arb_record(), 0..4)).prop_map(|(group, records)| {
            Packet::Direct {
                group,
                payload: DirectPayload::Response(records),
            }
        }),
        (
            any::<u16>(),
            any::<u16>(),
            any::<u32>(),
            any::<u8>(),
            prop::collection::vec(any::<u8>(), 0..1363),
        )
            .prop_map(|(group, peer, number, id, payload)| Packet::Message {
                group,
                frame: MessageFrame {
                    peer,
                    number,
                    id,
                    payload,
                },
            }),
    ]
}

proptest! {
    /// Every reliable packet survives an encode/decode roundtrip.
    #[test]
    fn roundtrip_reliable_packet(packet in arb_packet()) {
        let bytes = packet.encode();
        let decoded = Packet::decode(&bytes).expect("decode");
        prop_assert_eq!(&packet, &decoded);
    }

    /// Decoding an arbitrary prefix never panics and never reproduces the
    /// full packet.
    #[test]
    fn truncation_never_yields_the_original(packet in arb_packet(), cut in any::<prop::sample::Index>()) {
        let bytes = packet.encode();
        let len = cut.index(bytes.len());
        let decoded = Packet::decode(&bytes[..len]);
        prop_assert_ne!(decoded, Ok(packet));
    }

    /// Lossy frames roundtrip with every payload and sub-id.
    #[test]
    fn roundtrip_lossy_frame(
        group in any::<u16>(),
        peer in any::<u16>(),
        number in any::<u16>(),
        id in any::<u8>(),
        payload in prop::collection::vec(any::<u8>(), 0..1363),
    ) {
        let frame = LossyFrame { group, peer, number, id, payload };
        let decoded = LossyFrame::decode(&frame.encode()).expect("decode");
        prop_assert_eq!(&frame, &decoded);
    }

    /// Garbage input is rejected without panicking.
    #[test]
    fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = Packet::decode(&bytes);
        let _ = LossyFrame::decode(&bytes);
    }
}
