use log::{debug, warn};
use tunecho_proto::checksum::{self, incremental_update_slice};
use tunecho_proto::icmp::{self, ICMP_TYPE_ECHO_REPLY};
use tunecho_proto::{ipv4, IpVersion, PacketView, ParseError};

use crate::config::ResponderMode;

/// What to do with a packet after inspection. Buffers travel by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write the (rewritten) packet back to the device.
    Reply(Vec<u8>),
    /// Write the packet back exactly as it was read.
    Forward(Vec<u8>),
    Drop,
}

/// Turns ICMPv4 Echo Requests into Echo Replies in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct IcmpEchoResponder {
    mode: ResponderMode,
}

impl IcmpEchoResponder {
    pub fn new(mode: ResponderMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ResponderMode {
        self.mode
    }

    pub fn handle(&self, mut buffer: Vec<u8>) -> Result<Action, ParseError> {
        if self.mode == ResponderMode::Loopback {
            return Ok(Action::Reply(buffer));
        }

        let mut view = PacketView::parse(&mut buffer)?;
        if view.version() == IpVersion::V6 {
            warn!("IPv6 not supported yet, dropping {} byte packet", view.total_len());
            return Ok(Action::Drop);
        }

        if view.protocol() == ipv4::protocol::ICMP {
            let Some(message) = view.icmp() else {
                debug!("dropping truncated ICMP message from {}", view.source());
                return Ok(Action::Drop);
            };
            if message.is_echo_request() {
                debug!(
                    "echo request {} -> {} id={} seq={}",
                    view.source(),
                    view.destination(),
                    message.identifier(),
                    message.sequence()
                );
                rewrite_as_reply(&mut view);
                return Ok(Action::Reply(buffer));
            }
        }

        match self.mode {
            ResponderMode::Reply => Ok(Action::Forward(buffer)),
            _ => Ok(Action::Drop),
        }
    }
}

/// Swap addresses, flip the type to Echo Reply and fix both checksums.
fn rewrite_as_reply(view: &mut PacketView<'_>) {
    let source = view.source();
    let destination = view.destination();
    let old_checksum = view.header_checksum().unwrap_or_default();

    let mut old_addresses = [0u8; 8];
    old_addresses.copy_from_slice(&view.as_bytes()[ipv4::SOURCE_OFFSET..ipv4::DESTINATION_OFFSET + 4]);

    view.set_source(&destination);
    view.set_destination(&source);

    let mut new_addresses = [0u8; 8];
    new_addresses.copy_from_slice(&view.as_bytes()[ipv4::SOURCE_OFFSET..ipv4::DESTINATION_OFFSET + 4]);
    view.set_short_at(
        ipv4::CHECKSUM_OFFSET,
        incremental_update_slice(old_checksum, &old_addresses, &new_addresses),
    );

    let message = view.payload_mut();
    message[icmp::TYPE_OFFSET] = ICMP_TYPE_ECHO_REPLY;
    message[icmp::CHECKSUM_OFFSET..icmp::CHECKSUM_OFFSET + 2].fill(0);
    let sum = checksum::compute(message);
    message[icmp::CHECKSUM_OFFSET..icmp::CHECKSUM_OFFSET + 2].copy_from_slice(&sum.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tunecho_proto::icmp::{build_echo_packet, IcmpMessage, ICMP_TYPE_ECHO_REQUEST};

    fn echo_request(data: &[u8]) -> Vec<u8> {
        build_echo_packet(ICMP_TYPE_ECHO_REQUEST, [10, 10, 10, 1], [10, 10, 10, 10], 1, 1, data).unwrap()
    }

    fn udp_packet() -> Vec<u8> {
        ipv4::build_packet(ipv4::protocol::UDP, [10, 10, 10, 1], [10, 10, 10, 10], &[0, 53, 0, 53, 0, 8, 0, 0])
            .unwrap()
    }

    fn ipv6_packet() -> Vec<u8> {
        let mut packet = vec![0u8; 48];
        packet[0] = 0x60;
        packet[5] = 8;
        packet[6] = ipv4::protocol::ICMPV6;
        packet
    }

    #[test]
    fn test_echo_request_becomes_reply() {
        let responder = IcmpEchoResponder::new(ResponderMode::Reply);
        let request = echo_request(b"abc");

        let Action::Reply(reply) = responder.handle(request.clone()).unwrap() else {
            panic!("expected a reply");
        };

        assert_eq!(reply.len(), request.len());
        assert_eq!(&reply[12..16], &[10, 10, 10, 10]);
        assert_eq!(&reply[16..20], &[10, 10, 10, 1]);
        assert!(checksum::verify(&reply[..20]));

        let message = IcmpMessage::new(&reply[20..]).unwrap();
        assert!(message.is_echo_reply());
        assert_eq!(message.identifier(), 1);
        assert_eq!(message.sequence(), 1);
        assert_eq!(message.data(), b"abc");
        assert!(message.is_valid());
    }

    #[test]
    fn test_reply_header_checksum_matches_full_recompute() {
        let responder = IcmpEchoResponder::new(ResponderMode::Ping);
        let mut request = echo_request(b"payload");
        request[8] = 17; // unusual TTL
        request[10..12].fill(0);
        let sum = checksum::compute(&request[..20]);
        request[10..12].copy_from_slice(&sum.to_be_bytes());

        let Ok(Action::Reply(mut reply)) = responder.handle(request) else {
            panic!("expected a reply");
        };
        let incremental = u16::from_be_bytes([reply[10], reply[11]]);
        reply[10..12].fill(0);
        assert_eq!(incremental, checksum::compute(&reply[..20]));
    }

    #[test]
    fn test_captured_ping_is_answered() {
        // ping(8) from 10.0.0.2 to 10.0.0.1: id 0x1c46, seq 1, 56 data bytes.
        let mut request = vec![
            0x45, 0x00, 0x00, 0x54, 0xa6, 0x3b, 0x40, 0x00, 0x40, 0x01, 0x80, 0x6b, 0x0a, 0x00, 0x00, 0x02, 0x0a,
            0x00, 0x00, 0x01, 0x08, 0x00, 0x0b, 0x15, 0x1c, 0x46, 0x00, 0x01, 0x5f, 0x3a, 0x6b, 0x67, 0x00, 0x00,
            0x00, 0x00, 0x3c, 0x2f, 0x0b, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        request.extend(0x10u8..0x38);
        assert_eq!(request.len(), 84);

        let responder = IcmpEchoResponder::new(ResponderMode::Reply);
        let Ok(Action::Reply(reply)) = responder.handle(request.clone()) else {
            panic!("expected a reply");
        };

        assert_eq!(&reply[12..16], &[10, 0, 0, 1]);
        assert_eq!(&reply[16..20], &[10, 0, 0, 2]);
        assert_eq!(&reply[10..12], &[0x80, 0x6b]);
        assert!(checksum::verify(&reply[..20]));
        assert_eq!(reply[20], ICMP_TYPE_ECHO_REPLY);
        assert_eq!(&reply[22..24], &[0x13, 0x15]);
        assert_eq!(&reply[24..], &request[24..]);
    }

    #[test]
    fn test_reply_mode_forwards_unmodified() {
        let responder = IcmpEchoResponder::new(ResponderMode::Reply);
        let packet = udp_packet();
        assert_eq!(responder.handle(packet.clone()).unwrap(), Action::Forward(packet));
    }

    #[test]
    fn test_echo_reply_is_not_answered() {
        let reply = build_echo_packet(ICMP_TYPE_ECHO_REPLY, [10, 10, 10, 10], [10, 10, 10, 1], 1, 1, b"x").unwrap();
        let responder = IcmpEchoResponder::new(ResponderMode::Reply);
        assert_eq!(responder.handle(reply.clone()).unwrap(), Action::Forward(reply.clone()));

        let responder = IcmpEchoResponder::new(ResponderMode::Ping);
        assert_eq!(responder.handle(reply).unwrap(), Action::Drop);
    }

    #[test]
    fn test_ping_mode_drops_other_traffic() {
        let responder = IcmpEchoResponder::new(ResponderMode::Ping);
        assert_eq!(responder.handle(udp_packet()).unwrap(), Action::Drop);
    }

    #[test]
    fn test_ipv6_is_dropped() {
        for mode in [ResponderMode::Reply, ResponderMode::Ping] {
            let responder = IcmpEchoResponder::new(mode);
            assert_eq!(responder.handle(ipv6_packet()).unwrap(), Action::Drop);
        }
    }

    #[test]
    fn test_loopback_replies_verbatim() {
        let responder = IcmpEchoResponder::new(ResponderMode::Loopback);
        for packet in [echo_request(b"abc"), udp_packet(), ipv6_packet(), vec![0xFF, 0x00]] {
            assert_eq!(responder.handle(packet.clone()).unwrap(), Action::Reply(packet));
        }
    }

    #[test]
    fn test_truncated_icmp_is_dropped() {
        let packet = ipv4::build_packet(ipv4::protocol::ICMP, [10, 10, 10, 1], [10, 10, 10, 10], &[8, 0, 0, 0]).unwrap();
        let responder = IcmpEchoResponder::new(ResponderMode::Reply);
        assert_eq!(responder.handle(packet).unwrap(), Action::Drop);
    }

    #[test]
    fn test_malformed_is_an_error() {
        let responder = IcmpEchoResponder::new(ResponderMode::Reply);
        assert_eq!(responder.handle(vec![0x45; 19]), Err(ParseError::TooShort(19)));

        let mut packet = echo_request(b"");
        packet[0] = 0x46;
        packet.truncate(20);
        assert!(matches!(responder.handle(packet), Err(ParseError::Malformed(_))));
    }

    #[test]
    fn test_link_padding_is_kept_out_of_icmp_checksum() {
        let responder = IcmpEchoResponder::new(ResponderMode::Reply);
        let mut request = echo_request(b"abcd");
        request.extend_from_slice(&[0xEE; 6]);

        let Ok(Action::Reply(reply)) = responder.handle(request) else {
            panic!("expected a reply");
        };
        let message = IcmpMessage::new(&reply[20..32]).unwrap();
        assert!(message.is_valid());
        assert_eq!(&reply[32..], &[0xEE; 6]);
    }

    /// Well-formed IPv4 packets that are not ICMP Echo Requests.
    fn forwardable_packet() -> impl Strategy<Value = Vec<u8>> {
        let addresses = (any::<[u8; 4]>(), any::<[u8; 4]>());
        let other = (
            any::<u8>().prop_filter("not icmp", |p| *p != ipv4::protocol::ICMP),
            addresses.clone(),
            proptest::collection::vec(any::<u8>(), 0..64),
        )
            .prop_map(|(protocol, (src, dst), payload)| ipv4::build_packet(protocol, src, dst, &payload).unwrap());

        let kinds = prop_oneof![
            (any::<u8>(), any::<u8>())
                .prop_filter("not an echo request", |&(kind, code)| !(kind == ICMP_TYPE_ECHO_REQUEST && code == 0)),
            (Just(ICMP_TYPE_ECHO_REQUEST), 1u8..=255),
        ];
        let icmp = (kinds, addresses, proptest::collection::vec(any::<u8>(), 8..64)).prop_map(
            |((kind, code), (src, dst), mut message)| {
                message[0] = kind;
                message[1] = code;
                ipv4::build_packet(ipv4::protocol::ICMP, src, dst, &message).unwrap()
            },
        );

        prop_oneof![other, icmp]
    }

    proptest! {
        #[test]
        fn prop_reply_preserves_echo_fields(
            src in any::<[u8; 4]>(),
            dst in any::<[u8; 4]>(),
            id in any::<u16>(),
            seq in any::<u16>(),
            data in proptest::collection::vec(any::<u8>(), 0..256),
        ) {
            let request = build_echo_packet(ICMP_TYPE_ECHO_REQUEST, src, dst, id, seq, &data).unwrap();
            let responder = IcmpEchoResponder::new(ResponderMode::Reply);
            let Ok(Action::Reply(reply)) = responder.handle(request) else {
                panic!("expected a reply");
            };

            prop_assert_eq!(&reply[12..16], &dst[..]);
            prop_assert_eq!(&reply[16..20], &src[..]);
            prop_assert!(checksum::verify(&reply[..20]));
            let message = IcmpMessage::new(&reply[20..]).unwrap();
            prop_assert!(message.is_echo_reply());
            prop_assert_eq!(message.identifier(), id);
            prop_assert_eq!(message.sequence(), seq);
            prop_assert_eq!(message.data(), &data[..]);
            prop_assert!(message.is_valid());
        }

        #[test]
        fn prop_forward_never_mutates(packet in forwardable_packet()) {
            let responder = IcmpEchoResponder::new(ResponderMode::Reply);
            let action = responder.handle(packet.clone());
            prop_assert!(matches!(action, Ok(Action::Forward(_))), "expected forward, got {:?}", action);
            if let Ok(Action::Forward(out)) = action {
                prop_assert_eq!(out, packet);
            }
        }
    }
}
