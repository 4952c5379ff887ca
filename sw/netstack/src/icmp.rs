//! ICMP echo request/reply (§4.7, RFC 792).
//!
//! Only echo (type 8/0) is handled; everything else is silently dropped,
//! matching §7's "malformed/unhandled → drop, no reply" policy. This is
//! the only ICMP message type the spec calls out, so it is the only one
//! implemented.

use zerocopy::byteorder::network_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::ipv4::{checksum, Ipv4Header, IPV4_MIN_FRAME_LEN};
use crate::mac::{EthernetHeader, MAC_HEADER_LEN};

pub const ICMP_HEADER_LEN: usize = 8;
pub const ICMP_ECHO_REQUEST: u8 = 8;
pub const ICMP_ECHO_REPLY: u8 = 0;

#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct IcmpHeader {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: U16,
    pub id: U16,
    pub seq: U16,
}

impl IcmpHeader {
    pub fn parse(buf: &[u8]) -> Option<&IcmpHeader> {
        IcmpHeader::ref_from_prefix(buf).ok().map(|(hdr, _)| hdr)
    }

    pub fn parse_mut(buf: &mut [u8]) -> Option<&mut IcmpHeader> {
        IcmpHeader::mut_from_prefix(buf).ok().map(|(hdr, _)| hdr)
    }
}

/// Handle one inbound ICMP datagram carried in `buf[..len]` (a full
/// Ethernet frame: MAC header, then IPv4 header, then the ICMP message).
/// Returns the length of an in-place reply to transmit, or 0 to drop.
pub fn decode(buf: &mut [u8], len: usize) -> u16 {
    if len < IPV4_MIN_FRAME_LEN + ICMP_HEADER_LEN {
        return 0;
    }
    let icmp_type = buf[IPV4_MIN_FRAME_LEN];
    let code = buf[IPV4_MIN_FRAME_LEN + 1];
    if icmp_type != ICMP_ECHO_REQUEST || code != 0 {
        return 0;
    }
    echo_reply(buf, len)
}

/// Rewrite an echo request frame into an echo reply in place: swap the
/// link-layer and IP source/destination, flip the ICMP type, and
/// recompute the ICMP checksum over the (unchanged) header + payload.
fn echo_reply(buf: &mut [u8], len: usize) -> u16 {
    // Swap Ethernet src/dest.
    if let Some(eth) = EthernetHeader::parse_mut(buf) {
        core::mem::swap(&mut eth.dest, &mut eth.src);
    }
    // Swap IP src/dest; leave everything else (TTL, id, etc.) as the
    // sender set it, matching the teacher's minimal echo semantics.
    let ip_total_len = if let Some(ip) = Ipv4Header::parse_mut(&mut buf[MAC_HEADER_LEN..]) {
        core::mem::swap(&mut ip.src, &mut ip.dest);
        ip.total_length()
    } else {
        return 0;
    };
    // Flip ICMP type to echo-reply; id/seq/payload are echoed unchanged.
    if let Some(icmp) = IcmpHeader::parse_mut(&mut buf[IPV4_MIN_FRAME_LEN..]) {
        icmp.icmp_type = ICMP_ECHO_REPLY;
        icmp.checksum.set(0);
    } else {
        return 0;
    }
    let icmp_len = (ip_total_len as usize).saturating_sub(crate::ipv4::IPV4_MIN_HEADER_LEN);
    let icmp_end = IPV4_MIN_FRAME_LEN + icmp_len;
    if icmp_end > len {
        return 0;
    }
    let csum = checksum(&buf[IPV4_MIN_FRAME_LEN..icmp_end]);
    if let Some(icmp) = IcmpHeader::parse_mut(&mut buf[IPV4_MIN_FRAME_LEN..]) {
        icmp.checksum.set(csum);
    }
    (MAC_HEADER_LEN as u16) + ip_total_len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::{Ipv4Addr, MacAddr};
    use crate::ipv4::{DEFAULT_TTL, PROTO_ICMP, VERSION_4_IHL_5};
    use crate::mac::ETHERTYPE_IPV4;

    fn build_echo_request(payload: &[u8]) -> ([u8; crate::buffer::MAX_FRAME_LEN], usize) {
        let mut buf = [0u8; crate::buffer::MAX_FRAME_LEN];
        let eth = EthernetHeader::parse_mut(&mut buf).unwrap();
        eth.dest = MacAddr::new([0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0x02]);
        eth.src = MacAddr::new([0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0x01]);
        eth.set_ethertype(ETHERTYPE_IPV4);

        let total_len = (IPV4_MIN_FRAME_LEN - MAC_HEADER_LEN + ICMP_HEADER_LEN + payload.len()) as u16;
        {
            let ip = Ipv4Header::parse_mut(&mut buf[MAC_HEADER_LEN..]).unwrap();
            ip.version_ihl = VERSION_4_IHL_5;
            ip.set_total_length(total_len);
            ip.ttl = DEFAULT_TTL;
            ip.protocol = PROTO_ICMP;
            ip.src = Ipv4Addr::new(10, 0, 1, 100);
            ip.dest = Ipv4Addr::new(10, 0, 1, 30);
        }
        {
            let icmp = IcmpHeader::parse_mut(&mut buf[IPV4_MIN_FRAME_LEN..]).unwrap();
            icmp.icmp_type = ICMP_ECHO_REQUEST;
            icmp.code = 0;
            icmp.id.set(1);
            icmp.seq.set(1);
        }
        let payload_start = IPV4_MIN_FRAME_LEN + ICMP_HEADER_LEN;
        buf[payload_start..payload_start + payload.len()].copy_from_slice(payload);
        let frame_len = payload_start + payload.len();
        (buf, frame_len)
    }

    #[test]
    fn s1_echo_reply_swaps_addrs_and_flips_type() {
        let payload = [0u8; 56];
        let (mut buf, len) = build_echo_request(&payload);
        let reply_len = decode(&mut buf, len);

        let ip = Ipv4Header::parse(&buf[MAC_HEADER_LEN..]).unwrap();
        assert_eq!(reply_len, MAC_HEADER_LEN as u16 + ip.total_length());
        assert_eq!(ip.src, Ipv4Addr::new(10, 0, 1, 30));
        assert_eq!(ip.dest, Ipv4Addr::new(10, 0, 1, 100));

        let eth = EthernetHeader::parse(&buf).unwrap();
        assert_eq!(eth.src, MacAddr::new([0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0x02]));
        assert_eq!(eth.dest, MacAddr::new([0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0x01]));

        let icmp = IcmpHeader::parse(&buf[IPV4_MIN_FRAME_LEN..]).unwrap();
        assert_eq!(icmp.icmp_type, ICMP_ECHO_REPLY);
        assert_eq!(icmp.id.get(), 1);
        assert_eq!(icmp.seq.get(), 1);
        assert_ne!(icmp.checksum.get(), 0);
    }

    #[test]
    fn non_echo_request_is_dropped() {
        let (mut buf, len) = build_echo_request(&[]);
        {
            let icmp = IcmpHeader::parse_mut(&mut buf[IPV4_MIN_FRAME_LEN..]).unwrap();
            icmp.icmp_type = 3; // destination unreachable, not handled
        }
        assert_eq!(decode(&mut buf, len), 0);
    }
}
