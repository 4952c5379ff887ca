//! UDP header overlay, checksum, and port-binding table (§4.8).

use zerocopy::byteorder::network_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::addr::Ipv4Addr;
use crate::error::{NetError, NetResult};
use crate::ipv4::{ChecksumAccumulator, Ipv4Header, PROTO_UDP};
use crate::mac::{EthernetHeader, MAC_HEADER_LEN};

pub const UDP_HEADER_LEN: usize = 8;
pub const IPV4_MIN_HEADER_LEN: usize = crate::ipv4::IPV4_MIN_HEADER_LEN;
pub const IPV4_MIN_FRAME_LEN: usize = crate::ipv4::IPV4_MIN_FRAME_LEN;
pub const MIN_UDP_FRAME_LEN: usize = IPV4_MIN_FRAME_LEN + UDP_HEADER_LEN;

/// Max simultaneous UDP port bindings (§6).
pub const MAX_UDP_BINDINGS: usize = 10;

#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct UdpHeader {
    pub src_port: U16,
    pub dest_port: U16,
    pub length: U16,
    pub checksum: U16,
}

impl UdpHeader {
    pub fn parse(buf: &[u8]) -> Option<&UdpHeader> {
        UdpHeader::ref_from_prefix(buf).ok().map(|(hdr, _)| hdr)
    }

    pub fn parse_mut(buf: &mut [u8]) -> Option<&mut UdpHeader> {
        UdpHeader::mut_from_prefix(buf).ok().map(|(hdr, _)| hdr)
    }
}

/// One's-complement checksum over an IPv4 pseudo-header plus a UDP
/// datagram (RFC 768 §3). `datagram` is the UDP header followed by its
/// payload, i.e. `udp_length` bytes.
pub fn checksum(src: Ipv4Addr, dest: Ipv4Addr, datagram: &[u8]) -> u16 {
    let mut acc = ChecksumAccumulator::new();
    crate::ipv4::pseudo_header_into(&mut acc, src, dest, PROTO_UDP, datagram.len() as u16);
    acc.add_bytes(datagram);
    acc.finish()
}

/// A registered handler for datagrams arriving on a bound port.
///
/// Implementations get a mutable view of the payload *in place inside the
/// shared scratch buffer*, up to `capacity` bytes, and return the length
/// of a reply to leave in that same region (0 for "no reply"). The engine
/// takes care of swapping the surrounding Ethernet/IP/UDP addressing and
/// recomputing checksums; the handler only owns the payload bytes.
pub trait UdpHandler {
    fn on_datagram(&self, src_port: u16, dest_port: u16, payload: &mut [u8], payload_len: usize, capacity: usize) -> u16;
}

struct Binding {
    port: u16,
    handler: &'static dyn UdpHandler,
}

/// Fixed-capacity table of UDP port bindings (§3 `PortBinding`).
pub struct UdpBindings {
    slots: [Option<Binding>; MAX_UDP_BINDINGS],
}

impl UdpBindings {
    pub const fn new() -> Self {
        const NONE: Option<Binding> = None;
        Self {
            slots: [NONE; MAX_UDP_BINDINGS],
        }
    }

    pub fn bind(&mut self, port: u16, handler: &'static dyn UdpHandler) -> NetResult<()> {
        if self.slots.iter().flatten().any(|b| b.port == port) {
            return Err(NetError::PortInUse);
        }
        for slot in self.slots.iter_mut() {
            if slot.is_none() {
                *slot = Some(Binding { port, handler });
                return Ok(());
            }
        }
        debug::logln!(debug::LL::Warn, "udp: binding table full");
        Err(NetError::TableFull)
    }

    pub fn unbind(&mut self, port: u16) {
        for slot in self.slots.iter_mut() {
            if slot.as_ref().map(|b| b.port) == Some(port) {
                *slot = None;
                return;
            }
        }
    }

    fn find(&self, port: u16) -> Option<&'static dyn UdpHandler> {
        self.slots
            .iter()
            .flatten()
            .find(|b| b.port == port)
            .map(|b| b.handler)
    }
}

impl Default for UdpBindings {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle one inbound UDP datagram carried in `buf[..len]`. Returns the
/// length of an in-place reply to transmit, or 0 to drop (§4.8).
pub fn decode(bindings: &UdpBindings, buf: &mut [u8], len: usize) -> u16 {
    if len < MIN_UDP_FRAME_LEN {
        return 0;
    }
    let dest_port = match UdpHeader::parse(&buf[IPV4_MIN_FRAME_LEN..]) {
        Some(hdr) => hdr.dest_port.get(),
        None => return 0,
    };
    let handler = match bindings.find(dest_port) {
        Some(h) => h,
        None => return 0,
    };

    let (src_ip, dest_ip) = {
        let ip = match Ipv4Header::parse(&buf[MAC_HEADER_LEN..]) {
            Some(ip) => ip,
            None => return 0,
        };
        (ip.src, ip.dest)
    };
    let (udp_len, on_wire_checksum) = match UdpHeader::parse(&buf[IPV4_MIN_FRAME_LEN..]) {
        Some(hdr) => (hdr.length.get() as usize, hdr.checksum.get()),
        None => return 0,
    };
    if IPV4_MIN_FRAME_LEN + udp_len > len || udp_len < UDP_HEADER_LEN {
        return 0;
    }
    if on_wire_checksum != 0 {
        if let Some(hdr) = UdpHeader::parse_mut(&mut buf[IPV4_MIN_FRAME_LEN..]) {
            hdr.checksum.set(0);
        }
        let computed = checksum(src_ip, dest_ip, &buf[IPV4_MIN_FRAME_LEN..IPV4_MIN_FRAME_LEN + udp_len]);
        if computed != on_wire_checksum {
            return 0;
        }
    }

    let src_port = match UdpHeader::parse(&buf[IPV4_MIN_FRAME_LEN..]) {
        Some(hdr) => hdr.src_port.get(),
        None => return 0,
    };
    let payload_start = IPV4_MIN_FRAME_LEN + UDP_HEADER_LEN;
    let payload_len = udp_len - UDP_HEADER_LEN;
    let capacity = buf.len() - payload_start;
    let reply_payload_len =
        handler.on_datagram(src_port, dest_port, &mut buf[payload_start..], payload_len, capacity);
    if reply_payload_len == 0 {
        return 0;
    }

    compose_reply(buf, dest_port, src_port, reply_payload_len)
}

/// Swap the Ethernet/IP/UDP addressing for a reply whose payload has
/// already been written at `buf[payload_start..]`, then recompute lengths
/// and checksums. Returns the total frame length, or 0 if the buffer
/// doesn't hold the headers it's expected to at this point.
fn compose_reply(buf: &mut [u8], reply_src_port: u16, reply_dest_port: u16, payload_len: u16) -> u16 {
    if let Some(eth) = EthernetHeader::parse_mut(buf) {
        core::mem::swap(&mut eth.dest, &mut eth.src);
    }
    let (src_ip, dest_ip) = match Ipv4Header::parse_mut(&mut buf[MAC_HEADER_LEN..]) {
        Some(ip) => {
            core::mem::swap(&mut ip.src, &mut ip.dest);
            let udp_total = UDP_HEADER_LEN as u16 + payload_len;
            ip.set_total_length(IPV4_MIN_HEADER_LEN as u16 + udp_total);
            (ip.src, ip.dest)
        }
        None => return 0,
    };
    let udp_len = UDP_HEADER_LEN as u16 + payload_len;
    if let Some(hdr) = UdpHeader::parse_mut(&mut buf[IPV4_MIN_FRAME_LEN..]) {
        hdr.src_port.set(reply_src_port);
        hdr.dest_port.set(reply_dest_port);
        hdr.length.set(udp_len);
        hdr.checksum.set(0);
    } else {
        return 0;
    }
    let ip_csum = crate::ipv4::checksum(&buf[MAC_HEADER_LEN..IPV4_MIN_FRAME_LEN]);
    if let Some(ip) = Ipv4Header::parse_mut(&mut buf[MAC_HEADER_LEN..]) {
        ip.set_checksum_field(ip_csum);
    }
    let udp_csum = checksum(src_ip, dest_ip, &buf[IPV4_MIN_FRAME_LEN..IPV4_MIN_FRAME_LEN + udp_len as usize]);
    if let Some(hdr) = UdpHeader::parse_mut(&mut buf[IPV4_MIN_FRAME_LEN..]) {
        hdr.checksum.set(udp_csum);
    }

    MAC_HEADER_LEN as u16 + IPV4_MIN_HEADER_LEN as u16 + udp_len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipv4::{DEFAULT_TTL, VERSION_4_IHL_5};
    use crate::mac::ETHERTYPE_IPV4;

    struct Echo;
    impl UdpHandler for Echo {
        fn on_datagram(&self, _src_port: u16, _dest_port: u16, _payload: &mut [u8], payload_len: usize, _capacity: usize) -> u16 {
            payload_len as u16
        }
    }
    static ECHO: Echo = Echo;

    fn build_udp_frame(dest_port: u16, payload: &[u8]) -> ([u8; crate::buffer::MAX_FRAME_LEN], usize) {
        let mut buf = [0u8; crate::buffer::MAX_FRAME_LEN];
        {
            let eth = EthernetHeader::parse_mut(&mut buf).unwrap();
            eth.set_ethertype(ETHERTYPE_IPV4);
        }
        let udp_len = (UDP_HEADER_LEN + payload.len()) as u16;
        {
            let ip = Ipv4Header::parse_mut(&mut buf[MAC_HEADER_LEN..]).unwrap();
            ip.version_ihl = VERSION_4_IHL_5;
            ip.ttl = DEFAULT_TTL;
            ip.protocol = PROTO_UDP;
            ip.src = Ipv4Addr::new(10, 0, 1, 100);
            ip.dest = Ipv4Addr::new(10, 0, 1, 30);
            ip.set_total_length(IPV4_MIN_HEADER_LEN as u16 + udp_len);
        }
        {
            let hdr = UdpHeader::parse_mut(&mut buf[IPV4_MIN_FRAME_LEN..]).unwrap();
            hdr.src_port.set(54321);
            hdr.dest_port.set(dest_port);
            hdr.length.set(udp_len);
            hdr.checksum.set(0);
        }
        let payload_start = IPV4_MIN_FRAME_LEN + UDP_HEADER_LEN;
        buf[payload_start..payload_start + payload.len()].copy_from_slice(payload);
        (buf, payload_start + payload.len())
    }

    #[test]
    fn s5_echo_on_port_7() {
        let mut bindings = UdpBindings::new();
        bindings.bind(7, &ECHO).unwrap();
        let (mut buf, len) = build_udp_frame(7, b"hello");
        let reply_len = decode(&bindings, &mut buf, len);
        assert!(reply_len > 0);

        let hdr = UdpHeader::parse(&buf[IPV4_MIN_FRAME_LEN..]).unwrap();
        assert_eq!(hdr.src_port.get(), 7);
        assert_eq!(hdr.dest_port.get(), 54321);
        assert_eq!(hdr.length.get(), UDP_HEADER_LEN as u16 + 5);

        let payload_start = IPV4_MIN_FRAME_LEN + UDP_HEADER_LEN;
        assert_eq!(&buf[payload_start..payload_start + 5], b"hello");

        let ip = Ipv4Header::parse(&buf[MAC_HEADER_LEN..]).unwrap();
        assert_eq!(ip.src, Ipv4Addr::new(10, 0, 1, 30));
        assert_eq!(ip.dest, Ipv4Addr::new(10, 0, 1, 100));
    }

    #[test]
    fn unbound_port_is_dropped() {
        let bindings = UdpBindings::new();
        let (mut buf, len) = build_udp_frame(9999, b"x");
        assert_eq!(decode(&bindings, &mut buf, len), 0);
    }

    #[test]
    fn bind_rejects_duplicate_port() {
        let mut bindings = UdpBindings::new();
        bindings.bind(7, &ECHO).unwrap();
        assert_eq!(bindings.bind(7, &ECHO), Err(NetError::PortInUse));
    }

    #[test]
    fn bind_rejects_when_table_full() {
        let mut bindings = UdpBindings::new();
        for port in 0..MAX_UDP_BINDINGS as u16 {
            bindings.bind(1000 + port, &ECHO).unwrap();
        }
        assert_eq!(bindings.bind(9999, &ECHO), Err(NetError::TableFull));
    }

    #[test]
    fn checksum_roundtrip() {
        let src = Ipv4Addr::new(10, 0, 1, 100);
        let dest = Ipv4Addr::new(10, 0, 1, 30);
        let mut datagram = [0u8; UDP_HEADER_LEN + 4];
        datagram[0..2].copy_from_slice(&1234u16.to_be_bytes());
        datagram[2..4].copy_from_slice(&7u16.to_be_bytes());
        datagram[4..6].copy_from_slice(&(datagram.len() as u16).to_be_bytes());
        datagram[8..12].copy_from_slice(b"ping");
        let csum = checksum(src, dest, &datagram);
        datagram[6..8].copy_from_slice(&csum.to_be_bytes());
        assert_eq!(checksum(src, dest, &datagram), 0);
    }
}
