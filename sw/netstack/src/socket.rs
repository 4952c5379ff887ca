//! Socket facade (§4.10): a small BSD-socket-like create/bind/read/write/
//! close surface layered above [`crate::udp`].
//!
//! [`crate::udp::UdpBindings`] is a callback table — a bound port's handler
//! runs synchronously inside `decode` and hands back an immediate reply.
//! That fits a fixed service like echo, but not an application that wants
//! to poll for datagrams on its own schedule. `SocketTable` is the other
//! shape: a socket's inbound datagrams are buffered (one at a time, since
//! there is no allocator to grow a queue) until the application calls
//! [`SocketTable::read`], and outbound datagrams are built on demand by
//! [`SocketTable::send_to`] rather than returned inline from a callback.
//! The engine tries `SocketTable::deliver` for a bound UDP port before
//! falling back to the `UdpBindings` callback table.
//!
//! Only `AF_INET`/`SOCK_DGRAM` is implemented; every other combination is
//! enumerated so callers can name their intent, but rejected with
//! [`NetError::NotImplemented`] (§3, §4.10) — this matches the spec's
//! stated scope (no TCP socket API, no raw sockets).

use crate::addr::{Ipv4Addr, MacAddr};
use crate::config::HostConfig;
use crate::error::{NetError, NetResult};
use crate::ipv4::{Ipv4Header, PROTO_UDP, VERSION_4_IHL_5};
use crate::mac::{EthernetHeader, ETHERTYPE_IPV4, MAC_HEADER_LEN};
use crate::udp::{UdpHeader, IPV4_MIN_FRAME_LEN, MIN_UDP_FRAME_LEN, UDP_HEADER_LEN};

/// Max simultaneously open sockets. Unspecified by the source; chosen
/// small since this facade exists for application code layered on top of
/// the stack, not for the stack's own DHCP/ARP/ICMP traffic.
pub const MAX_SOCKETS: usize = 4;

/// Largest datagram a socket will buffer for a pending `read`. Unspecified
/// by the source; matches a generous single-packet payload without
/// reserving the full 1500-byte frame budget per socket.
pub const SOCKET_RX_CAP: usize = 512;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SocketDomain {
    Inet,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SocketType {
    Dgram,
    Stream,
}

/// An opaque reference to a live socket, returned by [`SocketTable::create`].
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct SocketHandle(usize);

#[derive(Copy, Clone)]
struct Datagram {
    src_ip: Ipv4Addr,
    src_port: u16,
    data: [u8; SOCKET_RX_CAP],
    len: usize,
}

#[derive(Copy, Clone)]
struct SocketSlot {
    in_use: bool,
    local_port: Option<u16>,
    rx: Option<Datagram>,
}

impl SocketSlot {
    const fn empty() -> Self {
        Self {
            in_use: false,
            local_port: None,
            rx: None,
        }
    }
}

/// Fixed-capacity table of open sockets (§3, §4.10).
pub struct SocketTable {
    slots: [SocketSlot; MAX_SOCKETS],
}

impl SocketTable {
    pub const fn new() -> Self {
        const EMPTY: SocketSlot = SocketSlot::empty();
        Self {
            slots: [EMPTY; MAX_SOCKETS],
        }
    }

    /// Allocate a socket. Only `(Inet, Dgram)` is supported.
    pub fn create(&mut self, domain: SocketDomain, kind: SocketType) -> NetResult<SocketHandle> {
        if domain != SocketDomain::Inet || kind != SocketType::Dgram {
            return Err(NetError::NotImplemented);
        }
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if !slot.in_use {
                *slot = SocketSlot {
                    in_use: true,
                    local_port: None,
                    rx: None,
                };
                return Ok(SocketHandle(i));
            }
        }
        debug::logln!(debug::LL::Warn, "socket: table full");
        Err(NetError::TableFull)
    }

    /// Bind `handle` to `port`. Only one socket (and no `UdpBindings`
    /// callback) may own a given port at a time — callers that need both a
    /// fixed service and an application socket should pick disjoint ports.
    pub fn bind(&mut self, handle: SocketHandle, port: u16) -> NetResult<()> {
        if self.slots.iter().any(|s| s.in_use && s.local_port == Some(port)) {
            return Err(NetError::PortInUse);
        }
        let slot = self.slots.get_mut(handle.0).ok_or(NetError::InvalidArgument)?;
        if !slot.in_use {
            return Err(NetError::InvalidArgument);
        }
        slot.local_port = Some(port);
        Ok(())
    }

    /// Release `handle`. Any buffered, unread datagram is discarded.
    pub fn close(&mut self, handle: SocketHandle) {
        if let Some(slot) = self.slots.get_mut(handle.0) {
            *slot = SocketSlot::empty();
        }
    }

    /// Copy the oldest buffered datagram into `out`, returning the sender's
    /// address and the number of bytes copied, or `None` if nothing is
    /// pending. A datagram longer than `out` is truncated.
    pub fn read(&mut self, handle: SocketHandle, out: &mut [u8]) -> Option<(Ipv4Addr, u16, usize)> {
        let slot = self.slots.get_mut(handle.0)?;
        let dgram = slot.rx.take()?;
        let n = dgram.len.min(out.len());
        out[..n].copy_from_slice(&dgram.data[..n]);
        Some((dgram.src_ip, dgram.src_port, n))
    }

    /// True if `handle` has a datagram ready for [`SocketTable::read`].
    pub fn has_pending(&self, handle: SocketHandle) -> bool {
        self.slots.get(handle.0).map(|s| s.rx.is_some()).unwrap_or(false)
    }

    /// Deliver one inbound datagram to whichever socket (if any) is bound
    /// to `dest_port`. Returns `true` if a socket accepted it — the engine
    /// should only fall back to [`crate::udp::UdpBindings`] when this
    /// returns `false`. A datagram arriving while the previous one is still
    /// unread is dropped (no queue depth beyond one, consistent with this
    /// crate's no-allocation, bounded-memory design).
    pub fn deliver(&mut self, dest_port: u16, src_ip: Ipv4Addr, src_port: u16, payload: &[u8]) -> bool {
        let slot = match self.slots.iter_mut().find(|s| s.in_use && s.local_port == Some(dest_port)) {
            Some(s) => s,
            None => return false,
        };
        if slot.rx.is_some() {
            return true; // bound here, just dropped for lack of buffer room
        }
        let len = payload.len().min(SOCKET_RX_CAP);
        let mut data = [0u8; SOCKET_RX_CAP];
        data[..len].copy_from_slice(&payload[..len]);
        slot.rx = Some(Datagram {
            src_ip,
            src_port,
            data,
            len,
        });
        true
    }

    /// Build a complete outbound Ethernet/IP/UDP frame carrying `payload`
    /// from `handle`'s bound port to `(dest_ip, dest_port)`, written into
    /// `buf`. Returns the frame length, or 0 if `handle` isn't bound or
    /// `buf` is too small. The caller (the engine) still has to run this
    /// through [`crate::arp::encode`] before transmitting, exactly as for
    /// any other locally-originated frame. `ip_id` is the caller-supplied
    /// (pseudo-random, per §4.10 `write`) IPv4 identification field.
    pub fn send_to(&self, handle: SocketHandle, host: &HostConfig, buf: &mut [u8], dest_ip: Ipv4Addr, dest_port: u16, payload: &[u8], ip_id: u16) -> u16 {
        let local_port = match self.slots.get(handle.0).and_then(|s| s.local_port) {
            Some(p) => p,
            None => return 0,
        };
        let total_len = MIN_UDP_FRAME_LEN + payload.len();
        if buf.len() < total_len {
            return 0;
        }

        if let Some(eth) = EthernetHeader::parse_mut(buf) {
            eth.dest = MacAddr::ZERO; // resolved by arp::encode
            eth.src = host.host_mac;
            eth.set_ethertype(ETHERTYPE_IPV4);
        }
        if let Some(ip) = Ipv4Header::parse_mut(&mut buf[MAC_HEADER_LEN..]) {
            ip.version_ihl = VERSION_4_IHL_5;
            ip.services = 0;
            ip.set_total_length((crate::ipv4::IPV4_MIN_HEADER_LEN + UDP_HEADER_LEN + payload.len()) as u16);
            ip.set_identification(ip_id);
            ip.flags_fragment_offset.set(0);
            ip.ttl = crate::ipv4::DEFAULT_TTL;
            ip.protocol = PROTO_UDP;
            ip.set_checksum_field(0);
            ip.src = host.host_ip;
            ip.dest = dest_ip;
        }
        if let Some(udp) = UdpHeader::parse_mut(&mut buf[IPV4_MIN_FRAME_LEN..]) {
            udp.src_port.set(local_port);
            udp.dest_port.set(dest_port);
            udp.length.set((UDP_HEADER_LEN + payload.len()) as u16);
            udp.checksum.set(0);
        }
        buf[MIN_UDP_FRAME_LEN..total_len].copy_from_slice(payload);

        let ip_csum = crate::ipv4::checksum(&buf[MAC_HEADER_LEN..IPV4_MIN_FRAME_LEN]);
        if let Some(ip) = Ipv4Header::parse_mut(&mut buf[MAC_HEADER_LEN..]) {
            ip.set_checksum_field(ip_csum);
        }
        let udp_csum = crate::udp::checksum(host.host_ip, dest_ip, &buf[IPV4_MIN_FRAME_LEN..total_len]);
        if let Some(udp) = UdpHeader::parse_mut(&mut buf[IPV4_MIN_FRAME_LEN..]) {
            udp.checksum.set(udp_csum);
        }

        total_len as u16
    }
}

impl Default for SocketTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_config() -> HostConfig {
        HostConfig {
            host_mac: MacAddr::new([0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0x01]),
            host_ip: Ipv4Addr::new(10, 0, 1, 30),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            default_router: Ipv4Addr::new(10, 0, 1, 1),
        }
    }

    #[test]
    fn create_rejects_unsupported_combinations() {
        let mut t = SocketTable::new();
        assert_eq!(t.create(SocketDomain::Inet, SocketType::Stream), Err(NetError::NotImplemented));
    }

    #[test]
    fn bind_rejects_duplicate_port() {
        let mut t = SocketTable::new();
        let a = t.create(SocketDomain::Inet, SocketType::Dgram).unwrap();
        let b = t.create(SocketDomain::Inet, SocketType::Dgram).unwrap();
        t.bind(a, 9000).unwrap();
        assert_eq!(t.bind(b, 9000), Err(NetError::PortInUse));
    }

    #[test]
    fn deliver_then_read_roundtrip() {
        let mut t = SocketTable::new();
        let s = t.create(SocketDomain::Inet, SocketType::Dgram).unwrap();
        t.bind(s, 9000).unwrap();
        assert!(t.deliver(9000, Ipv4Addr::new(10, 0, 1, 50), 4000, b"hello"));
        assert!(t.has_pending(s));
        let mut out = [0u8; 16];
        let (src_ip, src_port, n) = t.read(s, &mut out).unwrap();
        assert_eq!(&out[..n], b"hello");
        assert_eq!(src_ip, Ipv4Addr::new(10, 0, 1, 50));
        assert_eq!(src_port, 4000);
        assert!(!t.has_pending(s));
    }

    #[test]
    fn deliver_to_unbound_port_is_not_accepted() {
        let mut t = SocketTable::new();
        let s = t.create(SocketDomain::Inet, SocketType::Dgram).unwrap();
        t.bind(s, 9000).unwrap();
        assert!(!t.deliver(1234, Ipv4Addr::new(10, 0, 1, 50), 4000, b"x"));
    }

    #[test]
    fn send_to_builds_valid_checksummed_frame() {
        let mut t = SocketTable::new();
        let s = t.create(SocketDomain::Inet, SocketType::Dgram).unwrap();
        t.bind(s, 9000).unwrap();
        let host = host_config();
        let mut buf = [0u8; crate::buffer::MAX_FRAME_LEN];
        let len = t.send_to(s, &host, &mut buf, Ipv4Addr::new(10, 0, 1, 99), 7, b"ping", 0xBEEF);
        assert_eq!(len as usize, MIN_UDP_FRAME_LEN + 4);
        let ip = Ipv4Header::parse(&buf[MAC_HEADER_LEN..]).unwrap();
        assert_eq!(ip.src, host.host_ip);
        assert_eq!(ip.dest, Ipv4Addr::new(10, 0, 1, 99));
        assert_eq!(ip.identification(), 0xBEEF);
        let udp = UdpHeader::parse(&buf[IPV4_MIN_FRAME_LEN..]).unwrap();
        assert_eq!(udp.src_port.get(), 9000);
        assert_eq!(udp.dest_port.get(), 7);
        assert_ne!(udp.checksum.get(), 0);
    }

    #[test]
    fn close_discards_pending_datagram() {
        let mut t = SocketTable::new();
        let s = t.create(SocketDomain::Inet, SocketType::Dgram).unwrap();
        t.bind(s, 9000).unwrap();
        t.deliver(9000, Ipv4Addr::new(10, 0, 1, 50), 4000, b"x");
        t.close(s);
        let s2 = t.create(SocketDomain::Inet, SocketType::Dgram).unwrap();
        assert_eq!(s2, s);
        assert!(!t.has_pending(s2));
    }
}
