//! ARP cache and resolver (§4.5) — "the central correctness-critical piece
//! of the stack".
//!
//! Three responsibilities share this module because they share one piece
//! of state, the cache: inbound request/reply handling ([`decode`]),
//! outbound resolution with ARP-request substitution ([`encode`]), and
//! age-based eviction ([`ArpTable::age_tick`]).

use zerocopy::byteorder::network_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::addr::{Ipv4Addr, MacAddr};
use crate::config::HostConfig;
use crate::ipv4::Ipv4Header;
use crate::mac::{EthernetHeader, ETHERTYPE_ARP, ETHERTYPE_IPV4, MAC_HEADER_LEN};
use crate::queue::PacketQueue;

pub const ARP_HEADER_LEN: usize = 28;
pub const ARP_FRAME_LEN: usize = MAC_HEADER_LEN + ARP_HEADER_LEN;

const HTYPE_ETHERNET: u16 = 1;
const PTYPE_IPV4: u16 = ETHERTYPE_IPV4;
const HLEN_ETHERNET: u8 = 6;
const PLEN_IPV4: u8 = 4;
const OPER_REQUEST: u16 = 1;
const OPER_REPLY: u16 = 2;

/// Number of live (ip, mac) bindings held at once (§6).
pub const ARP_TABLE_SIZE: usize = 10;

/// Aging ticks (~10 s each per §4.5) an entry survives before eviction.
pub const ARP_MAX_AGE: u8 = 120;

#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct ArpHeader {
    pub htype: U16,
    pub ptype: U16,
    pub hlen: u8,
    pub plen: u8,
    pub oper: U16,
    pub sha: MacAddr,
    pub spa: Ipv4Addr,
    pub tha: MacAddr,
    pub tpa: Ipv4Addr,
}

impl ArpHeader {
    pub fn parse(buf: &[u8]) -> Option<&ArpHeader> {
        ArpHeader::ref_from_prefix(buf).ok().map(|(hdr, _)| hdr)
    }

    pub fn parse_mut(buf: &mut [u8]) -> Option<&mut ArpHeader> {
        ArpHeader::mut_from_prefix(buf).ok().map(|(hdr, _)| hdr)
    }

    fn is_ethernet_ipv4(&self) -> bool {
        self.htype.get() == HTYPE_ETHERNET
            && self.ptype.get() == PTYPE_IPV4
            && self.hlen == HLEN_ETHERNET
            && self.plen == PLEN_IPV4
    }
}

/// One cache slot (§3 `ArpEntry`). Unused iff `ip` is all-zero.
#[derive(Copy, Clone)]
struct ArpEntry {
    ip: Ipv4Addr,
    mac: MacAddr,
    age_ticks: u8,
}

impl ArpEntry {
    const fn empty() -> Self {
        Self {
            ip: Ipv4Addr::UNSPECIFIED,
            mac: MacAddr::ZERO,
            age_ticks: 0,
        }
    }

    fn is_used(&self) -> bool {
        !self.ip.is_empty()
    }
}

/// IPv4 → MAC cache with LRU-by-age eviction (§3 `ArpTable`, §4.5).
pub struct ArpTable {
    entries: [ArpEntry; ARP_TABLE_SIZE],
    /// Modular aging clock, advanced once per [`ArpTable::age_tick`] call
    /// (the timer wheel drives this every ~10 s).
    arp_time: u8,
}

impl ArpTable {
    pub const fn new() -> Self {
        const EMPTY: ArpEntry = ArpEntry::empty();
        Self {
            entries: [EMPTY; ARP_TABLE_SIZE],
            arp_time: 0,
        }
    }

    pub fn lookup(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.entries
            .iter()
            .find(|e| e.is_used() && e.ip == ip)
            .map(|e| e.mac)
    }

    /// Insert or refresh a binding. Update-in-place if `ip` is already
    /// cached; otherwise the first unused slot; otherwise evict the
    /// modularly oldest entry (§4.5 insertion policy).
    pub fn update(&mut self, ip: Ipv4Addr, mac: MacAddr) {
        if ip.is_empty() {
            return;
        }
        if let Some(e) = self.entries.iter_mut().find(|e| e.is_used() && e.ip == ip) {
            e.mac = mac;
            e.age_ticks = self.arp_time;
            return;
        }
        if let Some(e) = self.entries.iter_mut().find(|e| !e.is_used()) {
            *e = ArpEntry {
                ip,
                mac,
                age_ticks: self.arp_time,
            };
            return;
        }
        debug::logln!(debug::LL::Warn, "arp: table full, evicting oldest entry");
        let arp_time = self.arp_time;
        if let Some(oldest) = self.entries.iter_mut().max_by_key(|e| arp_time.wrapping_sub(e.age_ticks)) {
            *oldest = ArpEntry {
                ip,
                mac,
                age_ticks: arp_time,
            };
        }
    }

    /// Advance the aging clock and evict anything that has aged past
    /// [`ARP_MAX_AGE`]. Intended to be driven by a ~10 s timer.
    pub fn age_tick(&mut self) {
        self.arp_time = self.arp_time.wrapping_add(1);
        let arp_time = self.arp_time;
        for e in self.entries.iter_mut() {
            if e.is_used() && arp_time.wrapping_sub(e.age_ticks) >= ARP_MAX_AGE {
                *e = ArpEntry::empty();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_used()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ArpTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of decoding one inbound ARP frame.
#[derive(Copy, Clone, Default)]
pub struct ArpDecodeResult {
    /// Length of an in-place reply to transmit, or 0.
    pub reply_len: u16,
    /// Set when a REPLY resolved an address the caller should flush
    /// [`PacketQueue`] entries for.
    pub resolved: Option<Ipv4Addr>,
}

/// Handle one inbound ARP frame carried in `buf[..len]` (§4.5 Inbound).
pub fn decode(table: &mut ArpTable, config: &HostConfig, buf: &mut [u8], len: usize) -> ArpDecodeResult {
    if len < ARP_FRAME_LEN {
        return ArpDecodeResult::default();
    }
    let (oper, sha, spa, tpa) = {
        let hdr = match ArpHeader::parse(&buf[MAC_HEADER_LEN..]) {
            Some(h) if h.is_ethernet_ipv4() => h,
            _ => return ArpDecodeResult::default(),
        };
        (hdr.oper.get(), hdr.sha, hdr.spa, hdr.tpa)
    };

    match oper {
        OPER_REQUEST if tpa == config.host_ip => {
            table.update(spa, sha);
            rewrite_as_reply(buf, config, sha, spa);
            ArpDecodeResult {
                reply_len: ARP_FRAME_LEN as u16,
                resolved: None,
            }
        }
        OPER_REPLY if tpa == config.host_ip => {
            table.update(spa, sha);
            ArpDecodeResult {
                reply_len: 0,
                resolved: Some(spa),
            }
        }
        _ => ArpDecodeResult::default(),
    }
}

/// Rewrite an ARP REQUEST in place into a REPLY: swap sender/target IP and
/// MAC, overwrite the new sender MAC with ours, flip the opcode, and point
/// the Ethernet header back at the original requester.
fn rewrite_as_reply(buf: &mut [u8], config: &HostConfig, requester_mac: MacAddr, requested_ip: Ipv4Addr) {
    if let Some(eth) = EthernetHeader::parse_mut(buf) {
        eth.dest = requester_mac;
        eth.src = config.host_mac;
    }
    if let Some(hdr) = ArpHeader::parse_mut(&mut buf[MAC_HEADER_LEN..]) {
        hdr.oper.set(OPER_REPLY);
        hdr.tha = requester_mac;
        hdr.tpa = hdr.spa;
        hdr.sha = config.host_mac;
        hdr.spa = requested_ip;
    }
}

/// Resolve (or substitute a request for) the link-layer destination of an
/// already-built IPv4 frame in `buf[..len]` (§4.5 Outbound).
///
/// On a cache hit, `buf` is rewritten in place with the resolved
/// destination MAC and returned unchanged in length. On a miss, `buf` is
/// queued in `queue` and then rewritten in place as an ARP REQUEST for the
/// resolution target, whose frame length is returned instead.
pub fn encode(table: &ArpTable, config: &HostConfig, queue: &mut PacketQueue, buf: &mut [u8], len: usize, now_seconds: u32) -> u16 {
    let dest_ip = match Ipv4Header::parse(&buf[MAC_HEADER_LEN..]) {
        Some(ip) => ip.dest,
        None => return 0,
    };

    if dest_ip == Ipv4Addr::BROADCAST {
        if let Some(eth) = EthernetHeader::parse_mut(buf) {
            eth.dest = MacAddr::BROADCAST;
            eth.src = config.host_mac;
            eth.set_ethertype(ETHERTYPE_IPV4);
        }
        return len as u16;
    }

    let target_ip = if Ipv4Addr::masked_equal(dest_ip, config.host_ip, config.netmask) {
        dest_ip
    } else {
        config.default_router
    };

    if let Some(mac) = table.lookup(target_ip) {
        if let Some(eth) = EthernetHeader::parse_mut(buf) {
            eth.dest = mac;
            eth.src = config.host_mac;
            eth.set_ethertype(ETHERTYPE_IPV4);
        }
        return len as u16;
    }

    queue.enqueue(target_ip, &buf[..len], now_seconds);
    write_arp_request(buf, config, target_ip);
    ARP_FRAME_LEN as u16
}

fn write_arp_request(buf: &mut [u8], config: &HostConfig, target_ip: Ipv4Addr) {
    if let Some(eth) = EthernetHeader::parse_mut(buf) {
        eth.dest = MacAddr::BROADCAST;
        eth.src = config.host_mac;
        eth.set_ethertype(ETHERTYPE_ARP);
    }
    if let Some(hdr) = ArpHeader::parse_mut(&mut buf[MAC_HEADER_LEN..]) {
        hdr.htype.set(HTYPE_ETHERNET);
        hdr.ptype.set(PTYPE_IPV4);
        hdr.hlen = HLEN_ETHERNET;
        hdr.plen = PLEN_IPV4;
        hdr.oper.set(OPER_REQUEST);
        hdr.sha = config.host_mac;
        hdr.spa = config.host_ip;
        hdr.tha = MacAddr::ZERO;
        hdr.tpa = target_ip;
    }
}
