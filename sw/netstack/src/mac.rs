//! Ethernet II MAC frame header overlay (§4.1 byte-order helpers apply to
//! every multi-byte field here via `zerocopy`'s network-endian integers).

use zerocopy::byteorder::network_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::addr::MacAddr;

pub const MAC_HEADER_LEN: usize = 14;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

/// A 14-byte Ethernet II header: destination MAC, source MAC, ethertype.
/// No 802.1Q VLAN tag support — a tagged frame's ethertype would read as
/// `0x8100` and fall through the engine's dispatch as unrecognized (§4.12).
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
pub struct EthernetHeader {
    pub dest: MacAddr,
    pub src: MacAddr,
    pub ethertype: U16,
}

impl EthernetHeader {
    /// View the first [`MAC_HEADER_LEN`] bytes of `buf` as an Ethernet
    /// header, if there are enough of them.
    pub fn parse(buf: &[u8]) -> Option<&EthernetHeader> {
        EthernetHeader::ref_from_prefix(buf).ok().map(|(hdr, _)| hdr)
    }

    pub fn parse_mut(buf: &mut [u8]) -> Option<&mut EthernetHeader> {
        EthernetHeader::mut_from_prefix(buf).ok().map(|(hdr, _)| hdr)
    }

    pub fn ethertype(&self) -> u16 {
        self.ethertype.get()
    }

    pub fn set_ethertype(&mut self, value: u16) {
        self.ethertype.set(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_short_buffers() {
        let buf = [0u8; 13];
        assert!(EthernetHeader::parse(&buf).is_none());
    }

    #[test]
    fn parse_reads_ethertype_in_host_order() {
        let mut buf = [0u8; MAC_HEADER_LEN];
        buf[12] = 0x08;
        buf[13] = 0x00;
        let hdr = EthernetHeader::parse(&buf).unwrap();
        assert_eq!(hdr.ethertype(), ETHERTYPE_IPV4);
    }
}
