//! The process-wide scratch buffer (§3 `PacketBuffer`, §6 "Max frame
//! length: 1500 octets").
//!
//! A single buffer is reinterpreted in place as MAC/IP/ARP/ICMP/UDP/TCP
//! header overlays over the course of one [`crate::engine::NetStack::periodic`]
//! iteration — it is not copied between layers. Per §9's design note on
//! "in-place packet rewriting via overlapping header overlays", the
//! overlay types themselves (in [`crate::mac`], [`crate::ipv4`], etc.) are
//! `zerocopy` views constructed from byte slices taken out of this buffer,
//! rather than raw pointer casts.

/// Largest Ethernet frame this stack will receive or transmit, matching
/// the controller's configured MTU (§6).
pub const MAX_FRAME_LEN: usize = 1500;

/// The scratch buffer backing store. §3 requires at least 500 bytes; this
/// crate sizes it to the full frame budget so IP fragmentation is never
/// needed to hold one frame (fragmentation/reassembly is a Non-goal, §1).
pub struct PacketBuffer {
    bytes: [u8; MAX_FRAME_LEN],
}

impl PacketBuffer {
    pub const fn new() -> Self {
        Self {
            bytes: [0; MAX_FRAME_LEN],
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new()
    }
}
