//! Outbound packet queue for frames deferred pending ARP resolution
//! (§4.11).
//!
//! §9's open question on the ARP-reply "unqueue packets" stub is resolved
//! here: the original only comments that queued packets should flush when
//! a REPLY resolves their target, with no implementation. This queue makes
//! that concrete — [`crate::arp::encode`] enqueues on a cache miss, and
//! [`PacketQueue::drain_for`] is called by the engine whenever
//! [`crate::arp::decode`] reports a newly-resolved IP.

use crate::addr::Ipv4Addr;
use crate::buffer::{PacketBuffer, MAX_FRAME_LEN};

/// Number of outbound frames that can be held pending ARP resolution at
/// once. Not specified by name in source; sized generously relative to
/// the 10-entry ARP table since several sockets could stall on the same
/// unresolved neighbor at once.
pub const MAX_QUEUED_PACKETS: usize = 4;

/// How long a queued frame is allowed to wait for resolution before
/// `periodic` discards it. Source leaves this unspecified; chosen to
/// comfortably exceed a couple of ARP request retries.
pub const QUEUE_ENTRY_TTL_SECONDS: u32 = 5;

struct QueuedPacket {
    buf: PacketBuffer,
    len: u16,
    target_ip: Ipv4Addr,
    expiry_seconds: u32,
}

pub struct PacketQueue {
    slots: [Option<QueuedPacket>; MAX_QUEUED_PACKETS],
}

impl PacketQueue {
    pub const fn new() -> Self {
        const NONE: Option<QueuedPacket> = None;
        Self {
            slots: [NONE; MAX_QUEUED_PACKETS],
        }
    }

    /// Hold `frame` until a binding for `target_ip` appears, or until
    /// `now_seconds + QUEUE_ENTRY_TTL_SECONDS` passes. Drops the oldest
    /// entry (by expiry) to make room if the queue is full — resource
    /// exhaustion here degrades to "send one fewer retried frame", not a
    /// hard error, so there is no `NetError` return.
    pub fn enqueue(&mut self, target_ip: Ipv4Addr, frame: &[u8], now_seconds: u32) {
        if frame.len() > MAX_FRAME_LEN {
            return;
        }
        let expiry_seconds = now_seconds.wrapping_add(QUEUE_ENTRY_TTL_SECONDS);
        let slot_index = match self.slots.iter().position(|s| s.is_none()) {
            Some(i) => i,
            None => {
                debug::logln!(debug::LL::Warn, "queue: packet queue full, dropping oldest");
                self.oldest_index()
            }
        };
        let mut buf = PacketBuffer::new();
        buf.as_mut_slice()[..frame.len()].copy_from_slice(frame);
        self.slots[slot_index] = Some(QueuedPacket {
            buf,
            len: frame.len() as u16,
            target_ip,
            expiry_seconds,
        });
    }

    fn oldest_index(&self) -> usize {
        self.slots
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| s.as_ref().map(|p| p.expiry_seconds).unwrap_or(0))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// Remove every frame whose target matches `target_ip`, handing each
    /// one's bytes to `f` in FIFO order before discarding it. `f` is
    /// expected to re-run ARP encoding (now a hit) and transmit.
    pub fn drain_for<F: FnMut(&mut [u8], usize)>(&mut self, target_ip: Ipv4Addr, mut f: F) {
        for slot in self.slots.iter_mut() {
            let matches = slot.as_ref().map(|p| p.target_ip) == Some(target_ip);
            if matches {
                if let Some(packet) = slot.take() {
                    let mut bytes = packet.buf;
                    f(bytes.as_mut_slice(), packet.len as usize);
                }
            }
        }
    }

    /// Drop every entry past its expiry. Called once per `periodic` tick.
    pub fn periodic(&mut self, now_seconds: u32) {
        for slot in self.slots.iter_mut() {
            let expired = slot.as_ref().map(|p| now_seconds >= p.expiry_seconds).unwrap_or(false);
            if expired {
                *slot = None;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_and_drain_roundtrip() {
        let mut q = PacketQueue::new();
        let target = Ipv4Addr::new(10, 0, 1, 99);
        q.enqueue(target, &[1, 2, 3, 4], 0);
        assert_eq!(q.len(), 1);
        let mut seen = None;
        q.drain_for(target, |buf, len| {
            seen = Some(buf[..len].to_vec());
        });
        assert_eq!(seen, Some(vec![1, 2, 3, 4]));
        assert!(q.is_empty());
    }

    #[test]
    fn drain_ignores_other_targets() {
        let mut q = PacketQueue::new();
        q.enqueue(Ipv4Addr::new(10, 0, 1, 99), &[9], 0);
        q.drain_for(Ipv4Addr::new(10, 0, 1, 1), |_, _| {
            panic!("should not match");
        });
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn periodic_drops_expired_entries() {
        let mut q = PacketQueue::new();
        q.enqueue(Ipv4Addr::new(10, 0, 1, 99), &[1], 0);
        q.periodic(QUEUE_ENTRY_TTL_SECONDS + 1);
        assert!(q.is_empty());
    }

    #[test]
    fn full_queue_evicts_oldest_expiry() {
        let mut q = PacketQueue::new();
        for i in 0..MAX_QUEUED_PACKETS {
            q.enqueue(Ipv4Addr::new(10, 0, 1, i as u8), &[i as u8], i as u32);
        }
        // All slots full; the next enqueue must evict the earliest expiry
        // (the one enqueued at t=0) rather than silently drop the new one.
        q.enqueue(Ipv4Addr::new(10, 0, 2, 1), &[0xFF], 100);
        let mut seen = false;
        q.drain_for(Ipv4Addr::new(10, 0, 2, 1), |_, _| seen = true);
        assert!(seen);
    }
}
