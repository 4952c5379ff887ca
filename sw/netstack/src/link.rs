//! The `Link` capability (§1, §4.4): the interface this crate requires from
//! the external Ethernet (or Wi-Fi fullMAC) controller and its bus driver.
//! The SPI transfer details, register layout, and DMA handling of any
//! concrete chip are explicitly out of scope (§1) — this trait is the
//! entire contract.

use crate::addr::MacAddr;

/// A link-layer frame source/sink.
///
/// `receive` and `send` both operate on the caller's scratch buffer
/// ([`crate::buffer::PacketBuffer`]) so that no allocation is needed on
/// either side of the interface.
pub trait Link {
    /// Physical link state, e.g. cable present / Wi-Fi associated.
    fn link_up(&self) -> bool;

    /// Number of frames the controller has buffered and not yet delivered.
    /// The network engine calls `receive` in a loop while this is nonzero
    /// (§4.12).
    fn rx_pending(&self) -> u8;

    /// Copy the next pending frame into `buf`, returning its length. A
    /// return of 0 means nothing was available. Implementations truncate
    /// to `buf.len() - 1` and validate the frame CRC before returning a
    /// nonzero length (§4.4).
    fn receive(&mut self, buf: &mut [u8]) -> u16;

    /// Transmit `len` bytes from `buf`. Synchronous: blocks until the
    /// controller reports idle. On a transmit error the implementation
    /// resets the TX logic and re-issues before returning (§4.4, §7).
    fn send(&mut self, buf: &[u8], len: u16);

    /// Program the MAC address the controller should filter/report as its
    /// own.
    fn set_mac(&mut self, addr: &MacAddr);
}
