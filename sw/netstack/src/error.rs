//! Error taxonomy for outward-facing registration APIs (§7).
//!
//! The decode/encode pipeline itself has no propagating error type — per
//! §7, malformed input is dropped silently and nothing escapes
//! [`crate::engine::NetStack::periodic`]. `NetError` only shows up on the
//! registration surface: `bind`, `create`, and friends.

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum NetError {
    /// The fixed-size table backing this resource (ARP, bindings, sockets)
    /// has no free slot and nothing evictable.
    TableFull,
    /// A bind was attempted on a port already bound in that table.
    PortInUse,
    /// The requested combination of socket family/type is enumerated but
    /// not implemented by this revision (§3, §4.10).
    NotImplemented,
    /// A caller-supplied argument was out of range or otherwise invalid.
    InvalidArgument,
}

impl core::fmt::Display for NetError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            NetError::TableFull => "table full",
            NetError::PortInUse => "port already bound",
            NetError::NotImplemented => "not implemented",
            NetError::InvalidArgument => "invalid argument",
        };
        f.write_str(msg)
    }
}

pub type NetResult<T> = Result<T, NetError>;
