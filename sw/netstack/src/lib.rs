#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
//! A minimalist, allocation-free IPv4 network stack core for an 8-bit
//! microcontroller talking to a single Ethernet-framed link.
//!
//! Covers Ethernet frame termination, ARP resolution, IPv4/ICMP/UDP
//! processing and partial TCP handshake tracking, a DHCP client (RFC 2131),
//! and a cooperative timer wheel driving it all from one super-loop
//! (§1, §5). There is no dynamic allocation anywhere in this crate: every
//! table (ARP cache, port bindings, sockets, timers, outbound queue) is a
//! fixed-size array sized generously for a handful of concurrent flows,
//! not a general-purpose server's connection count.
//!
//! [`engine::NetStack`] is the entry point; everything else is a module it
//! composes. An embedding application constructs one with a concrete
//! [`link::Link`] implementation and calls [`engine::NetStack::periodic`]
//! from its main loop.

pub mod addr;
pub mod apps;
pub mod arp;
pub mod buffer;
pub mod byteorder;
pub mod clock;
pub mod config;
pub mod dhcp;
pub mod engine;
pub mod error;
pub mod filter;
pub mod hostname;
pub mod icmp;
pub mod ipv4;
pub mod link;
pub mod mac;
pub mod prng;
pub mod queue;
pub mod socket;
pub mod stats;
pub mod tcp;
pub mod timers;
pub mod udp;

pub use engine::NetStack;
pub use error::{NetError, NetResult};
