//! Host-side simulation harness.
//!
//! Wires two [`netstack::NetStack`] instances together over an in-memory
//! crossover link instead of real silicon, then drives the same
//! receive/decode/reply loop a target's super-loop would: ARP resolution
//! for an unknown peer, a UDP echo round trip, and a write through the
//! socket facade.
//!
//! Nothing here is part of the library; it's a standalone binary that
//! exercises it the way `sw/net`'s embedding firmware otherwise would.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use debug::{LL, Sink};
use netstack::addr::{Ipv4Addr, MacAddr};
use netstack::apps::echo::{ECHO, ECHO_PORT};
use netstack::engine::NetStack;
use netstack::link::Link;
use netstack::socket::{SocketDomain, SocketType};

/// Writes log bytes straight to stdout.
struct StdoutSink;

impl Sink for StdoutSink {
    fn putc(&self, c: u8) {
        print!("{}", c as char);
    }
}

static SINK: StdoutSink = StdoutSink;

/// One end of an in-memory crossover cable: frames queued here are read by
/// the peer's `receive`, and frames sent here land in the peer's queue.
/// Shared via `Rc<RefCell<_>>` since both `NetStack`s run on the same
/// thread and take turns calling `periodic`.
struct WireEnd {
    up: bool,
    inbox: Rc<RefCell<VecDeque<Vec<u8>>>>,
    outbox: Rc<RefCell<VecDeque<Vec<u8>>>>,
}

fn crossover() -> (WireEnd, WireEnd) {
    let a_to_b = Rc::new(RefCell::new(VecDeque::new()));
    let b_to_a = Rc::new(RefCell::new(VecDeque::new()));
    let a = WireEnd {
        up: true,
        inbox: b_to_a.clone(),
        outbox: a_to_b.clone(),
    };
    let b = WireEnd {
        up: true,
        inbox: a_to_b,
        outbox: b_to_a,
    };
    (a, b)
}

impl Link for WireEnd {
    fn link_up(&self) -> bool {
        self.up
    }

    fn rx_pending(&self) -> u8 {
        self.inbox.borrow().len().min(u8::MAX as usize) as u8
    }

    fn receive(&mut self, buf: &mut [u8]) -> u16 {
        match self.inbox.borrow_mut().pop_front() {
            Some(frame) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                n as u16
            }
            None => 0,
        }
    }

    fn send(&mut self, buf: &[u8], len: u16) {
        self.outbox.borrow_mut().push_back(buf[..len as usize].to_vec());
    }

    fn set_mac(&mut self, _addr: &MacAddr) {}
}

/// Alternate `periodic` calls across both stacks `rounds` times. Each round
/// gives the ARP request, the ARP reply, the echo request, and the echo
/// reply one hop each, so a handful of rounds is enough to settle a single
/// exchange end to end.
fn pump(client: &mut NetStack<WireEnd>, server: &mut NetStack<WireEnd>, rounds: u32) {
    for _ in 0..rounds {
        client.periodic();
        server.periodic();
    }
}

fn main() {
    debug::init(&SINK);
    debug::set_log_level(LL::Info);

    let (client_wire, server_wire) = crossover();

    let mut server = NetStack::new(server_wire, MacAddr::new([0x02, 0, 0, 0, 0, 0x10]), [11, 22, 33, 44, 55, 66, 77, 88]);
    server.config.host_ip = Ipv4Addr::new(10, 0, 1, 10);
    server.config.netmask = Ipv4Addr::new(255, 255, 255, 0);
    server.bind_udp(ECHO_PORT, &ECHO).expect("echo port is free");

    let mut client = NetStack::new(client_wire, MacAddr::new([0x02, 0, 0, 0, 0, 0x20]), [1, 2, 3, 4, 5, 6, 7, 8]);
    client.config.host_ip = Ipv4Addr::new(10, 0, 1, 30);
    client.config.netmask = Ipv4Addr::new(255, 255, 255, 0);

    let socket = client.sockets().create(SocketDomain::Inet, SocketType::Dgram).expect("socket slot free");
    client.sockets().bind(socket, 40000).expect("ephemeral port free");

    println!("--- sending a datagram to an unresolved peer (triggers ARP) ---");
    let sent = client.send_udp(socket, server.config.host_ip, ECHO_PORT, b"hello, network");
    assert!(sent, "send_udp should have queued the ARP request and the datagram");
    pump(&mut client, &mut server, 8);

    let mut out = [0u8; 64];
    match client.sockets().read(socket, &mut out) {
        Some((from_ip, from_port, n)) => {
            println!(
                "echo reply from {}:{} -> {:?}",
                from_ip,
                from_port,
                std::str::from_utf8(&out[..n]).unwrap_or("<binary>")
            );
        }
        None => println!("no reply arrived within the round budget"),
    }

    println!("--- client stats: {} sent / {} received bytes ---", client.stats.bytes_sent, client.stats.bytes_received);
    println!("--- server stats: {} sent / {} received bytes ---", server.stats.bytes_sent, server.stats.bytes_received);
}
