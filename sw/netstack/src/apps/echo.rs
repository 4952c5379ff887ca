//! UDP echo service on port 7 (RFC 862), ported from the original source's
//! `src/app/echo.c`. There, `echo_udp` swapped ports and addressing by hand
//! and returned an adjusted length; here the same swap is
//! [`crate::udp::decode`]'s job, so the handler only needs to say "send the
//! payload back unchanged".

use crate::udp::UdpHandler;

pub const ECHO_PORT: u16 = 7;

pub struct EchoHandler;

impl UdpHandler for EchoHandler {
    fn on_datagram(&self, _src_port: u16, _dest_port: u16, _payload: &mut [u8], payload_len: usize, _capacity: usize) -> u16 {
        payload_len as u16
    }
}

/// The single, `'static` echo handler instance; bind it with
/// `udp_bindings.bind(ECHO_PORT, &ECHO)`.
pub static ECHO: EchoHandler = EchoHandler;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echoes_payload_length_unchanged() {
        let mut payload = *b"hello";
        let reply_len = ECHO.on_datagram(4000, ECHO_PORT, &mut payload, payload.len(), payload.len());
        assert_eq!(reply_len as usize, payload.len());
    }
}
