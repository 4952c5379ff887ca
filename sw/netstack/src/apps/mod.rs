//! Small applications built on the port-binding and socket facades, kept
//! separate from the core protocol stack. Present in the original source
//! (`src/app/echo.c`) and worth carrying over as a demonstration consumer
//! of [`crate::udp::UdpHandler`].

pub mod echo;
