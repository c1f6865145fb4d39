//! Skiff Net - Framed TCP peer links
//!
//! One long-lived TCP connection per peer, carrying two kinds of frames:
//! discrete control messages, routed to a shared inbound channel, and
//! opaque byte streams, which park the connection's read loop until the
//! consumer has drained them.

mod frame;
mod peer;
mod tcp;

pub use frame::Frame;
pub use peer::{StreamReader, TcpPeer};
pub use tcp::{HandshakeFn, OnPeerDropFn, OnPeerFn, TcpTransport, TcpTransportOpts};
