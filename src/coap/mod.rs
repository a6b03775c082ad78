//! CoAP surface: the device-side UDP server loop and the client used by the
//! coordinator and the gateway. Wire encoding is `coap-lite`. There is no
//! retransmission; callers own their timeouts.

pub mod client;
pub mod server;

pub use client::{CoapClient, CoapError};
pub use server::CoapServer;

/// Largest datagram either side will process.
pub(crate) const MAX_DATAGRAM: usize = 65_536;
