//! The few plaintext TLS messages this crate builds or inspects itself:
//! the probe ClientHello, the ServerHello answering it, and warning alerts.
//! Everything else on the wire belongs to the engine.
//!
//! <https://langsec.org/ForWantOfANail-h2hc2014.pdf>

#[macro_use]
mod macros;

pub(crate) mod alert;
pub(crate) mod codec;
pub(crate) mod enums;
pub(crate) mod hello;
