//! Wire-level protocol: constants and packet framing.

pub mod constants;
pub mod framer;

pub use framer::{Packet, ParseStatus, encode, parse};
