//! Packet framing: encode outbound packets, parse and resynchronize inbound
//! byte streams.
//!
//! Wire format: `[sync:1][len:1][id:1][data:len][checksum:1]`, checksum is
//! the XOR of all preceding bytes. The framer is a pure function of the
//! buffer; the accumulation buffer itself is owned by the channel session.

use std::fmt;

use super::constants::{FRAME_OVERHEAD, MAX_DATA_LEN, SYNC, SYNC_ALT};

/// One framed link-layer packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub sync: u8,
    pub id: u8,
    pub data: Vec<u8>,
}

impl Packet {
    /// Checksum over sync, length, id and data.
    pub fn checksum(&self) -> u8 {
        let mut cs = self.sync ^ self.data.len() as u8 ^ self.id;
        for &b in &self.data {
            cs ^= b;
        }
        cs
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X} {:02X} {:02X}", self.sync, self.data.len(), self.id)?;
        for b in &self.data {
            write!(f, " {b:02X}")?;
        }
        write!(f, " {:02X}", self.checksum())
    }
}

/// Outcome of one parse pass over a receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseStatus {
    /// A valid packet was found. `consumed` counts the packet window plus
    /// any garbage prefix before it; the caller drains that many bytes.
    Packet { packet: Packet, consumed: usize },
    /// No complete packet yet. `discard` bytes at the front of the buffer
    /// can never start a packet and should be dropped before reading more.
    NeedMore { discard: usize },
}

/// Frame a message id and data into wire bytes.
///
/// Length is not validated beyond fitting in one byte; callers keep data
/// within [`MAX_DATA_LEN`].
pub fn encode(id: u8, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + FRAME_OVERHEAD);
    out.push(SYNC);
    out.push(data.len() as u8);
    out.push(id);
    out.extend_from_slice(data);
    let cs = out.iter().fold(0u8, |acc, &b| acc ^ b);
    out.push(cs);
    out
}

/// Parse the first valid packet out of `buf`.
///
/// Scans for a sync marker, discarding garbage before it. A candidate with
/// an out-of-range length or a bad checksum is rejected by dropping exactly
/// one byte (the false sync) and rescanning, so a genuine packet embedded
/// later in the buffer is still found.
pub fn parse(buf: &[u8]) -> ParseStatus {
    let mut start = 0;
    loop {
        match buf[start..].iter().position(|&b| b == SYNC || b == SYNC_ALT) {
            Some(off) => start += off,
            None => return ParseStatus::NeedMore { discard: buf.len() },
        }
        if buf.len() - start < FRAME_OVERHEAD {
            return ParseStatus::NeedMore { discard: start };
        }
        let len = buf[start + 1] as usize;
        if len > MAX_DATA_LEN {
            // Spurious sync byte.
            start += 1;
            continue;
        }
        let total = len + FRAME_OVERHEAD;
        if buf.len() - start < total {
            return ParseStatus::NeedMore { discard: start };
        }
        let window = &buf[start..start + total];
        let cs = window[..total - 1].iter().fold(0u8, |acc, &b| acc ^ b);
        if cs != window[total - 1] {
            start += 1;
            continue;
        }
        let packet = Packet {
            sync: window[0],
            id: window[2],
            data: window[3..total - 1].to_vec(),
        };
        return ParseStatus::Packet {
            packet,
            consumed: start + total,
        };
    }
}
