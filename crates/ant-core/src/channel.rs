//! Link-layer channel session: reset, channel configuration, open/close,
//! and the framed send/receive primitives everything else builds on.
//!
//! The session is strictly single-channel and synchronous: one command in
//! flight at a time, every receive polled in a bounded loop against the
//! blocking transport.

use std::fmt;
use std::thread;
use std::time::Duration;

use tracing::{debug, instrument, trace};

use crate::error::ProtocolError;
use crate::protocol::constants::*;
use crate::protocol::framer::{self, Packet, ParseStatus};
use crate::transport::{AntTransport, TransportError};

/// Bytes requested from the transport per read.
const READ_CHUNK: usize = 4096;
/// Consecutive read timeouts tolerated before a receive gives up.
const MAX_READ_TIMEOUTS: u32 = 3;
/// Device-documented maximum restart latency after a system reset.
const RESET_SETTLE: Duration = Duration::from_secs(1);

/// Link-layer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Uninitialized,
    Reset,
    Configuring,
    ChannelOpen,
    Closed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Uninitialized => write!(f, "UNINITIALIZED"),
            LinkState::Reset => write!(f, "RESET"),
            LinkState::Configuring => write!(f, "CONFIGURING"),
            LinkState::ChannelOpen => write!(f, "CHANNEL_OPEN"),
            LinkState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// One logical radio channel between the transceiver and a paired tracker.
pub struct ChannelSession<T: AntTransport> {
    transport: T,
    chan: u8,
    state: LinkState,
    /// Bytes left over after parsing one packet, retained for the next.
    rx_buf: Vec<u8>,
}

impl<T: AntTransport> ChannelSession<T> {
    pub fn new(transport: T, chan: u8) -> Self {
        Self {
            transport,
            chan,
            state: LinkState::Uninitialized,
            rx_buf: Vec::new(),
        }
    }

    pub fn channel_number(&self) -> u8 {
        self.chan
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn goto_state(&mut self, new_state: LinkState) {
        if self.state != new_state {
            debug!(from = %self.state, to = %new_state, "Link state transition");
            self.state = new_state;
        }
    }

    /// Frame and send one message.
    pub fn send_message(&mut self, id: u8, data: &[u8]) -> Result<(), ProtocolError> {
        let bytes = framer::encode(id, data);
        trace!(id = %format!("0x{id:02X}"), bytes = %hex_repr(&bytes), "==>");
        self.transport.write(&bytes)?;
        Ok(())
    }

    /// Receive one framed packet, resynchronizing past garbage.
    ///
    /// Reads are retried until a packet parses or [`MAX_READ_TIMEOUTS`]
    /// consecutive timeouts pass without progress, at which point the
    /// buffer is abandoned and `NoMessage` is raised.
    pub fn receive_message(&mut self) -> Result<Packet, ProtocolError> {
        let mut timeouts = 0u32;
        loop {
            match framer::parse(&self.rx_buf) {
                ParseStatus::Packet { packet, consumed } => {
                    self.rx_buf.drain(..consumed);
                    trace!(packet = %packet, "<==");
                    return Ok(packet);
                }
                ParseStatus::NeedMore { discard } => {
                    if discard > 0 {
                        trace!(discarded = discard, "Searching for SYNC");
                        self.rx_buf.drain(..discard);
                    }
                }
            }
            match self.transport.read(READ_CHUNK) {
                Ok(bytes) if bytes.is_empty() => timeouts += 1,
                Ok(bytes) => {
                    timeouts = 0;
                    self.rx_buf.extend_from_slice(&bytes);
                }
                Err(TransportError::Timeout { .. }) => timeouts += 1,
                Err(e) => return Err(e.into()),
            }
            if timeouts > MAX_READ_TIMEOUTS {
                // Nothing else is coming and the buffer never produced a
                // packet; drop the remnants so they cannot poison the next
                // receive.
                self.rx_buf.clear();
                return Err(ProtocolError::NoMessage { attempts: timeouts });
            }
        }
    }

    /// Wait for a channel response confirming `command` completed with the
    /// NO_ERROR status. Exactly one packet is consumed; a non-matching
    /// packet fails the operation.
    fn check_ok_response(&mut self, command: u8) -> Result<(), ProtocolError> {
        let msg = self.receive_message()?;
        if msg.id == MSG_CHANNEL_RESPONSE
            && msg.data.len() >= 3
            && msg.data[1] == command
            && msg.data[2] == RESPONSE_NO_ERROR
        {
            return Ok(());
        }
        Err(ProtocolError::Status {
            command,
            detail: format!(
                "expected NO_ERROR, got message 0x{:02X} {}",
                msg.id,
                msg.data
                    .get(2)
                    .map(|&e| event_name(e))
                    .unwrap_or("TRUNCATED_RESPONSE"),
            ),
        })
    }

    /// Poll for the startup message carrying the given reset status.
    fn check_reset_response(&mut self, status: u8) -> Result<(), ProtocolError> {
        for _ in 0..RESET_POLL_ATTEMPTS {
            let msg = match self.receive_message() {
                Ok(msg) => msg,
                Err(ProtocolError::NoMessage { .. }) => continue,
                Err(e) => return Err(e),
            };
            if msg.id == MSG_STARTUP && msg.data.first() == Some(&status) {
                return Ok(());
            }
        }
        Err(ProtocolError::Status {
            command: MSG_SYSTEM_RESET,
            detail: format!(
                "failed to detect reset response 0x{status:02X} within {RESET_POLL_ATTEMPTS} attempts"
            ),
        })
    }

    /// Reset the transceiver and wait for its startup message.
    ///
    /// Not retried here; callers own the policy of re-running the whole
    /// bring-up on failure.
    #[instrument(skip(self))]
    pub fn reset(&mut self) -> Result<(), ProtocolError> {
        self.send_message(MSG_SYSTEM_RESET, &[0x00])?;
        thread::sleep(RESET_SETTLE);
        self.check_reset_response(STARTUP_COMMAND_RESET)?;
        self.rx_buf.clear();
        self.goto_state(LinkState::Reset);
        Ok(())
    }

    #[instrument(skip(self, key))]
    pub fn set_network_key(&mut self, network: u8, key: &[u8; 8]) -> Result<(), ProtocolError> {
        let mut data = vec![network];
        data.extend_from_slice(key);
        self.send_message(MSG_NETWORK_KEY, &data)?;
        self.check_ok_response(MSG_NETWORK_KEY)?;
        self.goto_state(LinkState::Configuring);
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn assign_channel(&mut self) -> Result<(), ProtocolError> {
        self.send_message(MSG_ASSIGN_CHANNEL, &[self.chan, 0x00, 0x00])?;
        self.check_ok_response(MSG_ASSIGN_CHANNEL)?;
        self.goto_state(LinkState::Configuring);
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn set_channel_period(&mut self, period: u16) -> Result<(), ProtocolError> {
        let [lo, hi] = period.to_le_bytes();
        self.send_message(MSG_CHANNEL_PERIOD, &[self.chan, lo, hi])?;
        self.check_ok_response(MSG_CHANNEL_PERIOD)?;
        self.goto_state(LinkState::Configuring);
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn set_channel_frequency(&mut self, freq: u8) -> Result<(), ProtocolError> {
        self.send_message(MSG_CHANNEL_RF_FREQ, &[self.chan, freq])?;
        self.check_ok_response(MSG_CHANNEL_RF_FREQ)?;
        self.goto_state(LinkState::Configuring);
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn set_transmit_power(&mut self, power: u8) -> Result<(), ProtocolError> {
        self.send_message(MSG_TRANSMIT_POWER, &[0x00, power])?;
        self.check_ok_response(MSG_TRANSMIT_POWER)?;
        self.goto_state(LinkState::Configuring);
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn set_search_timeout(&mut self, timeout: u8) -> Result<(), ProtocolError> {
        self.send_message(MSG_SEARCH_TIMEOUT, &[self.chan, timeout])?;
        self.check_ok_response(MSG_SEARCH_TIMEOUT)?;
        self.goto_state(LinkState::Configuring);
        Ok(())
    }

    /// Set the 4-byte device channel identifier (2 id bytes + 2 type bytes).
    #[instrument(skip(self, device_id))]
    pub fn set_channel_id(&mut self, device_id: &[u8; 4]) -> Result<(), ProtocolError> {
        let mut data = vec![self.chan];
        data.extend_from_slice(device_id);
        self.send_message(MSG_CHANNEL_ID, &data)?;
        self.check_ok_response(MSG_CHANNEL_ID)?;
        self.goto_state(LinkState::Configuring);
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn open_channel(&mut self) -> Result<(), ProtocolError> {
        self.send_message(MSG_OPEN_CHANNEL, &[self.chan])?;
        self.check_ok_response(MSG_OPEN_CHANNEL)?;
        self.goto_state(LinkState::ChannelOpen);
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn close_channel(&mut self) -> Result<(), ProtocolError> {
        self.send_message(MSG_CLOSE_CHANNEL, &[self.chan])?;
        self.check_ok_response(MSG_CLOSE_CHANNEL)?;
        self.goto_state(LinkState::Closed);
        Ok(())
    }

    /// Send one broadcast-data packet (at most 8 payload bytes).
    pub fn send_broadcast(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        debug_assert!(data.len() <= BURST_PAYLOAD_SIZE);
        self.send_message(MSG_BROADCAST_DATA, data)
    }
}

pub(crate) fn hex_repr(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
