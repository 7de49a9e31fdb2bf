//! Acknowledged and burst transfer primitives, layered on the channel
//! session's raw send/receive.
//!
//! Every loop here runs against a hard attempt ceiling; there is no other
//! cancellation. Transport failures always propagate immediately, transient
//! receive failures are consumed by the retry budgets.

use std::thread;
use std::time::Duration;

use tracing::{instrument, warn};

use crate::channel::ChannelSession;
use crate::error::ProtocolError;
use crate::protocol::constants::*;
use crate::transport::AntTransport;

/// Outcome of inspecting one received packet while waiting for a
/// transmission confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxEvent {
    /// Transfer-started event; keep scanning.
    Started,
    /// Transfer completed successfully.
    Completed,
    /// Transfer explicitly failed.
    Failed,
    /// Not a transfer event for this channel; consumed and ignored.
    Unrelated,
}

fn classify_tx_event(id: u8, data: &[u8]) -> TxEvent {
    if id != MSG_CHANNEL_RESPONSE || data.len() < 3 {
        return TxEvent::Unrelated;
    }
    match data[2] {
        EVENT_TRANSFER_TX_START => TxEvent::Started,
        EVENT_TRANSFER_TX_COMPLETED => TxEvent::Completed,
        EVENT_TRANSFER_TX_FAILED => TxEvent::Failed,
        _ => TxEvent::Unrelated,
    }
}

/// Split `payload` into 9-byte burst chunks: a sequence byte (phase cycled
/// through three values, ORed with the channel number, high bit set on the
/// final chunk) followed by 8 payload bytes, zero-padded at the end.
pub fn burst_frames(payload: &[u8], chan: u8) -> Vec<u8> {
    let mut frames = Vec::with_capacity(payload.len().div_ceil(BURST_PAYLOAD_SIZE) * BURST_CHUNK_SIZE);
    for (n, chunk) in payload.chunks(BURST_PAYLOAD_SIZE).enumerate() {
        let mut seq = BURST_SEQ_PHASES[n % BURST_SEQ_PHASES.len()] | chan;
        if (n + 1) * BURST_PAYLOAD_SIZE >= payload.len() {
            seq |= BURST_LAST_MASK;
        }
        frames.push(seq);
        frames.extend_from_slice(chunk);
        frames.resize((n + 1) * BURST_CHUNK_SIZE, 0x00);
    }
    frames
}

impl<T: AntTransport> ChannelSession<T> {
    /// Scan received packets for a tx completion event.
    fn check_tx_response(&mut self) -> Result<(), ProtocolError> {
        for _ in 0..TX_CONFIRM_ATTEMPTS {
            let msg = match self.receive_message() {
                Ok(msg) => msg,
                Err(ProtocolError::NoMessage { .. }) => continue,
                Err(e) => return Err(e),
            };
            match classify_tx_event(msg.id, &msg.data) {
                TxEvent::Started | TxEvent::Unrelated => continue,
                TxEvent::Completed => return Ok(()),
                TxEvent::Failed => return Err(ProtocolError::TxFailed),
            }
        }
        Err(ProtocolError::NoTxAck {
            attempts: TX_CONFIRM_ATTEMPTS,
        })
    }

    /// Send one acknowledged-data packet and wait for its completion event.
    ///
    /// The whole send-then-confirm sequence is retried on transient receive
    /// failures before giving up.
    #[instrument(skip(self, payload), fields(len = payload.len()))]
    pub fn send_acknowledged(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        let mut data = vec![self.channel_number()];
        data.extend_from_slice(payload);
        for attempt in 0..ACK_SEND_ATTEMPTS {
            self.send_message(MSG_ACKNOWLEDGED_DATA, &data)?;
            match self.check_tx_response() {
                Ok(()) => return Ok(()),
                Err(ProtocolError::Transport(e)) => return Err(e.into()),
                Err(e) => {
                    warn!(attempt, error = %e, "Acknowledged send not confirmed, retrying");
                }
            }
        }
        Err(ProtocolError::AckSendFailed {
            attempts: ACK_SEND_ATTEMPTS,
        })
    }

    /// Send pre-built 9-byte burst chunks back to back, optionally paced to
    /// respect the channel's time-division slot, then confirm transmission.
    pub fn send_burst_frames(
        &mut self,
        frames: &[u8],
        pacing: Option<Duration>,
    ) -> Result<(), ProtocolError> {
        for attempt in 0..BURST_SEND_ATTEMPTS {
            for chunk in frames.chunks(BURST_CHUNK_SIZE) {
                self.send_message(MSG_BURST_DATA, chunk)?;
                // TODO: derive pacing from the configured channel period
                // instead of a caller-supplied guess.
                if let Some(delay) = pacing {
                    thread::sleep(delay);
                }
            }
            match self.check_tx_response() {
                Ok(()) => return Ok(()),
                Err(ProtocolError::Transport(e)) => return Err(e.into()),
                Err(e) => {
                    warn!(attempt, error = %e, "Burst send not confirmed, retrying");
                }
            }
        }
        Err(ProtocolError::BurstSendFailed {
            attempts: BURST_SEND_ATTEMPTS,
        })
    }

    /// Chunk `payload` into burst frames and send them.
    #[instrument(skip(self, payload), fields(len = payload.len()))]
    pub fn send_burst(
        &mut self,
        payload: &[u8],
        pacing: Option<Duration>,
    ) -> Result<(), ProtocolError> {
        let frames = burst_frames(payload, self.channel_number());
        self.send_burst_frames(&frames, pacing)
    }

    /// Accumulate one multi-chunk burst reply.
    ///
    /// Terminates on an acknowledged-data packet (single-packet terminal
    /// reply) or on a burst chunk whose sequence byte has the high bit set.
    /// A transfer-rx-failed event aborts immediately.
    #[instrument(skip(self))]
    pub fn receive_burst(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let mut response = Vec::new();
        for _ in 0..BURST_RECEIVE_ATTEMPTS {
            let msg = self.receive_message()?;
            if msg.id == MSG_CHANNEL_RESPONSE
                && msg.data.len() >= 3
                && msg.data[2] == EVENT_TRANSFER_RX_FAILED
            {
                return Err(ProtocolError::BurstRxFailed);
            }
            if msg.id == MSG_ACKNOWLEDGED_DATA && !msg.data.is_empty() {
                response.extend_from_slice(&msg.data[1..]);
                return Ok(response);
            }
            if msg.id == MSG_BURST_DATA && !msg.data.is_empty() {
                response.extend_from_slice(&msg.data[1..]);
                if msg.data[0] & BURST_LAST_MASK != 0 {
                    return Ok(response);
                }
            }
        }
        Err(ProtocolError::NoBurstEnd {
            attempts: BURST_RECEIVE_ATTEMPTS,
        })
    }

    /// Poll for a single acknowledged-data reply and return its payload
    /// minus the channel sub-header byte.
    pub fn receive_acknowledged_reply(&mut self) -> Result<Vec<u8>, ProtocolError> {
        for _ in 0..ACK_REPLY_ATTEMPTS {
            let msg = self.receive_message()?;
            if msg.id == MSG_ACKNOWLEDGED_DATA && !msg.data.is_empty() {
                return Ok(msg.data[1..].to_vec());
            }
        }
        Err(ProtocolError::NoAckReply {
            attempts: ACK_REPLY_ATTEMPTS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::framer;
    use crate::transport::MockTransport;

    fn session() -> ChannelSession<MockTransport> {
        ChannelSession::new(MockTransport::new(), 0x00)
    }

    fn queue_event(s: &ChannelSession<MockTransport>, event: u8) {
        s.transport()
            .queue_packet(MSG_CHANNEL_RESPONSE, &[0x00, MSG_ACKNOWLEDGED_DATA, event]);
    }

    /// Strip sequence bytes and padding back out of burst frames.
    fn reassemble(frames: &[u8], payload_len: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in frames.chunks(BURST_CHUNK_SIZE) {
            out.extend_from_slice(&chunk[1..]);
        }
        out.truncate(payload_len);
        out
    }

    #[test]
    fn test_burst_frames_roundtrip_and_single_terminator() {
        for len in [1usize, 7, 8, 9, 16, 17, 25, 64] {
            let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let frames = burst_frames(&payload, 0x00);
            assert_eq!(frames.len() % BURST_CHUNK_SIZE, 0);
            assert_eq!(reassemble(&frames, len), payload, "len {len}");

            let terminators = frames
                .chunks(BURST_CHUNK_SIZE)
                .filter(|c| c[0] & BURST_LAST_MASK != 0)
                .count();
            assert_eq!(terminators, 1, "len {len}");
            let last = frames.chunks(BURST_CHUNK_SIZE).last().unwrap();
            assert_ne!(last[0] & BURST_LAST_MASK, 0);
        }
    }

    #[test]
    fn test_burst_frames_cycle_sequence_phases() {
        let payload = [0u8; 32];
        let frames = burst_frames(&payload, 0x00);
        let seqs: Vec<u8> = frames.chunks(BURST_CHUNK_SIZE).map(|c| c[0]).collect();
        assert_eq!(seqs, vec![0x20, 0x40, 0x60, 0x20 | BURST_LAST_MASK]);
    }

    #[test]
    fn test_send_acknowledged_ignores_tx_start() {
        let mut s = session();
        queue_event(&s, EVENT_TRANSFER_TX_START);
        queue_event(&s, EVENT_TRANSFER_TX_COMPLETED);
        s.send_acknowledged(&[0x78, 0x00]).unwrap();

        let writes = s.transport().get_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(
            writes[0],
            framer::encode(MSG_ACKNOWLEDGED_DATA, &[0x00, 0x78, 0x00])
        );
    }

    #[test]
    fn test_send_acknowledged_retries_after_tx_failed() {
        let mut s = session();
        queue_event(&s, EVENT_TRANSFER_TX_FAILED);
        queue_event(&s, EVENT_TRANSFER_TX_COMPLETED);
        s.send_acknowledged(&[0x78, 0x00]).unwrap();
        // One resend after the failed confirmation.
        assert_eq!(s.transport().get_writes().len(), 2);
    }

    #[test]
    fn test_send_acknowledged_exhausts_budget() {
        let mut s = session();
        let err = s.send_acknowledged(&[0x78, 0x00]).unwrap_err();
        assert!(matches!(err, ProtocolError::AckSendFailed { attempts: 8 }));
        assert_eq!(s.transport().get_writes().len(), 8);
    }

    #[test]
    fn test_receive_burst_accumulates_until_end_marker() {
        let mut s = session();
        s.transport()
            .queue_packet(MSG_BURST_DATA, &[0x20, 1, 2, 3, 4, 5, 6, 7, 8]);
        s.transport()
            .queue_packet(MSG_BURST_DATA, &[0x40 | 0x80, 9, 10, 0, 0, 0, 0, 0, 0]);
        let data = s.receive_burst().unwrap();
        assert_eq!(data, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_receive_burst_terminal_acknowledged_packet() {
        let mut s = session();
        s.transport()
            .queue_packet(MSG_BURST_DATA, &[0x20, 1, 2, 3, 4, 5, 6, 7, 8]);
        s.transport()
            .queue_packet(MSG_ACKNOWLEDGED_DATA, &[0x00, 0xAA, 0xBB]);
        let data = s.receive_burst().unwrap();
        assert_eq!(data, vec![1, 2, 3, 4, 5, 6, 7, 8, 0xAA, 0xBB]);
    }

    #[test]
    fn test_receive_burst_aborts_on_rx_failed_event() {
        let mut s = session();
        s.transport()
            .queue_packet(MSG_BURST_DATA, &[0x20, 1, 2, 3, 4, 5, 6, 7, 8]);
        queue_event(&s, EVENT_TRANSFER_RX_FAILED);
        let err = s.receive_burst().unwrap_err();
        assert!(matches!(err, ProtocolError::BurstRxFailed));
    }

    #[test]
    fn test_receive_acknowledged_reply_skips_other_packets() {
        let mut s = session();
        s.transport()
            .queue_packet(MSG_CHANNEL_RESPONSE, &[0x00, 0x01, 0x03]);
        s.transport()
            .queue_packet(MSG_ACKNOWLEDGED_DATA, &[0x00, 0x39, 0x41, 0x07]);
        let reply = s.receive_acknowledged_reply().unwrap();
        assert_eq!(reply, vec![0x39, 0x41, 0x07]);
    }
}
