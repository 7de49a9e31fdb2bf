//! Tracker session: the opcode-level device protocol layered on the
//! channel session.
//!
//! One `TrackerSession` covers one tracker connection, from link bring-up
//! to channel close. Packet ids cycle through eight values per outbound
//! opcode packet; the tracker echoes the id back in its reply.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{info, instrument, warn};

use crate::channel::ChannelSession;
use crate::config::SyncConfig;
use crate::error::{ProtocolError, TrackerError};
use crate::events::{TrackerEvent, TrackerObserver, TracingObserver};
use crate::protocol::constants::*;
use crate::transfer::burst_frames;
use crate::transport::AntTransport;

/// Identity fields reported by the info opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerInfo {
    pub serial: [u8; 5],
    pub hardware_version: u8,
    pub bsl_major_version: u8,
    pub bsl_minor_version: u8,
    pub app_major_version: u8,
    pub app_minor_version: u8,
    /// True if the tracker is in BSL (bootstrap loader) mode.
    pub in_mode_bsl: bool,
    /// True if the tracker is currently on its charger.
    pub on_charger: bool,
}

impl TrackerInfo {
    pub const LEN: usize = 12;

    pub fn parse(data: &[u8]) -> Result<Self, TrackerError> {
        if data.len() < Self::LEN {
            return Err(TrackerError::ShortReply {
                expected: Self::LEN,
                actual: data.len(),
            });
        }
        let mut serial = [0u8; 5];
        serial.copy_from_slice(&data[0..5]);
        Ok(Self {
            serial,
            hardware_version: data[5],
            bsl_major_version: data[6],
            bsl_minor_version: data[7],
            app_major_version: data[8],
            app_minor_version: data[9],
            in_mode_bsl: data[10] != 0,
            on_charger: data[11] != 0,
        })
    }

    pub fn serial_hex(&self) -> String {
        self.serial.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for TrackerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Tracker Serial: {}", self.serial_hex())?;
        writeln!(f, "Hardware Version: {}", self.hardware_version)?;
        writeln!(
            f,
            "BSL Version: {}.{}",
            self.bsl_major_version, self.bsl_minor_version
        )?;
        writeln!(
            f,
            "APP Version: {}.{}",
            self.app_major_version, self.app_minor_version
        )?;
        writeln!(f, "In Mode BSL? {}", self.in_mode_bsl)?;
        write!(f, "On Charger? {}", self.on_charger)
    }
}

/// Outcome of one attempt at a logical opcode.
enum OpcodeAttempt {
    Done(Vec<u8>),
    Retry,
}

/// One tracker connection session.
pub struct TrackerSession<T: AntTransport, O: TrackerObserver> {
    channel: ChannelSession<T>,
    observer: Arc<O>,
    config: SyncConfig,
    /// Cycle position 0..8 within the packet-id space.
    packet_counter: u8,
    /// Id of the most recently built opcode packet.
    current_packet_id: Option<u8>,
    /// Chunk cursor within the active data-bank read.
    bank_cursor: u8,
    info: Option<TrackerInfo>,
}

impl<T: AntTransport> TrackerSession<T, TracingObserver> {
    /// Create a session with the default tracing observer.
    pub fn new(transport: T) -> Self {
        Self::with_observer(transport, Arc::new(TracingObserver))
    }
}

impl<T: AntTransport, O: TrackerObserver> TrackerSession<T, O> {
    pub fn with_observer(transport: T, observer: Arc<O>) -> Self {
        Self::with_config(transport, observer, SyncConfig::default())
    }

    pub fn with_config(transport: T, observer: Arc<O>, config: SyncConfig) -> Self {
        Self {
            channel: ChannelSession::new(transport, 0x00),
            observer,
            config,
            // The tracker expects the first packet id after a reset to be
            // 0x39, not 0x38; it won't talk otherwise.
            packet_counter: 1,
            current_packet_id: None,
            bank_cursor: 0,
            info: None,
        }
    }

    pub fn channel(&mut self) -> &mut ChannelSession<T> {
        &mut self.channel
    }

    /// Identity fields, populated after a successful [`get_tracker_info`].
    ///
    /// [`get_tracker_info`]: Self::get_tracker_info
    pub fn info(&self) -> Option<&TrackerInfo> {
        self.info.as_ref()
    }

    /// Advance the packet-id cycle and return the new id.
    fn gen_packet_id(&mut self) -> u8 {
        let id = PACKET_ID_BASE + self.packet_counter;
        self.packet_counter = (self.packet_counter + 1) % 8;
        self.current_packet_id = Some(id);
        id
    }

    fn pacing(&self) -> Option<Duration> {
        Some(Duration::from_millis(self.config.burst_pacing_ms))
    }

    /// Full link bring-up: pair on the wildcard channel id, hop the tracker
    /// to a freshly randomized channel, and confirm it followed.
    ///
    /// No rollback on failure; callers restart the whole sequence.
    #[instrument(skip(self))]
    pub fn init_for_transfer(&mut self) -> Result<(), TrackerError> {
        self.init_device_channel([0xFF, 0xFF, 0x01, 0x01])?;
        self.wait_for_beacon()?;
        self.reset_tracker()?;

        // Tell the tracker the new channel id to hop to for the dump.
        let mut rng = rand::thread_rng();
        let cid: [u8; 2] = [rng.gen_range(0..=254), rng.gen_range(0..=254)];
        self.channel.send_acknowledged(&[
            OP_DEVICE_CONTROL,
            CONTROL_CHANNEL_HOP,
            cid[0],
            cid[1],
            0x00,
            0x00,
            0x00,
            0x00,
        ])?;
        self.channel.close_channel()?;
        self.init_device_channel([cid[0], cid[1], 0x01, 0x01])?;
        self.wait_for_beacon()?;
        self.ping_tracker()?;
        self.observer
            .on_event(&TrackerEvent::LinkReady { channel_id: cid });
        Ok(())
    }

    /// Link-layer bring-up against one device channel identifier.
    pub fn init_device_channel(&mut self, device_id: [u8; 4]) -> Result<(), TrackerError> {
        self.channel.reset()?;
        self.channel.set_network_key(0, &[0u8; 8])?;
        self.channel.assign_channel()?;
        self.channel.set_channel_period(self.config.period)?;
        self.channel.set_channel_frequency(self.config.frequency)?;
        self.channel.set_transmit_power(self.config.transmit_power)?;
        self.channel.set_search_timeout(self.config.search_timeout)?;
        self.channel.set_channel_id(&device_id)?;
        self.channel.open_channel()?;
        Ok(())
    }

    /// Block until the tracker's periodic beacon burst is observed.
    pub fn wait_for_beacon(&mut self) -> Result<(), TrackerError> {
        self.channel.receive_burst()?;
        self.observer.on_event(&TrackerEvent::BeaconSeen);
        Ok(())
    }

    /// Command the tracker to reset its session state.
    pub fn reset_tracker(&mut self) -> Result<(), TrackerError> {
        self.channel.send_acknowledged(&[
            OP_DEVICE_CONTROL,
            CONTROL_RESET,
            0x00,
            0x00,
            0x00,
            0x00,
            0x00,
            0x00,
        ])?;
        // The reset restarts the tracker's packet-id expectation as well.
        self.packet_counter = 1;
        self.current_packet_id = None;
        Ok(())
    }

    pub fn ping_tracker(&mut self) -> Result<(), TrackerError> {
        self.channel.send_acknowledged(&[
            OP_DEVICE_CONTROL,
            CONTROL_PING,
            0x00,
            0x00,
            0x00,
            0x00,
            0x00,
            0x00,
        ])?;
        Ok(())
    }

    /// Put the tracker to sleep for its standard interval.
    pub fn command_sleep(&mut self) -> Result<(), TrackerError> {
        self.channel
            .send_acknowledged(&[OP_SLEEP, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x3C])?;
        Ok(())
    }

    /// Send one opcode packet (fresh packet id + 7 opcode bytes).
    fn send_tracker_packet(&mut self, opcode: &[u8; 7]) -> Result<(), ProtocolError> {
        let mut packet = vec![self.gen_packet_id()];
        packet.extend_from_slice(opcode);
        self.channel.send_acknowledged(&packet)
    }

    /// Run one opcode request/response cycle, retrying transient failures.
    #[instrument(skip(self, payload), fields(opcode = %format!("0x{:02X}", opcode[0])))]
    pub fn run_opcode(&mut self, opcode: [u8; 7], payload: &[u8]) -> Result<Vec<u8>, TrackerError> {
        for attempt in 0..OPCODE_ATTEMPTS {
            match self.opcode_attempt(&opcode, payload)? {
                OpcodeAttempt::Done(response) => {
                    self.observer.on_event(&TrackerEvent::OpcodeCompleted {
                        opcode,
                        payload: payload.to_vec(),
                        response: response.clone(),
                    });
                    return Ok(response);
                }
                OpcodeAttempt::Retry => {
                    warn!(attempt, "Opcode attempt not recognized, retrying");
                }
            }
        }
        Err(TrackerError::OpcodeFailed {
            opcode: opcode[0],
            attempts: OPCODE_ATTEMPTS,
        })
    }

    fn opcode_attempt(
        &mut self,
        opcode: &[u8; 7],
        payload: &[u8],
    ) -> Result<OpcodeAttempt, TrackerError> {
        let reply = match self
            .send_tracker_packet(opcode)
            .and_then(|()| self.channel.receive_acknowledged_reply())
        {
            Ok(reply) => reply,
            Err(e @ ProtocolError::Transport(_)) => return Err(e.into()),
            Err(e) => {
                warn!(error = %e, "Failed to exchange opcode packet");
                return Ok(OpcodeAttempt::Retry);
            }
        };
        if reply.len() < 2 {
            warn!(len = reply.len(), "Opcode reply too short");
            return Ok(OpcodeAttempt::Retry);
        }
        if Some(reply[0]) != self.current_packet_id {
            warn!(
                got = %format!("0x{:02X}", reply[0]),
                expected = ?self.current_packet_id.map(|id| format!("0x{id:02X}")),
                "Tracker packet ids don't match"
            );
            return Ok(OpcodeAttempt::Retry);
        }
        match reply[1] {
            REPLY_BURST_FOLLOWS => Ok(OpcodeAttempt::Done(self.get_data_bank()?)),
            REPLY_NEEDS_PAYLOAD => {
                if payload.is_empty() {
                    return Err(TrackerError::MissingPayload { opcode: opcode[0] });
                }
                self.send_payload(payload)?;
                let data = self.channel.receive_acknowledged_reply()?;
                if data.is_empty() {
                    return Err(TrackerError::ShortReply {
                        expected: 1,
                        actual: 0,
                    });
                }
                Ok(OpcodeAttempt::Done(data[1..].to_vec()))
            }
            REPLY_SIMPLE_ACK => Ok(OpcodeAttempt::Done(reply[1..].to_vec())),
            other => {
                warn!(code = %format!("0x{other:02X}"), "Unrecognized opcode reply code");
                Ok(OpcodeAttempt::Retry)
            }
        }
    }

    /// Send opcode payload data via the burst sub-protocol: a framing
    /// header chunk (packet id, payload length, XOR checksum) followed by
    /// the payload in standard burst chunks.
    fn send_payload(&mut self, payload: &[u8]) -> Result<(), TrackerError> {
        let checksum = payload.iter().fold(0u8, |acc, &b| acc ^ b);
        let mut frames = vec![
            0x00,
            self.gen_packet_id(),
            0x80,
            payload.len() as u8,
            0x00,
            0x00,
            0x00,
            0x00,
            checksum,
        ];
        frames.extend(burst_frames(payload, self.channel.channel_number()));
        self.channel.send_burst_frames(&frames, self.pacing())?;
        Ok(())
    }

    /// Query and decode the tracker's identity fields.
    pub fn get_tracker_info(&mut self) -> Result<TrackerInfo, TrackerError> {
        let data = self.run_opcode([OP_GET_INFO, 0, 0, 0, 0, 0, 0], &[])?;
        let parsed = TrackerInfo::parse(&data)?;
        info!(serial = %parsed.serial_hex(), hardware_version = parsed.hardware_version, "Tracker info");
        self.observer.on_event(&TrackerEvent::TrackerIdentified {
            serial: parsed.serial_hex(),
            hardware_version: parsed.hardware_version,
        });
        self.info = Some(parsed.clone());
        Ok(parsed)
    }

    /// Retrieve the raw contents of one on-device data bank.
    pub fn read_data_bank(&mut self, index: u8) -> Result<Vec<u8>, TrackerError> {
        self.run_opcode([OP_READ_BANK, index, 0, 0, 0, 0, 0], &[])
    }

    /// Erase one data bank up to `tstamp` (Unix epoch seconds).
    pub fn erase_data_bank(&mut self, index: u8, tstamp: u32) -> Result<Vec<u8>, TrackerError> {
        let [t0, t1, t2, t3] = tstamp.to_be_bytes();
        self.run_opcode([OP_WRITE_BANK, index, t0, t1, t2, t3, 0x00], &[])
    }

    /// Write `data` into one data bank via the payload sub-protocol.
    pub fn write_bank(&mut self, index: u8, data: &[u8]) -> Result<Vec<u8>, TrackerError> {
        self.run_opcode(
            [OP_WRITE_BANK, index, data.len() as u8, 0, 0, 0, 0],
            data,
        )
    }

    /// Pull the active data bank chunk by chunk until an empty chunk marks
    /// the end.
    fn get_data_bank(&mut self) -> Result<Vec<u8>, TrackerError> {
        self.bank_cursor = 0;
        let mut data = Vec::new();
        let mut cmd = BANK_REQUEST_FIRST;
        for _ in 0..BANK_PART_CEILING {
            let chunk = self.request_bank_chunk(cmd)?;
            cmd = BANK_REQUEST_NEXT;
            self.observer.on_event(&TrackerEvent::BankChunk {
                cursor: self.bank_cursor,
                len: chunk.len(),
            });
            if chunk.is_empty() {
                return Ok(data);
            }
            data.extend_from_slice(&chunk);
        }
        Err(TrackerError::BankOverflow {
            parts: BANK_PART_CEILING,
        })
    }

    fn request_bank_chunk(&mut self, cmd: u8) -> Result<Vec<u8>, TrackerError> {
        self.send_tracker_packet(&[cmd, 0x00, 0x02, self.bank_cursor, 0x00, 0x00, 0x00])?;
        self.bank_cursor = self.bank_cursor.wrapping_add(1);
        self.read_tracker_burst()
    }

    /// Receive one tracker burst and strip its application header:
    /// `[packet id][0x81][size:u16le][4 unknown bytes][data...]`.
    fn read_tracker_burst(&mut self) -> Result<Vec<u8>, TrackerError> {
        let d = self.channel.receive_burst()?;
        if d.len() < TRACKER_BURST_HEADER_LEN || d[1] != TRACKER_BURST_MARKER {
            return Err(TrackerError::UnexpectedBurstHeader(
                d.first().copied().unwrap_or(0),
                d.get(1).copied().unwrap_or(0),
            ));
        }
        let declared = u16::from_le_bytes([d[2], d[3]]) as usize;
        if declared == 0 {
            return Ok(Vec::new());
        }
        if d.len() < TRACKER_BURST_HEADER_LEN + declared {
            return Err(TrackerError::TruncatedBurst {
                declared,
                actual: d.len() - TRACKER_BURST_HEADER_LEN,
            });
        }
        Ok(d[TRACKER_BURST_HEADER_LEN..TRACKER_BURST_HEADER_LEN + declared].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    fn session() -> TrackerSession<MockTransport, TracingObserver> {
        TrackerSession::new(MockTransport::new())
    }

    fn queue_tx_completed(s: &mut TrackerSession<MockTransport, TracingObserver>) {
        s.channel().transport().queue_packet(
            MSG_CHANNEL_RESPONSE,
            &[0x00, MSG_ACKNOWLEDGED_DATA, EVENT_TRANSFER_TX_COMPLETED],
        );
    }

    fn queue_ack_reply(s: &mut TrackerSession<MockTransport, TracingObserver>, data: &[u8]) {
        let mut packet = vec![0x00];
        packet.extend_from_slice(data);
        s.channel()
            .transport()
            .queue_packet(MSG_ACKNOWLEDGED_DATA, &packet);
    }

    /// Queue one tracker burst carrying `body` (split across burst chunks).
    fn queue_tracker_burst(
        s: &mut TrackerSession<MockTransport, TracingObserver>,
        body: &[u8],
    ) {
        let mut d = vec![0x00, TRACKER_BURST_MARKER];
        d.extend_from_slice(&(body.len() as u16).to_le_bytes());
        d.extend_from_slice(&[0x00; 4]);
        d.extend_from_slice(body);
        let frames = burst_frames(&d, 0x00);
        for chunk in frames.chunks(BURST_CHUNK_SIZE) {
            s.channel().transport().queue_packet(MSG_BURST_DATA, chunk);
        }
    }

    #[test]
    fn test_packet_id_cycles_from_0x39() {
        let mut s = session();
        let ids: Vec<u8> = (0..9).map(|_| s.gen_packet_id()).collect();
        assert_eq!(
            ids,
            vec![0x39, 0x3A, 0x3B, 0x3C, 0x3D, 0x3E, 0x3F, 0x38, 0x39]
        );
    }

    #[test]
    fn test_run_opcode_simple_ack() {
        let mut s = session();
        queue_tx_completed(&mut s);
        queue_ack_reply(&mut s, &[0x39, REPLY_SIMPLE_ACK, 0x07, 0x08]);

        let response = s.run_opcode([0x7F, 0, 0, 0, 0, 0, 0], &[]).unwrap();
        assert_eq!(response, vec![REPLY_SIMPLE_ACK, 0x07, 0x08]);
    }

    #[test]
    fn test_run_opcode_retries_on_packet_id_mismatch() {
        let mut s = session();
        // First reply echoes the wrong id; the retry (id 0x3A) matches.
        queue_tx_completed(&mut s);
        queue_ack_reply(&mut s, &[0x55, REPLY_SIMPLE_ACK]);
        queue_tx_completed(&mut s);
        queue_ack_reply(&mut s, &[0x3A, REPLY_SIMPLE_ACK, 0x01]);

        let response = s.run_opcode([0x24, 0, 0, 0, 0, 0, 0], &[]).unwrap();
        assert_eq!(response, vec![REPLY_SIMPLE_ACK, 0x01]);
    }

    #[test]
    fn test_run_opcode_needs_payload_without_payload_is_an_error() {
        let mut s = session();
        queue_tx_completed(&mut s);
        queue_ack_reply(&mut s, &[0x39, REPLY_NEEDS_PAYLOAD]);

        let err = s.run_opcode([0x25, 4, 1, 0, 0, 0, 0], &[]).unwrap_err();
        assert!(matches!(err, TrackerError::MissingPayload { opcode: 0x25 }));
    }

    #[test]
    fn test_run_opcode_payload_sub_protocol() {
        let mut s = session();
        queue_tx_completed(&mut s); // opcode packet confirmation
        queue_ack_reply(&mut s, &[0x39, REPLY_NEEDS_PAYLOAD]);
        queue_tx_completed(&mut s); // payload burst confirmation
        queue_ack_reply(&mut s, &[0x3B, REPLY_SIMPLE_ACK, 0x99]);

        let payload = [0xDE, 0xAD];
        let response = s
            .run_opcode([0x25, 4, payload.len() as u8, 0, 0, 0, 0], &payload)
            .unwrap();
        assert_eq!(response, vec![REPLY_SIMPLE_ACK, 0x99]);

        // Writes: opcode packet, payload header chunk, one payload chunk.
        let writes = s.channel().transport().get_writes();
        assert_eq!(writes.len(), 3);
        // Header chunk after the 3-byte frame prefix:
        // [0x00, packet id 0x3A, 0x80, len, 0*4, xor].
        let header = &writes[1];
        assert_eq!(
            &header[3..],
            &[
                0x00,
                0x3A,
                0x80,
                payload.len() as u8,
                0x00,
                0x00,
                0x00,
                0x00,
                0xDE ^ 0xAD,
                header[header.len() - 1]
            ][..]
        );
    }

    #[test]
    fn test_run_opcode_exhausts_attempts() {
        let mut s = session();
        // Four attempts, each confirmed but answered with the wrong id.
        for _ in 0..4 {
            queue_tx_completed(&mut s);
            queue_ack_reply(&mut s, &[0x00, REPLY_SIMPLE_ACK]);
        }
        let err = s.run_opcode([0x24, 0, 0, 0, 0, 0, 0], &[]).unwrap_err();
        assert!(matches!(
            err,
            TrackerError::OpcodeFailed {
                opcode: 0x24,
                attempts: 4
            }
        ));
    }

    #[test]
    fn test_get_tracker_info_parses_identity() {
        let mut s = session();
        queue_tx_completed(&mut s);
        queue_ack_reply(
            &mut s,
            &[
                0x39,
                REPLY_SIMPLE_ACK,
                0xDE,
                0xAD,
                0xBE,
                0xEF, // serial (with the reply code as first byte)
                12,   // hardware version
                5,
                6, // BSL
                1,
                2, // APP
                0, // not in BSL mode
                1, // on charger
            ],
        );

        let parsed = s.get_tracker_info().unwrap();
        assert_eq!(parsed.serial, [REPLY_SIMPLE_ACK, 0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(parsed.hardware_version, 12);
        assert_eq!(parsed.bsl_major_version, 5);
        assert_eq!(parsed.app_minor_version, 2);
        assert!(!parsed.in_mode_bsl);
        assert!(parsed.on_charger);
        assert_eq!(s.info(), Some(&parsed));
    }

    #[test]
    fn test_read_data_bank_reassembles_chunks() {
        let mut s = session();
        queue_tx_completed(&mut s); // opcode packet
        queue_ack_reply(&mut s, &[0x39, REPLY_BURST_FOLLOWS]);
        queue_tx_completed(&mut s); // first chunk request
        queue_tracker_burst(&mut s, &[1, 2, 3, 4]);
        queue_tx_completed(&mut s); // second chunk request
        queue_tracker_burst(&mut s, &[5, 6]);
        queue_tx_completed(&mut s); // third chunk request
        queue_tracker_burst(&mut s, &[]); // empty chunk ends the bank

        let data = s.read_data_bank(0).unwrap();
        assert_eq!(data, vec![1, 2, 3, 4, 5, 6]);

        // First chunk request uses 0x70, subsequent ones 0x60, with an
        // advancing cursor. Framed request: [sync, len, 0x4F, chan, packet
        // id, cmd, 0x00, 0x02, cursor, ...].
        let writes = s.channel().transport().get_writes();
        assert_eq!(writes[1][5], BANK_REQUEST_FIRST);
        assert_eq!(writes[1][8], 0x00);
        assert_eq!(writes[2][5], BANK_REQUEST_NEXT);
        assert_eq!(writes[2][8], 0x01);
        assert_eq!(writes[3][5], BANK_REQUEST_NEXT);
        assert_eq!(writes[3][8], 0x02);
    }

    #[test]
    fn test_tracker_burst_with_wrong_marker_is_rejected() {
        let mut s = session();
        queue_tx_completed(&mut s);
        queue_ack_reply(&mut s, &[0x39, REPLY_BURST_FOLLOWS]);
        queue_tx_completed(&mut s);
        // Burst without the 0x81 marker byte.
        let frames = burst_frames(&[0x00, 0x00, 0x04, 0x00, 0, 0, 0, 0, 1, 2, 3, 4], 0x00);
        for chunk in frames.chunks(BURST_CHUNK_SIZE) {
            s.channel().transport().queue_packet(MSG_BURST_DATA, chunk);
        }

        let err = s.read_data_bank(0).unwrap_err();
        assert!(matches!(err, TrackerError::UnexpectedBurstHeader(_, _)));
    }

    #[test]
    fn test_info_parse_rejects_short_reply() {
        let err = TrackerInfo::parse(&[0x41, 0x01]).unwrap_err();
        assert!(matches!(
            err,
            TrackerError::ShortReply {
                expected: 12,
                actual: 2
            }
        ));
    }
}
