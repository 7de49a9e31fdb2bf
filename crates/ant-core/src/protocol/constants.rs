//! Protocol constants for the ANT link layer and the tracker opcode layer.

// ============================================================================
// Framing
// ============================================================================

/// Normal sync marker, first byte of every framed packet.
pub const SYNC: u8 = 0xA4;
/// Alternate sync marker, seen from some transceivers. Accepted on receive.
pub const SYNC_ALT: u8 = 0xA5;
/// Largest data length the transceiver accepts in one packet.
pub const MAX_DATA_LEN: usize = 32;
/// Sync + length + message id + checksum.
pub const FRAME_OVERHEAD: usize = 4;

// ============================================================================
// Link-layer message ids (Host -> Transceiver unless noted)
// ============================================================================

pub const MSG_SYSTEM_RESET: u8 = 0x4A;
pub const MSG_ASSIGN_CHANNEL: u8 = 0x42;
pub const MSG_CHANNEL_ID: u8 = 0x51;
pub const MSG_CHANNEL_PERIOD: u8 = 0x43;
pub const MSG_SEARCH_TIMEOUT: u8 = 0x44;
pub const MSG_CHANNEL_RF_FREQ: u8 = 0x45;
pub const MSG_NETWORK_KEY: u8 = 0x46;
pub const MSG_TRANSMIT_POWER: u8 = 0x47;
pub const MSG_OPEN_CHANNEL: u8 = 0x4B;
pub const MSG_CLOSE_CHANNEL: u8 = 0x4C;

pub const MSG_BROADCAST_DATA: u8 = 0x4E;
pub const MSG_ACKNOWLEDGED_DATA: u8 = 0x4F;
pub const MSG_BURST_DATA: u8 = 0x50;

/// Generic channel response / event (Transceiver -> Host).
pub const MSG_CHANNEL_RESPONSE: u8 = 0x40;
/// Startup message after a system reset (Transceiver -> Host).
pub const MSG_STARTUP: u8 = 0x6F;

// ============================================================================
// Channel response / event codes
// ============================================================================

pub const RESPONSE_NO_ERROR: u8 = 0x00;
pub const EVENT_TRANSFER_RX_FAILED: u8 = 0x04;
pub const EVENT_TRANSFER_TX_COMPLETED: u8 = 0x05;
pub const EVENT_TRANSFER_TX_FAILED: u8 = 0x06;
pub const EVENT_TRANSFER_TX_START: u8 = 0x0A;

/// Startup status byte reported after a host-commanded reset.
pub const STARTUP_COMMAND_RESET: u8 = 0x20;
/// Startup status byte reported after a suspend/reset cycle.
pub const STARTUP_SUSPEND_RESET: u8 = 0x80;

/// Human-readable name for a channel event code, for logging.
pub fn event_name(event: u8) -> &'static str {
    match event {
        0x00 => "RESPONSE_NO_ERROR",
        0x01 => "EVENT_RX_SEARCH_TIMEOUT",
        0x02 => "EVENT_RX_FAIL",
        0x03 => "EVENT_TX",
        0x04 => "EVENT_TRANSFER_RX_FAILED",
        0x05 => "EVENT_TRANSFER_TX_COMPLETED",
        0x06 => "EVENT_TRANSFER_TX_FAILED",
        0x07 => "EVENT_CHANNEL_CLOSED",
        0x08 => "EVENT_RX_FAIL_GO_TO_SEARCH",
        0x09 => "EVENT_CHANNEL_COLLISION",
        0x0A => "EVENT_TRANSFER_TX_START",
        0x15 => "CHANNEL_IN_WRONG_STATE",
        0x16 => "CHANNEL_NOT_OPENED",
        0x18 => "CHANNEL_ID_NOT_SET",
        0x19 => "CLOSE_ALL_CHANNELS",
        0x1F => "TRANSFER_IN_PROGRESS",
        0x20 => "TRANSFER_SEQUENCE_NUMBER_ERROR",
        0x21 => "TRANSFER_IN_ERROR",
        0x28 => "INVALID_MESSAGE",
        0x29 => "INVALID_NETWORK_NUMBER",
        0x30 => "INVALID_LIST_ID",
        0x31 => "INVALID_SCAN_TX_CHANNEL",
        0x33 => "INVALID_PARAMETER_PROVIDED",
        0x35 => "EVENT_QUE_OVERFLOW",
        0x40 => "NVM_FULL_ERROR",
        0x41 => "NVM_WRITE_ERROR",
        _ => "UNKNOWN_EVENT",
    }
}

// ============================================================================
// Burst transfer
// ============================================================================

/// One burst chunk on the wire: sequence byte + up to 8 payload bytes.
pub const BURST_CHUNK_SIZE: usize = 9;
/// Payload bytes carried per burst chunk.
pub const BURST_PAYLOAD_SIZE: usize = 8;
/// Sequence-phase values cycled across consecutive burst chunks.
pub const BURST_SEQ_PHASES: [u8; 3] = [0x20, 0x40, 0x60];
/// High bit of the sequence byte marks the final chunk of a burst.
pub const BURST_LAST_MASK: u8 = 0x80;

// ============================================================================
// Retry / attempt budgets
// ============================================================================

pub const RESET_POLL_ATTEMPTS: u32 = 8;
pub const ACK_SEND_ATTEMPTS: u32 = 8;
pub const BURST_SEND_ATTEMPTS: u32 = 2;
pub const TX_CONFIRM_ATTEMPTS: u32 = 16;
pub const ACK_REPLY_ATTEMPTS: u32 = 30;
pub const BURST_RECEIVE_ATTEMPTS: u32 = 128;
pub const OPCODE_ATTEMPTS: u32 = 4;
pub const BANK_PART_CEILING: u32 = 2000;

// ============================================================================
// Tracker opcode layer
// ============================================================================

/// Base of the cycling packet-id space; ids run 0x38..=0x3F.
pub const PACKET_ID_BASE: u8 = 0x38;

pub const OP_READ_BANK: u8 = 0x22;
pub const OP_GET_INFO: u8 = 0x24;
pub const OP_WRITE_BANK: u8 = 0x25;
pub const OP_DEVICE_CONTROL: u8 = 0x78;
pub const OP_SLEEP: u8 = 0x7F;

/// `OP_DEVICE_CONTROL` sub-codes.
pub const CONTROL_PING: u8 = 0x00;
pub const CONTROL_RESET: u8 = 0x01;
pub const CONTROL_CHANNEL_HOP: u8 = 0x02;

/// Reply codes in the second byte of an opcode acknowledgement.
pub const REPLY_BURST_FOLLOWS: u8 = 0x42;
pub const REPLY_NEEDS_PAYLOAD: u8 = 0x61;
pub const REPLY_SIMPLE_ACK: u8 = 0x41;

/// Marker byte the tracker places second in every data-bank burst header.
pub const TRACKER_BURST_MARKER: u8 = 0x81;
/// Application header bytes preceding bank data in a tracker burst.
pub const TRACKER_BURST_HEADER_LEN: usize = 8;

/// Bank-chunk request command for the first chunk of a bank read.
pub const BANK_REQUEST_FIRST: u8 = 0x70;
/// Bank-chunk request command for every subsequent chunk.
pub const BANK_REQUEST_NEXT: u8 = 0x60;
