//! Error taxonomy for the protocol layers.
//!
//! Framing failures (bad checksum, insane length) never appear here; they
//! are recovered locally by resynchronization inside the framer. Everything
//! else surfaces as a typed error so callers can decide retry vs. abort.

use thiserror::Error;

use crate::transport::TransportError;

/// Link-layer and transfer errors.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Hardware/driver failure. Never retried by the protocol layers.
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    /// No parsable packet arrived within the read-attempt budget.
    #[error("no message received after {attempts} consecutive read timeouts")]
    NoMessage { attempts: u32 },

    /// A response's status byte did not match the expected code.
    #[error("command 0x{command:02X}: {detail}")]
    Status { command: u8, detail: String },

    /// The transceiver reported a failed transmission event.
    #[error("transfer tx failed by device event")]
    TxFailed,

    /// No tx completion event within the confirmation budget.
    #[error("no transmission ack seen within {attempts} receive attempts")]
    NoTxAck { attempts: u32 },

    /// Acknowledged send exhausted its retry budget.
    #[error("failed to send acknowledged data after {attempts} attempts")]
    AckSendFailed { attempts: u32 },

    /// Burst send exhausted its retry budget.
    #[error("failed to send burst data after {attempts} attempts")]
    BurstSendFailed { attempts: u32 },

    /// The transceiver reported a failed burst reception.
    #[error("burst receive failed by device event")]
    BurstRxFailed,

    /// Burst accumulation never saw a terminal condition.
    #[error("burst receive failed to detect end within {attempts} attempts")]
    NoBurstEnd { attempts: u32 },

    /// No acknowledged-data reply within the poll budget.
    #[error("failed to receive acknowledged reply within {attempts} attempts")]
    NoAckReply { attempts: u32 },
}

/// Tracker (opcode-level) errors.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// All attempts at one logical opcode were exhausted.
    #[error("failed to run opcode 0x{opcode:02X} after {attempts} attempts")]
    OpcodeFailed { opcode: u8, attempts: u32 },

    /// The tracker asked for payload data but none was supplied.
    #[error("opcode 0x{opcode:02X} requires a payload and none was given")]
    MissingPayload { opcode: u8 },

    /// A data-bank burst did not carry the tracker burst marker.
    #[error("response is not a tracker burst: got {0:02X} {1:02X}")]
    UnexpectedBurstHeader(u8, u8),

    /// A data-bank burst was shorter than its own declared size.
    #[error("tracker burst truncated: declared {declared} bytes, got {actual}")]
    TruncatedBurst { declared: usize, actual: usize },

    /// A bank read never returned an empty chunk.
    #[error("cannot complete data bank within {parts} chunk requests")]
    BankOverflow { parts: u32 },

    /// An opcode reply was too short to parse.
    #[error("reply too short: expected at least {expected} bytes, got {actual}")]
    ShortReply { expected: usize, actual: usize },
}
