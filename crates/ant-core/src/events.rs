//! Event system for decoupling downstream consumers.
//!
//! Session-dump and upload collaborators subscribe to tracker events
//! (notably every opcode request/response pair) without tight coupling to
//! the protocol logic.

/// Events emitted by a tracker session.
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    /// The link bring-up completed and the tracker answered a ping.
    LinkReady { channel_id: [u8; 2] },
    /// The tracker's beacon was observed.
    BeaconSeen,
    /// One opcode request/response cycle completed.
    OpcodeCompleted {
        opcode: [u8; 7],
        payload: Vec<u8>,
        response: Vec<u8>,
    },
    /// One chunk of a data bank was retrieved.
    BankChunk { cursor: u8, len: usize },
    /// Tracker identity fields were decoded.
    TrackerIdentified {
        serial: String,
        hardware_version: u8,
    },
}

/// Observer trait for receiving tracker events.
pub trait TrackerObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &TrackerEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl TrackerObserver for NullObserver {
    fn on_event(&self, _event: &TrackerEvent) {
        // Do nothing
    }
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl TrackerObserver for TracingObserver {
    fn on_event(&self, event: &TrackerEvent) {
        match event {
            TrackerEvent::LinkReady { channel_id } => {
                tracing::info!(
                    channel_id = %format!("{:02X}{:02X}", channel_id[0], channel_id[1]),
                    "Link ready"
                );
            }
            TrackerEvent::BeaconSeen => {
                tracing::debug!("Beacon seen");
            }
            TrackerEvent::OpcodeCompleted {
                opcode,
                payload,
                response,
            } => {
                tracing::debug!(
                    opcode = %format!("0x{:02X}", opcode[0]),
                    payload_len = payload.len(),
                    response_len = response.len(),
                    "Opcode completed"
                );
            }
            TrackerEvent::BankChunk { cursor, len } => {
                tracing::trace!(cursor, len, "Bank chunk");
            }
            TrackerEvent::TrackerIdentified {
                serial,
                hardware_version,
            } => {
                tracing::info!(serial = %serial, hardware_version, "Tracker identified");
            }
        }
    }
}
