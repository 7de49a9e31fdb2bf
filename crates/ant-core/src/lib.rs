//! ant-core: host-side protocol stack for syncing wearable trackers over
//! an ANT 2.4 GHz USB transceiver.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Framing, message ids, constants
//! - **Transport**: USB communication abstraction (nusb, mock)
//! - **Channel**: Link-layer channel lifecycle and framed send/receive
//! - **Transfer**: Acknowledged and burst transfer primitives
//! - **Tracker**: Opcode-level device session
//! - **Bank**: Decoders for the on-device data banks
//! - **Events**: Observer pattern for UI decoupling
//!
//! # Example
//!
//! ```no_run
//! use ant_core::{NusbTransport, TrackerSession, decode_bank};
//!
//! let transport = NusbTransport::open().expect("no transceiver found");
//! let mut session = TrackerSession::new(transport);
//! session.init_for_transfer().expect("link bring-up failed");
//!
//! let info = session.get_tracker_info().expect("info opcode failed");
//! let raw = session.read_data_bank(0).expect("bank read failed");
//! let decoded = decode_bank(0, info.hardware_version, &raw).expect("bad bank data");
//! println!("{decoded}");
//! ```

pub mod bank;
pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod tracker;
pub mod transfer;
pub mod transport;

// Re-exports for convenience
pub use bank::{DecodeError, DecodedBank, decode_bank};
pub use channel::{ChannelSession, LinkState};
pub use config::SyncConfig;
pub use error::{ProtocolError, TrackerError};
pub use events::{NullObserver, TracingObserver, TrackerEvent, TrackerObserver};
pub use protocol::{Packet, ParseStatus};
pub use tracker::{TrackerInfo, TrackerSession};
pub use transport::{AntTransport, MockTransport, NusbTransport, TransportError};
