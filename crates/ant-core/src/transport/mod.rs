//! USB transport implementations.

mod mock;
mod nusb;
mod traits;

pub use mock::MockTransport;
pub use nusb::{NusbTransport, SUPPORTED_DEVICES};
pub use traits::{AntTransport, TransportError};
