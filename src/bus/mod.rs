//! The bus module contains the transmitter protocol engine: the frame codec,
//! the transport seam, single exchanges with a device and the retry policy
//! wrapped around them.

pub mod frame;
pub mod retry;
pub mod serial;
pub mod serial_mock;
pub mod session;
pub mod transport;

pub use frame::{checksum, decode_response, encode_request, encode_response, Response};
pub use retry::{AttemptState, CommandKind, RetryController};
pub use serial::{SerialConfig, SerialConnector, SerialTransport};
pub use session::{Counters, Device, DeviceSession, Reading, Timing};
pub use transport::{Connector, StreamTransport, Transport};
