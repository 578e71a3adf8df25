//! Wire protocol for PCsensor TEMPer USB thermometers
//!
//! TEMPer devices speak a tiny command/response protocol over raw HID
//! reports. This crate defines the command buffers, validates responses and
//! converts raw payloads to physical units. It performs no device discovery;
//! I/O goes through anything implementing [`Transport`].
//!
//! # Example
//!
//! ```
//! use protocol::{READ_TEMPER, TEMPER_REPLY, parse_response};
//!
//! // A TEMPer2 reply to read_temper: echo 0x80, four payload bytes
//! let report = [0x80, 0x04, 0x0c, 0x80, 0xf3, 0x80, 0x00, 0x00];
//! let payload = parse_response(&report, TEMPER_REPLY).unwrap();
//! assert_eq!(payload, &[0x0c, 0x80, 0xf3, 0x80]);
//! assert_eq!(READ_TEMPER.bytes[1], 0x80);
//! ```

pub mod codec;
pub mod convert;
pub mod error;
pub mod transport;
pub mod types;

pub use codec::{
    Command, Expect, GET_CALIBRATION, GET_VERSION, LEGACY_READ, READ_SENSOR_ID, READ_TEMPER,
    REPORT_ID, REPORT_LEN, TEMPER_REPLY, decode_ascii_lossy, encode_command, parse_response,
    read_report, read_version, request, write_command,
};
pub use error::{ProtocolError, Result};
pub use transport::Transport;
pub use types::{Reading, ReadingKind};
