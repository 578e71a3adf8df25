//! Command framing and response validation
//!
//! # Frame Format
//!
//! Requests are 8-byte commands sent as an output report with report id 0:
//! ```text
//! [0x00][cmd0 cmd1 ... cmd7]          (9 bytes, one write)
//! ```
//!
//! Responses arrive as 8-byte input reports:
//! ```text
//! [echo: u8][length: u8][payload: length bytes][padding]
//! ```
//!
//! `echo` repeats the second command byte and `length` declares how many
//! payload bytes follow. Both are checked against what the command expects.

use crate::error::{ProtocolError, Result};
use std::io::{Read, Write};

/// Report id prefixed to every command (devices use unnumbered reports)
pub const REPORT_ID: u8 = 0x00;

/// Size of a command and of a single input report
pub const REPORT_LEN: usize = 8;

/// An 8-byte device command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub name: &'static str,
    pub bytes: [u8; REPORT_LEN],
}

impl Command {
    pub const fn new(name: &'static str, bytes: [u8; REPORT_LEN]) -> Self {
        Self { name, bytes }
    }
}

/// Response header a command expects back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expect {
    /// Echoed command byte
    pub command: u8,
    /// Declared payload length
    pub length: u8,
}

impl Expect {
    pub const fn new(command: u8, length: u8) -> Self {
        Self { command, length }
    }
}

pub const READ_TEMPER: Command =
    Command::new("read_temper", [0x01, 0x80, 0x33, 0x01, 0x00, 0x00, 0x00, 0x00]);
pub const GET_CALIBRATION: Command =
    Command::new("get_calibration", [0x01, 0x82, 0x77, 0x01, 0x00, 0x00, 0x00, 0x00]);
pub const GET_VERSION: Command =
    Command::new("get_version", [0x01, 0x86, 0xff, 0x01, 0x00, 0x00, 0x00, 0x00]);
/// TEMPer2 only
pub const READ_SENSOR_ID: Command =
    Command::new("read_sensor_id", [0x01, 0x89, 0x55, 0x00, 0x00, 0x00, 0x00, 0x00]);
/// Read command of the original single-probe TEMPer; its reply format is unknown
pub const LEGACY_READ: Command =
    Command::new("legacy_read", [0x54, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);

/// Reply to [`READ_TEMPER`]: two big-endian i16 values
pub const TEMPER_REPLY: Expect = Expect::new(0x80, 4);

/// Build the 9-byte output report for a command
pub fn encode_command(command: &Command) -> [u8; REPORT_LEN + 1] {
    let mut frame = [0u8; REPORT_LEN + 1];
    frame[0] = REPORT_ID;
    frame[1..].copy_from_slice(&command.bytes);
    frame
}

/// Send a command as a single output report
///
/// A write that transfers fewer bytes than the frame is a fault; HID
/// reports are never split across writes.
pub fn write_command<W: Write + ?Sized>(writer: &mut W, command: &Command) -> Result<()> {
    let frame = encode_command(command);
    let written = writer.write(&frame)?;
    if written != frame.len() {
        return Err(ProtocolError::ShortWrite {
            written,
            expected: frame.len(),
        });
    }
    Ok(())
}

/// Read one input report (at most [`REPORT_LEN`] bytes)
pub fn read_report<R: Read + ?Sized>(reader: &mut R) -> Result<Vec<u8>> {
    let mut buf = [0u8; REPORT_LEN];
    let n = reader.read(&mut buf)?;
    Ok(buf[..n].to_vec())
}

/// Validate a response report and return its payload
pub fn parse_response(report: &[u8], expect: Expect) -> Result<&[u8]> {
    if report.len() < 2 {
        return Err(ProtocolError::ShortResponse {
            expected: 2,
            actual: report.len(),
        });
    }

    let (command, length) = (report[0], report[1]);
    if command != expect.command {
        return Err(ProtocolError::UnexpectedCommand {
            expected: expect.command,
            actual: command,
        });
    }
    if length != expect.length {
        return Err(ProtocolError::UnexpectedLength {
            command,
            expected: expect.length,
            actual: length,
        });
    }

    let end = 2 + usize::from(length);
    if report.len() < end {
        return Err(ProtocolError::ShortResponse {
            expected: end,
            actual: report.len(),
        });
    }

    Ok(&report[2..end])
}

/// Send a command and return the validated payload of its single-report reply
pub fn request<T: Read + Write + ?Sized>(
    transport: &mut T,
    command: &Command,
    expect: Expect,
) -> Result<Vec<u8>> {
    write_command(transport, command)?;
    let report = read_report(transport)?;
    parse_response(&report, expect).map(<[u8]>::to_vec)
}

/// Query the firmware version string
///
/// The reply spans two reports and carries no header.
pub fn read_version<T: Read + Write + ?Sized>(transport: &mut T) -> Result<String> {
    write_command(transport, &GET_VERSION)?;
    let mut raw = read_report(transport)?;
    raw.extend(read_report(transport)?);
    Ok(decode_ascii_lossy(&raw))
}

/// Decode ASCII, replacing every non-ASCII byte with U+FFFD
pub fn decode_ascii_lossy(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b.is_ascii() {
                char::from(b)
            } else {
                char::REPLACEMENT_CHARACTER
            }
        })
        .collect()
}
