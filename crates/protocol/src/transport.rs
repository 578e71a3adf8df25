//! Raw report channel to a device

use std::io::{Read, Write};

/// A read/write channel carrying raw HID reports
///
/// Each `write` carries one complete output report (report id included) and
/// each `read` returns one input report. Implemented by the hidraw file
/// wrapper in the daemon and by the scripted fake used in tests.
pub trait Transport: Read + Write + Send {
    /// Release the channel, reporting any error from the release itself
    fn close(self: Box<Self>) -> std::io::Result<()> {
        Ok(())
    }
}
