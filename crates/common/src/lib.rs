//! Common utilities for temper-exporter
//!
//! This crate provides the pieces shared between the protocol layer and the
//! daemon: the hidraw device model handed around by discovery code, error
//! handling, logging setup, cross-thread stop primitives, and fakes for
//! tests.

pub mod error;
pub mod hid_types;
pub mod logging;
pub mod shutdown;
pub mod test_utils;

pub use error::{Error, Result};
pub use hid_types::{DeviceAction, HidrawDevice};
pub use logging::setup_logging;
pub use shutdown::{Shutdown, StopToken};
