//! TEMPer exporter library
//!
//! Discovers TEMPer USB thermometers/hygrometers through udev, keeps them
//! open while they are plugged in and exposes their readings on a
//! Prometheus `/metrics` endpoint. A health monitor checks the collector
//! and the HTTP server and brings the process down when either breaks, so
//! the supervisor can restart it.

pub mod collector;
pub mod config;
pub mod health;
pub mod network;
pub mod service;
pub mod usb;

pub use collector::SensorCollector;
pub use config::ExporterConfig;
pub use health::{HealthCheck, HealthMonitor};
pub use network::{ExporterApp, MetricsServer};
