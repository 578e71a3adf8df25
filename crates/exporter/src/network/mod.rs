//! HTTP serving layer
//!
//! axum on a dedicated multi-threaded tokio runtime. The server exposes the
//! metrics registry, can be stopped instantly from another thread and can
//! probe itself for the health monitor.
//!
//! # Architecture
//!
//! ```text
//! MetricsServer ("http" thread blocks on the runtime)
//!   └─> axum::serve ("http-worker" runtime threads)
//!         ├─> access log (status >= 400 only)
//!         ├─> request timeout, panic -> 500
//!         └─> ExporterApp router: /, /metrics (spawn_blocking), 404
//! ```

pub mod access_log;
pub mod app;
pub mod server;

pub use app::ExporterApp;
pub use server::{MetricsServer, ServerProbe, ServerStopHandle, default_thread_count};
