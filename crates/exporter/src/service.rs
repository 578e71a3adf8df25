//! Systemd service integration
//!
//! sd_notify over the `NOTIFY_SOCKET` datagram socket. Every call is a no-op
//! when the exporter is not started by systemd with `Type=notify`.

use anyhow::{Context, Result};
use std::env;
use std::os::unix::net::UnixDatagram;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

fn notify(state: &str) -> Result<bool> {
    match env::var_os("NOTIFY_SOCKET") {
        Some(socket_path) => send_to(Path::new(&socket_path), state).map(|()| true),
        None => Ok(false),
    }
}

fn send_to(socket_path: &Path, state: &str) -> Result<()> {
    let socket = UnixDatagram::unbound().context("Failed to create Unix socket")?;
    socket
        .send_to(state.as_bytes(), socket_path)
        .with_context(|| format!("Failed to send {} notification to systemd", state))?;
    Ok(())
}

/// Notify systemd that the exporter is serving and coldplug has finished
pub fn notify_ready() -> Result<()> {
    if notify("READY=1")? {
        info!("Notified systemd: service ready");
    } else {
        debug!("NOTIFY_SOCKET not set, skipping systemd notification");
    }
    Ok(())
}

/// Notify systemd that the shutdown sequence has begun
pub fn notify_stopping() -> Result<()> {
    if notify("STOPPING=1")? {
        info!("Notified systemd: service stopping");
    }
    Ok(())
}

/// Send watchdog keepalive to systemd
///
/// Called from the health monitor after every passing round, so a wedged
/// exporter stops feeding the watchdog.
pub fn notify_watchdog() -> Result<()> {
    if notify("WATCHDOG=1")? {
        debug!("Notified systemd: watchdog keepalive");
    }
    Ok(())
}

/// Status line shown by `systemctl status`
pub fn notify_status(status: &str) -> Result<()> {
    if notify(&format!("STATUS={}", status))? {
        debug!("Notified systemd: status = {}", status);
    }
    Ok(())
}

/// Get the watchdog timeout configured by systemd (in microseconds)
pub fn get_watchdog_timeout() -> Option<u64> {
    env::var("WATCHDOG_USEC").ok().and_then(|s| s.parse().ok())
}

/// Longest health interval that still feeds the watchdog in time
pub fn watchdog_interval() -> Option<Duration> {
    get_watchdog_timeout().map(|usec| Duration::from_micros(usec / 2).max(Duration::from_secs(1)))
}

/// Check if running under systemd
pub fn is_systemd() -> bool {
    env::var("NOTIFY_SOCKET").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_functions_without_socket() {
        // When NOTIFY_SOCKET is not set, functions should succeed but do nothing
        unsafe {
            env::remove_var("NOTIFY_SOCKET");
        }

        assert!(!is_systemd());
        assert!(notify_ready().is_ok());
        assert!(notify_stopping().is_ok());
        assert!(notify_watchdog().is_ok());
        assert!(notify_status("test").is_ok());
    }

    #[test]
    fn test_notify_sends_datagram() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notify.sock");
        let receiver = UnixDatagram::bind(&path).unwrap();

        send_to(&path, "STATUS=probing").unwrap();
        let mut buf = [0u8; 64];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"STATUS=probing");
    }

    #[test]
    fn test_watchdog_timeout() {
        unsafe {
            env::remove_var("WATCHDOG_USEC");
        }
        assert!(get_watchdog_timeout().is_none());
        assert!(watchdog_interval().is_none());

        unsafe {
            env::set_var("WATCHDOG_USEC", "30000000");
        }
        assert_eq!(get_watchdog_timeout(), Some(30_000_000));
        assert_eq!(watchdog_interval(), Some(Duration::from_secs(15)));

        unsafe {
            env::set_var("WATCHDOG_USEC", "invalid");
        }
        assert!(get_watchdog_timeout().is_none());

        unsafe {
            env::remove_var("WATCHDOG_USEC");
        }
    }
}
