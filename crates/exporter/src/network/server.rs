//! HTTP server on its own tokio runtime
//!
//! The listening socket is built by hand so that `IP_FREEBIND`,
//! `SO_REUSEADDR` and `IPV6_V6ONLY` are set before `bind`, then handed to
//! `axum::serve`. Worker and blocking pools of the runtime are both sized
//! from the configured thread count. `serve_forever` blocks the calling
//! thread until [`ServerStopHandle::send_stop`].
//!
//! # Lifecycle
//!
//! ```text
//! bind() ──> serve_forever() ──> send_stop() ──> close()
//!  Bound        Serving           Stopping        Closed
//! ```
//!
//! Stopping does not touch the network: `send_stop` flips a watch channel
//! that drives axum's graceful shutdown, so it also works while the
//! listener is free-bound to an address no interface carries yet.

use super::access_log;
use crate::health::{HealthCheck, panic_message};
use anyhow::{Context, Result, bail};
use axum::Router;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use nix::sys::socket::{
    self, AddressFamily, Backlog, SockFlag, SockType, SockaddrIn, SockaddrIn6, sockopt,
};
use std::any::Any;
use std::future::IntoFuture;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener as StdTcpListener};
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::runtime::{self, Runtime};
use tokio::sync::watch;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{debug, error, info, warn};

/// Default timeout for the self-probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for handling one request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Time in-flight requests get to finish after `send_stop`
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Upper bound of the default thread count
pub const MAX_DEFAULT_THREADS: usize = 32;

const LISTEN_BACKLOG: i32 = 128;

/// `min(32, cpus + 4)`
pub fn default_thread_count() -> usize {
    let cpus = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    MAX_DEFAULT_THREADS.min(cpus + 4)
}

pub struct MetricsServer {
    runtime: Runtime,
    listener: Mutex<Option<TcpListener>>,
    app: Router,
    local_addr: SocketAddr,
    v6only: Option<bool>,
    stop: Arc<watch::Sender<bool>>,
    probe_timeout: Duration,
}

impl MetricsServer {
    /// Create, configure and bind the listening socket and start the runtime
    ///
    /// `v6only` only applies to IPv6 addresses; `None` leaves the OS
    /// default (`net.ipv6.bindv6only`) in place.
    pub fn bind(
        addr: SocketAddr,
        v6only: Option<bool>,
        threads: usize,
        app: Router,
    ) -> Result<Self> {
        if threads == 0 {
            bail!("HTTP server needs at least one worker thread");
        }

        let listener = bind_listener(addr, v6only)
            .with_context(|| format!("Failed to bind HTTP listener on {}", addr))?;
        let local_addr = listener
            .local_addr()
            .context("Failed to read listener address")?;
        let v6only = read_v6only(&listener, local_addr);
        listener
            .set_nonblocking(true)
            .context("Failed to make listener non-blocking")?;

        let runtime = runtime::Builder::new_multi_thread()
            .worker_threads(threads)
            .max_blocking_threads(threads)
            .thread_name("http-worker")
            .enable_all()
            .build()
            .context("Failed to start HTTP runtime")?;
        let listener = {
            let _guard = runtime.enter();
            TcpListener::from_std(listener).context("Failed to register HTTP listener")?
        };

        info!(
            "HTTP server bound to {} ({} worker thread(s))",
            local_addr, threads
        );

        let (stop, _) = watch::channel(false);
        Ok(Self {
            runtime,
            listener: Mutex::new(Some(listener)),
            app,
            local_addr,
            v6only,
            stop: Arc::new(stop),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        })
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Effective `IPV6_V6ONLY` of the listener, `None` for IPv4
    pub fn v6only(&self) -> Option<bool> {
        self.v6only
    }

    /// Serve until [`ServerStopHandle::send_stop`] is called
    ///
    /// Requests still running [`SHUTDOWN_GRACE`] after the stop are
    /// abandoned. Only the first call serves; later calls return at once.
    pub fn serve_forever(&self) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(listener) = listener else {
            warn!("HTTP server on {} already served", self.local_addr);
            return;
        };

        let service = service_stack(self.app.clone())
            .into_make_service_with_connect_info::<SocketAddr>();
        let stopped = wait_for_stop(self.stop.subscribe());
        let grace = self.stop.subscribe();
        let grace_expired = async move {
            wait_for_stop(grace).await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        };

        info!("Serving HTTP on {}", self.local_addr);
        self.runtime.block_on(async move {
            let server = axum::serve(listener, service).with_graceful_shutdown(stopped);
            tokio::select! {
                result = server.into_future() => {
                    if let Err(e) = result {
                        error!("HTTP server failed: {}", e);
                    }
                }
                () = grace_expired => {
                    warn!("Abandoning HTTP requests still running after shutdown");
                }
            }
        });
        info!("HTTP server stopped accepting connections");
    }

    /// Cross-thread handle that makes `serve_forever` return promptly
    pub fn stop_handle(&self) -> ServerStopHandle {
        ServerStopHandle {
            stop: Arc::clone(&self.stop),
        }
    }

    /// Self-probe usable from other threads
    pub fn prober(&self) -> ServerProbe {
        ServerProbe::new(self.local_addr, self.probe_timeout)
    }

    /// Status code of `GET /` against this server
    pub fn probe(&self) -> reqwest::Result<u16> {
        self.prober().probe()
    }

    pub fn healthy(&self) -> bool {
        self.prober().healthy()
    }

    /// Release the listener and stop the runtime
    pub fn close(self) {
        let MetricsServer {
            runtime,
            listener,
            local_addr,
            ..
        } = self;
        drop(listener);
        runtime.shutdown_timeout(SHUTDOWN_GRACE);
        info!("HTTP server on {} closed", local_addr);
    }
}

/// Stops a [`MetricsServer`] from any thread
#[derive(Debug, Clone)]
pub struct ServerStopHandle {
    stop: Arc<watch::Sender<bool>>,
}

impl ServerStopHandle {
    pub fn send_stop(&self) {
        if !self.stop.send_replace(true) {
            debug!("HTTP server stop requested");
        }
    }
}

/// Performs `GET /` against a server and checks for a 200
#[derive(Debug, Clone)]
pub struct ServerProbe {
    addr: SocketAddr,
    timeout: Duration,
}

impl ServerProbe {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self {
            addr: connectable(addr),
            timeout,
        }
    }

    /// Must not be called from inside an async runtime
    pub fn probe(&self) -> reqwest::Result<u16> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .no_proxy()
            .user_agent(concat!("temper-exporter/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let response = client.get(format!("http://{}/", self.addr)).send()?;
        Ok(response.status().as_u16())
    }
}

impl HealthCheck for ServerProbe {
    fn name(&self) -> &str {
        "http server"
    }

    fn healthy(&self) -> bool {
        match self.probe() {
            Ok(200) => true,
            Ok(status) => {
                warn!("Health probe of {} returned {}", self.addr, status);
                false
            }
            Err(e) => {
                warn!("Health probe of {} failed: {}", self.addr, e);
                false
            }
        }
    }
}

/// Panic isolation, request timeout and the access log around `app`
fn service_stack(app: Router) -> Router {
    app.layer(CatchPanicLayer::custom(panic_response))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(middleware::from_fn(access_log::log_failures))
}

fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    error!("Panic in HTTP handler: {}", panic_message(payload.as_ref()));
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error\r\n").into_response()
}

/// Resolves once the stop flag is set or every stop handle is gone
async fn wait_for_stop(mut stop: watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

/// Map an unspecified address to the loopback address of the same family
fn connectable(addr: SocketAddr) -> SocketAddr {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, addr.port())
}

fn read_v6only(listener: &StdTcpListener, addr: SocketAddr) -> Option<bool> {
    if !addr.is_ipv6() {
        return None;
    }
    socket::getsockopt(listener, sockopt::Ipv6V6Only)
        .map_err(|e| warn!("Failed to read IPV6_V6ONLY: {}", e))
        .ok()
}

fn bind_listener(addr: SocketAddr, v6only: Option<bool>) -> Result<StdTcpListener> {
    let family = match addr {
        SocketAddr::V4(_) => AddressFamily::Inet,
        SocketAddr::V6(_) => AddressFamily::Inet6,
    };
    let fd: OwnedFd = socket::socket(family, SockType::Stream, SockFlag::SOCK_CLOEXEC, None)
        .context("Failed to create socket")?;

    socket::setsockopt(&fd, sockopt::ReuseAddr, &true).context("Failed to set SO_REUSEADDR")?;
    socket::setsockopt(&fd, sockopt::IpFreebind, &true).context("Failed to set IP_FREEBIND")?;
    if let (SocketAddr::V6(_), Some(v6only)) = (addr, v6only) {
        socket::setsockopt(&fd, sockopt::Ipv6V6Only, &v6only)
            .context("Failed to set IPV6_V6ONLY")?;
    }

    let bound = match addr {
        SocketAddr::V4(a) => socket::bind(fd.as_raw_fd(), &SockaddrIn::from(a)),
        SocketAddr::V6(a) => socket::bind(fd.as_raw_fd(), &SockaddrIn6::from(a)),
    };
    bound.context("bind failed")?;

    let backlog = Backlog::new(LISTEN_BACKLOG).context("Invalid listen backlog")?;
    socket::listen(&fd, backlog).context("listen failed")?;

    Ok(StdTcpListener::from(fd))
}
