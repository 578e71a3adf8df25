//! temper-exporter
//!
//! Prometheus exporter for TEMPer USB thermometers and hygrometers.

use anyhow::{Context, Result};
use clap::Parser;
use common::{Shutdown, setup_logging};
use prometheus::Registry;
use protocol::ProtocolError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread::{self, Scope};
use temper_exporter::config::{self, ExporterConfig};
use temper_exporter::health::{HealthCheck, HealthMonitor};
use temper_exporter::network::{ExporterApp, MetricsServer};
use temper_exporter::service;
use temper_exporter::usb::{HotplugListener, Matcher, enumerate_hidraw};
use temper_exporter::SensorCollector;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "temper-exporter")]
#[command(author, version, about = "Prometheus exporter for TEMPer USB sensors")]
#[command(long_about = "
Exposes the readings of TEMPer USB thermometers and hygrometers on a
Prometheus /metrics endpoint. Sensors are picked up and dropped as they are
plugged in and out.

EXAMPLES:
    # Listen on all addresses, port 9204
    temper-exporter

    # IPv4 only, fixed worker count
    temper-exporter --bind-address 0.0.0.0 --thread-count 4

    # Show connected sensors and their current readings
    temper-exporter --list-devices

CONFIGURATION:
    The exporter looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/temper-exporter/exporter.toml
    3. /etc/temper-exporter/exporter.toml
    4. Built-in defaults
    Command line flags override file values.
")]
struct Args {
    /// IPv4 or IPv6 address to listen on
    #[arg(long, value_name = "ADDR")]
    bind_address: Option<String>,

    /// Port to listen on
    #[arg(long, value_name = "PORT")]
    bind_port: Option<u16>,

    /// Set IPV6_V6ONLY on the listener (0 or 1)
    #[arg(long, value_name = "0|1")]
    bind_v6only: Option<u8>,

    /// Number of HTTP worker threads
    #[arg(long, value_name = "N")]
    thread_count: Option<usize>,

    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List connected sensors and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut ExporterConfig) {
        if let Some(address) = &self.bind_address {
            config.server.bind_address = address.clone();
        }
        if let Some(port) = self.bind_port {
            config.server.bind_port = port;
        }
        if self.bind_v6only.is_some() {
            config.server.bind_v6only = self.bind_v6only;
        }
        if self.thread_count.is_some() {
            config.server.thread_count = self.thread_count;
        }
        if let Some(level) = &self.log_level {
            config.server.log_level = level.clone();
        }
    }
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    if args.save_config {
        let config = ExporterConfig::default();
        let path = ExporterConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = match &args.config {
        Some(path) => config::load_config(&path.to_string_lossy())
            .context("Failed to load configuration")?,
        None => ExporterConfig::load_or_default(),
    };
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    setup_logging(&config.server.log_level).context("Failed to setup logging")?;

    info!("temper-exporter v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", config.server.log_level);

    if args.list_devices {
        list_devices_mode()?;
        return Ok(ExitCode::SUCCESS);
    }

    let status = run_exporter(&config)?;
    info!("Exiting with status {}", status);
    Ok(ExitCode::from(status))
}

/// Print every connected sensor with its current readings
fn list_devices_mode() -> Result<()> {
    let matcher = Matcher::builtin();
    let devices = enumerate_hidraw().context("Failed to enumerate hidraw devices")?;

    let mut found = 0;
    for device in &devices {
        let Some(variant) = matcher.find(device) else {
            continue;
        };
        found += 1;
        println!("{} ({})", device, variant.name);

        let mut sensor = match variant.open(device) {
            Ok(sensor) => sensor,
            Err(e) => {
                println!("    open failed: {}", e);
                continue;
            }
        };
        println!("    phy: {}", sensor.phy());
        println!("    version: {}", sensor.version());

        match sensor.read_sensor() {
            Ok(readings) => {
                for reading in readings {
                    let name = if reading.name.is_empty() { "-" } else { &reading.name };
                    println!("    {} {}: {:.2}", reading.kind, name, reading.value);
                }
            }
            Err(e) => println!("    read failed: {}", e),
        }

        match sensor.read_calibration() {
            Ok(offsets) => println!("    calibration: {:?}", offsets),
            Err(ProtocolError::NotImplemented(_)) => {}
            Err(e) => println!("    calibration failed: {}", e),
        }

        if let Err(e) = sensor.close() {
            warn!("Failed to close {}: {}", device, e);
        }
    }

    if found == 0 {
        println!("No TEMPer sensors found.");
    }
    Ok(())
}

/// Serve until a signal or a failed health check; returns the exit status
fn run_exporter(config: &ExporterConfig) -> Result<u8> {
    let collector = SensorCollector::new(Matcher::builtin());
    let registry = Registry::new();
    registry
        .register(Box::new(collector.clone()))
        .context("Failed to register sensor collector")?;

    let addr = SocketAddr::new(config.bind_ip()?, config.server.bind_port);
    let app = ExporterApp::new(registry).router();
    let server = MetricsServer::bind(addr, config.v6only(), config.threads(), app)?
        .with_probe_timeout(config.health.probe_timeout());

    let mut interval = config.health.interval();
    if let Some(watchdog) = service::watchdog_interval() {
        if interval > watchdog {
            warn!(
                "Health interval {}s exceeds half the systemd watchdog timeout, using {}s",
                interval.as_secs(),
                watchdog.as_secs()
            );
            interval = watchdog;
        }
    }

    let checks: Vec<Arc<dyn HealthCheck>> =
        vec![Arc::new(collector.clone()), Arc::new(server.prober())];
    let health = HealthMonitor::new(checks, interval).with_heartbeat(|| {
        if let Err(e) = service::notify_watchdog() {
            warn!("Failed to send watchdog keepalive: {:#}", e);
        }
    });
    let hotplug =
        HotplugListener::new(collector.clone()).context("Failed to create hotplug wake pipe")?;

    // Stop order: health monitor, then accept loop, then hotplug listener
    let shutdown = Shutdown::new();
    let health_stop = health.stop_token();
    shutdown.on_shutdown("health monitor", move || health_stop.stop());
    let server_stop = server.stop_handle();
    shutdown.on_shutdown("http server", move || server_stop.send_stop());
    let hotplug_stop = hotplug.stop_handle();
    shutdown.on_shutdown("hotplug listener", move || hotplug_stop.send_stop());

    let on_signal = shutdown.clone();
    ctrlc::set_handler(move || {
        on_signal.trigger("termination signal");
    })
    .context("Failed to install signal handler")?;

    let startup_status = thread::scope(|s| {
        match start(s, &server, &hotplug, &health, &collector) {
            Ok(()) => 0,
            Err(e) => {
                error!("Startup failed: {:#}", e);
                shutdown.trigger("startup failure");
                1
            }
        }
    });

    if let Err(e) = service::notify_stopping() {
        warn!("{:#}", e);
    }
    server.close();

    let health_status = u8::try_from(health.exit_status()).unwrap_or(1);
    Ok(health_status.max(startup_status))
}

/// Launch the three long-running threads and run coldplug
///
/// Coldplug waits until the hotplug monitor is listening, so a sensor
/// plugged in between the two is seen at least once.
fn start<'scope, 'env>(
    s: &'scope Scope<'scope, 'env>,
    server: &'env MetricsServer,
    hotplug: &'env HotplugListener,
    health: &'env HealthMonitor,
    collector: &'env SensorCollector,
) -> Result<()> {
    thread::Builder::new()
        .name("http".to_string())
        .spawn_scoped(s, || server.serve_forever())
        .context("Failed to spawn HTTP thread")?;

    let (ready_tx, ready_rx) = async_channel::bounded(1);
    thread::Builder::new()
        .name("hotplug".to_string())
        .spawn_scoped(s, move || hotplug.run(ready_tx))
        .context("Failed to spawn hotplug thread")?;

    thread::Builder::new()
        .name("health".to_string())
        .spawn_scoped(s, || health.run())
        .context("Failed to spawn health thread")?;

    ready_rx
        .recv_blocking()
        .context("Hotplug listener exited before becoming ready")?
        .context("Failed to open udev monitor")?;

    let devices = enumerate_hidraw().context("Coldplug enumeration failed")?;
    collector.coldplug_scan(devices);

    let status = format!(
        "Serving on {}, {} sensor(s)",
        server.local_addr(),
        collector.sensor_count()
    );
    info!("{}", status);
    if let Err(e) = service::notify_ready().and_then(|()| service::notify_status(&status)) {
        warn!("{:#}", e);
    }
    Ok(())
}
