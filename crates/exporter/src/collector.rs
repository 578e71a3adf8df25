//! Live sensor registry and metrics collection
//!
//! The [`SensorCollector`] owns every opened sensor. The hotplug thread adds
//! and removes sensors as devices come and go; HTTP workers call
//! [`SensorCollector::collect_families`] (through the prometheus registry)
//! to read all of them.
//!
//! # Locking
//!
//! - `read_lock` serialises whole collection passes.
//! - `registry` guards the sensor map and the set of devices being opened,
//!   and is never held across device I/O.
//! - Each sensor has its own mutex so the hotplug thread can close it without
//!   racing an in-flight read.

use crate::health::HealthCheck;
use crate::usb::{Matcher, Sensor};
use common::{DeviceAction, HidrawDevice};
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, Opts};
use protocol::{ProtocolError, ReadingKind};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

pub const TEMPERATURE_FAMILY: &str = "temper_temperature_celsius";
pub const HUMIDITY_FAMILY: &str = "temper_humidity_rh";

const TEMPERATURE_HELP: &str = "Temperature reading in degrees Celsius";
const HUMIDITY_HELP: &str = "Relative humidity reading in percent";
const LABELS: [&str; 3] = ["name", "phy", "version"];

type SharedSensor = Arc<Mutex<Box<dyn Sensor>>>;

#[derive(Default)]
struct SensorTable {
    sensors: HashMap<HidrawDevice, SharedSensor>,
    /// Devices whose driver is being opened; `true` once removed meanwhile
    opening: HashMap<HidrawDevice, bool>,
}

struct Inner {
    matcher: Matcher,
    registry: Mutex<SensorTable>,
    read_lock: Mutex<()>,
    healthy: AtomicBool,
    faults: AtomicU64,
    descs: Vec<Desc>,
}

/// Registry of open sensors, exposed as a prometheus collector
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct SensorCollector {
    inner: Arc<Inner>,
}

impl SensorCollector {
    pub fn new(matcher: Matcher) -> Self {
        let descs = [
            (TEMPERATURE_FAMILY, TEMPERATURE_HELP),
            (HUMIDITY_FAMILY, HUMIDITY_HELP),
        ]
        .into_iter()
        .filter_map(|(name, help)| {
            Desc::new(
                name.to_string(),
                help.to_string(),
                LABELS.iter().map(|l| l.to_string()).collect(),
                HashMap::new(),
            )
            .map_err(|e| error!("Invalid metric descriptor {}: {}", name, e))
            .ok()
        })
        .collect();

        Self {
            inner: Arc::new(Inner {
                matcher,
                registry: Mutex::new(SensorTable::default()),
                read_lock: Mutex::new(()),
                healthy: AtomicBool::new(true),
                faults: AtomicU64::new(0),
                descs,
            }),
        }
    }

    /// React to a device appearing or disappearing
    ///
    /// Adding a device that is already registered, or removing one that is
    /// not, does nothing.
    pub fn handle_device_event(&self, device: &HidrawDevice) {
        match device.action {
            DeviceAction::Add | DeviceAction::None => self.add_device(device),
            DeviceAction::Remove => self.remove_device(device),
        }
    }

    /// Register every device already present
    ///
    /// Must run after the hotplug listener is receiving events, so that a
    /// device plugged in between the two is seen by at least one of them.
    pub fn coldplug_scan<I>(&self, devices: I)
    where
        I: IntoIterator<Item = HidrawDevice>,
    {
        for device in devices {
            self.handle_device_event(&device.with_action(DeviceAction::None));
        }
    }

    /// Read every sensor and build the temperature and humidity families
    ///
    /// A sensor that fails to read is closed and dropped from the registry;
    /// the others are still reported.
    pub fn collect_families(&self) -> Vec<MetricFamily> {
        let _pass = self
            .inner
            .read_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let (temperature, humidity) = match (
            GaugeVec::new(Opts::new(TEMPERATURE_FAMILY, TEMPERATURE_HELP), &LABELS),
            GaugeVec::new(Opts::new(HUMIDITY_FAMILY, HUMIDITY_HELP), &LABELS),
        ) {
            (Ok(t), Ok(h)) => (t, h),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to create gauge families: {}", e);
                return Vec::new();
            }
        };

        let snapshot: Vec<(HidrawDevice, SharedSensor)> = self
            .lock_registry()
            .sensors
            .iter()
            .map(|(device, sensor)| (device.clone(), Arc::clone(sensor)))
            .collect();

        for (device, shared) in snapshot {
            let result = {
                let mut sensor = lock_sensor(&shared);
                sensor.read_sensor().map(|readings| {
                    (readings, sensor.phy().to_string(), sensor.version().to_string())
                })
            };

            match result {
                Ok((readings, phy, version)) => {
                    for reading in readings {
                        let family = match reading.kind {
                            ReadingKind::Temperature => &temperature,
                            ReadingKind::Humidity => &humidity,
                        };
                        family
                            .with_label_values(&[
                                reading.name.as_str(),
                                phy.as_str(),
                                version.as_str(),
                            ])
                            .set(reading.value);
                    }
                }
                // Closed by a remove event after the snapshot was taken
                Err(ProtocolError::Closed) => {
                    debug!("Sensor {} removed during collection", device);
                }
                Err(e) => {
                    error!("Failed to read sensor {}: {}", device, e);
                    self.record_fault();
                    close_sensor(&device, &shared);
                    self.deregister(&device, &shared);
                }
            }
        }

        let mut families = temperature.collect();
        families.extend(humidity.collect());
        families
    }

    /// False once any sensor failed to open or read; never reset
    pub fn healthy(&self) -> bool {
        self.inner.healthy.load(Ordering::SeqCst)
    }

    pub fn sensor_count(&self) -> usize {
        self.lock_registry().sensors.len()
    }

    /// Number of open and read failures so far
    pub fn fault_count(&self) -> u64 {
        self.inner.faults.load(Ordering::SeqCst)
    }

    /// Whether `device` currently has a registered sensor
    pub fn contains(&self, device: &HidrawDevice) -> bool {
        self.lock_registry().sensors.contains_key(device)
    }

    fn add_device(&self, device: &HidrawDevice) {
        let Some(variant) = self.inner.matcher.find(device) else {
            debug!("No sensor driver for {}", device);
            return;
        };

        {
            let mut registry = self.lock_registry();
            if registry.sensors.contains_key(device) || registry.opening.contains_key(device) {
                debug!("Ignoring {} event for known device {}", device.action, device);
                return;
            }
            registry.opening.insert(device.clone(), false);
        }

        let opened = variant.open(device);

        let mut registry = self.lock_registry();
        let removed = registry.opening.remove(device).unwrap_or(false);
        match opened {
            Ok(sensor) if removed => {
                drop(registry);
                debug!("{} was removed while being opened", device);
                close_sensor(device, &Arc::new(Mutex::new(sensor)));
            }
            Ok(sensor) => {
                let version = sensor.version().to_string();
                registry
                    .sensors
                    .insert(device.clone(), Arc::new(Mutex::new(sensor)));
                drop(registry);
                info!(
                    "Added {} sensor {} (version {:?}, phy {:?})",
                    variant.name,
                    device,
                    version,
                    device.phys()
                );
            }
            Err(e) if removed => {
                drop(registry);
                debug!("{} was removed while being opened: {}", device, e);
            }
            Err(e) => {
                drop(registry);
                error!("Failed to open {} as {}: {}", device, variant.name, e);
                self.record_fault();
            }
        }
    }

    fn remove_device(&self, device: &HidrawDevice) {
        let removed = {
            let mut registry = self.lock_registry();
            if let Some(cancelled) = registry.opening.get_mut(device) {
                *cancelled = true;
            }
            registry.sensors.remove(device)
        };
        match removed {
            Some(sensor) => {
                info!("Removed sensor {}", device);
                close_sensor(device, &sensor);
            }
            None => debug!("Ignoring remove event for unregistered device {}", device),
        }
    }

    /// Drop `device` from the registry if it still maps to `sensor`
    fn deregister(&self, device: &HidrawDevice, sensor: &SharedSensor) {
        let mut registry = self.lock_registry();
        if registry
            .sensors
            .get(device)
            .is_some_and(|current| Arc::ptr_eq(current, sensor))
        {
            registry.sensors.remove(device);
        }
    }

    fn record_fault(&self) {
        self.inner.faults.fetch_add(1, Ordering::SeqCst);
        if self.inner.healthy.swap(false, Ordering::SeqCst) {
            warn!("Sensor collector is now unhealthy");
        }
    }

    fn lock_registry(&self) -> MutexGuard<'_, SensorTable> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock_sensor(sensor: &SharedSensor) -> MutexGuard<'_, Box<dyn Sensor>> {
    sensor.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Close a sensor, logging rather than propagating any error
fn close_sensor(device: &HidrawDevice, sensor: &SharedSensor) {
    if let Err(e) = lock_sensor(sensor).close() {
        warn!("Error closing sensor {}: {}", device, e);
    }
}

impl Collector for SensorCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.inner.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.collect_families()
    }
}

impl HealthCheck for SensorCollector {
    fn name(&self) -> &str {
        "collector"
    }

    fn healthy(&self) -> bool {
        SensorCollector::healthy(self)
    }
}

impl std::fmt::Debug for SensorCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorCollector")
            .field("sensors", &self.sensor_count())
            .field("healthy", &self.healthy())
            .finish()
    }
}
