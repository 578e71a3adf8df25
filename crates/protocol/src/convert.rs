//! Raw payload conversions
//!
//! Formulas are applied exactly as the firmware vendors document them,
//! including evaluation order; do not simplify them algebraically.

use byteorder::{BigEndian, ByteOrder};

/// Split a 4-byte read_temper payload into its two big-endian i16 values
pub fn split_i16_pair(payload: &[u8]) -> (i16, i16) {
    (
        BigEndian::read_i16(&payload[0..2]),
        BigEndian::read_i16(&payload[2..4]),
    )
}

/// TEMPer2 probe value to degrees Celsius
pub fn dual_probe_celsius(raw: i16) -> f64 {
    f64::from(raw) * 125.0 / 32000.0
}

/// TEMPer2HUM temperature value to degrees Celsius
pub fn hum_temperature_celsius(raw: i16) -> f64 {
    f64::from(raw) / 100.0 - 39.7
}

/// TEMPer2HUM humidity value to percent relative humidity
///
/// Linear/quadratic fit plus temperature compensation, clamped to 0..=100.
pub fn relative_humidity(raw: i16, temp_c: f64) -> f64 {
    let rh = f64::from(raw);
    let mut rh_pc = -2.0468 + 0.0367 * rh - 1.5955e-6 * rh * rh;
    rh_pc += (temp_c - 25.0) * (0.01 + 0.00008 * rh);
    rh_pc.clamp(0.0, 100.0)
}

/// Calibration byte (signed, sixteenths of a degree) to degrees
pub fn calibration_offset(raw: u8) -> f64 {
    f64::from(raw as i8) / 16.0
}

/// Probe id from a read_sensor_id payload byte
pub fn sensor_id(raw: u8) -> u8 {
    (raw & 0x0f) >> 1
}
