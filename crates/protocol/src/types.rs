//! Sensor reading types

use std::fmt;

/// Physical quantity measured by a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadingKind {
    /// Temperature in degrees Celsius
    Temperature,
    /// Relative humidity in percent
    Humidity,
}

impl ReadingKind {
    /// Short name used in logs and the device listing
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingKind::Temperature => "temp",
            ReadingKind::Humidity => "humid",
        }
    }
}

impl fmt::Display for ReadingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single value reported by a sensor
///
/// `name` distinguishes several probes of the same kind on one device
/// (e.g. "internal" and "external") and may be empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub kind: ReadingKind,
    pub name: String,
    pub value: f64,
}

impl Reading {
    pub fn temperature(name: impl Into<String>, value: f64) -> Self {
        Self {
            kind: ReadingKind::Temperature,
            name: name.into(),
            value,
        }
    }

    pub fn humidity(name: impl Into<String>, value: f64) -> Self {
        Self {
            kind: ReadingKind::Humidity,
            name: name.into(),
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_constructors() {
        let t = Reading::temperature("internal", 21.5);
        assert_eq!(t.kind, ReadingKind::Temperature);
        assert_eq!(t.name, "internal");

        let h = Reading::humidity("", 45.0);
        assert_eq!(h.kind, ReadingKind::Humidity);
        assert!(h.name.is_empty());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ReadingKind::Temperature.to_string(), "temp");
        assert_eq!(ReadingKind::Humidity.to_string(), "humid");
    }
}
