//! The supported TEMPer families

use super::sensor::{HidSensor, SensorProtocol};
use protocol::convert::{
    calibration_offset, dual_probe_celsius, hum_temperature_celsius, relative_humidity,
    sensor_id, split_i16_pair,
};
use protocol::{
    Expect, GET_CALIBRATION, LEGACY_READ, ProtocolError, READ_SENSOR_ID, READ_TEMPER, Reading,
    Result, TEMPER_REPLY, Transport, read_report, request, write_command,
};
use tracing::debug;

/// Original single-probe TEMPer (1130:660c)
///
/// Its reply format was never worked out; reads always fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct Temper;

impl SensorProtocol for Temper {
    const NAME: &'static str = "temper";

    fn read_sensor(&self, transport: &mut dyn Transport) -> Result<Vec<Reading>> {
        write_command(transport, &LEGACY_READ)?;
        let report = read_report(transport)?;
        debug!("temper legacy read reply: {:02x?}", report);
        Err(ProtocolError::NotImplemented("temper read_sensor"))
    }
}

/// TEMPer2 (0c45:7401): internal and external probe
#[derive(Debug, Clone, Copy, Default)]
pub struct Temper2;

impl SensorProtocol for Temper2 {
    const NAME: &'static str = "temper2";

    fn read_sensor(&self, transport: &mut dyn Transport) -> Result<Vec<Reading>> {
        let payload = request(transport, &READ_TEMPER, TEMPER_REPLY)?;
        let (internal, external) = split_i16_pair(&payload);
        Ok(vec![
            Reading::temperature("internal", dual_probe_celsius(internal)),
            Reading::temperature("external", dual_probe_celsius(external)),
        ])
    }

    fn read_calibration(&self, transport: &mut dyn Transport) -> Result<Vec<f64>> {
        let payload = request(transport, &GET_CALIBRATION, Expect::new(0x82, 2))?;
        Ok(vec![calibration_offset(payload[0])])
    }
}

impl HidSensor<Temper2> {
    /// Query the probe id
    pub fn read_sensor_id(&mut self) -> Result<u8> {
        let payload = request(self.transport()?, &READ_SENSOR_ID, Expect::new(0x89, 1))?;
        Ok(sensor_id(payload[0]))
    }
}

/// TEMPer2HUM (0c45:7402): temperature and relative humidity
#[derive(Debug, Clone, Copy, Default)]
pub struct Temper2Hum;

impl SensorProtocol for Temper2Hum {
    const NAME: &'static str = "temper2hum";

    fn read_sensor(&self, transport: &mut dyn Transport) -> Result<Vec<Reading>> {
        let payload = request(transport, &READ_TEMPER, TEMPER_REPLY)?;
        let (raw_temp, raw_rh) = split_i16_pair(&payload);
        let temp_c = hum_temperature_celsius(raw_temp);
        Ok(vec![
            Reading::temperature("", temp_c),
            Reading::humidity("", relative_humidity(raw_rh, temp_c)),
        ])
    }

    fn read_calibration(&self, transport: &mut dyn Transport) -> Result<Vec<f64>> {
        let payload = request(transport, &GET_CALIBRATION, Expect::new(0x82, 4))?;
        Ok(vec![
            calibration_offset(payload[0]),
            calibration_offset(payload[2]),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::sensor::Sensor;
    use common::test_utils::{FakeHidraw, mock_hidraw_device};
    use protocol::ReadingKind;

    fn open<P: SensorProtocol>(protocol: P, fake: &FakeHidraw) -> HidSensor<P> {
        HidSensor::open(
            protocol,
            mock_hidraw_device("/sys/foo/hidraw0", None),
            Box::new(fake.clone()),
        )
        .unwrap()
    }

    #[test]
    fn test_temper2_read_sensor() {
        let fake = FakeHidraw::new().with_response(
            &READ_TEMPER.bytes,
            &[&[0x80, 0x04, 0x0c, 0x80, 0xff, 0x00, 0x00, 0x00][..]],
        );
        let mut sensor = open(Temper2, &fake);

        let readings = sensor.read_sensor().unwrap();
        assert_eq!(
            readings,
            vec![
                Reading::temperature("internal", 12.5),
                Reading::temperature("external", -1.0),
            ]
        );
    }

    #[test]
    fn test_temper2_rejects_bad_echo() {
        let fake = FakeHidraw::new().with_response(
            &READ_TEMPER.bytes,
            &[&[0x82, 0x04, 0x0c, 0x80, 0xff, 0x00, 0x00, 0x00][..]],
        );
        let mut sensor = open(Temper2, &fake);
        assert!(matches!(
            sensor.read_sensor(),
            Err(ProtocolError::UnexpectedCommand { .. })
        ));
    }

    #[test]
    fn test_temper2_calibration_and_id() {
        let fake = FakeHidraw::new()
            .with_response(
                &GET_CALIBRATION.bytes,
                &[&[0x82, 0x02, 0xf8, 0x00, 0x00, 0x00, 0x00, 0x00][..]],
            )
            .with_response(
                &READ_SENSOR_ID.bytes,
                &[&[0x89, 0x01, 0x0b, 0x00, 0x00, 0x00, 0x00, 0x00][..]],
            );
        let mut sensor = open(Temper2, &fake);

        assert_eq!(sensor.read_calibration().unwrap(), vec![-0.5]);
        assert_eq!(sensor.read_sensor_id().unwrap(), 5);
    }

    #[test]
    fn test_temper2hum_read_sensor() {
        // 6800 = 0x1a90, 4500 = 0x1194
        let fake = FakeHidraw::new().with_response(
            &READ_TEMPER.bytes,
            &[&[0x80, 0x04, 0x1a, 0x90, 0x11, 0x94, 0x00, 0x00][..]],
        );
        let mut sensor = open(Temper2Hum, &fake);

        let readings = sensor.read_sensor().unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].kind, ReadingKind::Temperature);
        assert_eq!(readings[0].name, "");
        assert!((readings[0].value - 28.3).abs() < 1e-9);
        assert_eq!(readings[1].kind, ReadingKind::Humidity);
        assert_eq!(readings[1].value, 100.0);
    }

    #[test]
    fn test_temper2hum_calibration() {
        let fake = FakeHidraw::new().with_response(
            &GET_CALIBRATION.bytes,
            &[&[0x82, 0x04, 0x10, 0x00, 0xf0, 0x00, 0x00, 0x00][..]],
        );
        let mut sensor = open(Temper2Hum, &fake);
        assert_eq!(sensor.read_calibration().unwrap(), vec![1.0, -1.0]);
    }

    #[test]
    fn test_temper_is_not_implemented() {
        let fake = FakeHidraw::new().with_response(
            &LEGACY_READ.bytes,
            &[&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00][..]],
        );
        let mut sensor = open(Temper, &fake);

        assert!(matches!(
            sensor.read_sensor(),
            Err(ProtocolError::NotImplemented(_))
        ));
        // get_version, then the legacy read
        let written = fake.written();
        assert_eq!(written.len(), 2);
        assert_eq!(&written[1][1..], &LEGACY_READ.bytes);
    }

    #[test]
    fn test_short_write_is_a_fault() {
        let fake = FakeHidraw::new().with_response(
            &READ_TEMPER.bytes,
            &[&[0x80, 0x04, 0x0c, 0x80, 0x0c, 0x80, 0x00, 0x00][..]],
        );
        let mut sensor = open(Temper2, &fake);
        fake.truncate_writes();
        assert!(matches!(
            sensor.read_sensor(),
            Err(ProtocolError::ShortWrite { .. })
        ));
    }
}
