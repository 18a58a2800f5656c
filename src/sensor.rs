//! Inertial sensor trait — the IMU register-level driver is an
//! out-of-scope commodity; this crate only depends on the
//! trait-level shape below, mirroring how `radio_if`'s `RadioPhy`
//! treats the RF silicon as an external collaborator.

use core::fmt::Debug;

/// Raw, unscaled 6-axis inertial sample plus a scaled convenience pair.
///
/// Gyro convention: right-handed, rad/s. Accel: g, gravity positive on
/// `+Z` when the device is upright.
pub trait ImuSensor {
    type Error: Debug + Clone;

    fn init(&mut self) -> Result<(), Self::Error>;

    /// Raw int16 gyro (0.01 deg/s units) and accel (milli-g), as they
    /// arrive over the sensor bus — the fusion filter's `step` takes
    /// exactly these units.
    fn read_raw(&mut self, gyro: &mut [i16; 3], accel: &mut [i16; 3]) -> Result<(), Self::Error>;

    /// Scaled floating-point convenience accessor for host-side
    /// calibration tooling; never used on the device hot path.
    fn read_scaled(&mut self, gyro_rad_s: &mut [f32; 3], accel_g: &mut [f32; 3]) -> Result<(), Self::Error>;

    fn data_ready(&mut self) -> Result<bool, Self::Error>;

    fn suspend(&mut self) -> Result<(), Self::Error>;
    fn resume(&mut self) -> Result<(), Self::Error>;

    /// Arms wake-on-motion at the given threshold (milli-g).
    fn enable_wom(&mut self, threshold_mg: u16) -> Result<(), Self::Error>;
    fn disable_wom(&mut self) -> Result<(), Self::Error>;
}

#[cfg(any(test, feature = "mocks"))]
pub mod mock {
    use super::*;
    use heapless::Vec;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct MockSensorError;

    /// A scripted sensor: tests push raw samples ahead of time and
    /// `read_raw` drains them in order, repeating the last sample
    /// once the script runs dry (steady-state hold, useful for long
    /// rest-convergence tests that don't want to author thousands of
    /// identical entries).
    #[derive(Debug, Default)]
    pub struct MockSensor {
        pub samples: Vec<([i16; 3], [i16; 3]), 64>,
        pub cursor: usize,
        pub wom_enabled: bool,
        pub suspended: bool,
    }

    impl MockSensor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&mut self, gyro: [i16; 3], accel: [i16; 3]) {
            let _ = self.samples.push((gyro, accel));
        }
    }

    impl ImuSensor for MockSensor {
        type Error = MockSensorError;

        fn init(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }

        fn read_raw(&mut self, gyro: &mut [i16; 3], accel: &mut [i16; 3]) -> Result<(), Self::Error> {
            if self.samples.is_empty() {
                return Ok(());
            }
            let idx = self.cursor.min(self.samples.len() - 1);
            let (g, a) = self.samples[idx];
            *gyro = g;
            *accel = a;
            if self.cursor < self.samples.len() - 1 {
                self.cursor += 1;
            }
            Ok(())
        }

        fn read_scaled(&mut self, gyro_rad_s: &mut [f32; 3], accel_g: &mut [f32; 3]) -> Result<(), Self::Error> {
            let mut g = [0i16; 3];
            let mut a = [0i16; 3];
            self.read_raw(&mut g, &mut a)?;
            for i in 0..3 {
                gyro_rad_s[i] = (g[i] as f32) * 0.01 * core::f32::consts::PI / 180.0;
                accel_g[i] = (a[i] as f32) / 1000.0;
            }
            Ok(())
        }

        fn data_ready(&mut self) -> Result<bool, Self::Error> {
            Ok(!self.samples.is_empty())
        }

        fn suspend(&mut self) -> Result<(), Self::Error> {
            self.suspended = true;
            Ok(())
        }

        fn resume(&mut self) -> Result<(), Self::Error> {
            self.suspended = false;
            Ok(())
        }

        fn enable_wom(&mut self, _threshold_mg: u16) -> Result<(), Self::Error> {
            self.wom_enabled = true;
            Ok(())
        }

        fn disable_wom(&mut self) -> Result<(), Self::Error> {
            self.wom_enabled = false;
            Ok(())
        }
    }

    #[test]
    fn mock_holds_last_sample_once_script_drained() {
        let mut s = MockSensor::new();
        s.push([1, 2, 3], [0, 0, 1000]);
        let mut g = [0i16; 3];
        let mut a = [0i16; 3];
        s.read_raw(&mut g, &mut a).unwrap();
        s.read_raw(&mut g, &mut a).unwrap();
        assert_eq!(g, [1, 2, 3]);
    }
}
