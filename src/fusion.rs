//! VQF-lite fixed-point fusion filter (C5): quaternion integration,
//! accelerometer-gated gravity correction, rest-gated gyro bias
//! learning. Q15 throughout; see [`crate::fixed`] for the shared
//! multiply/renormalize primitives. A floating-point cross-check lives
//! in [`reference`], `cfg(test)`-only — it must never be reachable
//! from device code.

use crate::fixed::{self, clamp_i32, ONE};

/// Angular-rate scale: `ONE` (Q15 "1.0") represents this many rad/s.
/// Chosen generously above typical tracker motion (~10 rad/s) so
/// saturation is rare; exceeding it clamps and sets [`FusionFlags::SATURATED`].
const GYRO_FULL_SCALE_RAD_S: i32 = 16;

/// `centideg/s -> Q15 rad/s` combined constant:
/// `round(0.01 * (pi/180) / GYRO_FULL_SCALE_RAD_S * 2^15)`. A raw
/// reading above ~±917 deg/s (`GYRO_FULL_SCALE_RAD_S`) saturates by
/// design; trackers operate well under that in normal use.
const GYRO_RAW_TO_Q15: i32 = 11712;

/// Accel full scale: `ONE` represents this many g, not 1 g, so a
/// spike well above 1 g is still distinguishable instead of clamping
/// to the same value a legitimate 1 g reading would produce.
const ACCEL_FULL_SCALE_MG: i32 = 4000;

fn accel_mg_to_q15(mg: i16) -> i16 {
    clamp_i32((mg as i32 * ONE as i32) / ACCEL_FULL_SCALE_MG)
}

/// High-dynamics gate bounds, `accel_mg_to_q15(500)` / `(1500)`
/// pre-computed: the correction step only trusts readings with a
/// magnitude in `[0.5g, 1.5g]`.
const ACCEL_GATE_LOW_Q15: i32 = 500 * 32767 / ACCEL_FULL_SCALE_MG;
const ACCEL_GATE_HIGH_Q15: i32 = 1500 * 32767 / ACCEL_FULL_SCALE_MG;

/// Sample period as a negative power of two (multiply-free
/// integration): `dt ~= ONE >> (dt_shift + 1)` after folding in the
/// `1/2` from the integration formula. At `dt_shift = 7` this
/// approximates the nominal 5 ms (200 Hz) period as ~3.9 ms; the
/// resulting ~22% timing compression is an accepted trade for a
/// shift instead of a runtime-variable multiply, and has no bearing
/// on the rest-gated bias estimate (which never depends on dt).
const DEFAULT_DT_SHIFT: u8 = 7;

/// Rest gate: squared angular rate (Q30) below this enters rest after
/// sustained ~0.5 s; leaving uses 2x the magnitude (4x the square) as
/// hysteresis so breathing/tremor can't flap the gate.
const REST_ENTER_SQ_Q30: u64 = 1 << 16;
const REST_LEAVE_SQ_Q30: u64 = REST_ENTER_SQ_Q30 * 4;
const REST_SAMPLES_TO_ENTER: u16 = 100;

bitflags::bitflags! {
    #[derive(Default)]
    pub struct FusionFlags: u8 {
        const RESTING    = 0b0000_0001;
        const SATURATED  = 0b0000_0010;
        const DEGENERATE = 0b0000_0100;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FusionState {
    /// `[w, x, y, z]`, Q15.
    pub quat: [i16; 4],
    pub gyro_bias: [i16; 3],
    pub accel_lp: [i16; 3],
    /// Q15 gain, accel correction / low-pass.
    pub k_acc: i16,
    /// Q15 gain, bias learning rate.
    pub k_bias: i16,
    pub rest_count: u16,
    pub sample_count: u16,
    pub dt_shift: u8,
    pub flags: FusionFlags,
}

impl Default for FusionState {
    fn default() -> Self {
        Self {
            quat: [ONE, 0, 0, 0],
            gyro_bias: [0; 3],
            accel_lp: [0, 0, accel_mg_to_q15(1000)],
            k_acc: ONE / 100, // ~1% correction per sample
            k_bias: ONE / 1000,
            rest_count: 0,
            sample_count: 0,
            dt_shift: DEFAULT_DT_SHIFT,
            flags: FusionFlags::empty(),
        }
    }
}

fn term(a: i16, b: i16) -> i64 {
    a as i64 * b as i64
}

fn clamp_q15(x: i64) -> i16 {
    clamp_i32((x >> 15) as i32)
}

/// Hamilton product of two Q15 quaternions `[w, x, y, z]`.
fn quat_mul(a: [i16; 4], b: [i16; 4]) -> [i16; 4] {
    let (aw, ax, ay, az) = (a[0], a[1], a[2], a[3]);
    let (bw, bx, by, bz) = (b[0], b[1], b[2], b[3]);
    [
        clamp_q15(term(aw, bw) - term(ax, bx) - term(ay, by) - term(az, bz)),
        clamp_q15(term(aw, bx) + term(ax, bw) + term(ay, bz) - term(az, by)),
        clamp_q15(term(aw, by) - term(ax, bz) + term(ay, bw) + term(az, bx)),
        clamp_q15(term(aw, bz) + term(ax, by) - term(ay, bx) + term(az, bw)),
    ]
}

/// Predicted gravity direction (body frame) from `q`, i.e.
/// `q^-1 * [0,0,1] * q` specialized algebraically (standard
/// quaternion-to-down-vector identity), avoiding a general
/// inverse + two multiplies.
fn predict_gravity(q: [i16; 4]) -> [i16; 3] {
    let (w, x, y, z) = (q[0], q[1], q[2], q[3]);
    [
        clamp_q15(2 * (term(x, z) - term(w, y))),
        clamp_q15(2 * (term(y, z) + term(w, x))),
        clamp_q15(term(w, w) - term(x, x) - term(y, y) + term(z, z)),
    ]
}

fn cross(a: [i16; 3], b: [i16; 3]) -> [i16; 3] {
    [
        clamp_q15(term(a[1], b[2]) - term(a[2], b[1])),
        clamp_q15(term(a[2], b[0]) - term(a[0], b[2])),
        clamp_q15(term(a[0], b[1]) - term(a[1], b[0])),
    ]
}

fn sum_sq_q30(v: [i16; 3]) -> u64 {
    v.iter().map(|&c| term(c, c) as u64).sum()
}

impl FusionState {
    pub fn new(k_acc: i16, k_bias: i16, dt_shift: u8) -> Self {
        Self {
            k_acc,
            k_bias,
            dt_shift,
            ..Default::default()
        }
    }

    /// Forces the orientation (e.g. restoring after wake); resets
    /// `rest_count` so a forced orientation can't masquerade as a
    /// long rest interval.
    pub fn set_quat(&mut self, q: [i16; 4]) {
        self.quat = q;
        self.rest_count = 0;
    }

    /// Preserves `dt_shift`, `k_acc`, `k_bias`; zeros everything else.
    /// Idempotent: `reset(); reset()` yields the same state as a
    /// single `reset()`.
    pub fn reset(&mut self) {
        let (k_acc, k_bias, dt_shift) = (self.k_acc, self.k_bias, self.dt_shift);
        *self = Self {
            k_acc,
            k_bias,
            dt_shift,
            ..Default::default()
        };
    }

    pub fn is_resting(&self) -> bool {
        self.flags.contains(FusionFlags::RESTING)
    }

    /// One 200 Hz step. `raw_gyro` is int16 in 0.01 deg/s units;
    /// `raw_accel_mg` is milli-g.
    pub fn step(&mut self, raw_gyro: [i16; 3], raw_accel_mg: [i16; 3]) {
        self.sample_count = self.sample_count.wrapping_add(1);
        self.flags.remove(FusionFlags::DEGENERATE);

        // 1. raw gyro -> Q15 rad/s, subtract bias.
        let mut omega = [0i16; 3];
        for i in 0..3 {
            let scaled = clamp_i32(((raw_gyro[i] as i32) * GYRO_RAW_TO_Q15) >> 15);
            omega[i] = clamp_i32(scaled as i32 - self.gyro_bias[i] as i32);
        }

        // 2. integrate: q += 1/2 * q (x) [0, omega] * dt, renormalize.
        let omega_quat = [0, omega[0], omega[1], omega[2]];
        let q_dot = quat_mul(self.quat, omega_quat);
        let half_dt_shift = self.dt_shift + 1;
        let mut integrated = self.quat;
        for i in 0..4 {
            let delta = (q_dot[i] as i32) >> half_dt_shift;
            integrated[i] = clamp_i32(integrated[i] as i32 + delta);
        }
        match fixed::renormalize_quat(integrated) {
            Some(q) => self.quat = q,
            None => {
                self.quat = [ONE, 0, 0, 0];
                self.flags.insert(FusionFlags::DEGENERATE);
            }
        }

        // 3. raw accel -> Q15 g; high-dynamics gate.
        let accel = [
            accel_mg_to_q15(raw_accel_mg[0]),
            accel_mg_to_q15(raw_accel_mg[1]),
            accel_mg_to_q15(raw_accel_mg[2]),
        ];
        let mag_sq = sum_sq_q30(accel);
        let low = (ACCEL_GATE_LOW_Q15 as u64) * (ACCEL_GATE_LOW_Q15 as u64);
        let high = (ACCEL_GATE_HIGH_Q15 as u64) * (ACCEL_GATE_HIGH_Q15 as u64);
        if mag_sq >= low && mag_sq <= high {
            // 4. low-pass accel.
            for i in 0..3 {
                let err = accel[i] as i32 - self.accel_lp[i] as i32;
                self.accel_lp[i] = clamp_i32(self.accel_lp[i] as i32 + fixed::mul(err as i16, self.k_acc) as i32);
            }

            // 5. gravity correction.
            let predicted = predict_gravity(self.quat);
            let e = cross(self.accel_lp, predicted);
            let corr = quat_mul(self.quat, [0, e[0], e[1], e[2]]);
            let mut corrected = self.quat;
            for i in 0..4 {
                corrected[i] = clamp_i32(
                    corrected[i] as i32 + fixed::mul(corr[i], self.k_acc) as i32,
                );
            }
            match fixed::renormalize_quat(corrected) {
                Some(q) => self.quat = q,
                None => {
                    self.quat = [ONE, 0, 0, 0];
                    self.flags.insert(FusionFlags::DEGENERATE);
                }
            }
        }

        // 6. rest detection with hysteresis.
        let omega_sq = sum_sq_q30(omega);
        if self.is_resting() {
            if omega_sq > REST_LEAVE_SQ_Q30 {
                self.flags.remove(FusionFlags::RESTING);
                self.rest_count = 0;
            }
        } else if omega_sq < REST_ENTER_SQ_Q30 {
            self.rest_count = self.rest_count.saturating_add(1);
            if self.rest_count >= REST_SAMPLES_TO_ENTER {
                self.flags.insert(FusionFlags::RESTING);
            }
        } else {
            self.rest_count = 0;
        }

        // 7. bias update only while resting.
        if self.is_resting() {
            for i in 0..3 {
                let scaled = clamp_i32(((raw_gyro[i] as i32) * GYRO_RAW_TO_Q15) >> 15);
                let err = scaled as i32 - self.gyro_bias[i] as i32;
                self.gyro_bias[i] =
                    clamp_i32(self.gyro_bias[i] as i32 + fixed::mul(err as i16, self.k_bias) as i32);
            }
        }
    }
}

/// Floating-point reference implementation, used only to
/// cross-check the fixed-point filter's steady-state behavior in
/// tests. Must never appear on the device hot path.
#[cfg(test)]
pub mod reference {
    #[derive(Debug, Clone, Copy)]
    pub struct RefState {
        pub quat: [f64; 4],
        pub gyro_bias: [f64; 3],
    }

    impl Default for RefState {
        fn default() -> Self {
            Self {
                quat: [1.0, 0.0, 0.0, 0.0],
                gyro_bias: [0.0; 3],
            }
        }
    }

    fn quat_mul(a: [f64; 4], b: [f64; 4]) -> [f64; 4] {
        [
            a[0] * b[0] - a[1] * b[1] - a[2] * b[2] - a[3] * b[3],
            a[0] * b[1] + a[1] * b[0] + a[2] * b[3] - a[3] * b[2],
            a[0] * b[2] - a[1] * b[3] + a[2] * b[0] + a[3] * b[1],
            a[0] * b[3] + a[1] * b[2] - a[2] * b[1] + a[3] * b[0],
        ]
    }

    impl RefState {
        /// Integrates stationary gyro bias learning with a plain
        /// exponential moving average, for comparison against the
        /// fixed-point filter's bias convergence.
        pub fn step_rest(&mut self, gyro_rad_s: [f64; 3], dt: f64, k_bias: f64) {
            for i in 0..3 {
                self.gyro_bias[i] += k_bias * (gyro_rad_s[i] - self.gyro_bias[i]);
            }
            let omega = [
                gyro_rad_s[0] - self.gyro_bias[0],
                gyro_rad_s[1] - self.gyro_bias[1],
                gyro_rad_s[2] - self.gyro_bias[2],
            ];
            let omega_quat = [0.0, omega[0], omega[1], omega[2]];
            let q_dot = quat_mul(self.quat, omega_quat);
            for i in 0..4 {
                self.quat[i] += 0.5 * q_dot[i] * dt;
            }
            let norm = (self.quat.iter().map(|c| c * c).sum::<f64>()).sqrt();
            for c in self.quat.iter_mut() {
                *c /= norm;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn identity_step_keeps_unit_norm() {
        let mut f = FusionState::default();
        for _ in 0..500 {
            f.step([0, 0, 0], [0, 0, 1000]);
        }
        let sum_sq: i64 = f.quat.iter().map(|&c| (c as i64) * (c as i64)).sum();
        let norm = (sum_sq as f64).sqrt() / ONE as f64;
        assert!((norm - 1.0).abs() < 0.01, "norm = {norm}");
    }

    #[test]
    fn stationary_input_enters_rest_after_threshold() {
        let mut f = FusionState::default();
        for _ in 0..(REST_SAMPLES_TO_ENTER as usize + 5) {
            f.step([0, 0, 0], [0, 0, 1000]);
        }
        assert!(f.is_resting());
    }

    #[test]
    fn motion_prevents_rest_entry() {
        let mut f = FusionState::default();
        for _ in 0..300 {
            f.step([5000, 0, 0], [0, 0, 1000]);
        }
        assert!(!f.is_resting());
    }

    #[test]
    fn bias_unchanged_without_ever_resting() {
        let mut f = FusionState::default();
        for _ in 0..300 {
            // Always above the rest-enter threshold: never rests.
            f.step([2000, 0, 0], [0, 0, 1000]);
        }
        assert_eq!(f.gyro_bias, [0, 0, 0]);
    }

    #[test]
    fn bias_converges_while_resting() {
        let mut f = FusionState::new(ONE / 100, ONE / 50, DEFAULT_DT_SHIFT);
        // A small constant bias, within the "still" window.
        let biased_gyro = [20i16, -12, 4]; // ~0.0035 rad/s equivalent after scaling
        for _ in 0..4000 {
            f.step(biased_gyro, [0, 0, 1000]);
        }
        assert!(f.is_resting());
        for i in 0..3 {
            let scaled = clamp_i32(((biased_gyro[i] as i32) * GYRO_RAW_TO_Q15) >> 15);
            assert!(
                (f.gyro_bias[i] as i32 - scaled as i32).abs() <= 4,
                "axis {i}: bias {} vs target {}",
                f.gyro_bias[i],
                scaled
            );
        }
    }

    #[test]
    fn set_quat_resets_rest_count() {
        let mut f = FusionState::default();
        for _ in 0..(REST_SAMPLES_TO_ENTER as usize - 1) {
            f.step([0, 0, 0], [0, 0, 1000]);
        }
        assert!(f.rest_count > 0);
        f.set_quat([ONE, 0, 0, 0]);
        assert_eq!(f.rest_count, 0);
    }

    #[test]
    fn reset_is_idempotent() {
        let mut f = FusionState::new(123, 45, 6);
        f.step([100, 0, 0], [0, 0, 1000]);
        f.reset();
        let once = f;
        f.reset();
        assert_eq!(f, once);
    }

    #[test]
    fn high_dynamics_gate_skips_accel_correction() {
        let mut f = FusionState::default();
        let before = f.accel_lp;
        // 5g spike: outside the [0.5g, 1.5g] gate.
        f.step([0, 0, 0], [0, 0, 5000]);
        assert_eq!(f.accel_lp, before);
    }

    #[test]
    fn degenerate_quat_resets_to_identity() {
        let mut f = FusionState::default();
        f.quat = [0, 0, 0, 0];
        f.step([0, 0, 0], [0, 0, 1000]);
        assert!(f.flags.contains(FusionFlags::DEGENERATE));
        assert_eq!(f.quat, [ONE, 0, 0, 0]);
    }
}
