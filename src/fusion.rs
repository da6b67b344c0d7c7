//! Magnetometer/DMP heading fusion
//!
//! The DMP quaternion drifts slowly in yaw since it has no absolute heading
//! reference. The magnetometer gives an absolute but noisy heading. A
//! complementary low-pass/high-pass filter pair blends the two: the compass
//! dominates at long time scales, the gyro-integrated DMP yaw at short ones.

use log::warn;

use crate::config::Orientation;
use crate::data::MpuData;
use crate::math::filter::{HighPass, LowPass};
use crate::math::quaternion::{Quaternion, TaitBryan};

const TWO_PI: f64 = 2.0 * std::f64::consts::PI;

/// Per-session fusion state carried between interrupts
#[derive(Debug)]
pub(crate) struct FusionState {
    orientation: Orientation,
    dmp_sample_rate: u16,
    compass_time_constant: f64,
    show_warnings: bool,
    low_pass: LowPass,
    high_pass: HighPass,
    last_mag_yaw: f64,
    last_dmp_yaw: f64,
    mag_spins: i64,
    dmp_spins: i64,
    first_run: bool,
}

impl FusionState {
    pub(crate) fn new(
        orientation: Orientation,
        dmp_sample_rate: u16,
        compass_time_constant: f64,
        show_warnings: bool,
    ) -> Self {
        let dt = 1.0 / f64::from(dmp_sample_rate);
        Self {
            orientation,
            dmp_sample_rate,
            compass_time_constant,
            show_warnings,
            low_pass: LowPass::new(dt, compass_time_constant),
            high_pass: HighPass::new(dt, compass_time_constant),
            last_mag_yaw: 0.0,
            last_dmp_yaw: 0.0,
            mag_spins: 0,
            dmp_spins: 0,
            first_run: true,
        }
    }

    /// Fold the magnetometer reading into the DMP orientation and refresh
    /// the fused fields of `data`
    ///
    /// Returns false without touching the fused fields when the compass
    /// heading is indeterminate (field vector parallel to gravity).
    pub(crate) fn update(&mut self, data: &mut MpuData) -> bool {
        // tilt-only rotation so the field vector can be leveled
        let tilt_q = Quaternion::from_tait_bryan(TaitBryan {
            pitch: data.dmp_tait_bryan.pitch,
            roll: data.dmp_tait_bryan.roll,
            yaw: 0.0,
        });

        // swing the measured field into the orientation the DMP was
        // programmed with so both agree on which way is which
        let [mx, my, mz] = data.mag;
        let mag_vec = match self.orientation {
            Orientation::ZUp => [mx, my, mz],
            Orientation::ZDown => [-mx, my, -mz],
            Orientation::XUp => [mz, my, mx],
            Orientation::XDown => [-mz, my, -mx],
            Orientation::YUp => [mx, -mz, my],
            Orientation::YDown => [mx, mz, -my],
            Orientation::XForward => [my, -mx, mz],
            Orientation::XBack => [-my, mx, mz],
        };
        let mag_vec = tilt_q.rotate_vector(mag_vec);

        let new_mag_yaw = -f64::atan2(mag_vec[1], mag_vec[0]);
        if new_mag_yaw.is_nan() {
            if self.show_warnings {
                warn!("compass heading indeterminate, skipping fusion step");
            }
            return false;
        }
        data.compass_heading_raw = new_mag_yaw;
        let new_dmp_yaw = data.dmp_tait_bryan.yaw;

        // atan2 and the DMP both wrap at +-pi. Track full revolutions so the
        // filters see a continuous signal instead of 2pi discontinuities.
        if new_mag_yaw - self.last_mag_yaw < -std::f64::consts::PI {
            self.mag_spins += 1;
        } else if new_mag_yaw - self.last_mag_yaw > std::f64::consts::PI {
            self.mag_spins -= 1;
        }
        if new_dmp_yaw - self.last_dmp_yaw < -std::f64::consts::PI {
            self.dmp_spins += 1;
        } else if new_dmp_yaw - self.last_dmp_yaw > std::f64::consts::PI {
            self.dmp_spins -= 1;
        }
        self.last_mag_yaw = new_mag_yaw;
        self.last_dmp_yaw = new_dmp_yaw;

        if self.first_run {
            self.mag_spins = 0;
            self.dmp_spins = 0;
            let dt = 1.0 / f64::from(self.dmp_sample_rate);
            self.low_pass = LowPass::new(dt, self.compass_time_constant);
            self.high_pass = HighPass::new(dt, self.compass_time_constant);
            // warm start: compass owns the initial heading, the high-pass
            // branch starts contributing nothing
            self.low_pass.prefill_inputs(new_mag_yaw);
            self.low_pass.prefill_outputs(new_mag_yaw);
            self.high_pass.prefill_inputs(new_dmp_yaw);
            self.high_pass.prefill_outputs(0.0);
            self.first_run = false;
        }

        let mut new_yaw = self
            .low_pass
            .march(new_mag_yaw + TWO_PI * self.mag_spins as f64)
            + self
                .high_pass
                .march(new_dmp_yaw + TWO_PI * self.dmp_spins as f64);

        // remove whole revolutions and bound to +-pi
        new_yaw %= TWO_PI;
        if new_yaw > std::f64::consts::PI {
            new_yaw -= TWO_PI;
        } else if new_yaw < -std::f64::consts::PI {
            new_yaw += TWO_PI;
        }

        data.compass_heading = new_yaw;
        data.fused_tait_bryan = TaitBryan {
            pitch: data.dmp_tait_bryan.pitch,
            roll: data.dmp_tait_bryan.roll,
            yaw: new_yaw,
        };
        data.fused_quat = Quaternion::from_tait_bryan(data.fused_tait_bryan);
        true
    }
}
