/// Per-axis affine calibration with a linear temperature term, plus the
/// clipping bookkeeping around it.
#[derive(Debug, Clone)]
pub struct Calibration {
    pub intercept: [f64; 3],
    pub slope: [f64; 3],
    pub temp_coef: [f64; 3],
    /// Temperature the coefficients were estimated around, °C.
    pub mean_temp: f64,
    /// Sensor full-scale range in g; values saturate here.
    pub range: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            intercept: [0.0; 3],
            slope: [1.0; 3],
            temp_coef: [0.0; 3],
            mean_temp: 0.0,
            range: 8.0,
        }
    }
}

/// Clipped-sample counts for the current epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClipCounts {
    /// Samples at or beyond full scale before calibration.
    pub before: u32,
    /// Samples pushed past full scale by calibration alone.
    pub after: u32,
}

impl Calibration {
    /// Calibrate one sample (g units) and saturate it back into range.
    ///
    /// A sample already at full scale counts once in `before`; one that
    /// only crosses full scale after calibration counts once in `after`.
    /// Saturation keeps the calibrated sign: a pre-clipped axis pinned at
    /// +range that calibration pulls negative lands on -range.
    pub fn apply(&self, raw: [f64; 3], mc_temp: f64, clips: &mut ClipCounts) -> [f64; 3] {
        let range = self.range;
        let clipped_before = raw.iter().any(|a| *a <= -range || *a >= range);
        if clipped_before {
            clips.before += 1;
        }

        let mut out = [0.0f64; 3];
        for i in 0..3 {
            out[i] = self.intercept[i] + raw[i] * self.slope[i] + mc_temp * self.temp_coef[i];
        }

        // crossing of the limit, so strict comparison here
        if out.iter().any(|a| *a < -range || *a > range) && !clipped_before {
            clips.after += 1;
        }
        for a in out.iter_mut() {
            if *a < -range || (clipped_before && *a < 0.0) {
                *a = -range;
            } else if *a > range || (clipped_before && *a > 0.0) {
                *a = range;
            }
        }
        out
    }
}
