use std::io::Write;

use crate::epoch::{EpochRow, EpochSink};
use crate::EpochsResult;

/// Writes epoch rows as CSV.
///
/// Numeric columns are fixed-precision with rounding toward +∞, matching
/// the established output of the epoch files downstream tools consume.
pub struct EpochWriter<W: Write> {
    wtr: csv::Writer<W>,
    time_format: String,
    stationary_bouts: bool,
    rows_written: u64,
}

impl<W: Write> EpochWriter<W> {
    pub fn new(out: W, time_format: &str, stationary_bouts: bool) -> Self {
        Self {
            wtr: csv::Writer::from_writer(out),
            time_format: time_format.to_string(),
            stationary_bouts,
            rows_written: 0,
        }
    }

    pub fn write_header(&mut self) -> EpochsResult<()> {
        let mut fields = vec!["Time", "enmoTrunc"];
        if self.stationary_bouts {
            fields.extend(["xMean", "yMean", "zMean"]);
        }
        fields.extend([
            "xRange",
            "yRange",
            "zRange",
            "xStd",
            "yStd",
            "zStd",
            "temp",
            "samples",
            "dataErrors",
            "clipsBeforeCalibr",
            "clipsAfterCalibr",
            "rawSamples",
        ]);
        self.wtr.write_record(&fields)?;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn flush(&mut self) -> EpochsResult<()> {
        self.wtr.flush()?;
        Ok(())
    }
}

/// Format with fixed decimals, rounding toward +∞.
fn format_ceil(v: f64, decimals: usize) -> String {
    if v.is_nan() {
        return "NaN".to_string();
    }
    let scale = 10f64.powi(decimals as i32);
    format!("{:.*}", decimals, (v * scale).ceil() / scale)
}

impl<W: Write> EpochSink for EpochWriter<W> {
    fn emit(&mut self, row: &EpochRow) -> EpochsResult<()> {
        let mut fields: Vec<String> = Vec::with_capacity(16);
        fields.push(row.time.format(&self.time_format).to_string());
        fields.push(format_ceil(row.enmo_trunc, 6));
        if self.stationary_bouts {
            for m in row.mean {
                fields.push(format_ceil(m, 6));
            }
        }
        for r in row.range {
            fields.push(format_ceil(r, 6));
        }
        for s in row.std {
            fields.push(format_ceil(s, 6));
        }
        fields.push(format_ceil(row.temperature_c, 2));
        fields.push(row.samples.to_string());
        fields.push(row.data_errors.to_string());
        fields.push(row.clips_before.to_string());
        fields.push(row.clips_after.to_string());
        fields.push(row.raw_samples.to_string());
        self.wtr.write_record(&fields)?;
        self.rows_written += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_rounding() {
        assert_eq!(format_ceil(0.1234561, 6), "0.123457");
        assert_eq!(format_ceil(0.5, 6), "0.500000");
        assert_eq!(format_ceil(-0.1234569, 6), "-0.123456");
        assert_eq!(format_ceil(7.0, 6), "7.000000");
        assert_eq!(format_ceil(20.049, 2), "20.05");
        assert_eq!(format_ceil(f64::NAN, 6), "NaN");
    }

    #[test]
    fn header_gains_mean_columns_in_stationary_mode() {
        let mut w = EpochWriter::new(Vec::new(), "%Y-%m-%d %H:%M:%S%.3f", true);
        w.write_header().unwrap();
        w.flush().unwrap();
        let out = String::from_utf8(w.wtr.into_inner().unwrap()).unwrap();
        assert!(out.starts_with("Time,enmoTrunc,xMean,yMean,zMean,xRange"));
    }
}
