use chrono::{Duration, NaiveDateTime, Timelike};

use crate::calibrate::{Calibration, ClipCounts};
use crate::lowpass::LowpassFilter;
use crate::stats;
use crate::{EpochsResult, ProcessConfig, LOW_PASS_CUT_HZ, NOMINAL_SAMPLE_RATE_HZ};

/// Raw axis counts per g; the devices store 1 g as 256 counts.
const COUNTS_PER_G: f64 = 256.0;

/// Flat-signal magnitude beyond which an axis is considered stuck.
const STUCK_LIMIT_G: f64 = 1.5;

/// Largest distance between the planned logging start and the first
/// sample that still lets the epoch grid clamp onto the planned start.
const START_CLAMP_LIMIT_NANOS: i64 = 15_000_000_000;

/// Where finished epoch rows go.
pub trait EpochSink {
    fn emit(&mut self, row: &EpochRow) -> EpochsResult<()>;
}

/// Collects rows in memory; handy for tests and library callers.
impl EpochSink for Vec<EpochRow> {
    fn emit(&mut self, row: &EpochRow) -> EpochsResult<()> {
        self.push(row.clone());
        Ok(())
    }
}

/// Summary of one epoch window.
#[derive(Debug, Clone)]
pub struct EpochRow {
    /// Window start, shifted onto the planned logging start when the
    /// clamp applied.
    pub time: NaiveDateTime,
    /// Truncated Euclidean-norm-minus-one activity metric, averaged over
    /// the resampled window.
    pub enmo_trunc: f64,
    pub mean: [f64; 3],
    pub range: [f64; 3],
    pub std: [f64; 3],
    pub temperature_c: f64,
    /// Length of the resampled grid.
    pub samples: usize,
    pub data_errors: u32,
    pub clips_before: u32,
    pub clips_after: u32,
    /// Buffered sample count before resampling.
    pub raw_samples: usize,
}

/// Alignment of the first epoch start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EpochAlignment {
    /// Start at the first sample.
    #[default]
    None,
    /// Truncate the first start to the whole second.
    WholeSecond,
    /// Truncate the first start to the whole minute.
    WholeMinute,
}

/// Session-level context from the file header: the planned logging start
/// and the epoch-grid alignment. One per decode, owned by the
/// aggregator, so concurrent decodes cannot clobber each other.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub session_start: Option<NaiveDateTime>,
    pub alignment: EpochAlignment,
}

impl SessionContext {
    fn align(&self, t: NaiveDateTime) -> NaiveDateTime {
        match self.alignment {
            EpochAlignment::None => t,
            EpochAlignment::WholeSecond => t.with_nanosecond(0).unwrap_or(t),
            EpochAlignment::WholeMinute => t
                .with_nanosecond(0)
                .and_then(|t| t.with_second(0))
                .unwrap_or(t),
        }
    }

    /// Offset that moves reported epoch times onto the planned logging
    /// start, when the two are close enough to be the same session.
    fn start_offset(&self, epoch_start: NaiveDateTime) -> Duration {
        if let Some(session_start) = self.session_start {
            let offset = session_start - epoch_start;
            let nanos = offset.num_nanoseconds().unwrap_or(i64::MAX);
            if nanos.abs() <= START_CLAMP_LIMIT_NANOS {
                return offset;
            }
            log::info!(
                "planned start {} too far from first sample {}, not clamping",
                session_start,
                epoch_start
            );
        }
        Duration::zero()
    }
}

/// Accumulates calibrated samples into fixed-duration windows and emits
/// one summary row per window.
///
/// Windows advance in `epoch_period` steps from the (possibly aligned)
/// first sample. A sample landing at or past the current window boundary
/// first flushes the buffered window, then, if it is still more than a
/// full window ahead, skips the empty windows wholesale without emitting
/// rows for them.
pub struct EpochAggregator {
    epoch_period: Duration,
    epoch_period_secs: i64,
    stationary_bouts: bool,
    stationary_std: f64,
    filter: Option<LowpassFilter>,
    calibration: Calibration,
    session: SessionContext,
    epoch_start: Option<NaiveDateTime>,
    start_offset: Duration,
    time_ms: Vec<i64>,
    xs: Vec<f64>,
    ys: Vec<f64>,
    zs: Vec<f64>,
    errors: u32,
    clips: ClipCounts,
    block_freq: f64,
    block_temp: f64,
}

impl EpochAggregator {
    pub fn new(cfg: &ProcessConfig, session: SessionContext) -> Self {
        let filter = if cfg.filter {
            Some(LowpassFilter::new(LOW_PASS_CUT_HZ, NOMINAL_SAMPLE_RATE_HZ))
        } else {
            None
        };
        Self {
            epoch_period: Duration::seconds(cfg.epoch_period_secs as i64),
            epoch_period_secs: cfg.epoch_period_secs as i64,
            stationary_bouts: cfg.stationary_bouts,
            stationary_std: cfg.stationary_std,
            filter,
            calibration: cfg.calibration.clone(),
            session,
            epoch_start: None,
            start_offset: Duration::zero(),
            time_ms: Vec::new(),
            xs: Vec::new(),
            ys: Vec::new(),
            zs: Vec::new(),
            errors: 0,
            clips: ClipCounts::default(),
            block_freq: NOMINAL_SAMPLE_RATE_HZ,
            block_temp: 0.0,
        }
    }

    /// Record the planned logging start from the file header. Only
    /// effective before the first sample arrives.
    pub fn set_session_start(&mut self, t: NaiveDateTime) {
        self.session.session_start = Some(t);
    }

    /// Per-block state the summaries depend on: the nominal sample rate
    /// for the resample grid and the block temperature.
    pub fn set_block_context(&mut self, sample_freq: f64, temperature_c: f64) {
        self.block_freq = sample_freq;
        self.block_temp = temperature_c;
    }

    /// Start of the window currently being filled.
    pub fn epoch_start(&self) -> Option<NaiveDateTime> {
        self.epoch_start
    }

    /// Feed one decoded sample. `sample` is `None` when the block's
    /// encoding was unrecognized; the sample then reads zero and counts
    /// as a data error.
    pub fn push_raw(
        &mut self,
        t: NaiveDateTime,
        sample: Option<[i16; 3]>,
        sink: &mut dyn EpochSink,
    ) -> EpochsResult<()> {
        let mut epoch_start = match self.epoch_start {
            Some(start) => start,
            None => {
                let start = self.session.align(t);
                self.start_offset = self.session.start_offset(start);
                self.epoch_start = Some(start);
                start
            }
        };

        let current_period = (t - epoch_start).num_seconds();
        if current_period >= self.epoch_period_secs {
            self.flush(sink)?;
            epoch_start = self.epoch_start.unwrap_or(epoch_start);
            let remaining = (t - epoch_start).num_seconds();
            if remaining >= self.epoch_period_secs {
                // recording gap: step over the sample-free windows
                let skipped = remaining / self.epoch_period_secs;
                epoch_start += Duration::seconds(skipped * self.epoch_period_secs);
                self.epoch_start = Some(epoch_start);
            }
        }

        let raw_g = match sample {
            Some(raw) => [
                raw[0] as f64 / COUNTS_PER_G,
                raw[1] as f64 / COUNTS_PER_G,
                raw[2] as f64 / COUNTS_PER_G,
            ],
            None => {
                self.errors += 1;
                [0.0; 3]
            }
        };
        let mc_temp = self.block_temp - self.calibration.mean_temp;
        let cal = self.calibration.apply(raw_g, mc_temp, &mut self.clips);

        self.time_ms.push((t - epoch_start).num_milliseconds());
        self.xs.push(cal[0]);
        self.ys.push(cal[1]);
        self.zs.push(cal[2]);
        Ok(())
    }

    /// Emit the pending window, if any samples are buffered. File
    /// processing leaves trailing partial windows unemitted; library
    /// callers that want them call this at end of input.
    pub fn finish(&mut self, sink: &mut dyn EpochSink) -> EpochsResult<()> {
        if !self.time_ms.is_empty() {
            self.flush(sink)?;
        }
        Ok(())
    }

    fn flush(&mut self, sink: &mut dyn EpochSink) -> EpochsResult<()> {
        let epoch_start = match self.epoch_start {
            Some(start) => start,
            None => return Ok(()),
        };
        if !self.time_ms.is_empty() {
            let row = self.summarize(epoch_start);
            let emit = !self.stationary_bouts
                || row.std.iter().all(|s| *s < self.stationary_std);
            if emit {
                sink.emit(&row)?;
            }
        }
        self.epoch_start = Some(epoch_start + self.epoch_period);
        self.time_ms.clear();
        self.xs.clear();
        self.ys.clear();
        self.zs.clear();
        self.errors = 0;
        self.clips = ClipCounts::default();
        Ok(())
    }

    fn summarize(&mut self, epoch_start: NaiveDateTime) -> EpochRow {
        let freq = self.block_freq;
        let grid_len = self.epoch_period_secs as usize * freq as usize;
        let t0 = self.time_ms[0] as f64;
        let step = 1000.0 / freq;
        let grid: Vec<f64> = (0..grid_len).map(|c| t0 + c as f64 * step).collect();

        let xr = stats::interp_linear(&self.time_ms, &self.xs, &grid);
        let yr = stats::interp_linear(&self.time_ms, &self.ys, &grid);
        let zr = stats::interp_linear(&self.time_ms, &self.zs, &grid);

        let mean = [stats::mean(&xr), stats::mean(&yr), stats::mean(&zr)];
        let range = [stats::range(&xr), stats::range(&yr), stats::range(&zr)];
        let std = [
            stats::std(&xr, mean[0]),
            stats::std(&yr, mean[1]),
            stats::std(&zr, mean[2]),
        ];

        // an axis that is perfectly flat far away from zero is stuck
        for i in 0..3 {
            if std[i] == 0.0 && mean[i].abs() > STUCK_LIMIT_G {
                self.errors += 1;
            }
        }

        let enmo_trunc = if self.stationary_bouts {
            0.0
        } else {
            let mut pa = Vec::with_capacity(grid_len);
            for c in 0..grid_len {
                if !xr[c].is_nan() {
                    let vm = (xr[c] * xr[c] + yr[c] * yr[c] + zr[c] * zr[c]).sqrt();
                    pa.push(vm - 1.0);
                }
            }
            if let Some(filter) = &self.filter {
                filter.filter(&mut pa);
            }
            for v in pa.iter_mut() {
                if *v < 0.0 {
                    *v = 0.0;
                }
            }
            if pa.is_empty() {
                f64::NAN
            } else {
                pa.iter().sum::<f64>() / pa.len() as f64
            }
        };

        EpochRow {
            time: epoch_start + self.start_offset,
            enmo_trunc,
            mean,
            range,
            std,
            temperature_c: self.block_temp,
            samples: grid_len,
            data_errors: self.errors,
            clips_before: self.clips.before,
            clips_after: self.clips.after,
            raw_samples: self.time_ms.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn base() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap()
    }

    fn config() -> ProcessConfig {
        ProcessConfig {
            filter: false,
            ..ProcessConfig::default()
        }
    }

    fn aggregator(cfg: &ProcessConfig) -> EpochAggregator {
        EpochAggregator::new(cfg, SessionContext::default())
    }

    fn push_at(
        agg: &mut EpochAggregator,
        rows: &mut Vec<EpochRow>,
        offset_ms: i64,
        sample: [i16; 3],
    ) {
        agg.push_raw(
            base() + Duration::milliseconds(offset_ms),
            Some(sample),
            rows,
        )
        .unwrap();
    }

    #[test]
    fn epoch_boundary_emits_one_row_per_window() {
        let cfg = config();
        let mut agg = aggregator(&cfg);
        agg.set_block_context(100.0, 20.0);
        let mut rows = Vec::new();
        for s in [0i64, 1000, 2000, 3000, 4000, 5001] {
            push_at(&mut agg, &mut rows, s, [0, 0, 256]);
        }
        assert_eq!(rows.len(), 1);
        agg.finish(&mut rows).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].time, base());
        assert_eq!(rows[1].time, base() + Duration::seconds(5));
    }

    #[test]
    fn gap_skips_empty_windows_without_rows() {
        let cfg = config();
        let mut agg = aggregator(&cfg);
        agg.set_block_context(100.0, 20.0);
        let mut rows = Vec::new();
        for s in 0i64..5 {
            push_at(&mut agg, &mut rows, s * 1000, [0, 0, 256]);
        }
        for s in 120i64..125 {
            push_at(&mut agg, &mut rows, s * 1000, [0, 0, 256]);
        }
        agg.finish(&mut rows).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].time, base());
        assert_eq!(rows[1].time, base() + Duration::seconds(120));
        assert_eq!(agg.epoch_start(), Some(base() + Duration::seconds(125)));
    }

    #[test]
    fn stationary_mode_keeps_only_quiet_epochs() {
        let cfg = ProcessConfig {
            epoch_period_secs: 10,
            stationary_bouts: true,
            filter: false,
            ..ProcessConfig::default()
        };
        let mut agg = aggregator(&cfg);
        // 1 Hz grid so the window is fully covered by the 1 Hz samples
        agg.set_block_context(1.0, 20.0);
        let mut rows = Vec::new();
        // first window wobbles between 0.9 g and 1.1 g
        for s in 0i64..10 {
            let z = if s % 2 == 0 { 230 } else { 282 };
            push_at(&mut agg, &mut rows, s * 1000, [0, 0, z]);
        }
        // second window is flat
        for s in 10i64..20 {
            push_at(&mut agg, &mut rows, s * 1000, [0, 0, 256]);
        }
        push_at(&mut agg, &mut rows, 20_000, [0, 0, 256]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].time, base() + Duration::seconds(10));
        assert!(rows[0].std.iter().all(|s| *s < cfg.stationary_std));
        assert!((rows[0].mean[2] - 1.0).abs() < 1e-9);
    }

    fn enmo_of_constant(sample: [i16; 3]) -> f64 {
        let cfg = config();
        let mut agg = aggregator(&cfg);
        agg.set_block_context(100.0, 20.0);
        let mut rows = Vec::new();
        for s in 0i64..=6 {
            push_at(&mut agg, &mut rows, s * 1000, sample);
        }
        assert_eq!(rows.len(), 1);
        rows[0].enmo_trunc
    }

    #[test]
    fn enmo_truncated_at_zero() {
        // 256 counts = 1 g: the norm minus one is exactly zero
        assert_eq!(enmo_of_constant([0, 0, 256]), 0.0);
        // 384 counts = 1.5 g
        assert!((enmo_of_constant([384, 0, 0]) - 0.5).abs() < 1e-12);
        // 128 counts = 0.5 g: negative metric truncates to zero
        assert_eq!(enmo_of_constant([128, 0, 0]), 0.0);
    }

    #[test]
    fn stuck_axis_counts_as_error() {
        let cfg = config();
        let mut agg = aggregator(&cfg);
        // 1 Hz grid so the flat signal covers the whole window
        agg.set_block_context(1.0, 20.0);
        let mut rows = Vec::new();
        // z pinned at 2 g, perfectly flat
        for s in 0i64..=6 {
            push_at(&mut agg, &mut rows, s * 1000, [0, 0, 512]);
        }
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data_errors, 1);
    }

    #[test]
    fn missing_sample_decodes_zero_and_counts() {
        let cfg = config();
        let mut agg = aggregator(&cfg);
        agg.set_block_context(100.0, 20.0);
        let mut rows = Vec::new();
        for s in 0i64..=6 {
            agg.push_raw(base() + Duration::milliseconds(s * 1000), None, &mut rows)
                .unwrap();
        }
        assert_eq!(rows.len(), 1);
        // five samples buffered in the flushed window, each an error; the
        // boundary-crossing sample's error belongs to the next window
        assert_eq!(rows[0].data_errors, 5);
        assert_eq!(rows[0].raw_samples, 5);
        assert_eq!(rows[0].mean[2], 0.0);
    }

    #[test]
    fn session_start_clamp_shifts_reported_times() {
        let cfg = config();
        let session = SessionContext {
            session_start: Some(base() - Duration::seconds(10)),
            alignment: EpochAlignment::None,
        };
        let mut agg = EpochAggregator::new(&cfg, session);
        agg.set_block_context(100.0, 20.0);
        let mut rows = Vec::new();
        for s in 0i64..=6 {
            push_at(&mut agg, &mut rows, s * 1000, [0, 0, 256]);
        }
        assert_eq!(rows[0].time, base() - Duration::seconds(10));
    }

    #[test]
    fn session_start_beyond_clamp_is_ignored() {
        let cfg = config();
        let session = SessionContext {
            session_start: Some(base() + Duration::seconds(120)),
            alignment: EpochAlignment::None,
        };
        let mut agg = EpochAggregator::new(&cfg, session);
        agg.set_block_context(100.0, 20.0);
        let mut rows = Vec::new();
        for s in 0i64..=6 {
            push_at(&mut agg, &mut rows, s * 1000, [0, 0, 256]);
        }
        assert_eq!(rows[0].time, base());
    }

    #[test]
    fn whole_minute_alignment_snaps_the_grid() {
        let cfg = config();
        let session = SessionContext {
            session_start: None,
            alignment: EpochAlignment::WholeMinute,
        };
        let mut agg = EpochAggregator::new(&cfg, session);
        agg.set_block_context(100.0, 20.0);
        let mut rows = Vec::new();
        // first sample lands at 03:04:07.5; the grid phase must come from
        // 03:04:00, so the first window starts at 03:04:05
        for s in 0i64..=6 {
            agg.push_raw(
                base() + Duration::milliseconds(2500 + s * 1000),
                Some([0, 0, 256]),
                &mut rows,
            )
            .unwrap();
        }
        agg.finish(&mut rows).unwrap();
        assert_eq!(rows[0].time, base());
    }
}
