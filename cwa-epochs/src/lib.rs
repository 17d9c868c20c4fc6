//! Epoch summaries from AX3 `.CWA` accelerometer recordings.
//!
//! The input is streamed as 512-byte sectors; decoded samples are
//! calibrated, resampled onto the nominal rate and summarized into
//! fixed-duration epoch rows written as CSV. State is threaded through
//! explicit values (no globals), so independent decodes can run side by
//! side.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::Duration;

use cwa_format::{logging_start_time, sector_kind, DataBlock, SectorKind, SectorReader, SECTOR_LEN};
use cwa_time::secs_to_nanos;

pub type EpochsResult<M> = std::result::Result<M, EpochsError>;

#[derive(thiserror::Error, Debug)]
pub enum EpochsError {
    #[error("{0}")]
    Io(std::io::Error),

    #[error("{0}")]
    Format(cwa_format::CwaError),

    #[error("{0}")]
    Csv(csv::Error),
}

impl From<std::io::Error> for EpochsError {
    fn from(orig: std::io::Error) -> EpochsError {
        EpochsError::Io(orig)
    }
}

impl From<cwa_format::CwaError> for EpochsError {
    fn from(orig: cwa_format::CwaError) -> EpochsError {
        EpochsError::Format(orig)
    }
}

impl From<csv::Error> for EpochsError {
    fn from(orig: csv::Error) -> EpochsError {
        EpochsError::Csv(orig)
    }
}

/// Cutoff of the activity-metric low-pass filter.
pub const LOW_PASS_CUT_HZ: f64 = 20.0;

/// Sample rate the low-pass filter is designed for; also the grid rate
/// assumed when no data block has been seen yet.
pub const NOMINAL_SAMPLE_RATE_HZ: f64 = 100.0;

pub mod calibrate;
pub use crate::calibrate::{Calibration, ClipCounts};

mod epoch;
pub use crate::epoch::{EpochAggregator, EpochAlignment, EpochRow, EpochSink, SessionContext};

mod lowpass;
pub use crate::lowpass::LowpassFilter;

pub mod stats;

mod timeline;
pub use crate::timeline::{BlockSpan, Timeline};

mod writer;
pub use crate::writer::EpochWriter;

/// Everything the decode pipeline is parameterized on.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Seconds per epoch window.
    pub epoch_period_secs: u32,
    /// strftime pattern for the `Time` column.
    pub time_format: String,
    /// Low-pass the activity metric before truncation.
    pub filter: bool,
    /// Keep only stationary epochs and add the per-axis mean columns.
    pub stationary_bouts: bool,
    /// Per-axis standard-deviation threshold for a stationary epoch, g.
    pub stationary_std: f64,
    pub calibration: Calibration,
    pub alignment: EpochAlignment,
    /// Reconstruct sample times from inter-block anchors instead of the
    /// per-block rate estimate.
    pub precise_time: bool,
    /// Report percent progress while decoding.
    pub verbose: bool,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            epoch_period_secs: 5,
            time_format: "%Y-%m-%d %H:%M:%S%.3f".to_string(),
            filter: true,
            stationary_bouts: false,
            stationary_std: 0.013,
            calibration: Calibration::default(),
            alignment: EpochAlignment::None,
            precise_time: true,
            verbose: true,
        }
    }
}

/// What a finished decode looked like.
#[derive(Debug, Clone, Default)]
pub struct ProcessSummary {
    pub sectors: u64,
    pub data_blocks: u64,
    /// Data sectors dropped for a malformed header or timestamp.
    pub bad_blocks: u64,
    pub rows_written: u64,
}

/// Decode a CWA stream and write epoch rows to `output`.
///
/// `input_len` (when known) only drives progress reporting. Malformed
/// data sectors are logged and skipped without disturbing the inter-block
/// timing anchors; I/O errors abort.
pub fn process_cwa<R: Read, W: Write>(
    input: R,
    input_len: Option<u64>,
    output: W,
    cfg: &ProcessConfig,
) -> EpochsResult<ProcessSummary> {
    let mut sectors = SectorReader::new(input);
    let mut writer = EpochWriter::new(output, &cfg.time_format, cfg.stationary_bouts);
    let mut timeline = Timeline::new(cfg.precise_time);
    let session = SessionContext {
        session_start: None,
        alignment: cfg.alignment,
    };
    let mut agg = EpochAggregator::new(cfg, session);

    let total_sectors = input_len.map(|len| len / SECTOR_LEN as u64);
    let mut summary = ProcessSummary::default();

    while let Some(buf) = sectors.next_sector()? {
        summary.sectors += 1;
        match sector_kind(buf) {
            SectorKind::Header => {
                match logging_start_time(buf) {
                    Ok(t) => {
                        log::info!("session start {}", t);
                        agg.set_session_start(t);
                    }
                    Err(e) => log::warn!("no preset start time: {}", e),
                }
                writer.write_header()?;
            }
            SectorKind::Data => {
                let block = match DataBlock::parse(buf) {
                    Ok(block) => block,
                    Err(e) => {
                        log::warn!("skipping data sector {}: {}", summary.sectors - 1, e);
                        summary.bad_blocks += 1;
                        continue;
                    }
                };
                summary.data_blocks += 1;
                let span = timeline.resolve(
                    block.time,
                    block.timestamp_offset as i32,
                    block.sample_count,
                    block.sample_freq,
                    block.max_samples(),
                );
                agg.set_block_context(block.sample_freq, block.temperature_c);
                if timeline.precise_time() {
                    for i in 0..block.sample_count {
                        let t = span.sample_time(i, block.sample_count);
                        agg.push_raw(t, block.sample(i), &mut writer)?;
                    }
                } else {
                    let step = Duration::nanoseconds(secs_to_nanos(1.0 / block.sample_freq));
                    let mut t = span.first;
                    for i in 0..block.sample_count {
                        agg.push_raw(t, block.sample(i), &mut writer)?;
                        t += step;
                    }
                }
            }
            SectorKind::Other => {}
        }
        if cfg.verbose && summary.sectors % 10_000 == 0 {
            if let Some(total) = total_sectors.filter(|t| *t > 0) {
                log::info!("{}%", summary.sectors * 100 / total);
            }
        }
    }

    writer.flush()?;
    summary.rows_written = writer.rows_written();
    Ok(summary)
}

/// Decode a `.CWA` file from disk.
///
/// When `output` is `None` the epoch file lands next to the input as
/// `<stem>Epoch.csv`. Returns the output path alongside the summary.
pub fn process_cwa_path<P: AsRef<Path>>(
    input: P,
    output: Option<&Path>,
    cfg: &ProcessConfig,
) -> EpochsResult<(PathBuf, ProcessSummary)> {
    let input = input.as_ref();
    let out_path = match output {
        Some(p) => p.to_path_buf(),
        None => default_output_path(input),
    };
    let input_len = std::fs::metadata(input)?.len();
    let rdr = BufReader::new(File::open(input)?);
    let wtr = BufWriter::new(File::create(&out_path)?);
    let summary = process_cwa(rdr, Some(input_len), wtr, cfg)?;
    Ok((out_path, summary))
}

/// `foo.CWA` becomes a sibling `fooEpoch.csv`.
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("cwa");
    input.with_file_name(format!("{}Epoch.csv", stem))
}
