use chrono::{Duration, NaiveDateTime};

use cwa_time::secs_to_nanos;

/// First and last sample instants of one data block. `last` is where the
/// first sample of the next block would land, so `last - first` divided
/// by the sample count is the per-sample period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    pub first: NaiveDateTime,
    pub last: NaiveDateTime,
}

impl BlockSpan {
    pub fn nanos(&self) -> i64 {
        (self.last - self.first).num_nanoseconds().unwrap_or(0)
    }

    /// Instant of the `i`th of `count` samples, spread evenly over the
    /// span. Computed from `i` directly rather than by repeated addition
    /// so rounding error cannot accumulate.
    pub fn sample_time(&self, i: usize, count: usize) -> NaiveDateTime {
        let span = self.nanos() as f64;
        self.first + Duration::nanoseconds((i as f64 * span / count as f64) as i64)
    }
}

/// Reconstructs per-block sample times across the block stream.
///
/// Each data block names the FIFO index of the sample its timestamp
/// belongs to. Two consecutive (time, index) anchor pairs define the true
/// per-sample period without accumulating rounding error; when the pair
/// is unusable (first block, out-of-order index, gap in the recording)
/// the block's own rate gives a fallback estimate.
pub struct Timeline {
    precise_time: bool,
    anchor: Option<Anchor>,
}

struct Anchor {
    time: NaiveDateTime,
    /// FIFO index of `time` relative to the *next* block's first sample.
    index: i32,
}

impl Timeline {
    pub fn new(precise_time: bool) -> Self {
        Self {
            precise_time,
            anchor: None,
        }
    }

    pub fn precise_time(&self) -> bool {
        self.precise_time
    }

    /// Compute the span of a block and advance the anchor past it.
    pub fn resolve(
        &mut self,
        block_time: NaiveDateTime,
        timestamp_offset: i32,
        sample_count: usize,
        sample_freq: f64,
        max_samples: usize,
    ) -> BlockSpan {
        let count = sample_count as i32;

        let mut span = None;
        if self.precise_time {
            if let Some(anchor) = &self.anchor {
                let to_sample = (block_time - anchor.time)
                    .num_nanoseconds()
                    .unwrap_or(i64::MAX);
                let limit = 1e9 * 2.0 * max_samples as f64 / sample_freq;
                if timestamp_offset > anchor.index
                    && to_sample > 0
                    && to_sample as f64 <= limit
                {
                    let gap = to_sample as f64 / (timestamp_offset - anchor.index) as f64;
                    let first = anchor.time
                        + Duration::nanoseconds((-anchor.index as f64 * gap) as i64);
                    let last = anchor.time
                        + Duration::nanoseconds(((count - anchor.index) as f64 * gap) as i64);
                    if first < last {
                        span = Some(BlockSpan { first, last });
                    }
                }
            }
        }

        let span = span.unwrap_or_else(|| {
            let offset_start = -(timestamp_offset as f64) / sample_freq;
            let first = block_time + Duration::nanoseconds(secs_to_nanos(offset_start));
            let last = first + Duration::nanoseconds(secs_to_nanos(count as f64 / sample_freq));
            BlockSpan { first, last }
        });

        self.anchor = Some(Anchor {
            time: block_time,
            index: timestamp_offset - count,
        });
        span
    }
}
