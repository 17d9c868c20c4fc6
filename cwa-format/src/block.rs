use byteorder::{ByteOrder, LittleEndian};
use chrono::NaiveDateTime;

use cwa_time::{decode_cwa_timestamp, with_fractional};

use crate::{CwaError, CwaResult, PAYLOAD_LEN, PAYLOAD_OFFSET, SECTOR_LEN};

/// Decode one 32-bit packed sample into signed per-axis counts.
///
/// Each axis holds 10 bits (x at bit 0, y at 10, z at 20) plus a 2-bit
/// shared left-shift exponent in the top bits. The payload is placed in
/// the high 10 bits of a 16-bit slot and arithmetic-shifted right by
/// `6 - e`, which sign-extends and applies the exponent in one step.
pub fn read_packed_xyz(word: u32) -> [i16; 3] {
    let e = (word >> 30) & 0x03;
    let x = (((word << 6) & 0xffc0) as u16 as i16) >> (6 - e);
    let y = (((word >> 4) & 0xffc0) as u16 as i16) >> (6 - e);
    let z = (((word >> 14) & 0xffc0) as u16 as i16) >> (6 - e);
    [x, y, z]
}

/// Read three consecutive little-endian 16-bit signed axis values.
pub fn read_raw_xyz16(buf: &[u8]) -> [i16; 3] {
    [
        LittleEndian::read_i16(&buf[0..2]),
        LittleEndian::read_i16(&buf[2..4]),
        LittleEndian::read_i16(&buf[4..6]),
    ]
}

/// The logging-planned start time from the `MD` header sector.
pub fn logging_start_time(buf: &[u8]) -> CwaResult<NaiveDateTime> {
    if buf.len() < SECTOR_LEN {
        return Err(CwaError::TruncatedSector(buf.len()));
    }
    let word = LittleEndian::read_u32(&buf[13..17]);
    Ok(decode_cwa_timestamp(word)?)
}

/// How samples are packed in a data sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    /// 3 × 10-bit signed with a shared exponent, 4 bytes per sample.
    Packed10,
    /// 3 × 16-bit signed little-endian, 6 bytes per sample.
    Raw16,
    /// Unrecognized low nibble of `numAxesBPS`; samples decode as zero.
    Unknown(u8),
}

impl SampleEncoding {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleEncoding::Raw16 => 6,
            SampleEncoding::Packed10 | SampleEncoding::Unknown(_) => 4,
        }
    }
}

/// A parsed `AX` data sector header plus a borrow of its sample payload.
#[derive(Debug)]
pub struct DataBlock<'a> {
    /// Block timestamp including the fractional-second extension.
    pub time: NaiveDateTime,
    /// Temperature of the block, degrees Celsius.
    pub temperature_c: f64,
    /// Sample frequency in Hz, clamped to at least 1.
    pub sample_freq: f64,
    /// Index within the device FIFO stream of the sample whose time
    /// equals `time` (after undoing the firmware compatibility shim).
    pub timestamp_offset: i16,
    pub encoding: SampleEncoding,
    /// Number of samples in the payload, clamped to what fits.
    pub sample_count: usize,
    payload: &'a [u8],
}

impl<'a> DataBlock<'a> {
    /// Parse a 512-byte `AX` sector.
    pub fn parse(buf: &'a [u8]) -> CwaResult<DataBlock<'a>> {
        if buf.len() < SECTOR_LEN {
            return Err(CwaError::TruncatedSector(buf.len()));
        }

        let old_device_id = LittleEndian::read_u16(&buf[4..6]);
        let timestamp_word = LittleEndian::read_u32(&buf[14..18]);
        let raw_temp = LittleEndian::read_u16(&buf[20..22]);
        let rate_code = buf[24];
        let num_axes_bps = buf[25];
        let word26 = LittleEndian::read_i16(&buf[26..28]);
        let mut sample_count = LittleEndian::read_u16(&buf[28..30]) as usize;

        let mut fractional: u16 = 0;
        let mut timestamp_offset: i16 = 0;
        let mut sample_freq;
        if rate_code != 0 {
            timestamp_offset = word26;
            sample_freq = 3200.0 / (1u32 << (15 - (rate_code & 15))) as f64;
            if old_device_id & 0x8000 != 0 {
                // The top bit marks the device-id word as a 15-bit
                // fractional-second count (1/32768 s), re-used as a 16-bit
                // fraction (1/65536 s). Firmware folded the whole samples
                // the fraction accounts for into the timestamp offset for
                // old readers; undo that. Frequency is truncated to an
                // integer in firmware.
                fractional = (old_device_id & 0x7fff) << 1;
                let shim = (fractional as i32 * sample_freq as i32) >> 16;
                timestamp_offset = timestamp_offset.wrapping_add(shim as i16);
            }
        } else {
            // Very old files store the frequency itself at offset 26.
            sample_freq = word26 as f64;
        }

        let encoding = match num_axes_bps & 0x0f {
            0 => SampleEncoding::Packed10,
            2 => SampleEncoding::Raw16,
            other => SampleEncoding::Unknown(other),
        };

        let max_samples = PAYLOAD_LEN / encoding.bytes_per_sample();
        if sample_count > max_samples {
            sample_count = max_samples;
        }
        if sample_freq <= 0.0 {
            sample_freq = 1.0;
        }

        let time = with_fractional(decode_cwa_timestamp(timestamp_word)?, fractional);
        let temperature_c = (raw_temp as f64 * 150.0 - 20500.0) / 1000.0;

        Ok(DataBlock {
            time,
            temperature_c,
            sample_freq,
            timestamp_offset,
            encoding,
            sample_count,
            payload: &buf[PAYLOAD_OFFSET..SECTOR_LEN],
        })
    }

    /// Largest sample count the payload can hold at this encoding.
    pub fn max_samples(&self) -> usize {
        PAYLOAD_LEN / self.encoding.bytes_per_sample()
    }

    /// Decode the `i`th sample as raw signed axis counts.
    ///
    /// Returns `None` when the encoding is unrecognized; the caller
    /// decides whether that is an error or a zero sample.
    pub fn sample(&self, i: usize) -> Option<[i16; 3]> {
        debug_assert!(i < self.sample_count);
        match self.encoding {
            SampleEncoding::Packed10 => {
                let word = LittleEndian::read_u32(&self.payload[4 * i..4 * i + 4]);
                Some(read_packed_xyz(word))
            }
            SampleEncoding::Raw16 => Some(read_raw_xyz16(&self.payload[6 * i..6 * i + 6])),
            SampleEncoding::Unknown(_) => None,
        }
    }
}
