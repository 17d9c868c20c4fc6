use std::io::Read;

use crate::{CwaResult, SECTOR_LEN};

/// Reads a CWA stream as a sequence of 512-byte sectors.
///
/// The sector buffer is reused across calls; a trailing partial sector
/// ends the stream.
pub struct SectorReader<R: Read> {
    rdr: R,
    buf: [u8; SECTOR_LEN],
}

impl<R: Read> SectorReader<R> {
    pub fn new(rdr: R) -> Self {
        Self {
            rdr,
            buf: [0u8; SECTOR_LEN],
        }
    }

    /// Fetch the next sector, or `None` at end of stream.
    pub fn next_sector(&mut self) -> CwaResult<Option<&[u8]>> {
        let mut filled = 0;
        while filled < SECTOR_LEN {
            let n = self.rdr.read(&mut self.buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == SECTOR_LEN {
            Ok(Some(&self.buf[..]))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn yields_whole_sectors_and_drops_partial_tail() {
        let mut data = vec![0u8; SECTOR_LEN * 2 + 100];
        data[0] = 1;
        data[SECTOR_LEN] = 2;
        let mut rdr = SectorReader::new(Cursor::new(data));
        assert_eq!(rdr.next_sector().unwrap().unwrap()[0], 1);
        assert_eq!(rdr.next_sector().unwrap().unwrap()[0], 2);
        assert!(rdr.next_sector().unwrap().is_none());
    }

    #[test]
    fn empty_stream() {
        let mut rdr = SectorReader::new(Cursor::new(Vec::<u8>::new()));
        assert!(rdr.next_sector().unwrap().is_none());
    }
}
