//! Byte → π offset table
//!
//! The π hex stream is scanned through a 16-bit register holding four
//! consecutive digits, lowest position in the lowest nibble:
//!
//! ```text
//!   R(p) = d[p+3] << 12 | d[p+2] << 8 | d[p+1] << 4 | d[p]
//! ```
//!
//! Offset `o` names the byte `(R(o >> 3) >> (o & 7)) & 0xFF`. The scan steps
//! `p` by two digits and tries the eight shifts at each step, keeping the
//! first offset where each byte value turns up.

use tracing::{debug, warn};

use crate::bbp::pi_hex;
use crate::tables::BYTE_TO_OFFSET;
use crate::{Error, Result};

/// Base digit positions the scan may visit; `8 · p + 7` must fit a `u16`.
pub const SCAN_LIMIT: u16 = 8192;

/// The byte at π bit offset `offset`, computed through BBP.
pub fn window_at(offset: u16) -> u8 {
    let p = offset >> 3;
    let shift = offset & 7;
    let register = (0..4u16).fold(0u16, |acc, i| {
        acc | u16::from(pi_hex(p + i)) << (4 * i)
    });
    (register >> shift) as u8
}

/// Byte → offset lookup, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PiEncoder {
    byte_to_offset: [u16; 256],
}

impl PiEncoder {
    /// The table shipped in [`crate::tables`].
    pub fn precomputed() -> Self {
        Self {
            byte_to_offset: BYTE_TO_OFFSET,
        }
    }

    /// Rebuild the table from scratch by scanning π.
    pub fn derive() -> Result<Self> {
        Self::scan(SCAN_LIMIT, pi_hex)
    }

    /// Scan base positions `0, 2, 4, …` below `limit`, reading digits from
    /// `digit`. Each digit is requested once.
    fn scan(limit: u16, mut digit: impl FnMut(u16) -> u8) -> Result<Self> {
        let mut byte_to_offset = [0u16; 256];
        let mut seen = [false; 256];
        let mut found = 0usize;

        let mut bits = u16::from(digit(1)) << 12 | u16::from(digit(0)) << 8;
        let mut p = 0u16;

        while p < limit.min(SCAN_LIMIT) {
            bits = u16::from(digit(p + 3)) << 12 | u16::from(digit(p + 2)) << 8 | bits >> 8;

            for shift in 0..8u16 {
                let byte = (bits >> shift) as u8;
                if !seen[byte as usize] {
                    seen[byte as usize] = true;
                    byte_to_offset[byte as usize] = 8 * p + shift;
                    found += 1;
                    if found == 256 {
                        debug!(digits = p + 4, "π scan complete");
                        return Ok(Self { byte_to_offset });
                    }
                }
            }
            p += 2;
        }

        warn!(found, limit, "π scan ran out of digits");
        Err(Error::IncompleteTable {
            found,
            digits: u32::from(limit) + 2,
        })
    }

    /// Wrap an existing table without checking it. [`crate::PiCodec::new`]
    /// runs the checks.
    pub fn from_table(byte_to_offset: [u16; 256]) -> Self {
        Self { byte_to_offset }
    }

    /// Offset for `byte`.
    #[inline]
    pub fn encode(&self, byte: u8) -> u16 {
        self.byte_to_offset[byte as usize]
    }

    pub fn table(&self) -> &[u16; 256] {
        &self.byte_to_offset
    }

    /// Confirm every entry against the BBP extractor.
    pub fn verify_windows(&self) -> Result<()> {
        for (byte, &offset) in self.byte_to_offset.iter().enumerate() {
            let actual = window_at(offset);
            if actual as usize != byte {
                return Err(Error::WindowMismatch {
                    offset,
                    expected: byte as u8,
                    actual,
                });
            }
        }
        Ok(())
    }
}

impl Default for PiEncoder {
    fn default() -> Self {
        Self::precomputed()
    }
}
