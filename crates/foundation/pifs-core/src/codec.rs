//! Content codec used by the filesystem
//!
//! A logical byte becomes one little-endian `u16` on disk, so logical
//! offsets and sizes scale by [`INDEX_WIDTH`].

use std::collections::HashMap;

use tracing::debug;

use crate::decoder::PiDecoder;
use crate::encoder::PiEncoder;
use crate::{Error, Result};

/// Bytes of backing storage per logical byte.
pub const INDEX_WIDTH: u64 = 2;

/// Backing offset for logical offset `offset`.
#[inline]
pub fn physical_offset(offset: u64) -> u64 {
    offset * INDEX_WIDTH
}

/// Logical size of a backing file of `size` bytes. A trailing half index is
/// not counted.
#[inline]
pub fn logical_size(size: u64) -> u64 {
    size / INDEX_WIDTH
}

/// Encoder and decoder pair, checked against each other on construction.
#[derive(Debug, Clone)]
pub struct PiCodec {
    encoder: PiEncoder,
    decoder: PiDecoder,
}

impl PiCodec {
    /// Build from an encoder table, refusing tables that do not round-trip.
    pub fn new(encoder: PiEncoder) -> Result<Self> {
        let decoder = PiDecoder::new(&encoder);
        let codec = Self { encoder, decoder };
        codec.self_test()?;
        debug!("π codec ready");
        Ok(codec)
    }

    /// Codec over the shipped table.
    pub fn precomputed() -> Result<Self> {
        Self::new(PiEncoder::precomputed())
    }

    /// Codec over a table freshly derived from BBP.
    pub fn derive() -> Result<Self> {
        Self::new(PiEncoder::derive()?)
    }

    pub fn encoder(&self) -> &PiEncoder {
        &self.encoder
    }

    /// Power-on check: offsets are distinct and every byte survives a round trip.
    pub fn self_test(&self) -> Result<()> {
        let mut by_offset = HashMap::with_capacity(256);
        for byte in 0..=255u8 {
            let offset = self.encoder.encode(byte);
            if let Some(first) = by_offset.insert(offset, byte) {
                return Err(Error::DuplicateOffset {
                    first,
                    second: byte,
                    offset,
                });
            }
        }
        for byte in 0..=255u8 {
            let decoded = self.decoder.decode(self.encoder.encode(byte)).ok();
            if decoded != Some(byte) {
                return Err(Error::SelfTest { byte, decoded });
            }
        }
        Ok(())
    }

    #[inline]
    pub fn encode_byte(&self, byte: u8) -> u16 {
        self.encoder.encode(byte)
    }

    #[inline]
    pub fn decode_index(&self, index: u16) -> Result<u8> {
        self.decoder.decode(index)
    }

    /// Append the backing representation of `data` to `out`.
    pub fn encode_into(&self, data: &[u8], out: &mut Vec<u8>) {
        out.reserve(data.len() * INDEX_WIDTH as usize);
        for &byte in data {
            out.extend_from_slice(&self.encode_byte(byte).to_le_bytes());
        }
    }

    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(data, &mut out);
        out
    }

    /// Append the bytes behind the indices in `raw` to `out`. A dangling odd
    /// byte at the end is ignored.
    pub fn decode_into(&self, raw: &[u8], out: &mut Vec<u8>) -> Result<()> {
        out.reserve(raw.len() / INDEX_WIDTH as usize);
        for pair in raw.chunks_exact(INDEX_WIDTH as usize) {
            let index = u16::from_le_bytes([pair[0], pair[1]]);
            out.push(self.decode_index(index)?);
        }
        Ok(())
    }

    pub fn decode(&self, raw: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.decode_into(raw, &mut out)?;
        Ok(out)
    }
}
