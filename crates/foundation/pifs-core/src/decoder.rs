//! π offset → byte lookup

use crate::encoder::PiEncoder;
use crate::{Error, Result};

/// Inverse of a [`PiEncoder`].
///
/// Dense: one slot per offset up to the largest one the encoder uses. For the
/// shipped table that is under 3000 slots.
#[derive(Debug, Clone)]
pub struct PiDecoder {
    slots: Vec<Option<u8>>,
}

impl PiDecoder {
    pub fn new(encoder: &PiEncoder) -> Self {
        let len = encoder
            .table()
            .iter()
            .copied()
            .max()
            .map_or(0, |max| usize::from(max) + 1);
        let mut slots = vec![None; len];
        for (byte, &offset) in encoder.table().iter().enumerate() {
            slots[usize::from(offset)] = Some(byte as u8);
        }
        Self { slots }
    }

    /// The byte stored as `index`, or [`Error::DecodeMiss`] if the encoder
    /// never produces it.
    #[inline]
    pub fn decode(&self, index: u16) -> Result<u8> {
        self.slots
            .get(usize::from(index))
            .copied()
            .flatten()
            .ok_or(Error::DecodeMiss(index))
    }

    /// Number of offsets with a byte behind them.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
