//! # pifs core
//!
//! The π-digit codec. Every byte value appears somewhere in the hexadecimal
//! expansion of π; instead of storing the byte we store where it appears.
//!
//! ```text
//!   user byte ──► PiEncoder ──► u16 bit offset ──► 2 bytes LE on disk
//!                                                        │
//!   user byte ◄── PiDecoder ◄── u16 bit offset ◄─────────┘
//! ```
//!
//! ## Layers
//!
//! - [`bbp`]: Bailey–Borwein–Plouffe extraction of a single hex digit of π
//! - [`encoder`]: byte → first bit offset, found by a sliding window scan
//! - [`decoder`]: the inverse lookup
//! - [`codec`]: byte/slice helpers plus the ×2 offset and size scaling
//!
//! The table is also shipped pre-baked in [`tables`], so the common path never
//! touches the BBP numerics; [`PiEncoder::derive`] reproduces it on demand.

pub mod bbp;
pub mod codec;
pub mod decoder;
pub mod encoder;
pub mod tables;

pub use bbp::pi_hex;
pub use codec::{logical_size, physical_offset, PiCodec, INDEX_WIDTH};
pub use decoder::PiDecoder;
pub use encoder::{window_at, PiEncoder};

/// Result type for pifs-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in pifs-core
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("π scan found only {found} of 256 byte values within {digits} hex digits")]
    IncompleteTable { found: usize, digits: u32 },

    #[error("index {0} is not a known π offset")]
    DecodeMiss(u16),

    #[error("self test failed: byte {byte:#04x} decoded as {decoded:?}")]
    SelfTest { byte: u8, decoded: Option<u8> },

    #[error("bytes {first:#04x} and {second:#04x} share π offset {offset}")]
    DuplicateOffset { first: u8, second: u8, offset: u16 },

    #[error("offset {offset} holds {actual:#04x} in π, not {expected:#04x}")]
    WindowMismatch { offset: u16, expected: u8, actual: u8 },
}
