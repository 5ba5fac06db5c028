//! Encoding, decoding and container handling for the GameCube "DSP" 4-bit
//! ADPCM codec and the streaming formats built around it.
//!
//! The codec works on 14-sample frames. Each frame is stored as one
//! predictor/scale byte followed by seven bytes of signed nibbles:
//!
//! ```text
//! byte 0      : (predictor << 4) | scale
//! bytes 1..8  : 14 x 4-bit residuals, high nibble first
//! ```
//!
//! The [`GcAdpcmFormat`] type is the in-memory audio stream that the
//! containers in [`container`] read into and write from.

pub mod channel;
pub mod coefficients;
pub mod config;
pub mod container;
pub mod decode;
pub mod encode;
pub mod error;
pub mod format;
pub mod gc_adpcm;
pub mod interleave;
pub mod loop_context;
pub mod math;
pub mod seek_table;

pub use channel::GcAdpcmChannel;
pub use coefficients::Coefficients;
pub use config::{Configuration, ConfigurationBuilder, HeaderVariant, SeekTableType};
pub use container::{
    parse_container, read_container, write_container, ContainerKind, ParsedContainer,
};
pub use decode::{decode, decode_gc_adpcm};
pub use encode::{encode, encode_gc_adpcm, GcAdpcmEncoding};
pub use error::{Error, HeaderError, Result};
pub use format::{AudioFormat, AudioInfo, Pcm16Format, Pcm8Format};
pub use gc_adpcm::{GcAdpcmFormat, GcAdpcmFormatBuilder, GcAdpcmTrack};
pub use loop_context::LoopContext;
pub use seek_table::{SeekEntry, SeekTable};

pub const SAMPLES_PER_FRAME: usize = 14;
pub const NIBBLES_PER_FRAME: usize = 16;
pub const BYTES_PER_FRAME: usize = 8;

/// Where a codec call starts and how far it runs.
///
/// `start_sample` may point anywhere inside a frame; the decoder reads the
/// header of the frame containing it and skips to the right nibble.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodecParameters {
    pub sample_count: usize,
    pub start_sample: usize,
    pub history_1: i16,
    pub history_2: i16,
}

impl CodecParameters {
    pub fn new(sample_count: usize) -> Self {
        Self { sample_count, ..Default::default() }
    }

    pub fn with_history(mut self, history_1: i16, history_2: i16) -> Self {
        self.history_1 = history_1;
        self.history_2 = history_2;
        self
    }

    pub fn starting_at(mut self, start_sample: usize) -> Self {
        self.start_sample = start_sample;
        self
    }
}
