//! Sparse decoder-history index for random access.
//!
//! Entry `k` holds the history a decoder needs to start at sample
//! `k * samples_per_entry`. On disk, entries for all channels are interleaved
//! entry by entry, each channel contributing `hist1, hist2` as two 16-bit
//! values.

use bytes::{Buf, BufMut};

use crate::{
    config::SeekTableType,
    container::binary::Endianness,
    decode::GcAdpcmDecoder,
    math::{sample_count_to_byte_count, DivideByRoundUp},
};

pub const BYTES_PER_ENTRY: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeekEntry {
    pub hist_1: i16,
    pub hist_2: i16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeekTable {
    pub samples_per_entry: usize,
    pub entries: Vec<SeekEntry>,
}

impl SeekTable {
    /// Decodes the channel once, capturing history at every interval
    /// boundary. Requests for more entries than the audio covers are padded
    /// by repeating the last captured entry.
    pub fn build(
        adpcm: &[u8],
        coefficients: &[i16; 16],
        sample_count: usize,
        samples_per_entry: usize,
        entry_count: usize,
    ) -> Self {
        let mut entries = Vec::with_capacity(entry_count);
        let mut decoder = GcAdpcmDecoder::new(adpcm, coefficients);

        while entries.len() < entry_count {
            let boundary = entries.len() * samples_per_entry;
            if boundary >= sample_count.max(1) {
                break;
            }

            decoder.skip_to(boundary);
            if decoder.position() < boundary {
                break;
            }

            let (hist_1, hist_2) = decoder.history();
            entries.push(SeekEntry { hist_1, hist_2 });
        }

        let last = entries.last().copied().unwrap_or_default();
        entries.resize(entry_count, last);

        Self { samples_per_entry, entries }
    }

    /// The same table with exactly `entry_count` entries.
    pub fn resized(&self, entry_count: usize) -> Self {
        let mut entries = self.entries.clone();
        let last = entries.last().copied().unwrap_or_default();
        entries.resize(entry_count, last);
        Self { samples_per_entry: self.samples_per_entry, entries }
    }

    /// History at the entry at or before `sample`, with the sample the entry
    /// starts at.
    pub fn entry_for(&self, sample: usize) -> Option<(usize, SeekEntry)> {
        if self.samples_per_entry == 0 {
            return None;
        }
        let index = (sample / self.samples_per_entry).min(self.entries.len().checked_sub(1)?);
        Some((index * self.samples_per_entry, self.entries[index]))
    }
}

/// Entry count of a seek table for `sample_count` samples.
pub fn entry_count(
    sample_count: usize,
    samples_per_entry: usize,
    table_type: SeekTableType,
) -> usize {
    match table_type {
        SeekTableType::Standard => sample_count.divide_by_round_up(samples_per_entry),
        SeekTableType::Short => sample_count_to_byte_count(sample_count) / samples_per_entry + 1,
    }
}

pub fn tables_to_bytes(tables: &[SeekTable], endianness: Endianness) -> Vec<u8> {
    let entry_count = tables.iter().map(|t| t.entries.len()).max().unwrap_or(0);
    let mut out = Vec::with_capacity(entry_count * tables.len() * BYTES_PER_ENTRY);

    for entry in 0..entry_count {
        for table in tables {
            let SeekEntry { hist_1, hist_2 } =
                table.entries.get(entry).copied().unwrap_or_default();
            match endianness {
                Endianness::Big => {
                    out.put_i16(hist_1);
                    out.put_i16(hist_2);
                }
                Endianness::Little => {
                    out.put_i16_le(hist_1);
                    out.put_i16_le(hist_2);
                }
            }
        }
    }

    out
}

pub fn tables_from_bytes(
    mut bytes: &[u8],
    channel_count: usize,
    samples_per_entry: usize,
    endianness: Endianness,
) -> Vec<SeekTable> {
    let entry_count = match channel_count {
        0 => 0,
        n => bytes.len() / (BYTES_PER_ENTRY * n),
    };
    let table = SeekTable { samples_per_entry, entries: Vec::with_capacity(entry_count) };
    let mut tables = vec![table; channel_count];

    for _ in 0..entry_count {
        for table in tables.iter_mut() {
            let entry = match endianness {
                Endianness::Big => SeekEntry { hist_1: bytes.get_i16(), hist_2: bytes.get_i16() },
                Endianness::Little => {
                    SeekEntry { hist_1: bytes.get_i16_le(), hist_2: bytes.get_i16_le() }
                }
            };
            table.entries.push(entry);
        }
    }

    tables
}
