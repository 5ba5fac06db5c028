//! Block interleaving of per-channel byte streams.
//!
//! ```text
//! | ch0 blk0 | ch1 blk0 | ch0 blk1 | ch1 blk1 | ... | ch0 last | ch1 last |
//! ```
//!
//! Every block holds `block_size` bytes except those of the final round,
//! which hold `last_block_size` bytes. The last round carries the remainder
//! of each channel followed by zero padding.

use crate::{
    error::{Error, Result},
    math::DivideByRoundUp,
};

/// Block geometry for channels of `channel_length` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterleaveLayout {
    pub block_size: usize,
    pub last_block_size: usize,
    pub block_count: usize,
    /// Bytes of real channel data in each last block.
    pub last_block_content: usize,
}

impl InterleaveLayout {
    pub fn new(channel_length: usize, block_size: usize, last_block_size: usize) -> Result<Self> {
        if channel_length == 0 {
            return Ok(Self {
                block_size,
                last_block_size: 0,
                block_count: 0,
                last_block_content: 0,
            });
        }

        if block_size == 0 {
            return Err(Error::out_of_range("block_size", block_size, "must be positive"));
        }

        let block_count = channel_length.divide_by_round_up(block_size);
        let last_block_content = channel_length - (block_count - 1) * block_size;

        if last_block_size < last_block_content {
            return Err(Error::out_of_range(
                "last_block_size",
                last_block_size,
                "smaller than the data left for the final block",
            ));
        }

        Ok(Self { block_size, last_block_size, block_count, last_block_content })
    }

    /// Bytes one channel occupies in the interleaved stream.
    pub fn padded_channel_length(&self) -> usize {
        match self.block_count {
            0 => 0,
            n => (n - 1) * self.block_size + self.last_block_size,
        }
    }

    pub fn total_length(&self, channel_count: usize) -> usize {
        self.padded_channel_length() * channel_count
    }
}

pub fn interleave<T: AsRef<[u8]>>(
    channels: &[T],
    block_size: usize,
    last_block_size: usize,
) -> Result<Vec<u8>> {
    let channel_length = channels.first().map_or(0, |c| c.as_ref().len());
    if let Some(other) = channels.iter().find(|c| c.as_ref().len() != channel_length) {
        return Err(Error::DimensionMismatch(format!(
            "cannot interleave channels of {} and {} bytes",
            channel_length,
            other.as_ref().len()
        )));
    }

    let layout = InterleaveLayout::new(channel_length, block_size, last_block_size)?;
    let mut output = vec![0u8; layout.total_length(channels.len())];
    let round_size = block_size * channels.len();

    for block in 0..layout.block_count {
        let is_last = block == layout.block_count - 1;
        let (content, stride) = if is_last {
            (layout.last_block_content, layout.last_block_size)
        } else {
            (block_size, block_size)
        };

        let src = block * block_size;
        for (c, channel) in channels.iter().enumerate() {
            let dst = block * round_size + c * stride;
            output[dst..dst + content].copy_from_slice(&channel.as_ref()[src..src + content]);
        }
    }

    Ok(output)
}

/// Inverse of [`interleave`]. `data` must be exactly the interleaved length
/// for `channel_count` channels of `channel_length` bytes.
pub fn deinterleave(
    data: &[u8],
    block_size: usize,
    last_block_size: usize,
    channel_count: usize,
    channel_length: usize,
) -> Result<Vec<Vec<u8>>> {
    let layout = InterleaveLayout::new(channel_length, block_size, last_block_size)?;
    let expected = layout.total_length(channel_count);
    if data.len() != expected {
        return Err(Error::InterleaveLength { expected, actual: data.len() });
    }

    let mut channels = vec![Vec::with_capacity(channel_length); channel_count];
    let round_size = block_size * channel_count;

    for block in 0..layout.block_count {
        let is_last = block == layout.block_count - 1;
        let (content, stride) = if is_last {
            (layout.last_block_content, layout.last_block_size)
        } else {
            (block_size, block_size)
        };

        for (c, channel) in channels.iter_mut().enumerate() {
            let src = block * round_size + c * stride;
            channel.extend_from_slice(&data[src..src + content]);
        }
    }

    Ok(channels)
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    fn channel(length: usize, tag: u8) -> Vec<u8> {
        (0..length).map(|i| tag.wrapping_add(i as u8)).collect()
    }

    #[test]
    fn test_two_channel_layout() {
        let channels = vec![vec![1u8, 2, 3, 4, 5], vec![11u8, 12, 13, 14, 15]];
        let interleaved = interleave(&channels, 2, 4).unwrap();
        assert_eq!(
            interleaved,
            vec![1, 2, 11, 12, 3, 4, 13, 14, 5, 0, 0, 0, 15, 0, 0, 0]
        );
        assert_eq!(deinterleave(&interleaved, 2, 4, 2, 5).unwrap(), channels);
    }

    #[test]
    fn test_exact_multiple_uses_full_last_block() {
        let channels = vec![channel(16, 0), channel(16, 100)];
        let interleaved = interleave(&channels, 8, 8).unwrap();
        assert_eq!(interleaved.len(), 32);
        assert_eq!(&interleaved[8..16], &channels[1][..8]);
    }

    #[test]
    fn test_rejects_wrong_length() {
        let channels = vec![channel(10, 0), channel(10, 50)];
        let mut interleaved = interleave(&channels, 4, 4).unwrap();
        interleaved.push(0);
        assert_eq!(
            deinterleave(&interleaved, 4, 4, 2, 10),
            Err(Error::InterleaveLength { expected: 24, actual: 25 })
        );
    }

    #[test]
    fn test_rejects_short_last_block() {
        let channels = vec![channel(10, 0)];
        assert!(matches!(
            interleave(&channels, 4, 1),
            Err(Error::ConfigurationOutOfRange { name: "last_block_size", .. })
        ));
    }

    #[test]
    fn test_rejects_uneven_channels() {
        let channels = vec![channel(10, 0), channel(9, 0)];
        assert!(matches!(interleave(&channels, 4, 4), Err(Error::DimensionMismatch(_))));
    }

    #[test]
    fn test_empty_channels() {
        let channels = vec![Vec::<u8>::new(), Vec::new()];
        assert!(interleave(&channels, 0, 0).unwrap().is_empty());
        assert_eq!(deinterleave(&[], 0, 0, 2, 0).unwrap(), channels);
    }

    proptest! {
        #[test]
        fn prop_deinterleave_inverts_interleave(
            channel_count in 1usize..6,
            frames in 0usize..64,
            frames_per_block in 1usize..9,
            padding in 0usize..3,
        ) {
            // Channels hold whole 8-byte frames, blocks hold whole frames,
            // and the last block is padded to a 0x20 boundary plus extra.
            let length = frames * 8;
            let block_size = frames_per_block * 8;
            let channels: Vec<Vec<u8>> =
                (0..channel_count).map(|c| channel(length, c as u8 * 37)).collect();
            let last_content = match length {
                0 => 0,
                _ => length - (length.div_ceil(block_size) - 1) * block_size,
            };
            let last_block_size = last_content.next_multiple_of(0x20) + padding * 0x20;

            let interleaved = interleave(&channels, block_size, last_block_size).unwrap();
            let restored =
                deinterleave(&interleaved, block_size, last_block_size, channel_count, length)
                    .unwrap();
            prop_assert_eq!(restored, channels);
        }
    }
}
