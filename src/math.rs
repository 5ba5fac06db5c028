use crate::{BYTES_PER_FRAME, NIBBLES_PER_FRAME, SAMPLES_PER_FRAME};

pub trait DivideByRoundUp {
    fn divide_by_round_up(&self, divisor: usize) -> usize;
    fn divide_by_2_round_up(&self) -> usize;
}

impl DivideByRoundUp for usize {
    fn divide_by_round_up(&self, divisor: usize) -> usize {
        self / divisor + usize::from(self % divisor != 0)
    }

    fn divide_by_2_round_up(&self) -> usize {
        (*self / 2) + (*self & 1)
    }
}

pub fn clamp_16(value: i64) -> i16 {
    value.clamp(i16::MIN as i64, i16::MAX as i64) as i16
}

pub fn clamp_4(value: i32) -> i32 {
    value.clamp(-8, 7)
}

const SIGNED_NIBBLES: [i8; 16] = [0, 1, 2, 3, 4, 5, 6, 7, -8, -7, -6, -5, -4, -3, -2, -1];

pub fn low_nibble(byte: u8) -> u8 {
    byte & 0xF
}

pub fn high_nibble(byte: u8) -> u8 {
    (byte >> 4) & 0xF
}

pub fn low_nibble_signed(byte: u8) -> i8 {
    SIGNED_NIBBLES[(byte & 0xF) as usize]
}

pub fn high_nibble_signed(byte: u8) -> i8 {
    SIGNED_NIBBLES[((byte >> 4) & 0xF) as usize]
}

pub fn combine_nibbles(high: i32, low: i32) -> u8 {
    ((high << 4) | (low & 0xF)) as u8
}

/// Bytes actually touched by `sample_count` samples: whole frames plus the
/// header and used nibbles of a trailing partial frame.
pub fn sample_count_to_byte_count(sample_count: usize) -> usize {
    sample_count_to_nibble_count(sample_count).divide_by_2_round_up()
}

/// Bytes a channel occupies in memory and on disk: every frame, including a
/// partial last one, takes the full eight bytes.
pub fn sample_count_to_frame_bytes(sample_count: usize) -> usize {
    sample_count.divide_by_round_up(SAMPLES_PER_FRAME) * BYTES_PER_FRAME
}

pub fn byte_count_to_sample_count(byte_count: usize) -> usize {
    nibble_count_to_sample_count(byte_count * 2)
}

pub fn nibble_count_to_sample_count(nibble_count: usize) -> usize {
    let frames = nibble_count / NIBBLES_PER_FRAME;
    let extra_nibbles = nibble_count % NIBBLES_PER_FRAME;
    let extra_samples = if extra_nibbles < 2 { 0 } else { extra_nibbles - 2 };

    SAMPLES_PER_FRAME * frames + extra_samples
}

pub fn sample_count_to_nibble_count(sample_count: usize) -> usize {
    let frames = sample_count / SAMPLES_PER_FRAME;
    let extra_samples = sample_count % SAMPLES_PER_FRAME;
    let extra_nibbles = if extra_samples == 0 { 0 } else { extra_samples + 2 };

    NIBBLES_PER_FRAME * frames + extra_nibbles
}

/// Nibble address of a sample, as stored in DSP-style channel headers.
pub fn sample_to_nibble(sample: usize) -> usize {
    let frames = sample / SAMPLES_PER_FRAME;
    let extra_samples = sample % SAMPLES_PER_FRAME;

    NIBBLES_PER_FRAME * frames + extra_samples + 2
}

pub fn get_next_multiple(value: usize, multiple: usize) -> usize {
    if multiple == 0 || value % multiple == 0 {
        value
    } else {
        value + multiple - value % multiple
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_round_up_division() {
        assert_eq!(0.divide_by_round_up(14), 0);
        assert_eq!(14.divide_by_round_up(14), 1);
        assert_eq!(15.divide_by_round_up(14), 2);
        assert_eq!(7.divide_by_2_round_up(), 4);
    }

    #[test]
    fn test_sample_byte_conversions() {
        assert_eq!(sample_count_to_nibble_count(14), 16);
        assert_eq!(sample_count_to_nibble_count(15), 19);
        assert_eq!(sample_count_to_byte_count(15), 10);
        assert_eq!(byte_count_to_sample_count(16), 28);
        assert_eq!(sample_count_to_frame_bytes(15), 16);
        assert_eq!(sample_count_to_frame_bytes(48000), 3429 * 8);
        assert_eq!(sample_to_nibble(0), 2);
        assert_eq!(sample_to_nibble(14), 18);
    }

    #[test]
    fn test_nibbles() {
        assert_eq!(high_nibble_signed(0x8F), -8);
        assert_eq!(low_nibble_signed(0x8F), -1);
        assert_eq!(combine_nibbles(-1, 7), 0xF7);
        assert_eq!(combine_nibbles(3, -2), 0x3E);
        assert_eq!(clamp_16(40000), i16::MAX);
        assert_eq!(clamp_4(-9), -8);
    }

    #[test]
    fn test_next_multiple() {
        assert_eq!(get_next_multiple(1000, 14), 1008);
        assert_eq!(get_next_multiple(1008, 14), 1008);
        assert_eq!(get_next_multiple(5, 0), 5);
    }
}
