//! Audio formats sharing one conversion surface.
//!
//! Every format can decode itself to 16-bit PCM and be built from it, so any
//! format converts to any other through [`AudioFormat::convert`].

use crate::error::{Error, Result};

/// Dimensions and loop points shared by every format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioInfo {
    pub sample_rate: u32,
    pub sample_count: usize,
    pub looping: bool,
    pub loop_start: usize,
    pub loop_end: usize,
}

impl AudioInfo {
    pub fn new(sample_rate: u32, sample_count: usize) -> Self {
        Self { sample_rate, sample_count, ..Default::default() }
    }

    /// Sets loop points. Loop fields are ignored and zeroed when not looping.
    pub fn with_loop(self, looping: bool, loop_start: usize, loop_end: usize) -> Result<Self> {
        if !looping {
            return Ok(Self { looping, loop_start: 0, loop_end: 0, ..self });
        }

        if loop_start >= loop_end || loop_end > self.sample_count {
            return Err(Error::DimensionMismatch(format!(
                "loop {}..{} does not fit in {} samples",
                loop_start, loop_end, self.sample_count
            )));
        }

        Ok(Self { looping, loop_start, loop_end, ..self })
    }

    pub(crate) fn check_compatible(&self, other: &AudioInfo) -> Result<()> {
        if self.sample_count != other.sample_count {
            return Err(Error::DimensionMismatch(format!(
                "sample counts differ: {} and {}",
                self.sample_count, other.sample_count
            )));
        }
        if self.sample_rate != other.sample_rate {
            return Err(Error::DimensionMismatch(format!(
                "sample rates differ: {} and {}",
                self.sample_rate, other.sample_rate
            )));
        }
        Ok(())
    }
}

pub(crate) fn check_channel_indices(indices: &[usize], channel_count: usize) -> Result<()> {
    match indices.iter().find(|&&i| i >= channel_count) {
        Some(i) => Err(Error::DimensionMismatch(format!(
            "channel {} does not exist, stream has {} channels",
            i, channel_count
        ))),
        None => Ok(()),
    }
}

pub trait AudioFormat: Sized {
    fn info(&self) -> &AudioInfo;

    fn channel_count(&self) -> usize;

    fn to_pcm16(&self) -> Pcm16Format;

    fn encode_from_pcm16(pcm16: &Pcm16Format) -> Result<Self>;

    fn with_loop(&self, looping: bool, loop_start: usize, loop_end: usize) -> Result<Self>;

    /// Appends the channels of `other`. Both streams must have the same
    /// sample count and sample rate.
    fn add_channels(&self, other: &Self) -> Result<Self>;

    /// A stream holding only the listed channels, in the listed order.
    fn slice_channels(&self, indices: &[usize]) -> Result<Self>;

    fn convert<T: AudioFormat>(&self) -> Result<T> {
        T::encode_from_pcm16(&self.to_pcm16())
    }
}

/// 16-bit signed PCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pcm16Format {
    info: AudioInfo,
    channels: Vec<Vec<i16>>,
}

impl Pcm16Format {
    pub fn new(sample_rate: u32, channels: Vec<Vec<i16>>) -> Result<Self> {
        let sample_count = channels.first().map_or(0, Vec::len);
        if channels.iter().any(|c| c.len() != sample_count) {
            return Err(Error::DimensionMismatch("all channels must have the same length".into()));
        }

        Ok(Self { info: AudioInfo::new(sample_rate, sample_count), channels })
    }

    /// Channels must already have `info.sample_count` samples each.
    pub(crate) fn from_parts(info: AudioInfo, channels: Vec<Vec<i16>>) -> Self {
        Self { info, channels }
    }

    pub fn channels(&self) -> &[Vec<i16>] {
        &self.channels
    }

    pub fn into_channels(self) -> Vec<Vec<i16>> {
        self.channels
    }
}

impl AudioFormat for Pcm16Format {
    fn info(&self) -> &AudioInfo {
        &self.info
    }

    fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn to_pcm16(&self) -> Pcm16Format {
        self.clone()
    }

    fn encode_from_pcm16(pcm16: &Pcm16Format) -> Result<Self> {
        Ok(pcm16.clone())
    }

    fn with_loop(&self, looping: bool, loop_start: usize, loop_end: usize) -> Result<Self> {
        let info = self.info.with_loop(looping, loop_start, loop_end)?;
        Ok(Self { info, channels: self.channels.clone() })
    }

    fn add_channels(&self, other: &Self) -> Result<Self> {
        self.info.check_compatible(&other.info)?;
        let channels = self.channels.iter().chain(&other.channels).cloned().collect();
        Ok(Self { info: self.info, channels })
    }

    fn slice_channels(&self, indices: &[usize]) -> Result<Self> {
        check_channel_indices(indices, self.channels.len())?;
        let channels = indices.iter().map(|&i| self.channels[i].clone()).collect();
        Ok(Self { info: self.info, channels })
    }
}

/// 8-bit unsigned PCM, biased by 0x80.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pcm8Format {
    info: AudioInfo,
    channels: Vec<Vec<u8>>,
}

impl Pcm8Format {
    pub fn new(sample_rate: u32, channels: Vec<Vec<u8>>) -> Result<Self> {
        let sample_count = channels.first().map_or(0, Vec::len);
        if channels.iter().any(|c| c.len() != sample_count) {
            return Err(Error::DimensionMismatch("all channels must have the same length".into()));
        }

        Ok(Self { info: AudioInfo::new(sample_rate, sample_count), channels })
    }

    pub fn channels(&self) -> &[Vec<u8>] {
        &self.channels
    }
}

fn pcm8_to_pcm16(sample: u8) -> i16 {
    ((sample as i16) - 0x80) << 8
}

fn pcm16_to_pcm8(sample: i16) -> u8 {
    ((sample as i32 + 0x8000) >> 8) as u8
}

impl AudioFormat for Pcm8Format {
    fn info(&self) -> &AudioInfo {
        &self.info
    }

    fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn to_pcm16(&self) -> Pcm16Format {
        let channels =
            self.channels.iter().map(|c| c.iter().copied().map(pcm8_to_pcm16).collect()).collect();
        Pcm16Format { info: self.info, channels }
    }

    fn encode_from_pcm16(pcm16: &Pcm16Format) -> Result<Self> {
        let channels =
            pcm16.channels.iter().map(|c| c.iter().copied().map(pcm16_to_pcm8).collect()).collect();
        Ok(Self { info: pcm16.info, channels })
    }

    fn with_loop(&self, looping: bool, loop_start: usize, loop_end: usize) -> Result<Self> {
        let info = self.info.with_loop(looping, loop_start, loop_end)?;
        Ok(Self { info, channels: self.channels.clone() })
    }

    fn add_channels(&self, other: &Self) -> Result<Self> {
        self.info.check_compatible(&other.info)?;
        let channels = self.channels.iter().chain(&other.channels).cloned().collect();
        Ok(Self { info: self.info, channels })
    }

    fn slice_channels(&self, indices: &[usize]) -> Result<Self> {
        check_channel_indices(indices, self.channels.len())?;
        let channels = indices.iter().map(|&i| self.channels[i].clone()).collect();
        Ok(Self { info: self.info, channels })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_loop_validation() {
        let info = AudioInfo::new(48000, 100);
        assert!(info.with_loop(true, 10, 100).is_ok());
        assert!(info.with_loop(true, 10, 101).is_err());
        assert!(info.with_loop(true, 50, 50).is_err());

        let not_looping = info.with_loop(false, 90, 10).unwrap();
        assert_eq!((not_looping.loop_start, not_looping.loop_end), (0, 0));
    }

    #[test]
    fn test_pcm16_rejects_ragged_channels() {
        assert!(Pcm16Format::new(48000, vec![vec![0; 10], vec![0; 9]]).is_err());
    }

    #[test]
    fn test_pcm8_conversion() {
        let samples = vec![i16::MIN, -256, 0, 255, 256, i16::MAX];
        let pcm16 = Pcm16Format::new(22050, vec![samples]).unwrap();
        let pcm8: Pcm8Format = pcm16.convert().unwrap();
        assert_eq!(pcm8.channels()[0], vec![0x00, 0x7F, 0x80, 0x80, 0x81, 0xFF]);

        let back = pcm8.to_pcm16();
        assert_eq!(back.channels()[0], vec![i16::MIN, -256, 0, 0, 256, 0x7F00]);
        assert_eq!(back.info().sample_rate, 22050);
    }

    #[test]
    fn test_add_channels_requires_matching_dimensions() {
        let a = Pcm16Format::new(48000, vec![vec![1; 10]]).unwrap();
        let b = Pcm16Format::new(48000, vec![vec![2; 10], vec![3; 10]]).unwrap();
        let c = Pcm16Format::new(44100, vec![vec![2; 10]]).unwrap();
        let d = Pcm16Format::new(48000, vec![vec![2; 11]]).unwrap();

        let joined = a.add_channels(&b).unwrap();
        assert_eq!(joined.channel_count(), 3);
        assert_eq!(joined.channels()[2][0], 3);

        assert!(matches!(a.add_channels(&c), Err(Error::DimensionMismatch(_))));
        assert!(matches!(a.add_channels(&d), Err(Error::DimensionMismatch(_))));
    }

    #[test]
    fn test_slice_channels() {
        let pcm = Pcm16Format::new(48000, vec![vec![1; 4], vec![2; 4], vec![3; 4]]).unwrap();
        let sliced = pcm.slice_channels(&[2, 0]).unwrap();
        assert_eq!(sliced.channels()[0][0], 3);
        assert_eq!(sliced.channels()[1][0], 1);
        assert!(matches!(pcm.slice_channels(&[3]), Err(Error::DimensionMismatch(_))));
    }
}
