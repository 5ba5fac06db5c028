//! The multi-channel GC-ADPCM stream.
//!
//! A [`GcAdpcmFormat`] is immutable. Transformations go through
//! [`GcAdpcmFormatBuilder`], which starts from a copy of an existing stream
//! and produces a new one, sharing channel audio where it is unchanged.
//!
//! When a loop alignment multiple is set, the stream keeps both the channels
//! it was built from and their aligned versions. Everything outside this
//! module sees the aligned view; rebuilding always starts from the unaligned
//! channels so alignment is never applied twice.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use crate::{
    channel::GcAdpcmChannel,
    encode::encode,
    error::{Error, Result},
    format::{check_channel_indices, AudioFormat, AudioInfo, Pcm16Format},
    math::{get_next_multiple, DivideByRoundUp},
    seek_table::SeekTable,
};

/// Groups one or two channels for playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcAdpcmTrack {
    pub channel_count: usize,
    pub channel_left: usize,
    pub channel_right: usize,
    pub volume: u8,
    pub panning: u8,
}

impl Default for GcAdpcmTrack {
    fn default() -> Self {
        Self { channel_count: 1, channel_left: 0, channel_right: 0, volume: 0x7F, panning: 0x40 }
    }
}

impl GcAdpcmTrack {
    pub fn mono(channel: usize) -> Self {
        Self { channel_left: channel, ..Default::default() }
    }

    pub fn stereo(left: usize, right: usize) -> Self {
        Self { channel_count: 2, channel_left: left, channel_right: right, ..Default::default() }
    }

    fn offset(self, channels: usize) -> Self {
        Self {
            channel_left: self.channel_left + channels,
            channel_right: if self.channel_count >= 2 { self.channel_right + channels } else { 0 },
            ..self
        }
    }
}

/// Pairs channels into stereo tracks. An odd last channel gets a mono track.
pub fn default_tracks(channel_count: usize) -> Vec<GcAdpcmTrack> {
    (0..channel_count.divide_by_round_up(2))
        .map(|i| match channel_count - i * 2 {
            1 => GcAdpcmTrack::mono(i * 2),
            _ => GcAdpcmTrack::stereo(i * 2, i * 2 + 1),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcAdpcmFormat {
    info: AudioInfo,
    unaligned: AudioInfo,
    channels: Arc<[GcAdpcmChannel]>,
    unaligned_channels: Arc<[GcAdpcmChannel]>,
    tracks: Vec<GcAdpcmTrack>,
    alignment_multiple: usize,
}

impl Default for GcAdpcmFormat {
    fn default() -> Self {
        Self {
            info: AudioInfo::default(),
            unaligned: AudioInfo::default(),
            channels: Arc::from(Vec::new()),
            unaligned_channels: Arc::from(Vec::new()),
            tracks: Vec::new(),
            alignment_multiple: 1,
        }
    }
}

impl GcAdpcmFormat {
    pub fn builder(sample_rate: u32, channels: Vec<GcAdpcmChannel>) -> GcAdpcmFormatBuilder {
        GcAdpcmFormatBuilder {
            sample_rate,
            channels,
            tracks: Vec::new(),
            looping: false,
            loop_start: 0,
            loop_end: 0,
            alignment_multiple: 1,
        }
    }

    /// A builder holding this stream's unaligned channels and loop points.
    pub fn to_builder(&self) -> GcAdpcmFormatBuilder {
        GcAdpcmFormatBuilder {
            sample_rate: self.unaligned.sample_rate,
            channels: self.unaligned_channels.to_vec(),
            tracks: self.tracks.clone(),
            looping: self.unaligned.looping,
            loop_start: self.unaligned.loop_start,
            loop_end: self.unaligned.loop_end,
            alignment_multiple: self.alignment_multiple,
        }
    }

    pub fn channels(&self) -> &[GcAdpcmChannel] {
        &self.channels
    }

    pub fn unaligned_channels(&self) -> &[GcAdpcmChannel] {
        &self.unaligned_channels
    }

    pub fn tracks(&self) -> &[GcAdpcmTrack] {
        &self.tracks
    }

    pub fn alignment_multiple(&self) -> usize {
        self.alignment_multiple
    }

    /// Loop points and length before alignment.
    pub fn unaligned_info(&self) -> &AudioInfo {
        &self.unaligned
    }

    /// Samples inserted by loop alignment.
    pub fn alignment_samples(&self) -> usize {
        self.info.sample_count - self.unaligned.sample_count
    }

    pub fn with_alignment(&self, multiple: usize) -> Result<Self> {
        self.to_builder().alignment_multiple(multiple).build()
    }

    pub fn with_tracks(&self, tracks: Vec<GcAdpcmTrack>) -> Result<Self> {
        self.to_builder().tracks(tracks).build()
    }

    /// The stream cut to `sample_count` samples. Loop points past the new
    /// end are rejected.
    pub fn truncated(&self, sample_count: usize) -> Result<Self> {
        if sample_count >= self.info.sample_count {
            return Ok(self.clone());
        }

        let channels: Vec<GcAdpcmChannel> =
            self.channels.par_iter().map(|c| c.truncated(sample_count)).collect();

        GcAdpcmFormat::builder(self.info.sample_rate, channels)
            .tracks(self.tracks.clone())
            .with_loop(self.info.looping, self.info.loop_start, self.info.loop_end)
            .build()
    }

    /// One seek table per channel, built in parallel.
    pub fn seek_tables(
        &self,
        samples_per_entry: usize,
        entry_count: usize,
        recalculate: bool,
    ) -> Vec<SeekTable> {
        self.channels
            .par_iter()
            .map(|c| c.seek_table_for(samples_per_entry, entry_count, recalculate))
            .collect()
    }
}

impl AudioFormat for GcAdpcmFormat {
    fn info(&self) -> &AudioInfo {
        &self.info
    }

    fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn to_pcm16(&self) -> Pcm16Format {
        let channels = self.channels.par_iter().map(GcAdpcmChannel::pcm).collect();
        Pcm16Format::from_parts(self.info, channels)
    }

    fn encode_from_pcm16(pcm16: &Pcm16Format) -> Result<Self> {
        let info = *pcm16.info();
        debug!(
            channels = pcm16.channel_count(),
            samples = info.sample_count,
            "encoding pcm16 to gc-adpcm"
        );

        let channels = pcm16
            .channels()
            .par_iter()
            .map(|pcm| GcAdpcmChannel::from_encoding(encode(pcm), info.sample_count))
            .collect();

        GcAdpcmFormat::builder(info.sample_rate, channels)
            .with_loop(info.looping, info.loop_start, info.loop_end)
            .build()
    }

    fn with_loop(&self, looping: bool, loop_start: usize, loop_end: usize) -> Result<Self> {
        self.to_builder().with_loop(looping, loop_start, loop_end).build()
    }

    /// Appends `other`'s channels. Default track lists are regenerated for
    /// the combined channel count; custom track lists are kept and `other`'s
    /// tracks appended with shifted channel indices.
    fn add_channels(&self, other: &Self) -> Result<Self> {
        self.unaligned.check_compatible(&other.unaligned)?;

        let own_count = self.unaligned_channels.len();
        let mut builder = self.to_builder();
        builder.channels.extend(other.unaligned_channels.iter().cloned());

        builder.tracks = if self.tracks == default_tracks(own_count) {
            Vec::new()
        } else {
            let mut tracks = self.tracks.clone();
            tracks.extend(other.tracks.iter().map(|t| t.offset(own_count)));
            tracks
        };

        builder.build()
    }

    fn slice_channels(&self, indices: &[usize]) -> Result<Self> {
        check_channel_indices(indices, self.unaligned_channels.len())?;

        let mut builder = self.to_builder();
        builder.channels = indices.iter().map(|&i| self.unaligned_channels[i].clone()).collect();
        builder.tracks = Vec::new();
        builder.build()
    }
}

/// Inputs for a new [`GcAdpcmFormat`]. Loop points are given before
/// alignment.
#[derive(Debug, Clone)]
pub struct GcAdpcmFormatBuilder {
    sample_rate: u32,
    channels: Vec<GcAdpcmChannel>,
    tracks: Vec<GcAdpcmTrack>,
    looping: bool,
    loop_start: usize,
    loop_end: usize,
    alignment_multiple: usize,
}

impl GcAdpcmFormatBuilder {
    pub fn channels(mut self, channels: Vec<GcAdpcmChannel>) -> Self {
        self.channels = channels;
        self
    }

    /// An empty list means the default tracks.
    pub fn tracks(mut self, tracks: Vec<GcAdpcmTrack>) -> Self {
        self.tracks = tracks;
        self
    }

    pub fn with_loop(mut self, looping: bool, loop_start: usize, loop_end: usize) -> Self {
        self.looping = looping;
        self.loop_start = loop_start;
        self.loop_end = loop_end;
        self
    }

    pub fn alignment_multiple(mut self, multiple: usize) -> Self {
        self.alignment_multiple = multiple;
        self
    }

    pub fn build(self) -> Result<GcAdpcmFormat> {
        let sample_count = self.channels.first().map_or(0, GcAdpcmChannel::sample_count);
        if let Some(channel) = self.channels.iter().find(|c| c.sample_count() != sample_count) {
            return Err(Error::DimensionMismatch(format!(
                "channels have {} and {} samples",
                sample_count,
                channel.sample_count()
            )));
        }

        if self.alignment_multiple < 1 {
            return Err(Error::out_of_range(
                "loop_alignment_multiple",
                self.alignment_multiple,
                "must be positive",
            ));
        }

        let unaligned = AudioInfo::new(self.sample_rate, sample_count).with_loop(
            self.looping,
            self.loop_start,
            self.loop_end,
        )?;

        let tracks = if self.tracks.is_empty() {
            default_tracks(self.channels.len())
        } else {
            validate_tracks(&self.tracks, self.channels.len())?;
            self.tracks
        };

        let unaligned_channels: Arc<[GcAdpcmChannel]> = Arc::from(self.channels);

        let gap = if unaligned.looping {
            get_next_multiple(unaligned.loop_start, self.alignment_multiple) - unaligned.loop_start
        } else {
            0
        };

        let (info, channels) = if gap == 0 {
            (unaligned, unaligned_channels.clone())
        } else {
            debug!(
                loop_start = unaligned.loop_start,
                multiple = self.alignment_multiple,
                gap,
                "aligning loop"
            );

            let (loop_start, loop_end) = (unaligned.loop_start, unaligned.loop_end);
            let channels = unaligned_channels
                .par_iter()
                .map(|c| c.aligned(loop_start, loop_end, self.alignment_multiple))
                .collect::<Result<Vec<_>>>()?;

            let info = AudioInfo {
                sample_count: unaligned.sample_count + gap,
                loop_start: unaligned.loop_start + gap,
                loop_end: unaligned.loop_end + gap,
                ..unaligned
            };
            (info, Arc::from(channels))
        };

        Ok(GcAdpcmFormat {
            info,
            unaligned,
            channels,
            unaligned_channels,
            tracks,
            alignment_multiple: self.alignment_multiple,
        })
    }
}

fn validate_tracks(tracks: &[GcAdpcmTrack], channel_count: usize) -> Result<()> {
    for track in tracks {
        let channels_used = match track.channel_count {
            1 => track.channel_left,
            2 => track.channel_left.max(track.channel_right),
            n => {
                return Err(Error::DimensionMismatch(format!(
                    "tracks hold one or two channels, not {}",
                    n
                )))
            }
        };

        if channels_used >= channel_count {
            return Err(Error::DimensionMismatch(format!(
                "track uses channel {} of a {}-channel stream",
                channels_used, channel_count
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn tone(count: usize, frequency: f64, sample_rate: f64) -> Vec<i16> {
        (0..count)
            .map(|i| {
                let t = i as f64 / sample_rate;
                (8000.0 * (2.0 * std::f64::consts::PI * frequency * t).sin()) as i16
            })
            .collect()
    }

    fn stereo(count: usize) -> GcAdpcmFormat {
        let pcm = vec![tone(count, 480.0, 48000.0), tone(count, 960.0, 48000.0)];
        let pcm = Pcm16Format::new(48000, pcm).unwrap();
        GcAdpcmFormat::encode_from_pcm16(&pcm).unwrap()
    }

    #[test]
    fn test_default_tracks() {
        assert_eq!(default_tracks(0), vec![]);
        assert_eq!(default_tracks(1), vec![GcAdpcmTrack::mono(0)]);
        assert_eq!(default_tracks(2), vec![GcAdpcmTrack::stereo(0, 1)]);
        assert_eq!(
            default_tracks(5),
            vec![GcAdpcmTrack::stereo(0, 1), GcAdpcmTrack::stereo(2, 3), GcAdpcmTrack::mono(4)]
        );
        assert_eq!(default_tracks(1)[0].volume, 0x7F);
        assert_eq!(default_tracks(1)[0].panning, 0x40);
    }

    #[test]
    fn test_encode_and_decode() {
        let format = stereo(4800);
        assert_eq!(format.channel_count(), 2);
        assert_eq!(format.tracks(), &[GcAdpcmTrack::stereo(0, 1)]);
        assert_eq!(format.channels()[0].audio().len(), 4800usize.div_ceil(14) * 8);

        let pcm = format.to_pcm16();
        assert_eq!(pcm.info().sample_count, 4800);
        assert_eq!(pcm.channels()[1], format.channels()[1].pcm());
    }

    #[test]
    fn test_loop_alignment() {
        let format = stereo(6000).with_loop(true, 1000, 5000).unwrap();
        let aligned = format.with_alignment(14).unwrap();

        assert_eq!(aligned.info().loop_start, 1008);
        assert_eq!(aligned.info().loop_end, 5008);
        assert_eq!(aligned.info().sample_count, 6008);
        assert_eq!(aligned.alignment_samples(), 8);
        assert_eq!(aligned.unaligned_info().loop_start, 1000);
        assert!(aligned.channels().iter().all(|c| c.sample_count() == 6008));

        // Realigning starts from the unaligned channels.
        let realigned = aligned.with_alignment(14).unwrap();
        assert_eq!(realigned.info().sample_count, 6008);
        assert_eq!(aligned.with_alignment(1).unwrap().info().sample_count, 6000);

        // The loop context is taken at the aligned start.
        let channel = &aligned.channels()[0];
        let context = channel.loop_context(aligned.info().loop_start);
        let pcm = channel.pcm();
        assert_eq!((context.hist_1, context.hist_2), (pcm[1007], pcm[1006]));
    }

    #[test]
    fn test_alignment_on_aligned_start_is_noop() {
        let format = stereo(3000).with_loop(true, 1400, 2800).unwrap().with_alignment(14).unwrap();
        assert_eq!(format.alignment_samples(), 0);
        assert_eq!(format.channels(), format.unaligned_channels());
    }

    #[test]
    fn test_add_channels() {
        let a = stereo(2000);
        let b = stereo(2000).slice_channels(&[0]).unwrap();
        let joined = a.add_channels(&b).unwrap();
        assert_eq!(joined.channel_count(), 3);
        assert_eq!(joined.tracks(), &default_tracks(3)[..]);

        let custom = a.with_tracks(vec![GcAdpcmTrack::mono(1), GcAdpcmTrack::mono(0)]).unwrap();
        let joined = custom.add_channels(&b).unwrap();
        assert_eq!(
            joined.tracks(),
            &[GcAdpcmTrack::mono(1), GcAdpcmTrack::mono(0), GcAdpcmTrack::mono(2)]
        );

        let short = stereo(1999);
        assert!(matches!(a.add_channels(&short), Err(Error::DimensionMismatch(_))));
    }

    #[test]
    fn test_slice_channels() {
        let format = stereo(1000);
        let sliced = format.slice_channels(&[1]).unwrap();
        assert_eq!(sliced.channels()[0], format.channels()[1]);
        assert_eq!(sliced.tracks(), &[GcAdpcmTrack::mono(0)]);
        assert!(matches!(format.slice_channels(&[2]), Err(Error::DimensionMismatch(_))));
    }

    #[test]
    fn test_rejects_bad_input() {
        let format = stereo(1000);
        assert!(format.with_loop(true, 500, 1001).is_err());
        assert!(format.with_tracks(vec![GcAdpcmTrack::stereo(0, 2)]).is_err());
        assert!(format.with_alignment(0).is_err());

        let mut channels = format.channels().to_vec();
        channels.push(stereo(999).channels()[0].clone());
        assert!(GcAdpcmFormat::builder(48000, channels).build().is_err());
    }

    #[test]
    fn test_convert_to_pcm8() {
        let format = stereo(500);
        let pcm8: crate::format::Pcm8Format = format.convert().unwrap();
        assert_eq!(pcm8.channel_count(), 2);
        assert_eq!(pcm8.info().sample_count, 500);
    }

    #[test]
    fn test_truncated_keeps_loop() {
        let format = stereo(3000).with_loop(true, 100, 2000).unwrap();
        let cut = format.truncated(2000).unwrap();
        assert_eq!(cut.info().sample_count, 2000);
        assert_eq!(cut.info().loop_end, 2000);
        assert!(format.truncated(1999).is_err());
    }
}
