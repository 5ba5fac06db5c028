use bytes::Bytes;

use crate::{
    decode::{decode, GcAdpcmDecoder},
    encode::{encode_gc_adpcm, GcAdpcmEncoding},
    error::{Error, Result},
    loop_context::{LoopContext, LoopContextCache},
    math::{get_next_multiple, high_nibble, sample_count_to_frame_bytes},
    seek_table::SeekTable,
    CodecParameters, BYTES_PER_FRAME, SAMPLES_PER_FRAME,
};

/// One channel of GC-ADPCM audio.
///
/// `hist_1` and `hist_2` hold the decoder history after the last sample of
/// the channel. Decoding always starts from zero history.
#[derive(Debug, Clone)]
pub struct GcAdpcmChannel {
    audio: Bytes,
    sample_count: usize,
    pub coefficients: [i16; 16],
    pub gain: i16,
    pub hist_1: i16,
    pub hist_2: i16,
    seek_table: Option<SeekTable>,
    loop_context: LoopContextCache,
}

impl GcAdpcmChannel {
    /// Wraps encoded audio. Data past the last frame is dropped; data shorter
    /// than `sample_count` needs is rejected, as is any frame whose predictor
    /// has no coefficient pair.
    pub fn new(
        audio: impl Into<Bytes>,
        coefficients: [i16; 16],
        sample_count: usize,
    ) -> Result<Self> {
        let audio = audio.into();
        let needed = sample_count_to_frame_bytes(sample_count);
        if audio.len() < needed {
            return Err(Error::DimensionMismatch(format!(
                "{} samples need {} bytes of audio, got {}",
                sample_count,
                needed,
                audio.len()
            )));
        }

        let audio = audio.slice(..needed);
        for header in audio.chunks(BYTES_PER_FRAME).map(|frame| frame[0]) {
            let predictor = high_nibble(header);
            if predictor > 7 {
                return Err(Error::invalid_field("predictor", predictor as i64));
            }
        }

        Ok(Self {
            audio,
            sample_count,
            coefficients,
            gain: 0,
            hist_1: 0,
            hist_2: 0,
            seek_table: None,
            loop_context: LoopContextCache::new(),
        })
    }

    pub fn from_encoding(encoding: GcAdpcmEncoding, sample_count: usize) -> Self {
        let GcAdpcmEncoding { coefficients, adpcm, history_1, history_2 } = encoding;
        let audio = Bytes::from(adpcm);
        let sample_count = sample_count.min(audio.len() / BYTES_PER_FRAME * SAMPLES_PER_FRAME);

        Self {
            audio,
            sample_count,
            coefficients,
            gain: 0,
            hist_1: history_1,
            hist_2: history_2,
            seek_table: None,
            loop_context: LoopContextCache::new(),
        }
    }

    pub fn with_gain(mut self, gain: i16) -> Self {
        self.gain = gain;
        self
    }

    pub fn with_history(mut self, hist_1: i16, hist_2: i16) -> Self {
        self.hist_1 = hist_1;
        self.hist_2 = hist_2;
        self
    }

    pub fn with_seek_table(mut self, seek_table: SeekTable) -> Self {
        self.seek_table = Some(seek_table);
        self
    }

    /// Seeds the loop context cache with a stored context.
    pub fn with_loop_context(mut self, context: LoopContext) -> Self {
        self.loop_context = LoopContextCache::seeded(context);
        self
    }

    pub fn audio(&self) -> &Bytes {
        &self.audio
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn seek_table(&self) -> Option<&SeekTable> {
        self.seek_table.as_ref()
    }

    /// Header byte of the first frame.
    pub fn predictor_scale(&self) -> u8 {
        self.audio.first().copied().unwrap_or(0)
    }

    pub fn pcm(&self) -> Vec<i16> {
        decode(&self.audio, &self.coefficients, 0, 0, self.sample_count)
    }

    pub fn loop_context(&self, loop_start: usize) -> LoopContext {
        self.loop_context.get_or_resolve(loop_start, || {
            LoopContext::resolve(&self.audio, &self.coefficients, loop_start)
        })
    }

    /// The stored table adjusted to `entry_count` entries when it was built
    /// with the same interval and `recalculate` is off; otherwise a fresh
    /// table.
    pub fn seek_table_for(
        &self,
        samples_per_entry: usize,
        entry_count: usize,
        recalculate: bool,
    ) -> SeekTable {
        match &self.seek_table {
            Some(table) if !recalculate && table.samples_per_entry == samples_per_entry => {
                table.resized(entry_count)
            }
            _ => SeekTable::build(
                &self.audio,
                &self.coefficients,
                self.sample_count,
                samples_per_entry,
                entry_count,
            ),
        }
    }

    /// The first `sample_count` samples, with history recomputed for the new
    /// end. Stored seek tables and loop contexts stay valid for the kept
    /// range and are carried over.
    pub fn truncated(&self, sample_count: usize) -> Self {
        if sample_count >= self.sample_count {
            return self.clone();
        }

        let mut decoder = GcAdpcmDecoder::new(&self.audio, &self.coefficients);
        decoder.skip_to(sample_count);
        let (hist_1, hist_2) = decoder.history();

        Self {
            audio: self.audio.slice(..sample_count_to_frame_bytes(sample_count)),
            sample_count,
            hist_1,
            hist_2,
            ..self.clone()
        }
    }

    /// Moves the loop start up to the next multiple of `multiple`.
    ///
    /// The `gap` samples following the original loop end are filled with the
    /// start of the loop body, so the channel grows by `gap` samples and the
    /// loop keeps its length. Whole frames before the loop end are kept
    /// untouched; everything after is re-encoded with the same coefficients,
    /// continuing from the kept frames' history.
    pub fn aligned(&self, loop_start: usize, loop_end: usize, multiple: usize) -> Result<Self> {
        let gap = get_next_multiple(loop_start, multiple) - loop_start;
        if gap == 0 {
            return Ok(self.clone());
        }

        if loop_start >= loop_end || loop_end > self.sample_count {
            return Err(Error::DimensionMismatch(format!(
                "loop {}..{} does not fit in {} samples",
                loop_start, loop_end, self.sample_count
            )));
        }

        let pcm = self.pcm();
        let loop_length = loop_end - loop_start;

        let mut aligned = Vec::with_capacity(pcm.len() + gap);
        aligned.extend_from_slice(&pcm[..loop_end]);
        aligned.extend((0..gap).map(|i| pcm[loop_start + i % loop_length]));
        aligned.extend_from_slice(&pcm[loop_end..]);

        let kept_frames = loop_end / SAMPLES_PER_FRAME;
        let kept_samples = kept_frames * SAMPLES_PER_FRAME;
        let history_1 = kept_samples.checked_sub(1).map_or(0, |i| pcm[i]);
        let history_2 = kept_samples.checked_sub(2).map_or(0, |i| pcm[i]);

        let tail_count = aligned.len() - kept_samples;
        let tail = encode_gc_adpcm(
            &aligned[kept_samples..],
            &self.coefficients,
            &CodecParameters::new(tail_count).with_history(history_1, history_2),
        );

        let mut audio = Vec::with_capacity(sample_count_to_frame_bytes(aligned.len()));
        audio.extend_from_slice(&self.audio[..kept_frames * BYTES_PER_FRAME]);
        audio.extend_from_slice(&tail.adpcm);

        Ok(Self {
            audio: Bytes::from(audio),
            sample_count: aligned.len(),
            coefficients: self.coefficients,
            gain: self.gain,
            hist_1: tail.history_1,
            hist_2: tail.history_2,
            seek_table: None,
            loop_context: LoopContextCache::new(),
        })
    }
}

/// Seek tables and cached loop contexts are derived data and are not
/// compared.
impl PartialEq for GcAdpcmChannel {
    fn eq(&self, other: &Self) -> bool {
        self.audio == other.audio
            && self.sample_count == other.sample_count
            && self.coefficients == other.coefficients
            && self.gain == other.gain
            && self.hist_1 == other.hist_1
            && self.hist_2 == other.hist_2
    }
}

impl Eq for GcAdpcmChannel {}

#[cfg(test)]
mod test {
    use super::*;
    use crate::encode::encode;

    fn signal(count: usize) -> Vec<i16> {
        (0..count)
            .map(|i| {
                let t = i as f64 / 32000.0;
                (7000.0 * (2.0 * std::f64::consts::PI * 400.0 * t).sin()) as i16
            })
            .collect()
    }

    fn channel(count: usize) -> GcAdpcmChannel {
        GcAdpcmChannel::from_encoding(encode(&signal(count)), count)
    }

    #[test]
    fn test_new_checks_length() {
        assert!(GcAdpcmChannel::new(vec![0u8; 15], [0; 16], 28).is_err());

        let channel = GcAdpcmChannel::new(vec![0u8; 24], [0; 16], 28).unwrap();
        assert_eq!(channel.audio().len(), 16);
        assert_eq!(channel.sample_count(), 28);
    }

    #[test]
    fn test_new_rejects_predictor_without_coefficients() {
        let mut audio = channel(100).audio().to_vec();
        audio[16] = 0x83;
        assert_eq!(
            GcAdpcmChannel::new(audio.clone(), [0; 16], 100),
            Err(Error::invalid_field("predictor", 8))
        );

        // Frames past the sample count are dropped before the check.
        assert!(GcAdpcmChannel::new(audio, [0; 16], 28).is_ok());
    }

    #[test]
    fn test_loop_context_matches_resolver() {
        let channel = channel(3000);
        let expected = LoopContext::resolve(channel.audio(), &channel.coefficients, 1000);
        assert_eq!(channel.loop_context(1000), expected);
        assert_eq!(channel.clone().loop_context(1000), expected);
    }

    #[test]
    fn test_seeded_loop_context_wins() {
        let stored = LoopContext { loop_start: 700, predictor_scale: 0x33, hist_1: 9, hist_2: 8 };
        let channel = channel(3000).with_loop_context(stored);
        assert_eq!(channel.loop_context(700), stored);
        assert_ne!(channel.loop_context(714), stored);
    }

    #[test]
    fn test_truncated_history() {
        let channel = channel(1000);
        let pcm = channel.pcm();
        let short = channel.truncated(500);

        assert_eq!(short.sample_count(), 500);
        assert_eq!(short.audio().len(), sample_count_to_frame_bytes(500));
        assert_eq!((short.hist_1, short.hist_2), (pcm[499], pcm[498]));
        assert_eq!(short.pcm(), &pcm[..500]);
    }

    #[test]
    fn test_stored_seek_table_is_reused() {
        let channel = channel(2000);
        let stored = SeekTable { samples_per_entry: 100, entries: vec![Default::default(); 3] };
        let channel = channel.with_seek_table(stored.clone());

        assert_eq!(channel.seek_table_for(100, 3, false), stored);
        assert_eq!(channel.seek_table_for(100, 4, false).entries.len(), 4);
        assert_ne!(channel.seek_table_for(100, 20, true).entries[5], Default::default());
    }

    #[test]
    fn test_alignment_grows_by_gap() {
        let channel = channel(6000);
        let original = channel.pcm();
        let aligned = channel.aligned(1000, 5000, 14).unwrap();

        assert_eq!(aligned.sample_count(), 6008);
        assert_eq!(aligned.audio().len(), sample_count_to_frame_bytes(6008));

        // Frames before the loop end are carried over byte for byte.
        let kept = 5000 / 14 * 8;
        assert_eq!(&aligned.audio()[..kept], &channel.audio()[..kept]);

        let pcm = aligned.pcm();
        assert_eq!(&pcm[..5000 / 14 * 14], &original[..5000 / 14 * 14]);
        assert_eq!((aligned.hist_1, aligned.hist_2), (pcm[6007], pcm[6006]));

        // A 400 Hz tone repeats every 80 samples, so the loop joins smoothly
        // and the inserted samples track the loop's first samples.
        for i in 0..8 {
            let error = (pcm[5000 + i] as i32 - original[1000 + i] as i32).abs();
            assert!(error < 1024, "sample {} off by {}", i, error);
        }
    }

    #[test]
    fn test_aligned_start_is_unchanged() {
        let channel = channel(3000);
        assert_eq!(channel.aligned(1008, 2000, 14).unwrap(), channel);
        assert_eq!(channel.aligned(1000, 2000, 1).unwrap(), channel);
    }
}
