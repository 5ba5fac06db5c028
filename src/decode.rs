use crate::{
    math::{clamp_16, high_nibble, high_nibble_signed, low_nibble, low_nibble_signed},
    CodecParameters, BYTES_PER_FRAME, SAMPLES_PER_FRAME,
};

/// Sample-by-sample GC-ADPCM decoder.
///
/// The decoder carries only the two-sample history and its position, so it
/// can be started at any sample given the history that held there.
#[derive(Debug, Clone)]
pub struct GcAdpcmDecoder<'a> {
    adpcm: &'a [u8],
    coefficients: &'a [i16; 16],
    position: usize,
    hist_1: i16,
    hist_2: i16,
}

impl<'a> GcAdpcmDecoder<'a> {
    pub fn new(adpcm: &'a [u8], coefficients: &'a [i16; 16]) -> Self {
        Self { adpcm, coefficients, position: 0, hist_1: 0, hist_2: 0 }
    }

    pub fn resume(
        adpcm: &'a [u8],
        coefficients: &'a [i16; 16],
        position: usize,
        hist_1: i16,
        hist_2: i16,
    ) -> Self {
        Self { adpcm, coefficients, position, hist_1, hist_2 }
    }

    /// Index of the next sample to be decoded.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn history(&self) -> (i16, i16) {
        (self.hist_1, self.hist_2)
    }

    /// Predictor/scale byte of the frame holding the next sample.
    pub fn predictor_scale(&self) -> Option<u8> {
        self.adpcm.get(self.position / SAMPLES_PER_FRAME * BYTES_PER_FRAME).copied()
    }

    /// Decodes and discards samples until `position` is reached.
    pub fn skip_to(&mut self, position: usize) {
        while self.position < position && self.next().is_some() {}
    }
}

impl Iterator for GcAdpcmDecoder<'_> {
    type Item = i16;

    fn next(&mut self) -> Option<i16> {
        let frame_start = self.position / SAMPLES_PER_FRAME * BYTES_PER_FRAME;
        let in_frame = self.position % SAMPLES_PER_FRAME;
        let predictor_scale = *self.adpcm.get(frame_start)?;
        let nibbles = *self.adpcm.get(frame_start + 1 + in_frame / 2)?;

        let scale: i64 = (1i64 << low_nibble(predictor_scale)) * 2048;
        let predictor = high_nibble(predictor_scale) as usize;
        if predictor > 7 {
            return None;
        }
        let coef_1 = self.coefficients[predictor * 2] as i64;
        let coef_2 = self.coefficients[predictor * 2 + 1] as i64;

        let adpcm_sample = if in_frame % 2 == 0 {
            high_nibble_signed(nibbles)
        } else {
            low_nibble_signed(nibbles)
        } as i64;

        let distance = scale * adpcm_sample;
        let predicted_sample = coef_1 * self.hist_1 as i64 + coef_2 * self.hist_2 as i64;
        let corrected_sample = predicted_sample + distance;
        let scaled_sample = (corrected_sample + 1024) >> 11;

        let clamped_sample = clamp_16(scaled_sample);

        self.hist_2 = self.hist_1;
        self.hist_1 = clamped_sample;
        self.position += 1;

        Some(clamped_sample)
    }
}

/// Decodes `config.sample_count` samples starting at `config.start_sample`,
/// seeded with the history that held immediately before that sample.
pub fn decode_gc_adpcm(
    adpcm: &[u8],
    coefficients: &[i16; 16],
    config: &CodecParameters,
) -> Vec<i16> {
    let decoder = GcAdpcmDecoder::resume(
        adpcm,
        coefficients,
        config.start_sample,
        config.history_1,
        config.history_2,
    );

    let mut pcm = Vec::with_capacity(config.sample_count);
    pcm.extend(decoder.take(config.sample_count));
    pcm
}

/// Decodes a channel from its first sample.
pub fn decode(
    adpcm: &[u8],
    coefficients: &[i16; 16],
    history_1: i16,
    history_2: i16,
    sample_count: usize,
) -> Vec<i16> {
    let config = CodecParameters::new(sample_count).with_history(history_1, history_2);
    decode_gc_adpcm(adpcm, coefficients, &config)
}

#[cfg(test)]
mod test {
    use super::*;

    const COEFS: [i16; 16] = [
        4002, -1934, 1040, 1080, 3000, -2000, 0, 0, 2048, 0, 1024, 512, -800, 600, 3500, -1700,
    ];

    fn frames() -> Vec<u8> {
        vec![
            0x02, 0x17, 0x7F, 0x80, 0x12, 0x34, 0xF0, 0x0E, //
            0x43, 0x98, 0x76, 0x54, 0x32, 0x10, 0xAB, 0xCD, //
            0x7B, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77,
        ]
    }

    fn reference_decode(
        adpcm: &[u8],
        coefficients: &[i16; 16],
        sample_count: usize,
    ) -> Vec<i16> {
        let mut pcm = Vec::new();
        let (mut hist_1, mut hist_2) = (0i32, 0i32);
        for frame in adpcm.chunks(8) {
            let scale = (1i32 << (frame[0] & 0xF)) * 2048;
            let predictor = (frame[0] >> 4) as usize;
            for s in 0..14 {
                if pcm.len() == sample_count {
                    return pcm;
                }
                let byte = frame[1 + s / 2];
                let nibble = if s % 2 == 0 { byte >> 4 } else { byte & 0xF };
                let signed = if nibble >= 8 { nibble as i32 - 16 } else { nibble as i32 };
                let predicted = coefficients[predictor * 2] as i32 * hist_1
                    + coefficients[predictor * 2 + 1] as i32 * hist_2;
                let sample = ((predicted + scale * signed + 1024) >> 11).clamp(-32768, 32767);
                hist_2 = hist_1;
                hist_1 = sample;
                pcm.push(sample as i16);
            }
        }
        pcm
    }

    #[test]
    fn test_decode_matches_frame_arithmetic() {
        let adpcm = frames();
        let pcm = decode(&adpcm, &COEFS, 0, 0, 42);
        assert_eq!(pcm, reference_decode(&adpcm, &COEFS, 42));
    }

    #[test]
    fn test_partial_last_frame() {
        let adpcm = frames();
        let pcm = decode(&adpcm, &COEFS, 0, 0, 30);
        assert_eq!(pcm.len(), 30);
        assert_eq!(pcm, reference_decode(&adpcm, &COEFS, 30));
    }

    #[test]
    fn test_decode_stops_at_end_of_data() {
        let adpcm = frames();
        assert_eq!(decode(&adpcm, &COEFS, 0, 0, 1000).len(), 42);
        assert!(decode(&[], &COEFS, 0, 0, 10).is_empty());
    }

    #[test]
    fn test_large_scale_clamps() {
        let adpcm = [0x0F, 0x77, 0x77, 0x77, 0x77, 0x77, 0x77, 0x77];
        let pcm = decode(&adpcm, &COEFS, 0, 0, 14);
        assert!(pcm.iter().all(|&s| s == i16::MAX));

        let adpcm = [0x0F, 0x88, 0x88, 0x88, 0x88, 0x88, 0x88, 0x88];
        let pcm = decode(&adpcm, &COEFS, 0, 0, 14);
        assert!(pcm.iter().all(|&s| s == i16::MIN));
    }

    #[test]
    fn test_resume_mid_frame() {
        let adpcm = frames();
        let full = decode(&adpcm, &COEFS, 0, 0, 42);

        for start in [1, 5, 13, 14, 20, 27] {
            let config = CodecParameters::new(42 - start)
                .starting_at(start)
                .with_history(full[start - 1], if start >= 2 { full[start - 2] } else { 0 });
            let tail = decode_gc_adpcm(&adpcm, &COEFS, &config);
            assert_eq!(tail, &full[start..], "resume at {}", start);
        }
    }

    #[test]
    fn test_decode_is_deterministic() {
        let adpcm = frames();
        assert_eq!(decode(&adpcm, &COEFS, 10, -10, 42), decode(&adpcm, &COEFS, 10, -10, 42));
    }

    #[test]
    fn test_out_of_range_predictor_stops_decoding() {
        let mut adpcm = frames();
        adpcm[8] = 0x93;
        let pcm = decode(&adpcm, &COEFS, 0, 0, 42);
        assert_eq!(pcm, reference_decode(&adpcm, &COEFS, 14));
    }
}
