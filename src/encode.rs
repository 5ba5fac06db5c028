use crate::{
    coefficients::Coefficients,
    math::{clamp_16, clamp_4, combine_nibbles, sample_count_to_frame_bytes, DivideByRoundUp},
    CodecParameters, BYTES_PER_FRAME, SAMPLES_PER_FRAME,
};

/// Output of a full-channel encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcAdpcmEncoding {
    pub coefficients: [i16; 16],
    pub adpcm: Vec<u8>,
    /// Decoder history after the last encoded sample.
    pub history_1: i16,
    pub history_2: i16,
}

struct AdpcmEncodeBuffers {
    pcm_out: [[i32; 2 + SAMPLES_PER_FRAME]; 8],
    adpcm_out: [[i32; SAMPLES_PER_FRAME]; 8],
    scale: [i32; 8],
    total_distance: [f64; 8],
}

impl AdpcmEncodeBuffers {
    fn new() -> Self {
        Self {
            pcm_out: [[0; 2 + SAMPLES_PER_FRAME]; 8],
            adpcm_out: [[0; SAMPLES_PER_FRAME]; 8],
            scale: [0; 8],
            total_distance: [0.0; 8],
        }
    }
}

/// Derives coefficients for `pcm` and encodes it from zero history.
pub fn encode(pcm: &[i16]) -> GcAdpcmEncoding {
    let coefficients = Coefficients::from(pcm).coefs;
    encode_gc_adpcm(pcm, &coefficients, &CodecParameters::new(pcm.len()))
}

/// Encodes `config.sample_count` samples of `pcm` with fixed coefficients,
/// starting from the history in `config`.
///
/// The output always holds whole frames; unused nibbles of a partial last
/// frame are zero.
pub fn encode_gc_adpcm(
    pcm: &[i16],
    coefficients: &[i16; 16],
    config: &CodecParameters,
) -> GcAdpcmEncoding {
    let sample_count = config.sample_count.min(pcm.len());
    let mut adpcm = vec![0; sample_count_to_frame_bytes(sample_count)];

    let mut pcm_buffer = [0i16; 2 + SAMPLES_PER_FRAME];
    let mut adpcm_buffer = [0u8; BYTES_PER_FRAME];

    pcm_buffer[0] = config.history_2;
    pcm_buffer[1] = config.history_1;
    let mut history_1 = config.history_1;
    let mut history_2 = config.history_2;

    let frame_count = sample_count.divide_by_round_up(SAMPLES_PER_FRAME);
    let mut buffers = AdpcmEncodeBuffers::new();

    for frame in 0..frame_count {
        let src_index = frame * SAMPLES_PER_FRAME;
        let samples_to_copy = (sample_count - src_index).min(SAMPLES_PER_FRAME);
        pcm_buffer[2..(2 + samples_to_copy)]
            .copy_from_slice(&pcm[src_index..(src_index + samples_to_copy)]);
        pcm_buffer[(2 + samples_to_copy)..].fill(0);

        dsp_encode_frame(
            &mut pcm_buffer,
            samples_to_copy,
            &mut adpcm_buffer,
            coefficients,
            &mut buffers,
        );

        let dst_index = frame * BYTES_PER_FRAME;
        adpcm[dst_index..(dst_index + BYTES_PER_FRAME)].copy_from_slice(&adpcm_buffer);

        for &sample in &pcm_buffer[2..(2 + samples_to_copy)] {
            history_2 = history_1;
            history_1 = sample;
        }

        pcm_buffer[0] = pcm_buffer[14];
        pcm_buffer[1] = pcm_buffer[15];
    }

    GcAdpcmEncoding { coefficients: *coefficients, adpcm, history_1, history_2 }
}

/// Picks the predictor with the lowest decode error for one frame.
///
/// On return `pcm_in_out[2..]` holds the samples a decoder will reproduce,
/// which become the history for the next frame.
fn dsp_encode_frame(
    pcm_in_out: &mut [i16; 2 + SAMPLES_PER_FRAME],
    sample_count: usize,
    adpcm_out: &mut [u8; BYTES_PER_FRAME],
    coefficients_in: &[i16; 16],
    b: &mut AdpcmEncodeBuffers,
) {
    for i in 0..8 {
        let coefficients = [coefficients_in[i * 2], coefficients_in[i * 2 + 1]];
        let (scale, distance) = dsp_encode_coefficient(
            pcm_in_out,
            sample_count,
            &coefficients,
            &mut b.pcm_out[i],
            &mut b.adpcm_out[i],
        );
        b.scale[i] = scale;
        b.total_distance[i] = distance;
    }

    let mut best_coefficient = 0;
    let mut min = f64::MAX;
    for (i, &distance) in b.total_distance.iter().enumerate() {
        if distance < min {
            min = distance;
            best_coefficient = i;
        }
    }

    for s in 0..sample_count {
        pcm_in_out[s + 2] = b.pcm_out[best_coefficient][s + 2] as i16;
    }

    adpcm_out[0] = combine_nibbles(best_coefficient as i32, b.scale[best_coefficient]);

    let best = &mut b.adpcm_out[best_coefficient];
    best[sample_count..].fill(0);

    for i in 0..7 {
        adpcm_out[i + 1] = combine_nibbles(best[i * 2], best[i * 2 + 1]);
    }
}

/// Encodes one frame with a single predictor, returning the chosen scale
/// exponent and the squared error of the decoded result.
fn dsp_encode_coefficient(
    pcm_in: &[i16; 2 + SAMPLES_PER_FRAME],
    sample_count: usize,
    coefficients: &[i16; 2],
    pcm_out: &mut [i32; 2 + SAMPLES_PER_FRAME],
    adpcm_out: &mut [i32; SAMPLES_PER_FRAME],
) -> (i32, f64) {
    let coef_1 = coefficients[0] as i64;
    let coef_2 = coefficients[1] as i64;
    let mut max_distance: i32 = 0;

    pcm_out[0] = pcm_in[0] as i32;
    pcm_out[1] = pcm_in[1] as i32;

    // Encode the frame with a scale of 1
    for s in 0..sample_count {
        let input_sample = pcm_in[s + 2] as i64;
        let predicted_sample = (pcm_in[s] as i64 * coef_2 + pcm_in[s + 1] as i64 * coef_1) / 2048;
        let distance = clamp_16(input_sample - predicted_sample) as i32;

        if distance.abs() > max_distance.abs() {
            max_distance = distance;
        }
    }

    // Use the maximum distance of the encoded frame to find a scale that will
    // fit the current frame.
    let mut scale_power = 0;
    while scale_power <= 12 && !(-8..=7).contains(&max_distance) {
        max_distance /= 2;
        scale_power += 1;
    }

    scale_power = if scale_power <= 1 { -1 } else { scale_power - 2 };

    let mut total_distance;
    loop {
        scale_power += 1;
        let scale: i64 = (1i64 << scale_power) * 2048;
        total_distance = 0.0;
        let mut max_overflow = 0;

        for s in 0..sample_count {
            let input_sample = pcm_in[s + 2] as i64 * 2048;
            let predicted_sample =
                pcm_out[s] as i64 * coef_2 + pcm_out[s + 1] as i64 * coef_1;
            let distance = input_sample - predicted_sample;

            // Single-precision division, then a double-precision offset.
            let quotient = (distance as f32 / scale as f32) as f64;
            let unclamped_adpcm_sample = if distance > 0 {
                (quotient + 0.4999999f32 as f64) as i32
            } else {
                (quotient - 0.4999999f32 as f64) as i32
            };

            let adpcm_sample = clamp_4(unclamped_adpcm_sample);

            if adpcm_sample != unclamped_adpcm_sample {
                let overflow = (unclamped_adpcm_sample - adpcm_sample).abs();
                max_overflow = max_overflow.max(overflow);
            }

            adpcm_out[s] = adpcm_sample;

            // Decode sample to use as history
            let decoded_distance = adpcm_sample as i64 * scale;
            let corrected_sample = predicted_sample + decoded_distance;
            let scaled_sample = (corrected_sample + 1024) >> 11;

            pcm_out[s + 2] = clamp_16(scaled_sample) as i32;

            let actual_distance = pcm_in[s + 2] as f64 - pcm_out[s + 2] as f64;
            total_distance += actual_distance * actual_distance;
        }

        let mut x = max_overflow + 8;
        while x > 256 {
            scale_power += 1;
            if scale_power >= 12 {
                scale_power = 11;
            }
            x >>= 1;
        }

        if scale_power >= 12 || max_overflow <= 1 {
            break;
        }
    }

    (scale_power, total_distance)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::decode::{decode, decode_gc_adpcm};

    fn sine(count: usize, frequency: f64, amplitude: f64) -> Vec<i16> {
        (0..count)
            .map(|i| {
                let t = i as f64 / 48000.0;
                (amplitude * (2.0 * std::f64::consts::PI * frequency * t).sin()) as i16
            })
            .collect()
    }

    fn noise(count: usize, seed: u32) -> Vec<i16> {
        let mut state = seed;
        (0..count)
            .map(|_| {
                state = state.wrapping_mul(1664525).wrapping_add(1013904223);
                (state >> 16) as i16
            })
            .collect()
    }

    fn max_error(a: &[i16], b: &[i16]) -> i32 {
        a.iter().zip(b).map(|(&x, &y)| (x as i32 - y as i32).abs()).max().unwrap_or(0)
    }

    #[test]
    fn test_one_second_sine_roundtrip() {
        let pcm = sine(48000, 440.0, 8000.0);
        let encoded = encode(&pcm);

        assert_eq!(encoded.adpcm.len(), 48000usize.div_ceil(14) * 8);

        let decoded = decode(&encoded.adpcm, &encoded.coefficients, 0, 0, pcm.len());
        assert_eq!(decoded.len(), pcm.len());

        // A tone this clean should never need more than a scale of 2^9.
        let error = max_error(&pcm, &decoded);
        assert!(error < 512, "max error {}", error);
    }

    #[test]
    fn test_final_history_matches_decoder() {
        for count in [1usize, 2, 13, 14, 15, 29, 1000] {
            let pcm = sine(count, 700.0, 10000.0);
            let encoded = encode(&pcm);
            let decoded = decode(&encoded.adpcm, &encoded.coefficients, 0, 0, count);

            assert_eq!(encoded.history_1, decoded[count - 1], "count {}", count);
            let expected_hist_2 = if count >= 2 { decoded[count - 2] } else { 0 };
            assert_eq!(encoded.history_2, expected_hist_2, "count {}", count);
        }
    }

    #[test]
    fn test_empty_input() {
        let encoded = encode(&[]);
        assert!(encoded.adpcm.is_empty());
        assert_eq!(encoded.coefficients, [0; 16]);
        assert_eq!((encoded.history_1, encoded.history_2), (0, 0));
    }

    #[test]
    fn test_partial_frame_is_padded() {
        let pcm = sine(20, 440.0, 5000.0);
        let encoded = encode(&pcm);
        assert_eq!(encoded.adpcm.len(), 16);
        // 6 used samples in the last frame leave nibbles 6..14 empty.
        assert_eq!(&encoded.adpcm[12..16], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_noise_stays_in_range() {
        let pcm = noise(5000, 7);
        let encoded = encode(&pcm);
        let decoded = decode(&encoded.adpcm, &encoded.coefficients, 0, 0, pcm.len());
        assert_eq!(decoded.len(), pcm.len());
        for frame in encoded.adpcm.chunks(8) {
            assert!(frame[0] >> 4 < 8);
            assert!(frame[0] & 0xF <= 12);
        }
    }

    #[test]
    fn test_decode_of_reencode_is_stable() {
        let pcm = sine(7000, 300.0, 9000.0);
        let encoded = encode(&pcm);
        let first = decode(&encoded.adpcm, &encoded.coefficients, 0, 0, pcm.len());
        let again = decode(&encoded.adpcm, &encoded.coefficients, 0, 0, pcm.len());
        assert_eq!(first, again);

        let reencoded =
            encode_gc_adpcm(&first, &encoded.coefficients, &CodecParameters::new(first.len()));
        let second = decode(&reencoded.adpcm, &reencoded.coefficients, 0, 0, first.len());
        assert!(max_error(&first, &second) < 512);
    }

    #[test]
    fn test_encode_with_seeded_history() {
        let pcm = sine(280, 440.0, 8000.0);
        let coefficients = Coefficients::from(&pcm).coefs;
        let head = encode_gc_adpcm(&pcm[..140], &coefficients, &CodecParameters::new(140));
        let tail_config =
            CodecParameters::new(140).with_history(head.history_1, head.history_2);
        let tail = encode_gc_adpcm(&pcm[140..], &coefficients, &tail_config);
        let whole = encode_gc_adpcm(&pcm, &coefficients, &CodecParameters::new(280));

        let mut joined = head.adpcm.clone();
        joined.extend_from_slice(&tail.adpcm);
        assert_eq!(joined, whole.adpcm);

        let resumed = decode_gc_adpcm(
            &tail.adpcm,
            &coefficients,
            &CodecParameters::new(140).with_history(head.history_1, head.history_2),
        );
        let full = decode(&whole.adpcm, &coefficients, 0, 0, 280);
        assert_eq!(resumed, &full[140..]);
    }
}
