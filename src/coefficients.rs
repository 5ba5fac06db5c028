//! Whole-signal predictor coefficient derivation.
//!
//! Every frame of the input contributes an order-2 linear-prediction record;
//! the records are then clustered into eight predictor pairs by repeated
//! splitting and refinement.

use crate::{math::DivideByRoundUp, SAMPLES_PER_FRAME};

/// Smallest positive double. Only an exact zero range compares below it.
const MIN_SUBNORMAL: f64 = 4.9406564584124654e-324;

type Vec3 = [f64; 3];
type Matrix3 = [[f64; 3]; 3];

/// Eight predictor pairs, stored as `[a0, b0, a1, b1, ...]` in 1/2048 units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coefficients {
    pub coefs: [i16; 16],
}

impl std::ops::Deref for Coefficients {
    type Target = [i16; 16];

    fn deref(&self) -> &Self::Target {
        &self.coefs
    }
}

impl From<Coefficients> for [i16; 16] {
    fn from(coefficients: Coefficients) -> Self {
        coefficients.coefs
    }
}

impl<T: AsRef<[i16]>> From<T> for Coefficients {
    fn from(source: T) -> Self {
        let source = source.as_ref();
        let frame_count = source.len().divide_by_round_up(SAMPLES_PER_FRAME);
        let mut pcm_hist = [0i16; SAMPLES_PER_FRAME * 2];
        let mut vec1: Vec3 = [0.0; 3];
        let mut buffer: Vec3 = [0.0; 3];
        let mut mtx: Matrix3 = [[0.0; 3]; 3];
        let mut vec_idxs = [0usize; 3];
        let mut records: Vec<Vec3> = Vec::with_capacity(frame_count * 2);
        let mut vec_best: [Vec3; 8] = [[0.0; 3]; 8];

        for frame in source.chunks(SAMPLES_PER_FRAME) {
            pcm_hist[SAMPLES_PER_FRAME..].fill(0);
            pcm_hist[SAMPLES_PER_FRAME..SAMPLES_PER_FRAME + frame.len()].copy_from_slice(frame);

            inner_product_merge(&mut vec1, &pcm_hist);
            if vec1[0].abs() > 10.0 {
                outer_product_merge(&mut mtx, &pcm_hist);
                if !analyze_ranges(&mut mtx, &mut vec_idxs, &mut buffer) {
                    bidirectional_filter(&mtx, &vec_idxs, &mut vec1);
                    if !quadratic_merge(&mut vec1) {
                        let mut record = [0.0; 3];
                        finish_record(&mut vec1, &mut record);
                        records.push(record);
                    }
                }
            }

            pcm_hist.copy_within(SAMPLES_PER_FRAME.., 0);
        }

        // Silence and other unpredictable input leave nothing to cluster.
        if records.is_empty() {
            return Self { coefs: [0; 16] };
        }

        vec1 = [1.0, 0.0, 0.0];
        for record in &records {
            matrix_filter(record, &mut vec_best[0], &mut mtx);
            for y in 1..=2 {
                vec1[y] += vec_best[0][y];
            }
        }

        for value in vec1.iter_mut().skip(1) {
            *value /= records.len() as f64;
        }

        merge_finish_record(&vec1, &mut vec_best[0]);

        let split: Vec3 = [0.0, -1.0, 0.0];
        let mut exp = 1;
        for w in 1..=3 {
            for i in 0..exp {
                for y in 0..=2 {
                    vec_best[exp + i][y] = (0.01 * split[y]) + vec_best[i][y];
                }
            }
            exp = 1 << w;
            filter_records(&mut vec_best, exp, &records);
        }

        let mut coefs = [0i16; 16];
        for (z, best) in vec_best.iter().enumerate() {
            coefs[z * 2] = to_fixed_point(-best[1] * 2048.0);
            coefs[z * 2 + 1] = to_fixed_point(-best[2] * 2048.0);
        }

        Self { coefs }
    }
}

fn to_fixed_point(value: f64) -> i16 {
    if value > i16::MAX as f64 {
        i16::MAX
    } else if value < i16::MIN as f64 {
        i16::MIN
    } else {
        value.round_ties_even() as i16
    }
}

fn inner_product_merge(out: &mut Vec3, pcm: &[i16]) {
    for (i, value) in out.iter_mut().enumerate() {
        *value = 0.0;
        for x in 0..SAMPLES_PER_FRAME {
            *value -= pcm[SAMPLES_PER_FRAME + x - i] as f64 * pcm[SAMPLES_PER_FRAME + x] as f64;
        }
    }
}

fn outer_product_merge(mtx: &mut Matrix3, pcm: &[i16]) {
    for x in 1..=2 {
        for y in 1..=2 {
            mtx[x][y] = 0.0;
            for z in 0..SAMPLES_PER_FRAME {
                mtx[x][y] += pcm[SAMPLES_PER_FRAME + z - x] as f64
                    * pcm[SAMPLES_PER_FRAME + z - y] as f64;
            }
        }
    }
}

/// LU-decomposes the 2x2 autocorrelation block in place with partial
/// pivoting. Returns `true` if the matrix is too ill-conditioned to use.
fn analyze_ranges(mtx: &mut Matrix3, vec_idxs: &mut [usize; 3], recips: &mut Vec3) -> bool {
    // Get greatest distance from zero
    for x in 1..=2 {
        let val = mtx[x][1].abs().max(mtx[x][2].abs());
        if val < MIN_SUBNORMAL {
            return true;
        }

        recips[x] = 1.0 / val;
    }

    let mut max_index = 0;
    for i in 1..=2 {
        for x in 1..i {
            let mut tmp = mtx[x][i];
            for y in 1..x {
                tmp -= mtx[x][y] * mtx[y][i];
            }
            mtx[x][i] = tmp;
        }

        let mut val = 0.0;
        for x in i..=2 {
            let mut tmp = mtx[x][i];
            for y in 1..i {
                tmp -= mtx[x][y] * mtx[y][i];
            }

            mtx[x][i] = tmp;
            tmp = tmp.abs() * recips[x];
            if tmp >= val {
                val = tmp;
                max_index = x;
            }
        }

        if max_index != i {
            mtx.swap(max_index, i);
            recips[max_index] = recips[i];
        }
        vec_idxs[i] = max_index;

        if i != 2 {
            let tmp = 1.0 / mtx[i][i];
            for row in mtx.iter_mut().skip(i + 1) {
                row[i] *= tmp;
            }
        }
    }

    let mut min = 1.0e10;
    let mut max = 0.0;
    for i in 1..=2 {
        let tmp = mtx[i][i].abs();
        if tmp < min {
            min = tmp;
        }
        if tmp > max {
            max = tmp;
        }
    }

    min / max < 1.0e-10
}

fn bidirectional_filter(mtx: &Matrix3, vec_idxs: &[usize; 3], vec_out: &mut Vec3) {
    let mut x = 0;
    for i in 1..=2 {
        let index = vec_idxs[i];
        let mut tmp = vec_out[index];
        vec_out[index] = vec_out[i];
        if x != 0 {
            for y in x..i {
                tmp -= vec_out[y] * mtx[i][y];
            }
        } else if tmp != 0.0 {
            x = i;
        }
        vec_out[i] = tmp;
    }

    for i in (1..=2).rev() {
        let mut tmp = vec_out[i];
        for y in i + 1..=2 {
            tmp -= vec_out[y] * mtx[i][y];
        }
        vec_out[i] = tmp / mtx[i][i];
    }

    vec_out[0] = 1.0;
}

/// Returns `true` when the record is unstable and must be discarded.
fn quadratic_merge(in_out: &mut Vec3) -> bool {
    let v2 = in_out[2];
    let tmp = 1.0 - (v2 * v2);

    if tmp == 0.0 {
        return true;
    }

    let v0 = (in_out[0] - (v2 * v2)) / tmp;
    let v1 = (in_out[1] - (in_out[1] * v2)) / tmp;

    in_out[0] = v0;
    in_out[1] = v1;

    v1.abs() > 1.0
}

fn finish_record(in_r: &mut Vec3, out_r: &mut Vec3) {
    for value in in_r.iter_mut().skip(1) {
        if *value >= 1.0 {
            *value = 0.9999999999;
        } else if *value <= -1.0 {
            *value = -0.9999999999;
        }
    }

    out_r[0] = 1.0;
    out_r[1] = (in_r[2] * in_r[1]) + in_r[1];
    out_r[2] = in_r[2];
}

fn matrix_filter(src: &Vec3, dst: &mut Vec3, mtx: &mut Matrix3) {
    mtx[2][0] = 1.0;
    for i in 1..=2 {
        mtx[2][i] = -src[i];
    }

    for i in (1..=2).rev() {
        let val = 1.0 - (mtx[i][i] * mtx[i][i]);
        for y in 1..=i {
            mtx[i - 1][y] = ((mtx[i][i] * mtx[i][y]) + mtx[i][y]) / val;
        }
    }

    dst[0] = 1.0;
    for i in 1..=2 {
        dst[i] = 0.0;
        for y in 1..=i {
            dst[i] += mtx[i][y] * dst[i - y];
        }
    }
}

fn merge_finish_record(src: &Vec3, dst: &mut Vec3) {
    let mut tmp: Vec3 = [0.0; 3];
    let mut val = src[0];

    dst[0] = 1.0;
    for i in 1..=2 {
        let mut v2 = 0.0;
        for y in 1..i {
            v2 += dst[y] * src[i - y];
        }

        dst[i] = if val > 0.0 { -(v2 + src[i]) / val } else { 0.0 };

        tmp[i] = dst[i];

        for y in 1..i {
            dst[y] += dst[i] * dst[i - y];
        }

        val *= 1.0 - (dst[i] * dst[i]);
    }

    finish_record(&mut tmp, dst);
}

fn contrast_vectors(source1: &Vec3, source2: &Vec3) -> f64 {
    let val = (source2[2] * source2[1] + -source2[1]) / (1.0 - source2[2] * source2[2]);
    let val1 = (source1[0] * source1[0]) + (source1[1] * source1[1]) + (source1[2] * source1[2]);
    let val2 = (source1[0] * source1[1]) + (source1[1] * source1[2]);
    let val3 = source1[0] * source1[2];
    val1 + (2.0 * val * val2) + (2.0 * (-source2[1] * val + -source2[2]) * val3)
}

fn filter_records(vec_best: &mut [Vec3; 8], exp: usize, records: &[Vec3]) {
    let mut buffer_list: [Vec3; 8] = [[0.0; 3]; 8];
    let mut mtx: Matrix3 = [[0.0; 3]; 3];
    let mut buffer1 = [0usize; 8];
    let mut buffer2: Vec3 = [0.0; 3];

    for _pass in 0..2 {
        buffer1[..exp].fill(0);
        buffer_list[..exp].fill([0.0; 3]);

        for record in records {
            let mut index = 0;
            let mut value = 1.0e30;
            for (i, best) in vec_best.iter().enumerate().take(exp) {
                let temp_val = contrast_vectors(best, record);
                if temp_val < value {
                    value = temp_val;
                    index = i;
                }
            }
            buffer1[index] += 1;
            matrix_filter(record, &mut buffer2, &mut mtx);
            for i in 0..=2 {
                buffer_list[index][i] += buffer2[i];
            }
        }

        for i in 0..exp {
            if buffer1[i] > 0 {
                for y in 0..=2 {
                    buffer_list[i][y] /= buffer1[i] as f64;
                }
            }
        }

        for i in 0..exp {
            merge_finish_record(&buffer_list[i], &mut vec_best[i]);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sine(count: usize, frequency: f64, amplitude: f64) -> Vec<i16> {
        (0..count)
            .map(|i| {
                let t = i as f64 / 48000.0;
                (amplitude * (2.0 * std::f64::consts::PI * frequency * t).sin()) as i16
            })
            .collect()
    }

    #[test]
    fn test_silence_gives_zero_coefficients() {
        let coefs = Coefficients::from(vec![0i16; 1000]);
        assert_eq!(*coefs, [0; 16]);
    }

    #[test]
    fn test_empty_input() {
        let coefs = Coefficients::from(Vec::<i16>::new());
        assert_eq!(*coefs, [0; 16]);
    }

    #[test]
    fn test_sine_predictor_is_close_to_ideal() {
        let pcm = sine(48000, 1000.0, 8000.0);
        let coefs = Coefficients::from(&pcm);

        // x[n] = 2cos(w)x[n-1] - x[n-2] predicts a pure tone exactly.
        let w = 2.0 * std::f64::consts::PI * 1000.0 / 48000.0;
        let ideal_a = (2.0 * w.cos() * 2048.0) as i32;

        let closest = coefs
            .chunks(2)
            .map(|pair| (pair[0] as i32 - ideal_a).abs() + (pair[1] as i32 + 2048).abs())
            .min()
            .unwrap();

        assert!(closest < 256, "no predictor near ideal: {:?}", *coefs);
    }

    #[test]
    fn test_deterministic() {
        let pcm = sine(5000, 1000.0, 12000.0);
        assert_eq!(Coefficients::from(&pcm), Coefficients::from(&pcm));
    }
}
