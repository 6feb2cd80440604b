use crate::{
    Akaze, Error, EvolutionStep, GrayFloatImage, KeyPoint, ScaleSpace, MLDB_COMPARISONS_PER_CHANNEL,
    MSURF_DESCRIPTOR_LEN,
};
use bitarray::BitArray;
use rand::{seq::index, SeedableRng};
use rand_pcg::Pcg64;

#[cfg(feature = "rayon")]
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Seed of the bit subsample used for shortened M-LDB descriptors.
const MLDB_SUBSAMPLE_SEED: u64 = 1024;

/// The descriptor AKAZE computes for each keypoint.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    /// 64 float M-SURF descriptor computed without orientation.
    UprightMsurf,
    /// 64 float M-SURF descriptor rotated to the keypoint orientation.
    Msurf,
    /// Binary M-LDB descriptor.
    Mldb,
}

impl DescriptorKind {
    /// Look up a descriptor kind by its numeric command line code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::UprightMsurf),
            1 => Some(Self::Msurf),
            2 => Some(Self::Mldb),
            _ => None,
        }
    }

    /// The numeric command line code of this descriptor kind.
    pub fn code(self) -> i32 {
        match self {
            Self::UprightMsurf => 0,
            Self::Msurf => 1,
            Self::Mldb => 2,
        }
    }

    /// Whether rows of this kind are packed bytes rather than floats.
    pub fn is_binary(self) -> bool {
        self == Self::Mldb
    }
}

/// One descriptor row.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    /// Unit-length floats (M-SURF).
    Real(Vec<f32>),
    /// Packed comparison bits, least significant bit first (M-LDB).
    Binary(Vec<u8>),
}

impl Descriptor {
    /// Number of values in the row: floats or bytes.
    pub fn len(&self) -> usize {
        match self {
            Descriptor::Real(values) => values.len(),
            Descriptor::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Akaze {
    /// Compute one descriptor per keypoint.
    ///
    /// This is the last extraction stage. The result is co-indexed with
    /// `keypoints`; an entry is `None` when the sampling pattern of that
    /// keypoint leaves its evolution.
    ///
    /// # Arguments
    /// * `scale_space` - the scale space `keypoints` were detected in.
    /// * `keypoints` - the keypoints detected.
    pub fn compute_descriptors(
        &self,
        scale_space: &ScaleSpace,
        keypoints: &[KeyPoint],
    ) -> Result<Vec<Option<Descriptor>>, Error> {
        if !scale_space.responses_computed {
            return Err(Error::DetectionNotRun);
        }
        let evolutions = scale_space.evolutions();
        let bit_sample = self.mldb_bit_sample();
        let describe =
            |keypoint: &KeyPoint| self.describe(keypoint, evolutions, bit_sample.as_deref()).ok();
        #[cfg(not(feature = "rayon"))]
        let descriptors = keypoints.iter().map(describe).collect();
        #[cfg(feature = "rayon")]
        let descriptors = keypoints.par_iter().map(describe).collect();
        Ok(descriptors)
    }

    /// Extract descriptors and keep only the keypoints that have one.
    ///
    /// # Return value
    /// The surviving keypoints and their descriptors, in detection order.
    pub fn extract_descriptors(
        &self,
        scale_space: &ScaleSpace,
        keypoints: &[KeyPoint],
    ) -> Result<(Vec<KeyPoint>, Vec<Descriptor>), Error> {
        Ok(keypoints
            .iter()
            .zip(self.compute_descriptors(scale_space, keypoints)?)
            .filter_map(|(&keypoint, descriptor)| Some((keypoint, descriptor?)))
            .unzip())
    }

    fn describe(
        &self,
        keypoint: &KeyPoint,
        evolutions: &[EvolutionStep],
        bit_sample: Option<&[usize]>,
    ) -> Result<Descriptor, Error> {
        match self.descriptor {
            DescriptorKind::UprightMsurf | DescriptorKind::Msurf => {
                let angle = if self.is_upright() { 0.0 } else { keypoint.angle };
                get_msurf_descriptor(keypoint, angle, evolutions).map(Descriptor::Real)
            }
            DescriptorKind::Mldb => {
                let full = self.get_mldb_descriptor(keypoint, evolutions)?;
                let bits = match bit_sample {
                    Some(sample) => subsample_bits(&full, sample),
                    None => full,
                };
                Ok(Descriptor::Binary(
                    bits.bytes()[..self.descriptor_len()].to_vec(),
                ))
            }
        }
    }

    /// The sorted bit positions kept when `descriptor_size` shortens M-LDB.
    fn mldb_bit_sample(&self) -> Option<Vec<usize>> {
        let full = MLDB_COMPARISONS_PER_CHANNEL * self.descriptor_channels;
        let bits = self.descriptor_bits();
        if self.descriptor != DescriptorKind::Mldb || bits == full {
            return None;
        }
        let mut rng = Pcg64::seed_from_u64(MLDB_SUBSAMPLE_SEED);
        let mut sample = index::sample(&mut rng, full, bits).into_vec();
        sample.sort_unstable();
        Some(sample)
    }

    /// Computes the M-LDB binary descriptor (maximum descriptor length)
    ///
    /// # Arguments
    /// `* kpt` - Input keypoint
    /// * `evolutions` - Input evolutions
    /// # Return value
    /// Binary-based descriptor
    fn get_mldb_descriptor(
        &self,
        keypoint: &KeyPoint,
        evolutions: &[EvolutionStep],
    ) -> Result<BitArray<64>, Error> {
        let mut output = BitArray::zeros();
        let max_channels = 3usize;
        debug_assert!(self.descriptor_channels <= max_channels);
        let mut values: Vec<f32> = vec![0f32; 16 * max_channels];
        let size_mult = [1.0f32, 2.0f32 / 3.0f32, 1.0f32 / 2.0f32];

        let ratio = (1u32 << keypoint.octave) as f32;
        let scale = f32::round(0.5f32 * keypoint.size / ratio);
        let xf = keypoint.point.0 / ratio;
        let yf = keypoint.point.1 / ratio;
        let angle = if self.is_upright() { 0.0 } else { keypoint.angle };
        let co = f32::cos(angle);
        let si = f32::sin(angle);
        let pattern_size = self.descriptor_pattern_size as f32;

        let mut dpos = 0usize;
        for (lvl, multiplier) in size_mult.iter().enumerate() {
            let val_count = (lvl + 2usize) * (lvl + 2usize);
            let sample_size = f32::ceil(pattern_size * multiplier) as usize;
            self.mldb_fill_values(
                &mut values,
                sample_size,
                &evolutions[keypoint.class_id],
                (xf, yf),
                (co, si),
                scale,
            )?;
            mldb_binary_comparisons(
                &values,
                output.bytes_mut(),
                val_count,
                &mut dpos,
                self.descriptor_channels,
            );
        }
        Ok(output)
    }

    /// Fill the comparison values for the MLDB descriptor
    fn mldb_fill_values(
        &self,
        values: &mut [f32],
        sample_step: usize,
        evolution: &EvolutionStep,
        (xf, yf): (f32, f32),
        (co, si): (f32, f32),
        scale: f32,
    ) -> Result<(), Error> {
        let pattern_size = self.descriptor_pattern_size as i32;
        let nr_channels = self.descriptor_channels;
        let width = evolution.Lt.width();
        let height = evolution.Lt.height();
        let mut valuepos = 0;
        for i in (-pattern_size..pattern_size).step_by(sample_step) {
            for j in (-pattern_size..pattern_size).step_by(sample_step) {
                let mut di = 0f32;
                let mut dx = 0f32;
                let mut dy = 0f32;
                let mut nsamples = 0usize;
                for k in i..(i + (sample_step as i32)) {
                    for l in j..(j + (sample_step as i32)) {
                        let l = l as f32;
                        let k = k as f32;
                        let sample_y = yf + (l * co * scale + k * si * scale);
                        let sample_x = xf + (-l * si * scale + k * co * scale);
                        let y1 = f32::round(sample_y) as isize;
                        let x1 = f32::round(sample_x) as isize;
                        if !(0..width as isize).contains(&x1) || !(0..height as isize).contains(&y1)
                        {
                            return Err(Error::SampleOutOfBounds {
                                x: x1,
                                y: y1,
                                width,
                                height,
                            });
                        }
                        let y1 = y1 as usize;
                        let x1 = x1 as usize;
                        di += evolution.Lt.get(x1, y1);
                        if nr_channels > 1 {
                            let rx = evolution.Lx.get(x1, y1);
                            let ry = evolution.Ly.get(x1, y1);
                            if nr_channels == 2 {
                                dx += f32::sqrt(rx * rx + ry * ry);
                            } else {
                                let rry = rx * co + ry * si;
                                let rrx = -rx * si + ry * co;
                                dx += rrx;
                                dy += rry;
                            }
                        }
                        nsamples += 1;
                    }
                }

                di /= nsamples as f32;
                dx /= nsamples as f32;
                dy /= nsamples as f32;

                values[valuepos] = di;

                if nr_channels > 1 {
                    values[valuepos + 1] = dx;
                }
                if nr_channels > 2 {
                    values[valuepos + 2] = dy;
                }
                valuepos += nr_channels;
            }
        }
        Ok(())
    }
}

/// Do the binary comparisons to obtain the descriptor
fn mldb_binary_comparisons(
    values: &[f32],
    descriptor: &mut [u8],
    count: usize,
    dpos: &mut usize,
    nr_channels: usize,
) {
    for pos in 0..nr_channels {
        for i in 0..count {
            let ival = values[nr_channels * i + pos];
            for j in (i + 1)..count {
                let res = if ival > values[nr_channels * j + pos] {
                    1u8
                } else {
                    0u8
                };
                descriptor[*dpos >> 3usize] |= res << (*dpos & 7);
                *dpos += 1usize;
            }
        }
    }
}

/// Gather the bits at `sample` positions of `full` into a new leading bit run.
fn subsample_bits(full: &BitArray<64>, sample: &[usize]) -> BitArray<64> {
    let mut output = BitArray::zeros();
    let source = full.bytes();
    let target = output.bytes_mut();
    for (dpos, &spos) in sample.iter().enumerate() {
        let bit = (source[spos >> 3] >> (spos & 7)) & 1;
        target[dpos >> 3] |= bit << (dpos & 7);
    }
    output
}

/// The 2D Gaussian weight used by M-SURF.
fn gaussian_weight(x: f32, y: f32, sigma: f32) -> f32 {
    f32::exp(-(x * x + y * y) / (2.0 * sigma * sigma))
}

/// Computes the M-SURF descriptor over a 24s x 24s square.
///
/// The window is split into 4x4 overlapping 9s x 9s subregions. Each one
/// contributes the Gaussian weighted sums of dx, dy, |dx| and |dy| rotated to
/// `angle`; the 64 values are normalized to unit length.
fn get_msurf_descriptor(
    keypoint: &KeyPoint,
    angle: f32,
    evolutions: &[EvolutionStep],
) -> Result<Vec<f32>, Error> {
    const SAMPLE_STEP: i32 = 5;
    const PATTERN_SIZE: i32 = 12;
    let evolution = &evolutions[keypoint.class_id];
    let ratio = (1u32 << keypoint.octave) as f32;
    let scale = f32::round(0.5f32 * keypoint.size / ratio);
    let xf = keypoint.point.0 / ratio;
    let yf = keypoint.point.1 / ratio;
    let co = f32::cos(angle);
    let si = f32::sin(angle);
    let sample = |image: &GrayFloatImage, x: f32, y: f32| {
        image.bilinear(x, y).ok_or(Error::SampleOutOfBounds {
            x: x.round() as isize,
            y: y.round() as isize,
            width: image.width(),
            height: image.height(),
        })
    };

    let mut descriptor = Vec::with_capacity(MSURF_DESCRIPTOR_LEN);
    let mut len = 0f32;
    // Subregion centers for the 4x4 Gaussian weighting.
    let mut cx = -0.5f32;
    let mut i = -8i32;
    while i < PATTERN_SIZE {
        i -= 4;
        cx += 1.0;
        let mut cy = -0.5f32;
        let mut j = -8i32;
        while j < PATTERN_SIZE {
            cy += 1.0;
            j -= 4;
            let ky = (i + SAMPLE_STEP) as f32;
            let kx = (j + SAMPLE_STEP) as f32;
            let xs = xf + (-kx * scale * si + ky * scale * co);
            let ys = yf + (kx * scale * co + ky * scale * si);
            let (mut dx, mut dy, mut mdx, mut mdy) = (0f32, 0f32, 0f32, 0f32);
            for k in i..i + 9 {
                for l in j..j + 9 {
                    let (k, l) = (k as f32, l as f32);
                    let sample_y = yf + (l * scale * co + k * scale * si);
                    let sample_x = xf + (-l * scale * si + k * scale * co);
                    let gauss_s1 = gaussian_weight(xs - sample_x, ys - sample_y, 2.5 * scale);
                    let rx = sample(&evolution.Lx, sample_x, sample_y)?;
                    let ry = sample(&evolution.Ly, sample_x, sample_y)?;
                    let rry = gauss_s1 * (rx * co + ry * si);
                    let rrx = gauss_s1 * (-rx * si + ry * co);
                    dx += rrx;
                    dy += rry;
                    mdx += rrx.abs();
                    mdy += rry.abs();
                }
            }
            let gauss_s2 = gaussian_weight(cx - 2.0, cy - 2.0, 1.5);
            descriptor.extend([dx, dy, mdx, mdy].map(|value| value * gauss_s2));
            len += (dx * dx + dy * dy + mdx * mdx + mdy * mdy) * gauss_s2 * gauss_s2;
            j += 9;
        }
        i += 9;
    }
    let len = len.sqrt();
    if len > 0.0 {
        for value in descriptor.iter_mut() {
            *value /= len;
        }
    }
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::{mldb_binary_comparisons, subsample_bits, DescriptorKind};
    use crate::{Akaze, MLDB_COMPARISONS_PER_CHANNEL};
    use bitarray::BitArray;

    #[test]
    fn full_mldb_is_61_bytes() {
        let akaze = Akaze::default();
        assert_eq!(akaze.descriptor_bits(), 486);
        assert_eq!(akaze.descriptor_len(), 61);
    }

    #[test]
    fn mldb_length_follows_channels_and_size() {
        let mut akaze = Akaze {
            descriptor_channels: 1,
            ..Default::default()
        };
        assert_eq!(akaze.descriptor_len(), 21);
        akaze.descriptor_channels = 2;
        assert_eq!(akaze.descriptor_len(), 41);
        akaze.descriptor_size = 64;
        assert_eq!(akaze.descriptor_len(), 8);
        akaze.descriptor_size = 10_000;
        assert_eq!(akaze.descriptor_len(), 41);
    }

    #[test]
    fn msurf_length_ignores_binary_settings() {
        let akaze = Akaze {
            descriptor: DescriptorKind::Msurf,
            descriptor_size: 64,
            descriptor_channels: 1,
            ..Default::default()
        };
        assert_eq!(akaze.descriptor_len(), 64);
    }

    #[test]
    fn bit_sample_is_deterministic_and_sorted() {
        let akaze = Akaze {
            descriptor_size: 100,
            ..Default::default()
        };
        let first = akaze.mldb_bit_sample().unwrap();
        let second = akaze.mldb_bit_sample().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 100);
        assert!(first.windows(2).all(|w| w[0] < w[1]));
        assert!(first.iter().all(|&bit| bit < 3 * MLDB_COMPARISONS_PER_CHANNEL));
        assert!(Akaze::default().mldb_bit_sample().is_none());
    }

    #[test]
    fn comparisons_pack_lsb_first() {
        // Three values, one channel: pairs (0,1), (0,2), (1,2).
        let values = [3.0f32, 1.0, 2.0];
        let mut bytes = [0u8; 1];
        let mut dpos = 0;
        mldb_binary_comparisons(&values, &mut bytes, 3, &mut dpos, 1);
        assert_eq!(dpos, 3);
        assert_eq!(bytes[0], 0b011);
    }

    #[test]
    fn subsample_moves_selected_bits_forward() {
        let mut full = BitArray::<64>::zeros();
        full.bytes_mut()[1] = 0b0000_0100; // bit 10
        let picked = subsample_bits(&full, &[3, 10, 20]);
        assert_eq!(picked.bytes()[0], 0b010);
    }

    #[test]
    fn kind_codes_round_trip() {
        for code in 0..3 {
            assert_eq!(DescriptorKind::from_code(code).unwrap().code(), code);
        }
        assert_eq!(DescriptorKind::from_code(3), None);
        assert!(DescriptorKind::Mldb.is_binary());
    }
}
