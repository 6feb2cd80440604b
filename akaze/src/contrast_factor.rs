use crate::image::{gaussian_blur, GrayFloatImage};
use log::*;

/// Fallback contrast factor when the histogram never reaches the percentile.
const DEFAULT_CONTRAST_FACTOR: f64 = 0.03;

/// This function computes a good empirical value for the k contrast factor
/// given an input image, the percentile (0-1), the gradient scale and the
/// number of bins in the histogram.
///
/// # Arguments
/// * `image` Input image
/// * `percentile` - Percentile of the image gradient histogram (0-1)
/// * `gradient_histogram_scale` - Scale for computing the image gradient histogram
/// * `num_bins` - Number of histogram bins
/// # Return value
/// k contrast factor
#[allow(non_snake_case)]
pub fn compute_contrast_factor(
    image: &GrayFloatImage,
    percentile: f64,
    gradient_histogram_scale: f64,
    num_bins: usize,
) -> f64 {
    let gaussian = gaussian_blur(image, gradient_histogram_scale as f32);
    let Lx = crate::derivatives::simple_scharr_horizontal(&gaussian);
    let Ly = crate::derivatives::simple_scharr_vertical(&gaussian);
    // Gradient magnitudes of the interior pixels.
    let magnitudes: Vec<f64> = (1..gaussian.height().saturating_sub(1))
        .flat_map(|y| (1..gaussian.width().saturating_sub(1)).map(move |x| (x, y)))
        .map(|(x, y)| (Lx.get(x, y).powi(2) as f64 + Ly.get(x, y).powi(2) as f64).sqrt())
        .collect();
    let hmax = magnitudes
        .iter()
        .copied()
        .map(float_ord::FloatOrd)
        .max()
        .map_or(0.0, |max| max.0);
    if hmax == 0.0 || num_bins == 0 {
        debug!("Flat image, using default contrast factor.");
        return DEFAULT_CONTRAST_FACTOR;
    }
    let mut histogram = vec![0usize; num_bins];
    let mut num_points = 0usize;
    for &modg in magnitudes.iter().filter(|&&modg| modg != 0.0) {
        let bin_number = ((num_bins as f64 * (modg / hmax)) as usize).min(num_bins - 1);
        histogram[bin_number] += 1;
        num_points += 1;
    }
    let threshold = (num_points as f64 * percentile) as usize;
    let mut k: usize = 0;
    let mut num_elements: usize = 0;
    while num_elements < threshold && k < num_bins {
        num_elements += histogram[k];
        k += 1;
    }
    debug!(
        "hmax: {}, threshold: {}, num_elements: {}",
        hmax, threshold, num_elements
    );
    if num_elements >= threshold {
        hmax * (k as f64) / (num_bins as f64)
    } else {
        DEFAULT_CONTRAST_FACTOR
    }
}
