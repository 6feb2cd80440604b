use crate::{derivatives, evolution::EvolutionStep, image::GrayFloatImage, Akaze};
use ndarray::azip;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

impl Akaze {
    /// Compute the detector response - the scale normalized determinant of the
    /// Hessian - and save the result in the evolutions.
    ///
    /// The first order derivatives `Lx` and `Ly` are recomputed at the detection
    /// scale as a side effect; orientation and descriptors sample those.
    ///
    /// # Arguments
    /// * `evolutions` - The computed evolutions.
    pub fn detector_response(&self, evolutions: &mut [EvolutionStep]) {
        let derivative_factor = self.derivative_factor;
        #[cfg(not(feature = "rayon"))]
        for evolution in evolutions.iter_mut() {
            evolution_response(evolution, derivative_factor);
        }
        #[cfg(feature = "rayon")]
        evolutions.into_par_iter().for_each(|evolution| {
            evolution_response(evolution, derivative_factor);
        });
    }
}

/// The integer scale of the derivative filters of one evolution.
///
/// The image decreases in size by a factor which is 2^octave.
fn derivative_sigma(evolution: &EvolutionStep, derivative_factor: f64) -> u32 {
    let ratio = 2.0f64.powi(evolution.octave as i32);
    f64::round(evolution.esigma * derivative_factor / ratio) as u32
}

#[allow(non_snake_case)]
fn evolution_response(evolution: &mut EvolutionStep, derivative_factor: f64) {
    let sigma_size = derivative_sigma(evolution, derivative_factor).max(1);
    compute_multiscale_derivatives(evolution, sigma_size);
    let sigma_size_quat = (sigma_size as f32).powi(4);
    evolution.Ldet = GrayFloatImage::new(evolution.Lxx.width(), evolution.Lxx.height());
    azip!((
        Ldet in evolution.Ldet.mut_array2(),
        &Lxx in evolution.Lxx.ref_array2(),
        &Lyy in evolution.Lyy.ref_array2(),
        &Lxy in evolution.Lxy.ref_array2(),
    ) {
        *Ldet = (Lxx * Lyy - Lxy * Lxy) * sigma_size_quat;
    });
}

fn compute_multiscale_derivatives(evolution: &mut EvolutionStep, sigma_size: u32) {
    #[cfg(not(feature = "rayon"))]
    {
        evolution.Lx = derivatives::scharr_horizontal(&evolution.Lsmooth, sigma_size);
        evolution.Ly = derivatives::scharr_vertical(&evolution.Lsmooth, sigma_size);
        evolution.Lxx = derivatives::scharr_horizontal(&evolution.Lx, sigma_size);
        evolution.Lyy = derivatives::scharr_vertical(&evolution.Ly, sigma_size);
        evolution.Lxy = derivatives::scharr_vertical(&evolution.Lx, sigma_size);
    }
    #[cfg(feature = "rayon")]
    {
        (evolution.Lx, evolution.Ly) = rayon::join(
            || derivatives::scharr_horizontal(&evolution.Lsmooth, sigma_size),
            || derivatives::scharr_vertical(&evolution.Lsmooth, sigma_size),
        );
        (evolution.Lxx, (evolution.Lyy, evolution.Lxy)) = rayon::join(
            || derivatives::scharr_horizontal(&evolution.Lx, sigma_size),
            || {
                rayon::join(
                    || derivatives::scharr_vertical(&evolution.Ly, sigma_size),
                    || derivatives::scharr_vertical(&evolution.Lx, sigma_size),
                )
            },
        )
    }
}
