use crate::{EvolutionStep, GrayFloatImage};
use ndarray::{azip, s, Array2};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The conductivity function g(|∇L|) of the nonlinear diffusion.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Diffusivity {
    /// Perona and Malik g1 = exp(-|∇L|^2 / k^2), favours high-contrast edges.
    PmG1,
    /// Perona and Malik g2 = 1 / (1 + |∇L|^2 / k^2), favours wide regions.
    PmG2,
    /// Weickert g3 = 1 - exp(-3.315 / (|∇L|^2 / k^2)^4), smooths inside regions.
    Weickert,
    /// Charbonnier g = 1 / sqrt(1 + |∇L|^2 / k^2).
    Charbonnier,
}

impl Diffusivity {
    /// Look up a diffusivity by its numeric command line code.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::PmG1),
            1 => Some(Self::PmG2),
            2 => Some(Self::Weickert),
            3 => Some(Self::Charbonnier),
            _ => None,
        }
    }

    /// The numeric command line code of this diffusivity.
    pub fn code(self) -> i32 {
        match self {
            Self::PmG1 => 0,
            Self::PmG2 => 1,
            Self::Weickert => 2,
            Self::Charbonnier => 3,
        }
    }

    /// Conductivity for a squared, contrast-normalized gradient magnitude.
    fn apply(self, normalized: f32) -> f32 {
        match self {
            Self::PmG1 => (-normalized).exp(),
            Self::PmG2 => 1.0 / (1.0 + normalized),
            Self::Weickert => 1.0 - (-3.315 / normalized.powi(4)).exp(),
            Self::Charbonnier => 1.0 / (1.0 + normalized).sqrt(),
        }
    }

    /// This function computes the conductivity image of an evolution.
    ///
    /// # Arguments
    /// * `Lx` - First order image derivative in X-direction (horizontal)
    /// * `Ly` - First order image derivative in Y-direction (vertical)
    /// * `k` - Contrast factor parameter
    /// # Return value
    /// Output image
    #[allow(non_snake_case)]
    pub fn conductivity(self, Lx: &GrayFloatImage, Ly: &GrayFloatImage, k: f64) -> GrayFloatImage {
        assert!(Lx.width() == Ly.width());
        assert!(Lx.height() == Ly.height());
        let inverse_k = (1.0f64 / (k * k)) as f32;
        let mut conductivities = Lx.zero_array();
        azip!((
            c in &mut conductivities,
            &x in Lx.ref_array2(),
            &y in Ly.ref_array2(),
        ) {
            *c = self.apply(inverse_k * (x * x + y * y));
        });
        GrayFloatImage::from_array2(conductivities)
    }
}

/// This function performs a scalar non-linear diffusion step.
///
/// # Arguments
/// * `Ld` - Output image in the evolution
/// * `c` - Conductivity image. The function c is a scalar value that depends on the gradient norm
/// * `Lstep` - Previous image in the evolution
/// * `step_size` - The step size in time units
/// Forward Euler Scheme 3x3 stencil
/// dL_by_ds = d(c dL_by_dx)_by_dx + d(c dL_by_dy)_by_dy
#[allow(non_snake_case)]
pub fn calculate_step(evolution_step: &mut EvolutionStep, step_size: f32) {
    // Get the ndarray types.
    let mut input = evolution_step.Lt.mut_array2();
    let conductivities = evolution_step.Lflow.ref_array2();
    let dim = input.dim();
    // Horizontal flow.
    let mut horizontal_flow = Array2::<f32>::zeros((dim.0, dim.1 - 1));
    azip!((
        flow in &mut horizontal_flow,
        &a in input.slice(s![.., ..-1]),
        &b in input.slice(s![.., 1..]),
        &ca in conductivities.slice(s![.., ..-1]),
        &cb in conductivities.slice(s![.., 1..]),
    ) {
        *flow = 0.5 * step_size * (ca + cb) * (b - a);
    });
    // Vertical flow.
    let mut vertical_flow = Array2::<f32>::zeros((dim.0 - 1, dim.1));
    azip!((
        flow in &mut vertical_flow,
        &a in input.slice(s![..-1, ..]),
        &b in input.slice(s![1.., ..]),
        &ca in conductivities.slice(s![..-1, ..]),
        &cb in conductivities.slice(s![1.., ..]),
    ) {
        *flow = 0.5 * step_size * (ca + cb) * (b - a);
    });

    // Left
    input
        .slice_mut(s![.., ..-1])
        .zip_mut_with(&horizontal_flow, |acc, &i| *acc += i);
    // Right
    input
        .slice_mut(s![.., 1..])
        .zip_mut_with(&horizontal_flow, |acc, &i| *acc -= i);
    // Up
    input
        .slice_mut(s![..-1, ..])
        .zip_mut_with(&vertical_flow, |acc, &i| *acc += i);
    // Down
    input
        .slice_mut(s![1.., ..])
        .zip_mut_with(&vertical_flow, |acc, &i| *acc -= i);
}

#[cfg(test)]
mod tests {
    use super::Diffusivity;
    use crate::GrayFloatImage;

    const ALL: [Diffusivity; 4] = [
        Diffusivity::PmG1,
        Diffusivity::PmG2,
        Diffusivity::Weickert,
        Diffusivity::Charbonnier,
    ];

    #[test]
    fn codes_round_trip() {
        for diffusivity in ALL {
            assert_eq!(Diffusivity::from_code(diffusivity.code()), Some(diffusivity));
        }
        assert_eq!(Diffusivity::from_code(4), None);
        assert_eq!(Diffusivity::from_code(-1), None);
    }

    #[test]
    fn flat_regions_fully_conduct() {
        for diffusivity in ALL {
            assert!((diffusivity.apply(0.0) - 1.0).abs() < 1e-6, "{:?}", diffusivity);
        }
    }

    #[test]
    fn strong_edges_conduct_less() {
        for diffusivity in ALL {
            let weak = diffusivity.apply(0.1);
            let strong = diffusivity.apply(10.0);
            assert!(strong < weak, "{:?}: {} >= {}", diffusivity, strong, weak);
            assert!((0.0..=1.0).contains(&strong));
        }
    }

    #[test]
    fn conductivity_image_matches_pointwise() {
        let mut lx = GrayFloatImage::new(3, 2);
        let ly = GrayFloatImage::new(3, 2);
        lx.put(1, 1, 0.5);
        let flow = Diffusivity::PmG2.conductivity(&lx, &ly, 0.5);
        assert!((flow.get(0, 0) - 1.0).abs() < 1e-6);
        assert!((flow.get(1, 1) - 0.5).abs() < 1e-6);
    }
}
