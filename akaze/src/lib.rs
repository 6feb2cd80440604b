mod contrast_factor;
mod derivatives;
mod descriptors;
mod detector_response;
mod evolution;
mod fed_tau;
pub mod image;
mod nonlinear_diffusion;
mod scale_space_extrema;

pub use descriptors::{Descriptor, DescriptorKind};
pub use evolution::{EvolutionStep, ScaleSpace};
pub use nonlinear_diffusion::Diffusivity;

use crate::image::{gaussian_blur, GrayFloatImage};
use ::image::DynamicImage;
use log::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of pairwise comparisons M-LDB performs per channel (2x2, 3x3 and 4x4 grids).
pub const MLDB_COMPARISONS_PER_CHANNEL: usize = 6 + 36 + 120;

/// Length of the M-SURF descriptor.
pub const MSURF_DESCRIPTOR_LEN: usize = 64;

/// Errors produced while building a scale space or computing descriptors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("sample ({x}, {y}) is outside of the {width}x{height} evolution")]
    SampleOutOfBounds {
        x: isize,
        y: isize,
        width: usize,
        height: usize,
    },
    #[error("a {width}x{height} image is too small for any octave of the scale space")]
    EmptyScaleSpace { width: usize, height: usize },
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter {
        name: &'static str,
        reason: &'static str,
    },
    #[error("descriptors requested before the detector response was computed")]
    DetectionNotRun,
}

/// A point of interest in an image.
/// This pretty much follows from OpenCV conventions.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPoint {
    /// The horizontal coordinate in a coordinate system is
    /// defined s.t. +x faces right and starts from the top
    /// of the image.
    /// the vertical coordinate in a coordinate system is defined
    /// s.t. +y faces toward the bottom of an image and starts
    /// from the left side of the image.
    pub point: (f32, f32),
    /// The magnitude of response from the detector.
    pub response: f32,

    /// The radius defining the extent of the keypoint, in pixel units
    pub size: f32,

    /// The octave of scale space in which the keypoint was detected.
    pub octave: usize,

    /// The index of the evolution in which the keypoint was detected.
    pub class_id: usize,

    /// The orientation angle in radians, within `[0, 2π)`.
    /// Always zero for upright extraction.
    pub angle: f32,
}

/// Contains the configuration parameters of AKAZE.
///
/// The most important parameter to pay attention to is `detector_threshold`.
/// [`Akaze::new`] can be used to set this threshold and let all other parameters
/// remain default. You can also use the helpers [`Akaze::sparse`] and
/// [`Akaze::dense`]. The default value of `detector_threshold` is `0.001`.
///
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Akaze {
    /// Default number of sublevels per scale level
    pub num_sublevels: u32,

    /// Maximum octave evolution of the image 2^sigma (coarsest scale sigma units)
    pub max_octave_evolution: u32,

    /// Base scale offset (sigma units)
    pub base_scale_offset: f64,

    /// Percentile level for the contrast factor
    pub contrast_percentile: f64,

    /// Number of bins for the contrast factor histogram
    pub contrast_factor_num_bins: usize,

    /// Factor for the multiscale derivatives
    pub derivative_factor: f64,

    /// Sigma of the Gaussian used to smooth each evolution before taking derivatives
    pub derivative_smoothing: f64,

    /// Detector response threshold to accept point
    pub detector_threshold: f64,

    /// Conductivity function driving the nonlinear diffusion
    pub diffusivity: Diffusivity,

    /// The descriptor to compute for each keypoint
    pub descriptor: DescriptorKind,

    /// Size of the binary descriptor in bits, 0 means full length
    pub descriptor_size: usize,

    /// Number of channels in the descriptor (1, 2, 3)
    pub descriptor_channels: usize,

    /// Actual patch size is 2*pattern_size*point.scale
    pub descriptor_pattern_size: usize,

    /// Skip orientation assignment and compute rotation-variant descriptors
    pub upright: bool,
}

impl Akaze {
    /// This convenience constructor is provided for the very common case
    /// that the detector threshold needs to be modified.
    pub fn new(threshold: f64) -> Self {
        Self {
            detector_threshold: threshold,
            ..Default::default()
        }
    }

    /// Create a `Config` that sparsely detects features.
    ///
    /// Uses a threshold of `0.01` (default is `0.001`).
    pub fn sparse() -> Self {
        Self::new(0.01)
    }

    /// Create a `Config` that densely detects features.
    ///
    /// Uses a threshold of `0.0001` (default is `0.001`).
    pub fn dense() -> Self {
        Self::new(0.0001)
    }

    /// Whether keypoint orientation is skipped.
    ///
    /// The upright M-SURF descriptor implies this regardless of `upright`.
    pub fn is_upright(&self) -> bool {
        self.upright || self.descriptor == DescriptorKind::UprightMsurf
    }

    /// Number of bits of a binary descriptor after applying `descriptor_size`.
    pub fn descriptor_bits(&self) -> usize {
        let full = MLDB_COMPARISONS_PER_CHANNEL * self.descriptor_channels;
        if self.descriptor_size == 0 || self.descriptor_size >= full {
            full
        } else {
            self.descriptor_size
        }
    }

    /// Number of values in every descriptor row: floats for M-SURF, bytes for M-LDB.
    pub fn descriptor_len(&self) -> usize {
        match self.descriptor {
            DescriptorKind::UprightMsurf | DescriptorKind::Msurf => MSURF_DESCRIPTOR_LEN,
            DescriptorKind::Mldb => (self.descriptor_bits() + 7) / 8,
        }
    }

    /// Check that the parameters describe a scale space that can be built.
    pub fn validate(&self) -> Result<(), Error> {
        if self.num_sublevels == 0 {
            return Err(Error::InvalidParameter {
                name: "num_sublevels",
                reason: "must be at least 1",
            });
        }
        if !(self.base_scale_offset > 0.0) {
            return Err(Error::InvalidParameter {
                name: "base_scale_offset",
                reason: "must be positive",
            });
        }
        if !(self.derivative_smoothing > 0.0) {
            return Err(Error::InvalidParameter {
                name: "derivative_smoothing",
                reason: "must be positive",
            });
        }
        if !(1..=3).contains(&self.descriptor_channels) {
            return Err(Error::InvalidParameter {
                name: "descriptor_channels",
                reason: "must be 1, 2 or 3",
            });
        }
        if self.descriptor_pattern_size == 0 {
            return Err(Error::InvalidParameter {
                name: "descriptor_pattern_size",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

impl Default for Akaze {
    fn default() -> Akaze {
        Akaze {
            num_sublevels: 4,
            max_octave_evolution: 4,
            base_scale_offset: 1.6f64,
            contrast_percentile: 0.7f64,
            contrast_factor_num_bins: 300,
            derivative_factor: 1.5f64,
            derivative_smoothing: 1.0f64,
            detector_threshold: 0.001f64,
            diffusivity: Diffusivity::PmG2,
            descriptor: DescriptorKind::Mldb,
            descriptor_size: 0,
            descriptor_channels: 3usize,
            descriptor_pattern_size: 10usize,
            upright: false,
        }
    }
}

impl Akaze {
    /// Build the nonlinear scale space of an image.
    ///
    /// This is the first of the three extraction stages. The returned
    /// [`ScaleSpace`] is then handed to [`Akaze::detect_features`] and
    /// finally to [`Akaze::compute_descriptors`].
    ///
    /// # Arguments
    /// * `image` - The input image, intensities in `[0, 1]`.
    pub fn create_scale_space(&self, image: &GrayFloatImage) -> Result<ScaleSpace, Error> {
        self.validate()?;
        let mut evolutions = self.allocate_evolutions(image.width() as u32, image.height() as u32);
        if evolutions.is_empty() {
            return Err(Error::EmptyScaleSpace {
                width: image.width(),
                height: image.height(),
            });
        }
        self.create_nonlinear_scale_space(&mut evolutions, image);
        Ok(ScaleSpace::new(evolutions))
    }

    /// A nonlinear scale space performs selective blurring to preserve edges.
    ///
    /// # Arguments
    /// * `evolutions` - The output scale space.
    /// * `image` - The input image.
    fn create_nonlinear_scale_space(
        &self,
        evolutions: &mut Vec<EvolutionStep>,
        image: &GrayFloatImage,
    ) {
        trace!("Creating first evolution.");
        evolutions[0].Lt = gaussian_blur(image, self.base_scale_offset as f32);
        trace!("Gaussian blur finished.");
        evolutions[0].Lsmooth = evolutions[0].Lt.clone();
        debug!(
            "Convolving first evolution with sigma={} Gaussian.",
            self.base_scale_offset
        );
        let mut contrast_factor = contrast_factor::compute_contrast_factor(
            &evolutions[0].Lsmooth,
            self.contrast_percentile,
            1.0f64,
            self.contrast_factor_num_bins,
        );
        trace!("Computing contrast factor finished.");
        debug!(
            "Contrast percentile={}, Num bins={}, Initial contrast factor={}",
            self.contrast_percentile, self.contrast_factor_num_bins, contrast_factor
        );
        for i in 1..evolutions.len() {
            trace!("Creating evolution {}.", i);
            if evolutions[i].octave > evolutions[i - 1].octave {
                evolutions[i].Lt = evolutions[i - 1].Lt.half_size();
                trace!("Half-sizing done.");
                contrast_factor *= 0.75;
                debug!(
                    "New image size: {}x{}, new contrast factor: {}",
                    evolutions[i].Lt.width(),
                    evolutions[i].Lt.height(),
                    contrast_factor
                );
            } else {
                evolutions[i].Lt = evolutions[i - 1].Lt.clone();
            }
            evolutions[i].Lsmooth =
                gaussian_blur(&evolutions[i].Lt, self.derivative_smoothing as f32);
            trace!("Gaussian blur finished.");
            evolutions[i].Lx = derivatives::scharr_horizontal(&evolutions[i].Lsmooth, 1);
            trace!("Computing derivative Lx done.");
            evolutions[i].Ly = derivatives::scharr_vertical(&evolutions[i].Lsmooth, 1);
            trace!("Computing derivative Ly done.");
            evolutions[i].Lflow =
                self.diffusivity
                    .conductivity(&evolutions[i].Lx, &evolutions[i].Ly, contrast_factor);
            trace!("Lflow finished.");
            for j in 0..evolutions[i].fed_tau_steps.len() {
                trace!("Starting diffusion step.");
                let step_size = evolutions[i].fed_tau_steps[j];
                nonlinear_diffusion::calculate_step(&mut evolutions[i], step_size as f32);
                trace!("Diffusion step finished with step size {}", step_size);
            }
        }
    }

    /// Find image keypoints in a built scale space.
    ///
    /// This is the second extraction stage. It computes the detector response
    /// of every evolution in place, so it must run before
    /// [`Akaze::compute_descriptors`].
    ///
    /// # Return Value
    /// The resulting keypoints.
    pub fn detect_features(&self, scale_space: &mut ScaleSpace) -> Vec<KeyPoint> {
        self.detector_response(&mut scale_space.evolutions);
        scale_space.responses_computed = true;
        trace!("Computing detector response finished.");
        self.detect_keypoints(&scale_space.evolutions)
    }

    /// Extract features using the Akaze feature extractor.
    ///
    /// This performs all operations end-to-end and only keeps the keypoints
    /// for which a descriptor could be computed.
    ///
    /// # Arguments
    /// * `image` - The input image for which to extract features.
    ///
    /// Returns the keypoints and the descriptors.
    pub fn extract(&self, image: &DynamicImage) -> Result<(Vec<KeyPoint>, Vec<Descriptor>), Error> {
        let float_image = GrayFloatImage::from_dynamic(image);
        let mut scale_space = self.create_scale_space(&float_image)?;
        trace!("Finding image keypoints.");
        let keypoints = self.detect_features(&mut scale_space);
        trace!("Extracting descriptors.");
        let (keypoints, descriptors) = self.extract_descriptors(&scale_space, &keypoints)?;
        trace!("Computing descriptors finished.");
        info!("Extracted {} features", keypoints.len());
        Ok((keypoints, descriptors))
    }
}
