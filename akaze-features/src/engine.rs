//! The feature engine seen by the pipeline.
//!
//! An engine is a session that goes through three stages exactly once and in
//! order: build the scale space, detect, describe. Calls made out of order are
//! rejected and leave the session as it was.

use crate::config::Options;
use akaze::image::GrayFloatImage;
use akaze::{Akaze, Descriptor, KeyPoint, ScaleSpace};
use image::GrayImage;
use log::*;
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{operation} is not allowed, the session {stage}")]
    OutOfOrder {
        operation: &'static str,
        stage: Stage,
    },
    #[error("image is {actual_width}x{actual_height} but the options declare {width}x{height}")]
    ImageSizeMismatch {
        width: u32,
        height: u32,
        actual_width: usize,
        actual_height: usize,
    },
    #[error("option {name} cannot be {value}")]
    InvalidOption { name: &'static str, value: f64 },
    #[error("engine returned {rows} descriptor rows for {keypoints} keypoints")]
    RowCountMismatch { keypoints: usize, rows: usize },
    #[error(transparent)]
    Akaze(#[from] akaze::Error),
}

/// How far a session has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    ScaleSpaceBuilt,
    FeaturesDetected,
    DescriptorsComputed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Idle => "has no scale space yet",
            Stage::ScaleSpaceBuilt => "has only built its scale space",
            Stage::FeaturesDetected => "has already detected features",
            Stage::DescriptorsComputed => "has already computed descriptors",
        })
    }
}

/// A staged feature extractor.
pub trait FeatureEngine {
    /// Check and translate `options` ahead of [`FeatureEngine::build_scale_space`],
    /// so that building does no setup work of its own.
    fn configure(&mut self, _options: &Options) -> Result<(), EngineError> {
        Ok(())
    }

    /// Build the scale space of `image` with the given options.
    fn build_scale_space(
        &mut self,
        image: &GrayFloatImage,
        options: &Options,
    ) -> Result<(), EngineError>;

    /// Detect keypoints in the scale space, in a stable order.
    fn detect_features(&mut self) -> Result<Vec<KeyPoint>, EngineError>;

    /// Describe `keypoints`. The result is co-indexed with the input and
    /// `None` marks a keypoint that could not be described.
    fn compute_descriptors(
        &mut self,
        keypoints: &[KeyPoint],
    ) -> Result<Vec<Option<Descriptor>>, EngineError>;

    /// Number of values in every descriptor row. Known once the scale space is built.
    fn descriptor_len(&self) -> Result<usize, EngineError>;

    /// The evolutions of the scale space as 8-bit images, finest first.
    fn scale_space_images(&self) -> Result<Vec<GrayImage>, EngineError>;
}

/// Translate the run options into AKAZE parameters.
pub fn akaze_from_options(options: &Options) -> Result<Akaze, EngineError> {
    let non_negative = |name, value: i32| {
        u32::try_from(value).map_err(|_| EngineError::InvalidOption {
            name,
            value: value as f64,
        })
    };
    let akaze = Akaze {
        num_sublevels: non_negative("nsublevels", options.nsublevels)?,
        max_octave_evolution: non_negative("omax", options.omax)?,
        base_scale_offset: options.soffset,
        detector_threshold: options.dthreshold,
        derivative_smoothing: options.sderivatives,
        diffusivity: options.diffusivity,
        descriptor: options.descriptor,
        descriptor_size: options.descriptor_size as usize,
        descriptor_channels: options.descriptor_channels as usize,
        descriptor_pattern_size: non_negative(
            "descriptor_pattern_size",
            options.descriptor_pattern_size,
        )? as usize,
        upright: options.upright,
        ..Akaze::default()
    };
    if !(akaze.detector_threshold >= 0.0) {
        return Err(EngineError::InvalidOption {
            name: "dthreshold",
            value: akaze.detector_threshold,
        });
    }
    akaze.validate()?;
    Ok(akaze)
}

#[derive(Debug, Default)]
enum Session {
    #[default]
    Idle,
    ScaleSpaceBuilt(Akaze, ScaleSpace),
    FeaturesDetected(Akaze, ScaleSpace),
    DescriptorsComputed(Akaze, ScaleSpace),
}

impl Session {
    fn stage(&self) -> Stage {
        match self {
            Session::Idle => Stage::Idle,
            Session::ScaleSpaceBuilt(..) => Stage::ScaleSpaceBuilt,
            Session::FeaturesDetected(..) => Stage::FeaturesDetected,
            Session::DescriptorsComputed(..) => Stage::DescriptorsComputed,
        }
    }

    fn parts(&self) -> Option<(&Akaze, &ScaleSpace)> {
        match self {
            Session::Idle => None,
            Session::ScaleSpaceBuilt(akaze, scale_space)
            | Session::FeaturesDetected(akaze, scale_space)
            | Session::DescriptorsComputed(akaze, scale_space) => Some((akaze, scale_space)),
        }
    }
}

/// The AKAZE implementation of [`FeatureEngine`].
#[derive(Debug, Default)]
pub struct AkazeEngine {
    session: Session,
    /// Parameters prepared by `configure` for the options they came from.
    configured: Option<(Options, Akaze)>,
}

impl AkazeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> Stage {
        self.session.stage()
    }

    fn prepare(options: &Options) -> Result<Akaze, EngineError> {
        let akaze = akaze_from_options(options)?;
        debug!("Building the scale space with {:?}", akaze);
        Ok(akaze)
    }

    fn out_of_order(&self, operation: &'static str) -> EngineError {
        EngineError::OutOfOrder {
            operation,
            stage: self.stage(),
        }
    }
}

impl FeatureEngine for AkazeEngine {
    fn configure(&mut self, options: &Options) -> Result<(), EngineError> {
        if self.stage() != Stage::Idle {
            return Err(self.out_of_order("configuring the engine"));
        }
        self.configured = Some((*options, Self::prepare(options)?));
        Ok(())
    }

    fn build_scale_space(
        &mut self,
        image: &GrayFloatImage,
        options: &Options,
    ) -> Result<(), EngineError> {
        if self.stage() != Stage::Idle {
            return Err(self.out_of_order("building the scale space"));
        }
        if (options.img_width as usize, options.img_height as usize)
            != (image.width(), image.height())
        {
            return Err(EngineError::ImageSizeMismatch {
                width: options.img_width,
                height: options.img_height,
                actual_width: image.width(),
                actual_height: image.height(),
            });
        }
        let akaze = match self.configured.take() {
            Some((configured, akaze)) if configured == *options => akaze,
            _ => Self::prepare(options)?,
        };
        let scale_space = akaze.create_scale_space(image)?;
        self.session = Session::ScaleSpaceBuilt(akaze, scale_space);
        Ok(())
    }

    fn detect_features(&mut self) -> Result<Vec<KeyPoint>, EngineError> {
        match std::mem::take(&mut self.session) {
            Session::ScaleSpaceBuilt(akaze, mut scale_space) => {
                let keypoints = akaze.detect_features(&mut scale_space);
                debug!("Detected {} keypoints", keypoints.len());
                self.session = Session::FeaturesDetected(akaze, scale_space);
                Ok(keypoints)
            }
            other => {
                self.session = other;
                Err(self.out_of_order("detecting features"))
            }
        }
    }

    fn compute_descriptors(
        &mut self,
        keypoints: &[KeyPoint],
    ) -> Result<Vec<Option<Descriptor>>, EngineError> {
        match std::mem::take(&mut self.session) {
            Session::FeaturesDetected(akaze, scale_space) => {
                let result = akaze.compute_descriptors(&scale_space, keypoints);
                self.session = Session::DescriptorsComputed(akaze, scale_space);
                Ok(result?)
            }
            other => {
                self.session = other;
                Err(self.out_of_order("computing descriptors"))
            }
        }
    }

    fn descriptor_len(&self) -> Result<usize, EngineError> {
        self.session
            .parts()
            .map(|(akaze, _)| akaze.descriptor_len())
            .ok_or_else(|| self.out_of_order("querying the descriptor length"))
    }

    fn scale_space_images(&self) -> Result<Vec<GrayImage>, EngineError> {
        self.session
            .parts()
            .map(|(_, scale_space)| scale_space.evolution_images())
            .ok_or_else(|| self.out_of_order("rendering the scale space"))
    }
}
