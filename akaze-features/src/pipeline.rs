use crate::config::Options;
use crate::engine::{EngineError, FeatureEngine};
use crate::timer::{time, Timings};
use akaze::image::GrayFloatImage;
use akaze::{Descriptor, KeyPoint};
use log::*;

/// Keypoints with their descriptor rows, index for index.
#[derive(Debug, Clone, PartialEq)]
pub struct Features {
    pub keypoints: Vec<KeyPoint>,
    pub descriptors: Vec<Descriptor>,
    /// Number of values in every row.
    pub dimension: usize,
}

impl Features {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Run the three engine stages on `image`, timing each one.
///
/// The engine is configured before the clock starts, so the scale space time
/// covers the build alone.
///
/// Keypoints the engine could not describe are dropped together with their
/// empty rows, so the result keeps the detection order of the survivors.
pub fn run<E: FeatureEngine + ?Sized>(
    engine: &mut E,
    image: &GrayFloatImage,
    options: &Options,
) -> Result<(Features, Timings), EngineError> {
    engine.configure(options)?;
    let (built, scale_space) = time(|| engine.build_scale_space(image, options));
    built?;
    let (detected, detection) = time(|| engine.detect_features());
    let detected = detected?;
    let (rows, description) = time(|| engine.compute_descriptors(&detected));
    let rows = rows?;
    if rows.len() != detected.len() {
        return Err(EngineError::RowCountMismatch {
            keypoints: detected.len(),
            rows: rows.len(),
        });
    }

    let (keypoints, descriptors): (Vec<KeyPoint>, Vec<Descriptor>) = detected
        .into_iter()
        .zip(rows)
        .filter_map(|(keypoint, row)| Some((keypoint, row?)))
        .unzip();
    debug!("{} keypoints kept after description", keypoints.len());
    let features = Features {
        keypoints,
        descriptors,
        dimension: engine.descriptor_len()?,
    };
    let timings = Timings {
        scale_space,
        detection,
        description,
    };
    Ok((features, timings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use akaze::image::GrayFloatImage;
    use image::GrayImage;
    use std::time::Duration;

    fn keypoint(x: f32) -> KeyPoint {
        KeyPoint {
            point: (x, 2.0 * x),
            response: 0.5,
            size: 3.0,
            octave: 0,
            class_id: 0,
            angle: 0.25,
        }
    }

    /// Scripted engine that records the calls it receives.
    #[derive(Default)]
    struct MockEngine {
        calls: Vec<&'static str>,
        keypoints: Vec<KeyPoint>,
        keep: Vec<bool>,
        fail_build: bool,
        extra_row: bool,
        configure_delay: Duration,
    }

    impl FeatureEngine for MockEngine {
        fn configure(&mut self, _options: &Options) -> Result<(), EngineError> {
            self.calls.push("configure");
            std::thread::sleep(self.configure_delay);
            Ok(())
        }

        fn build_scale_space(
            &mut self,
            _image: &GrayFloatImage,
            _options: &Options,
        ) -> Result<(), EngineError> {
            self.calls.push("build");
            if self.fail_build {
                Err(akaze::Error::EmptyScaleSpace {
                    width: 1,
                    height: 1,
                }
                .into())
            } else {
                Ok(())
            }
        }

        fn detect_features(&mut self) -> Result<Vec<KeyPoint>, EngineError> {
            self.calls.push("detect");
            Ok(self.keypoints.clone())
        }

        fn compute_descriptors(
            &mut self,
            keypoints: &[KeyPoint],
        ) -> Result<Vec<Option<Descriptor>>, EngineError> {
            self.calls.push("describe");
            let mut rows: Vec<_> = keypoints
                .iter()
                .zip(&self.keep)
                .map(|(keypoint, &keep)| {
                    keep.then(|| Descriptor::Binary(vec![keypoint.point.0 as u8, 0]))
                })
                .collect();
            if self.extra_row {
                rows.push(None);
            }
            Ok(rows)
        }

        fn descriptor_len(&self) -> Result<usize, EngineError> {
            Ok(2)
        }

        fn scale_space_images(&self) -> Result<Vec<GrayImage>, EngineError> {
            Ok(vec![])
        }
    }

    #[test]
    fn stages_are_called_in_order() {
        let mut engine = MockEngine {
            keypoints: vec![keypoint(1.0)],
            keep: vec![true],
            ..Default::default()
        };
        run(&mut engine, &GrayFloatImage::new(4, 4), &Options::DEFAULT).unwrap();
        assert_eq!(engine.calls, ["configure", "build", "detect", "describe"]);
    }

    #[test]
    fn configuration_is_not_timed() {
        let mut engine = MockEngine {
            configure_delay: Duration::from_millis(50),
            ..Default::default()
        };
        let (_, timings) =
            run(&mut engine, &GrayFloatImage::new(4, 4), &Options::DEFAULT).unwrap();
        assert!(timings.scale_space < Duration::from_millis(50));
    }

    #[test]
    fn dropped_rows_drop_their_keypoints() {
        let mut engine = MockEngine {
            keypoints: (1..=5).map(|x| keypoint(x as f32)).collect(),
            keep: vec![true, false, true, false, true],
            ..Default::default()
        };
        let (features, _) =
            run(&mut engine, &GrayFloatImage::new(4, 4), &Options::DEFAULT).unwrap();
        assert_eq!(features.len(), 3);
        assert_eq!(features.descriptors.len(), 3);
        assert_eq!(features.dimension, 2);
        let xs: Vec<f32> = features.keypoints.iter().map(|kp| kp.point.0).collect();
        assert_eq!(xs, [1.0, 3.0, 5.0]);
        for (keypoint, row) in features.keypoints.iter().zip(&features.descriptors) {
            assert_eq!(row, &Descriptor::Binary(vec![keypoint.point.0 as u8, 0]));
        }
    }

    #[test]
    fn failed_build_stops_the_run() {
        let mut engine = MockEngine {
            fail_build: true,
            ..Default::default()
        };
        let result = run(&mut engine, &GrayFloatImage::new(4, 4), &Options::DEFAULT);
        assert!(matches!(result, Err(EngineError::Akaze(_))));
        assert_eq!(engine.calls, ["configure", "build"]);
    }

    #[test]
    fn misaligned_rows_are_an_error() {
        let mut engine = MockEngine {
            keypoints: vec![keypoint(1.0)],
            keep: vec![true],
            extra_row: true,
            ..Default::default()
        };
        assert!(matches!(
            run(&mut engine, &GrayFloatImage::new(4, 4), &Options::DEFAULT),
            Err(EngineError::RowCountMismatch {
                keypoints: 1,
                rows: 2
            })
        ));
    }
}
