//! Extract AKAZE keypoints and descriptors from an image.
//!
//! [`run`] is the whole tool: it parses the arguments, loads the image, drives
//! the engine stages, prints a timing summary and then saves and shows what
//! was requested.

pub mod config;
pub mod engine;
mod error;
pub mod image_loader;
pub mod pipeline;
pub mod serialize;
pub mod timer;
pub mod visualize;

pub use error::Error;

use crate::engine::{AkazeEngine, FeatureEngine};
use crate::timer::Timings;
use log::*;
use std::path::{Path, PathBuf};

/// Where `--save_scale_space` writes the evolution images.
pub const SCALE_SPACE_DIR: &str = "../output/images";

/// Settings of a run that do not come from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Show the keypoint overlay and wait for the user at the end.
    pub display: bool,
    pub scale_space_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            display: false,
            scale_space_dir: PathBuf::from(SCALE_SPACE_DIR),
        }
    }
}

/// What a completed run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub keypoints: usize,
    pub dimension: usize,
    pub timings: Timings,
    /// The keypoint file, if one was written.
    pub output_path: Option<PathBuf>,
}

/// Run the tool on `args`, the arguments that follow the program name.
pub fn run<I, S>(args: I, run_config: &RunConfig) -> Result<Report, Error>
where
    I: IntoIterator<Item = S>,
    S: Into<std::ffi::OsString>,
{
    let config = match config::parse_args(args) {
        Ok(config) => config,
        Err(error @ Error::Usage(_)) => {
            println!("{}", config::USAGE);
            return Err(error);
        }
        Err(error) => return Err(error),
    };
    if config.options.verbosity {
        if log::max_level() < LevelFilter::Debug {
            log::set_max_level(LevelFilter::Debug);
        }
        println!("Check AKAZE options:\n{}", config.options);
    }

    let image = image_loader::load_image(&config.image_path)?;
    let options = config
        .options
        .with_image_size(image.width(), image.height());

    let mut engine = AkazeEngine::new();
    let (features, timings) = pipeline::run(&mut engine, &image.normalized, &options)?;
    print!("{}", summary(features.len(), &timings, options.verbosity));

    if options.save_scale_space {
        save_scale_space(&engine, &run_config.scale_space_dir)?;
    }
    let output_path = if options.save_keypoints {
        serialize::save_keypoints(&config.output_path, &features)?;
        Some(config.output_path)
    } else {
        None
    };

    if run_config.display {
        show(&image, &features, options.is_upright())?;
    }

    Ok(Report {
        keypoints: features.len(),
        dimension: features.dimension,
        timings,
        output_path,
    })
}

/// The console report of a run. Verbose runs also break out the scale space time.
fn summary(keypoints: usize, timings: &Timings, verbose: bool) -> String {
    let mut text = format!("Number of points: {}\n", keypoints);
    if verbose {
        text += &format!("Time Scale Space: {} ms\n", timings.scale_space_ms());
    }
    text += &format!("Time Detector: {} ms\n", timings.detector_ms());
    text += &format!("Time Descriptor: {} ms\n", timings.descriptor_ms());
    text
}

/// Write every evolution of the engine's scale space as `evolution_NN.png`.
fn save_scale_space(engine: &dyn FeatureEngine, dir: &Path) -> Result<(), Error> {
    std::fs::create_dir_all(dir).map_err(|e| Error::serialization(dir, e))?;
    let images = engine.scale_space_images()?;
    for (index, image) in images.iter().enumerate() {
        let path = dir.join(format!("evolution_{:02}.png", index));
        image
            .save(&path)
            .map_err(|e| Error::serialization(&path, e))?;
    }
    info!("Saved {} evolutions to {}", images.len(), dir.display());
    Ok(())
}

#[cfg(feature = "display")]
fn show(
    image: &image_loader::LoadedImage,
    features: &pipeline::Features,
    upright: bool,
) -> Result<(), Error> {
    let overlay = visualize::draw_keypoints(&image.gray, &features.keypoints, upright);
    visualize::show(&overlay)
}

#[cfg(not(feature = "display"))]
fn show(
    _image: &image_loader::LoadedImage,
    _features: &pipeline::Features,
    _upright: bool,
) -> Result<(), Error> {
    warn!("built without the display feature, not showing keypoints");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn verbose_summary_reports_the_scale_space_time() {
        let timings = Timings {
            scale_space: Duration::from_secs(1),
            detection: Duration::from_secs(2),
            description: Duration::from_millis(500),
        };
        assert_eq!(
            summary(12, &timings, false),
            "Number of points: 12\nTime Detector: 3000 ms\nTime Descriptor: 500 ms\n"
        );
        let verbose = summary(12, &timings, true);
        let lines: Vec<&str> = verbose.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "Time Scale Space: 1000 ms");
    }
}
