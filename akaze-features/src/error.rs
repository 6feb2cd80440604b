use crate::engine::EngineError;
use std::path::PathBuf;

/// Every way a run of the tool can fail.
///
/// All of them are fatal; the binary maps each to a failing exit status.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Usage(&'static str),
    #[error("missing value for {flag}")]
    MissingArgument { flag: &'static str },
    #[error("cannot load image from file {}", path.display())]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("feature engine failed")]
    Engine(#[from] EngineError),
    #[error("cannot write {}", path.display())]
    Serialization {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("cannot show keypoints, failed to {step}")]
    Display {
        step: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn serialization(
        path: impl Into<PathBuf>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Error::Serialization {
            path: path.into(),
            source: source.into(),
        }
    }
}
