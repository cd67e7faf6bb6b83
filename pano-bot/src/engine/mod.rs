//! Stitching engine boundary.
//!
//! The engine owns the panorama computation. PanoBot only hands it decoded
//! images and reads back a status code plus, on success, the panorama.

mod process;

pub use self::process::ProcessStitcher;

use async_trait::async_trait;
use thiserror::Error;

/// A decoded raster image.
pub type DecodedImage = image::DynamicImage;

/// Engine status codes (numbering follows OpenCV's `Stitcher::Status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StitchStatus {
    Ok,
    NeedMoreImages,
    HomographyEstimationFailed,
    CameraParamsAdjustFailed,
    Other(i32),
}

impl StitchStatus {
    pub const fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::NeedMoreImages,
            2 => Self::HomographyEstimationFailed,
            3 => Self::CameraParamsAdjustFailed,
            other => Self::Other(other),
        }
    }

    pub const fn code(&self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::NeedMoreImages => 1,
            Self::HomographyEstimationFailed => 2,
            Self::CameraParamsAdjustFailed => 3,
            Self::Other(code) => *code,
        }
    }
}

/// What the engine returned for one invocation.
#[derive(Debug, Clone)]
pub struct EngineOutput {
    pub status: StitchStatus,
    /// Present when `status` is [`StitchStatus::Ok`].
    pub panorama: Option<DecodedImage>,
}

impl EngineOutput {
    pub fn success(panorama: DecodedImage) -> Self {
        Self {
            status: StitchStatus::Ok,
            panorama: Some(panorama),
        }
    }

    pub fn failed(status: StitchStatus) -> Self {
        Self {
            status,
            panorama: None,
        }
    }
}

/// Faults of the engine adapter itself, as opposed to a non-OK status.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to start stitcher: {0}")]
    Spawn(String),

    #[error("Stitcher I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode input image: {0}")]
    Encode(String),

    #[error("Failed to decode panorama: {0}")]
    Decode(String),

    #[error("Stitcher reported success but wrote no panorama")]
    MissingOutput,
}

/// A panorama stitching capability.
#[async_trait]
pub trait StitchingEngine: Send + Sync {
    /// Stitch `images` (in any order) into one panorama.
    async fn stitch(&self, images: Vec<DecodedImage>) -> Result<EngineOutput, EngineError>;
}
