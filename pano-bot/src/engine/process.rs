//! Engine adapter that runs an external stitcher program.
//!
//! Contract with the program:
//!
//! ```text
//! {program} {args..} --output <dir>/panorama.png <dir>/input_000.png ...
//! ```
//!
//! The exit code is the [`StitchStatus`] code; on exit code 0 the program
//! must have written the output file.

use super::{DecodedImage, EngineError, EngineOutput, StitchStatus, StitchingEngine};
use async_trait::async_trait;
use pano_common::config::StitcherConfig;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Inputs below this count cannot form a panorama.
const MIN_IMAGES: usize = 2;

const OUTPUT_FILE: &str = "panorama.png";

/// Runs a stitcher executable over temporary PNG files.
#[derive(Debug, Clone)]
pub struct ProcessStitcher {
    program: String,
    args: Vec<String>,
}

impl ProcessStitcher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &StitcherConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone())
    }
}

/// Write every image as `input_NNN.png` into `dir`.
fn write_inputs(dir: &Path, images: &[DecodedImage]) -> Result<Vec<PathBuf>, EngineError> {
    images
        .iter()
        .enumerate()
        .map(|(i, img)| {
            let path = dir.join(format!("input_{i:03}.png"));
            img.save_with_format(&path, image::ImageFormat::Png)
                .map_err(|e| EngineError::Encode(e.to_string()))?;
            Ok(path)
        })
        .collect()
}

#[async_trait]
impl StitchingEngine for ProcessStitcher {
    async fn stitch(&self, images: Vec<DecodedImage>) -> Result<EngineOutput, EngineError> {
        if images.len() < MIN_IMAGES {
            tracing::debug!(images = images.len(), "Too few images, not invoking stitcher");
            return Ok(EngineOutput::failed(StitchStatus::NeedMoreImages));
        }

        let workdir = tempfile::tempdir()?;
        let dir = workdir.path().to_path_buf();
        let image_count = images.len();

        let inputs = tokio::task::spawn_blocking(move || write_inputs(&dir, &images))
            .await
            .map_err(|e| EngineError::Io(std::io::Error::other(e)))??;

        let output_path = workdir.path().join(OUTPUT_FILE);

        tracing::info!(
            program = %self.program,
            images = image_count,
            "Running stitcher"
        );

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg("--output")
            .arg(&output_path)
            .args(&inputs)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| EngineError::Spawn(format!("{}: {e}", self.program)))?;

        // Killed by a signal: no exit code.
        let code = output.status.code().unwrap_or(-1);
        let status = StitchStatus::from_code(code);

        if status != StitchStatus::Ok {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::info!(code, stderr = %stderr.trim(), "Stitcher finished without panorama");
            return Ok(EngineOutput::failed(status));
        }

        let bytes = match tokio::fs::read(&output_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::MissingOutput)
            }
            Err(e) => return Err(e.into()),
        };

        let panorama = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
            .await
            .map_err(|e| EngineError::Io(std::io::Error::other(e)))?
            .map_err(|e| EngineError::Decode(e.to_string()))?;

        Ok(EngineOutput::success(panorama))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use image::{DynamicImage, GenericImageView, Rgb, RgbImage};

    fn solid(width: u32, height: u32, value: u8) -> DecodedImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([value, value, value])))
    }

    /// A stitcher implemented as a shell snippet; `$2` is the output path,
    /// `$3..` the inputs.
    fn shell(script: &str) -> ProcessStitcher {
        ProcessStitcher::new("sh", vec!["-c".into(), script.into(), "stitcher".into()])
    }

    #[tokio::test]
    async fn test_single_image_needs_more_without_spawning() {
        let engine = ProcessStitcher::new("/nonexistent/stitcher", vec![]);
        let out = engine.stitch(vec![solid(4, 4, 10)]).await.unwrap();
        assert_eq!(out.status, StitchStatus::NeedMoreImages);
        assert!(out.panorama.is_none());

        let out = engine.stitch(vec![]).await.unwrap();
        assert_eq!(out.status, StitchStatus::NeedMoreImages);
    }

    #[tokio::test]
    async fn test_success_reads_output() {
        let engine = shell(r#"cp "$3" "$2""#);
        let out = engine
            .stitch(vec![solid(6, 3, 200), solid(6, 3, 100)])
            .await
            .unwrap();

        assert_eq!(out.status, StitchStatus::Ok);
        let panorama = out.panorama.unwrap();
        assert_eq!(panorama.dimensions(), (6, 3));
    }

    #[tokio::test]
    async fn test_exit_code_is_status() {
        let out = shell("exit 1")
            .stitch(vec![solid(2, 2, 1), solid(2, 2, 2)])
            .await
            .unwrap();
        assert_eq!(out.status, StitchStatus::NeedMoreImages);

        let out = shell("echo 'homography failed' >&2; exit 2")
            .stitch(vec![solid(2, 2, 1), solid(2, 2, 2)])
            .await
            .unwrap();
        assert_eq!(out.status, StitchStatus::HomographyEstimationFailed);
    }

    #[tokio::test]
    async fn test_success_without_output_is_an_error() {
        let err = shell("exit 0")
            .stitch(vec![solid(2, 2, 1), solid(2, 2, 2)])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingOutput));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let engine = ProcessStitcher::new("/nonexistent/stitcher", vec![]);
        let err = engine
            .stitch(vec![solid(2, 2, 1), solid(2, 2, 2)])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Spawn(_)));
    }

    #[test]
    fn test_from_config() {
        let engine = ProcessStitcher::from_config(&StitcherConfig::default());
        assert_eq!(engine.program, "pano-stitcher");
        assert_eq!(engine.args, vec!["--mode".to_string(), "scans".to_string()]);
    }
}
