//! Frame-animation (ugoira) transcoding.
//!
//! The frame archive is unpacked into a scoped work directory and handed to
//! an external encoder: ffmpeg's concat demuxer for webm, ImageMagick for
//! gif. The encoder always runs with the work directory as its cwd, stdin
//! bound to null, and stdout redirected straight into the output temp file.
//!
//! A non-zero encoder exit is a soft failure: its stderr is logged and the
//! output file is returned as-is. Failing to unpack the archive or to start
//! the encoder at all is a hard [`TranscodeError`].

use std::fmt::Write as _;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::temp::ScopedTempResource;
use crate::pixiv::FrameManifest;

/// Name of the concat script written next to the extracted frames.
pub const CONCAT_SCRIPT_NAME: &str = "_frames.ffconcat";

/// Default video bitrate passed to ffmpeg.
pub const DEFAULT_VIDEO_BITRATE: &str = "10M";

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("failed to read frame archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("frame {0} listed in the manifest is missing from the archive")]
    MissingFrame(String),

    #[error("failed to start encoder {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error during transcoding: {0}")]
    Io(#[from] io::Error),

    #[error("archive extraction task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Rendition produced from a frame animation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// VP8 webm video.
    Video,
    /// Looping gif.
    LoopingImage,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Video => "webm",
            OutputFormat::LoopingImage => "gif",
        }
    }
}

/// Encoder binaries and settings.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub ffmpeg_path: PathBuf,
    pub convert_path: PathBuf,
    pub video_bitrate: String,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            convert_path: PathBuf::from("convert"),
            video_bitrate: DEFAULT_VIDEO_BITRATE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FrameAnimationTranscoder {
    encoder: EncoderConfig,
    temp_dir: Option<PathBuf>,
}

impl FrameAnimationTranscoder {
    pub fn new(encoder: EncoderConfig) -> Self {
        Self {
            encoder,
            temp_dir: None,
        }
    }

    /// Place work directories and outputs under `dir` instead of the system temp dir.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn encoder(&self) -> &EncoderConfig {
        &self.encoder
    }

    pub async fn to_video(
        &self,
        manifest: &FrameManifest,
        archive: ScopedTempResource,
    ) -> Result<ScopedTempResource, TranscodeError> {
        self.transcode(manifest, archive, OutputFormat::Video).await
    }

    pub async fn to_looping_image(
        &self,
        manifest: &FrameManifest,
        archive: ScopedTempResource,
    ) -> Result<ScopedTempResource, TranscodeError> {
        self.transcode(manifest, archive, OutputFormat::LoopingImage)
            .await
    }

    /// Render `manifest` from the frames in `archive`.
    ///
    /// The archive and the work directory are released when this returns,
    /// whatever the outcome; the caller owns the returned output file.
    pub async fn transcode(
        &self,
        manifest: &FrameManifest,
        archive: ScopedTempResource,
        format: OutputFormat,
    ) -> Result<ScopedTempResource, TranscodeError> {
        let workdir = ScopedTempResource::dir_in(self.temp_dir.as_deref())?;
        extract_archive(archive.path(), workdir.path()).await?;
        release_quietly(archive, "frame archive");

        for frame in &manifest.frames {
            if !workdir.path().join(&frame.file_name).is_file() {
                return Err(TranscodeError::MissingFrame(frame.file_name.clone()));
            }
        }

        let (program, args) = match format {
            OutputFormat::Video => {
                tokio::fs::write(
                    workdir.path().join(CONCAT_SCRIPT_NAME),
                    concat_script(manifest),
                )
                .await?;
                (
                    self.encoder.ffmpeg_path.as_path(),
                    video_args(CONCAT_SCRIPT_NAME, &self.encoder.video_bitrate),
                )
            }
            OutputFormat::LoopingImage => (
                self.encoder.convert_path.as_path(),
                looping_image_args(manifest),
            ),
        };

        let (output, output_file) = ScopedTempResource::file_in(self.temp_dir.as_deref())?;
        run_encoder(program, &args, workdir.path(), output_file).await?;
        release_quietly(workdir, "work directory");

        info!(
            frames = manifest.len(),
            format = format.extension(),
            path = %output.path().display(),
            "animation transcoded"
        );
        Ok(output)
    }
}

/// ffmpeg concat-demuxer script: one `file`/`duration` pair per frame.
pub fn concat_script(manifest: &FrameManifest) -> String {
    let mut script = String::new();
    for frame in &manifest.frames {
        let _ = writeln!(script, "file '{}'", frame.file_name.replace('\'', r"'\''"));
        let _ = writeln!(script, "duration {}", frame.delay_secs());
    }
    script
}

/// ffmpeg arguments for the webm rendition, reading `script` and writing to stdout.
pub fn video_args(script: &str, bitrate: &str) -> Vec<String> {
    [
        "-f", "concat", "-i", script, "-f", "webm", "-c:v", "libvpx", "-b:v", bitrate, "-an",
        "-vsync", "2", "-r", "1000", "-y", "-",
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect()
}

/// ImageMagick arguments for the gif rendition, writing to stdout.
pub fn looping_image_args(manifest: &FrameManifest) -> Vec<String> {
    let mut args = Vec::with_capacity(manifest.len() * 3 + 1);
    for frame in &manifest.frames {
        args.push("-delay".to_string());
        args.push(frame.delay_centis().to_string());
        args.push(frame.file_name.clone());
    }
    args.push("gif:-".to_string());
    args
}

async fn extract_archive(archive: &Path, dest: &Path) -> Result<(), TranscodeError> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<(), TranscodeError> {
        let mut zip = zip::ZipArchive::new(File::open(&archive)?)?;
        debug!(entries = zip.len(), dest = %dest.display(), "extracting frame archive");
        zip.extract(&dest)?;
        Ok(())
    })
    .await?
}

async fn run_encoder(
    program: &Path,
    args: &[String],
    cwd: &Path,
    stdout: File,
) -> Result<(), TranscodeError> {
    debug!(program = %program.display(), ?args, "spawning encoder");

    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| TranscodeError::Spawn {
            program: program.display().to_string(),
            source,
        })?;

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(
            program = %program.display(),
            code = ?output.status.code(),
            stderr = %stderr.trim(),
            "encoder exited with failure, returning its output anyway"
        );
    }
    Ok(())
}

fn release_quietly(resource: ScopedTempResource, what: &str) {
    let path = resource.to_path_buf();
    if let Err(e) = resource.release() {
        warn!(path = %path.display(), error = %e, "failed to remove {}", what);
    }
}
