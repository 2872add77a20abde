//! ffmpeg invocation that joins a video-only and an audio-only file.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::{ServiceError, ServiceResult};

/// Lines of ffmpeg stderr kept in a [`ServiceError::MuxFailure`].
const STDERR_TAIL_LINES: usize = 20;

/// Arguments for one mux: copy the video stream, encode audio to AAC, write
/// an MP4 container.
#[derive(Debug, Clone)]
pub struct MuxCommand {
    video: PathBuf,
    audio: PathBuf,
    output: PathBuf,
}

impl MuxCommand {
    pub fn new(
        video: impl AsRef<Path>,
        audio: impl AsRef<Path>,
        output: impl AsRef<Path>,
    ) -> Self {
        Self {
            video: video.as_ref().to_path_buf(),
            audio: audio.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
        }
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec!["-y".into(), "-v".into(), "error".into()];
        args.push("-i".into());
        args.push(self.video.to_string_lossy().to_string());
        args.push("-i".into());
        args.push(self.audio.to_string_lossy().to_string());
        // First video stream of input 0, first audio stream of input 1.
        args.extend(["-map", "0:v:0", "-map", "1:a:0"].map(String::from));
        args.extend(["-c:v", "copy", "-c:a", "aac"].map(String::from));
        // The output may not end in .mp4 while it is being written.
        args.extend(["-f", "mp4"].map(String::from));
        args.push(self.output.to_string_lossy().to_string());
        args
    }
}

#[derive(Debug, Clone)]
pub struct Muxer {
    program: PathBuf,
    timeout: Duration,
}

impl Muxer {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.ffmpeg_bin, settings.mux_timeout)
    }

    /// Runs ffmpeg to completion. A non-zero exit, a spawn error or the
    /// deadline passing all yield [`ServiceError::MuxFailure`]; the child is
    /// killed when the deadline passes.
    pub async fn run(&self, cmd: &MuxCommand) -> ServiceResult<()> {
        let args = cmd.build_args();
        debug!("Running mux: {} {}", self.program.display(), args.join(" "));

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                ServiceError::mux_failed(
                    format!("unable to start {}: {err}", self.program.display()),
                    None,
                    None,
                )
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "ffmpeg timed out after {} seconds, killing process",
                    self.timeout.as_secs_f64()
                );
                return Err(ServiceError::mux_failed(
                    format!(
                        "ffmpeg timed out after {:.1} seconds",
                        self.timeout.as_secs_f64()
                    ),
                    None,
                    None,
                ));
            }
        };

        if output.status.success() {
            return Ok(());
        }

        let stderr = stderr_tail(&output.stderr);
        Err(ServiceError::mux_failed(
            format!("ffmpeg exited with {}", output.status),
            output.status.code(),
            (!stderr.is_empty()).then_some(stderr),
        ))
    }
}

fn stderr_tail(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let lines: Vec<&str> = text.lines().filter(|line| !line.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
