//! Fakes and stub executables shared by the unit tests.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::ProviderError;
use crate::provider::{RenditionInfo, StreamHandle, StreamProvider, VideoMetadata};

pub(crate) const MB: u64 = 1024 * 1024;

/// Writes an executable bash script called `name` into `dir`.
#[cfg(unix)]
pub(crate) fn install_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script_path = dir.join(name);
    fs::write(
        &script_path,
        format!("#!/usr/bin/env bash\nset -euo pipefail\n{body}\n"),
    )
    .unwrap();
    let mut perms = fs::metadata(&script_path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&script_path, perms).unwrap();
    script_path
}

/// ffmpeg stand-in: logs its arguments to `ffmpeg.log` and concatenates the
/// `-i` inputs into the output so tests can see what was muxed.
#[cfg(unix)]
pub(crate) fn install_ffmpeg(dir: &Path) -> PathBuf {
    let body = format!(
        r#"echo "$*" >> "{log}"
inputs=()
prev=""
for arg in "$@"; do
    if [[ "$prev" == "-i" ]]; then inputs+=("$arg"); fi
    prev="$arg"
done
out="${{@: -1}}"
cat "${{inputs[@]}}" > "$out""#,
        log = dir.join("ffmpeg.log").display()
    );
    install_script(dir, "ffmpeg", &body)
}

#[cfg(unix)]
pub(crate) fn install_failing_ffmpeg(dir: &Path) -> PathBuf {
    let body = format!(
        r#"echo "$*" >> "{log}"
out="${{@: -1}}"
printf partial > "$out"
echo "Conversion failed!" >&2
exit 1"#,
        log = dir.join("ffmpeg.log").display()
    );
    install_script(dir, "ffmpeg", &body)
}

pub(crate) fn ffmpeg_runs(dir: &Path) -> usize {
    fs::read_to_string(dir.join("ffmpeg.log"))
        .map(|log| log.lines().count())
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub(crate) struct FakeVideo {
    pub title: String,
    pub duration_seconds: u64,
    pub renditions: Vec<(String, Option<u64>)>,
    pub video_only: Vec<String>,
    pub audio: bool,
}

impl FakeVideo {
    /// 125 seconds long with 720p (50 MB) and 480p (30 MB) renditions.
    pub fn sample(title: &str) -> Self {
        Self {
            title: title.to_owned(),
            duration_seconds: 125,
            renditions: vec![
                ("720p".to_owned(), Some(50 * MB)),
                ("480p".to_owned(), Some(30 * MB)),
            ],
            video_only: vec!["720p".to_owned(), "480p".to_owned()],
            audio: true,
        }
    }
}

/// In-memory provider that records every call it receives.
#[derive(Default)]
pub(crate) struct FakeProvider {
    videos: Mutex<HashMap<String, FakeVideo>>,
    calls: Mutex<Vec<String>>,
    failing_retrieve: Mutex<Option<String>>,
}

impl FakeProvider {
    pub fn with_video(self, url: &str, video: FakeVideo) -> Self {
        self.videos.lock().insert(url.to_owned(), video);
        self
    }

    /// Makes `retrieve` of `format_id` write a partial payload, then fail.
    pub fn fail_retrieve(self, format_id: &str) -> Self {
        *self.failing_retrieve.lock() = Some(format_id.to_owned());
        self
    }

    pub fn rename_remote(&self, url: &str, title: &str) {
        if let Some(video) = self.videos.lock().get_mut(url) {
            video.title = title.to_owned();
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls whose label starts with `kind`.
    pub fn count(&self, kind: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.starts_with(kind))
            .count()
    }

    fn video(&self, url: &str) -> Result<FakeVideo, ProviderError> {
        if url.contains("flaky") {
            return Err(ProviderError::failed("connection reset"));
        }
        self.videos
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| ProviderError::not_found(format!("{url}: Video unavailable")))
    }
}

impl StreamProvider for FakeProvider {
    fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata, ProviderError> {
        self.calls.lock().push(format!("metadata {url}"));
        let video = self.video(url)?;
        Ok(VideoMetadata {
            title: video.title,
            duration_seconds: video.duration_seconds,
            renditions: video
                .renditions
                .into_iter()
                .map(|(resolution, size_bytes)| RenditionInfo {
                    resolution,
                    size_bytes,
                })
                .collect(),
        })
    }

    fn open_video_stream(
        &self,
        url: &str,
        resolution: &str,
    ) -> Result<Option<StreamHandle>, ProviderError> {
        self.calls.lock().push(format!("video {url} {resolution}"));
        let video = self.video(url)?;
        Ok(video
            .video_only
            .iter()
            .any(|res| res == resolution)
            .then(|| StreamHandle {
                url: url.to_owned(),
                format_id: format!("v{resolution}"),
                ext: "webm".to_owned(),
            }))
    }

    fn open_audio_stream(&self, url: &str) -> Result<Option<StreamHandle>, ProviderError> {
        self.calls.lock().push(format!("audio {url}"));
        let video = self.video(url)?;
        Ok(video.audio.then(|| StreamHandle {
            url: url.to_owned(),
            format_id: "a140".to_owned(),
            ext: "m4a".to_owned(),
        }))
    }

    fn retrieve(&self, handle: &StreamHandle, dest: &Path) -> Result<(), ProviderError> {
        self.calls.lock().push(format!("retrieve {}", handle.format_id));
        if self.failing_retrieve.lock().as_deref() == Some(handle.format_id.as_str()) {
            fs::write(dest, "[partial")
                .map_err(|err| ProviderError::failed(err.to_string()))?;
            return Err(ProviderError::failed("download interrupted"));
        }
        fs::write(dest, format!("[{}]", handle.format_id))
            .map_err(|err| ProviderError::failed(err.to_string()))
    }
}
