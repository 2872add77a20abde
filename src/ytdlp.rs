//! [`StreamProvider`] backed by the `yt-dlp` command line tool.
//!
//! Metadata comes from `yt-dlp --dump-single-json`; payloads are pulled with
//! `yt-dlp --format <id>` straight into the destination path chosen by the
//! caller.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::Settings;
use crate::error::ProviderError;
use crate::provider::{RenditionInfo, StreamHandle, StreamProvider, VideoMetadata};

/// How long a dumped info document is reused for stream selection.
const INFO_TTL: Duration = Duration::from_secs(120);

/// stderr fragments yt-dlp prints when the resource itself does not exist.
const NOT_FOUND_MARKERS: &[&str] = &[
    "video unavailable",
    "is not a valid url",
    "unsupported url",
    "incomplete youtube id",
    "private video",
    "has been removed",
    "does not exist",
    "http error 404",
];

/// Subset of the `--dump-single-json` payload the pipeline needs.
#[derive(Debug, Deserialize)]
struct VideoInfo {
    title: Option<String>,
    fulltitle: Option<String>,
    duration: Option<f64>,
    #[serde(default)]
    formats: Vec<FormatInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct FormatInfo {
    format_id: Option<String>,
    format_note: Option<String>,
    height: Option<i64>,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
}

impl FormatInfo {
    fn has_video(&self) -> bool {
        has_codec(self.vcodec.as_deref())
    }

    fn has_audio(&self) -> bool {
        has_codec(self.acodec.as_deref())
    }

    /// `720p` matches a `720p` note as well as any 720 pixel high stream
    /// (`720p60`, `720p HDR`).
    fn matches_resolution(&self, resolution: &str) -> bool {
        self.format_note.as_deref() == Some(resolution)
            || self
                .height
                .is_some_and(|height| format!("{height}p") == resolution)
    }

    fn size_bytes(&self) -> Option<u64> {
        self.filesize
            .or(self.filesize_approx)
            .filter(|size| *size > 0.0)
            .map(|size| size as u64)
    }

    fn to_handle(&self, url: &str) -> Option<StreamHandle> {
        let format_id = self.format_id.as_deref()?.trim();
        if format_id.is_empty() {
            return None;
        }
        Some(StreamHandle {
            url: url.to_owned(),
            format_id: format_id.to_owned(),
            ext: self.ext.clone().unwrap_or_else(|| "bin".to_owned()),
        })
    }
}

fn has_codec(codec: Option<&str>) -> bool {
    codec.is_some_and(|codec| !codec.is_empty() && !codec.eq_ignore_ascii_case("none"))
}

impl VideoInfo {
    fn title_or(&self, fallback: &str) -> String {
        self.fulltitle
            .as_deref()
            .or(self.title.as_deref())
            .filter(|title| !title.trim().is_empty())
            .unwrap_or(fallback)
            .to_owned()
    }

    fn duration_seconds(&self) -> u64 {
        self.duration
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(|secs| secs.round() as u64)
            .unwrap_or(0)
    }

    /// One entry per configured resolution that has a video-carrying format.
    fn renditions(&self, resolutions: &[String]) -> Vec<RenditionInfo> {
        resolutions
            .iter()
            .filter_map(|resolution| {
                self.formats
                    .iter()
                    .find(|format| format.has_video() && format.matches_resolution(resolution))
                    .map(|format| RenditionInfo {
                        resolution: resolution.clone(),
                        size_bytes: format.size_bytes(),
                    })
            })
            .collect()
    }

    fn video_only(&self, resolution: &str) -> Option<&FormatInfo> {
        self.formats.iter().find(|format| {
            format.has_video() && !format.has_audio() && format.matches_resolution(resolution)
        })
    }

    fn audio_only(&self) -> Option<&FormatInfo> {
        self.formats
            .iter()
            .find(|format| format.has_audio() && !format.has_video())
    }
}

pub struct YtDlpProvider {
    program: PathBuf,
    resolutions: Vec<String>,
    cookies: Option<PathBuf>,
    recent: Mutex<HashMap<String, (Instant, Arc<VideoInfo>)>>,
}

impl YtDlpProvider {
    pub fn new(program: impl Into<PathBuf>, resolutions: Vec<String>) -> Self {
        Self {
            program: program.into(),
            resolutions,
            cookies: None,
            recent: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let mut provider = Self::new(&settings.ytdlp_bin, settings.resolutions.clone());
        provider.cookies = settings.cookies_file.clone();
        provider
    }

    pub fn with_cookies(mut self, cookies: impl Into<PathBuf>) -> Self {
        self.cookies = Some(cookies.into());
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        if let Some(cookies) = self.cookies.as_ref().filter(|path| path.exists()) {
            command.arg("--cookies").arg(cookies);
        }
        command
    }

    /// Runs `--dump-single-json` and remembers the result for stream lookups.
    fn dump_info(&self, url: &str) -> Result<Arc<VideoInfo>, ProviderError> {
        let mut command = self.command();
        command
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--no-warnings")
            .arg("--no-progress")
            .arg(url);

        debug!(%url, "fetching metadata with yt-dlp");
        let output = run(command, "fetching metadata")?;
        check_status(&output, url)?;

        let info: VideoInfo = serde_json::from_slice(&output.stdout).map_err(|err| {
            ProviderError::failed(format!("parsing yt-dlp metadata for {url}: {err}"))
        })?;
        let info = Arc::new(info);

        let mut recent = self.recent.lock();
        recent.retain(|_, (fetched, _)| fetched.elapsed() < INFO_TTL);
        recent.insert(url.to_owned(), (Instant::now(), info.clone()));
        Ok(info)
    }

    fn cached_info(&self, url: &str) -> Result<Arc<VideoInfo>, ProviderError> {
        if let Some((fetched, info)) = self.recent.lock().get(url)
            && fetched.elapsed() < INFO_TTL
        {
            return Ok(info.clone());
        }
        self.dump_info(url)
    }
}

impl StreamProvider for YtDlpProvider {
    fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata, ProviderError> {
        let info = self.dump_info(url)?;
        Ok(VideoMetadata {
            title: info.title_or(url),
            duration_seconds: info.duration_seconds(),
            renditions: info.renditions(&self.resolutions),
        })
    }

    fn open_video_stream(
        &self,
        url: &str,
        resolution: &str,
    ) -> Result<Option<StreamHandle>, ProviderError> {
        let info = self.cached_info(url)?;
        Ok(info
            .video_only(resolution)
            .and_then(|format| format.to_handle(url)))
    }

    fn open_audio_stream(&self, url: &str) -> Result<Option<StreamHandle>, ProviderError> {
        let info = self.cached_info(url)?;
        Ok(info.audio_only().and_then(|format| format.to_handle(url)))
    }

    fn retrieve(&self, handle: &StreamHandle, dest: &Path) -> Result<(), ProviderError> {
        let mut command = self.command();
        command
            .arg("--format")
            .arg(&handle.format_id)
            .arg("--output")
            .arg(dest)
            .arg("--force-overwrites")
            .arg("--no-part")
            .arg("--no-continue")
            .arg("--no-warnings")
            .arg("--no-progress")
            .arg(&handle.url);

        info!(format = %handle.format_id, dest = %dest.display(), "retrieving stream");
        let output = run(command, "retrieving stream")?;
        check_status(&output, &handle.url)?;

        if !dest.exists() {
            return Err(ProviderError::failed(format!(
                "yt-dlp reported success but {} was not written",
                dest.display()
            )));
        }
        Ok(())
    }
}

fn run(mut command: Command, label: &str) -> Result<Output, ProviderError> {
    command
        .stdin(Stdio::null())
        .output()
        .map_err(|err| ProviderError::failed(format!("{label}: unable to run yt-dlp: {err}")))
}

fn check_status(output: &Output, url: &str) -> Result<(), ProviderError> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let message = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("no error output")
        .trim()
        .to_owned();
    let lowered = stderr.to_ascii_lowercase();
    if NOT_FOUND_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        Err(ProviderError::not_found(format!("{url}: {message}")))
    } else {
        Err(ProviderError::failed(format!(
            "yt-dlp exited with {} for {url}: {message}",
            output.status
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(id: &str, height: Option<i64>, vcodec: &str, acodec: &str) -> FormatInfo {
        FormatInfo {
            format_id: Some(id.into()),
            format_note: height.map(|h| format!("{h}p")),
            height,
            ext: Some(if vcodec == "none" { "m4a" } else { "webm" }.into()),
            vcodec: Some(vcodec.into()),
            acodec: Some(acodec.into()),
            filesize: None,
            filesize_approx: None,
        }
    }

    fn sample_info() -> VideoInfo {
        let mut progressive = format("18", Some(360), "avc1", "mp4a");
        progressive.filesize = Some(30.0 * 1024.0 * 1024.0);
        let mut hd = format("247", Some(720), "vp9", "none");
        hd.filesize_approx = Some(50.0 * 1024.0 * 1024.0);
        VideoInfo {
            title: Some("short".into()),
            fulltitle: Some("Full Title".into()),
            duration: Some(124.6),
            formats: vec![
                format("sb0", None, "none", "none"),
                format("139", None, "none", "mp4a"),
                format("140", None, "none", "mp4a"),
                progressive,
                format("243", Some(360), "vp9", "none"),
                hd,
            ],
        }
    }

    fn resolutions(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn renditions_skip_resolutions_without_streams() {
        let info = sample_info();
        let renditions = info.renditions(&resolutions(&["144p", "360p", "720p", "1080p"]));
        assert_eq!(
            renditions,
            vec![
                RenditionInfo {
                    resolution: "360p".into(),
                    size_bytes: Some(30 * 1024 * 1024),
                },
                RenditionInfo {
                    resolution: "720p".into(),
                    size_bytes: Some(50 * 1024 * 1024),
                },
            ]
        );
        assert_eq!(info.duration_seconds(), 125);
        assert_eq!(info.title_or("fallback"), "Full Title");
    }

    #[test]
    fn stream_selection_prefers_adaptive_tracks() {
        let info = sample_info();
        let video = info.video_only("360p").unwrap();
        assert_eq!(video.format_id.as_deref(), Some("243"));
        let audio = info.audio_only().unwrap();
        assert_eq!(audio.format_id.as_deref(), Some("139"));
        assert!(info.video_only("1080p").is_none());
    }

    #[test]
    fn high_frame_rate_notes_match_by_height() {
        let mut fmt = format("298", Some(720), "avc1", "none");
        fmt.format_note = Some("720p60".into());
        assert!(fmt.matches_resolution("720p"));
        assert!(!fmt.matches_resolution("1080p"));
    }

    #[test]
    fn missing_title_falls_back_to_url() {
        let info = VideoInfo {
            title: None,
            fulltitle: Some("  ".into()),
            duration: None,
            formats: Vec::new(),
        };
        assert_eq!(info.title_or("https://example.test/v"), "https://example.test/v");
        assert_eq!(info.duration_seconds(), 0);
    }
}

#[cfg(all(test, unix))]
mod process_tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    const INFO_JSON: &str = r#"{
  "id": "alpha",
  "title": "Alpha",
  "fulltitle": "Alpha: The Movie",
  "duration": 125,
  "formats": [
    {"format_id": "140", "ext": "m4a", "vcodec": "none", "acodec": "mp4a.40.2", "filesize": 2048},
    {"format_id": "136", "ext": "mp4", "height": 720, "format_note": "720p", "vcodec": "avc1", "acodec": "none", "filesize": 52428800},
    {"format_id": "135", "ext": "mp4", "height": 480, "format_note": "480p", "vcodec": "avc1", "acodec": "none", "filesize_approx": 31457280}
  ]
}"#;

    /// Writes an executable stand-in for yt-dlp that logs every invocation.
    fn install_stub(dir: &Path) -> PathBuf {
        let script_path = dir.join("yt-dlp");
        let log = dir.join("calls.log");
        let script = format!(
            r#"#!/usr/bin/env bash
set -euo pipefail
echo "$*" >> "{log}"
prev=""
output=""
format=""
for arg in "$@"; do
    if [[ "$prev" == "--output" ]]; then output="$arg"; fi
    if [[ "$prev" == "--format" ]]; then format="$arg"; fi
    prev="$arg"
done
last="${{@: -1}}"
if [[ "$last" == *missing* ]]; then
    echo "ERROR: [youtube] missing: Video unavailable" >&2
    exit 1
fi
if [[ "$last" == *flaky* ]]; then
    echo "ERROR: unable to download webpage: timed out" >&2
    exit 1
fi
if [[ " $* " == *" --dump-single-json "* ]]; then
cat <<'JSON'
{INFO_JSON}
JSON
exit 0
fi
if [[ -n "$format" ]]; then
    printf 'payload-%s' "$format" > "$output"
    exit 0
fi
exit 2
"#,
            log = log.display(),
        );
        fs::write(&script_path, script).unwrap();
        let mut perms = fs::metadata(&script_path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script_path, perms).unwrap();
        script_path
    }

    fn calls(dir: &Path) -> Vec<String> {
        fs::read_to_string(dir.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    fn provider(dir: &Path) -> YtDlpProvider {
        YtDlpProvider::new(
            install_stub(dir),
            vec!["360p".into(), "480p".into(), "720p".into()],
        )
    }

    #[test]
    fn fetch_metadata_parses_dump() {
        let dir = tempdir().unwrap();
        let metadata = provider(dir.path())
            .fetch_metadata("https://youtu.be/alpha")
            .unwrap();
        assert_eq!(metadata.title, "Alpha: The Movie");
        assert_eq!(metadata.duration_seconds, 125);
        let labels: Vec<_> = metadata
            .renditions
            .iter()
            .map(|r| (r.resolution.as_str(), r.size_bytes))
            .collect();
        assert_eq!(
            labels,
            vec![("480p", Some(31_457_280)), ("720p", Some(52_428_800))]
        );
    }

    #[test]
    fn unavailable_video_is_not_found_and_timeouts_are_failures() {
        let dir = tempdir().unwrap();
        let provider = provider(dir.path());
        assert!(matches!(
            provider.fetch_metadata("https://youtu.be/missing"),
            Err(ProviderError::NotFound(_))
        ));
        assert!(matches!(
            provider.fetch_metadata("https://youtu.be/flaky"),
            Err(ProviderError::Failed(_))
        ));
    }

    #[test]
    fn missing_binary_is_a_failure() {
        let provider = YtDlpProvider::new("/nonexistent/yt-dlp", Vec::new());
        assert!(matches!(
            provider.fetch_metadata("https://youtu.be/alpha"),
            Err(ProviderError::Failed(_))
        ));
    }

    #[test]
    fn stream_lookups_reuse_the_fresh_dump() {
        let dir = tempdir().unwrap();
        let provider = provider(dir.path());
        let url = "https://youtu.be/alpha";
        provider.fetch_metadata(url).unwrap();
        let video = provider.open_video_stream(url, "720p").unwrap().unwrap();
        let audio = provider.open_audio_stream(url).unwrap().unwrap();
        assert_eq!(video.format_id, "136");
        assert_eq!(audio.format_id, "140");
        assert_eq!(audio.ext, "m4a");
        assert!(provider.open_video_stream(url, "360p").unwrap().is_none());
        assert_eq!(calls(dir.path()).len(), 1);

        provider.fetch_metadata(url).unwrap();
        assert_eq!(calls(dir.path()).len(), 2);
    }

    #[test]
    fn retrieve_writes_the_requested_format() {
        let dir = tempdir().unwrap();
        let provider = provider(dir.path());
        let dest = dir.path().join("video_abc.mp4.tmp");
        let handle = StreamHandle {
            url: "https://youtu.be/alpha".into(),
            format_id: "136".into(),
            ext: "mp4".into(),
        };
        provider.retrieve(&handle, &dest).unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "payload-136");
        let log = calls(dir.path());
        assert!(log[0].contains("--force-overwrites"));
    }

    #[test]
    fn cookies_are_passed_only_when_present() {
        let dir = tempdir().unwrap();
        let cookies = dir.path().join("cookies.txt");
        let provider = provider(dir.path()).with_cookies(&cookies);
        provider.fetch_metadata("https://youtu.be/alpha").unwrap();
        fs::write(&cookies, "# Netscape HTTP Cookie File\n").unwrap();
        provider.fetch_metadata("https://youtu.be/alpha").unwrap();

        let log = calls(dir.path());
        assert!(!log[0].contains("--cookies"));
        assert!(log[1].contains("--cookies"));
    }
}
