//! The seam between the pipeline and the remote platform.
//!
//! Calls are blocking; async callers move them onto the blocking pool.

use std::path::Path;

use crate::error::ProviderError;

/// What the platform knows about a video before anything is downloaded.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub title: String,
    pub duration_seconds: u64,
    /// Only resolutions with a matching stream; in configured order.
    pub renditions: Vec<RenditionInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenditionInfo {
    pub resolution: String,
    pub size_bytes: Option<u64>,
}

/// A single retrievable elementary stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamHandle {
    pub url: String,
    pub format_id: String,
    /// Container extension reported by the platform, e.g. `webm` or `m4a`.
    pub ext: String,
}

pub trait StreamProvider: Send + Sync {
    fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata, ProviderError>;

    /// Video-only stream at `resolution`, or `None` when the platform has none.
    fn open_video_stream(
        &self,
        url: &str,
        resolution: &str,
    ) -> Result<Option<StreamHandle>, ProviderError>;

    /// The first audio-only track, or `None`.
    fn open_audio_stream(&self, url: &str) -> Result<Option<StreamHandle>, ProviderError>;

    /// Writes the full payload of `handle` to `dest`, replacing its contents.
    fn retrieve(&self, handle: &StreamHandle, dest: &Path) -> Result<(), ProviderError>;
}
