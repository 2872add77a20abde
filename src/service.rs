//! Boundary operations used by the HTTP handlers and the CLI.
//!
//! [`VideoService`] ties the download pipeline to the catalog: a download
//! reconciles the catalog after the file exists, and deleting from history
//! also removes the files named after the video and the file it last recorded.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::task;
use tracing::info;

use crate::catalog::{Catalog, FormatRemoval, NewVideo, Video};
use crate::config::Settings;
use crate::download::Downloader;
use crate::error::{ServiceError, ServiceResult};
use crate::mux::Muxer;
use crate::naming;
use crate::provider::{StreamProvider, VideoMetadata};
use crate::ytdlp::YtDlpProvider;

pub const DEFAULT_RESOLUTION: &str = "720p";

/// What callers see of a catalogued video.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoView {
    pub id: i64,
    pub title: String,
    pub duration: String,
    pub url: String,
    pub file_path: Option<String>,
    pub created_at: String,
    pub resolutions: Vec<ResolutionView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionView {
    pub resolution: String,
    pub size: String,
}

impl From<Video> for VideoView {
    fn from(video: Video) -> Self {
        Self {
            id: video.id,
            title: video.title,
            duration: video.duration,
            url: video.url,
            file_path: video.file_path,
            created_at: video.created_at,
            resolutions: video
                .formats
                .into_iter()
                .map(|format| ResolutionView {
                    resolution: format.resolution,
                    size: format.size,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeletedVideo {
    pub files_deleted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClearedHistory {
    pub videos_deleted: usize,
    pub formats_deleted: usize,
    pub files_deleted: usize,
}

pub struct VideoService {
    catalog: Arc<Catalog>,
    downloader: Downloader,
}

impl VideoService {
    pub fn new(catalog: Arc<Catalog>, downloader: Downloader) -> Self {
        Self {
            catalog,
            downloader,
        }
    }

    /// Opens the catalog and wires yt-dlp and ffmpeg from `settings`.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        settings.prepare()?;
        let catalog = Arc::new(Catalog::open(&settings.database_path)?);
        let provider: Arc<dyn StreamProvider> = Arc::new(YtDlpProvider::from_settings(settings));
        let downloader = Downloader::new(
            provider,
            Muxer::from_settings(settings),
            settings.storage_dir.clone(),
        );
        Ok(Self::new(catalog, downloader))
    }

    /// Catalogued view of `url`, fetching and storing it on first sight.
    pub async fn get_video_info(&self, url: &str) -> ServiceResult<VideoView> {
        Ok(self.ensure_video(url, None).await?.into())
    }

    /// Downloads and muxes `url` at `resolution`, then records the file
    /// against the catalogued video. Nothing is catalogued when the download
    /// fails.
    pub async fn download_video(&self, url: &str, resolution: &str) -> ServiceResult<PathBuf> {
        let download = self.downloader.download(url, resolution).await?;
        let video = self.ensure_video(url, Some(download.metadata)).await?;

        let file_path = download.path.to_string_lossy().into_owned();
        let id = video.id;
        let recorded = self
            .with_catalog(move |catalog| catalog.set_file_path(id, &file_path))
            .await?;
        if recorded.is_none() {
            return Err(ServiceError::not_found(format!(
                "video {id} was removed during download"
            )));
        }

        Ok(download.path)
    }

    pub async fn list_history(&self) -> ServiceResult<Vec<VideoView>> {
        let videos = self.with_catalog(|catalog| catalog.list()).await?;
        Ok(videos.into_iter().map(VideoView::from).collect())
    }

    pub async fn get_history_video(&self, title: &str) -> ServiceResult<VideoView> {
        let lookup = title.to_owned();
        self.with_catalog(move |catalog| catalog.find_by_title(&lookup))
            .await?
            .map(VideoView::from)
            .ok_or_else(|| title_not_found(title))
    }

    pub async fn rename_video(&self, title: &str, new_title: &str) -> ServiceResult<VideoView> {
        let (old, new) = (title.to_owned(), new_title.to_owned());
        let renamed = self
            .with_catalog(move |catalog| catalog.rename(&old, &new))
            .await?
            .ok_or_else(|| title_not_found(title))?;
        info!(from = %title, to = %new_title, "renamed video");
        Ok(renamed.into())
    }

    /// Forgets one rendition. The video and its other renditions stay.
    pub async fn delete_rendition(&self, title: &str, resolution: &str) -> ServiceResult<()> {
        let (lookup, res) = (title.to_owned(), resolution.to_owned());
        let outcome = self
            .with_catalog(move |catalog| catalog.delete_format(&lookup, &res))
            .await?;
        match outcome {
            FormatRemoval::Removed => Ok(()),
            FormatRemoval::NoVideo => Err(title_not_found(title)),
            FormatRemoval::NoFormat => Err(ServiceError::not_found(format!(
                "resolution {resolution} not found for video {title:?}"
            ))),
        }
    }

    /// Deletes the video, its renditions, and then its files on disk: every
    /// rendition named after the stored title plus the recorded `file_path`
    /// when it lives directly in storage.
    pub async fn delete_video(&self, id: i64) -> ServiceResult<DeletedVideo> {
        let video = self
            .with_catalog(move |catalog| catalog.delete_video(id))
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("video {id} not found")))?;

        let storage_dir = self.downloader.storage_dir().to_path_buf();
        let title = video.title.clone();
        let recorded = video.file_path.clone().map(PathBuf::from);
        let files_deleted = task::spawn_blocking(move || {
            let mut files = naming::owned_files(&storage_dir, &title);
            if let Some(path) = recorded
                && path.parent() == Some(storage_dir.as_path())
                && path.is_file()
            {
                files.push(path);
            }
            files.sort();
            files.dedup();
            naming::remove_files(&files)
        })
        .await?;

        info!(id, title = %video.title, files_deleted, "deleted video");
        Ok(DeletedVideo { files_deleted })
    }

    /// Empties the catalog, then removes every `.mp4` in storage. Files are
    /// only touched once the catalog transaction has committed.
    pub async fn clear_history(&self) -> ServiceResult<ClearedHistory> {
        let rows = self.with_catalog(|catalog| catalog.clear()).await?;

        let storage_dir = self.downloader.storage_dir().to_path_buf();
        let files_deleted =
            task::spawn_blocking(move || naming::remove_files(&naming::all_mp4_files(&storage_dir)))
                .await?;

        let summary = ClearedHistory {
            videos_deleted: rows.videos,
            formats_deleted: rows.formats,
            files_deleted,
        };
        info!(?summary, "cleared history");
        Ok(summary)
    }

    /// On-disk file for a title and resolution, named like a download would.
    pub async fn stored_file(&self, title: &str, resolution: &str) -> ServiceResult<PathBuf> {
        let path = naming::build_path(self.downloader.storage_dir(), title, resolution);
        let is_file = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.is_file(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
            Err(err) => return Err(err.into()),
        };
        if is_file {
            Ok(path)
        } else {
            Err(ServiceError::not_found(format!(
                "no {resolution} file stored for {title:?}"
            )))
        }
    }

    /// Looks `url` up and inserts it when missing. Metadata already fetched
    /// by the caller is reused, otherwise the provider is asked.
    async fn ensure_video(
        &self,
        url: &str,
        metadata: Option<VideoMetadata>,
    ) -> ServiceResult<Video> {
        let lookup = url.to_owned();
        if let Some(video) = self
            .with_catalog(move |catalog| catalog.find_by_url(&lookup))
            .await?
        {
            return Ok(video);
        }

        let metadata = match metadata {
            Some(metadata) => metadata,
            None => {
                let provider = self.downloader.provider();
                let url = url.to_owned();
                task::spawn_blocking(move || provider.fetch_metadata(&url)).await??
            }
        };

        let new_video = NewVideo::from_metadata(url, &metadata);
        let video = self
            .with_catalog(move |catalog| catalog.insert_video(&new_video))
            .await?;
        info!(id = video.id, title = %video.title, "catalogued video");
        Ok(video)
    }

    async fn with_catalog<T, F>(&self, f: F) -> ServiceResult<T>
    where
        F: FnOnce(&Catalog) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let catalog = self.catalog.clone();
        task::spawn_blocking(move || f(&catalog))
            .await?
            .map_err(ServiceError::Store)
    }
}

fn title_not_found(title: &str) -> ServiceError {
    ServiceError::not_found(format!("video {title:?} not found"))
}
