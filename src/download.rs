//! The download-and-mux pipeline.
//!
//! A download resolves the title, derives the output path, and returns early
//! when that file already exists. Otherwise it pulls the video-only and
//! audio-only streams into temporary files next to the output, muxes them
//! into a temporary `.part` file and renames that onto the output path. Every
//! temporary file is removed whether the pipeline succeeds or not.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tempfile::TempPath;
use tokio::sync::OwnedMutexGuard;
use tokio::task;
use tracing::{info, warn};

use crate::error::{ProviderError, ServiceError, ServiceResult};
use crate::mux::{MuxCommand, Muxer};
use crate::naming;
use crate::provider::{StreamHandle, StreamProvider, VideoMetadata};

/// Result of [`Downloader::download`].
#[derive(Debug, Clone)]
pub struct Download {
    pub path: PathBuf,
    /// The metadata fetched while resolving the output path.
    pub metadata: VideoMetadata,
    /// True when the file already existed and nothing was fetched or muxed.
    pub reused: bool,
}

/// One async mutex per output path so only one download writes a given file.
#[derive(Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<PathBuf, Weak<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    async fn acquire(&self, key: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks.retain(|_, lock| lock.strong_count() > 0);
            match locks.get(key).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(tokio::sync::Mutex::new(()));
                    locks.insert(key.to_path_buf(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }
}

pub struct Downloader {
    provider: Arc<dyn StreamProvider>,
    muxer: Muxer,
    storage_dir: PathBuf,
    locks: KeyedLocks,
}

impl Downloader {
    pub fn new(provider: Arc<dyn StreamProvider>, muxer: Muxer, storage_dir: PathBuf) -> Self {
        Self {
            provider,
            muxer,
            storage_dir,
            locks: KeyedLocks::default(),
        }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn provider(&self) -> Arc<dyn StreamProvider> {
        self.provider.clone()
    }

    pub async fn download(&self, url: &str, resolution: &str) -> ServiceResult<Download> {
        let metadata = {
            let url = url.to_owned();
            self.blocking(move |provider| provider.fetch_metadata(&url))
                .await?
        };
        let output = naming::build_path(&self.storage_dir, &metadata.title, resolution);

        let _guard = self.locks.acquire(&output).await;

        if tokio::fs::metadata(&output)
            .await
            .is_ok_and(|meta| meta.is_file())
        {
            info!(path = %output.display(), "video already downloaded");
            return Ok(Download {
                path: output,
                metadata,
                reused: true,
            });
        }

        let video = {
            let (url, wanted) = (url.to_owned(), resolution.to_owned());
            self.blocking(move |provider| provider.open_video_stream(&url, &wanted))
                .await?
                .ok_or_else(|| ServiceError::RenditionUnavailable {
                    resolution: resolution.to_owned(),
                })?
        };
        let audio = {
            let url = url.to_owned();
            self.blocking(move |provider| provider.open_audio_stream(&url))
                .await?
                .ok_or(ServiceError::AudioUnavailable)?
        };

        tokio::fs::create_dir_all(&self.storage_dir).await?;

        info!(title = %metadata.title, %resolution, "downloading streams");
        let video_file = self.fetch_to_temp("video_", video).await?;
        let audio_file = self.fetch_to_temp("audio_", audio).await?;

        info!(output = %output.display(), "merging video and audio");
        let muxed = temp_path(&self.storage_dir, "mux_", ".part")?;
        self.muxer
            .run(&MuxCommand::new(&video_file, &audio_file, &muxed))
            .await?;
        muxed
            .persist(&output)
            .map_err(|err| ServiceError::Io(err.error))?;

        for temp in [video_file, audio_file] {
            let path = temp.to_path_buf();
            if let Err(err) = temp.close() {
                warn!(path = %path.display(), error = %err, "could not remove temporary stream file");
            }
        }

        info!(path = %output.display(), "download complete");
        Ok(Download {
            path: output,
            metadata,
            reused: false,
        })
    }

    /// Retrieves `handle` into a fresh `{prefix}XXXX.{ext}.tmp` file in the
    /// storage directory. The file is deleted when the returned path drops.
    async fn fetch_to_temp(&self, prefix: &str, handle: StreamHandle) -> ServiceResult<TempPath> {
        let temp = temp_path(&self.storage_dir, prefix, &format!(".{}.tmp", handle.ext))?;
        let dest = temp.to_path_buf();
        self.blocking(move |provider| provider.retrieve(&handle, &dest))
            .await?;
        Ok(temp)
    }

    async fn blocking<T, F>(&self, f: F) -> ServiceResult<T>
    where
        F: FnOnce(&dyn StreamProvider) -> Result<T, ProviderError> + Send + 'static,
        T: Send + 'static,
    {
        let provider = self.provider.clone();
        let result = task::spawn_blocking(move || f(provider.as_ref())).await?;
        Ok(result?)
    }
}

fn temp_path(dir: &Path, prefix: &str, suffix: &str) -> ServiceResult<TempPath> {
    let file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile_in(dir)?;
    Ok(file.into_temp_path())
}
