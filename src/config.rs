#![forbid(unsafe_code)]

//! Runtime settings shared by the `backend` and `tubegrab` binaries.
//!
//! Values come from three layers, lowest priority first: an optional
//! `KEY="value"` env file, the process environment, and explicit overrides
//! (usually CLI flags).

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/tubegrab-env";
pub const DEFAULT_STORAGE_DIR: &str = "videos";
pub const DEFAULT_DATABASE_PATH: &str = "data/catalog.db";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8001;
pub const DEFAULT_YTDLP_BIN: &str = "yt-dlp";
pub const DEFAULT_FFMPEG_BIN: &str = "ffmpeg";
pub const DEFAULT_MUX_TIMEOUT_SECS: u64 = 30 * 60;
pub const DEFAULT_RESOLUTIONS: &[&str] = &["144p", "240p", "360p", "480p", "720p", "1080p"];

#[derive(Debug, Clone)]
pub struct Settings {
    pub storage_dir: PathBuf,
    pub database_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub ytdlp_bin: PathBuf,
    pub ffmpeg_bin: PathBuf,
    pub mux_timeout: Duration,
    pub resolutions: Vec<String>,
    pub cookies_file: Option<PathBuf>,
}

impl Settings {
    /// Defaults rooted at `base`; handy for tests and one-off tools.
    pub fn for_base(base: &Path) -> Self {
        Self {
            storage_dir: base.join(DEFAULT_STORAGE_DIR),
            database_path: base.join("catalog.db"),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            ytdlp_bin: PathBuf::from(DEFAULT_YTDLP_BIN),
            ffmpeg_bin: PathBuf::from(DEFAULT_FFMPEG_BIN),
            mux_timeout: Duration::from_secs(DEFAULT_MUX_TIMEOUT_SECS),
            resolutions: default_resolutions(),
            cookies_file: None,
        }
    }

    /// Creates the storage directory and the database parent directory.
    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.storage_dir)
            .with_context(|| format!("creating {}", self.storage_dir.display()))?;
        if let Some(parent) = self.database_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        Ok(())
    }
}

/// Explicit values that win over both the env file and the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_path: Option<PathBuf>,
    pub storage_dir: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

pub fn load_settings(overrides: Overrides) -> Result<Settings> {
    let config_path = overrides
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let file_vars = read_env_file(&config_path)?;
    build_settings(&file_vars, env_var_string, overrides, &config_path)
}

fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: Overrides,
    source: &Path,
) -> Result<Settings> {
    let lookup = |key: &str| env_lookup(key).or_else(|| file_vars.get(key).cloned());

    let storage_dir = overrides
        .storage_dir
        .or_else(|| lookup("STORAGE_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));
    let database_path = overrides
        .database_path
        .or_else(|| lookup("DATABASE_PATH").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH));
    let host = overrides
        .host
        .filter(|value| !value.trim().is_empty())
        .or_else(|| lookup("TUBEGRAB_HOST"))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = match overrides.port {
        Some(port) => port,
        None => parse_key(lookup("TUBEGRAB_PORT"), "TUBEGRAB_PORT", source)?
            .unwrap_or(DEFAULT_PORT),
    };
    let mux_timeout_secs = parse_key::<u64>(lookup("MUX_TIMEOUT_SECS"), "MUX_TIMEOUT_SECS", source)?
        .unwrap_or(DEFAULT_MUX_TIMEOUT_SECS);
    if mux_timeout_secs == 0 {
        return Err(anyhow!(
            "MUX_TIMEOUT_SECS must be positive (from {})",
            source.display()
        ));
    }
    let resolutions = lookup("RESOLUTIONS")
        .map(|raw| parse_resolutions(&raw))
        .filter(|list| !list.is_empty())
        .unwrap_or_else(default_resolutions);

    Ok(Settings {
        storage_dir,
        database_path,
        host,
        port,
        ytdlp_bin: lookup("YTDLP_BIN")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP_BIN)),
        ffmpeg_bin: lookup("FFMPEG_BIN")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG_BIN)),
        mux_timeout: Duration::from_secs(mux_timeout_secs),
        resolutions,
        cookies_file: lookup("COOKIES_FILE").map(PathBuf::from),
    })
}

fn parse_key<T: std::str::FromStr>(
    value: Option<String>,
    key: &str,
    source: &Path,
) -> Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .map(|raw| {
            raw.parse::<T>()
                .with_context(|| format!("Parsing {key} from {}", source.display()))
        })
        .transpose()
}

fn parse_resolutions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .collect()
}

fn default_resolutions() -> Vec<String> {
    DEFAULT_RESOLUTIONS.iter().map(|res| res.to_string()).collect()
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Parses a `KEY="value"` file. A missing file yields an empty map.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        if value.is_empty() {
            continue;
        }
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
