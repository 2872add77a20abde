#![forbid(unsafe_code)]

//! Command-line front end: download videos and manage the download history
//! without running the HTTP server.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tubegrab::{
    config::{self, DEFAULT_CONFIG_PATH, Overrides, Settings},
    logging,
    service::{DEFAULT_RESOLUTION, VideoService},
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Download videos and manage the tubegrab history.")]
struct Cli {
    #[arg(long = "config", value_name = "PATH", default_value = DEFAULT_CONFIG_PATH, help = "Path to the env config file")]
    config: PathBuf,
    #[arg(
        long = "storage-dir",
        value_name = "PATH",
        help = "Directory holding muxed videos"
    )]
    storage_dir: Option<PathBuf>,
    #[arg(long = "database", value_name = "PATH", help = "SQLite catalog path")]
    database: Option<PathBuf>,
    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Check that yt-dlp and ffmpeg can be executed.
    Check,
    /// Fetch and catalogue metadata for a video URL.
    Info { url: String },
    /// Download a rendition and mux it into an MP4 file.
    Download {
        url: String,
        #[arg(short = 'r', long = "resolution", default_value = DEFAULT_RESOLUTION)]
        resolution: String,
    },
    /// List every catalogued video, oldest first.
    History,
    /// Show the oldest catalogued video with this title.
    Show { title: String },
    /// Rename a catalogued video.
    Rename { title: String, new_title: String },
    /// Forget one rendition of a video.
    DropResolution { title: String, resolution: String },
    /// Delete a video, its renditions and its files.
    Delete { id: i64 },
    /// Delete the whole history and every stored MP4 file.
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing();

    let settings = config::load_settings(Overrides {
        config_path: Some(cli.config),
        storage_dir: cli.storage_dir,
        database_path: cli.database,
        ..Overrides::default()
    })?;

    let open = || VideoService::from_settings(&settings).context("initializing video service");
    match cli.command {
        Action::Check => check_tools(&settings),
        Action::Info { url } => print_json(&open()?.get_video_info(&url).await?),
        Action::Download { url, resolution } => {
            let path = open()?.download_video(&url, &resolution).await?;
            println!("{}", path.display());
            Ok(())
        }
        Action::History => print_json(&open()?.list_history().await?),
        Action::Show { title } => print_json(&open()?.get_history_video(&title).await?),
        Action::Rename { title, new_title } => {
            print_json(&open()?.rename_video(&title, &new_title).await?)
        }
        Action::DropResolution { title, resolution } => {
            open()?.delete_rendition(&title, &resolution).await?;
            println!("Removed {resolution} from {title}");
            Ok(())
        }
        Action::Delete { id } => print_json(&open()?.delete_video(id).await?),
        Action::Clear => print_json(&open()?.clear_history().await?),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serializing output")?
    );
    Ok(())
}

fn check_tools(settings: &Settings) -> Result<()> {
    ensure_program_available(&settings.ytdlp_bin, "--version")?;
    ensure_program_available(&settings.ffmpeg_bin, "-version")?;
    println!("yt-dlp: {}", settings.ytdlp_bin.display());
    println!("ffmpeg: {}", settings.ffmpeg_bin.display());
    println!("Storage: {}", settings.storage_dir.display());
    println!("Catalog: {}", settings.database_path.display());
    Ok(())
}

/// Runs `<program> <version_flag>` to fail loudly when a tool is missing.
fn ensure_program_available(program: &Path, version_flag: &str) -> Result<()> {
    let status = Command::new(program)
        .arg(version_flag)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(_) => bail!(
            "{} is installed but returned a failure status",
            program.display()
        ),
        Err(err) => bail!(
            "{} is not installed or not in PATH: {}",
            program.display(),
            err
        ),
    }
}
