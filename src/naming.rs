//! Output file naming and the matching used to clean files up again.
//!
//! Every muxed file lives directly in the storage directory as
//! `{sanitize(title)}_{resolution}.mp4`. [`owned_files`] must keep matching
//! exactly what [`build_path`] produces, otherwise deleting a video leaves its
//! files behind.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

pub const OUTPUT_EXTENSION: &str = "mp4";

/// Characters that are unsafe in file names on at least one platform.
const RESERVED: [char; 9] = ['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

pub fn sanitize(title: &str) -> String {
    title
        .chars()
        .map(|c| if RESERVED.contains(&c) { '_' } else { c })
        .collect()
}

pub fn file_name(title: &str, resolution: &str) -> String {
    format!("{}_{resolution}.{OUTPUT_EXTENSION}", sanitize(title))
}

pub fn build_path(storage_dir: &Path, title: &str, resolution: &str) -> PathBuf {
    storage_dir.join(file_name(title, resolution))
}

/// Files named `{sanitize(title)}_{label}.mp4` directly inside `storage_dir`.
///
/// `label` is a single resolution label without `_`, so a longer title that
/// shares the prefix (`Clip_ Extended_720p.mp4` for `Clip`) is not matched.
pub fn owned_files(storage_dir: &Path, title: &str) -> Vec<PathBuf> {
    let prefix = format!("{}_", sanitize(title));
    let suffix = format!(".{OUTPUT_EXTENSION}");
    top_level_files(storage_dir, |name| {
        name.strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(&suffix))
            .is_some_and(|label| !label.is_empty() && !label.contains('_'))
    })
}

/// Every `*.mp4` directly inside `storage_dir`.
pub fn all_mp4_files(storage_dir: &Path) -> Vec<PathBuf> {
    top_level_files(storage_dir, |name| {
        Path::new(name)
            .extension()
            .is_some_and(|ext| ext == OUTPUT_EXTENSION)
    })
}

fn top_level_files(dir: &Path, matches: impl Fn(&str) -> bool) -> Vec<PathBuf> {
    if !dir.exists() {
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_str().is_some_and(&matches))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// Best-effort removal. Returns how many files were actually deleted; the
/// rest are logged and skipped.
pub fn remove_files(paths: &[PathBuf]) -> usize {
    let mut removed = 0;
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(err) => warn!(path = %path.display(), error = %err, "could not delete file"),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sanitize_replaces_only_reserved_characters() {
        assert_eq!(sanitize("My:Video?"), "My_Video_");
        assert_eq!(sanitize(r#"a\b/c*d?e:f"g<h>i|j"#), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize("Café del Mar - Live 2024"), "Café del Mar - Live 2024");
    }

    #[test]
    fn build_path_joins_title_and_resolution() {
        assert_eq!(
            build_path(Path::new("/tmp"), "My:Video?", "720p"),
            PathBuf::from("/tmp/My_Video__720p.mp4")
        );
    }

    #[test]
    fn owned_files_matches_what_build_path_produces() {
        let dir = tempdir().unwrap();
        let title = "Talk: Part 1";
        let p720 = build_path(dir.path(), title, "720p");
        let p360 = build_path(dir.path(), title, "360p");
        fs::write(&p720, "a").unwrap();
        fs::write(&p360, "b").unwrap();
        fs::write(dir.path().join("Other_720p.mp4"), "c").unwrap();
        fs::write(dir.path().join("Talk_ Part 1_720p.webm"), "d").unwrap();
        fs::create_dir(dir.path().join("Talk_ Part 1_sub.mp4")).unwrap();

        assert_eq!(owned_files(dir.path(), title), vec![p360, p720]);
    }

    #[test]
    fn owned_files_skip_longer_titles_sharing_the_prefix() {
        let dir = tempdir().unwrap();
        let own = build_path(dir.path(), "Clip", "720p");
        fs::write(&own, "a").unwrap();
        fs::write(build_path(dir.path(), "Clip: Extended", "720p"), "b").unwrap();
        fs::write(dir.path().join("Clip_Extended_480p.mp4"), "c").unwrap();
        fs::write(dir.path().join("Clip_.mp4"), "d").unwrap();
        fs::write(dir.path().join("Clip_notes.txt"), "e").unwrap();

        assert_eq!(owned_files(dir.path(), "Clip"), vec![own]);
        assert_eq!(
            owned_files(dir.path(), "Clip: Extended"),
            vec![dir.path().join("Clip_ Extended_720p.mp4")]
        );
    }

    #[test]
    fn all_mp4_files_ignores_other_extensions_and_nested_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a_720p.mp4"), "a").unwrap();
        fs::write(dir.path().join("video_x.webm.tmp"), "b").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/c_720p.mp4"), "c").unwrap();

        assert_eq!(
            all_mp4_files(dir.path()),
            vec![dir.path().join("a_720p.mp4")]
        );
        assert!(all_mp4_files(&dir.path().join("missing")).is_empty());
    }

    #[test]
    fn remove_files_counts_only_successes() {
        let dir = tempdir().unwrap();
        let present = dir.path().join("x.mp4");
        fs::write(&present, "x").unwrap();
        let missing = dir.path().join("y.mp4");

        assert_eq!(remove_files(&[present.clone(), missing]), 1);
        assert!(!present.exists());
    }
}
