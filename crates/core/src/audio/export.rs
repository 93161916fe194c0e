use std::{
    fs,
    path::{Path, PathBuf},
};

use url::Url;

use super::element::resolve_locator;
use crate::{MusicStreamError, Result, Track};

/// Copies the file behind `track` into `dir`, named after the track title
/// and keeping the source extension. Returns the path written.
pub fn download_track(track: &Track, base: Option<&Url>, dir: &Path) -> Result<PathBuf> {
    let source = resolve_locator(base, &track.source)?;
    if !source.is_file() {
        return Err(MusicStreamError::load_failure(
            track.source.clone(),
            "no such file",
        ));
    }

    if !dir.exists() {
        fs::create_dir_all(dir)?;
        tracing::info!(dir = %dir.display(), "created download directory");
    }

    let mut name = file_name(&track.title);
    if let Some(extension) = source.extension().and_then(|ext| ext.to_str()) {
        name.push('.');
        name.push_str(extension);
    }
    let target = dir.join(&name);
    let partial = dir.join(format!("{name}.part"));

    fs::copy(&source, &partial)?;
    fs::rename(&partial, &target)?;
    tracing::debug!(from = %source.display(), to = %target.display(), "downloaded track");
    Ok(target)
}

/// The title with separators and control characters replaced.
fn file_name(title: &str) -> String {
    let name: String = title
        .chars()
        .map(|c| {
            if matches!(c, '/' | '\\' | ':') || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    let name = name.trim().trim_matches('.');
    if name.is_empty() {
        "track".to_string()
    } else {
        name.to_string()
    }
}
