//! Pattern-driven filename construction, collision avoidance, and album
//! folder organization.

use std::path::{Path, PathBuf};

/// Characters stripped from any value that lands in a filename.
const FORBIDDEN: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Values substituted into a rename pattern.
#[derive(Debug, Clone, Default)]
pub struct RenameContext {
    pub artist: String,
    pub track: String,
    pub album: String,
    pub year: Option<u32>,
    pub track_number: u32,
}

/// Strip filesystem-hostile characters and trim.
pub fn sanitize(input: &str) -> String {
    input
        .chars()
        .filter(|c| !FORBIDDEN.contains(c))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Expand a rename pattern. Empty tokens collapse cleanly: whitespace runs
/// shrink to one space and dangling `- ` / ` -` separators are removed.
pub fn apply_pattern(pattern: &str, context: &RenameContext) -> String {
    let track_num = if context.track_number > 0 {
        format!("{:02}", context.track_number)
    } else {
        String::new()
    };
    let year = context.year.map(|y| y.to_string()).unwrap_or_default();

    let substituted = pattern
        .replace("{artist}", &sanitize(&context.artist))
        .replace("{track}", &sanitize(&context.track))
        .replace("{album}", &sanitize(&context.album))
        .replace("{year}", &year)
        .replace("{trackNum}", &track_num);

    let mut collapsed = substituted
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    loop {
        let trimmed = collapsed
            .strip_prefix("- ")
            .or_else(|| collapsed.strip_suffix(" -"))
            .map(str::to_string);
        match trimmed {
            Some(next) => collapsed = next.trim().to_string(),
            None => break,
        }
    }

    collapsed
}

/// Build the target basename for a file, preserving its original extension.
/// Returns `None` when the pattern expands to nothing usable.
pub fn build_basename(pattern: &str, context: &RenameContext, source: &Path) -> Option<String> {
    let stem = apply_pattern(pattern, context);
    if stem.is_empty() {
        return None;
    }
    let extension = source
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);
    match extension {
        Some(ext) => Some(format!("{stem}.{ext}")),
        None => Some(stem),
    }
}

/// Resolve a collision-free path: append ` (N)` before the extension with
/// N = 1, 2, ... until the name is unused.
pub fn unique_path(target: &Path) -> PathBuf {
    if !target.exists() {
        return target.to_path_buf();
    }

    let directory = target.parent().map(Path::to_path_buf).unwrap_or_default();
    let stem = target
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file")
        .to_string();
    let extension = target.extension().and_then(|e| e.to_str());

    for n in 1u32.. {
        let candidate_name = match extension {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let candidate = directory.join(candidate_name);
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!("collision counter exhausted");
}

/// Album folder name: `Artist - Album (Year)`, sanitized, year omitted when
/// unknown.
pub fn album_folder_name(artist: &str, album: &str, year: Option<u32>) -> String {
    let base = format!("{} - {}", sanitize(artist), sanitize(album));
    match year {
        Some(year) => format!("{base} ({year})"),
        None => base,
    }
}

/// Create the album folder under `download_dir`; idempotent.
pub fn ensure_album_folder(
    download_dir: &Path,
    artist: &str,
    album: &str,
    year: Option<u32>,
) -> std::io::Result<(PathBuf, String)> {
    let name = album_folder_name(artist, album, year);
    let path = download_dir.join(&name);
    std::fs::create_dir_all(&path)?;
    Ok((path, name))
}

/// Move a file into `folder`, applying the collision policy.
pub fn move_into_folder(source: &Path, folder: &Path) -> std::io::Result<PathBuf> {
    let file_name = source
        .file_name()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"))?;
    let target = unique_path(&folder.join(file_name));
    std::fs::rename(source, &target)?;
    Ok(target)
}
