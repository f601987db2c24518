use crate::error::AppError;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::process::Command;

#[cfg(target_os = "windows")]
const LOOKUP_COMMAND: &str = "where";
#[cfg(not(target_os = "windows"))]
const LOOKUP_COMMAND: &str = "which";

fn find_in_path(name: &str) -> Option<PathBuf> {
    let output = Command::new(LOOKUP_COMMAND).arg(name).output().ok()?;
    if output.status.success() {
        let path = String::from_utf8_lossy(&output.stdout);
        let first = path.lines().next()?.trim();
        if !first.is_empty() {
            return Some(PathBuf::from(first));
        }
    }
    None
}

fn common_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/opt/homebrew/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
            PathBuf::from("/opt/local/bin/ffmpeg"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        vec![
            PathBuf::from("C:\\ffmpeg\\bin\\ffmpeg.exe"),
            PathBuf::from("C:\\Program Files\\ffmpeg\\bin\\ffmpeg.exe"),
        ]
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        vec![
            PathBuf::from("/usr/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", unix)))]
    {
        vec![]
    }
}

static FFMPEG_PATH_CACHE: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Forget the cached FFmpeg path so the next lookup re-reads the environment.
#[cfg(any(test, feature = "discovery-test-helpers"))]
pub fn reset_path_cache() {
    *FFMPEG_PATH_CACHE.lock() = None;
}

/// Binary named `base_name` shipped next to the current executable, if present.
pub fn resolve_sidecar_path(base_name: &str) -> Option<PathBuf> {
    let exe_dir = std::env::current_exe().ok()?.parent()?.to_path_buf();
    #[cfg(windows)]
    let path = {
        let base = base_name.trim_end_matches(".exe");
        let mut p = exe_dir.join(base);
        p.as_mut_os_string().push(".exe");
        p
    };
    #[cfg(not(windows))]
    let path = exe_dir.join(base_name);
    if path.is_file() {
        log::debug!(
            target: "vidfit::ffmpeg::discovery",
            "{} found next to executable: {}",
            base_name,
            path.display()
        );
        Some(path)
    } else {
        None
    }
}

fn resolve_ffmpeg_path() -> Result<PathBuf, AppError> {
    // 1. Pre-installed: common paths first to avoid spawning which/where
    for path in common_paths() {
        if path.exists() {
            log::debug!(
                target: "vidfit::ffmpeg::discovery",
                "FFmpeg found in common path: {}",
                path.display()
            );
            return Ok(path);
        }
    }

    // 2. Pre-installed: PATH
    if let Some(p) = find_in_path("ffmpeg") {
        if p.exists() {
            log::debug!(
                target: "vidfit::ffmpeg::discovery",
                "FFmpeg found in PATH: {}",
                p.display()
            );
            return Ok(p);
        }
    }

    // 3. Shipped alongside the sidecar binary
    if let Some(p) = resolve_sidecar_path("ffmpeg") {
        return Ok(p);
    }

    log::error!(
        target: "vidfit::ffmpeg::discovery",
        "FFmpeg not found in PATH or common locations"
    );
    Err(AppError::FfmpegNotFound(
        "FFmpeg not found. Please install FFmpeg on your system:\n  - macOS: brew install ffmpeg\n  - Linux: sudo apt install ffmpeg\n  - Windows: Download from https://ffmpeg.org/download.html"
            .to_string(),
    ))
}

/// Get FFmpeg path. Cached for process lifetime.
/// Env override: FFMPEG_PATH takes precedence (for tests/CI or bundled binaries).
/// Falls back to common installation paths, then PATH.
pub fn get_ffmpeg_path() -> Result<PathBuf, AppError> {
    let mut cache = FFMPEG_PATH_CACHE.lock();
    if let Some(path) = cache.as_ref() {
        log::trace!(
            target: "vidfit::ffmpeg::discovery",
            "FFmpeg path (cached): {}",
            path.display()
        );
        return Ok(path.clone());
    }
    let path = match std::env::var_os("FFMPEG_PATH").map(PathBuf::from) {
        Some(p) if p.exists() => {
            log::debug!(
                target: "vidfit::ffmpeg::discovery",
                "FFmpeg path from FFMPEG_PATH env: {}",
                p.display()
            );
            p
        }
        _ => resolve_ffmpeg_path()?,
    };
    *cache = Some(path.clone());
    Ok(path)
}

/// Paths to try for ffprobe given an ffmpeg binary path (suffixed first, then plain).
pub fn ffprobe_candidates(ffmpeg_path: &Path) -> Vec<PathBuf> {
    let parent = match ffmpeg_path.parent() {
        Some(p) => p,
        None => return vec![],
    };
    let mut candidates = Vec::with_capacity(2);
    let stem = ffmpeg_path.file_stem().and_then(|s| s.to_str());
    if let Some(suffix) = stem.and_then(|s| s.strip_prefix("ffmpeg")) {
        if !suffix.is_empty() {
            #[cfg(target_os = "windows")]
            candidates.push(parent.join(format!("ffprobe{suffix}.exe")));
            #[cfg(not(target_os = "windows"))]
            candidates.push(parent.join(format!("ffprobe{suffix}")));
        }
    }
    #[cfg(target_os = "windows")]
    candidates.push(parent.join("ffprobe.exe"));
    #[cfg(not(target_os = "windows"))]
    candidates.push(parent.join("ffprobe"));
    candidates
}

/// Get ffprobe path. FFPROBE_PATH wins; otherwise the same directory as ffmpeg.
/// If ffmpeg has a platform suffix (e.g. ffmpeg-aarch64-apple-darwin), looks for
/// ffprobe with the same suffix first.
pub fn get_ffprobe_path() -> Result<PathBuf, AppError> {
    if let Some(p) = std::env::var_os("FFPROBE_PATH").map(PathBuf::from) {
        if p.exists() {
            return Ok(p);
        }
    }
    let ffmpeg = get_ffmpeg_path()?;
    if let Some(found) = ffprobe_candidates(&ffmpeg).into_iter().find(|c| c.exists()) {
        return Ok(found);
    }
    if let Some(p) = find_in_path("ffprobe") {
        return Ok(p);
    }
    let dir = ffmpeg
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    Err(AppError::FfmpegNotFound(format!(
        "ffprobe not found (FFmpeg dir: {})",
        dir
    )))
}

/// Encoder names from `ffmpeg -encoders` output. Lines look like
/// ` V....D libx264   libx264 H.264 / AVC ...`; the header block ends at `------`.
pub fn parse_encoder_list(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|l| !l.trim_start().starts_with("------"))
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let flags = parts.next()?;
            let name = parts.next()?;
            (flags.len() == 6).then(|| name.to_string())
        })
        .collect()
}

/// Every encoder the resolved FFmpeg build reports.
pub fn get_available_encoders(ffmpeg: &Path) -> Result<Vec<String>, AppError> {
    let output = Command::new(ffmpeg)
        .args(["-hide_banner", "-encoders"])
        .output()
        .map_err(|e| format!("Failed to run FFmpeg: {}", e))?;
    if !output.status.success() {
        return Err(AppError::ffmpeg_failed(
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).to_string(),
        ));
    }
    let encoders = parse_encoder_list(&String::from_utf8_lossy(&output.stdout));
    log::debug!(
        target: "vidfit::ffmpeg::discovery",
        "FFmpeg reports {} encoders",
        encoders.len()
    );
    Ok(encoders)
}
