//! Encoder process supervision.
//!
//! Spawns one encoder pass, reads its `-progress pipe:1` stream line by line on
//! the calling thread and feeds it through a [`ProgressTracker`]. stderr is
//! drained on a background thread so the child never blocks on a full pipe.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};

#[cfg(windows)]
use std::os::windows::process::CommandExt;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use super::progress::{ProgressSample, ProgressTracker};
use crate::cancel::CancelSignal;
use crate::error::AppError;

/// Keep only the last N bytes of stderr to avoid unbounded memory growth.
const MAX_STDERR_BYTES: usize = 64 * 1024;

/// How a single encoder pass ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    Completed {
        average_fps: Option<f64>,
    },
    Failed {
        average_fps: Option<f64>,
        code: i32,
        stderr: String,
    },
    /// The child was killed after the cancel signal tripped.
    Cancelled,
}

fn collect_stderr<R: Read + Send + 'static>(
    reader: R,
    buffer: Arc<Mutex<Vec<u8>>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut stream_reader = BufReader::new(reader);
        let mut line_buf = Vec::with_capacity(256);
        while stream_reader.read_until(b'\n', &mut line_buf).unwrap_or(0) > 0 {
            let mut guard = buffer.lock();
            guard.extend_from_slice(&line_buf);
            if guard.len() > MAX_STDERR_BYTES {
                let excess = guard.len() - MAX_STDERR_BYTES;
                guard.drain(..excess);
            }
            line_buf.clear();
        }
    })
}

fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Run one encoder pass to completion, cancellation or failure.
///
/// `on_sample` fires once per `fps=` line. `cancel` is polled after every
/// stdout line; when it trips the child is killed without a graceful shutdown
/// and the stderr reader is left to finish on its own.
pub fn run_pass(
    mut cmd: Command,
    tracker: &mut ProgressTracker,
    on_sample: &mut dyn FnMut(ProgressSample),
    cancel: &dyn CancelSignal,
) -> Result<PassOutcome, AppError> {
    log::debug!(
        target: "vidfit::ffmpeg::runner",
        "Spawning encoder: {:?}",
        cmd
    );

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    let mut child = cmd
        .spawn()
        .map_err(|e| format!("Failed to spawn FFmpeg: {}", e))?;

    let stdout = match child.stdout.take() {
        Some(s) => s,
        None => {
            kill_and_reap(&mut child);
            return Err(AppError::from("Failed to capture stdout"));
        }
    };
    let stderr = match child.stderr.take() {
        Some(s) => s,
        None => {
            kill_and_reap(&mut child);
            return Err(AppError::from("Failed to capture stderr"));
        }
    };

    let stderr_buffer = Arc::new(Mutex::new(Vec::new()));
    let stderr_handle = collect_stderr(stderr, Arc::clone(&stderr_buffer));

    let mut stdout_reader = BufReader::new(stdout);
    let mut line_buf = Vec::with_capacity(256);
    loop {
        let read = match stdout_reader.read_until(b'\n', &mut line_buf) {
            Ok(n) => n,
            Err(e) => {
                log::warn!(
                    target: "vidfit::ffmpeg::runner",
                    "Reading encoder progress failed: {}",
                    e
                );
                0
            }
        };
        if read == 0 {
            break;
        }

        let line = String::from_utf8_lossy(&line_buf);
        if let Some(sample) = tracker.feed(line.trim_end_matches(['\n', '\r'])) {
            on_sample(sample);
        }
        line_buf.clear();

        if cancel.is_cancelled() {
            log::info!(
                target: "vidfit::ffmpeg::runner",
                "Cancellation requested, killing encoder (pid {})",
                child.id()
            );
            kill_and_reap(&mut child);
            return Ok(PassOutcome::Cancelled);
        }
    }

    let status = child.wait()?;
    let _ = stderr_handle.join();
    let average_fps = tracker.average_fps();

    if status.success() {
        log::info!(
            target: "vidfit::ffmpeg::runner",
            "Encoder pass completed (average fps {:?})",
            average_fps
        );
        return Ok(PassOutcome::Completed { average_fps });
    }

    let stderr_bytes = stderr_buffer.lock().clone();
    let stderr_str = String::from_utf8_lossy(&stderr_bytes).to_string();
    let code = status.code().unwrap_or(-1);
    let err_preview = stderr_str
        .lines()
        .rev()
        .take(3)
        .collect::<Vec<_>>()
        .join("; ");
    log::error!(
        target: "vidfit::ffmpeg::runner",
        "Encoder failed (code={}): {}",
        code,
        err_preview
    );
    Ok(PassOutcome::Failed {
        average_fps,
        code,
        stderr: stderr_str,
    })
}
