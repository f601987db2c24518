use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use vidfit_core::cancel::CancellationToken;
use vidfit_core::compress::CompressionRequest;
use vidfit_core::error::AppError;
use vidfit_core::sidecar_api;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: u64,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcSuccess {
    id: u64,
    result: Value,
}

#[derive(Debug, serde::Serialize)]
struct RpcFailure {
    id: u64,
    error: RpcErrorPayload,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct RpcErrorPayload {
    summary: String,
    detail: String,
}

#[derive(Debug, serde::Serialize)]
struct RpcEvent<'a> {
    event: &'a str,
    payload: Value,
}

#[derive(Debug, Clone)]
struct ActiveJob {
    job_id: u64,
    cancel: CancellationToken,
}

#[derive(Clone)]
struct JobState {
    active_job: Arc<Mutex<Option<ActiveJob>>>,
    next_job_id: Arc<AtomicU64>,
}

impl JobState {
    fn new() -> Self {
        Self {
            active_job: Arc::new(Mutex::new(None)),
            next_job_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn begin_job(&self) -> Result<ActiveJob, AppError> {
        let mut guard = self.active_job.lock();
        if let Some(existing) = guard.as_ref() {
            return Err(AppError::InvalidRequest(format!(
                "Another compression is already running (jobId={})",
                existing.job_id
            )));
        }
        let job = ActiveJob {
            job_id: self.next_job_id.fetch_add(1, Ordering::Relaxed),
            cancel: CancellationToken::new(),
        };
        *guard = Some(job.clone());
        Ok(job)
    }

    fn finish_job(&self, job_id: u64) {
        let mut guard = self.active_job.lock();
        if guard.as_ref().is_some_and(|active| active.job_id == job_id) {
            *guard = None;
        }
    }

    fn current_job(&self) -> Option<ActiveJob> {
        self.active_job.lock().clone()
    }
}

struct ActiveJobGuard {
    state: JobState,
    job_id: u64,
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        self.state.finish_job(self.job_id);
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
enum MediaInspectParams {
    Metadata {
        #[serde(rename = "inputPath")]
        input_path: PathBuf,
    },
    SettingsPreview {
        request: CompressionRequest,
    },
    CommandPreview {
        request: CompressionRequest,
    },
    UniquePath {
        path: PathBuf,
    },
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct MediaCancelParams {
    job_id: Option<u64>,
}

type SharedWriter = Arc<Mutex<io::Stdout>>;

fn write_json_line<T: serde::Serialize>(writer: &mut impl Write, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, value)
        .map_err(|e| io::Error::other(format!("serialize response: {}", e)))?;
    writer.write_all(b"\n")?;
    writer.flush()
}

fn write_json_line_shared<T: serde::Serialize>(writer: &SharedWriter, value: &T) -> io::Result<()> {
    let mut guard = writer.lock();
    write_json_line(&mut *guard, value)
}

fn emit_rpc_event(writer: &SharedWriter, event: &str, payload: Value) {
    let _ = write_json_line_shared(writer, &RpcEvent { event, payload });
}

fn parse_error_payload(err: &AppError) -> RpcErrorPayload {
    match err {
        AppError::FfmpegFailed { code, stderr } if *code == -1 => RpcErrorPayload {
            summary: stderr.clone(),
            detail: stderr.clone(),
        },
        AppError::FfmpegFailed { code, stderr } => {
            let parsed = vidfit_core::ffmpeg::parse_ffmpeg_error(stderr, Some(*code));
            RpcErrorPayload {
                summary: parsed.summary,
                detail: parsed.detail,
            }
        }
        _ => {
            let text = err.to_string();
            RpcErrorPayload {
                summary: text.clone(),
                detail: text,
            }
        }
    }
}

fn params_from_value<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, AppError> {
    serde_json::from_value(params)
        .map_err(|e| AppError::InvalidRequest(format!("Invalid params payload: {}", e)))
}

fn to_json<T: serde::Serialize>(value: T, what: &str) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|e| AppError::from(format!("Failed to serialize {}: {}", what, e)))
}

fn dispatch_sync(method: &str, params: Value, jobs: &JobState) -> Result<Value, AppError> {
    match method {
        "app.capabilities" => to_json(sidecar_api::app_capabilities()?, "app capabilities"),
        "media.inspect" => match params_from_value(params)? {
            MediaInspectParams::Metadata { input_path } => {
                to_json(sidecar_api::inspect_metadata(&input_path)?, "metadata")
            }
            MediaInspectParams::SettingsPreview { request } => {
                to_json(sidecar_api::settings_preview(&request)?, "settings preview")
            }
            MediaInspectParams::CommandPreview { request } => {
                Ok(Value::String(sidecar_api::command_preview(&request)?))
            }
            MediaInspectParams::UniquePath { path } => Ok(json!({
                "path": sidecar_api::unique_path(&path),
            })),
        },
        "media.cancel" => {
            let parsed: MediaCancelParams = params_from_value(params)?;
            match (jobs.current_job(), parsed.job_id) {
                (None, Some(job_id)) => {
                    Err(AppError::InvalidRequest(format!("Unknown jobId: {}", job_id)))
                }
                (None, None) => Ok(json!({ "cancelled": false, "jobId": Value::Null })),
                (Some(active), Some(job_id)) if active.job_id != job_id => {
                    Err(AppError::InvalidRequest(format!("Unknown jobId: {}", job_id)))
                }
                (Some(active), _) => {
                    log::info!(target: "vidfit::sidecar", "Cancelling job {}", active.job_id);
                    active.cancel.cancel();
                    Ok(json!({ "cancelled": true, "jobId": active.job_id }))
                }
            }
        }
        _ => Err(AppError::InvalidRequest(format!("Unknown method: {}", method))),
    }
}

fn respond(writer: &SharedWriter, id: u64, result: Result<Value, AppError>) {
    let written = match result {
        Ok(result) => write_json_line_shared(writer, &RpcSuccess { id, result }),
        Err(err) => write_json_line_shared(
            writer,
            &RpcFailure {
                id,
                error: parse_error_payload(&err),
            },
        ),
    };
    if let Err(err) = written {
        log::error!(target: "vidfit::sidecar", "Failed to write response {}: {}", id, err);
    }
}

fn handle_compress(request: RpcRequest, writer: &SharedWriter, jobs: &JobState) {
    let compression: CompressionRequest = match params_from_value(request.params) {
        Ok(parsed) => parsed,
        Err(err) => return respond(writer, request.id, Err(err)),
    };

    let active_job = match jobs.begin_job() {
        Ok(job) => job,
        Err(err) => return respond(writer, request.id, Err(err)),
    };
    let _job_guard = ActiveJobGuard {
        state: jobs.clone(),
        job_id: active_job.job_id,
    };

    let writer_for_events = Arc::clone(writer);
    let emit: sidecar_api::SidecarEventEmitter =
        Arc::new(move |event: &str, payload: Value| {
            emit_rpc_event(&writer_for_events, event, payload)
        });

    let result = sidecar_api::compress_with_events(
        active_job.job_id,
        &compression,
        emit,
        &active_job.cancel,
    );

    let result = match result {
        Ok(outcome) => {
            let outcome = to_json(outcome, "compression outcome");
            if let Ok(value) = &outcome {
                emit_rpc_event(
                    writer,
                    "media.job.complete",
                    json!({ "jobId": active_job.job_id, "outcome": value }),
                );
            }
            outcome.map(|value| json!({ "jobId": active_job.job_id, "outcome": value }))
        }
        Err(err) => {
            let payload = parse_error_payload(&err);
            emit_rpc_event(
                writer,
                "media.job.error",
                json!({
                    "jobId": active_job.job_id,
                    "summary": payload.summary,
                    "detail": payload.detail,
                }),
            );
            Err(err)
        }
    };
    respond(writer, request.id, result);
}

fn main() -> io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let stdin = io::stdin();
    let stdout: SharedWriter = Arc::new(Mutex::new(io::stdout()));
    let jobs = JobState::new();
    let mut workers: Vec<thread::JoinHandle<()>> = Vec::new();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: RpcErrorPayload {
                        summary: "Invalid input stream".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(&stdout, &failure);
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let request: RpcRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                let failure = RpcFailure {
                    id: 0,
                    error: RpcErrorPayload {
                        summary: "Invalid request".to_string(),
                        detail: err.to_string(),
                    },
                };
                let _ = write_json_line_shared(&stdout, &failure);
                continue;
            }
        };

        if request.method == "media.compress" {
            let writer = Arc::clone(&stdout);
            let job_state = jobs.clone();
            workers.push(thread::spawn(move || {
                handle_compress(request, &writer, &job_state);
            }));
        } else {
            let id = request.id;
            let result = dispatch_sync(&request.method, request.params, &jobs);
            respond(&stdout, id, result);
        }
    }

    for worker in workers {
        let _ = worker.join();
    }
    Ok(())
}
