use crate::api::error::{ApiError, ApiResult};
use crate::api::upload::{UploadForm, read_upload};
use crate::app_state::{AppState, PROCESSED_DIR};
use crate::config::Config;
use crate::media::{Background, BackgroundKind, CompositionJob, compose};
use crate::text::build_text_block;
use axum::body::Body;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Extension, Multipart, Path as AxumPath};
use axum::http::{HeaderMap, HeaderValue, Response, StatusCode, header};
use axum::response::{IntoResponse, Json};
use mime_guess::from_path;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt as _, AsyncSeekExt as _};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: String,
    pub file: String,
    pub download_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WaitlistResponse {
    pub active_jobs: usize,
    /// 0 when unthrottled
    pub permits: usize,
}

pub async fn waitlist(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let active_jobs = state
        .active_jobs
        .load(std::sync::atomic::Ordering::Acquire);

    (
        StatusCode::OK,
        Json(WaitlistResponse {
            active_jobs,
            permits: state.config.permits,
        }),
    )
}

/// POST /upload: stage the form, compose, clean up, answer with the download link.
pub async fn upload(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<UploadResponse>> {
    let multipart = multipart.map_err(|rejection| ApiError::validation(rejection.body_text()))?;
    let mut form = read_upload(&state, multipart).await?;
    // Dropped with the request if the client goes away mid-composition
    let staged = std::mem::take(&mut form.staged);

    let file = state.next_output_name();
    let job = composition_job(&state, &form, &file);
    info!(
        %file,
        doctor = %form.fields.doctor_name,
        background = form.background.is_some(),
        "Composition requested"
    );

    let result = {
        let _active = state.track_job();
        let _permit = state.acquire_permit().await;
        compose(&job, &state.config).await
    };

    // Inputs go away whatever the outcome
    staged.cleanup().await;
    result?;

    let download_url = download_url(&state.config, &headers, &file);
    Ok(Json(UploadResponse {
        message: "Video processed successfully".into(),
        file,
        download_url,
    }))
}

fn composition_job(state: &AppState, form: &UploadForm, file: &str) -> CompositionJob {
    let config = &state.config;
    CompositionJob {
        video: form.video.path.clone(),
        background: form.background.as_ref().map(|staged| Background {
            path: staged.path.clone(),
            kind: BackgroundKind::from_mime(&staged.mime),
        }),
        staging: state.temp_dir().join(file),
        output: state.processed_dir().join(file),
        text_block: build_text_block(&form.fields, config.wrap_width, config.escape_profile()),
    }
}

/// Absolute when a base URL or Host header is known, relative otherwise.
fn download_url(config: &Config, headers: &HeaderMap, file: &str) -> String {
    let path = format!("/{PROCESSED_DIR}/{file}");
    if let Some(base) = &config.public_base_url {
        return format!("{}{path}", base.trim_end_matches('/'));
    }

    match headers.get(header::HOST).and_then(|host| host.to_str().ok()) {
        Some(host) => format!("http://{host}{path}"),
        None => path,
    }
}

/// Only plain file names inside the processed directory.
fn is_valid_filename(filename: &str) -> bool {
    !filename.is_empty()
        && filename.len() <= 255
        && !filename.contains('/')
        && !filename.contains('\\')
        && !filename.contains("..")
        && !filename.starts_with('.')
}

/// GET /processed/{filename}
pub async fn serve_processed(
    Extension(state): Extension<AppState>,
    AxumPath(filename): AxumPath<String>,
    headers: HeaderMap,
) -> ApiResult<Response<Body>> {
    if !is_valid_filename(&filename) {
        warn!(%filename, "Invalid filename");
        return Err(ApiError::validation("Invalid filename"));
    }

    let path = state.processed_dir().join(&filename);
    let size = match tokio::fs::metadata(&path).await {
        Ok(metadata) if metadata.is_file() => metadata.len(),
        _ => return Err(ApiError::NotFound),
    };

    let (status, start, end) = parse_range(&headers, size)?;
    debug!(%filename, size, start, end, "Serving processed file");

    let body = if size == 0 {
        Body::empty()
    } else {
        let mut fh = tokio::fs::File::open(&path).await?;
        fh.seek(std::io::SeekFrom::Start(start)).await?;
        Body::from_stream(ReaderStream::new(fh.take(end - start + 1)))
    };
    let len = if size == 0 { 0 } else { end - start + 1 };

    let mut res = Response::new(body);
    *res.status_mut() = status;
    let headers = res.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type(&filename));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public,max-age=3600"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    if status == StatusCode::PARTIAL_CONTENT
        && let Ok(range) = HeaderValue::from_str(&format!("bytes {start}-{end}/{size}"))
    {
        headers.insert(header::CONTENT_RANGE, range);
    }
    Ok(res)
}

fn content_type(filename: &str) -> HeaderValue {
    HeaderValue::from_str(from_path(filename).first_or_octet_stream().essence_str())
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))
}

/// Single `bytes=start-[end]` ranges; anything else serves the whole file.
fn parse_range(headers: &HeaderMap, size: u64) -> ApiResult<(StatusCode, u64, u64)> {
    let whole = (StatusCode::OK, 0, size.saturating_sub(1));

    let Some(spec) = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("bytes="))
    else {
        return Ok(whole);
    };
    let Some((start, end)) = spec.split_once('-') else {
        return Ok(whole);
    };
    let Ok(start) = start.trim().parse::<u64>() else {
        return Ok(whole);
    };

    if start >= size {
        return Err(ApiError::RangeNotSatisfiable);
    }
    let end = end
        .trim()
        .parse::<u64>()
        .map_or(size - 1, |end| end.min(size - 1));
    if end < start {
        return Err(ApiError::RangeNotSatisfiable);
    }

    Ok((StatusCode::PARTIAL_CONTENT, start, end))
}
