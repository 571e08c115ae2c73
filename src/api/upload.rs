//! Multipart upload staging and validation.

use crate::api::error::{ApiError, ApiResult};
use crate::app_state::AppState;
use crate::cleanup::CleanupGuard;
use crate::text::TextFields;
use axum::extract::Multipart;
use axum::extract::multipart::Field;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt as _;
use tracing::debug;

pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "video/mp4",
    "video/quicktime",
    "video/x-msvideo",
    "video/x-matroska",
    "video/webm",
    "video/mpeg",
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/bmp",
];

const DOCTOR_NAME_FIELD: &str = "doctorName";
const DEGREE_FIELD: &str = "degree";
const MOBILE_FIELD: &str = "mobile";
const ADDRESS_FIELD: &str = "address";
const VIDEO_FIELD: &str = "video";
const BACKGROUND_FIELD: &str = "background";

/// An uploaded file written to the uploads directory.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub path: PathBuf,
    pub mime: String,
}

#[derive(Debug)]
pub struct UploadForm {
    pub fields: TextFields,
    pub video: StagedFile,
    pub background: Option<StagedFile>,
    /// Removes every staged file unless handed over.
    pub staged: CleanupGuard,
}

#[derive(Debug, Default)]
struct PartialForm {
    doctor_name: Option<String>,
    degree: Option<String>,
    mobile: Option<String>,
    address: Option<String>,
    video: Option<StagedFile>,
    background: Option<StagedFile>,
}

impl PartialForm {
    fn into_form(self, background_required: bool) -> ApiResult<UploadForm> {
        let missing = [
            (DOCTOR_NAME_FIELD, &self.doctor_name),
            (DEGREE_FIELD, &self.degree),
            (MOBILE_FIELD, &self.mobile),
            (ADDRESS_FIELD, &self.address),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_deref().is_none_or(|v| v.trim().is_empty()))
        .map(|(name, _)| name)
        .collect::<Vec<_>>();

        if !missing.is_empty() {
            return Err(ApiError::validation(format!(
                "Missing required field(s): {}",
                missing.join(", ")
            )));
        }

        let Some(video) = self.video else {
            return Err(ApiError::validation("Video file is required"));
        };
        if background_required && self.background.is_none() {
            return Err(ApiError::validation("Background file is required"));
        }

        Ok(UploadForm {
            fields: TextFields {
                doctor_name: self.doctor_name.unwrap_or_default(),
                degree: self.degree.unwrap_or_default(),
                mobile: self.mobile.unwrap_or_default(),
                address: self.address.unwrap_or_default(),
            },
            video,
            background: self.background,
            staged: CleanupGuard::default(),
        })
    }
}

/// Read the whole form. On any validation failure every file staged so far is
/// removed before the error is returned. If the request goes away mid-read
/// they are removed in the background.
pub async fn read_upload(state: &AppState, mut multipart: Multipart) -> ApiResult<UploadForm> {
    let mut partial = PartialForm::default();
    let mut staged = CleanupGuard::default();

    let result = match read_parts(state, &mut multipart, &mut partial, &mut staged).await {
        Ok(()) => partial.into_form(state.config.background_required),
        Err(error) => Err(error),
    };

    match result {
        Ok(mut form) => {
            form.staged = staged;
            Ok(form)
        }
        Err(error) => {
            debug!(%error, staged = staged.paths().len(), "Upload rejected");
            staged.cleanup().await;
            Err(error)
        }
    }
}

async fn read_parts(
    state: &AppState,
    multipart: &mut Multipart,
    partial: &mut PartialForm,
    staged: &mut CleanupGuard,
) -> ApiResult<()> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| ApiError::validation(error.body_text()))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        match name.as_str() {
            DOCTOR_NAME_FIELD => partial.doctor_name = Some(read_text(field).await?),
            DEGREE_FIELD => partial.degree = Some(read_text(field).await?),
            MOBILE_FIELD => partial.mobile = Some(read_text(field).await?),
            ADDRESS_FIELD => partial.address = Some(read_text(field).await?),
            VIDEO_FIELD | BACKGROUND_FIELD => {
                let already = match name.as_str() {
                    VIDEO_FIELD => partial.video.is_some(),
                    _ => partial.background.is_some(),
                };
                if already {
                    return Err(ApiError::validation(format!(
                        "Only one {name} file is allowed"
                    )));
                }

                let Some(file) = stage_file(state, &name, field, staged).await? else {
                    continue;
                };
                if name == VIDEO_FIELD {
                    partial.video = Some(file);
                } else {
                    partial.background = Some(file);
                }
            }
            other => debug!(field = other, "Ignoring unknown form field"),
        }
    }
    Ok(())
}

async fn read_text(field: Field<'_>) -> ApiResult<String> {
    field
        .text()
        .await
        .map_err(|error| ApiError::validation(error.body_text()))
}

/// Resolve the part's MIME type, falling back to the file extension.
fn detect_mime(content_type: Option<&str>, file_name: &str) -> Option<String> {
    let declared = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .filter(|ct| !ct.is_empty() && ct != "application/octet-stream");

    declared.or_else(|| {
        mime_guess::from_path(file_name)
            .first_raw()
            .map(str::to_string)
    })
}

pub fn is_allowed_mime(mime: &str) -> bool {
    ALLOWED_MIME_TYPES.contains(&mime)
}

/// Extension for the staged file, taken from the client's name when sane.
fn staged_extension(file_name: &str, mime: &str) -> String {
    let from_name = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .map(str::to_ascii_lowercase);

    from_name
        .or_else(|| {
            mime_guess::get_mime_extensions_str(mime)
                .and_then(|exts| exts.first())
                .map(|ext| ext.to_string())
        })
        .unwrap_or_else(|| "bin".to_string())
}

/// Stream a file part to disk. Parts without a file name count as absent.
///
/// The path is registered with `staged` before the file exists, so a partial
/// write is always cleaned up with the rest of the form.
async fn stage_file(
    state: &AppState,
    name: &str,
    mut field: Field<'_>,
    staged: &mut CleanupGuard,
) -> ApiResult<Option<StagedFile>> {
    let file_name = field.file_name().unwrap_or_default().to_string();
    if file_name.is_empty() {
        debug!(field = name, "File field without a file name, ignoring");
        return Ok(None);
    }

    let Some(mime) = detect_mime(field.content_type(), &file_name) else {
        return Err(ApiError::validation(format!(
            "Could not determine the type of {name} file"
        )));
    };
    if !is_allowed_mime(&mime) {
        return Err(ApiError::validation(format!(
            "Unsupported {name} file type: {mime}"
        )));
    }

    let path = state.uploads_dir().join(format!(
        "upload_{}_{name}.{}",
        state.next_stamp(),
        staged_extension(&file_name, &mime)
    ));
    staged.push(path.clone());

    let limit = state.config.max_upload_bytes;
    let mut file = tokio::fs::File::create(&path).await?;
    let mut size = 0u64;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|error| ApiError::validation(error.body_text()))?
    {
        size += chunk.len() as u64;
        if size > limit {
            return Err(ApiError::validation(format!(
                "{name} file exceeds the {limit} byte limit"
            )));
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    debug!(field = name, ?path, size, mime, "Staged upload");
    Ok(Some(StagedFile { path, mime }))
}
