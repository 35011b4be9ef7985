use axum::{extract::multipart::MultipartError, http::StatusCode};

use crate::errors::AppError;
use crate::extraction::CvFormat;

const GENERIC_MIME: &str = "application/octet-stream";
const FALLBACK_FILENAME: &str = "cv";

/// Content type to process the upload as.
///
/// Browsers frequently send `application/octet-stream` (or nothing) for
/// DOCX files, so the declared type only wins when it is specific.
pub fn resolve_mime(declared: Option<&str>, filename: &str) -> String {
    match declared.map(str::trim) {
        Some(mime) if !mime.is_empty() && !mime.eq_ignore_ascii_case(GENERIC_MIME) => {
            mime.to_string()
        }
        _ => mime_guess::from_path(filename)
            .first_raw()
            .unwrap_or(GENERIC_MIME)
            .to_string(),
    }
}

/// Strips any client-side directory components from an uploaded filename.
pub fn clean_filename(raw: Option<&str>) -> String {
    raw.and_then(|name| name.rsplit(['/', '\\']).next())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(FALLBACK_FILENAME)
        .to_string()
}

/// Trimmed form value; blank submissions count as absent.
pub fn normalize_field(raw: &str) -> Option<String> {
    let value = raw.trim();
    (!value.is_empty()).then(|| value.to_string())
}

pub fn validate_file(size: usize, limit: usize, mime: &str) -> Result<CvFormat, AppError> {
    if size == 0 {
        return Err(AppError::Validation("Uploaded file is empty".into()));
    }
    if size > limit {
        return Err(AppError::PayloadTooLarge { limit });
    }
    CvFormat::from_mime(mime).ok_or_else(|| AppError::UnsupportedMediaType(mime.to_string()))
}

/// Multipart failures caused by the body limit surface as 413, the rest as 400.
pub fn reject_multipart(e: MultipartError, limit: usize) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge { limit }
    } else {
        e.into()
    }
}
