use std::fs;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;

use crate::encoding::decode_base64_image;
use crate::error::BackendError;
use crate::tempfiles::TempFileAllocator;
use crate::transport::HttpReply;

/// The two success shapes the server uses: `images` from txt2img/img2img,
/// `image` from the extras endpoint.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ImagePayload {
    Batch { images: Vec<String> },
    Single { image: String },
}

impl ImagePayload {
    fn into_first_image(self) -> Option<String> {
        match self {
            ImagePayload::Batch { images } => images.into_iter().next(),
            ImagePayload::Single { image } => Some(image),
        }
    }
}

/// Turns one server reply into either a file on disk or a classified error.
pub fn reconcile(
    reply: &HttpReply,
    filename_prefix: &str,
    temp_files: &dyn TempFileAllocator,
) -> Result<PathBuf, BackendError> {
    if reply.status == 200 {
        save_image(reply, filename_prefix, temp_files)
    } else {
        Err(classify_failure(reply))
    }
}

fn save_image(
    reply: &HttpReply,
    filename_prefix: &str,
    temp_files: &dyn TempFileAllocator,
) -> Result<PathBuf, BackendError> {
    let image_b64 = extract_image(&reply.body).ok_or_else(|| {
        log::warn!(
            "unexpected Automatic1111 response content: {}",
            truncate_text(&reply.text_lossy(), 512)
        );
        BackendError::UnexpectedResponse
    })?;

    let output = temp_files
        .allocate(&format!("{filename_prefix}-"))
        .map_err(BackendError::TempFile)?;
    let bytes = decode_base64_image(&image_b64).map_err(BackendError::Base64Decode)?;
    fs::write(&output, bytes).map_err(BackendError::TempFileWrite)?;
    log::debug!("saved generated image to {}", output.display());
    Ok(output)
}

fn extract_image(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<ImagePayload>(body)
        .ok()?
        .into_first_image()
}

pub fn classify_failure(reply: &HttpReply) -> BackendError {
    if reply.status != 404 {
        return BackendError::UnknownResponse {
            status: reply.status,
        };
    }
    // A 404 that isn't a JSON object is what a server outside API mode sends.
    let Ok(Value::Object(payload)) = reply.json() else {
        return BackendError::NotInApiMode;
    };
    match payload.get("detail").and_then(Value::as_str) {
        Some("Not Found") => BackendError::NotInApiMode,
        Some("Sampler not found") => BackendError::InvalidSampler,
        _ => BackendError::ServerError(Value::Object(payload).to_string()),
    }
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
