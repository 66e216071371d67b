use std::io;
use std::path::PathBuf;

use airender_contracts::catalog::CatalogKind;
use airender_contracts::errors::ErrorCode;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Every failure a backend call can end in. `Display` is the message shown
/// to the user, `code()` the stable machine code.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("You need to specify a location for the local Stable Diffusion server in the add-on preferences.")]
    ServerUrlMissing,

    #[error("The local Stable Diffusion server couldn't be found. It's either not running, or it's running at a different location than what you specified in the add-on preferences.")]
    ServerNotFound(#[source] reqwest::Error),

    #[error("The url for your local Stable Diffusion server is invalid. Please set it correctly in the add-on preferences.")]
    ServerUrlInvalid(#[source] reqwest::Error),

    #[error("The local Stable Diffusion server timed out. Set a longer timeout in AI Render preferences, or use a smaller image size.")]
    Timeout(#[source] reqwest::Error),

    #[error("The request to the local Stable Diffusion server failed: {0}")]
    RequestFailed(#[source] reqwest::Error),

    #[error("Received an unexpected response from the Automatic1111 Stable Diffusion server.")]
    UnexpectedResponse,

    #[error("Couldn't create a temp file to save image.")]
    TempFile(#[source] io::Error),

    #[error("Couldn't decode base64 image from the Automatic1111 Stable Diffusion server.")]
    Base64Decode(#[source] base64::DecodeError),

    #[error("Couldn't write to temp file.")]
    TempFileWrite(#[source] io::Error),

    #[error("It looks like the Automatic1111 server is running, but it's not in API mode.")]
    NotInApiMode,

    #[error("The sampler you selected is not available on the Automatic1111 Stable Diffusion server. Please select a different sampler.")]
    InvalidSampler,

    #[error("An error occurred in the Automatic1111 Stable Diffusion server. Full server response: {0}")]
    ServerError(String),

    #[error("An error occurred in the Automatic1111 Stable Diffusion server. Check the server logs for more info.")]
    UnknownResponse { status: u16 },

    #[error("Couldn't save segmentation image ({0})")]
    SaveSegmentationImage(String),

    #[error("The generation parameters are missing a usable '{0}' value.")]
    MissingParameter(&'static str),

    #[error("Couldn't read the input image {}", .path.display())]
    InitImageRead {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("{}", catalog_unavailable_message(.kind))]
    CatalogUnavailable { kind: CatalogKind, detail: String },

    #[error("{}", catalog_empty_message(.kind))]
    CatalogEmpty { kind: CatalogKind },

    #[error("Couldn't store the list of {}: {detail}", .kind.label())]
    CatalogStore { kind: CatalogKind, detail: String },
}

impl BackendError {
    pub fn code(&self) -> Option<ErrorCode> {
        let code = match self {
            BackendError::ServerUrlMissing => ErrorCode::LocalServerUrlMissing,
            BackendError::ServerNotFound(_) => ErrorCode::LocalServerNotFound,
            BackendError::ServerUrlInvalid(_) => ErrorCode::LocalServerUrlInvalid,
            BackendError::Timeout(_) => ErrorCode::Timeout,
            BackendError::RequestFailed(_) => ErrorCode::RequestFailed,
            BackendError::UnexpectedResponse => ErrorCode::UnexpectedResponse,
            BackendError::TempFile(_) => ErrorCode::TempFile,
            BackendError::Base64Decode(_) => ErrorCode::Base64Decode,
            BackendError::TempFileWrite(_) => ErrorCode::TempFileWrite,
            BackendError::NotInApiMode => ErrorCode::NotInApiMode,
            BackendError::InvalidSampler => ErrorCode::InvalidSampler,
            BackendError::ServerError(_) => ErrorCode::UnknownError,
            BackendError::UnknownResponse { .. } => ErrorCode::UnknownErrorResponse,
            BackendError::SaveSegmentationImage(_) => ErrorCode::SaveSegmentationImage,
            BackendError::MissingParameter(_) => ErrorCode::MissingParameter,
            BackendError::InitImageRead { .. } => ErrorCode::InitImageRead,
            BackendError::CatalogUnavailable { .. }
            | BackendError::CatalogEmpty { .. }
            | BackendError::CatalogStore { .. } => return None,
        };
        Some(code)
    }

    pub fn init_image_read(
        path: impl Into<PathBuf>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        BackendError::InitImageRead {
            path: path.into(),
            source: Box::new(source),
        }
    }
}

fn catalog_unavailable_message(kind: &CatalogKind) -> String {
    let base = format!(
        "Couldn't get the list of available {} from the Automatic1111 server.",
        kind.label()
    );
    match kind {
        CatalogKind::ControlNetModels | CatalogKind::ControlNetModules => {
            format!("{base} Make sure ControlNet is installed and activated.")
        }
        CatalogKind::SdModels | CatalogKind::UpscalerModels => base,
    }
}

fn catalog_empty_message(kind: &CatalogKind) -> &'static str {
    match kind {
        CatalogKind::SdModels => "You don't have any Stable Diffusion models installed. You will need to download them from Hugging Face.",
        CatalogKind::UpscalerModels => "No upscaler models are installed in Automatic1111.",
        CatalogKind::ControlNetModels => "You don't have any ControlNet models installed. You will need to download them from Hugging Face.",
        CatalogKind::ControlNetModules => "No ControlNet modules are available in Automatic1111.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_errors_have_no_code() {
        let err = BackendError::CatalogUnavailable {
            kind: CatalogKind::ControlNetModules,
            detail: "connection refused".to_string(),
        };
        assert_eq!(err.code(), None);
        assert!(err
            .to_string()
            .contains("Make sure ControlNet is installed and activated."));
        assert_eq!(
            BackendError::CatalogEmpty {
                kind: CatalogKind::UpscalerModels
            }
            .to_string(),
            "No upscaler models are installed in Automatic1111."
        );
    }

    #[test]
    fn protocol_errors_map_to_stable_codes() {
        assert_eq!(
            BackendError::NotInApiMode.code().map(ErrorCode::as_str),
            Some("automatic1111_not_in_api_mode")
        );
        assert_eq!(
            BackendError::ServerError("{}".to_string()).code(),
            Some(ErrorCode::UnknownError)
        );
        assert_eq!(
            BackendError::UnknownResponse { status: 500 }.code(),
            Some(ErrorCode::UnknownErrorResponse)
        );
        let read = BackendError::init_image_read(
            "/nope.png",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert_eq!(read.code(), Some(ErrorCode::InitImageRead));
        assert_eq!(read.to_string(), "Couldn't read the input image /nope.png");
    }
}
