use std::fmt;

/// Stable machine-readable error codes handed to the host's error display.
///
/// The string values are part of the host contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    LocalServerUrlMissing,
    LocalServerNotFound,
    LocalServerUrlInvalid,
    Timeout,
    RequestFailed,
    UnexpectedResponse,
    TempFile,
    Base64Decode,
    TempFileWrite,
    NotInApiMode,
    InvalidSampler,
    UnknownError,
    UnknownErrorResponse,
    SaveSegmentationImage,
    MissingParameter,
    InitImageRead,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 16] = [
        ErrorCode::LocalServerUrlMissing,
        ErrorCode::LocalServerNotFound,
        ErrorCode::LocalServerUrlInvalid,
        ErrorCode::Timeout,
        ErrorCode::RequestFailed,
        ErrorCode::UnexpectedResponse,
        ErrorCode::TempFile,
        ErrorCode::Base64Decode,
        ErrorCode::TempFileWrite,
        ErrorCode::NotInApiMode,
        ErrorCode::InvalidSampler,
        ErrorCode::UnknownError,
        ErrorCode::UnknownErrorResponse,
        ErrorCode::SaveSegmentationImage,
        ErrorCode::MissingParameter,
        ErrorCode::InitImageRead,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::LocalServerUrlMissing => "local_server_url_missing",
            ErrorCode::LocalServerNotFound => "local_server_not_found",
            ErrorCode::LocalServerUrlInvalid => "local_server_url_invalid",
            ErrorCode::Timeout => "timeout",
            ErrorCode::RequestFailed => "request_failed",
            ErrorCode::UnexpectedResponse => "unexpected_response",
            ErrorCode::TempFile => "temp_file",
            ErrorCode::Base64Decode => "base64_decode",
            ErrorCode::TempFileWrite => "temp_file_write",
            ErrorCode::NotInApiMode => "automatic1111_not_in_api_mode",
            ErrorCode::InvalidSampler => "invalid_sampler",
            ErrorCode::UnknownError => "unknown_error",
            ErrorCode::UnknownErrorResponse => "unknown_error_response",
            ErrorCode::SaveSegmentationImage => "save_segmentation_image",
            ErrorCode::MissingParameter => "missing_parameter",
            ErrorCode::InitImageRead => "init_image_read",
        }
    }

    pub fn parse(raw: &str) -> Option<ErrorCode> {
        let needle = raw.trim();
        Self::ALL.into_iter().find(|code| code.as_str() == needle)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
