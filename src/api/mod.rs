pub mod error;
pub mod middleware;
pub mod routes;
pub mod upload;

// Re-export public types and functions
pub use error::{ApiError, ApiResult};
pub use middleware::log_request_errors;
pub use routes::{UploadResponse, WaitlistResponse, serve_processed, upload, waitlist};
pub use upload::{ALLOWED_MIME_TYPES, StagedFile, UploadForm};
