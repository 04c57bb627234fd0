//! Content-type inference from file extensions.

use std::path::Path;

/// Type used when the extension is unknown or missing.
pub const DEFAULT_CONTENT_TYPE: &str = "binary/octet-stream";

/// Guess the MIME type of a file from its extension.
pub fn content_type(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}
