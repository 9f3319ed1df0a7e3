//! Document text extraction.
//!
//! Extraction for rich office formats is a black-box concern; this module
//! handles the plain-text family directly and reports everything else as
//! unsupported so ingestion can skip it with a warning.

use std::path::Path;

use crate::error::RetrievalError;

/// File extensions the extractor understands.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md", "markdown"];

/// True if the file's extension is one the extractor understands.
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Extract text content from a file.
///
/// Returns `Ok(None)` for unsupported formats; invalid UTF-8 is replaced
/// rather than failing the whole document.
pub fn extract_text(path: &Path) -> Result<Option<String>, RetrievalError> {
    if !is_supported(path) {
        return Ok(None);
    }
    let bytes = std::fs::read(path)?;
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

/// Extract text from raw uploaded bytes, using the filename to pick the
/// format.
pub fn extract_from_bytes(name: &str, bytes: &[u8]) -> Result<Option<String>, RetrievalError> {
    if !is_supported(Path::new(name)) {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(bytes).into_owned()))
}
