//! Extension to MIME type mapping for stored artifacts.

use std::path::Path;

/// MIME type for files whose extension is not in the table.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

const MIME_TYPES: &[(&str, &str)] = &[
    ("pdf", "application/pdf"),
    ("xls", "application/vnd.ms-excel"),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    ("doc", "application/msword"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    ("csv", "text/csv"),
    ("txt", "text/plain"),
    ("html", "text/html"),
    ("xml", "application/xml"),
    ("json", "application/json"),
    ("zip", "application/zip"),
    ("rar", "application/x-rar-compressed"),
];

/// MIME type derived from the file name's extension (case-insensitive).
#[must_use]
pub fn mime_for_file_name(file_name: &str) -> &'static str {
    let Some(ext) = Path::new(file_name).extension().and_then(|e| e.to_str()) else {
        return DEFAULT_MIME_TYPE;
    };
    let ext = ext.to_ascii_lowercase();
    MIME_TYPES
        .iter()
        .find(|(known, _)| *known == ext)
        .map_or(DEFAULT_MIME_TYPE, |(_, mime)| mime)
}
