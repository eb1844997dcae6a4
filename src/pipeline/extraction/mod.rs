pub mod types;
pub mod pdf;
pub mod chain;

pub use types::*;
pub use pdf::*;
pub use chain::*;

use thiserror::Error;

/// Shown to the user when a document has no usable text layer.
pub const UNREADABLE_REMEDIATION: &str = "This PDF appears to be a scanned image without OCR text. \
Please run OCR on the PDF first (using Adobe Acrobat, or a free tool like ocrmypdf) and re-upload.";

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF parsing failed: {0}")]
    PdfParsing(String),

    /// Both extractors ran but found (almost) no text. Distinct from a parse
    /// failure: the file is valid, it just needs OCR.
    #[error("{remediation}")]
    Unreadable { chars_found: usize, remediation: String },
}

impl ExtractionError {
    pub fn unreadable(chars_found: usize) -> Self {
        Self::Unreadable {
            chars_found,
            remediation: UNREADABLE_REMEDIATION.to_string(),
        }
    }

    pub fn is_unreadable(&self) -> bool {
        matches!(self, Self::Unreadable { .. })
    }
}
