use serde::{Deserialize, Serialize};

use super::ExtractionError;

/// Reads the text layer of a PDF, one string per page.
pub trait PageTextExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract_pages(&self, pdf_bytes: &[u8]) -> Result<Vec<String>, ExtractionError>;

    /// Text of the first `n` pages. Extractors that can stop early override this.
    fn extract_first_pages(&self, pdf_bytes: &[u8], n: usize) -> Result<Vec<String>, ExtractionError> {
        let mut pages = self.extract_pages(pdf_bytes)?;
        pages.truncate(n);
        Ok(pages)
    }
}

/// Which extractor in the chain produced the text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionTier {
    Primary,
    Secondary,
}

/// Result of reading a whole document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedText {
    pub full_text: String,
    pub page_count: usize,
    pub tier: ExtractionTier,
    pub extractor: String,
}

/// Pages joined the way every downstream parser expects them.
pub fn join_pages(pages: &[String]) -> String {
    let mut out = String::new();
    for page in pages {
        if !page.is_empty() {
            out.push_str(page);
            out.push('\n');
        }
    }
    out
}

/// Trimmed character count, the measure used against the minimum-text threshold.
pub fn content_chars(text: &str) -> usize {
    text.trim().chars().count()
}
