//! Two-tier text extraction with a distinct "unreadable" outcome.
//!
//! The primary extractor runs first. When its trimmed output is below the
//! minimum-content threshold (or it fails outright) the whole document is
//! read again with the secondary extractor. If that is still short, the
//! document has no usable text layer and `ExtractionError::Unreadable` is
//! returned with OCR instructions. The first-page variants share the same
//! cascade but return an empty string instead of an error, because caption
//! metadata is optional.

use super::pdf::{LopdfTextExtractor, PdfTextExtractor};
use super::types::{content_chars, join_pages, ExtractedText, ExtractionTier, PageTextExtractor};
use super::ExtractionError;
use crate::config::DEFAULT_MIN_TEXT_CHARS;

pub struct TextExtractionChain {
    primary: Box<dyn PageTextExtractor>,
    secondary: Box<dyn PageTextExtractor>,
    min_text_chars: usize,
}

enum Attempt {
    Usable(Vec<String>),
    Short(usize),
    Failed(ExtractionError),
}

impl TextExtractionChain {
    pub fn new(
        primary: Box<dyn PageTextExtractor>,
        secondary: Box<dyn PageTextExtractor>,
        min_text_chars: usize,
    ) -> Self {
        Self {
            primary,
            secondary,
            min_text_chars,
        }
    }

    /// pdf-extract first, lopdf second.
    pub fn with_defaults(min_text_chars: usize) -> Self {
        Self::new(Box::new(PdfTextExtractor), Box::new(LopdfTextExtractor), min_text_chars)
    }

    /// Read every page of the document.
    pub fn extract_full(&self, pdf_bytes: &[u8]) -> Result<ExtractedText, ExtractionError> {
        let primary = self.attempt(self.primary.as_ref(), || self.primary.extract_pages(pdf_bytes));
        let primary_chars = match primary {
            Attempt::Usable(pages) => {
                return Ok(self.finish(pages, ExtractionTier::Primary, self.primary.name()))
            }
            Attempt::Short(chars) => Some(chars),
            Attempt::Failed(_) => None,
        };

        tracing::info!(
            primary = self.primary.name(),
            secondary = self.secondary.name(),
            chars = primary_chars.unwrap_or(0),
            "Primary extraction insufficient, trying secondary extractor"
        );

        match self.attempt(self.secondary.as_ref(), || self.secondary.extract_pages(pdf_bytes)) {
            Attempt::Usable(pages) => {
                Ok(self.finish(pages, ExtractionTier::Secondary, self.secondary.name()))
            }
            Attempt::Short(chars) => Err(ExtractionError::unreadable(chars.max(primary_chars.unwrap_or(0)))),
            // The primary opened the file and found it empty; the secondary
            // choking on it does not make it any less of a scan.
            Attempt::Failed(_) if primary_chars.is_some() => {
                Err(ExtractionError::unreadable(primary_chars.unwrap_or(0)))
            }
            Attempt::Failed(e) => Err(e),
        }
    }

    /// Text of the first page, or `""` when neither extractor finds enough.
    pub fn extract_first_page(&self, pdf_bytes: &[u8]) -> String {
        self.extract_first_pages(pdf_bytes, 1)
    }

    /// Text of the first `n` pages, or `""` when neither extractor finds enough.
    pub fn extract_first_pages(&self, pdf_bytes: &[u8], n: usize) -> String {
        let n = n.max(1);
        for extractor in [self.primary.as_ref(), self.secondary.as_ref()] {
            if let Attempt::Usable(pages) =
                self.attempt(extractor, || extractor.extract_first_pages(pdf_bytes, n))
            {
                return join_pages(&pages);
            }
        }
        tracing::debug!(pages = n, "No usable text on leading pages");
        String::new()
    }

    // ── Internal ────────────────────────────────────────────

    fn attempt(
        &self,
        extractor: &dyn PageTextExtractor,
        run: impl FnOnce() -> Result<Vec<String>, ExtractionError>,
    ) -> Attempt {
        match run() {
            Ok(pages) => {
                let chars = content_chars(&join_pages(&pages));
                if chars >= self.min_text_chars {
                    Attempt::Usable(pages)
                } else {
                    Attempt::Short(chars)
                }
            }
            Err(e) => {
                tracing::warn!(extractor = extractor.name(), error = %e, "Text extraction failed");
                Attempt::Failed(e)
            }
        }
    }

    fn finish(&self, pages: Vec<String>, tier: ExtractionTier, extractor: &str) -> ExtractedText {
        let full_text = join_pages(&pages);
        tracing::debug!(extractor, pages = pages.len(), chars = full_text.len(), "Text extracted");
        ExtractedText {
            full_text,
            page_count: pages.len(),
            tier,
            extractor: extractor.to_string(),
        }
    }
}

impl Default for TextExtractionChain {
    fn default() -> Self {
        Self::with_defaults(DEFAULT_MIN_TEXT_CHARS)
    }
}
