use super::types::PageTextExtractor;
use super::ExtractionError;

/// PDF text extractor using the pdf-extract crate.
/// Handles digital PDFs with embedded text layers.
pub struct PdfTextExtractor;

impl PageTextExtractor for PdfTextExtractor {
    fn name(&self) -> &'static str {
        "pdf-extract"
    }

    fn extract_pages(&self, pdf_bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
        pdf_extract::extract_text_from_mem_by_pages(pdf_bytes)
            .map_err(|e| ExtractionError::PdfParsing(e.to_string()))
    }
}

/// Secondary extractor that walks page content streams with lopdf directly.
/// Slower, but copes with some font setups pdf-extract gives up on.
pub struct LopdfTextExtractor;

impl LopdfTextExtractor {
    fn read(&self, pdf_bytes: &[u8], limit: Option<usize>) -> Result<Vec<String>, ExtractionError> {
        let doc = lopdf::Document::load_mem(pdf_bytes)
            .map_err(|e| ExtractionError::PdfParsing(e.to_string()))?;

        let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
        let take = limit.unwrap_or(page_numbers.len());

        let mut pages = Vec::with_capacity(take.min(page_numbers.len()));
        for page_number in page_numbers.into_iter().take(take) {
            // A single bad page should not sink the rest of the document
            match doc.extract_text(&[page_number]) {
                Ok(text) => pages.push(text),
                Err(e) => {
                    tracing::debug!(page = page_number, error = %e, "lopdf could not read page");
                    pages.push(String::new());
                }
            }
        }
        Ok(pages)
    }
}

impl PageTextExtractor for LopdfTextExtractor {
    fn name(&self) -> &'static str {
        "lopdf"
    }

    fn extract_pages(&self, pdf_bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
        self.read(pdf_bytes, None)
    }

    fn extract_first_pages(&self, pdf_bytes: &[u8], n: usize) -> Result<Vec<String>, ExtractionError> {
        self.read(pdf_bytes, Some(n))
    }
}
