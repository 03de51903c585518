use lopdf::Document;
use tracing::debug;

use common::error::AppError;

/// Text extracted for a single page, 1-based. Plain-text documents are a
/// single page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub page_number: u32,
    pub text: String,
}

/// Extracts per-page text from the uploaded bytes. PDFs go through the
/// text layer; `text/*` content is decoded as UTF-8. Anything else is
/// rejected before processing starts.
pub async fn extract_pages(bytes: Vec<u8>, mime_type: &str) -> Result<Vec<PageText>, AppError> {
    if mime_type == "application/pdf" {
        return extract_pdf_pages(bytes).await;
    }

    if mime_type.starts_with("text/") {
        let text = String::from_utf8(bytes)
            .map_err(|err| AppError::Processing(format!("Document is not valid UTF-8: {err}")))?;
        if text.trim().is_empty() {
            return Err(AppError::Processing(
                "Document contains no extractable text".into(),
            ));
        }
        return Ok(vec![PageText {
            page_number: 1,
            text,
        }]);
    }

    Err(AppError::Validation(format!(
        "Unsupported content type for ingestion: {mime_type}"
    )))
}

/// Runs the PDF text layer extraction off the async executor. Pages whose
/// text layer is empty are dropped, but the original page numbering is
/// preserved for provenance.
async fn extract_pdf_pages(pdf_bytes: Vec<u8>) -> Result<Vec<PageText>, AppError> {
    let pages = tokio::task::spawn_blocking(move || -> Result<Vec<PageText>, AppError> {
        let document = Document::load_mem(&pdf_bytes)
            .map_err(|err| AppError::Processing(format!("Failed to parse PDF: {err}")))?;
        let mut page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
        page_numbers.sort_unstable();

        if page_numbers.is_empty() {
            return Err(AppError::Processing("PDF appears to have no pages".into()));
        }

        let texts = pdf_extract::extract_text_from_mem_by_pages(&pdf_bytes)
            .map_err(|err| AppError::Processing(format!("Failed to extract PDF text: {err}")))?;

        let pages = page_numbers
            .into_iter()
            .zip(texts)
            .filter_map(|(page_number, text)| {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(PageText {
                        page_number,
                        text: trimmed.to_string(),
                    })
                }
            })
            .collect::<Vec<_>>();

        Ok(pages)
    })
    .await??;

    if pages.is_empty() {
        return Err(AppError::Processing(
            "PDF has no text layer; nothing to ingest".into(),
        ));
    }

    debug!(pages = pages.len(), "extracted PDF text layer");

    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_plain_text_is_a_single_page() {
        let pages = extract_pages(b"hello world".to_vec(), "text/plain")
            .await
            .expect("extract");
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_number, 1);
        assert_eq!(pages[0].text, "hello world");
    }

    #[tokio::test]
    async fn test_empty_text_document_is_rejected() {
        let result = extract_pages(b"   \n  ".to_vec(), "text/plain").await;
        assert!(matches!(result, Err(AppError::Processing(_))));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_rejected() {
        let result = extract_pages(vec![0xff, 0xfe, 0x00], "text/plain").await;
        assert!(matches!(result, Err(AppError::Processing(_))));
    }

    #[tokio::test]
    async fn test_unsupported_mime_type_is_rejected() {
        let result = extract_pages(b"bytes".to_vec(), "image/png").await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_garbage_pdf_bytes_fail_cleanly() {
        let result = extract_pages(b"not a pdf at all".to_vec(), "application/pdf").await;
        assert!(matches!(result, Err(AppError::Processing(_))));
    }
}
