//! Page-level text extraction from PDF files.
//!
//! lopdf reads each page first. Pages it cannot decode are retried with `pdf-extract`, which
//! handles more font encodings; a document where both give up on every page is an error rather
//! than an empty document.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use lopdf::Document;

use super::types::{DocumentRecord, ExtractionError};

/// Read every page of the PDF at `path` into a [`DocumentRecord`].
///
/// Pages are returned in document order with zero-based page numbers. Pages without a text
/// layer yield empty records rather than errors so page numbering stays aligned.
pub fn extract_pages(path: &Path) -> Result<Vec<DocumentRecord>, ExtractionError> {
    let bytes = std::fs::read(path)?;
    let document = Document::load_mem(&bytes)?;
    check_readable(&document)?;

    let pages = document.get_pages();
    let source = path.display().to_string();
    let mut failed = Vec::new();
    let texts = pages
        .keys()
        .enumerate()
        .map(|(index, number)| match document.extract_text(&[*number]) {
            Ok(text) => text,
            Err(error) => {
                tracing::warn!(
                    path = %source,
                    page = index,
                    error = %error,
                    "lopdf could not extract page text"
                );
                failed.push(index);
                String::new()
            }
        })
        .collect::<Vec<_>>();

    let texts = if failed.is_empty() {
        texts
    } else {
        recover_pages(texts, &failed, fallback_pages(&bytes))?
    };

    let total_pages = texts.len() as u32;
    let records = texts
        .into_iter()
        .enumerate()
        .map(|(index, text)| DocumentRecord {
            text,
            page: index as u32,
            total_pages,
            source: source.clone(),
        })
        .collect::<Vec<_>>();

    tracing::debug!(
        path = %source,
        pages = total_pages,
        recovered = failed.len(),
        chars = records.iter().map(|record| record.text.len()).sum::<usize>(),
        "Extracted PDF text"
    );
    Ok(records)
}

fn check_readable(document: &Document) -> Result<(), ExtractionError> {
    if document.trailer.get(b"Encrypt").is_ok() {
        return Err(ExtractionError::Encrypted);
    }
    if document.get_pages().is_empty() {
        return Err(ExtractionError::NoPages);
    }
    Ok(())
}

/// Per-page text from `pdf-extract`. It panics on some malformed fonts, so the panic is caught.
fn fallback_pages(bytes: &[u8]) -> Result<Vec<String>, String> {
    match panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    })) {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(error)) => Err(error.to_string()),
        Err(_) => Err("pdf-extract aborted while decoding the document".into()),
    }
}

/// Fill the `failed` pages of `texts` from the fallback extractor's output.
fn recover_pages(
    mut texts: Vec<String>,
    failed: &[usize],
    fallback: Result<Vec<String>, String>,
) -> Result<Vec<String>, ExtractionError> {
    let reason = match fallback {
        Ok(mut pages) if pages.len() == texts.len() => {
            for &index in failed {
                texts[index] = std::mem::take(&mut pages[index]);
            }
            tracing::info!(pages = failed.len(), "Recovered page text with pdf-extract");
            return Ok(texts);
        }
        Ok(pages) => format!(
            "fallback returned {} pages, expected {}",
            pages.len(),
            texts.len()
        ),
        Err(reason) => reason,
    };

    tracing::warn!(pages = failed.len(), reason = %reason, "Fallback text extraction failed");
    if failed.len() == texts.len() {
        return Err(ExtractionError::Unreadable(reason));
    }
    Ok(texts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::pdf::render_text;
    use lopdf::{Object, dictionary};

    fn save(mut document: Document, path: &Path) {
        let mut buffer = Vec::new();
        document.save_to(&mut buffer).expect("save");
        std::fs::write(path, buffer).expect("write");
    }

    fn pageless_document() -> Document {
        let mut document = Document::with_version("1.5");
        let pages_id = document.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => Vec::<Object>::new(),
            "Count" => 0_i64,
        });
        let catalog_id = document.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        document.trailer.set("Root", catalog_id);
        document
    }

    #[test]
    fn pages_are_numbered_from_zero() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let path = workspace.path().join("doc.pdf");
        let lines_per_page = 53;
        let mut text = String::from("first page marker");
        text.push_str(&"\n".repeat(lines_per_page));
        text.push_str("second page marker");
        std::fs::write(&path, render_text(&text).expect("render")).expect("write");

        let records = extract_pages(&path).expect("extract");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].page, 0);
        assert_eq!(records[1].page, 1);
        assert!(records.iter().all(|record| record.total_pages == 2));
        assert!(records[0].text.contains("first page marker"));
        assert!(records[1].text.contains("second page marker"));
        assert_eq!(records[0].source, path.display().to_string());
    }

    #[test]
    fn garbage_bytes_fail_to_parse() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let path = workspace.path().join("broken.pdf");
        std::fs::write(&path, b"this is not a pdf").expect("write");
        assert!(matches!(extract_pages(&path), Err(ExtractionError::Pdf(_))));
    }

    #[test]
    fn missing_file_is_io_error() {
        let error = extract_pages(Path::new("/nonexistent/doc.pdf")).expect_err("missing");
        assert!(matches!(error, ExtractionError::Io(_)));
    }

    #[test]
    fn document_without_pages_is_rejected() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let path = workspace.path().join("empty.pdf");
        save(pageless_document(), &path);

        assert!(matches!(extract_pages(&path), Err(ExtractionError::NoPages)));
    }

    #[test]
    fn encrypted_document_is_rejected_before_page_checks() {
        let mut document = pageless_document();
        let encrypt_id = document.add_object(dictionary! {
            "Filter" => "Standard",
            "V" => 1_i64,
            "R" => 2_i64,
        });
        document.trailer.set("Encrypt", encrypt_id);

        assert!(matches!(
            check_readable(&document),
            Err(ExtractionError::Encrypted)
        ));
    }

    #[test]
    fn failed_pages_are_filled_from_fallback() {
        let texts = vec!["page one".to_string(), String::new(), "page three".to_string()];
        let fallback = Ok(vec![
            "other one".to_string(),
            "recovered two".to_string(),
            "other three".to_string(),
        ]);

        let texts = recover_pages(texts, &[1], fallback).expect("recover");
        assert_eq!(texts, vec!["page one", "recovered two", "page three"]);
    }

    #[test]
    fn partial_failure_keeps_readable_pages() {
        let texts = vec!["page one".to_string(), String::new()];
        let texts = recover_pages(texts, &[1], Err("bad font".into())).expect("partial");
        assert_eq!(texts, vec!["page one", ""]);
    }

    #[test]
    fn every_page_failing_is_an_error() {
        let texts = vec![String::new(), String::new()];
        let error = recover_pages(texts, &[0, 1], Ok(vec!["only one".into()])).expect_err("fail");
        assert!(matches!(error, ExtractionError::Unreadable(reason) if reason.contains("1 pages")));
    }
}
