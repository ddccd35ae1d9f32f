//! Converts uploaded statement files into plain text for the
//! text-analysis strategy.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::models::FileType;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Failed to extract PDF content: {0}")]
    Pdf(String),

    #[error("No text content extracted from PDF")]
    EmptyPdf,
}

#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, bytes: &[u8], file_type: FileType) -> Result<String, ExtractError>;
}

/// Extractor for the supported statement formats: TXT passes through,
/// CSV is rendered as `header: value` lines, PDF goes through lopdf.
pub struct FileExtractor;

#[async_trait]
impl ContentExtractor for FileExtractor {
    async fn extract(&self, bytes: &[u8], file_type: FileType) -> Result<String, ExtractError> {
        let content = match file_type {
            FileType::Txt => extract_txt(bytes),
            FileType::Csv => extract_csv(bytes),
            FileType::Pdf => extract_pdf(bytes)?,
        };

        debug!(
            "Extracted {} characters from {} input",
            content.len(),
            file_type.as_str()
        );

        Ok(content)
    }
}

fn extract_txt(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Render CSV rows as `header: value` pairs, one line per data row.
/// Statements exported as CSV are simple enough that a plain comma
/// split matches what the analysis prompt expects.
fn extract_csv(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let headers: Vec<&str> = match lines.next() {
        Some(header_line) => header_line.split(',').map(str::trim).collect(),
        None => return String::new(),
    };

    let mut out = Vec::new();
    for line in lines {
        let row: Vec<String> = line
            .split(',')
            .map(str::trim)
            .enumerate()
            .map(|(i, value)| match headers.get(i) {
                Some(header) => format!("{}: {}", header, value),
                None => value.to_string(),
            })
            .collect();
        out.push(row.join(", "));
    }

    out.join("\n")
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| {
        warn!("PDF load failed: {}", e);
        ExtractError::Pdf(e.to_string())
    })?;

    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
    let text = doc
        .extract_text(&pages)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;

    if text.trim().is_empty() {
        return Err(ExtractError::EmptyPdf);
    }

    Ok(text)
}
