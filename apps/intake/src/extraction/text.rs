//! Plain-text extraction from uploaded CV files.
//!
//! PDF goes through pdf-extract, DOCX through docx-rs, plain text is taken
//! verbatim. Decoding is CPU-bound, so async callers use
//! `extract_text_blocking`, which runs on the blocking pool.

use bytes::Bytes;
use docx_rs::{DocumentChild, Paragraph, ParagraphChild, Run, RunChild, TableCellContent};
use thiserror::Error;
use tracing::debug;

pub const PDF_MIME: &str = "application/pdf";
pub const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const TEXT_MIME: &str = "text/plain";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to extract text from {format}: {reason}")]
    ExtractionFailed { format: &'static str, reason: String },
}

/// The document formats the intake accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CvFormat {
    Pdf,
    Docx,
    PlainText,
}

impl CvFormat {
    /// Maps a MIME type (parameters such as `; charset=utf-8` ignored) to a format.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            PDF_MIME => Some(CvFormat::Pdf),
            DOCX_MIME => Some(CvFormat::Docx),
            TEXT_MIME => Some(CvFormat::PlainText),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CvFormat::Pdf => "PDF",
            CvFormat::Docx => "DOCX",
            CvFormat::PlainText => "plain text",
        }
    }

    fn failed(self, reason: impl Into<String>) -> ExtractError {
        ExtractError::ExtractionFailed {
            format: self.label(),
            reason: reason.into(),
        }
    }
}

/// Extracts plain text from `bytes` according to the declared MIME type.
pub fn extract_text(bytes: &[u8], mime: &str) -> Result<String, ExtractError> {
    let format =
        CvFormat::from_mime(mime).ok_or_else(|| ExtractError::UnsupportedFormat(mime.to_string()))?;

    let text = match format {
        CvFormat::Pdf => {
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| format.failed(e.to_string()))?
        }
        CvFormat::Docx => extract_docx(bytes).map_err(|reason| format.failed(reason))?,
        CvFormat::PlainText => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| format.failed(format!("not valid UTF-8 ({e})")))?;
            text.strip_prefix('\u{feff}').unwrap_or(text).to_string()
        }
    };

    if text.trim().is_empty() {
        return Err(format.failed("document contains no extractable text"));
    }

    debug!("Extracted {} chars of {} text", text.len(), format.label());
    Ok(text)
}

/// Runs `extract_text` on the blocking pool. A decoder panic on malformed
/// input is reported as `ExtractionFailed` instead of tearing down the task.
pub async fn extract_text_blocking(bytes: Bytes, mime: String) -> Result<String, ExtractError> {
    let label = CvFormat::from_mime(&mime).map(CvFormat::label).unwrap_or("document");
    tokio::task::spawn_blocking(move || extract_text(&bytes, &mime))
        .await
        .unwrap_or_else(|join_error| {
            Err(ExtractError::ExtractionFailed {
                format: label,
                reason: format!("decoder aborted: {join_error}"),
            })
        })
}

fn extract_docx(bytes: &[u8]) -> Result<String, String> {
    let doc = docx_rs::read_docx(bytes).map_err(|e| e.to_string())?;
    let mut out = String::new();
    for child in &doc.document.children {
        match child {
            DocumentChild::Paragraph(p) => push_paragraph(p, &mut out),
            DocumentChild::Table(table) => push_table(table, &mut out),
            _ => {}
        }
    }
    Ok(out)
}

#[allow(irrefutable_let_patterns)]
fn push_table(table: &docx_rs::Table, out: &mut String) {
    for row in &table.rows {
        let docx_rs::TableChild::TableRow(row) = row;
        for cell in &row.cells {
            let docx_rs::TableRowChild::TableCell(cell) = cell;
            for content in &cell.children {
                match content {
                    TableCellContent::Paragraph(p) => push_paragraph(p, out),
                    TableCellContent::Table(nested) => push_table(nested, out),
                    _ => {}
                }
            }
        }
    }
}

fn push_paragraph(paragraph: &Paragraph, out: &mut String) {
    for child in &paragraph.children {
        push_paragraph_child(child, out);
    }
    out.push('\n');
}

fn push_paragraph_child(child: &ParagraphChild, out: &mut String) {
    match child {
        ParagraphChild::Run(run) => push_run(run, out),
        ParagraphChild::Hyperlink(link) => {
            for inner in &link.children {
                push_paragraph_child(inner, out);
            }
        }
        _ => {}
    }
}

fn push_run(run: &Run, out: &mut String) {
    for child in &run.children {
        match child {
            RunChild::Text(t) => out.push_str(&t.text),
            RunChild::Tab(_) => out.push('\t'),
            RunChild::Break(_) => out.push('\n'),
            _ => {}
        }
    }
}
