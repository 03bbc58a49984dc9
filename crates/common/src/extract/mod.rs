//! Document text extraction
//!
//! Turns an uploaded resume document into plain text. PDFs go through a
//! content-stream walk with lopdf; plain text and markdown pass through
//! with whitespace normalization. When structured extraction fails (or
//! the format has no structured reader, like DOCX) a lossy printable
//! scan runs instead and the output is flagged `degraded` so the caller
//! can surface reduced quality.

use crate::errors::{AppError, Result};
use tracing::{debug, warn};

/// Extraction output with a quality flag
#[derive(Clone, Debug)]
pub struct Extracted {
    pub text: String,
    /// True when the text came from the lossy fallback scan
    pub degraded: bool,
}

/// Extract text from an uploaded document.
///
/// The format is picked from the filename extension with a magic-byte
/// check for PDFs whose extension lies.
pub fn extract_text(bytes: &[u8], filename: &str) -> Result<Extracted> {
    if bytes.is_empty() {
        return Err(AppError::Validation {
            message: "uploaded document is empty".to_string(),
            field: Some("file".to_string()),
        });
    }

    let extension = filename
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_lowercase();

    let is_pdf = extension == "pdf" || bytes.starts_with(b"%PDF-");

    if is_pdf {
        return match extract_pdf(bytes) {
            Ok(text) => Ok(Extracted {
                text,
                degraded: false,
            }),
            Err(e) => {
                warn!(error = %e, "Structured PDF extraction failed, using lossy scan");
                lossy_scan(bytes)
            }
        };
    }

    match extension.as_str() {
        "txt" | "md" | "text" => {
            let text = match std::str::from_utf8(bytes) {
                Ok(s) => clean_text(s),
                Err(_) => return lossy_scan(bytes),
            };
            if text.is_empty() {
                return Err(AppError::Validation {
                    message: "document contains no text".to_string(),
                    field: Some("file".to_string()),
                });
            }
            Ok(Extracted {
                text,
                degraded: false,
            })
        }
        // No structured DOCX reader; the lossy scan recovers the
        // uncompressed XML fragments it can find
        "docx" | "doc" => lossy_scan(bytes),
        other => Err(AppError::Validation {
            message: format!("unsupported document format: .{other}"),
            field: Some("file".to_string()),
        }),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| AppError::Validation {
        message: format!("failed to parse PDF: {e}"),
        field: Some("file".to_string()),
    })?;

    let mut text = String::new();
    let page_count = doc.get_pages().len();
    debug!(page_count, "Extracting text from PDF");

    for (index, page_id) in doc.page_iter().enumerate() {
        match doc.get_page_content(page_id) {
            Ok(content) => {
                text.push_str(&extract_text_from_content(&content));
                text.push('\n');
            }
            Err(e) => {
                warn!(page = index + 1, error = %e, "Failed to read page content, skipping");
            }
        }
    }

    let cleaned = clean_text(&text);
    if cleaned.is_empty() {
        return Err(AppError::Validation {
            message: "no text content extracted from PDF".to_string(),
            field: Some("file".to_string()),
        });
    }
    Ok(cleaned)
}

/// Extract text from a PDF content stream by walking BT/ET blocks
fn extract_text_from_content(content: &[u8]) -> String {
    let content_str = String::from_utf8_lossy(content);
    let mut text = String::new();
    let mut in_text_block = false;
    let mut current_text = String::new();

    for line in content_str.lines() {
        let trimmed = line.trim();

        if trimmed == "BT" {
            in_text_block = true;
            continue;
        }

        if trimmed == "ET" {
            in_text_block = false;
            if !current_text.is_empty() {
                text.push_str(&current_text);
                text.push(' ');
                current_text.clear();
            }
            continue;
        }

        if in_text_block {
            if let Some(text_content) = extract_text_from_operator(trimmed) {
                current_text.push_str(&text_content);
            }
        }
    }

    text
}

/// Extract text from a Tj, ', ", or TJ text-showing operator
fn extract_text_from_operator(line: &str) -> Option<String> {
    if line.ends_with("Tj") || line.ends_with('\'') || line.ends_with('"') {
        if let Some(start) = line.find('(') {
            if let Some(end) = line.rfind(')') {
                let text = &line[start + 1..end];
                return Some(decode_pdf_string(text));
            }
        }
    }

    if line.ends_with("TJ") {
        let mut result = String::new();
        let mut in_paren = false;
        let mut current = String::new();

        for ch in line.chars() {
            match ch {
                '(' => {
                    in_paren = true;
                }
                ')' => {
                    in_paren = false;
                    result.push_str(&decode_pdf_string(&current));
                    current.clear();
                }
                _ if in_paren => {
                    current.push(ch);
                }
                _ => {}
            }
        }

        if !result.is_empty() {
            return Some(result);
        }
    }

    None
}

/// Decode PDF string escapes
fn decode_pdf_string(s: &str) -> String {
    let mut result = String::new();
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some('\\') => result.push('\\'),
                Some('(') => result.push('('),
                Some(')') => result.push(')'),
                Some(c) => result.push(c),
                None => {}
            }
        } else {
            result.push(ch);
        }
    }

    result
}

/// Lossy fallback: keep printable runs long enough to look like words
fn lossy_scan(bytes: &[u8]) -> Result<Extracted> {
    let decoded = String::from_utf8_lossy(bytes);
    let mut words: Vec<&str> = Vec::new();

    for run in decoded.split(|c: char| !(c.is_ascii_graphic() || c == ' ')) {
        for word in run.split_whitespace() {
            if word.len() >= 3 && word.chars().any(|c| c.is_ascii_alphabetic()) {
                words.push(word);
            }
        }
    }

    let text = words.join(" ");
    if text.is_empty() {
        return Err(AppError::Validation {
            message: "no recoverable text in document".to_string(),
            field: Some("file".to_string()),
        });
    }

    Ok(Extracted {
        text,
        degraded: true,
    })
}

/// Collapse whitespace and strip common extraction artifacts
fn clean_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{FEFF}', "")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
}
