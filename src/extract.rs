//! Multi-format text extraction for saved files.
//!
//! The save pipeline supplies raw bytes plus a declared [`MimeFamily`];
//! this module returns canonical UTF-8 text or one of the four typed
//! failures in [`ExtractError`]. Extraction is deterministic for
//! byte-identical input (OCR output is only required to be stable under
//! retries within a single process), and caller buffers are never retained.
//!
//! | Family | Backend | Empty handling |
//! |--------|---------|----------------|
//! | plain | UTF-8 decode | `Empty` after trim |
//! | pdf | `pdf_extract` over in-memory bytes | `Empty` when every page yields nothing |
//! | docx | `zip` + `quick_xml`, paragraphs as single newlines | `Empty` after trim |
//! | image | `tesseract` executable via a temp file | `Empty` is a normal outcome |
//! | unknown | n/a | always `Unsupported` |
//!
//! Inputs larger than the configured limit are rejected as `TooLarge`
//! before any decoding begins.

use std::io::Read;
use std::io::Write;

use crate::error::ExtractError;
use crate::models::MimeFamily;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extract canonical text from file bytes.
///
/// `max_bytes` is the size policy gate (10 MiB by default, from config).
pub fn extract_text(
    bytes: &[u8],
    family: MimeFamily,
    max_bytes: usize,
) -> Result<String, ExtractError> {
    if bytes.len() > max_bytes {
        return Err(ExtractError::TooLarge {
            size: bytes.len(),
            limit: max_bytes,
        });
    }

    let text = match family {
        MimeFamily::Plain => extract_plain(bytes)?,
        MimeFamily::Pdf => extract_pdf(bytes)?,
        MimeFamily::Docx => extract_docx(bytes)?,
        MimeFamily::Image => return extract_image_ocr(bytes),
        MimeFamily::Unknown => {
            return Err(ExtractError::Unsupported(
                "unknown content family".to_string(),
            ))
        }
    };

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ExtractError::Empty);
    }
    Ok(trimmed.to_string())
}

fn extract_plain(bytes: &[u8]) -> Result<String, ExtractError> {
    std::str::from_utf8(bytes)
        .map(|s| s.to_string())
        .map_err(|e| ExtractError::Corrupt(format!("invalid UTF-8: {}", e)))
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Corrupt(e.to_string()))
}

/// Pull the `w:t` runs out of `word/document.xml`, emitting a newline at
/// each paragraph (`w:p`) boundary and table cells joined with `" | "`.
fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Corrupt(e.to_string()))?;

    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| ExtractError::Corrupt("word/document.xml not found".to_string()))?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| ExtractError::Corrupt(e.to_string()))?;
        if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(ExtractError::Corrupt(
                "word/document.xml exceeds size limit".to_string(),
            ));
        }
    }

    extract_docx_paragraphs(&doc_xml)
}

fn extract_docx_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut paragraph = String::new();
    let mut in_cell = false;
    let mut cell_text = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        let run = te.unescape().unwrap_or_default();
                        if in_cell {
                            cell_text.push_str(run.as_ref());
                        } else {
                            paragraph.push_str(run.as_ref());
                        }
                    }
                }
                b"tc" => {
                    in_cell = true;
                    cell_text.clear();
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"p" if !in_cell => {
                    flush_line(&mut out, &mut paragraph);
                }
                b"tc" => {
                    in_cell = false;
                    let cell = cell_text.trim();
                    if !cell.is_empty() {
                        if !paragraph.is_empty() {
                            paragraph.push_str(" | ");
                        }
                        paragraph.push_str(cell);
                    }
                }
                b"tr" => {
                    flush_line(&mut out, &mut paragraph);
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Corrupt(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    flush_line(&mut out, &mut paragraph);
    Ok(out)
}

fn flush_line(out: &mut String, line: &mut String) {
    let trimmed = line.trim();
    if !trimmed.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(trimmed);
    }
    line.clear();
}

/// OCR via the `tesseract` executable, the same engine the usual Python
/// bindings shell out to. The bytes go through a temp file; stdout comes
/// back as the text blob. An empty result is a normal `Empty` outcome.
fn extract_image_ocr(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut tmp = tempfile::NamedTempFile::new()
        .map_err(|e| ExtractError::Corrupt(format!("temp file: {}", e)))?;
    tmp.write_all(bytes)
        .map_err(|e| ExtractError::Corrupt(format!("temp file: {}", e)))?;

    let output = std::process::Command::new("tesseract")
        .arg(tmp.path())
        .arg("stdout")
        .output();

    let output = match output {
        Ok(o) => o,
        Err(_) => {
            return Err(ExtractError::Unsupported(
                "ocr engine (tesseract) not available".to_string(),
            ))
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ExtractError::Corrupt(format!(
            "ocr failed: {}",
            stderr.trim()
        )));
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() {
        return Err(ExtractError::Empty);
    }
    Ok(text)
}
