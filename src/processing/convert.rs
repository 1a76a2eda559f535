//! Normalize supported input formats to PDF.
//!
//! Every converter writes its output into the request workspace so the extractor only ever has
//! to understand one format. These functions block on file IO and parsing; callers run them on
//! the blocking pool.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use calamine::{Data, Reader, Xlsx, open_workbook};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc2822;
use uuid::Uuid;

use super::pdf;
use super::types::ConversionError;

/// Lowercased extension of `path` with a leading dot, or an empty string.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Convert `input` to a PDF inside `workspace`, returning the PDF path.
///
/// PDF input is returned unchanged. Accepted extensions are `.pdf`, `.docx`, `.xlsx`, `.jpg`,
/// `.jpeg`, `.png`, `.zip`, `.eml` and `.msg`; anything else fails with
/// [`ConversionError::UnsupportedFormat`] before the file is opened.
pub fn normalize(input: &Path, workspace: &Path) -> Result<PathBuf, ConversionError> {
    let extension = extension_of(input);
    let output = match extension.as_str() {
        ".pdf" => return Ok(input.to_path_buf()),
        ".zip" => return extract_pdf_from_zip(input, workspace),
        ".docx" => pdf::render_text(&docx_text(input)?)?,
        ".xlsx" => pdf::render_text(&spreadsheet_text(input)?)?,
        ".jpg" | ".jpeg" | ".png" => image_pdf(input)?,
        ".eml" => pdf::render_text(&eml_text(input)?)?,
        ".msg" => pdf::render_text(&msg_text(input)?)?,
        _ => return Err(ConversionError::UnsupportedFormat(extension)),
    };

    let target = workspace.join(format!("{}.pdf", Uuid::new_v4()));
    std::fs::write(&target, output)?;
    tracing::debug!(
        input = %input.display(),
        output = %target.display(),
        format = %extension,
        "Converted document to PDF"
    );
    Ok(target)
}

fn docx_text(path: &Path) -> Result<String, ConversionError> {
    let bytes = std::fs::read(path)?;
    let docx =
        docx_rs::read_docx(&bytes).map_err(|error| ConversionError::Docx(error.to_string()))?;

    let mut paragraphs = Vec::new();
    for child in docx.document.children {
        if let docx_rs::DocumentChild::Paragraph(paragraph) = child {
            let mut text = String::new();
            for child in paragraph.children {
                if let docx_rs::ParagraphChild::Run(run) = child {
                    for child in run.children {
                        if let docx_rs::RunChild::Text(t) = child {
                            text.push_str(&t.text);
                        }
                    }
                }
            }
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                paragraphs.push(trimmed.to_string());
            }
        }
    }

    Ok(paragraphs.join("\n"))
}

/// First worksheet as `" | "`-joined rows, header row skipped.
fn spreadsheet_text(path: &Path) -> Result<String, ConversionError> {
    let mut workbook: Xlsx<_> =
        open_workbook(path).map_err(|error: calamine::XlsxError| {
            ConversionError::Spreadsheet(error.to_string())
        })?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ConversionError::Spreadsheet("workbook has no worksheets".into()))?
        .map_err(|error| ConversionError::Spreadsheet(error.to_string()))?;

    let rows = range
        .rows()
        .skip(1)
        .map(|row| row.iter().map(cell_text).collect::<Vec<_>>().join(" | "))
        .collect::<Vec<_>>();
    Ok(rows.join("\n"))
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn image_pdf(path: &Path) -> Result<Vec<u8>, ConversionError> {
    let bytes = std::fs::read(path)?;
    let rgb = image::load_from_memory(&bytes)?.to_rgb8();
    let (width, height) = rgb.dimensions();
    Ok(pdf::render_image(width, height, rgb.into_raw())?)
}

fn extract_pdf_from_zip(path: &Path, workspace: &Path) -> Result<PathBuf, ConversionError> {
    let mut archive = zip::ZipArchive::new(File::open(path)?)?;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() || !entry.name().to_ascii_lowercase().ends_with(".pdf") {
            continue;
        }

        let target = workspace.join(format!("archive-{}.pdf", Uuid::new_v4()));
        let mut output = File::create(&target)?;
        io::copy(&mut entry, &mut output)?;
        tracing::debug!(
            archive = %path.display(),
            entry = entry.name(),
            output = %target.display(),
            "Extracted PDF from archive"
        );
        return Ok(target);
    }

    Err(ConversionError::NoPdfInArchive)
}

fn eml_text(path: &Path) -> Result<String, ConversionError> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

const MSG_SUBJECT: u16 = 0x0037;
const MSG_SENDER_NAME: u16 = 0x0C1A;
const MSG_SENDER_EMAIL: u16 = 0x0C1F;
const MSG_DISPLAY_TO: u16 = 0x0E04;
const MSG_BODY: u16 = 0x1000;
const MSG_SUBMIT_TIME: u32 = 0x0039_0040;
const MSG_DELIVERY_TIME: u32 = 0x0E06_0040;
const FILETIME_UNIX_OFFSET_SECS: i64 = 11_644_473_600;

/// Outlook message rendered as a header block followed by the body.
fn msg_text(path: &Path) -> Result<String, ConversionError> {
    let mut message = cfb::open(path).map_err(|error| ConversionError::Email(error.to_string()))?;

    let sender = match (
        read_msg_string(&mut message, MSG_SENDER_NAME),
        read_msg_string(&mut message, MSG_SENDER_EMAIL),
    ) {
        (Some(name), Some(email)) if name != email => format!("{name} <{email}>"),
        (Some(name), _) => name,
        (None, Some(email)) => email,
        (None, None) => String::new(),
    };
    let to = read_msg_string(&mut message, MSG_DISPLAY_TO).unwrap_or_default();
    let subject = read_msg_string(&mut message, MSG_SUBJECT).unwrap_or_default();
    let body = read_msg_string(&mut message, MSG_BODY).unwrap_or_default();
    let date = read_msg_date(&mut message).unwrap_or_default();

    if subject.is_empty() && body.is_empty() && sender.is_empty() {
        return Err(ConversionError::Email(
            "message has no readable properties".into(),
        ));
    }

    Ok(format!(
        "From: {sender}\nTo: {to}\nDate: {date}\nSubject: {subject}\n\n{body}"
    ))
}

fn read_stream<F: Read + io::Seek>(file: &mut cfb::CompoundFile<F>, name: &str) -> Option<Vec<u8>> {
    let mut stream = file.open_stream(name).ok()?;
    let mut bytes = Vec::new();
    stream.read_to_end(&mut bytes).ok()?;
    Some(bytes)
}

/// Read a string property, preferring the UTF-16 stream over the 8-bit one.
fn read_msg_string<F: Read + io::Seek>(
    file: &mut cfb::CompoundFile<F>,
    property: u16,
) -> Option<String> {
    if let Some(bytes) = read_stream(file, &format!("/__substg1.0_{property:04X}001F")) {
        let units = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect::<Vec<_>>();
        let text = String::from_utf16_lossy(&units);
        return Some(text.trim_end_matches('\0').to_string());
    }

    read_stream(file, &format!("/__substg1.0_{property:04X}001E")).map(|bytes| {
        String::from_utf8_lossy(&bytes)
            .trim_end_matches('\0')
            .to_string()
    })
}

/// Submit (or delivery) time from the fixed-size property stream, as RFC 2822.
fn read_msg_date<F: Read + io::Seek>(file: &mut cfb::CompoundFile<F>) -> Option<String> {
    let bytes = read_stream(file, "/__properties_version1.0")?;
    let entries = bytes.get(32..)?;

    let lookup = |wanted: u32| {
        entries.chunks_exact(16).find_map(|entry| {
            let tag = u32::from_le_bytes(entry[0..4].try_into().ok()?);
            if tag != wanted {
                return None;
            }
            Some(u64::from_le_bytes(entry[8..16].try_into().ok()?))
        })
    };
    let filetime = lookup(MSG_SUBMIT_TIME).or_else(|| lookup(MSG_DELIVERY_TIME))?;

    let seconds = (filetime / 10_000_000) as i64 - FILETIME_UNIX_OFFSET_SECS;
    OffsetDateTime::from_unix_timestamp(seconds)
        .ok()?
        .format(&Rfc2822)
        .ok()
}
