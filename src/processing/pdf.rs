//! Minimal PDF writers used by the format converters.
//!
//! Text is laid out one line per text object with the standard Helvetica font, which keeps the
//! output readable by the extractor without embedding font programs. Characters outside the
//! WinAnsi range are replaced with `?`.

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId, Stream, StringFormat, dictionary};

const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 50;
const FONT_SIZE: i64 = 10;
const LINE_HEIGHT: i64 = 14;
const WRAP_COLUMNS: usize = 95;
const LINES_PER_PAGE: usize = ((PAGE_HEIGHT - 2 * MARGIN) / LINE_HEIGHT) as usize;

/// Render plain text into a paginated PDF.
pub fn render_text(text: &str) -> Result<Vec<u8>, lopdf::Error> {
    let lines = wrap_lines(text, WRAP_COLUMNS);
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut page_ids = Vec::new();
    let mut pages: Vec<&[String]> = lines.chunks(LINES_PER_PAGE).collect();
    if pages.is_empty() {
        pages.push(&[]);
    }

    for page_lines in pages {
        let mut operations = Vec::with_capacity(page_lines.len() * 5);
        for (row, line) in page_lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let y = PAGE_HEIGHT - MARGIN - (row as i64 + 1) * LINE_HEIGHT;
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec!["F1".into(), FONT_SIZE.into()]));
            operations.push(Operation::new("Td", vec![MARGIN.into(), y.into()]));
            operations.push(Operation::new(
                "Tj",
                vec![Object::String(encode_win_ansi(line), StringFormat::Literal)],
            ));
            operations.push(Operation::new("ET", vec![]));
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        page_ids.push(doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        }));
    }

    finish(doc, pages_id, page_ids, PAGE_WIDTH, PAGE_HEIGHT)
}

/// Render an 8-bit RGB raster as a single-page PDF sized to the image.
pub fn render_image(width: u32, height: u32, rgb: Vec<u8>) -> Result<Vec<u8>, lopdf::Error> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let (width, height) = (i64::from(width.max(1)), i64::from(height.max(1)));

    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width,
            "Height" => height,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        },
        rgb,
    ));
    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    width.into(),
                    0.into(),
                    0.into(),
                    height.into(),
                    0.into(),
                    0.into(),
                ],
            ),
            Operation::new("Do", vec!["Im0".into()]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        },
    });

    finish(doc, pages_id, vec![page_id], width, height)
}

fn finish(
    mut doc: Document,
    pages_id: ObjectId,
    page_ids: Vec<ObjectId>,
    width: i64,
    height: i64,
) -> Result<Vec<u8>, lopdf::Error> {
    let count = page_ids.len() as i64;
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => page_ids.into_iter().map(Object::from).collect::<Vec<_>>(),
        "Count" => count,
        "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)?;
    Ok(buffer)
}

/// Split text into display lines no wider than `columns` characters.
///
/// Breaks at the last space inside the window when there is one; otherwise the line is cut.
pub(crate) fn wrap_lines(text: &str, columns: usize) -> Vec<String> {
    let mut wrapped = Vec::new();
    for raw in text.lines() {
        let line = raw.replace('\t', "    ");
        let chars: Vec<char> = line.trim_end().chars().collect();
        if chars.is_empty() {
            wrapped.push(String::new());
            continue;
        }
        let mut start = 0;
        while start < chars.len() {
            let end = (start + columns).min(chars.len());
            let cut = if end < chars.len() {
                match chars[start..end].iter().rposition(|c| *c == ' ') {
                    Some(space) if space > 0 => start + space,
                    _ => end,
                }
            } else {
                end
            };
            wrapped.push(chars[start..cut].iter().collect());
            start = cut;
            while start < chars.len() && chars[start] == ' ' {
                start += 1;
            }
        }
    }
    wrapped
}

fn encode_win_ansi(line: &str) -> Vec<u8> {
    line.chars()
        .map(|c| match u32::from(c) {
            code @ 0x20..=0x7e | code @ 0xa0..=0xff => code as u8,
            _ => b'?',
        })
        .collect()
}
