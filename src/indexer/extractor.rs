use std::io::Read;
use std::path::Path;

use super::walker::SupportedFormat;
use crate::error::{AppError, AppResult};

pub fn extract_text(path: &Path, format: SupportedFormat) -> AppResult<String> {
    match format {
        SupportedFormat::PlainText | SupportedFormat::Markdown => extract_plain_text(path),
        SupportedFormat::Pdf => extract_pdf(path),
        SupportedFormat::Docx => extract_docx(path),
    }
}

fn extract_plain_text(path: &Path) -> AppResult<String> {
    let bytes = std::fs::read(path)?;
    // Tolerate stray non-UTF-8 bytes rather than dropping the whole file.
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn extract_pdf(path: &Path) -> AppResult<String> {
    pdf_extract::extract_text(path)
        .map_err(|e| AppError::Extraction(format!("{}: {}", path.display(), e)))
}

fn extract_docx(path: &Path) -> AppResult<String> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| AppError::Extraction(format!("{} is not a DOCX archive: {}", path.display(), e)))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|_| AppError::Extraction(format!("{} has no word/document.xml", path.display())))?
        .read_to_string(&mut xml)?;

    Ok(docx_xml_to_text(&xml))
}

/// Collect `<w:t>` runs, one line per `<w:p>` paragraph.
fn docx_xml_to_text(xml: &str) -> String {
    let mut paragraphs = Vec::new();
    for paragraph in xml.split("</w:p>") {
        let runs = tag_contents(paragraph, "w:t");
        if !runs.is_empty() {
            paragraphs.push(decode_entities(&runs.concat()));
        }
    }
    paragraphs.join("\n")
}

fn tag_contents<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut out = Vec::new();
    let mut rest = xml;

    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        // `<w:tab/>` and friends share the prefix; require `>` or whitespace next.
        if !after.starts_with('>') && !after.starts_with(' ') {
            rest = after;
            continue;
        }
        let Some(gt) = after.find('>') else { break };
        let body = &after[gt + 1..];
        let Some(end) = body.find(&close) else { break };
        out.push(&body[..end]);
        rest = &body[end + close.len()..];
    }
    out
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docx_paragraphs_and_entities() {
        let xml = concat!(
            r#"<w:document><w:body>"#,
            r#"<w:p><w:r><w:t>Fish &amp; </w:t></w:r><w:r><w:t xml:space="preserve">chips</w:t></w:r></w:p>"#,
            r#"<w:p><w:r><w:tab/><w:t>a &lt; b</w:t></w:r></w:p>"#,
            r#"</w:body></w:document>"#,
        );
        assert_eq!(docx_xml_to_text(xml), "Fish & chips\na < b");
    }

    #[test]
    fn test_plain_text_lossy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"caf\xe9 ok").unwrap();
        let text = extract_text(&path, SupportedFormat::PlainText).unwrap();
        assert!(text.ends_with(" ok"));
    }

    #[test]
    fn test_docx_requires_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.docx");
        std::fs::write(&path, "plain text").unwrap();
        assert!(matches!(
            extract_text(&path, SupportedFormat::Docx),
            Err(AppError::Extraction(_))
        ));
    }
}
