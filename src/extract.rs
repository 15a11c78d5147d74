use std::{
    io::{Cursor, Read, Write},
    path::Path,
    process::Command,
};

use serde::Serialize;
use tracing::{debug, warn};
use xml::reader::{EventReader, XmlEvent};

use crate::{
    error::{Error, Result},
    naming::split_extension,
    settings::ExtractorConfig,
};

/// The document formats text can be extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Doc,
    Docx,
    Image,
}

impl DocumentKind {
    /// Classify a file by the extension of its name.
    ///
    /// Matching is a suffix match on the lower-cased extension. Returns
    /// `None` for anything that is not a PDF, Word document, or JPEG/PNG
    /// image.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let (_, ext) = split_extension(name);
        match ext.to_ascii_lowercase().as_str() {
            ".pdf" => Some(DocumentKind::Pdf),
            ".doc" => Some(DocumentKind::Doc),
            ".docx" => Some(DocumentKind::Docx),
            ".jpg" | ".jpeg" | ".png" => Some(DocumentKind::Image),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Doc => "doc",
            DocumentKind::Docx => "docx",
            DocumentKind::Image => "image",
        }
    }
}

/// Best-effort plain-text extraction.
///
/// PDF and DOCX are read in-process. Legacy `.doc` files and images are
/// handed to external programs (a converter such as `antiword`, an OCR
/// engine such as `tesseract`) configured once at startup.
#[derive(Debug, Clone, Default)]
pub struct TextExtractor {
    config: ExtractorConfig,
}

impl TextExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Extract text, returning an empty string when extraction fails.
    ///
    /// Failures are logged, never returned.
    pub fn extract(&self, bytes: &[u8], kind: DocumentKind) -> String {
        match self.try_extract(bytes, kind) {
            Ok(text) => {
                debug!(
                    kind = kind.as_str(),
                    bytes = bytes.len(),
                    chars = text.len(),
                    "extracted text"
                );
                text
            }
            Err(e) => {
                warn!(kind = kind.as_str(), error = %e, "text extraction failed");
                String::new()
            }
        }
    }

    /// Extract text, reporting failures as [`Error::Extraction`] or I/O
    /// errors.
    pub fn try_extract(&self, bytes: &[u8], kind: DocumentKind) -> Result<String> {
        match kind {
            DocumentKind::Pdf => pdf_text(bytes),
            DocumentKind::Docx => docx_text(bytes),
            DocumentKind::Doc => {
                run_tool(&self.config.doc_command, bytes, ".doc", |cmd, path| {
                    cmd.arg(path);
                })
            }
            DocumentKind::Image => {
                let language = &self.config.ocr_language;
                run_tool(&self.config.ocr_command, bytes, ".img", |cmd, path| {
                    cmd.arg(path).arg("stdout").arg("-l").arg(language);
                })
            }
        }
    }
}

/// Concatenate the text of every page, each non-empty page followed by a
/// newline. Pages without text contribute nothing.
fn pdf_text(bytes: &[u8]) -> Result<String> {
    let document = lopdf::Document::load_mem(bytes)
        .map_err(|e| Error::Extraction(format!("pdf: {e}")))?;

    let mut text = String::new();
    for (page_number, _) in document.get_pages() {
        match document.extract_text(&[page_number]) {
            Ok(page) => {
                let page = page.trim_end();
                if !page.is_empty() {
                    text.push_str(page);
                    text.push('\n');
                }
            }
            Err(e) => {
                debug!(page = page_number, error = %e, "skipping pdf page");
            }
        }
    }
    Ok(text)
}

/// Read the character data of `word/document.xml`, one line per paragraph.
fn docx_text(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| Error::Extraction(format!("docx: {e}")))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| Error::Extraction(format!("docx: {e}")))?
        .read_to_string(&mut xml)?;

    let mut text = String::new();
    for event in EventReader::from_str(&xml) {
        match event.map_err(|e| Error::Extraction(format!("docx: {e}")))? {
            XmlEvent::Characters(chars) | XmlEvent::Whitespace(chars) => {
                text.push_str(&chars);
            }
            XmlEvent::StartElement { name, .. } if name.local_name == "tab" => {
                text.push('\t');
            }
            XmlEvent::StartElement { name, .. } if name.local_name == "br" => {
                text.push('\n');
            }
            XmlEvent::EndElement { name } if name.local_name == "p" => {
                text.push('\n');
            }
            _ => {}
        }
    }
    Ok(text)
}

/// Write `bytes` to a temporary file and capture what `program` prints for
/// it on stdout.
fn run_tool(
    program: &str,
    bytes: &[u8],
    suffix: &str,
    configure: impl FnOnce(&mut Command, &Path),
) -> Result<String> {
    let mut input = tempfile::Builder::new()
        .prefix("docshelf-")
        .suffix(suffix)
        .tempfile()?;
    input.write_all(bytes)?;
    input.flush()?;

    let mut command = Command::new(program);
    configure(&mut command, input.path());
    let output = command.output().map_err(|e| {
        Error::Extraction(format!("failed to run '{program}': {e}"))
    })?;

    if !output.status.success() {
        return Err(Error::Extraction(format!(
            "'{program}' exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use lopdf::{
        Object,
        Stream,
        content::{Content, Operation},
        dictionary,
    };
    use zip::write::SimpleFileOptions;

    use super::*;

    fn extractor_with(doc_command: &str, ocr_command: &str) -> TextExtractor {
        TextExtractor::new(ExtractorConfig {
            ocr_command: ocr_command.to_string(),
            ocr_language: "eng".to_string(),
            doc_command: doc_command.to_string(),
        })
    }

    /// A PDF with one page of text followed by one empty page.
    fn sample_pdf(line: &str) -> Vec<u8> {
        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![100.into(), 600.into()]),
                Operation::new("Tj", vec![Object::string_literal(line)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().unwrap(),
        ));
        let text_page = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        let empty_content = doc.add_object(Stream::new(dictionary! {}, vec![]));
        let empty_page = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => empty_content,
        });
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![text_page.into(), empty_page.into()],
            "Count" => 2,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    fn sample_docx(paragraphs: &[&str]) -> Vec<u8> {
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t>{p}</w:t></w:r></w:p>"))
            .collect();
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
        );

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("word/document.xml", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn kind_from_extension() {
        assert_eq!(
            DocumentKind::from_file_name("a.pdf"),
            Some(DocumentKind::Pdf)
        );
        assert_eq!(
            DocumentKind::from_file_name("A.PDF"),
            Some(DocumentKind::Pdf)
        );
        assert_eq!(
            DocumentKind::from_file_name("memo.doc"),
            Some(DocumentKind::Doc)
        );
        assert_eq!(
            DocumentKind::from_file_name("memo.docx"),
            Some(DocumentKind::Docx)
        );
        for image in ["scan.jpg", "scan.jpeg", "scan.png"] {
            assert_eq!(
                DocumentKind::from_file_name(image),
                Some(DocumentKind::Image)
            );
        }
    }

    #[test]
    fn png_must_be_the_extension() {
        assert_eq!(DocumentKind::from_file_name("png-notes.txt"), None);
        assert_eq!(DocumentKind::from_file_name("scanpng"), None);
        assert_eq!(DocumentKind::from_file_name("notes.txt"), None);
    }

    #[test]
    fn pdf_pages_are_joined_and_empty_pages_skipped() {
        let text = extractor_with("antiword", "tesseract")
            .try_extract(&sample_pdf("Hello World"), DocumentKind::Pdf)
            .unwrap();
        assert_eq!(text.trim_end(), "Hello World");
        assert!(text.ends_with('\n'));
        assert!(!text.contains("\n\n"));
    }

    #[test]
    fn corrupt_pdf_yields_empty_text() {
        let extractor = TextExtractor::default();
        assert!(
            extractor
                .try_extract(b"not a pdf", DocumentKind::Pdf)
                .is_err()
        );
        assert_eq!(extractor.extract(b"not a pdf", DocumentKind::Pdf), "");
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let bytes = sample_docx(&["Quarterly results", "Revenue grew"]);
        let text = TextExtractor::default()
            .try_extract(&bytes, DocumentKind::Docx)
            .unwrap();
        assert_eq!(text, "Quarterly results\nRevenue grew\n");
    }

    #[test]
    fn docx_without_document_part_fails() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("other.xml", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"<x/>").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let extractor = TextExtractor::default();
        assert!(extractor.try_extract(&bytes, DocumentKind::Docx).is_err());
        assert_eq!(extractor.extract(&bytes, DocumentKind::Docx), "");
    }

    #[test]
    fn missing_tool_yields_empty_text() {
        let extractor = extractor_with(
            "docshelf-no-such-converter",
            "docshelf-no-such-ocr",
        );
        assert_eq!(extractor.extract(b"\x89PNG", DocumentKind::Image), "");
        assert_eq!(extractor.extract(b"\xd0\xcf", DocumentKind::Doc), "");
    }

    #[cfg(unix)]
    #[test]
    fn doc_converter_output_is_captured() {
        let extractor = extractor_with("cat", "tesseract");
        let text = extractor.extract(b"legacy memo text", DocumentKind::Doc);
        assert_eq!(text, "legacy memo text");
    }

    #[cfg(unix)]
    #[test]
    fn failing_tool_yields_empty_text() {
        let extractor = extractor_with("false", "false");
        assert_eq!(extractor.extract(b"x", DocumentKind::Doc), "");
        assert_eq!(extractor.extract(b"x", DocumentKind::Image), "");
    }
}
