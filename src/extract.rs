//! Content Extractor: turns file bytes into embeddable content.
//!
//! Dispatch is purely by [`FileType`]:
//!
//! | Type | Output |
//! |------|--------|
//! | Image | validated image bytes + dimensions, plus OCR text if any |
//! | Document | concatenated text of a PDF or DOCX |
//! | Text | the file's own text |
//! | Other | [`ExtractError::UnsupportedType`] |
//!
//! Corrupt or truncated files fail with [`ExtractError::Extraction`] scoped
//! to that file. Nothing here writes anywhere.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use crate::error::ExtractError;
use crate::models::FileType;
use crate::ocr::TextRecognizer;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Everything extracted from one file. Each populated field becomes one
/// index entry of the matching modality.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    /// Image bytes that decoded successfully.
    pub image: Option<Vec<u8>>,
    pub dimensions: Option<(u32, u32)>,
    /// Document or plain text, normalized and truncated.
    pub text: Option<String>,
    /// Text recognized inside an image.
    pub ocr_text: Option<String>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.image.is_none() && self.text.is_none() && self.ocr_text.is_none()
    }
}

pub struct ContentExtractor {
    ocr: Arc<dyn TextRecognizer>,
    max_text_chars: usize,
    min_text_chars: usize,
}

impl ContentExtractor {
    pub fn new(ocr: Arc<dyn TextRecognizer>, max_text_chars: usize, min_text_chars: usize) -> Self {
        Self {
            ocr,
            max_text_chars,
            min_text_chars,
        }
    }

    /// Extract content from `bytes`, which were read from `path`.
    pub async fn extract(
        &self,
        path: &Path,
        file_type: FileType,
        bytes: Vec<u8>,
    ) -> Result<Extraction, ExtractError> {
        match file_type {
            FileType::Image => self.extract_image(path, bytes).await,
            FileType::Document => {
                let ext = extension_of(path);
                let raw = tokio::task::spawn_blocking(move || extract_document(&ext, &bytes))
                    .await
                    .map_err(|e| ExtractError::Extraction(format!("extraction task failed: {}", e)))??;
                Ok(Extraction {
                    text: self.prepare_text(&raw),
                    ..Default::default()
                })
            }
            FileType::Text => {
                let raw = String::from_utf8_lossy(&bytes);
                Ok(Extraction {
                    text: self.prepare_text(&raw),
                    ..Default::default()
                })
            }
            FileType::Other => Err(ExtractError::UnsupportedType(extension_label(path))),
        }
    }

    async fn extract_image(&self, path: &Path, bytes: Vec<u8>) -> Result<Extraction, ExtractError> {
        let (bytes, dimensions) = tokio::task::spawn_blocking(move || {
            let dims = decode_dimensions(&bytes)?;
            Ok::<_, ExtractError>((bytes, dims))
        })
        .await
        .map_err(|e| ExtractError::Extraction(format!("decode task failed: {}", e)))??;

        // OCR problems never fail the image itself.
        let ocr_text = match self.ocr.recognize(path, &bytes).await {
            Ok(text) => self.prepare_text(&text),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "OCR failed; continuing without text");
                None
            }
        };

        Ok(Extraction {
            image: Some(bytes),
            dimensions: Some(dimensions),
            text: None,
            ocr_text,
        })
    }

    /// Collapse whitespace and truncate. Returns `None` when too little
    /// text remains to be worth an entry.
    pub fn prepare_text(&self, raw: &str) -> Option<String> {
        let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.chars().count() < self.min_text_chars {
            return None;
        }
        Some(truncate_chars(&collapsed, self.max_text_chars))
    }
}

/// Decode enough of the image to prove it is readable; return (width, height).
pub fn decode_dimensions(bytes: &[u8]) -> Result<(u32, u32), ExtractError> {
    use image::GenericImageView;

    let img = image::load_from_memory(bytes)
        .map_err(|e| ExtractError::Extraction(format!("image decode failed: {}", e)))?;
    Ok(img.dimensions())
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

fn extension_label(path: &Path) -> String {
    let ext = extension_of(path);
    if ext.is_empty() {
        "(no extension)".to_string()
    } else {
        ext
    }
}

fn extract_document(ext: &str, bytes: &[u8]) -> Result<String, ExtractError> {
    match ext {
        "pdf" => extract_pdf(bytes),
        "docx" => extract_docx(bytes),
        other => Err(ExtractError::UnsupportedType(other.to_string())),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| ExtractError::Extraction(format!("PDF extraction failed: {}", e)))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let ooxml = |e: String| ExtractError::Extraction(format!("DOCX extraction failed: {}", e));

    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ooxml(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ooxml("word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ooxml(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ooxml("word/document.xml exceeds size limit".to_string()));
    }

    paragraphs_text(&doc_xml).map_err(ooxml)
}

/// Collect `<w:t>` runs, one line per `<w:p>` paragraph.
fn paragraphs_text(xml: &[u8]) -> Result<String, String> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::DisabledRecognizer;
    use async_trait::async_trait;
    use std::io::Write;

    struct FixedOcr(&'static str);

    #[async_trait]
    impl TextRecognizer for FixedOcr {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn recognize(&self, _path: &Path, _bytes: &[u8]) -> Result<String, ExtractError> {
            Ok(self.0.to_string())
        }
    }

    struct BrokenOcr;

    #[async_trait]
    impl TextRecognizer for BrokenOcr {
        fn name(&self) -> &str {
            "broken"
        }
        async fn recognize(&self, _path: &Path, _bytes: &[u8]) -> Result<String, ExtractError> {
            Err(ExtractError::Extraction("engine crashed".to_string()))
        }
    }

    /// Reports the length of the bytes it was handed.
    struct LengthOcr;

    #[async_trait]
    impl TextRecognizer for LengthOcr {
        fn name(&self) -> &str {
            "length"
        }
        async fn recognize(&self, _path: &Path, bytes: &[u8]) -> Result<String, ExtractError> {
            Ok(format!("received {} bytes", bytes.len()))
        }
    }

    fn extractor(ocr: Arc<dyn TextRecognizer>) -> ContentExtractor {
        ContentExtractor::new(ocr, 3000, 10)
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 120, 40]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn docx_bytes(paragraphs: &[&str]) -> Vec<u8> {
        let mut body = String::new();
        for p in paragraphs {
            body.push_str(&format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p));
        }
        let xml = format!(
            r#"<?xml version="1.0"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
            body
        );
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let opts = zip::write::SimpleFileOptions::default();
            zip.start_file("word/document.xml", opts).unwrap();
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    #[tokio::test]
    async fn image_yields_dimensions_and_no_text_without_ocr() {
        let ex = extractor(Arc::new(DisabledRecognizer));
        let out = ex
            .extract(Path::new("/v/a.png"), FileType::Image, png_bytes(8, 4))
            .await
            .unwrap();
        assert!(out.image.is_some());
        assert_eq!(out.dimensions, Some((8, 4)));
        assert!(out.ocr_text.is_none());
        assert!(out.text.is_none());
    }

    #[tokio::test]
    async fn image_with_ocr_text() {
        let ex = extractor(Arc::new(FixedOcr("INVOICE\n  total due 42")));
        let out = ex
            .extract(Path::new("/v/scan.png"), FileType::Image, png_bytes(2, 2))
            .await
            .unwrap();
        assert_eq!(out.ocr_text.as_deref(), Some("INVOICE total due 42"));
    }

    #[tokio::test]
    async fn ocr_reads_the_extracted_bytes_not_the_file() {
        let bytes = png_bytes(3, 3);
        let expected = format!("received {} bytes", bytes.len());
        let ex = extractor(Arc::new(LengthOcr));
        // nothing exists at this path; OCR must work from memory
        let out = ex
            .extract(Path::new("/nonexistent/scan.png"), FileType::Image, bytes)
            .await
            .unwrap();
        assert_eq!(out.ocr_text.as_deref(), Some(expected.as_str()));
    }

    #[tokio::test]
    async fn ocr_failure_keeps_image() {
        let ex = extractor(Arc::new(BrokenOcr));
        let out = ex
            .extract(Path::new("/v/a.png"), FileType::Image, png_bytes(2, 2))
            .await
            .unwrap();
        assert!(out.image.is_some());
        assert!(out.ocr_text.is_none());
    }

    #[tokio::test]
    async fn corrupt_image_is_extraction_error() {
        let ex = extractor(Arc::new(DisabledRecognizer));
        let err = ex
            .extract(
                Path::new("/v/bad.jpg"),
                FileType::Image,
                b"definitely not a jpeg".to_vec(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Extraction(_)));
    }

    #[tokio::test]
    async fn unknown_type_is_unsupported() {
        let ex = extractor(Arc::new(DisabledRecognizer));
        let err = ex
            .extract(Path::new("/v/movie.mp4"), FileType::Other, vec![0, 1, 2])
            .await
            .unwrap_err();
        match err {
            ExtractError::UnsupportedType(ext) => assert_eq!(ext, "mp4"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn plain_text_passes_through() {
        let ex = extractor(Arc::new(DisabledRecognizer));
        let out = ex
            .extract(
                Path::new("/v/notes.md"),
                FileType::Text,
                b"# Trip\n\nwent to the   beach".to_vec(),
            )
            .await
            .unwrap();
        assert_eq!(out.text.as_deref(), Some("# Trip went to the beach"));
    }

    #[tokio::test]
    async fn short_text_has_no_entry() {
        let ex = extractor(Arc::new(DisabledRecognizer));
        let out = ex
            .extract(Path::new("/v/tiny.txt"), FileType::Text, b"hi".to_vec())
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn docx_paragraphs_extracted() {
        let ex = extractor(Arc::new(DisabledRecognizer));
        let out = ex
            .extract(
                Path::new("/v/report.docx"),
                FileType::Document,
                docx_bytes(&["Quarterly report", "Revenue grew"]),
            )
            .await
            .unwrap();
        assert_eq!(out.text.as_deref(), Some("Quarterly report Revenue grew"));
    }

    #[tokio::test]
    async fn truncated_docx_fails() {
        let ex = extractor(Arc::new(DisabledRecognizer));
        let mut bytes = docx_bytes(&["hello"]);
        bytes.truncate(bytes.len() / 2);
        let err = ex
            .extract(Path::new("/v/broken.docx"), FileType::Document, bytes)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Extraction(_)));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let ex = ContentExtractor::new(Arc::new(DisabledRecognizer), 5, 1);
        assert_eq!(ex.prepare_text("héllo wörld").as_deref(), Some("héllo"));
    }
}
