//! Text recognition inside images.
//!
//! OCR is a black-box capability: given the bytes of an image, produce
//! whatever text it contains (possibly nothing). Two implementations ship:
//! [`DisabledRecognizer`] and [`TesseractRecognizer`], which pipes the
//! image into the `tesseract` command-line tool.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::config::OcrConfig;
use crate::error::ExtractError;

#[async_trait]
pub trait TextRecognizer: Send + Sync {
    fn name(&self) -> &str;

    /// Recognize text in `bytes`, the image content read from `path`. The
    /// file is not read again. An image without text yields an empty
    /// string, not an error.
    async fn recognize(&self, path: &Path, bytes: &[u8]) -> Result<String, ExtractError>;
}

/// Never finds any text.
pub struct DisabledRecognizer;

#[async_trait]
impl TextRecognizer for DisabledRecognizer {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn recognize(&self, _path: &Path, _bytes: &[u8]) -> Result<String, ExtractError> {
        Ok(String::new())
    }
}

pub struct TesseractRecognizer {
    command: String,
    language: String,
}

impl TesseractRecognizer {
    pub fn new(command: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            language: language.into(),
        }
    }
}

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(&self, path: &Path, bytes: &[u8]) -> Result<String, ExtractError> {
        let mut child = Command::new(&self.command)
            .args(["stdin", "stdout", "-l", &self.language])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExtractError::Extraction(format!("failed to run {}: {}", self.command, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ExtractError::Extraction("tesseract stdin unavailable".to_string()))?;
        let input = bytes.to_vec();
        // feed stdin concurrently so a full stdout pipe cannot stall the write
        let writer = tokio::spawn(async move {
            let result = stdin.write_all(&input).await;
            drop(stdin);
            result
        });

        let output = child.wait_with_output().await?;
        match writer.await {
            Ok(Ok(())) => {}
            // tesseract may close stdin early on input it rejects; its exit
            // status below carries the real error
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(e) => {
                return Err(ExtractError::Extraction(format!("OCR input task failed: {}", e)))
            }
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractError::Extraction(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        let text = normalize_ocr_text(&String::from_utf8_lossy(&output.stdout));
        debug!(path = %path.display(), chars = text.len(), "OCR complete");
        Ok(text)
    }
}

/// Collapse recognized lines into one space-separated string.
pub fn normalize_ocr_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn create_recognizer(config: &OcrConfig) -> Arc<dyn TextRecognizer> {
    match config.provider.as_str() {
        "tesseract" => Arc::new(TesseractRecognizer::new(&config.command, &config.language)),
        _ => Arc::new(DisabledRecognizer),
    }
}
