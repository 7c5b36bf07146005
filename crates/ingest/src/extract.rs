//! Passage extraction from patient documents.
//!
//! PDFs go through lopdf first, with a `pdftotext` subprocess as fallback;
//! whitespace-aligned tables found in page text are additionally rendered
//! to Markdown; image files and text-less (scanned) PDF pages are OCR'd
//! through the `tesseract` CLI, rasterizing pages with `pdftoppm`. Every
//! sub-step is independently fault-tolerant: a failing page, table or image
//! is logged and skipped, and extraction continues.

use std::path::Path;
use std::process::Command;

use once_cell::sync::Lazy;
use regex::Regex;

use mediserve_core::{FileType, SourceType};

use crate::IngestError;

/// A tagged span of extracted text, page-referenced.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub source: SourceType,
    pub page: u32,
    pub text: String,
}

/// Extraction configuration.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// OCR language passed to tesseract
    pub ocr_language: String,
    /// Rasterization resolution for scanned-page OCR
    pub ocr_resolution: u32,
    pub tesseract_bin: String,
    pub pdftoppm_bin: String,
    pub pdftotext_bin: String,
    /// Detect whitespace-aligned tables in page text
    pub detect_tables: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        use mediserve_config::constants::extraction;
        Self {
            ocr_language: extraction::DEFAULT_OCR_LANGUAGE.to_string(),
            ocr_resolution: extraction::DEFAULT_OCR_RESOLUTION,
            tesseract_bin: "tesseract".to_string(),
            pdftoppm_bin: "pdftoppm".to_string(),
            pdftotext_bin: "pdftotext".to_string(),
            detect_tables: true,
        }
    }
}

impl From<&mediserve_config::ExtractionSettings> for ExtractionConfig {
    fn from(settings: &mediserve_config::ExtractionSettings) -> Self {
        Self {
            ocr_language: settings.ocr_language.clone(),
            ocr_resolution: settings.ocr_resolution,
            tesseract_bin: settings.tesseract_bin.clone(),
            pdftoppm_bin: settings.pdftoppm_bin.clone(),
            pdftotext_bin: settings.pdftotext_bin.clone(),
            detect_tables: settings.detect_tables,
        }
    }
}

/// Converts a raw document into tagged passages.
pub struct TextExtractor {
    config: ExtractionConfig,
}

impl TextExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    /// Extract every passage from `path` according to its file type.
    pub fn extract(&self, path: &Path, file_type: FileType) -> Result<Vec<Passage>, IngestError> {
        match file_type {
            FileType::Pdf => self.extract_pdf(path),
            FileType::Txt => self.extract_txt(path),
            _ => self.extract_image(path),
        }
    }

    fn extract_txt(&self, path: &Path) -> Result<Vec<Passage>, IngestError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| IngestError::Io(format!("cannot read {}: {e}", path.display())))?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Passage {
            source: SourceType::Text,
            page: 0,
            text: text.trim().to_string(),
        }])
    }

    fn extract_pdf(&self, path: &Path) -> Result<Vec<Passage>, IngestError> {
        match lopdf::Document::load(path) {
            Ok(document) => Ok(self.extract_pdf_pages(path, &document)),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "lopdf failed to parse document, falling back to pdftotext"
                );
                self.pdftotext(path)
            }
        }
    }

    fn extract_pdf_pages(&self, path: &Path, document: &lopdf::Document) -> Vec<Passage> {
        let mut passages = Vec::new();
        let pages: Vec<u32> = document.get_pages().keys().copied().collect();

        for page in pages {
            match document.extract_text(&[page]) {
                Ok(text) if !text.trim().is_empty() => {
                    self.push_page(&mut passages, page, &text);
                }
                Ok(_) => {
                    // No extractable text: likely a scanned page.
                    match self.ocr_pdf_page(path, page) {
                        Ok(Some(text)) => passages.push(Passage {
                            source: SourceType::ImageOcr,
                            page,
                            text,
                        }),
                        Ok(None) => {}
                        Err(err) => {
                            tracing::warn!(page, error = %err, "page OCR failed, skipping");
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(page, error = %err, "page text extraction failed, skipping");
                }
            }
        }
        passages
    }

    fn push_page(&self, passages: &mut Vec<Passage>, page: u32, text: &str) {
        passages.push(Passage {
            source: SourceType::Text,
            page,
            text: text.trim().to_string(),
        });
        if self.config.detect_tables {
            for table in detect_tables(text) {
                passages.push(Passage {
                    source: SourceType::Table,
                    page,
                    text: table,
                });
            }
        }
    }

    fn pdftotext(&self, path: &Path) -> Result<Vec<Passage>, IngestError> {
        let output = Command::new(&self.config.pdftotext_bin)
            .arg("-layout")
            .arg(path)
            .arg("-")
            .output()
            .map_err(|e| IngestError::Extraction(format!("cannot run pdftotext: {e}")))?;
        if !output.status.success() {
            return Err(IngestError::Extraction(format!(
                "pdftotext failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        let mut passages = Vec::new();
        // pdftotext separates pages with form feeds.
        for (index, page_text) in text.split('\u{c}').enumerate() {
            if page_text.trim().is_empty() {
                continue;
            }
            self.push_page(&mut passages, index as u32 + 1, page_text);
        }
        Ok(passages)
    }

    fn extract_image(&self, path: &Path) -> Result<Vec<Passage>, IngestError> {
        let text = self.tesseract(path)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Passage {
            source: SourceType::ImageOcr,
            // A standalone image has no page of its own.
            page: 0,
            text: text.trim().to_string(),
        }])
    }

    fn ocr_pdf_page(&self, path: &Path, page: u32) -> Result<Option<String>, IngestError> {
        let scratch = tempfile::tempdir()
            .map_err(|e| IngestError::Extraction(format!("cannot create scratch dir: {e}")))?;
        let prefix = scratch.path().join("page");

        let status = Command::new(&self.config.pdftoppm_bin)
            .arg("-png")
            .arg("-r")
            .arg(self.config.ocr_resolution.to_string())
            .arg("-f")
            .arg(page.to_string())
            .arg("-l")
            .arg(page.to_string())
            .arg(path)
            .arg(&prefix)
            .status()
            .map_err(|e| IngestError::Extraction(format!("cannot run pdftoppm: {e}")))?;
        if !status.success() {
            return Err(IngestError::Extraction(format!(
                "pdftoppm failed on page {page}"
            )));
        }

        let rendered = std::fs::read_dir(scratch.path())
            .map_err(|e| IngestError::Extraction(format!("cannot read scratch dir: {e}")))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .find(|p| p.extension().is_some_and(|ext| ext == "png"));
        let Some(rendered) = rendered else {
            return Ok(None);
        };

        let text = self.tesseract(&rendered)?;
        if text.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(text.trim().to_string()))
        }
    }

    fn tesseract(&self, input: &Path) -> Result<String, IngestError> {
        let output = Command::new(&self.config.tesseract_bin)
            .arg(input)
            .arg("stdout")
            .arg("-l")
            .arg(&self.config.ocr_language)
            .output()
            .map_err(|e| IngestError::Extraction(format!("cannot run tesseract: {e}")))?;
        if !output.status.success() {
            return Err(IngestError::Extraction(format!(
                "tesseract failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

static CELL_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}|\t").expect("valid regex"));

/// Detect whitespace-aligned tables in page text and render each as a
/// Markdown table. A table is at least two consecutive lines of two or more
/// cells separated by runs of spaces or tabs.
pub fn detect_tables(text: &str) -> Vec<String> {
    let mut tables = Vec::new();
    let mut rows: Vec<Vec<String>> = Vec::new();

    for line in text.lines().chain(std::iter::once("")) {
        let cells: Vec<String> = CELL_SEPARATOR
            .split(line.trim())
            .filter(|cell| !cell.is_empty())
            .map(|cell| cell.to_string())
            .collect();

        if cells.len() >= 2 {
            rows.push(cells);
        } else {
            if rows.len() >= 2 {
                tables.push(render_markdown_table(&rows));
            }
            rows.clear();
        }
    }
    tables
}

fn render_markdown_table(rows: &[Vec<String>]) -> String {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut out = String::new();

    for (index, row) in rows.iter().enumerate() {
        out.push('|');
        for cell in 0..width {
            out.push(' ');
            out.push_str(row.get(cell).map(String::as_str).unwrap_or(""));
            out.push_str(" |");
        }
        out.push('\n');
        if index == 0 {
            out.push('|');
            for _ in 0..width {
                out.push_str(" --- |");
            }
            out.push('\n');
        }
    }
    out.trim_end().to_string()
}
