//! Document ingestion: upload checks and PDF text extraction
//!
//! The rest of the pipeline only sees plain text; this is the one place
//! that knows about PDF bytes.

use std::fs;
use std::path::Path;
use log::info;

use crate::error::MedMindError;

/// A validated upload with its extracted text
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedDocument {
    pub filename: String,
    pub text: String,
}

/// Reject anything that is not a `.pdf` within the size limit
pub fn validate_upload(filename: &str, size: u64, max_bytes: u64) -> Result<(), MedMindError> {
    if !filename.to_lowercase().ends_with(".pdf") {
        return Err(MedMindError::InvalidUpload("Only PDF files are supported".into()));
    }
    if size == 0 {
        return Err(MedMindError::InvalidUpload("File is empty".into()));
    }
    if size > max_bytes {
        return Err(MedMindError::InvalidUpload(format!(
            "File size too large. Maximum {} MB allowed.",
            max_bytes / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Extract text from PDF bytes, pages separated by newlines
pub fn extract_text_from_pdf(bytes: &[u8]) -> Result<String, MedMindError> {
    let raw = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| MedMindError::Pdf(e.to_string()))?;
    let text = normalize_text(&raw);

    if text.trim().is_empty() {
        return Err(MedMindError::Pdf("No text could be extracted from PDF".into()));
    }

    info!("Successfully extracted {} characters from PDF", text.len());
    Ok(text)
}

/// Turn form feeds into newlines and drop blank lines
pub fn normalize_text(raw: &str) -> String {
    raw.split(['\x0C', '\n'])
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Read, validate and extract a PDF from disk
pub fn load_pdf<P: AsRef<Path>>(path: P, max_bytes: u64) -> Result<UploadedDocument, MedMindError> {
    let path = path.as_ref();
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let size = fs::metadata(path)?.len();
    validate_upload(&filename, size, max_bytes)?;

    info!("Processing file: {}", filename);
    let bytes = fs::read(path)?;
    let text = extract_text_from_pdf(&bytes)?;
    Ok(UploadedDocument { filename, text })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEN_MB: u64 = 10 * 1024 * 1024;

    #[test]
    fn test_validate_upload() {
        assert!(validate_upload("labs.pdf", 2048, TEN_MB).is_ok());
        assert!(validate_upload("LABS.PDF", 2048, TEN_MB).is_ok());
        assert!(matches!(
            validate_upload("labs.docx", 2048, TEN_MB),
            Err(MedMindError::InvalidUpload(_))
        ));
        assert!(validate_upload("labs.pdf", 0, TEN_MB).is_err());
        assert!(validate_upload("labs.pdf", TEN_MB + 1, TEN_MB).is_err());
    }

    #[test]
    fn test_normalize_text() {
        let raw = "Glucose 95   \n\n\x0CHDL 50\n   \nLDL 99";
        assert_eq!(normalize_text(raw), "Glucose 95\nHDL 50\nLDL 99");
    }

    #[test]
    fn test_garbage_bytes_are_rejected() {
        let result = extract_text_from_pdf(b"definitely not a pdf");
        assert!(matches!(result, Err(MedMindError::Pdf(_))));
    }

    #[test]
    fn test_load_pdf_checks_extension_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labs.txt");
        fs::write(&path, "Glucose 95").unwrap();

        let result = load_pdf(&path, TEN_MB);
        assert!(matches!(result, Err(MedMindError::InvalidUpload(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_pdf("/nonexistent/labs.pdf", TEN_MB);
        assert!(matches!(result, Err(MedMindError::Io(_))));
    }
}
