pub mod chunker;
pub mod parser;

pub use chunker::TextChunker;
pub use parser::{DocumentParser, ParsedDocument};

use thiserror::Error;

/// Validation and extraction failures of the ingestion pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("No file uploaded")]
    MissingFile,

    #[error("File type {extension} is not allowed. Allowed types: {allowed}")]
    UnsupportedType { extension: String, allowed: String },

    #[error("File too large: {size} bytes exceeds the limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    #[error("No text content could be extracted from {filename}")]
    Empty { filename: String },

    #[error("Failed to parse document: {0}")]
    Parse(String),
}

/// Lowercased extension with its leading dot (`report.PDF` → `.pdf`).
pub fn file_extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(format!(".{}", ext.to_lowercase()))
}

/// Reject files whose extension is not in `allowed`.
pub fn check_extension(filename: &str, allowed: &[String]) -> Result<String, IngestError> {
    let extension = file_extension(filename).unwrap_or_default();
    if allowed.iter().any(|a| a.eq_ignore_ascii_case(&extension)) {
        Ok(extension)
    } else {
        Err(IngestError::UnsupportedType {
            extension: if extension.is_empty() {
                filename.to_string()
            } else {
                extension
            },
            allowed: allowed.join(", "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> Vec<String> {
        vec![".pdf".into(), ".txt".into(), ".md".into()]
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("Report.PDF"), Some(".pdf".to_string()));
        assert_eq!(file_extension("archive.tar.gz"), Some(".gz".to_string()));
        assert_eq!(file_extension("README"), None);
        assert_eq!(file_extension(".env"), None);
    }

    #[test]
    fn test_check_extension() {
        assert_eq!(check_extension("notes.md", &allowed()).unwrap(), ".md");
        let err = check_extension("setup.exe", &allowed()).unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedType { ref extension, .. } if extension == ".exe"));
        assert!(err.to_string().contains(".pdf, .txt, .md"));
        assert!(check_extension("Makefile", &allowed()).is_err());
    }
}
