//! Deterministic, model-free text extraction keyed by file extension.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use thiserror::Error;

/// Share of decoded characters that may be replacement or control characters before a buffer
/// is treated as binary.
const MAX_GARBLED_RATIO: f32 = 0.1;

/// Errors raised by the fallback extractor.
#[derive(Debug, Error)]
pub enum ExtractorError {
    /// The uploaded buffer is empty.
    #[error("file is empty")]
    Empty,
    /// The bytes do not decode to readable text.
    #[error("content is not readable text: {0}")]
    Undecodable(String),
    /// The PDF parser rejected the file.
    #[error("PDF text layer could not be read: {0}")]
    Pdf(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFamily {
    Text,
    Pdf,
    Image,
    Office,
    Archive,
    Unknown,
}

fn extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

fn classify(file_name: &str) -> FileFamily {
    match extension(file_name).as_str() {
        "txt" | "text" | "md" | "markdown" | "csv" | "tsv" | "json" | "xml" | "html" | "htm"
        | "log" | "yaml" | "yml" | "rtf" | "eml" => FileFamily::Text,
        "pdf" => FileFamily::Pdf,
        "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx" | "odt" | "ods" => FileFamily::Office,
        "zip" | "gz" | "tar" | "7z" | "rar" => FileFamily::Archive,
        _ => {
            let guess = mime_guess::from_path(file_name).first();
            match guess {
                Some(mime) if mime.type_() == mime_guess::mime::TEXT => FileFamily::Text,
                Some(mime) if mime.type_() == mime_guess::mime::IMAGE => FileFamily::Image,
                _ => FileFamily::Unknown,
            }
        }
    }
}

/// Whether the file name denotes a raster image that the vision model can read.
pub fn is_raster_image(file_name: &str) -> bool {
    matches!(
        extension(file_name).as_str(),
        "png" | "jpg" | "jpeg" | "gif" | "bmp" | "webp" | "tif" | "tiff"
    )
}

/// Extract text from `bytes` without calling any model.
///
/// Text-like formats are decoded, PDFs yield their embedded text layer, and opaque binaries
/// get a placeholder description. Unknown extensions are accepted only when the bytes decode
/// as readable text.
pub fn extract(file_name: &str, bytes: &[u8]) -> Result<String, ExtractorError> {
    if bytes.is_empty() {
        return Err(ExtractorError::Empty);
    }
    let size = bytes.len();

    match classify(file_name) {
        FileFamily::Text => decode_text(bytes),
        FileFamily::Pdf => {
            let text = extract_pdf_text(bytes)?;
            if text.is_empty() {
                Ok(format!(
                    "PDF document {file_name} ({size} bytes) has no embedded text layer."
                ))
            } else {
                Ok(text)
            }
        }
        FileFamily::Image if is_raster_image(file_name) => Ok(format!(
            "Image file {file_name} ({size} bytes); text recognition was not available."
        )),
        FileFamily::Image => Ok(format!("Image file {file_name} ({size} bytes).")),
        FileFamily::Office => Ok(format!(
            "Office document {file_name} ({size} bytes); content not extracted."
        )),
        FileFamily::Archive => Ok(format!(
            "Archive {file_name} ({size} bytes); content not extracted."
        )),
        FileFamily::Unknown => decode_text(bytes),
    }
}

fn decode_text(bytes: &[u8]) -> Result<String, ExtractorError> {
    let decoded = String::from_utf8_lossy(bytes);
    let total = decoded.chars().count().max(1);
    let garbled = decoded
        .chars()
        .filter(|ch| {
            *ch == char::REPLACEMENT_CHARACTER || (ch.is_control() && !ch.is_whitespace())
        })
        .count();
    if garbled as f32 / total as f32 > MAX_GARBLED_RATIO {
        return Err(ExtractorError::Undecodable(format!(
            "{garbled} of {total} characters are not printable"
        )));
    }
    let text = decoded.trim();
    if text.is_empty() {
        return Err(ExtractorError::Undecodable("only whitespace".into()));
    }
    Ok(text.to_string())
}

fn extract_pdf_text(bytes: &[u8]) -> Result<String, ExtractorError> {
    // pdf-extract panics on some malformed inputs.
    let outcome = catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes)));
    match outcome {
        Ok(Ok(text)) => Ok(text.trim().to_string()),
        Ok(Err(error)) => Err(ExtractorError::Pdf(error.to_string())),
        Err(_) => Err(ExtractorError::Pdf("parser panicked".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_files_are_decoded() {
        let text = extract("notes.md", b"  # Offer\nApproved amount 250,000\n").expect("text");
        assert_eq!(text, "# Offer\nApproved amount 250,000");
    }

    #[test]
    fn empty_buffers_are_rejected() {
        assert!(matches!(extract("notes.txt", b""), Err(ExtractorError::Empty)));
    }

    #[test]
    fn unknown_binary_is_rejected() {
        let bytes: Vec<u8> = (0u8..=255).cycle().take(2048).collect();
        assert!(matches!(
            extract("blob.xyz", &bytes),
            Err(ExtractorError::Undecodable(_))
        ));
    }

    #[test]
    fn unknown_extension_with_text_is_accepted() {
        let text = extract("README", b"plain words").expect("text");
        assert_eq!(text, "plain words");
    }

    #[test]
    fn corrupt_pdf_is_an_error_not_a_panic() {
        let result = extract("broken.pdf", b"%PDF-1.7\nthis is not a real pdf");
        assert!(matches!(result, Err(ExtractorError::Pdf(_))));
    }

    #[test]
    fn opaque_formats_get_placeholder() {
        let text = extract("sheet.xlsx", &[0x50, 0x4b, 0x03, 0x04]).expect("placeholder");
        assert!(text.contains("sheet.xlsx"));
        assert!(text.contains("4 bytes"));
    }

    #[test]
    fn raster_images_are_detected() {
        assert!(is_raster_image("scan.PNG"));
        assert!(is_raster_image("photo.jpeg"));
        assert!(!is_raster_image("diagram.svg"));
        assert!(!is_raster_image("offer.pdf"));
    }
}
