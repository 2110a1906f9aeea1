//! Staged input: the files a user selected for one tool run.
//!
//! An [`UploadRequest`] is created when the user picks files, is immutable
//! once built, and is shared (`Arc`) between the session and the executing
//! backend. Its declared [`MediaCategory`] drives endpoint routing and field
//! attribution; the validation gate checks it against every file's MIME type.

use crate::error::{ProcessingError, RejectReason};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Broad media class of an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaCategory {
    Image,
    Video,
    Audio,
    Document,
    Markup,
}

const DOCUMENT_MIMES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
];

impl MediaCategory {
    /// Classify a MIME type. Unknown types have no category.
    pub fn from_mime(mime: &str) -> Option<MediaCategory> {
        let mime = mime.trim().to_ascii_lowercase();
        if mime.starts_with("image/") {
            Some(MediaCategory::Image)
        } else if mime.starts_with("video/") {
            Some(MediaCategory::Video)
        } else if mime.starts_with("audio/") {
            Some(MediaCategory::Audio)
        } else if mime == "text/html" {
            Some(MediaCategory::Markup)
        } else if DOCUMENT_MIMES.contains(&mime.as_str()) {
            Some(MediaCategory::Document)
        } else {
            None
        }
    }

    /// Top-level MIME type for this category.
    pub fn mime_prefix(&self) -> &'static str {
        match self {
            MediaCategory::Image => "image",
            MediaCategory::Video => "video",
            MediaCategory::Audio => "audio",
            MediaCategory::Document => "application",
            MediaCategory::Markup => "text",
        }
    }
}

impl std::fmt::Display for MediaCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MediaCategory::Image => "image",
            MediaCategory::Video => "video",
            MediaCategory::Audio => "audio",
            MediaCategory::Document => "document",
            MediaCategory::Markup => "markup",
        };
        f.write_str(s)
    }
}

/// One file held in memory, ready for submission.
#[derive(Clone, PartialEq, Eq)]
pub struct StagedFile {
    name: String,
    mime: String,
    bytes: Vec<u8>,
}

impl std::fmt::Debug for StagedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedFile")
            .field("name", &self.name)
            .field("mime", &self.mime)
            .field("size", &self.bytes.len())
            .finish()
    }
}

impl StagedFile {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            bytes,
        }
    }

    /// Stage bytes, guessing the MIME type from the file name's extension.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let mime = guess_mime(&name);
        Self { name, mime, bytes }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// File name without its final extension.
    pub fn stem(&self) -> &str {
        Path::new(&self.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.name)
    }
}

/// MIME type for a file name, `application/octet-stream` when unknown.
pub fn guess_mime(name: &str) -> String {
    mime_guess::MimeGuess::from_path(name)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

/// The immutable input of one processing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    files: Vec<StagedFile>,
    category: MediaCategory,
    total_bytes: u64,
}

impl UploadRequest {
    /// Build a request, declaring its category from the first file's MIME type.
    pub fn new(files: Vec<StagedFile>) -> Result<Self, ProcessingError> {
        let first = files
            .first()
            .ok_or(ProcessingError::rejected(RejectReason::Empty))?;
        let category = MediaCategory::from_mime(first.mime()).ok_or_else(|| {
            ProcessingError::rejected(RejectReason::UnsupportedType {
                mime: first.mime().to_string(),
                accepted: "image, video, audio, document or HTML files".to_string(),
            })
        })?;
        Ok(Self::with_category(files, category))
    }

    /// Build a request with an explicitly declared category. No checks are
    /// made here; the validation gate compares files against the declaration.
    pub fn with_category(files: Vec<StagedFile>, category: MediaCategory) -> Self {
        let total_bytes = files.iter().map(StagedFile::size).sum();
        Self {
            files,
            category,
            total_bytes,
        }
    }

    pub fn single(file: StagedFile) -> Result<Self, ProcessingError> {
        Self::new(vec![file])
    }

    /// A markup request for the HTML→React converter.
    pub fn markup(html: impl Into<String>) -> Self {
        let file = StagedFile::new("input.html", "text/html", html.into().into_bytes());
        Self::with_category(vec![file], MediaCategory::Markup)
    }

    pub fn files(&self) -> &[StagedFile] {
        &self.files
    }

    /// The first (for most tools: the only) file.
    pub fn primary(&self) -> Option<&StagedFile> {
        self.files.first()
    }

    pub fn category(&self) -> MediaCategory {
        self.category
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_from_mime() {
        assert_eq!(MediaCategory::from_mime("image/png"), Some(MediaCategory::Image));
        assert_eq!(MediaCategory::from_mime("VIDEO/MP4"), Some(MediaCategory::Video));
        assert_eq!(MediaCategory::from_mime("audio/mpeg"), Some(MediaCategory::Audio));
        assert_eq!(
            MediaCategory::from_mime("application/pdf"),
            Some(MediaCategory::Document)
        );
        assert_eq!(MediaCategory::from_mime("text/html"), Some(MediaCategory::Markup));
        assert_eq!(MediaCategory::from_mime("application/zip"), None);
    }

    #[test]
    fn mime_guessed_from_extension() {
        assert_eq!(StagedFile::from_bytes("photo.JPG", vec![1]).mime(), "image/jpeg");
        assert_eq!(StagedFile::from_bytes("a.pdf", vec![1]).mime(), "application/pdf");
        assert_eq!(
            StagedFile::from_bytes("noext", vec![1]).mime(),
            "application/octet-stream"
        );
    }

    #[test]
    fn request_totals_and_category() {
        let req = UploadRequest::new(vec![
            StagedFile::new("a.pdf", "application/pdf", vec![0; 10]),
            StagedFile::new("b.pdf", "application/pdf", vec![0; 5]),
        ])
        .expect("valid request");
        assert_eq!(req.category(), MediaCategory::Document);
        assert_eq!(req.total_bytes(), 15);
        assert_eq!(req.primary().map(StagedFile::name), Some("a.pdf"));
    }

    #[test]
    fn empty_and_unknown_requests_are_rejected() {
        assert_eq!(
            UploadRequest::new(vec![]),
            Err(ProcessingError::ValidationFailed(RejectReason::Empty))
        );
        let err = UploadRequest::single(StagedFile::new("x.zip", "application/zip", vec![1]))
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessingError::ValidationFailed(RejectReason::UnsupportedType { .. })
        ));
    }

    #[test]
    fn stem_strips_extension() {
        let f = StagedFile::new("slides.final.pptx", "application/vnd.ms-powerpoint", vec![]);
        assert_eq!(f.stem(), "slides.final");
    }

    #[test]
    fn markup_request() {
        let req = UploadRequest::markup("<div class=\"a\"></div>");
        assert_eq!(req.category(), MediaCategory::Markup);
        assert_eq!(req.primary().map(StagedFile::mime), Some("text/html"));
    }
}
