//! The tool catalogue.
//!
//! A *tool* is one file-transformation workflow (merge PDFs, remove an image
//! background, compress media, …). Everything the orchestration layer needs
//! to know about a tool lives on [`ToolKind`]: which media it accepts, how
//! many files, the size ceiling, the service endpoint and the multipart field
//! names. [`ToolRegistry`] is the listable, slug-addressable view of the same
//! data that a [`crate::context::ToolContext`] owns.

use crate::error::ToolkitError;
use crate::upload::MediaCategory;
use serde::{Deserialize, Serialize};

const MB: u64 = 1024 * 1024;

/// Every tool the orchestration layer can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolKind {
    PdfMerge,
    PdfEdit,
    WordToPdf,
    PptToPdf,
    BackgroundRemoval,
    MediaCompress,
    HtmlToReact,
}

const WORD_MIMES: &[&str] = &[
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

const PPT_MIMES: &[&str] = &[
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
];

const PDF_MIMES: &[&str] = &["application/pdf"];

const HTML_MIMES: &[&str] = &["text/html"];

impl ToolKind {
    pub const ALL: [ToolKind; 7] = [
        ToolKind::PdfMerge,
        ToolKind::PdfEdit,
        ToolKind::WordToPdf,
        ToolKind::PptToPdf,
        ToolKind::BackgroundRemoval,
        ToolKind::MediaCompress,
        ToolKind::HtmlToReact,
    ];

    /// URL-friendly identifier, also used by the CLI.
    pub fn slug(&self) -> &'static str {
        match self {
            ToolKind::PdfMerge => "pdf-merger",
            ToolKind::PdfEdit => "pdf-editor",
            ToolKind::WordToPdf => "word-to-pdf",
            ToolKind::PptToPdf => "ppt-to-pdf",
            ToolKind::BackgroundRemoval => "image-bg-remover",
            ToolKind::MediaCompress => "media-compressor",
            ToolKind::HtmlToReact => "html-to-react",
        }
    }

    pub fn from_slug(slug: &str) -> Option<ToolKind> {
        Self::ALL.into_iter().find(|t| t.slug() == slug)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::PdfMerge => "PDF Merger",
            ToolKind::PdfEdit => "PDF Editor",
            ToolKind::WordToPdf => "Word to PDF",
            ToolKind::PptToPdf => "PowerPoint to PDF",
            ToolKind::BackgroundRemoval => "Image Background Remover",
            ToolKind::MediaCompress => "Media Compressor",
            ToolKind::HtmlToReact => "HTML to React Converter",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolKind::PdfMerge => "Combine multiple PDF files into one document",
            ToolKind::PdfEdit => "Add text, shapes and images to a PDF",
            ToolKind::WordToPdf => "Convert .doc/.docx documents to PDF",
            ToolKind::PptToPdf => "Convert .ppt/.pptx presentations to PDF",
            ToolKind::BackgroundRemoval => "Remove the background from an image",
            ToolKind::MediaCompress => "Compress audio, video, and image files",
            ToolKind::HtmlToReact => "Convert HTML code to React components",
        }
    }

    /// Catalogue grouping shown in listings.
    pub fn group(&self) -> &'static str {
        match self {
            ToolKind::PdfMerge | ToolKind::PdfEdit => "PDF",
            ToolKind::WordToPdf | ToolKind::PptToPdf => "Document",
            ToolKind::BackgroundRemoval => "Image",
            ToolKind::MediaCompress => "Other",
            ToolKind::HtmlToReact => "Converter",
        }
    }

    /// Media categories this tool accepts.
    pub fn accepted_categories(&self) -> &'static [MediaCategory] {
        match self {
            ToolKind::PdfMerge | ToolKind::PdfEdit | ToolKind::WordToPdf | ToolKind::PptToPdf => {
                &[MediaCategory::Document]
            }
            ToolKind::BackgroundRemoval => &[MediaCategory::Image],
            ToolKind::MediaCompress => &[
                MediaCategory::Image,
                MediaCategory::Video,
                MediaCategory::Audio,
            ],
            ToolKind::HtmlToReact => &[MediaCategory::Markup],
        }
    }

    /// Exact MIME types accepted, for tools narrower than their category.
    /// `None` means any MIME type of an accepted category.
    pub fn accepted_mimes(&self) -> Option<&'static [&'static str]> {
        match self {
            ToolKind::PdfMerge | ToolKind::PdfEdit => Some(PDF_MIMES),
            ToolKind::WordToPdf => Some(WORD_MIMES),
            ToolKind::PptToPdf => Some(PPT_MIMES),
            ToolKind::HtmlToReact => Some(HTML_MIMES),
            ToolKind::BackgroundRemoval | ToolKind::MediaCompress => None,
        }
    }

    /// Whether a MIME type is acceptable input for this tool.
    pub fn accepts_mime(&self, mime: &str) -> bool {
        match self.accepted_mimes() {
            Some(list) => list.contains(&mime),
            None => MediaCategory::from_mime(mime)
                .is_some_and(|c| self.accepted_categories().contains(&c)),
        }
    }

    /// Human-readable accepted-type summary for error messages.
    pub fn accepted_summary(&self) -> String {
        match self.accepted_mimes() {
            Some(list) => list.join(", "),
            None => self
                .accepted_categories()
                .iter()
                .map(|c| format!("{}/*", c.mime_prefix()))
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// Inclusive range of files per request.
    pub fn file_count(&self) -> (usize, usize) {
        match self {
            ToolKind::PdfMerge => (2, 50),
            _ => (1, 1),
        }
    }

    /// Default per-file size ceiling in bytes.
    pub fn default_max_bytes(&self) -> u64 {
        match self {
            ToolKind::BackgroundRemoval => 5 * MB,
            ToolKind::HtmlToReact => MB,
            ToolKind::PdfMerge | ToolKind::PdfEdit => 50 * MB,
            ToolKind::WordToPdf | ToolKind::PptToPdf => 50 * MB,
            ToolKind::MediaCompress => 500 * MB,
        }
    }

    /// Whether an in-process pipeline exists for this tool.
    pub fn supports_local(&self) -> bool {
        matches!(self, ToolKind::BackgroundRemoval)
    }

    /// Service endpoint path. Media compression routes by category.
    pub fn endpoint(&self, category: MediaCategory) -> &'static str {
        match self {
            ToolKind::PdfMerge => "/api/pdf/merge",
            ToolKind::PdfEdit => "/api/pdf/edit",
            ToolKind::WordToPdf => "/api/pdf/word-to-pdf",
            ToolKind::PptToPdf => "/api/document/ppt-to-pdf",
            ToolKind::BackgroundRemoval => "/api/media/remove-bg",
            ToolKind::HtmlToReact => "/api/converter/html-to-react",
            ToolKind::MediaCompress => match category {
                MediaCategory::Video => "/api/media/compress-video",
                MediaCategory::Audio => "/api/media/compress-audio",
                _ => "/api/media/compress-image",
            },
        }
    }

    /// Multipart field name carrying the file(s).
    pub fn file_field(&self, category: MediaCategory) -> &'static str {
        match self {
            ToolKind::PdfMerge => "pdfs",
            ToolKind::PdfEdit => "pdf",
            ToolKind::WordToPdf => "document",
            ToolKind::PptToPdf => "presentation",
            ToolKind::BackgroundRemoval => "image",
            ToolKind::HtmlToReact => "htmlCode",
            ToolKind::MediaCompress => match category {
                MediaCategory::Video => "video",
                MediaCategory::Audio => "audio",
                _ => "image",
            },
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

/// Listing entry for one tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub kind: ToolKind,
    pub slug: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub group: &'static str,
    pub accepts: String,
    pub max_bytes: u64,
    pub supports_local: bool,
}

/// Slug-addressable catalogue of the tools a context offers.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    /// Build the registry with each tool's effective size ceiling.
    pub fn new(max_bytes: impl Fn(ToolKind) -> u64) -> Self {
        let tools = ToolKind::ALL
            .into_iter()
            .map(|kind| ToolDescriptor {
                kind,
                slug: kind.slug(),
                name: kind.name(),
                description: kind.description(),
                group: kind.group(),
                accepts: kind.accepted_summary(),
                max_bytes: max_bytes(kind),
                supports_local: kind.supports_local(),
            })
            .collect();
        Self { tools }
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn lookup(&self, slug: &str) -> Result<&ToolDescriptor, ToolkitError> {
        self.tools
            .iter()
            .find(|t| t.slug == slug)
            .ok_or_else(|| ToolkitError::UnknownTool {
                slug: slug.to_string(),
            })
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(|kind| kind.default_max_bytes())
    }
}
