//! Field attribution: which form fields a tool request carries.
//!
//! [`build_submission`] is a pure function of the tool, the staged input and
//! the settings, so the exact wire shape of every tool is testable without a
//! server. [`multipart_form`] turns it into a `reqwest` form.

use crate::error::ProcessingError;
use crate::settings::{edit_payload, CompressionLevel, ProcessingSettings};
use crate::tool::ToolKind;
use crate::upload::{MediaCategory, UploadRequest};
use reqwest::multipart::{Form, Part};
use serde_json::json;

/// One multipart field.
#[derive(Clone, PartialEq, Eq)]
pub enum FormPart {
    Text {
        name: &'static str,
        value: String,
    },
    File {
        name: &'static str,
        file_name: String,
        mime: String,
        bytes: Vec<u8>,
    },
}

impl std::fmt::Debug for FormPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormPart::Text { name, value } => write!(f, "Text({name}={value})"),
            FormPart::File {
                name,
                file_name,
                bytes,
                ..
            } => write!(f, "File({name}={file_name}, {} bytes)", bytes.len()),
        }
    }
}

/// Request body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Multipart(Vec<FormPart>),
    /// The HTML converter takes JSON rather than a form.
    Json(serde_json::Value),
}

/// A fully attributed request, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub endpoint: &'static str,
    pub body: Body,
}

impl Submission {
    /// Value of a text field, if present.
    pub fn text(&self, field: &str) -> Option<&str> {
        match &self.body {
            Body::Multipart(parts) => parts.iter().find_map(|p| match p {
                FormPart::Text { name, value } if *name == field => Some(value.as_str()),
                _ => None,
            }),
            Body::Json(_) => None,
        }
    }

    /// File names sent under a field, in order.
    pub fn file_names(&self, field: &str) -> Vec<&str> {
        match &self.body {
            Body::Multipart(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    FormPart::File {
                        name, file_name, ..
                    } if *name == field => Some(file_name.as_str()),
                    _ => None,
                })
                .collect(),
            Body::Json(_) => Vec::new(),
        }
    }
}

/// Attribute the request's files and settings to the tool's fields.
///
/// Settings that do not apply to the tool are ignored here; the validation
/// gate has already rejected them.
pub fn build_submission(
    tool: ToolKind,
    request: &UploadRequest,
    settings: &ProcessingSettings,
) -> Submission {
    let category = request.category();
    let endpoint = tool.endpoint(category);

    if tool == ToolKind::HtmlToReact {
        let html = request
            .primary()
            .map(|f| String::from_utf8_lossy(f.bytes()).into_owned())
            .unwrap_or_default();
        return Submission {
            endpoint,
            body: Body::Json(json!({ "htmlCode": html })),
        };
    }

    let mut parts = Vec::new();

    match (tool, settings) {
        (ToolKind::MediaCompress, ProcessingSettings::TargetSize { bytes, quality_hint }) => {
            parts.push(text("mode", "targetSize"));
            parts.push(text("targetSize", bytes.to_string()));
            if category == MediaCategory::Image {
                if let Some(q) = quality_hint {
                    parts.push(text("quality", q.to_string()));
                }
            }
        }
        (ToolKind::MediaCompress, ProcessingSettings::Preset { level }) => {
            parts.extend(preset_fields(*level, category));
        }
        (ToolKind::MediaCompress, _) => {
            parts.extend(preset_fields(CompressionLevel::default(), category));
        }
        (ToolKind::PdfEdit, ProcessingSettings::Edits { operations }) => {
            parts.push(text("operations", edit_payload(operations).to_string()));
        }
        (ToolKind::PdfEdit, _) => {
            parts.push(text("operations", edit_payload(&[]).to_string()));
        }
        _ => {}
    }

    let field = tool.file_field(category);
    for file in request.files() {
        parts.push(FormPart::File {
            name: field,
            file_name: file.name().to_string(),
            mime: file.mime().to_string(),
            bytes: file.bytes().to_vec(),
        });
    }

    Submission {
        endpoint,
        body: Body::Multipart(parts),
    }
}

/// Build the `reqwest` multipart form. Fails only for an unparsable MIME type.
pub fn multipart_form(parts: Vec<FormPart>) -> Result<Form, ProcessingError> {
    let mut form = Form::new();
    for part in parts {
        form = match part {
            FormPart::Text { name, value } => form.text(name, value),
            FormPart::File {
                name,
                file_name,
                mime,
                bytes,
            } => {
                let part = Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str(&mime)
                    .map_err(|e| ProcessingError::RemoteFailure {
                        status: None,
                        message: format!("could not attach file: {e}"),
                        fallback: false,
                    })?;
                form.part(name, part)
            }
        };
    }
    Ok(form)
}

fn preset_fields(level: CompressionLevel, category: MediaCategory) -> Vec<FormPart> {
    let quality = match category {
        MediaCategory::Image => level.image_quality().to_string(),
        MediaCategory::Audio => level.audio_bitrate_kbps().to_string(),
        _ => level.as_str().to_string(),
    };
    vec![text("quality", quality), text("mode", "preset")]
}

fn text(name: &'static str, value: impl Into<String>) -> FormPart {
    FormPart::Text {
        name,
        value: value.into(),
    }
}
