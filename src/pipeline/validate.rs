//! Validation gate: decide whether a request may be processed at all.
//!
//! Both checks are pure functions over the request, the tool and the
//! settings. They run before any network call or local inference is issued,
//! so a rejected request never reaches an executor.

use crate::error::{ProcessingError, RejectReason};
use crate::settings::ProcessingSettings;
use crate::tool::ToolKind;
use crate::upload::{MediaCategory, StagedFile, UploadRequest};
use tracing::debug;

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// Check the staged files against the tool's accepted media, file-count
/// range and size ceiling.
pub fn validate(
    request: &UploadRequest,
    tool: ToolKind,
    max_bytes: u64,
) -> Result<(), ProcessingError> {
    let files = request.files();
    if files.is_empty() {
        return reject(RejectReason::Empty);
    }

    let declared = request.category();
    if !tool.accepted_categories().contains(&declared) {
        return reject(RejectReason::UnsupportedType {
            mime: files[0].mime().to_string(),
            accepted: tool.accepted_summary(),
        });
    }

    let (min, max) = tool.file_count();
    if files.len() < min || files.len() > max {
        return reject(RejectReason::FileCount {
            min,
            max,
            got: files.len(),
        });
    }

    for file in files {
        check_file(file, tool, declared, max_bytes)?;
    }

    debug!(
        tool = %tool,
        files = files.len(),
        bytes = request.total_bytes(),
        "request passed validation"
    );
    Ok(())
}

fn check_file(
    file: &StagedFile,
    tool: ToolKind,
    declared: MediaCategory,
    max_bytes: u64,
) -> Result<(), ProcessingError> {
    if MediaCategory::from_mime(file.mime()) != Some(declared) {
        return reject(RejectReason::CategoryMismatch {
            name: file.name().to_string(),
            mime: file.mime().to_string(),
            declared: declared.to_string(),
        });
    }
    if !tool.accepts_mime(file.mime()) {
        return reject(RejectReason::UnsupportedType {
            mime: file.mime().to_string(),
            accepted: tool.accepted_summary(),
        });
    }
    if declared == MediaCategory::Markup {
        let blank = std::str::from_utf8(file.bytes())
            .map(|s| s.trim().is_empty())
            .unwrap_or(false);
        if blank {
            return reject(RejectReason::BlankMarkup);
        }
    }
    if file.size() == 0 {
        return reject(RejectReason::Empty);
    }
    if file.size() > max_bytes {
        return reject(RejectReason::TooLarge {
            name: file.name().to_string(),
            size: file.size(),
            limit: max_bytes,
        });
    }
    if file.mime() == "application/pdf" && !file.bytes().starts_with(PDF_MAGIC) {
        return reject(RejectReason::NotAPdf {
            name: file.name().to_string(),
            magic: file.bytes().iter().take(4).copied().collect(),
        });
    }
    Ok(())
}

/// Check that the settings make sense for this tool and this input.
pub fn validate_settings(
    settings: &ProcessingSettings,
    request: &UploadRequest,
    tool: ToolKind,
) -> Result<(), ProcessingError> {
    match settings {
        ProcessingSettings::Default => Ok(()),
        ProcessingSettings::Preset { .. } if tool != ToolKind::MediaCompress => {
            invalid(format!("'{tool}' has no compression presets"))
        }
        ProcessingSettings::Preset { .. } => Ok(()),
        ProcessingSettings::TargetSize { .. } if tool != ToolKind::MediaCompress => {
            invalid(format!("'{tool}' does not support a target size"))
        }
        ProcessingSettings::TargetSize {
            bytes,
            quality_hint,
        } => {
            if *bytes == 0 {
                return invalid("target size must be positive".to_string());
            }
            match quality_hint {
                Some(q) if *q > 100 => invalid(format!("quality must be 0–100, got {q}")),
                Some(_) if request.category() != MediaCategory::Image => invalid(format!(
                    "a quality hint only applies to images, not {}",
                    request.category()
                )),
                _ => Ok(()),
            }
        }
        ProcessingSettings::Edits { .. } if tool != ToolKind::PdfEdit => {
            invalid(format!("'{tool}' does not accept edit operations"))
        }
        ProcessingSettings::Edits { .. } => Ok(()),
    }
}

fn reject(reason: RejectReason) -> Result<(), ProcessingError> {
    Err(ProcessingError::rejected(reason))
}

fn invalid(message: String) -> Result<(), ProcessingError> {
    reject(RejectReason::InvalidSettings(message))
}
