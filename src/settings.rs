//! Per-request processing settings and execution venues.

use serde::{Deserialize, Serialize};
use serde_json::json;

/// Where a request is processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    /// In-process inference on this machine.
    Local,
    /// The remote processing service.
    Remote,
}

impl std::fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStrategy::Local => f.write_str("local"),
            ExecutionStrategy::Remote => f.write_str("remote"),
        }
    }
}

/// Preset compression strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    /// Light compression, best quality.
    Low,
    #[default]
    Medium,
    /// Strong compression, smallest output.
    High,
}

impl CompressionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionLevel::Low => "low",
            CompressionLevel::Medium => "medium",
            CompressionLevel::High => "high",
        }
    }

    /// Encoder quality (0–100) sent for images.
    pub fn image_quality(&self) -> u8 {
        match self {
            CompressionLevel::Low => 90,
            CompressionLevel::Medium => 70,
            CompressionLevel::High => 40,
        }
    }

    /// Target bitrate in kbps sent for audio.
    pub fn audio_bitrate_kbps(&self) -> u32 {
        match self {
            CompressionLevel::Low => 192,
            CompressionLevel::Medium => 128,
            CompressionLevel::High => 64,
        }
    }
}

/// How a tool should process the staged input.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum ProcessingSettings {
    /// The tool has no knobs (or the caller keeps the service defaults).
    #[default]
    Default,
    /// A named compression level.
    Preset { level: CompressionLevel },
    /// Aim for an output size; `quality_hint` (0–100) only applies to images.
    #[serde(rename_all = "camelCase")]
    TargetSize {
        bytes: u64,
        quality_hint: Option<u8>,
    },
    /// Annotations for the PDF editor.
    Edits { operations: Vec<EditOperation> },
}

impl ProcessingSettings {
    pub fn preset(level: CompressionLevel) -> Self {
        ProcessingSettings::Preset { level }
    }

    pub fn target_size(bytes: u64, quality_hint: Option<u8>) -> Self {
        ProcessingSettings::TargetSize {
            bytes,
            quality_hint,
        }
    }

    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            ProcessingSettings::Default => "default",
            ProcessingSettings::Preset { .. } => "preset",
            ProcessingSettings::TargetSize { .. } => "targetSize",
            ProcessingSettings::Edits { .. } => "edits",
        }
    }
}

/// One annotation placed on a PDF page (0-indexed `page`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EditOperation {
    #[serde(rename_all = "camelCase")]
    Text {
        page: u32,
        text: String,
        x: f64,
        y: f64,
        font_family: String,
        font_size: u32,
        color: String,
    },
    #[serde(rename_all = "camelCase")]
    Line {
        page: u32,
        points: [f64; 4],
        color: String,
        stroke_width: u32,
    },
    #[serde(rename_all = "camelCase")]
    Rectangle {
        page: u32,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        color: String,
        stroke_width: u32,
    },
    #[serde(rename_all = "camelCase")]
    Circle {
        page: u32,
        x: f64,
        y: f64,
        radius: f64,
        color: String,
        stroke_width: u32,
    },
    /// `src` is a data URL or a URL the service can fetch.
    Image {
        page: u32,
        src: String,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
}

impl EditOperation {
    fn is_shape(&self) -> bool {
        matches!(
            self,
            EditOperation::Line { .. } | EditOperation::Rectangle { .. } | EditOperation::Circle { .. }
        )
    }
}

/// Group edit operations into the `{addText, addShapes, addImages}` document
/// the editor endpoint expects. Text entries drop their `type` tag.
pub fn edit_payload(operations: &[EditOperation]) -> serde_json::Value {
    let add_text: Vec<_> = operations
        .iter()
        .filter_map(|op| match op {
            EditOperation::Text {
                page,
                text,
                x,
                y,
                font_family,
                font_size,
                color,
            } => Some(json!({
                "page": page,
                "text": text,
                "x": x,
                "y": y,
                "fontFamily": font_family,
                "fontSize": font_size,
                "color": color,
            })),
            _ => None,
        })
        .collect();
    let add_shapes: Vec<_> = operations.iter().filter(|op| op.is_shape()).collect();
    let add_images: Vec<_> = operations
        .iter()
        .filter(|op| matches!(op, EditOperation::Image { .. }))
        .collect();

    json!({
        "addText": add_text,
        "addShapes": add_shapes,
        "addImages": add_images,
    })
}

/// Parse a human size such as `50KB`, `1.5 MB` or `2048` into bytes.
///
/// `KB` and `MB` are binary multiples (1024, 1 048 576).
pub fn parse_byte_size(input: &str) -> Result<u64, String> {
    let s = input.trim().to_ascii_uppercase();
    let (number, multiplier) = if let Some(n) = s.strip_suffix("MB") {
        (n, 1024.0 * 1024.0)
    } else if let Some(n) = s.strip_suffix("KB") {
        (n, 1024.0)
    } else if let Some(n) = s.strip_suffix('B') {
        (n, 1.0)
    } else {
        (s.as_str(), 1.0)
    };
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid size '{input}'"))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(format!("size must be positive, got '{input}'"));
    }
    Ok((value * multiplier).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_mappings() {
        assert_eq!(CompressionLevel::Low.image_quality(), 90);
        assert_eq!(CompressionLevel::Medium.image_quality(), 70);
        assert_eq!(CompressionLevel::High.image_quality(), 40);
        assert_eq!(CompressionLevel::Low.audio_bitrate_kbps(), 192);
        assert_eq!(CompressionLevel::High.audio_bitrate_kbps(), 64);
        assert_eq!(CompressionLevel::default(), CompressionLevel::Medium);
    }

    #[test]
    fn byte_sizes() {
        assert_eq!(parse_byte_size("50KB"), Ok(51_200));
        assert_eq!(parse_byte_size("1mb"), Ok(1_048_576));
        assert_eq!(parse_byte_size("1.5 MB"), Ok(1_572_864));
        assert_eq!(parse_byte_size("2048"), Ok(2048));
        assert_eq!(parse_byte_size("10B"), Ok(10));
        assert!(parse_byte_size("0KB").is_err());
        assert!(parse_byte_size("lots").is_err());
    }

    #[test]
    fn settings_serialise_with_mode_tag() {
        let v = serde_json::to_value(ProcessingSettings::target_size(51_200, Some(70)))
            .expect("serialise");
        assert_eq!(v["mode"], "targetSize");
        assert_eq!(v["bytes"], 51_200);
        assert_eq!(v["qualityHint"], 70);
    }

    #[test]
    fn edit_payload_groups_operations() {
        let ops = vec![
            EditOperation::Text {
                page: 0,
                text: "Approved".into(),
                x: 10.0,
                y: 20.0,
                font_family: "Helvetica".into(),
                font_size: 14,
                color: "#ff0000".into(),
            },
            EditOperation::Circle {
                page: 1,
                x: 5.0,
                y: 5.0,
                radius: 25.0,
                color: "#000000".into(),
                stroke_width: 2,
            },
            EditOperation::Image {
                page: 0,
                src: "data:image/png;base64,AAAA".into(),
                x: 0.0,
                y: 0.0,
                width: 100.0,
                height: 50.0,
            },
        ];
        let payload = edit_payload(&ops);
        assert_eq!(payload["addText"][0]["fontFamily"], "Helvetica");
        assert!(payload["addText"][0].get("type").is_none());
        assert_eq!(payload["addShapes"][0]["type"], "circle");
        assert_eq!(payload["addShapes"][0]["strokeWidth"], 2);
        assert_eq!(payload["addImages"][0]["width"], 100.0);
    }
}
