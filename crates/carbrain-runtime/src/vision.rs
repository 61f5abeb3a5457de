//! Image eligibility and data-URL encoding for vision-capable models.
//!
//! A frame is attached to a request only when all three hold:
//!
//! 1. the frame is flagged available and carries a non-empty payload,
//! 2. the configured model name matches one of [`VISION_MODEL_PATTERNS`],
//! 3. the payload can be encoded (`GRAY8` → PNG, `JPEG`/`PNG` as is).
//!
//! Otherwise the request goes out text-only; [`prepare`] reports why.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use carbrain_types::ImageRef;
use thiserror::Error;

/// Substrings (matched case-insensitively) identifying vision-capable models.
pub const VISION_MODEL_PATTERNS: [&str; 3] = ["gpt-4", "claude", "gemini"];

/// Errors raised while turning a frame into a data URL.
#[derive(Error, Debug)]
pub enum VisionError {
    #[error("image payload is empty")]
    EmptyPayload,
    #[error("GRAY8 frame is {width}x{height} but carries {actual} bytes")]
    SizeMismatch { width: u32, height: u32, actual: usize },
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("PNG encoding failed: {0}")]
    Png(#[from] png::EncodingError),
}

pub fn is_vision_model(model: &str) -> bool {
    let model = model.to_ascii_lowercase();
    VISION_MODEL_PATTERNS.iter().any(|p| model.contains(p))
}

/// Encode `image` as a `data:image/...;base64,...` URL.
pub fn to_data_url(image: &ImageRef) -> Result<String, VisionError> {
    let payload = image
        .payload
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or(VisionError::EmptyPayload)?;

    let (mime, bytes) = match image.format.to_ascii_uppercase().as_str() {
        "GRAY8" => ("png", encode_gray8(image.width, image.height, payload)?),
        "JPEG" | "JPG" => ("jpeg", payload.to_vec()),
        "PNG" => ("png", payload.to_vec()),
        other => return Err(VisionError::UnsupportedFormat(other.to_string())),
    };
    Ok(format!("data:image/{mime};base64,{}", STANDARD.encode(bytes)))
}

fn encode_gray8(width: u32, height: u32, pixels: &[u8]) -> Result<Vec<u8>, VisionError> {
    let expected = width as usize * height as usize;
    if pixels.len() != expected {
        return Err(VisionError::SizeMismatch {
            width,
            height,
            actual: pixels.len(),
        });
    }

    let mut out = Vec::new();
    let mut encoder = png::Encoder::new(&mut out, width, height);
    encoder.set_color(png::ColorType::Grayscale);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(pixels)?;
    writer.finish()?;
    Ok(out)
}

/// Outcome of the eligibility check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    /// No usable frame accompanied the snapshot.
    None,
    /// The frame goes out with the request.
    Attached(String),
    /// A frame was supplied but the request goes out text-only.
    Downgraded(String),
}

impl Attachment {
    pub fn data_url(&self) -> Option<&str> {
        match self {
            Attachment::Attached(url) => Some(url),
            _ => None,
        }
    }
}

/// Decide whether `image` accompanies a request to `model`.
pub fn prepare(image: Option<&ImageRef>, model: &str) -> Attachment {
    let Some(image) = image.filter(|img| img.available) else {
        return Attachment::None;
    };
    if !image.has_payload() {
        return Attachment::Downgraded("image has no payload".to_string());
    }
    if !is_vision_model(model) {
        return Attachment::Downgraded(format!("model {model} is not vision-capable"));
    }
    match to_data_url(image) {
        Ok(url) => Attachment::Attached(url),
        Err(e) => Attachment::Downgraded(e.to_string()),
    }
}
