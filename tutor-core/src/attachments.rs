//! Image attachments carried on chat turns as base64 data URLs

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Error, Result};

/// Largest decoded image accepted on a turn
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

const DATA_URL_PREFIX: &str = "data:";
const BASE64_MARKER: &str = ";base64,";

/// A validated image attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    /// e.g. `image/png`
    pub mime_type: String,
    pub size: usize,
}

/// Check that `data_url` is a base64 image no larger than `MAX_IMAGE_BYTES`
pub fn validate_image(data_url: &str) -> Result<ImageAttachment> {
    let (mime_type, payload) = data_url
        .strip_prefix(DATA_URL_PREFIX)
        .and_then(|rest| rest.split_once(BASE64_MARKER))
        .ok_or_else(|| Error::Validation("attachment is not a base64 data URL".to_string()))?;

    let is_image = mime_type
        .strip_prefix("image/")
        .is_some_and(|subtype| !subtype.is_empty());
    if !is_image {
        return Err(Error::Validation(format!(
            "attachment must be an image, got {mime_type:?}"
        )));
    }

    // 4 base64 characters encode 3 bytes; reject before decoding anything huge
    if payload.len() / 4 * 3 > MAX_IMAGE_BYTES + 3 {
        return Err(too_large(payload.len() / 4 * 3));
    }

    let decoded = STANDARD
        .decode(payload)
        .map_err(|e| Error::Validation(format!("attachment is not valid base64: {e}")))?;
    if decoded.len() > MAX_IMAGE_BYTES {
        return Err(too_large(decoded.len()));
    }

    Ok(ImageAttachment {
        mime_type: mime_type.to_string(),
        size: decoded.len(),
    })
}

fn too_large(size: usize) -> Error {
    Error::Validation(format!(
        "image is {size} bytes, the limit is {MAX_IMAGE_BYTES}"
    ))
}
