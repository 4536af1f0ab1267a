use image::DynamicImage;
use std::path::Path;

use crate::error::DecodeError;

/// Turns a photo uri into decoded pixels.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, uri: &str) -> Result<DynamicImage, DecodeError>;
}

/// Decodes local files. Accepts plain paths and `file://` uris.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsImageDecoder;

impl ImageDecoder for FsImageDecoder {
    fn decode(&self, uri: &str) -> Result<DynamicImage, DecodeError> {
        let path = Path::new(uri.strip_prefix("file://").unwrap_or(uri));
        if !path.is_file() {
            return Err(DecodeError::Unreadable {
                uri: uri.to_string(),
                reason: "not a readable file".to_string(),
            });
        }
        image::open(path).map_err(|source| DecodeError::Image {
            uri: uri.to_string(),
            source,
        })
    }
}
