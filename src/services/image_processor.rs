// src/services/image_processor.rs
use crate::errors::AtelierError;
use image::{GenericImageView, ImageFormat as ImgFormat};

const ACCEPTED_TYPES: &[(&str, &str)] = &[
    ("image/jpeg", ".jpg"),
    ("image/jpg", ".jpg"),
    ("image/png", ".png"),
    ("image/webp", ".webp"),
    ("image/heic", ".heic"),
    ("image/heif", ".heif"),
];

/// Largest edge sent to vision models.
const VISION_MAX_EDGE: u32 = 2048;

/// A validated upload ready to be stored.
#[derive(Debug, Clone)]
pub struct ValidatedUpload {
    pub content_type: String,
    pub extension: String,
    pub dimensions: Option<(u32, u32)>,
}

pub struct ImageProcessor {
    max_upload_bytes: usize,
}

impl ImageProcessor {
    pub fn new(max_upload_bytes: usize) -> Self {
        Self { max_upload_bytes }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    fn is_heic(content_type: &str) -> bool {
        matches!(content_type, "image/heic" | "image/heif")
    }

    /// Checks type, size and (where the decoder supports it) that the bytes
    /// really are an image. The original file extension is kept when it is
    /// one of the accepted ones.
    pub fn validate_upload(
        &self,
        filename: Option<&str>,
        content_type: &str,
        data: &[u8],
    ) -> Result<ValidatedUpload, AtelierError> {
        let content_type = content_type.trim().to_ascii_lowercase();
        let default_ext = ACCEPTED_TYPES
            .iter()
            .find(|(ct, _)| *ct == content_type)
            .map(|(_, ext)| *ext)
            .ok_or_else(|| {
                AtelierError::Validation(format!(
                    "Unsupported image type '{}'; expected jpeg, png, webp or heic",
                    content_type
                ))
            })?;

        if data.is_empty() {
            return Err(AtelierError::Validation("Uploaded file is empty".to_string()));
        }
        if data.len() > self.max_upload_bytes {
            return Err(AtelierError::Validation(format!(
                "Uploaded file is {} bytes; the limit is {} bytes",
                data.len(),
                self.max_upload_bytes
            )));
        }

        let dimensions = if Self::is_heic(&content_type) {
            None
        } else {
            Some(self.validate_image(data)?)
        };

        let extension = filename
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| format!(".{}", ext.to_ascii_lowercase()))
            .filter(|ext| {
                ACCEPTED_TYPES.iter().any(|(_, known)| *known == ext.as_str()) || ext == ".jpeg"
            })
            .unwrap_or_else(|| default_ext.to_string());

        Ok(ValidatedUpload {
            content_type,
            extension,
            dimensions,
        })
    }

    pub fn validate_image(&self, data: &[u8]) -> Result<(u32, u32), AtelierError> {
        let img = image::load_from_memory(data)
            .map_err(|e| AtelierError::Validation(format!("Invalid image format: {}", e)))?;

        let (width, height) = img.dimensions();

        // Check image size limits
        if width > 8192 || height > 8192 {
            return Err(AtelierError::Validation(
                "Image dimensions exceed 8192x8192".to_string(),
            ));
        }

        Ok((width, height))
    }

    pub fn resize_if_needed(&self, data: &[u8], max_size: u32) -> Result<Vec<u8>, AtelierError> {
        let img = image::load_from_memory(data)
            .map_err(|e| AtelierError::Validation(format!("Failed to load image: {}", e)))?;

        let (width, height) = img.dimensions();

        if width <= max_size && height <= max_size {
            return Ok(data.to_vec());
        }

        let ratio = (max_size as f32 / width.max(height) as f32).min(1.0);
        let new_width = (width as f32 * ratio) as u32;
        let new_height = (height as f32 * ratio) as u32;

        let resized = img.resize(new_width, new_height, image::imageops::FilterType::Lanczos3);

        let mut output = Vec::new();
        resized
            .write_to(&mut std::io::Cursor::new(&mut output), ImgFormat::Png)
            .map_err(|e| {
                AtelierError::Validation(format!("Failed to encode resized image: {}", e))
            })?;

        Ok(output)
    }

    /// Bytes and media type to send to a vision model. Large photos are
    /// downscaled to PNG; HEIC passes through untouched.
    pub fn prepare_for_vision(
        &self,
        data: &[u8],
        content_type: &str,
    ) -> Result<(Vec<u8>, String), AtelierError> {
        if Self::is_heic(content_type) {
            return Ok((data.to_vec(), content_type.to_string()));
        }

        let prepared = self.resize_if_needed(data, VISION_MAX_EDGE)?;
        if prepared.len() == data.len() && prepared == data {
            Ok((prepared, content_type.to_string()))
        } else {
            Ok((prepared, "image/png".to_string()))
        }
    }
}
