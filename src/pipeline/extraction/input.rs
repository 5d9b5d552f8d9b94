use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::ImageFormat;

use super::preprocess::validate_image_bytes;
use super::ExtractionError;

/// Image bytes plus MIME type, as handed to every strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInput {
    bytes: Vec<u8>,
    mime_type: String,
}

impl ImageInput {
    /// Wrap raw bytes, sniffing the MIME type from the magic number.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ExtractionError> {
        validate_image_bytes(&bytes)?;
        let mime_type = sniff_mime(&bytes).to_string();
        Ok(Self { bytes, mime_type })
    }

    /// Accept plain base64 or a `data:<mime>;base64,<payload>` URI.
    pub fn from_base64(encoded: &str) -> Result<Self, ExtractionError> {
        let encoded = encoded.trim();
        let (declared_mime, payload) = match encoded.strip_prefix("data:") {
            Some(rest) => {
                let (header, payload) = rest.split_once(',').ok_or_else(|| {
                    ExtractionError::InvalidInput("Data URI has no payload".into())
                })?;
                let mut parts = header.split(';');
                let mime = parts.next().unwrap_or_default().trim();
                if !parts.any(|p| p.trim().eq_ignore_ascii_case("base64")) {
                    return Err(ExtractionError::InvalidInput(
                        "Data URI is not base64-encoded".into(),
                    ));
                }
                (Some(mime).filter(|m| !m.is_empty()), payload)
            }
            None => (None, encoded),
        };

        let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.is_empty() {
            return Err(ExtractionError::InvalidInput("Empty image payload".into()));
        }

        let bytes = STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| ExtractionError::InvalidInput(format!("Invalid base64: {e}")))?;
        validate_image_bytes(&bytes)?;

        let mime_type = match declared_mime {
            Some(m) => m.to_string(),
            None => sniff_mime(&bytes).to_string(),
        };

        Ok(Self { bytes, mime_type })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// Upload file name with an extension matching the MIME type.
    pub fn file_name(&self) -> String {
        let ext = match self.mime_type.as_str() {
            "image/png" => "png",
            "image/tiff" => "tiff",
            "image/webp" => "webp",
            "image/gif" => "gif",
            "image/bmp" => "bmp",
            _ => "jpg",
        };
        format!("roster.{ext}")
    }
}

fn sniff_mime(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => "image/png",
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(ImageFormat::Tiff) => "image/tiff",
        Ok(ImageFormat::WebP) => "image/webp",
        Ok(ImageFormat::Gif) => "image/gif",
        Ok(ImageFormat::Bmp) => "image/bmp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::preprocess::sample_png;

    #[test]
    fn raw_base64_is_sniffed() {
        let png = sample_png(32, 32);
        let input = ImageInput::from_base64(&STANDARD.encode(&png)).unwrap();
        assert_eq!(input.mime_type(), "image/png");
        assert_eq!(input.bytes(), png.as_slice());
        assert_eq!(input.file_name(), "roster.png");
    }

    #[test]
    fn data_uri_mime_is_kept() {
        let png = sample_png(32, 32);
        let uri = format!("data:image/jpeg;base64,{}", STANDARD.encode(&png));
        let input = ImageInput::from_base64(&uri).unwrap();
        assert_eq!(input.mime_type(), "image/jpeg");
        assert_eq!(input.file_name(), "roster.jpg");
    }

    #[test]
    fn data_uri_without_mime_falls_back_to_sniffing() {
        let png = sample_png(32, 32);
        let uri = format!("data:;base64,{}", STANDARD.encode(&png));
        assert_eq!(ImageInput::from_base64(&uri).unwrap().mime_type(), "image/png");
    }

    #[test]
    fn whitespace_in_payload_is_ignored() {
        let encoded = STANDARD.encode(sample_png(32, 32));
        let (a, b) = encoded.split_at(encoded.len() / 2);
        assert!(ImageInput::from_base64(&format!("{a}\n  {b}\n")).is_ok());
    }

    #[test]
    fn non_base64_data_uri_rejected() {
        let err = ImageInput::from_base64("data:image/png,rawbytes").unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidInput(_)));
    }

    #[test]
    fn empty_and_garbage_rejected() {
        assert!(ImageInput::from_base64("").is_err());
        assert!(ImageInput::from_base64("data:image/png;base64,").is_err());
        assert!(ImageInput::from_base64("@@not-base64@@").is_err());
    }

    #[test]
    fn round_trips_through_base64() {
        let input = ImageInput::from_bytes(sample_png(32, 32)).unwrap();
        let again = ImageInput::from_base64(&input.to_base64()).unwrap();
        assert_eq!(input, again);
    }
}
