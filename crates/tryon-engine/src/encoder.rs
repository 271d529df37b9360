use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use tryon_contracts::tryon::{ErrorKind, GenerationError};
use uuid::Uuid;

/// Identity of one user selection. Re-selecting the same file yields a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssetId(Uuid);

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A user-supplied image held for the `person` or `garment` slot.
#[derive(Clone)]
pub struct ImageAsset {
    id: AssetId,
    bytes: Arc<[u8]>,
    media_type: String,
    preview_handle: String,
}

impl fmt::Debug for ImageAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageAsset")
            .field("id", &self.id)
            .field("len", &self.bytes.len())
            .field("media_type", &self.media_type)
            .field("preview_handle", &self.preview_handle)
            .finish()
    }
}

impl ImageAsset {
    /// Wraps raw bytes. The media type is the declared one when present, otherwise
    /// sniffed from the content.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>, declared_media_type: Option<&str>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        let media_type = declared_media_type
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_ascii_lowercase)
            .or_else(|| sniff_media_type(&bytes).map(str::to_string))
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let preview_handle = preview_handle_for(&bytes);
        Self {
            id: AssetId(Uuid::new_v4()),
            bytes: Arc::from(bytes),
            media_type,
            preview_handle,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        Ok(Self::from_bytes(bytes, mime_for_path(path)))
    }

    pub fn id(&self) -> AssetId {
        self.id
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn preview_handle(&self) -> &str {
        &self.preview_handle
    }
}

/// Transport-safe form of an image: base64 payload plus media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub media_type: String,
    pub data: String,
}

impl EncodedImage {
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }
}

pub fn encode_asset(asset: &ImageAsset) -> Result<EncodedImage, GenerationError> {
    if asset.bytes.is_empty() {
        return Err(GenerationError::new(
            ErrorKind::EncodingError,
            "image is empty",
        ));
    }
    if !asset.media_type.starts_with("image/") {
        return Err(GenerationError::new(
            ErrorKind::EncodingError,
            format!("unsupported media type {}", asset.media_type),
        ));
    }
    Ok(EncodedImage {
        media_type: asset.media_type.clone(),
        data: BASE64.encode(&asset.bytes),
    })
}

/// Splits a `data:<media>;base64,<payload>` URI into media type and bytes.
pub fn decode_data_uri(uri: &str) -> Result<(String, Vec<u8>)> {
    let Some(rest) = uri.strip_prefix("data:") else {
        bail!("not a data URI");
    };
    let Some((header, payload)) = rest.split_once(',') else {
        bail!("data URI has no payload");
    };
    let Some(media_type) = header.strip_suffix(";base64") else {
        bail!("data URI is not base64 encoded");
    };
    let bytes = BASE64
        .decode(payload.trim().as_bytes())
        .context("data URI base64 decode failed")?;
    Ok((media_type.to_string(), bytes))
}

pub fn extension_for_media_type(media_type: &str) -> &'static str {
    let lowered = media_type.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    "png"
}

fn preview_handle_for(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("preview:{}", hex::encode(&digest[..8]))
}

fn sniff_media_type(bytes: &[u8]) -> Option<&'static str> {
    let format = image::guess_format(bytes).ok()?;
    match format {
        image::ImageFormat::Png => Some("image/png"),
        image::ImageFormat::Jpeg => Some("image/jpeg"),
        image::ImageFormat::WebP => Some("image/webp"),
        image::ImageFormat::Gif => Some("image/gif"),
        image::ImageFormat::Bmp => Some("image/bmp"),
        _ => None,
    }
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())?;
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}
