use std::io::Cursor;
use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tryon_contracts::models::{ModelSelector, ModelSpec};
use tryon_contracts::tryon::{Angle, ErrorKind, GenerationError, QualityTier, OUTPUT_ASPECT_RATIO};

use crate::config::ClientConfig;
use crate::encoder::{encode_asset, EncodedImage, ImageAsset};

/// One remote call: ordered subject images plus the instruction and tier.
///
/// Order matters for try-on: the instruction refers to the person as the first
/// image and the garment as the second.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub assets: Vec<ImageAsset>,
    pub instruction: String,
    pub tier: QualityTier,
    pub angle: Option<Angle>,
}

impl GenerationRequest {
    /// Same assets (by selection identity), instruction, tier and angle.
    pub fn same_as(&self, other: &GenerationRequest) -> bool {
        self.instruction == other.instruction
            && self.tier == other.tier
            && self.angle == other.angle
            && self.assets.len() == other.assets.len()
            && self
                .assets
                .iter()
                .zip(&other.assets)
                .all(|(left, right)| left.id() == right.id())
    }

    pub fn encode_images(&self) -> Result<Vec<EncodedImage>, GenerationError> {
        self.assets.iter().map(encode_asset).collect()
    }
}

pub trait GenerationClient: Send + Sync {
    fn name(&self) -> &str;
    /// Returns the generated image as a `data:<media>;base64,<payload>` URI.
    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

/// Maps an unstructured remote error signal onto the failure taxonomy.
///
/// Best effort only: the remote service's wording is not a stable contract.
pub fn classify_failure(status: Option<u16>, text: &str) -> ErrorKind {
    let lowered = text.to_ascii_lowercase();
    if text.contains("MISSING_API_KEY") {
        return ErrorKind::MissingCredential;
    }
    if text.contains("KEY_REQUIRED") || lowered.contains("requested entity was not found") {
        return ErrorKind::CredentialRejected;
    }
    if matches!(status, Some(401) | Some(403))
        || text.contains("PERMISSION_DENIED")
        || text.contains("API_KEY_INVALID")
        || lowered.contains("api key not valid")
        || (status.is_none() && text.contains("403"))
    {
        return ErrorKind::RemoteRejected;
    }
    ErrorKind::RemoteUnavailable
}

pub struct GeminiClient {
    config: ClientConfig,
    selector: ModelSelector,
    http: HttpClient,
}

impl GeminiClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            selector: ModelSelector::new(None),
            http: HttpClient::new(),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.config.api_base, model_path)
    }

    fn model_for(&self, tier: QualityTier) -> Result<ModelSpec, GenerationError> {
        let requested = match tier {
            QualityTier::Standard => self.config.standard_model.as_deref(),
            QualityTier::Enhanced => self.config.enhanced_model.as_deref(),
        };
        let selection = self
            .selector
            .select(requested, tier)
            .map_err(|err| GenerationError::new(ErrorKind::RemoteUnavailable, err))?;
        if let Some(reason) = selection.fallback_reason.as_deref() {
            tracing::warn!(tier = %tier, requested = ?selection.requested, "{reason}");
        }
        Ok(selection.model)
    }

    /// Content-safety filtering is switched off for every category. This is a
    /// product decision: fashion imagery (swimwear, underwear, bare shoulders)
    /// is rejected as false positives under the default thresholds.
    fn safety_settings() -> Vec<Value> {
        [
            "HARM_CATEGORY_HARASSMENT",
            "HARM_CATEGORY_HATE_SPEECH",
            "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            "HARM_CATEGORY_DANGEROUS_CONTENT",
        ]
        .into_iter()
        .map(|category| {
            json!({
                "category": category,
                "threshold": "BLOCK_NONE",
            })
        })
        .collect()
    }

    fn build_payload(instruction: &str, images: &[EncodedImage], model: &ModelSpec) -> Value {
        let mut parts = vec![json!({ "text": instruction })];
        for image in images {
            parts.push(json!({
                "inlineData": {
                    "mimeType": image.media_type,
                    "data": image.data,
                }
            }));
        }

        let mut image_config = Map::new();
        image_config.insert(
            "aspectRatio".to_string(),
            Value::String(OUTPUT_ASPECT_RATIO.to_string()),
        );
        if let Some(image_size) = model.image_size.as_deref() {
            image_config.insert("imageSize".to_string(), Value::String(image_size.to_string()));
        }

        json!({
            "contents": [{
                "role": "user",
                "parts": parts,
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
                "imageConfig": Value::Object(image_config),
            },
            "safetySettings": Self::safety_settings(),
        })
    }

    fn post_with_transport_retries(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
    ) -> Result<HttpResponse, GenerationError> {
        let max_retries = self.config.transport_retries;
        let mut attempt = 0;
        loop {
            let response = self
                .http
                .post(endpoint)
                .query(&[("key", api_key)])
                .timeout(Duration::from_secs_f64(self.config.request_timeout_s))
                .json(payload)
                .send();

            match response {
                Ok(ok) => return Ok(ok),
                Err(err) => {
                    // The URL carries the key as a query parameter.
                    let err = err.without_url();
                    let retryable = err.is_timeout() || err.is_connect();
                    if !retryable || attempt >= max_retries {
                        return Err(GenerationError::new(
                            ErrorKind::RemoteUnavailable,
                            format!("request to {endpoint} failed: {err}"),
                        ));
                    }
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        max_retries,
                        "transport retry after transient request failure: {err}"
                    );
                    let delay_s = self.config.retry_backoff_s * attempt as f64;
                    thread::sleep(Duration::from_secs_f64(delay_s));
                }
            }
        }
    }

    fn read_response(response: HttpResponse) -> Result<Value, GenerationError> {
        let status = response.status();
        let code = status.as_u16();
        let body = response.text().map_err(|err| {
            GenerationError::new(
                ErrorKind::RemoteUnavailable,
                format!("response body read failed: {}", err.without_url()),
            )
        })?;
        if !status.is_success() {
            let kind = classify_failure(Some(code), &body);
            return Err(GenerationError::new(
                kind,
                format!("request failed ({code}): {}", truncate_text(&body, 512)),
            ));
        }
        serde_json::from_str(&body).map_err(|err| {
            GenerationError::new(
                ErrorKind::RemoteUnavailable,
                format!("invalid JSON payload: {err}"),
            )
        })
    }

    /// First inline image of the first candidate, as a data URI.
    fn extract_image(response_payload: &Value) -> Result<String, GenerationError> {
        if let Some(error) = response_payload.get("error") {
            let code = error
                .get("code")
                .and_then(Value::as_u64)
                .and_then(|code| u16::try_from(code).ok());
            let text = error.to_string();
            return Err(GenerationError::new(
                classify_failure(code, &text),
                truncate_text(&text, 512),
            ));
        }
        if let Some(reason) = response_payload
            .get("promptFeedback")
            .and_then(|feedback| feedback.get("blockReason"))
            .and_then(Value::as_str)
        {
            return Err(GenerationError::new(
                ErrorKind::NoImageInResponse,
                format!("prompt blocked: {reason}"),
            ));
        }

        let Some(candidate) = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
        else {
            return Err(GenerationError::new(
                ErrorKind::NoImageInResponse,
                "response has no candidates",
            ));
        };
        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for part in parts {
            let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            else {
                continue;
            };
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .unwrap_or("image/png");
            return Ok(format!("data:{mime_type};base64,{data}"));
        }

        let finish_reason = candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        Err(GenerationError::new(
            ErrorKind::NoImageInResponse,
            format!("no inline image part in response (finishReason {finish_reason})"),
        ))
    }
}

impl GenerationClient for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let Some(api_key) = self.config.credential.get() else {
            return Err(GenerationError::new(
                ErrorKind::MissingCredential,
                "MISSING_API_KEY: API_KEY, GEMINI_API_KEY or GOOGLE_API_KEY not set",
            ));
        };
        let images = request.encode_images()?;
        let model = self.model_for(request.tier)?;
        let endpoint = self.endpoint_for_model(&model.name);
        let payload = Self::build_payload(&request.instruction, &images, &model);

        tracing::debug!(
            model = %model.name,
            tier = %request.tier,
            images = images.len(),
            "sending generation request"
        );
        let response = self.post_with_transport_retries(&endpoint, &api_key, &payload)?;
        let response_payload = Self::read_response(response)?;
        Self::extract_image(&response_payload)
    }
}

/// Offline client: renders a solid-colour portrait PNG whose colour is derived
/// from the request, so every pipeline stage runs without a credential.
#[derive(Debug, Clone, Default)]
pub struct DryrunClient;

impl DryrunClient {
    fn dims(tier: QualityTier) -> (u32, u32) {
        match tier {
            QualityTier::Standard => (96, 128),
            QualityTier::Enhanced => (192, 256),
        }
    }
}

impl GenerationClient for DryrunClient {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let images = request.encode_images()?;
        let (r, g, b) = color_from_request(&request.instruction, &images);
        let (width, height) = Self::dims(request.tier);
        let mut canvas = RgbImage::new(width, height);
        for pixel in canvas.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }

        let mut buffer = Vec::new();
        DynamicImage::ImageRgb8(canvas)
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .map_err(|err| {
                GenerationError::new(
                    ErrorKind::NoImageInResponse,
                    format!("dry-run render failed: {err}"),
                )
            })?;
        Ok(EncodedImage {
            media_type: "image/png".to_string(),
            data: BASE64.encode(&buffer),
        }
        .data_uri())
    }
}

fn color_from_request(instruction: &str, images: &[EncodedImage]) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(instruction.as_bytes());
    for image in images {
        hasher.update(image.data.as_bytes());
    }
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
