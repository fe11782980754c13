// src/services/image_provider.rs
use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use image::{ImageFormat as ImgFormat, Rgb, RgbImage};
use log::{debug, info, warn};
use reqwest::Client;
use serde_json::{Value, json};
use uuid::Uuid;

use super::prompt::PromptBuilder;
use super::storage::{
    ObjectStorage, preview_frame_key, preview_image_key, upgrade_preview_key,
};
use crate::errors::AtelierError;

const OPENAI_IMAGES_URL: &str = "https://api.openai.com/v1/images/generations";
const DEFAULT_STABILITY_BASE: &str = "https://api.stability.ai";

/// Raw image returned by a provider, before it is stored.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Bytes,
    pub content_type: String,
}

#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Renders one image for `prompt`. Any non-success status, empty body or
    /// undecodable payload is an `Upstream` error.
    async fn render(&self, prompt: &str) -> Result<GeneratedImage, AtelierError>;
}

/// Shared HTTP client with a bounded request timeout.
pub fn http_client(timeout: Duration) -> Result<Client, AtelierError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AtelierError::Config(format!("Failed to build HTTP client: {}", e)))
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

async fn download_image(client: &Client, url: &str) -> Result<GeneratedImage, AtelierError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| AtelierError::Upstream(format!("Image download failed: {}", e)))?;

    if !response.status().is_success() {
        let code = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(AtelierError::Upstream(format!(
            "Image download failed ({}): {}",
            code,
            truncate(&body, 512)
        )));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("image/png")
        .to_string();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| AtelierError::Upstream(format!("Failed reading image bytes: {}", e)))?;

    Ok(GeneratedImage {
        bytes,
        content_type,
    })
}

fn decode_base64_png(data: &str, provider: &str) -> Result<GeneratedImage, AtelierError> {
    let bytes = general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| {
            AtelierError::Upstream(format!("{} image base64 decode failed: {}", provider, e))
        })?;
    Ok(GeneratedImage {
        bytes: Bytes::from(bytes),
        content_type: "image/png".to_string(),
    })
}

pub struct OpenAiImageProvider {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenAiImageProvider {
    pub fn new(client: Client, api_key: String, model: String) -> Self {
        Self {
            client,
            api_key,
            model,
        }
    }

    fn request_body(&self, prompt: &str) -> Value {
        let mut body = json!({
            "model": self.model,
            "prompt": prompt,
            "n": 1,
            "size": "1024x1024",
        });
        // gpt-image models always answer with b64_json and reject the field.
        if self.model.starts_with("dall-e") {
            body["response_format"] = json!("b64_json");
        }
        body
    }

    async fn extract_image(&self, payload: &Value) -> Result<GeneratedImage, AtelierError> {
        let row = payload
            .get("data")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .ok_or_else(|| {
                AtelierError::Upstream("OpenAI response has no image data".to_string())
            })?;

        if let Some(b64) = row.get("b64_json").and_then(Value::as_str) {
            return decode_base64_png(b64, "OpenAI");
        }
        if let Some(url) = row.get("url").and_then(Value::as_str) {
            return download_image(&self.client, url).await;
        }
        Err(AtelierError::Upstream(
            "OpenAI response has neither b64_json nor url".to_string(),
        ))
    }
}

#[async_trait]
impl ImageProvider for OpenAiImageProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn render(&self, prompt: &str) -> Result<GeneratedImage, AtelierError> {
        let response = self
            .client
            .post(OPENAI_IMAGES_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| {
                AtelierError::Upstream(format!("Image generation request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let code = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AtelierError::Upstream(format!(
                "Image generation error ({}): {}",
                code,
                truncate(&error_text, 512)
            )));
        }

        let payload: Value = response.json().await.map_err(|e| {
            AtelierError::Upstream(format!("Failed to parse generation response: {}", e))
        })?;
        self.extract_image(&payload).await
    }
}

pub struct StabilityImageProvider {
    client: Client,
    api_key: String,
    api_base: String,
}

impl StabilityImageProvider {
    pub fn new(client: Client, api_key: String, api_base: Option<String>) -> Self {
        Self {
            client,
            api_key,
            api_base: api_base
                .filter(|base| !base.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_STABILITY_BASE.to_string()),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v2beta/stable-image/generate/core",
            self.api_base.trim_end_matches('/')
        )
    }

    /// Stability answers with `image`, `base64` or an `artifacts` list
    /// depending on API generation.
    fn decode_json_image(payload: &Value) -> Result<GeneratedImage, AtelierError> {
        let image_b64 = payload
            .get("image")
            .or_else(|| payload.get("base64"))
            .or_else(|| {
                payload
                    .get("artifacts")
                    .and_then(Value::as_array)
                    .and_then(|rows| rows.first())
                    .and_then(|row| row.get("base64"))
            })
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                AtelierError::Upstream("Stability JSON response missing image bytes".to_string())
            })?;
        decode_base64_png(image_b64, "Stability")
    }
}

#[async_trait]
impl ImageProvider for StabilityImageProvider {
    fn name(&self) -> &str {
        "stability"
    }

    async fn render(&self, prompt: &str) -> Result<GeneratedImage, AtelierError> {
        let form = reqwest::multipart::Form::new()
            .text("prompt", prompt.to_string())
            .text("output_format", "png")
            .text("aspect_ratio", "1:1");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .multipart(form)
            .send()
            .await
            .map_err(|e| AtelierError::Upstream(format!("Stability request failed: {}", e)))?;

        if !response.status().is_success() {
            let code = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AtelierError::Upstream(format!(
                "Stability error ({}): {}",
                code,
                truncate(&error_text, 512)
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if content_type.starts_with("image/") {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| AtelierError::Upstream(format!("Failed reading image bytes: {}", e)))?;
            return Ok(GeneratedImage {
                bytes,
                content_type,
            });
        }

        let payload: Value = response.json().await.map_err(|e| {
            AtelierError::Upstream(format!("Failed to parse Stability response: {}", e))
        })?;
        Self::decode_json_image(&payload)
    }
}

/// Offline provider: a flat PNG whose colour is derived from the prompt.
pub struct DryrunImageProvider {
    size: u32,
}

impl DryrunImageProvider {
    pub fn new() -> Self {
        Self { size: 64 }
    }
}

impl Default for DryrunImageProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageProvider for DryrunImageProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    async fn render(&self, prompt: &str) -> Result<GeneratedImage, AtelierError> {
        let mut hasher = DefaultHasher::new();
        prompt.hash(&mut hasher);
        let seed = hasher.finish().to_le_bytes();

        let img = RgbImage::from_pixel(self.size, self.size, Rgb([seed[0], seed[1], seed[2]]));
        let mut output = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut output), ImgFormat::Png)
            .map_err(|e| AtelierError::Upstream(format!("Dryrun encode failed: {}", e)))?;

        Ok(GeneratedImage {
            bytes: Bytes::from(output),
            content_type: "image/png".to_string(),
        })
    }
}

/// Providers keyed by name; the active one is picked from configuration.
#[derive(Default)]
pub struct ImageProviderRegistry {
    providers: BTreeMap<String, Arc<dyn ImageProvider>>,
}

impl ImageProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: ImageProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Arc::new(provider));
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ImageProvider>, AtelierError> {
        self.providers.get(name).cloned().ok_or_else(|| {
            AtelierError::InvalidProvider(format!(
                "'{}' (registered: {})",
                name,
                self.names().join(", ")
            ))
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

/// Renders through a provider and persists the result under the preview key
/// layout, returning public URLs.
pub struct ImageGenerator {
    provider: Arc<dyn ImageProvider>,
    storage: Arc<dyn ObjectStorage>,
    prompts: PromptBuilder,
}

impl ImageGenerator {
    pub fn new(
        provider: Arc<dyn ImageProvider>,
        storage: Arc<dyn ObjectStorage>,
        prompts: PromptBuilder,
    ) -> Self {
        Self {
            provider,
            storage,
            prompts,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    async fn render_checked(&self, prompt: &str) -> Result<GeneratedImage, AtelierError> {
        let image = self.provider.render(prompt).await?;
        if image.bytes.is_empty() {
            return Err(AtelierError::Upstream(format!(
                "{} returned an empty image",
                self.provider.name()
            )));
        }
        Ok(image)
    }

    pub async fn generate_single(
        &self,
        prompt: &str,
        configuration_id: Uuid,
        job_id: Uuid,
    ) -> Result<String, AtelierError> {
        let image = self.render_checked(prompt).await?;
        let key = preview_image_key(configuration_id, job_id);
        let url = self
            .storage
            .upload(image.bytes, &key, &image.content_type)
            .await?;
        info!("Stored preview for job {} at {}", job_id, key);
        Ok(url)
    }

    /// Either every frame is rendered and stored, or none is kept.
    pub async fn generate_frame_set(
        &self,
        prompt: &str,
        configuration_id: Uuid,
        job_id: Uuid,
        frame_count: u32,
    ) -> Result<Vec<String>, AtelierError> {
        if frame_count == 0 {
            return Err(AtelierError::Validation(
                "frame count must be at least 1".to_string(),
            ));
        }

        let mut frames = Vec::with_capacity(frame_count as usize);
        for index in 0..frame_count {
            let frame_prompt = self.prompts.frame_prompt(prompt, index, frame_count);
            frames.push(self.render_checked(&frame_prompt).await?);
            debug!("Rendered frame {}/{} for job {}", index + 1, frame_count, job_id);
        }

        let mut urls = Vec::with_capacity(frames.len());
        let mut stored = Vec::with_capacity(frames.len());
        for (index, frame) in frames.into_iter().enumerate() {
            let key = preview_frame_key(configuration_id, job_id, index as u32);
            match self
                .storage
                .upload(frame.bytes, &key, &frame.content_type)
                .await
            {
                Ok(url) => {
                    urls.push(url);
                    stored.push(key);
                }
                Err(e) => {
                    self.discard(&stored).await;
                    return Err(e);
                }
            }
        }

        info!("Stored {} frames for job {}", urls.len(), job_id);
        Ok(urls)
    }

    pub async fn generate_upgrade(
        &self,
        prompt: &str,
        analysis_id: Uuid,
        job_id: Uuid,
    ) -> Result<String, AtelierError> {
        let image = self.render_checked(prompt).await?;
        let key = upgrade_preview_key(analysis_id, job_id);
        self.storage
            .upload(image.bytes, &key, &image.content_type)
            .await
    }

    async fn discard(&self, keys: &[String]) {
        for key in keys {
            if let Err(e) = self.storage.delete(key).await {
                warn!("Failed to remove partial frame {}: {}", key, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage::MemoryObjectStorage;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Succeeds `ok_calls` times, then fails.
    struct FlakyProvider {
        ok_calls: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ImageProvider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn render(&self, _prompt: &str) -> Result<GeneratedImage, AtelierError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call >= self.ok_calls {
                return Err(AtelierError::Upstream("HTTP 500".to_string()));
            }
            Ok(GeneratedImage {
                bytes: Bytes::from_static(b"png"),
                content_type: "image/png".to_string(),
            })
        }
    }

    struct EmptyProvider;

    #[async_trait]
    impl ImageProvider for EmptyProvider {
        fn name(&self) -> &str {
            "empty"
        }

        async fn render(&self, _prompt: &str) -> Result<GeneratedImage, AtelierError> {
            Ok(GeneratedImage {
                bytes: Bytes::new(),
                content_type: "image/png".to_string(),
            })
        }
    }

    fn generator(provider: Arc<dyn ImageProvider>) -> (ImageGenerator, Arc<MemoryObjectStorage>) {
        let storage = Arc::new(MemoryObjectStorage::new("http://cdn"));
        (
            ImageGenerator::new(provider, storage.clone(), PromptBuilder::default()),
            storage,
        )
    }

    #[tokio::test]
    async fn single_preview_lands_under_deterministic_key() {
        let (generator, storage) = generator(Arc::new(DryrunImageProvider::new()));
        let (config, job) = (Uuid::new_v4(), Uuid::new_v4());

        let url = generator.generate_single("a ring", config, job).await.unwrap();
        assert_eq!(
            url,
            format!("http://cdn/ai-previews/{}/{}/preview.png", config, job)
        );
        let (bytes, content_type) = storage.get(&preview_image_key(config, job)).await.unwrap();
        assert_eq!(content_type, "image/png");
        assert!(image::load_from_memory(&bytes).is_ok());
    }

    #[tokio::test]
    async fn frame_set_is_ordered_and_complete() {
        let (generator, storage) = generator(Arc::new(DryrunImageProvider::new()));
        let (config, job) = (Uuid::new_v4(), Uuid::new_v4());

        let urls = generator
            .generate_frame_set("a ring", config, job, 12)
            .await
            .unwrap();
        assert_eq!(urls.len(), 12);
        assert!(urls[0].ends_with("/frames/frame_00.png"));
        assert!(urls[11].ends_with("/frames/frame_11.png"));
        assert_eq!(storage.keys().await.len(), 12);
    }

    #[tokio::test]
    async fn failing_frame_leaves_nothing_behind() {
        let provider = Arc::new(FlakyProvider {
            ok_calls: 3,
            calls: AtomicU32::new(0),
        });
        let (generator, storage) = generator(provider);

        let result = generator
            .generate_frame_set("a ring", Uuid::new_v4(), Uuid::new_v4(), 6)
            .await;
        assert!(matches!(result, Err(AtelierError::Upstream(_))));
        assert!(storage.keys().await.is_empty());
    }

    #[tokio::test]
    async fn empty_provider_output_is_an_upstream_failure() {
        let (generator, storage) = generator(Arc::new(EmptyProvider));
        let result = generator
            .generate_single("a ring", Uuid::new_v4(), Uuid::new_v4())
            .await;
        assert!(matches!(result, Err(AtelierError::Upstream(_))));
        assert!(storage.keys().await.is_empty());
    }

    #[tokio::test]
    async fn upgrade_render_uses_upgrade_key() {
        let (generator, _) = generator(Arc::new(DryrunImageProvider::new()));
        let (analysis, job) = (Uuid::new_v4(), Uuid::new_v4());
        let url = generator.generate_upgrade("p", analysis, job).await.unwrap();
        assert!(url.ends_with(&format!("upgrade-previews/{}/{}/enhanced.png", analysis, job)));
    }

    #[test]
    fn registry_lookup_by_name() {
        let mut registry = ImageProviderRegistry::new();
        registry.register(DryrunImageProvider::new());
        assert_eq!(registry.names(), vec!["dryrun".to_string()]);
        assert!(registry.get("dryrun").is_ok());
        assert!(matches!(
            registry.get("midjourney"),
            Err(AtelierError::InvalidProvider(_))
        ));
    }

    #[test]
    fn stability_json_variants_decode() {
        let b64 = general_purpose::STANDARD.encode(b"img");
        for payload in [
            json!({ "image": b64.as_str() }),
            json!({ "artifacts": [{ "base64": b64.as_str() }] }),
        ] {
            let image = StabilityImageProvider::decode_json_image(&payload).unwrap();
            assert_eq!(&image.bytes[..], b"img");
        }
        assert!(StabilityImageProvider::decode_json_image(&json!({ "image": "" })).is_err());
        assert!(StabilityImageProvider::decode_json_image(&json!({})).is_err());
    }

    #[test]
    fn openai_body_adds_response_format_for_dalle_only() {
        let client = Client::new();
        let dalle = OpenAiImageProvider::new(client.clone(), "k".into(), "dall-e-3".into());
        assert_eq!(dalle.request_body("p")["response_format"], "b64_json");

        let gpt = OpenAiImageProvider::new(client, "k".into(), "gpt-image-1".into());
        assert!(gpt.request_body("p").get("response_format").is_none());
    }
}
