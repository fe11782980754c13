// src/services/vision.rs
use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use log::warn;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

use crate::models::{ClarificationRequest, KeepOriginalOption, PreviewGuidance};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";

const SYSTEM_INSTRUCTION: &str = r#"
You are an expert jewelry design advisor. You look at a photo of an existing
piece of jewelry and propose tasteful, optional upgrades that respect its
character. Never invent details you cannot see; list them as limitations.

Respond with a single JSON object and nothing else:
{
    "description": "one line describing the piece",
    "confidence": { "score": 0.0-1.0, "note": "assumptions you made" },
    "detected": {
        "jewelryType": "ring | necklace | pendant | earrings | bracelet | brooch | other",
        "hasStones": true,
        "stoneDescription": "...",
        "metal": "...",
        "finish": "...",
        "style": "..."
    },
    "suggestions": [
        {
            "category": "material_finish | stone_setting | proportions_balance | craftsmanship_detail",
            "title": "...",
            "description": "...",
            "benefit": "...",
            "impact": "low | medium | high",
            "characterNote": "optional"
        }
    ],
    "keepOriginal": { "title": "...", "description": "..." },
    "previewGuidance": { "summary": "...", "keyChanges": ["2 to 4 visual changes"] },
    "limitations": ["optional"],
    "clarification": { "reason": "...", "requestedShots": ["..."] }
}

Give one to three suggestions per category. Always include keepOriginal.
Only include clarification when the photo is too unclear to judge the piece.
"#;

/// Image handed to a vision model.
#[derive(Debug, Clone, PartialEq)]
pub enum VisionImage {
    Url(String),
    Base64 { media_type: String, data: String },
}

impl VisionImage {
    pub fn from_bytes(bytes: &[u8], media_type: &str) -> Self {
        VisionImage::Base64 {
            media_type: media_type.to_string(),
            data: general_purpose::STANDARD.encode(bytes),
        }
    }

    fn as_url(&self) -> String {
        match self {
            VisionImage::Url(url) => url.clone(),
            VisionImage::Base64 { media_type, data } => {
                format!("data:{};base64,{}", media_type, data)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Confidence {
    pub score: Option<f32>,
    pub note: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ConfidenceRepr {
    Score(f32),
    Detailed {
        #[serde(default)]
        score: Option<f32>,
        #[serde(default, alias = "assumptions")]
        note: Option<String>,
    },
    Note(String),
    Missing(()),
}

impl<'de> Deserialize<'de> for Confidence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match ConfidenceRepr::deserialize(deserializer)? {
            ConfidenceRepr::Score(score) => Confidence {
                score: Some(score),
                note: None,
            },
            ConfidenceRepr::Detailed { score, note } => Confidence { score, note },
            ConfidenceRepr::Note(note) => Confidence {
                score: None,
                note: Some(note),
            },
            ConfidenceRepr::Missing(()) => Confidence::default(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectedAttributes {
    #[serde(alias = "type")]
    pub jewelry_type: Option<String>,
    pub has_stones: Option<bool>,
    pub stone_description: Option<String>,
    pub metal: Option<String>,
    pub finish: Option<String>,
    pub style: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VisionSuggestion {
    pub category: String,
    pub title: String,
    pub description: String,
    pub benefit: String,
    pub impact: String,
    pub character_note: Option<String>,
}

/// Suggestions arrive either as a flat list or grouped by category name.
fn flexible_suggestions<'de, D>(deserializer: D) -> Result<Vec<VisionSuggestion>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Flat(Vec<VisionSuggestion>),
        Grouped(BTreeMap<String, Vec<VisionSuggestion>>),
        Missing(()),
    }

    Ok(match Repr::deserialize(deserializer)? {
        Repr::Flat(list) => list,
        Repr::Grouped(groups) => groups
            .into_iter()
            .flat_map(|(category, items)| {
                items.into_iter().map(move |mut item| {
                    if item.category.trim().is_empty() {
                        item.category = category.clone();
                    }
                    item
                })
            })
            .collect(),
        Repr::Missing(()) => Vec::new(),
    })
}

/// Parsed model answer. Every field is optional on the wire; unknown keys
/// are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisionAnalysis {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default, alias = "detectedAttributes")]
    pub detected: DetectedAttributes,
    #[serde(default, deserialize_with = "flexible_suggestions")]
    pub suggestions: Vec<VisionSuggestion>,
    #[serde(default)]
    pub keep_original: Option<KeepOriginalOption>,
    #[serde(default)]
    pub preview_guidance: Option<PreviewGuidance>,
    #[serde(default)]
    pub limitations: Vec<String>,
    #[serde(default)]
    pub clarification: Option<ClarificationRequest>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl VisionAnalysis {
    /// An answer with no description, no suggestions and no clarification
    /// carries nothing usable.
    fn is_empty(&self) -> bool {
        self.description.trim().is_empty()
            && self.suggestions.is_empty()
            && self.clarification.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct VisionAnalysisResult {
    pub success: bool,
    pub analysis: Option<VisionAnalysis>,
    pub error: Option<String>,
    /// Model text as received, kept for the audit payload.
    pub raw_response: Option<String>,
}

impl VisionAnalysisResult {
    pub fn succeeded(analysis: VisionAnalysis, raw_response: String) -> Self {
        Self {
            success: true,
            analysis: Some(analysis),
            error: None,
            raw_response: Some(raw_response),
        }
    }

    pub fn failed(error: impl Into<String>, raw_response: Option<String>) -> Self {
        Self {
            success: false,
            analysis: None,
            error: Some(error.into()),
            raw_response,
        }
    }

    fn from_model_text(provider: &str, text: &str) -> Self {
        match parse_model_output(text) {
            Ok(analysis) => Self::succeeded(analysis, text.to_string()),
            Err(e) => {
                warn!("{} returned unusable analysis: {}", provider, e);
                Self::failed(e, Some(text.to_string()))
            }
        }
    }
}

/// Extracts the JSON object from model text, tolerating code fences and
/// surrounding prose.
pub fn parse_model_output(text: &str) -> Result<VisionAnalysis, String> {
    let start = text.find('{');
    let end = text.rfind('}');
    let body = match (start, end) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => return Err("model output contains no JSON object".to_string()),
    };

    let analysis: VisionAnalysis = serde_json::from_str(body)
        .map_err(|e| format!("Failed to parse analysis JSON: {}", e))?;
    if analysis.is_empty() {
        return Err("analysis JSON has no description, suggestions or clarification".to_string());
    }
    Ok(analysis)
}

#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    fn name(&self) -> &str;

    /// Never errors: transport and parse failures come back with
    /// `success == false`.
    async fn analyze(&self, image: &VisionImage) -> VisionAnalysisResult;
}

pub struct OpenAiVisionAnalyzer {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenAiVisionAnalyzer {
    pub fn new(client: Client, api_key: String, model: String) -> Self {
        Self {
            client,
            api_key,
            model,
        }
    }

    async fn request(&self, image: &VisionImage) -> Result<String, String> {
        let response = self
            .client
            .post(OPENAI_CHAT_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.model,
                "messages": [
                    { "role": "system", "content": SYSTEM_INSTRUCTION },
                    {
                        "role": "user",
                        "content": [
                            { "type": "text", "text": "Analyze this piece of jewelry." },
                            { "type": "image_url", "image_url": { "url": image.as_url() } }
                        ]
                    }
                ],
                "max_tokens": 2048,
                "response_format": { "type": "json_object" }
            }))
            .send()
            .await
            .map_err(|e| format!("OpenAI request failed: {}", e))?;

        if !response.status().is_success() {
            let code = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            return Err(format!("OpenAI error ({}): {}", code, error_text));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse OpenAI response: {}", e))?;

        result["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| "No content in OpenAI response".to_string())
    }
}

#[async_trait]
impl VisionAnalyzer for OpenAiVisionAnalyzer {
    fn name(&self) -> &str {
        "openai"
    }

    async fn analyze(&self, image: &VisionImage) -> VisionAnalysisResult {
        match self.request(image).await {
            Ok(text) => VisionAnalysisResult::from_model_text("OpenAI", &text),
            Err(e) => {
                warn!("Vision analysis failed: {}", e);
                VisionAnalysisResult::failed(e, None)
            }
        }
    }
}

pub struct AnthropicVisionAnalyzer {
    client: Client,
    api_key: String,
    model: String,
}

impl AnthropicVisionAnalyzer {
    pub fn new(client: Client, api_key: String, model: String) -> Self {
        Self {
            client,
            api_key,
            model,
        }
    }

    fn image_block(image: &VisionImage) -> Value {
        match image {
            VisionImage::Url(url) => json!({
                "type": "image",
                "source": { "type": "url", "url": url }
            }),
            VisionImage::Base64 { media_type, data } => json!({
                "type": "image",
                "source": { "type": "base64", "media_type": media_type, "data": data }
            }),
        }
    }

    async fn request(&self, image: &VisionImage) -> Result<String, String> {
        let response = self
            .client
            .post(ANTHROPIC_MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&json!({
                "model": self.model,
                "max_tokens": 2048,
                "system": SYSTEM_INSTRUCTION,
                "messages": [{
                    "role": "user",
                    "content": [
                        Self::image_block(image),
                        { "type": "text", "text": "Analyze this piece of jewelry." }
                    ]
                }]
            }))
            .send()
            .await
            .map_err(|e| format!("Anthropic request failed: {}", e))?;

        if !response.status().is_success() {
            let code = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            return Err(format!("Anthropic error ({}): {}", code, error_text));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse Anthropic response: {}", e))?;

        result["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| "No content in Anthropic response".to_string())
    }
}

#[async_trait]
impl VisionAnalyzer for AnthropicVisionAnalyzer {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn analyze(&self, image: &VisionImage) -> VisionAnalysisResult {
        match self.request(image).await {
            Ok(text) => VisionAnalysisResult::from_model_text("Anthropic", &text),
            Err(e) => {
                warn!("Vision analysis failed: {}", e);
                VisionAnalysisResult::failed(e, None)
            }
        }
    }
}

/// Offline analyzer returning a fixed answer for a yellow gold solitaire.
#[derive(Default)]
pub struct DryrunVisionAnalyzer;

impl DryrunVisionAnalyzer {
    pub fn canned_response() -> Value {
        json!({
            "description": "Yellow gold solitaire ring with a round center diamond",
            "confidence": { "score": 0.82, "note": "Assumed 14k from the tone" },
            "detected": {
                "jewelryType": "ring",
                "hasStones": true,
                "stoneDescription": "one round brilliant diamond",
                "metal": "yellow gold",
                "finish": "high polish",
                "style": "classic"
            },
            "suggestions": [
                {
                    "category": "material_finish",
                    "title": "Brushed satin band",
                    "description": "Give the shank a soft brushed finish.",
                    "benefit": "Makes the polished head stand out",
                    "impact": "medium"
                },
                {
                    "category": "stone_setting",
                    "title": "Six-prong setting",
                    "description": "Replace the four-prong head with six slim prongs.",
                    "benefit": "More security and a rounder outline",
                    "impact": "high"
                },
                {
                    "category": "proportions_balance",
                    "title": "Tapered shank",
                    "description": "Taper the band toward the center stone.",
                    "benefit": "Draws the eye to the diamond",
                    "impact": "medium"
                },
                {
                    "category": "craftsmanship_detail",
                    "title": "Milgrain edging",
                    "description": "Add fine milgrain along the band edges.",
                    "benefit": "Vintage texture without changing the silhouette",
                    "impact": "low",
                    "characterNote": "Keeps the classic feel"
                }
            ],
            "keepOriginal": {
                "title": "Keep it as it is",
                "description": "A clean studio render of the ring unchanged."
            },
            "previewGuidance": {
                "summary": "Classic solitaire refreshed",
                "keyChanges": ["six-prong head", "tapered band"]
            },
            "limitations": ["Back of the ring not visible"]
        })
    }
}

#[async_trait]
impl VisionAnalyzer for DryrunVisionAnalyzer {
    fn name(&self) -> &str {
        "dryrun"
    }

    async fn analyze(&self, _image: &VisionImage) -> VisionAnalysisResult {
        VisionAnalysisResult::from_model_text("dryrun", &Self::canned_response().to_string())
    }
}
