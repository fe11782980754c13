// src/services/prompt.rs
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::semantic::{
    NamedDescription, SemanticConfiguration, group_stones, indefinite_article,
};
use crate::errors::AtelierError;
use crate::models::{JewelryType, MetalFamily, StyleFamily, Suggestion, UpgradeAnalysis};

pub const MAX_ENGRAVING_LENGTH: usize = 50;

const QUALITY_PREAMBLE: &str = "Professional studio product photograph of";
const QUALITY_SUFFIX: &str = "Photorealistic jewelry photography, sharp focus, soft even lighting, \
pure white seamless background, high detail on metal texture and gemstone facets.";
const KEEP_ORIGINAL_DIRECTIVE: &str = "Keep the design exactly as it is. Improve only lighting, \
cleanliness and presentation.";

const FORBIDDEN_ELEMENTS: &[&str] = &[
    "hands",
    "people",
    "mannequins",
    "text overlays",
    "watermarks",
    "logos",
    "props",
    "packaging",
    "colored backgrounds",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptFormat {
    #[default]
    Natural,
    /// JSON-encoded [`GenerationRequest`].
    Structured,
}

impl FromStr for PromptFormat {
    type Err = AtelierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "natural" => Ok(PromptFormat::Natural),
            "structured" | "json" => Ok(PromptFormat::Structured),
            other => Err(AtelierError::Config(format!(
                "unknown prompt format '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub task: String,
    pub subject: Subject,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personalization: Option<Personalization>,
    pub rendering: Rendering,
    pub background: Background,
    pub forbidden_elements: Vec<String>,
    pub output: OutputSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub category: NamedDescription,
    pub base_model: NamedDescription,
    pub material: NamedDescription,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub center_stone: Option<NamedDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Personalization {
    pub engraving: Engraving,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Engraving {
    pub text: String,
    pub placement: String,
    pub priority: String,
    pub must_be_readable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rendering {
    pub style: String,
    pub lighting: String,
    pub camera: String,
}

impl Default for Rendering {
    fn default() -> Self {
        Self {
            style: "photorealistic studio product photography".to_string(),
            lighting: "soft diffused studio lighting with controlled reflections".to_string(),
            camera: "three-quarter view, piece centered, macro lens".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Background {
    pub color: String,
    pub surface: String,
    pub shadows: String,
}

impl Default for Background {
    fn default() -> Self {
        Self {
            color: "#FFFFFF".to_string(),
            surface: "pure white seamless".to_string(),
            shadows: "soft contact shadow only".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSpec {
    pub aspect_ratio: String,
    pub resolution: String,
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            aspect_ratio: "1:1".to_string(),
            resolution: "1024x1024".to_string(),
        }
    }
}

/// Makes user engraving text safe to embed in a prompt. Never fails and is
/// idempotent.
pub fn sanitize_engraving(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| *c != '\\')
        .map(|c| match c {
            '"' => '\'',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated: String = collapsed.chars().take(MAX_ENGRAVING_LENGTH).collect();
    truncated.trim().to_string()
}

/// "A", "A and B", "A, B, and C".
pub fn join_phrases(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [one] => one.clone(),
        [a, b] => format!("{} and {}", a, b),
        [head @ .., last] => format!("{}, and {}", head.join(", "), last),
    }
}

fn piece_label(kind: Option<JewelryType>) -> &'static str {
    match kind {
        Some(JewelryType::Ring) => "ring",
        Some(JewelryType::Necklace) => "necklace",
        Some(JewelryType::Pendant) => "pendant",
        Some(JewelryType::Earrings) => "pair of earrings",
        Some(JewelryType::Bracelet) => "bracelet",
        Some(JewelryType::Brooch) => "brooch",
        Some(JewelryType::Other) | None => "jewelry piece",
    }
}

fn metal_label(metal: Option<MetalFamily>) -> Option<&'static str> {
    match metal? {
        MetalFamily::YellowGold => Some("yellow gold"),
        MetalFamily::WhiteGold => Some("white gold"),
        MetalFamily::RoseGold => Some("rose gold"),
        MetalFamily::Platinum => Some("platinum"),
        MetalFamily::Silver => Some("silver"),
        MetalFamily::Other => None,
    }
}

fn style_label(style: Option<StyleFamily>) -> Option<&'static str> {
    match style? {
        StyleFamily::Classic => Some("classic"),
        StyleFamily::Vintage => Some("vintage"),
        StyleFamily::Modern => Some("modern"),
        StyleFamily::Minimalist => Some("minimalist"),
        StyleFamily::Bohemian => Some("bohemian"),
        StyleFamily::ArtDeco => Some("art deco"),
        StyleFamily::Other => None,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PromptBuilder {
    format: PromptFormat,
}

impl PromptBuilder {
    pub fn new(format: PromptFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> PromptFormat {
        self.format
    }

    /// Prompt text in the configured format.
    pub fn build_prompt(&self, semantic: &SemanticConfiguration) -> Result<String, AtelierError> {
        match self.format {
            PromptFormat::Natural => Ok(self.render(semantic)),
            PromptFormat::Structured => serde_json::to_string(&self.generation_request(semantic))
                .map_err(|e| AtelierError::Serialization(e.to_string())),
        }
    }

    pub fn generation_request(&self, semantic: &SemanticConfiguration) -> GenerationRequest {
        let engraving = semantic
            .engraving_text
            .as_deref()
            .map(sanitize_engraving)
            .filter(|text| !text.is_empty());

        GenerationRequest {
            task: "jewelry_product_render".to_string(),
            subject: Subject {
                category: semantic.category.clone(),
                base_model: NamedDescription {
                    name: semantic.base_model.name.clone(),
                    description: semantic
                        .base_model
                        .ai_description
                        .clone()
                        .unwrap_or_else(|| semantic.base_model.description.clone()),
                },
                material: NamedDescription {
                    name: semantic.material.name.clone(),
                    description: semantic.material.description.clone(),
                },
                center_stone: semantic.center_stone().map(|stone| NamedDescription {
                    name: stone.name.clone(),
                    description: stone.description.clone(),
                }),
            },
            personalization: engraving.map(|text| Personalization {
                engraving: Engraving {
                    text,
                    placement: "inner band".to_string(),
                    priority: "high".to_string(),
                    must_be_readable: true,
                },
            }),
            rendering: Rendering::default(),
            background: Background::default(),
            forbidden_elements: FORBIDDEN_ELEMENTS.iter().map(|s| s.to_string()).collect(),
            output: OutputSpec::default(),
        }
    }

    /// Natural-language prompt, e.g. "Professional studio product photograph
    /// of an 18k rose gold ring (Halo Ring), set with a brilliant colorless
    /// diamond. Photorealistic ...".
    pub fn render(&self, semantic: &SemanticConfiguration) -> String {
        let subject = format!(
            "{} {}",
            semantic.material.description,
            semantic.category.name.trim().to_lowercase()
        );
        let mut prompt = format!(
            "{} {} {}",
            QUALITY_PREAMBLE,
            indefinite_article(&subject),
            subject
        );

        let model_note = semantic
            .base_model
            .ai_description
            .as_deref()
            .map(|desc| format!("{}: {}", semantic.base_model.name, desc))
            .unwrap_or_else(|| semantic.base_model.name.clone());
        if !model_note.trim().is_empty() {
            prompt.push_str(&format!(" ({})", model_note.trim()));
        }

        // Placement order; the semantic builder already sorted the stones.
        let stones: Vec<String> = group_stones(&semantic.stones)
            .iter()
            .map(|g| g.phrase())
            .collect();
        if !stones.is_empty() {
            prompt.push_str(", set with ");
            prompt.push_str(&join_phrases(&stones));
        }

        prompt.push_str(". ");
        prompt.push_str(QUALITY_SUFFIX);
        prompt
    }

    /// Per-angle variant of `base` for frame `index` of a 360° set.
    ///
    /// A structured `base` gets the angle as its camera direction and stays
    /// valid JSON. Anything else gets a trailing sentence.
    pub fn frame_prompt(&self, base: &str, index: u32, count: u32) -> String {
        let count = count.max(1);
        let view = format!(
            "view at {} degrees (frame {} of {}), identical lighting, scale and \
framing across all frames",
            360 * index / count,
            index + 1,
            count
        );

        if self.format == PromptFormat::Structured {
            if let Ok(mut request) = serde_json::from_str::<GenerationRequest>(base) {
                request.rendering.camera = format!("turntable {}", view);
                if let Ok(json) = serde_json::to_string(&request) {
                    return json;
                }
            }
        }
        format!("{} Turntable {}.", base, view)
    }

    /// Re-render prompt for an upgrade preview. Selections are ignored when
    /// `keep_original` is set.
    pub fn build_upgrade_prompt(
        &self,
        analysis: &UpgradeAnalysis,
        selected: &[&Suggestion],
        keep_original: bool,
    ) -> String {
        let piece = piece_label(analysis.jewelry_type);
        let mut traits = Vec::new();
        if let Some(style) = style_label(analysis.style) {
            traits.push(style.to_string());
        }
        if let Some(metal) = metal_label(analysis.metal) {
            traits.push(metal.to_string());
        }
        traits.push(piece.to_string());
        let subject = traits.join(" ");

        let mut prompt = format!(
            "{} {} {}",
            QUALITY_PREAMBLE,
            indefinite_article(&subject),
            subject
        );
        if let Some(stones) = analysis.stones.as_deref().filter(|s| !s.trim().is_empty()) {
            prompt.push_str(&format!(" with {}", stones.trim()));
        }
        let description = analysis
            .analysis_payload
            .as_ref()
            .and_then(|payload| payload.get("description"))
            .and_then(|d| d.as_str())
            .map(str::trim)
            .filter(|d| !d.is_empty());
        if let Some(description) = description {
            prompt.push_str(&format!(" ({})", description.trim_end_matches('.')));
        }
        prompt.push_str(". ");

        if keep_original || selected.is_empty() {
            prompt.push_str(KEEP_ORIGINAL_DIRECTIVE);
        } else {
            let changes: Vec<String> = selected
                .iter()
                .map(|s| {
                    format!(
                        "{}: {}",
                        s.title.trim(),
                        s.description.trim().trim_end_matches('.')
                    )
                })
                .collect();
            prompt.push_str("Apply these design refinements: ");
            prompt.push_str(&changes.join("; "));
            prompt.push('.');
            prompt.push_str(" Preserve the overall character of the original piece.");
        }

        prompt.push(' ');
        prompt.push_str(QUALITY_SUFFIX);
        prompt
    }
}
