// src/models/upgrade.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{JobStatus, Owner};
use crate::errors::AtelierError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum AnalysisStatus {
    Pending = 0,
    Analyzing = 1,
    Completed = 2,
    Failed = 3,
}

impl AnalysisStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AnalysisStatus::Completed | AnalysisStatus::Failed)
    }

    fn advance(&mut self, next: AnalysisStatus) -> Result<(), AtelierError> {
        let allowed = matches!(
            (*self, next),
            (AnalysisStatus::Pending, AnalysisStatus::Analyzing)
                | (AnalysisStatus::Analyzing, AnalysisStatus::Completed)
                | (AnalysisStatus::Analyzing, AnalysisStatus::Failed)
        );
        if !allowed {
            return Err(AtelierError::InvalidTransition(format!(
                "{:?} -> {:?}",
                self, next
            )));
        }
        *self = next;
        Ok(())
    }
}

impl From<AnalysisStatus> for u8 {
    fn from(status: AnalysisStatus) -> Self {
        status as u8
    }
}

impl TryFrom<u8> for AnalysisStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AnalysisStatus::Pending),
            1 => Ok(AnalysisStatus::Analyzing),
            2 => Ok(AnalysisStatus::Completed),
            3 => Ok(AnalysisStatus::Failed),
            other => Err(format!("unknown analysis status {}", other)),
        }
    }
}

/// Lowercased alphanumeric words of `text`.
fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Whole-word match that also accepts the `-s`/`-es` plural.
fn mentions(words: &[String], keywords: &[&str]) -> bool {
    words.iter().any(|w| {
        keywords.iter().any(|k| {
            w == k || w.strip_prefix(k).is_some_and(|rest| rest == "s" || rest == "es")
        })
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JewelryType {
    Ring,
    Necklace,
    Pendant,
    Earrings,
    Bracelet,
    Brooch,
    Other,
}

impl JewelryType {
    /// Best-effort keyword match; never fails.
    ///
    /// Piece nouns ("bracelet", "ring") outrank words that also describe
    /// parts or styles ("chain", "band"), so "gold chain bracelet" stays a
    /// bracelet.
    pub fn from_description(text: &str) -> Self {
        const NOUNS: [(&[&str], JewelryType); 6] = [
            (&["earring"], JewelryType::Earrings),
            (&["pendant"], JewelryType::Pendant),
            (&["necklace"], JewelryType::Necklace),
            (&["bracelet"], JewelryType::Bracelet),
            (&["brooch"], JewelryType::Brooch),
            (&["ring"], JewelryType::Ring),
        ];
        const HINTS: [(&[&str], JewelryType); 6] = [
            (&["stud", "hoop"], JewelryType::Earrings),
            (&["locket"], JewelryType::Pendant),
            (&["chain", "choker"], JewelryType::Necklace),
            (&["bangle", "cuff"], JewelryType::Bracelet),
            (&["pin"], JewelryType::Brooch),
            (&["band", "solitaire"], JewelryType::Ring),
        ];

        let words = words(text);
        NOUNS
            .iter()
            .chain(HINTS.iter())
            .find(|(keywords, _)| mentions(&words, keywords))
            .map(|(_, kind)| *kind)
            .unwrap_or(JewelryType::Other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetalFamily {
    YellowGold,
    WhiteGold,
    RoseGold,
    Platinum,
    Silver,
    Other,
}

impl MetalFamily {
    /// A colour only names the gold when it sits right before "gold", so
    /// "yellow gold with white diamonds" stays yellow.
    pub fn from_description(text: &str) -> Self {
        let words = words(text);
        let tinted_gold = words
            .windows(2)
            .filter(|pair| pair[1] == "gold")
            .find_map(|pair| match pair[0].as_str() {
                "rose" | "pink" | "red" => Some(MetalFamily::RoseGold),
                "white" => Some(MetalFamily::WhiteGold),
                "yellow" => Some(MetalFamily::YellowGold),
                _ => None,
            });

        if let Some(family) = tinted_gold {
            family
        } else if mentions(&words, &["platinum"]) {
            MetalFamily::Platinum
        } else if mentions(&words, &["silver", "sterling"]) {
            MetalFamily::Silver
        } else if mentions(&words, &["gold", "yellow"]) {
            MetalFamily::YellowGold
        } else {
            MetalFamily::Other
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleFamily {
    Classic,
    Vintage,
    Modern,
    Minimalist,
    Bohemian,
    ArtDeco,
    Other,
}

impl StyleFamily {
    pub fn from_description(text: &str) -> Self {
        let words = words(text);
        if mentions(&words, &["deco", "geometric"]) {
            StyleFamily::ArtDeco
        } else if mentions(&words, &["vintage", "antique", "victorian", "edwardian", "retro"]) {
            StyleFamily::Vintage
        } else if mentions(&words, &["boho", "bohemian", "organic", "nature", "natural"]) {
            StyleFamily::Bohemian
        } else if mentions(&words, &["minimal", "minimalist", "simple", "sleek", "delicate"]) {
            StyleFamily::Minimalist
        } else if mentions(&words, &["modern", "contemporary"]) {
            StyleFamily::Modern
        } else if mentions(&words, &["classic", "timeless", "traditional", "elegant"]) {
            StyleFamily::Classic
        } else {
            StyleFamily::Other
        }
    }
}

const MATERIAL_WORDS: &[&str] = &[
    "material",
    "finish",
    "finishing",
    "metal",
    "polish",
    "polished",
    "polishing",
    "plating",
    "plated",
];
const STONE_WORDS: &[&str] = &[
    "stone",
    "setting",
    "gem",
    "gemstone",
    "prong",
    "bezel",
    "diamond",
];
const PROPORTION_WORDS: &[&str] = &[
    "proportion",
    "balance",
    "balanced",
    "size",
    "sizing",
    "scale",
    "width",
    "shape",
];
const CRAFT_WORDS: &[&str] = &[
    "craft",
    "crafted",
    "craftsmanship",
    "detail",
    "detailing",
    "engrave",
    "engraved",
    "engraving",
    "texture",
    "textured",
    "milgrain",
    "filigree",
];

/// The four fixed suggestion groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionCategory {
    MaterialFinish,
    StoneSetting,
    ProportionsBalance,
    CraftsmanshipDetail,
}

impl SuggestionCategory {
    pub const ALL: [SuggestionCategory; 4] = [
        SuggestionCategory::MaterialFinish,
        SuggestionCategory::StoneSetting,
        SuggestionCategory::ProportionsBalance,
        SuggestionCategory::CraftsmanshipDetail,
    ];

    pub fn id(self) -> &'static str {
        match self {
            SuggestionCategory::MaterialFinish => "material_finish",
            SuggestionCategory::StoneSetting => "stone_setting",
            SuggestionCategory::ProportionsBalance => "proportions_balance",
            SuggestionCategory::CraftsmanshipDetail => "craftsmanship_detail",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            SuggestionCategory::MaterialFinish => "Material & Finish",
            SuggestionCategory::StoneSetting => "Stone & Setting",
            SuggestionCategory::ProportionsBalance => "Proportions & Balance",
            SuggestionCategory::CraftsmanshipDetail => "Craftsmanship & Detail",
        }
    }

    fn from_keywords(text: &str) -> Option<Self> {
        let normalized = text.trim().to_lowercase();
        if let Some(exact) = Self::ALL.into_iter().find(|c| c.id() == normalized) {
            return Some(exact);
        }

        let words = words(text);
        if mentions(&words, MATERIAL_WORDS) {
            Some(SuggestionCategory::MaterialFinish)
        } else if mentions(&words, STONE_WORDS) {
            Some(SuggestionCategory::StoneSetting)
        } else if mentions(&words, PROPORTION_WORDS) {
            Some(SuggestionCategory::ProportionsBalance)
        } else if mentions(&words, CRAFT_WORDS) {
            Some(SuggestionCategory::CraftsmanshipDetail)
        } else {
            None
        }
    }

    /// Maps a free-text category label, falling back to the suggestion title.
    /// Anything unrecognised lands in craftsmanship/detail.
    pub fn classify(label: &str, title: &str) -> Self {
        Self::from_keywords(label)
            .or_else(|| Self::from_keywords(title))
            .unwrap_or(SuggestionCategory::CraftsmanshipDetail)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLevel {
    Low,
    Medium,
    High,
}

impl ImpactLevel {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "low" | "subtle" | "minor" => ImpactLevel::Low,
            "high" | "major" | "significant" | "dramatic" => ImpactLevel::High,
            _ => ImpactLevel::Medium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub id: String,
    pub category: SuggestionCategory,
    pub title: String,
    pub description: String,
    pub benefit: String,
    pub impact: ImpactLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeepOriginalOption {
    pub title: String,
    pub description: String,
}

impl Default for KeepOriginalOption {
    fn default() -> Self {
        Self {
            title: "Keep the original design".to_string(),
            description: "Render the piece as it is today, with a professional studio finish."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreviewGuidance {
    pub summary: String,
    #[serde(default)]
    pub key_changes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClarificationRequest {
    pub reason: String,
    #[serde(default)]
    pub requested_shots: Vec<String>,
}

/// Everything a successful vision pass contributes to an analysis.
#[derive(Debug, Clone, Default)]
pub struct AnalysisFindings {
    pub jewelry_type: Option<JewelryType>,
    pub metal: Option<MetalFamily>,
    pub stones: Option<String>,
    pub style: Option<StyleFamily>,
    pub confidence: Option<f32>,
    pub payload: serde_json::Value,
    pub suggestions: Vec<Suggestion>,
    pub keep_original: KeepOriginalOption,
    pub preview_guidance: Option<PreviewGuidance>,
    pub limitations: Vec<String>,
    pub clarification: Option<ClarificationRequest>,
}

/// One vision-analysis session for an uploaded photo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeAnalysis {
    pub id: Uuid,
    pub owner: Owner,
    pub original_image_url: String,
    pub original_image_key: String,
    pub content_type: String,
    pub status: AnalysisStatus,
    pub jewelry_type: Option<JewelryType>,
    pub metal: Option<MetalFamily>,
    pub stones: Option<String>,
    pub style: Option<StyleFamily>,
    pub confidence: Option<f32>,
    pub analysis_payload: Option<serde_json::Value>,
    pub suggestions: Vec<Suggestion>,
    pub keep_original: Option<KeepOriginalOption>,
    pub preview_guidance: Option<PreviewGuidance>,
    pub limitations: Vec<String>,
    pub clarification: Option<ClarificationRequest>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UpgradeAnalysis {
    pub fn new(
        owner: Owner,
        original_image_url: String,
        original_image_key: String,
        content_type: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner,
            original_image_url,
            original_image_key,
            content_type,
            status: AnalysisStatus::Pending,
            jewelry_type: None,
            metal: None,
            stones: None,
            style: None,
            confidence: None,
            analysis_payload: None,
            suggestions: Vec::new(),
            keep_original: None,
            preview_guidance: None,
            limitations: Vec::new(),
            clarification: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn start_analyzing(&mut self) -> Result<(), AtelierError> {
        self.status.advance(AnalysisStatus::Analyzing)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn complete(&mut self, findings: AnalysisFindings) -> Result<(), AtelierError> {
        self.status.advance(AnalysisStatus::Completed)?;
        let now = Utc::now();
        self.jewelry_type = findings.jewelry_type;
        self.metal = findings.metal;
        self.stones = findings.stones;
        self.style = findings.style;
        self.confidence = findings.confidence.map(|score| score.clamp(0.0, 1.0));
        self.analysis_payload = Some(findings.payload);
        self.suggestions = findings.suggestions;
        self.keep_original = Some(findings.keep_original);
        self.preview_guidance = findings.preview_guidance;
        self.limitations = findings.limitations;
        self.clarification = findings.clarification;
        self.updated_at = now;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), AtelierError> {
        self.status.advance(AnalysisStatus::Failed)?;
        let now = Utc::now();
        self.suggestions.clear();
        self.confidence = None;
        self.error_message = Some(message.into());
        self.updated_at = now;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn suggestion(&self, id: &str) -> Option<&Suggestion> {
        self.suggestions.iter().find(|s| s.id == id)
    }
}

/// A re-render request applying a subset of an analysis's suggestions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradePreviewJob {
    pub id: Uuid,
    pub analysis_id: Uuid,
    pub owner: Owner,
    pub status: JobStatus,
    pub keep_original: bool,
    pub applied_suggestion_ids: Vec<String>,
    pub prompt: Option<String>,
    pub enhanced_image_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UpgradePreviewJob {
    pub fn new(
        analysis_id: Uuid,
        owner: Owner,
        keep_original: bool,
        applied_suggestion_ids: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            analysis_id,
            owner,
            status: JobStatus::Pending,
            keep_original,
            applied_suggestion_ids,
            prompt: None,
            enhanced_image_url: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn start_processing(&mut self) -> Result<(), AtelierError> {
        self.status.advance(JobStatus::Processing)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn complete(&mut self, enhanced_image_url: String) -> Result<(), AtelierError> {
        if enhanced_image_url.is_empty() {
            return Err(AtelierError::Upstream("empty enhanced image URL".to_string()));
        }
        self.status.advance(JobStatus::Completed)?;
        let now = Utc::now();
        self.enhanced_image_url = Some(enhanced_image_url);
        self.updated_at = now;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), AtelierError> {
        self.status.advance(JobStatus::Failed)?;
        let now = Utc::now();
        self.enhanced_image_url = None;
        self.error_message = Some(message.into());
        self.updated_at = now;
        self.completed_at = Some(now);
        Ok(())
    }
}
